//! Implied volatility solver
//!
//! Newton-Raphson with a bisection fallback over the configured volatility
//! bounds. Non-convergence, negative time value or an out-of-band result
//! yield `None`; the caller substitutes the default volatility.

use crate::models::{self, GreekKind, PricingModel};
use crate::types::OptionType;

/// Hard cap on solved volatility (500%).
pub const IV_CAP: f64 = 5.0;

const TOLERANCE: f64 = 1e-6;
const MAX_ITERATIONS: usize = 100;

/// Solve for the volatility that reconciles `market_price` with the model.
///
/// The search is confined to `[vol_min, vol_max]`; the result is capped at
/// [`IV_CAP`].
#[allow(clippy::too_many_arguments)]
pub fn implied_volatility(
    model: PricingModel,
    market_price: f64,
    underlying_price: f64,
    strike: f64,
    time_to_expiry: f64,
    risk_free_rate: f64,
    dividend_yield: f64,
    option_type: OptionType,
    vol_min: f64,
    vol_max: f64,
) -> Option<f64> {
    if market_price <= 0.0 || underlying_price <= 0.0 || strike <= 0.0 || time_to_expiry <= 0.0 {
        return None;
    }
    let lo = vol_min.max(1e-4);
    let hi = vol_max.min(IV_CAP);
    if lo >= hi {
        return None;
    }

    let price_at = |sigma: f64| {
        models::price(
            model,
            option_type,
            underlying_price,
            strike,
            time_to_expiry,
            risk_free_rate,
            sigma,
            dividend_yield,
        )
    };

    // Negative time value: market below the zero-vol price cannot be solved.
    if market_price < price_at(lo) - TOLERANCE {
        return None;
    }
    // Market above the maximum attainable price within bounds.
    if market_price > price_at(hi) + TOLERANCE {
        return None;
    }

    // Newton-Raphson from a 20% guess.
    let mut sigma = 0.2f64.clamp(lo, hi);
    for _ in 0..MAX_ITERATIONS {
        let price = price_at(sigma);
        let diff = market_price - price;
        if diff.abs() < TOLERANCE {
            return Some(sigma.min(IV_CAP));
        }

        // Vega is quoted per volatility point; rescale to dPrice/dSigma.
        let vega = models::greek(
            model,
            GreekKind::Vega,
            option_type,
            underlying_price,
            strike,
            time_to_expiry,
            risk_free_rate,
            sigma,
            dividend_yield,
        ) * 100.0;
        if !vega.is_finite() || vega.abs() < 1e-10 {
            break;
        }

        sigma = (sigma + diff / vega).clamp(lo, hi);
    }

    bisect(market_price, lo, hi, price_at)
}

fn bisect(target: f64, mut lo: f64, mut hi: f64, price_at: impl Fn(f64) -> f64) -> Option<f64> {
    // Price is monotone increasing in volatility.
    for _ in 0..MAX_ITERATIONS {
        let mid = 0.5 * (lo + hi);
        let diff = price_at(mid) - target;
        if diff.abs() < TOLERANCE {
            return Some(mid.min(IV_CAP));
        }
        if diff > 0.0 {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    // Accept the bracket midpoint when it is still a genuine solution.
    let mid = 0.5 * (lo + hi);
    if (price_at(mid) - target).abs() < 1e-3 {
        Some(mid.min(IV_CAP))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const S: f64 = 100.0;
    const K: f64 = 100.0;
    const T: f64 = 0.25;
    const R: f64 = 0.05;

    fn solve(market_price: f64) -> Option<f64> {
        implied_volatility(
            PricingModel::BlackScholes,
            market_price,
            S,
            K,
            T,
            R,
            0.0,
            OptionType::Call,
            0.01,
            3.0,
        )
    }

    #[test]
    fn test_round_trips_known_volatility() {
        for sigma in [0.1, 0.2, 0.45, 0.9] {
            let price = models::price(
                PricingModel::BlackScholes,
                OptionType::Call,
                S,
                K,
                T,
                R,
                sigma,
                0.0,
            );
            let solved = solve(price).expect("should converge");
            assert_relative_eq!(solved, sigma, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_negative_time_value_is_missing() {
        // Deep ITM call priced below intrinsic cannot carry any volatility.
        let iv = implied_volatility(
            PricingModel::BlackScholes,
            1.0,
            120.0,
            100.0,
            T,
            R,
            0.0,
            OptionType::Call,
            0.01,
            3.0,
        );
        assert_eq!(iv, None);
    }

    #[test]
    fn test_unattainable_price_is_missing() {
        // Premium above what even max-bound volatility can produce.
        assert_eq!(solve(99.0), None);
    }

    #[test]
    fn test_invalid_inputs_are_missing() {
        assert_eq!(solve(0.0), None);
        assert_eq!(
            implied_volatility(
                PricingModel::BlackScholes,
                4.0,
                S,
                K,
                0.0,
                R,
                0.0,
                OptionType::Call,
                0.01,
                3.0
            ),
            None
        );
    }

    #[test]
    fn test_put_side_converges() {
        let price = models::price(
            PricingModel::BlackScholes,
            OptionType::Put,
            S,
            K,
            T,
            R,
            0.3,
            0.0,
        );
        let solved = implied_volatility(
            PricingModel::BlackScholes,
            price,
            S,
            K,
            T,
            R,
            0.0,
            OptionType::Put,
            0.01,
            3.0,
        )
        .expect("should converge");
        assert_relative_eq!(solved, 0.3, epsilon = 1e-4);
    }
}
