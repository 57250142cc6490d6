//! Analytical option pricing models
//!
//! Generalized Black-Scholes family used by the engine: `black_scholes`,
//! `black_scholes_merton` and `black_76`, expressed through the cost-of-carry
//! form (b = r, b = r - q, b = 0 respectively). Output conventions follow the
//! market standard for signal feeds: theta per calendar day, vega per one
//! volatility point, rho per one rate point.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::SignalError;
use crate::types::OptionType;

const SQRT_2PI: f64 = 2.5066282746310007;
const DAYS_PER_YEAR: f64 = 365.0;

/// Supported options pricing models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingModel {
    /// Black-Scholes: equity options, no dividend yield.
    BlackScholes,
    /// Black-Scholes-Merton: continuous dividend yield.
    BlackScholesMerton,
    /// Black-76: options on futures/forwards.
    Black76,
}

impl PricingModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlackScholes => "black_scholes",
            Self::BlackScholesMerton => "black_scholes_merton",
            Self::Black76 => "black_76",
        }
    }

    /// Whether the model consumes a dividend yield parameter.
    pub fn uses_dividend_yield(&self) -> bool {
        matches!(self, Self::BlackScholesMerton | Self::Black76)
    }

    /// Cost of carry for the model.
    fn carry(&self, r: f64, q: f64) -> f64 {
        match self {
            Self::BlackScholes => r,
            Self::BlackScholesMerton => r - q,
            Self::Black76 => 0.0,
        }
    }
}

impl FromStr for PricingModel {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "black_scholes" => Ok(Self::BlackScholes),
            "black_scholes_merton" => Ok(Self::BlackScholesMerton),
            // Legacy config spelling without the underscore.
            "black_76" | "black76" => Ok(Self::Black76),
            other => Err(SignalError::unsupported_model(format!(
                "Unsupported options pricing model: '{other}'. Supported models: \
                 black_scholes, black_scholes_merton, black_76"
            ))),
        }
    }
}

impl fmt::Display for PricingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five first-order greeks served by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GreekKind {
    Delta,
    Gamma,
    Theta,
    Vega,
    Rho,
}

impl GreekKind {
    pub const ALL: [GreekKind; 5] = [
        GreekKind::Delta,
        GreekKind::Gamma,
        GreekKind::Theta,
        GreekKind::Vega,
        GreekKind::Rho,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delta => "delta",
            Self::Gamma => "gamma",
            Self::Theta => "theta",
            Self::Vega => "vega",
            Self::Rho => "rho",
        }
    }

    /// Validity bounds; values outside are reported as missing.
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            Self::Delta => (-1.0, 1.0),
            Self::Gamma => (0.0, 1.0),
            Self::Theta => (-1.0, 1.0),
            Self::Vega => (0.0, 100.0),
            Self::Rho => (-100.0, 100.0),
        }
    }

    /// Clamp to missing when non-finite or out of the validity bounds.
    pub fn validate(&self, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return None;
        }
        let (lo, hi) = self.bounds();
        if value < lo || value > hi {
            return None;
        }
        Some(value)
    }
}

impl FromStr for GreekKind {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delta" => Ok(Self::Delta),
            "gamma" => Ok(Self::Gamma),
            "theta" => Ok(Self::Theta),
            "vega" => Ok(Self::Vega),
            "rho" => Ok(Self::Rho),
            other => Err(SignalError::unsupported_model(format!(
                "Unsupported Greek: '{other}'. Supported Greeks: delta, gamma, theta, vega, rho"
            ))),
        }
    }
}

impl fmt::Display for GreekKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standard normal cumulative distribution function
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + libm::erf(x / std::f64::consts::SQRT_2))
}

/// Standard normal probability density function
pub fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / SQRT_2PI
}

fn d1(s: f64, k: f64, t: f64, b: f64, sigma: f64) -> f64 {
    ((s / k).ln() + (b + 0.5 * sigma * sigma) * t) / (sigma * t.sqrt())
}

/// Option price under the given model.
pub fn price(
    model: PricingModel,
    option_type: OptionType,
    s: f64,
    k: f64,
    t: f64,
    r: f64,
    sigma: f64,
    q: f64,
) -> f64 {
    if t <= 0.0 {
        return match option_type {
            OptionType::Call => (s - k).max(0.0),
            OptionType::Put => (k - s).max(0.0),
        };
    }

    let b = model.carry(r, q);
    let d1 = d1(s, k, t, b, sigma);
    let d2 = d1 - sigma * t.sqrt();
    let carry_discount = ((b - r) * t).exp();
    let discount = (-r * t).exp();

    match option_type {
        OptionType::Call => s * carry_discount * norm_cdf(d1) - k * discount * norm_cdf(d2),
        OptionType::Put => k * discount * norm_cdf(-d2) - s * carry_discount * norm_cdf(-d1),
    }
}

/// Single greek under the given model.
pub fn greek(
    model: PricingModel,
    kind: GreekKind,
    option_type: OptionType,
    s: f64,
    k: f64,
    t: f64,
    r: f64,
    sigma: f64,
    q: f64,
) -> f64 {
    if t <= 0.0 {
        return 0.0;
    }

    let b = model.carry(r, q);
    let sqrt_t = t.sqrt();
    let d1 = d1(s, k, t, b, sigma);
    let d2 = d1 - sigma * sqrt_t;
    let carry_discount = ((b - r) * t).exp();
    let discount = (-r * t).exp();
    let pdf1 = norm_pdf(d1);

    match kind {
        GreekKind::Delta => match option_type {
            OptionType::Call => carry_discount * norm_cdf(d1),
            OptionType::Put => carry_discount * (norm_cdf(d1) - 1.0),
        },
        GreekKind::Gamma => carry_discount * pdf1 / (s * sigma * sqrt_t),
        GreekKind::Theta => {
            let decay = -s * carry_discount * pdf1 * sigma / (2.0 * sqrt_t);
            let annual = match option_type {
                OptionType::Call => {
                    decay - (b - r) * s * carry_discount * norm_cdf(d1)
                        - r * k * discount * norm_cdf(d2)
                }
                OptionType::Put => {
                    decay + (b - r) * s * carry_discount * norm_cdf(-d1)
                        + r * k * discount * norm_cdf(-d2)
                }
            };
            annual / DAYS_PER_YEAR
        }
        GreekKind::Vega => s * carry_discount * pdf1 * sqrt_t / 100.0,
        GreekKind::Rho => match model {
            // dV/dr = -T * V when the forward is held fixed.
            PricingModel::Black76 => {
                -t * price(model, option_type, s, k, t, r, sigma, q) / 100.0
            }
            _ => match option_type {
                OptionType::Call => k * t * discount * norm_cdf(d2) / 100.0,
                OptionType::Put => -k * t * discount * norm_cdf(-d2) / 100.0,
            },
        },
    }
}
