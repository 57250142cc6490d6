//! Premium/discount analyzer integration tests

use std::sync::Arc;

use approx::assert_relative_eq;
use chrono::{DateTime, Duration, Utc};
use signal_service::breaker::BreakerRegistry;
use signal_service::config::{ComputeSettings, Environment, ModelConfig, ModelParams};
use signal_service::greeks::{ComputeMethod, ComputePool, GreeksEngine, OptionRequest};
use signal_service::premium::{MispricingSeverity, PremiumAnalyzer};
use signal_service::types::OptionType;

const SPOT: f64 = 100.0;

fn model() -> Arc<ModelConfig> {
    let params = ModelParams {
        risk_free_rate: 0.05,
        dividend_yield: 0.0,
        default_volatility: 0.20,
        volatility_min: 0.01,
        volatility_max: 3.0,
    };
    Arc::new(ModelConfig::new(signal_service::models::PricingModel::BlackScholes, params).unwrap())
}

fn analyzer() -> PremiumAnalyzer {
    let model = model();
    let pool = Arc::new(ComputePool::new(&ComputeSettings::default()));
    let engine = Arc::new(GreeksEngine::new(
        Arc::clone(&model),
        Arc::clone(&pool),
        Arc::new(BreakerRegistry::new()),
        Environment::Test,
    ));
    PremiumAnalyzer::new(engine, model, pool)
}

fn expiry_in_days(days: i64) -> DateTime<Utc> {
    Utc::now() + Duration::days(days)
}

fn option(strike: f64, option_type: OptionType) -> OptionRequest {
    OptionRequest::new(strike, expiry_in_days(30), option_type)
        .with_volatility(0.20)
        .with_underlying_price(SPOT)
}

/// Theoretical price the analyzer will compute for `option` right now.
fn fair_price(request: &OptionRequest) -> f64 {
    let model = model();
    let t = signal_service::timeutil::time_to_expiry_years(request.expiry, Utc::now());
    model.theoretical_price(
        request.option_type,
        SPOT,
        request.strike,
        t,
        request.volatility.unwrap(),
    )
}

#[tokio::test]
async fn test_ten_percent_premium_is_high_severity() {
    let analyzer = analyzer();
    let request = option(100.0, OptionType::Call);
    let market = fair_price(&request) * 1.10;

    let result = analyzer
        .analyze(&[market], &[request], SPOT, false)
        .await
        .unwrap();

    let analysis = &result.results[0];
    assert_relative_eq!(analysis.premium_pct, 10.0, epsilon = 0.1);
    assert_eq!(analysis.severity, MispricingSeverity::High);
    assert!(analysis.arbitrage_signal);
    assert!(analysis.overpriced);
}

#[tokio::test]
async fn test_discount_is_not_overpriced() {
    let analyzer = analyzer();
    let request = option(100.0, OptionType::Put);
    let market = fair_price(&request) * 0.95;

    let result = analyzer
        .analyze(&[market], &[request], SPOT, false)
        .await
        .unwrap();
    let analysis = &result.results[0];
    assert!(!analysis.overpriced);
    assert!(analysis.premium_amount < 0.0);
    assert_eq!(analysis.severity, MispricingSeverity::Medium);
    assert!(!analysis.arbitrage_signal);
}

#[tokio::test]
async fn test_fair_price_is_low_severity() {
    let analyzer = analyzer();
    let request = option(105.0, OptionType::Call);
    let market = fair_price(&request);

    let result = analyzer
        .analyze(&[market], &[request], SPOT, false)
        .await
        .unwrap();
    let analysis = &result.results[0];
    assert_eq!(analysis.severity, MispricingSeverity::Low);
    assert!(analysis.premium_pct.abs() < 0.5);
}

#[tokio::test]
async fn test_length_mismatch_is_validation_error() {
    let analyzer = analyzer();
    let err = analyzer
        .analyze(&[1.0, 2.0], &[option(100.0, OptionType::Call)], SPOT, false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn test_empty_input_yields_empty_result() {
    let analyzer = analyzer();
    let result = analyzer.analyze(&[], &[], SPOT, true).await.unwrap();
    assert!(result.results.is_empty());
    assert_eq!(result.method, ComputeMethod::None);
}

#[tokio::test]
async fn test_include_greeks_merges_engine_output() {
    let analyzer = analyzer();
    let request = option(100.0, OptionType::Call);
    let market = fair_price(&request);

    let with_greeks = analyzer
        .analyze(&[market], &[request.clone()], SPOT, true)
        .await
        .unwrap();
    let greeks = with_greeks.results[0].greeks.as_ref().expect("greeks expected");
    assert!(greeks.delta.unwrap() > 0.0);

    let without = analyzer
        .analyze(&[market], &[request], SPOT, false)
        .await
        .unwrap();
    assert!(without.results[0].greeks.is_none());
}

#[tokio::test]
async fn test_deterministic_classification() {
    let analyzer = analyzer();
    let request = option(100.0, OptionType::Call);
    let market = fair_price(&request) * 1.09;

    let first = analyzer
        .analyze(&[market], &[request.clone()], SPOT, false)
        .await
        .unwrap();
    let second = analyzer
        .analyze(&[market], &[request], SPOT, false)
        .await
        .unwrap();

    assert_eq!(first.results[0].severity, second.results[0].severity);
    assert_eq!(
        first.results[0].arbitrage_signal,
        second.results[0].arbitrage_signal
    );
}

#[tokio::test]
async fn test_chain_analysis_groups_by_expiry_and_detects() {
    let analyzer = analyzer();

    let near_call = OptionRequest::new(100.0, expiry_in_days(30), OptionType::Call)
        .with_volatility(0.20)
        .with_underlying_price(SPOT);
    let near_put = OptionRequest::new(100.0, expiry_in_days(30), OptionType::Put)
        .with_volatility(0.20)
        .with_underlying_price(SPOT);
    let far_call = OptionRequest::new(100.0, expiry_in_days(60), OptionType::Call)
        .with_volatility(0.20)
        .with_underlying_price(SPOT);
    let far_call_high = OptionRequest::new(105.0, expiry_in_days(60), OptionType::Call)
        .with_volatility(0.20)
        .with_underlying_price(SPOT);

    let rows = vec![
        // Parity pair priced 3.0 apart.
        (near_call, 6.0),
        (near_put, 3.0),
        // Vertical inversion: lower strike call cheaper by 1.0.
        (far_call, 2.0),
        (far_call_high, 3.0),
    ];

    let analysis = analyzer.analyze_chain(&rows).await.unwrap();
    assert_eq!(analysis.per_expiry.len(), 2, "grouped into two expiries");
    assert_eq!(analysis.parity.len(), 1);
    assert_relative_eq!(analysis.parity[0].deviation, 3.0);
    assert_eq!(analysis.inversions.len(), 1);
    assert_eq!(analysis.inversions[0].lower_strike, 100.0);
    assert!(analysis.total_signals >= 2);

    for summary in analysis.summaries.values() {
        assert_eq!(summary.options, 2);
    }
}

#[tokio::test]
async fn test_analyzer_metrics_accumulate() {
    let analyzer = analyzer();
    let request = option(100.0, OptionType::Call);
    let market = fair_price(&request) * 1.20;

    analyzer
        .analyze(&[market], &[request], SPOT, false)
        .await
        .unwrap();

    let metrics = analyzer.metrics();
    assert_eq!(metrics.analyses, 1);
    assert_eq!(metrics.options_analyzed, 1);
    assert_eq!(metrics.arbitrage_signals_found, 1);

    analyzer.reset_metrics();
    assert_eq!(analyzer.metrics().analyses, 0);
}
