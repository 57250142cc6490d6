//! Service configuration
//!
//! Everything is loaded once at startup and immutable for the service
//! lifetime. Mandatory keys come from the config collaborator (file and/or
//! `SIGNAL`-prefixed environment); missing or out-of-range values abort
//! startup.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{Result, SignalError};
use crate::models::{self, GreekKind, PricingModel};
use crate::types::OptionType;

/// Runtime environment; gates the vectorized-engine fallback policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Environment {
    /// Per-option fallback from the vectorized path is only allowed
    /// outside production.
    pub fn allows_engine_fallback(&self) -> bool {
        matches!(self, Self::Development | Self::Test)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            "production" | "prod" => Ok(Self::Production),
            other => Err(SignalError::configuration(format!(
                "Invalid environment: '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for the configured options pricing model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelParams {
    pub risk_free_rate: f64,
    pub dividend_yield: f64,
    pub default_volatility: f64,
    pub volatility_min: f64,
    pub volatility_max: f64,
}

impl ModelParams {
    /// Range checks applied at load time.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=0.50).contains(&self.risk_free_rate) {
            return Err(SignalError::configuration(format!(
                "Invalid risk_free_rate: {}. Must be between 0.0 and 0.50",
                self.risk_free_rate
            )));
        }
        if !(0.0..=0.20).contains(&self.dividend_yield) {
            return Err(SignalError::configuration(format!(
                "Invalid dividend_yield: {}. Must be between 0.0 and 0.20",
                self.dividend_yield
            )));
        }
        if self.volatility_min >= self.volatility_max {
            return Err(SignalError::configuration(format!(
                "Invalid volatility bounds: min={}, max={}",
                self.volatility_min, self.volatility_max
            )));
        }
        if !(0.01..=10.0).contains(&self.default_volatility) {
            return Err(SignalError::configuration(format!(
                "Invalid default_volatility: {}. Must be between 0.01 and 10.0",
                self.default_volatility
            )));
        }
        Ok(())
    }

    pub fn volatility_in_bounds(&self, sigma: f64) -> bool {
        (self.volatility_min..=self.volatility_max).contains(&sigma)
    }
}

/// The configured pricing model plus its validated parameters.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    model: PricingModel,
    params: ModelParams,
}

impl ModelConfig {
    pub fn new(model: PricingModel, params: ModelParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { model, params })
    }

    /// Load model selection and parameters from the config source.
    /// All keys are mandatory.
    pub fn load(source: &config::Config) -> Result<Self> {
        let model_name: String = require(source, "signal_service.options_pricing_model")?;
        let model = model_name.parse::<PricingModel>()?;

        let params = ModelParams {
            risk_free_rate: require(source, "signal_service.model_params.risk_free_rate")?,
            dividend_yield: require(source, "signal_service.model_params.dividend_yield")?,
            default_volatility: require(source, "signal_service.model_params.default_volatility")?,
            volatility_min: require(source, "signal_service.model_params.volatility_min")?,
            volatility_max: require(source, "signal_service.model_params.volatility_max")?,
        };

        let config = Self::new(model, params)?;
        info!(model = %config.model, "Greeks model configuration initialized");
        Ok(config)
    }

    pub fn model(&self) -> PricingModel {
        self.model
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    /// Calculate a specific greek using the configured model.
    ///
    /// Flag mapping: `'c'` call, `'p'` put. Dividend yield is passed through
    /// for models that use it and ignored for plain Black-Scholes. Volatility
    /// outside the configured bounds is a configuration fault, not a pricing
    /// failure.
    pub fn compute_greek(
        &self,
        greek_name: &str,
        flag: char,
        underlying_price: f64,
        strike_price: f64,
        time_to_expiry: f64,
        volatility: f64,
        risk_free_rate: Option<f64>,
        dividend_yield: Option<f64>,
    ) -> Result<f64> {
        let kind = greek_name.parse::<GreekKind>()?;
        let option_type = match flag {
            'c' => OptionType::Call,
            'p' => OptionType::Put,
            other => {
                return Err(SignalError::validation(format!(
                    "Invalid option flag: '{other}' (expected 'c' or 'p')"
                )))
            }
        };

        if !self.params.volatility_in_bounds(volatility) {
            return Err(SignalError::configuration(format!(
                "Volatility {volatility} outside configured bounds [{}, {}]",
                self.params.volatility_min, self.params.volatility_max
            )));
        }

        let r = risk_free_rate.unwrap_or(self.params.risk_free_rate);
        let q = if self.model.uses_dividend_yield() {
            dividend_yield.unwrap_or(self.params.dividend_yield)
        } else {
            0.0
        };

        let value = models::greek(
            self.model,
            kind,
            option_type,
            underlying_price,
            strike_price,
            time_to_expiry,
            r,
            volatility,
            q,
        );
        if !value.is_finite() {
            return Err(SignalError::greeks_with_details(
                format!("Failed to calculate {kind} using {}", self.model),
                serde_json::json!({
                    "greek": kind.as_str(),
                    "model": self.model.as_str(),
                    "flag": flag.to_string(),
                    "underlying_price": underlying_price,
                    "strike_price": strike_price,
                    "time_to_expiry": time_to_expiry,
                    "volatility": volatility,
                    "risk_free_rate": r,
                    "dividend_yield": q,
                }),
            ));
        }
        Ok(value)
    }

    /// Theoretical option price with the configured rate and yield.
    pub fn theoretical_price(
        &self,
        option_type: OptionType,
        underlying_price: f64,
        strike_price: f64,
        time_to_expiry: f64,
        volatility: f64,
    ) -> f64 {
        let q = if self.model.uses_dividend_yield() {
            self.params.dividend_yield
        } else {
            0.0
        };
        models::price(
            self.model,
            option_type,
            underlying_price,
            strike_price,
            time_to_expiry,
            self.params.risk_free_rate,
            volatility,
            q,
        )
    }
}

/// Compute pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeSettings {
    /// Worker count; defaults to the available parallelism.
    pub pool_size: Option<usize>,
    /// Queued kernel calls beyond the pool before the reject path is taken.
    pub max_queue_depth: usize,
}

impl Default for ComputeSettings {
    fn default() -> Self {
        Self {
            pool_size: None,
            max_queue_depth: 64,
        }
    }
}

/// In-memory signal cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Maximum resident entries before oldest-first eviction.
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { max_entries: 10_000 }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub ticker_service_url: String,
    pub internal_api_key: String,
    pub environment: Environment,
    pub model: ModelConfig,
    pub compute: ComputeSettings,
    pub cache: CacheSettings,
    pub maintenance_interval_secs: u64,
}

impl ServiceConfig {
    /// Load configuration from an optional file plus `SIGNAL`-prefixed
    /// environment variables. Fail-fast on missing mandatory keys.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(config::Environment::with_prefix("SIGNAL").separator("__"));
        let source = builder
            .build()
            .map_err(|e| SignalError::configuration(format!("Failed to read configuration: {e}")))?;

        Self::from_source(&source)
    }

    /// Build from an already-assembled config source (used by tests).
    pub fn from_source(source: &config::Config) -> Result<Self> {
        let ticker_service_url: String = require(source, "ticker_service_url")?;
        let internal_api_key: String = require(source, "internal_api_key")?;
        if internal_api_key.trim().is_empty() {
            return Err(SignalError::configuration(
                "internal_api_key must not be empty",
            ));
        }

        let environment = source
            .get_string("environment")
            .ok()
            .map(|s| s.parse::<Environment>())
            .transpose()?
            .unwrap_or(Environment::Production);

        let model = ModelConfig::load(source)?;

        let compute = ComputeSettings {
            pool_size: source.get_int("compute.pool_size").ok().map(|v| v as usize),
            max_queue_depth: source
                .get_int("compute.max_queue_depth")
                .map(|v| v as usize)
                .unwrap_or(ComputeSettings::default().max_queue_depth),
        };
        let cache = CacheSettings {
            max_entries: source
                .get_int("cache.max_entries")
                .map(|v| v as usize)
                .unwrap_or(CacheSettings::default().max_entries),
        };
        let maintenance_interval_secs = source
            .get_int("maintenance_interval_secs")
            .map(|v| v.max(1) as u64)
            .unwrap_or(30);

        Ok(Self {
            ticker_service_url,
            internal_api_key,
            environment,
            model,
            compute,
            cache,
            maintenance_interval_secs,
        })
    }
}

fn require<T>(source: &config::Config, key: &str) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    source
        .get::<T>(key)
        .map_err(|_| SignalError::configuration(format!("{key} not found in config service")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    pub(crate) fn test_params() -> ModelParams {
        ModelParams {
            risk_free_rate: 0.05,
            dividend_yield: 0.0,
            default_volatility: 0.20,
            volatility_min: 0.01,
            volatility_max: 3.0,
        }
    }

    #[test]
    fn test_params_validation() {
        assert!(test_params().validate().is_ok());

        let mut bad_rate = test_params();
        bad_rate.risk_free_rate = 0.75;
        assert!(bad_rate.validate().is_err());

        let mut inverted_bounds = test_params();
        inverted_bounds.volatility_min = 2.0;
        inverted_bounds.volatility_max = 1.0;
        assert!(inverted_bounds.validate().is_err());

        let mut bad_default = test_params();
        bad_default.default_volatility = 0.001;
        assert!(bad_default.validate().is_err());
    }

    #[test]
    fn test_compute_greek_rejects_unknown_greek() {
        let config = ModelConfig::new(PricingModel::BlackScholes, test_params()).unwrap();
        let err = config
            .compute_greek("vanna", 'c', 100.0, 100.0, 0.25, 0.2, None, None)
            .unwrap_err();
        assert_matches!(err, SignalError::UnsupportedModel { .. });
    }

    #[test]
    fn test_compute_greek_vol_out_of_bounds_is_configuration() {
        let config = ModelConfig::new(PricingModel::BlackScholes, test_params()).unwrap();
        let err = config
            .compute_greek("delta", 'c', 100.0, 100.0, 0.25, 5.5, None, None)
            .unwrap_err();
        assert_matches!(err, SignalError::Configuration { .. });
    }

    #[test]
    fn test_compute_greek_flag_mapping() {
        let config = ModelConfig::new(PricingModel::BlackScholes, test_params()).unwrap();
        let call = config
            .compute_greek("delta", 'c', 100.0, 100.0, 0.25, 0.2, None, None)
            .unwrap();
        let put = config
            .compute_greek("delta", 'p', 100.0, 100.0, 0.25, 0.2, None, None)
            .unwrap();
        assert!(call > 0.0 && put < 0.0);
        assert!(config
            .compute_greek("delta", 'x', 100.0, 100.0, 0.25, 0.2, None, None)
            .is_err());
    }

    #[test]
    fn test_dividend_yield_ignored_for_black_scholes() {
        let bs = ModelConfig::new(PricingModel::BlackScholes, test_params()).unwrap();
        let with_yield = bs
            .compute_greek("delta", 'c', 100.0, 100.0, 0.25, 0.2, None, Some(0.10))
            .unwrap();
        let without = bs
            .compute_greek("delta", 'c', 100.0, 100.0, 0.25, 0.2, None, None)
            .unwrap();
        assert!((with_yield - without).abs() < 1e-12);
    }

    #[test]
    fn test_environment_policy() {
        assert!(Environment::Development.allows_engine_fallback());
        assert!(Environment::Test.allows_engine_fallback());
        assert!(!Environment::Production.allows_engine_fallback());
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
    }

    #[test]
    fn test_service_config_requires_mandatory_keys() {
        let source = config::Config::builder()
            .set_override("ticker_service_url", "http://localhost:9000")
            .unwrap()
            .build()
            .unwrap();
        let err = ServiceConfig::from_source(&source).unwrap_err();
        assert_matches!(err, SignalError::Configuration { .. });
    }

    #[test]
    fn test_service_config_loads_complete_source() {
        let source = config::Config::builder()
            .set_override("ticker_service_url", "http://localhost:9000")
            .unwrap()
            .set_override("internal_api_key", "secret")
            .unwrap()
            .set_override("environment", "test")
            .unwrap()
            .set_override("signal_service.options_pricing_model", "black_scholes_merton")
            .unwrap()
            .set_override("signal_service.model_params.risk_free_rate", 0.05)
            .unwrap()
            .set_override("signal_service.model_params.dividend_yield", 0.01)
            .unwrap()
            .set_override("signal_service.model_params.default_volatility", 0.2)
            .unwrap()
            .set_override("signal_service.model_params.volatility_min", 0.01)
            .unwrap()
            .set_override("signal_service.model_params.volatility_max", 3.0)
            .unwrap()
            .build()
            .unwrap();

        let config = ServiceConfig::from_source(&source).unwrap();
        assert_eq!(config.environment, Environment::Test);
        assert_eq!(config.model.model(), PricingModel::BlackScholesMerton);
        assert_eq!(config.cache.max_entries, 10_000);
    }
}
