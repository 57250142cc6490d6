//! Signals Computation Service
//!
//! Turns raw market data from the ticker service into derived signals for
//! derivatives trading:
//! - Vectorized option Greeks over full chains (Black-Scholes family)
//! - Implied volatility solving with bounded fallback behaviour
//! - Moneyness cohort resolution and cross-strike aggregation
//! - Premium/discount analysis with arbitrage-signal classification
//! - Flexible timeframe aggregation (standard and custom) with tiered caching
//! - Circuit breakers and degraded-mode answers on every compute path

pub mod breaker;
pub mod cache;
pub mod config;
pub mod errors;
pub mod greeks;
pub mod historical;
pub mod indicators;
pub mod models;
pub mod moneyness;
pub mod premium;
pub mod service;
pub mod ticker;
pub mod timeframe;
pub mod timeutil;
pub mod types;

pub use breaker::{BreakerClass, BreakerRegistry, BreakerState, CircuitBreaker};
pub use config::{Environment, ModelConfig, ModelParams, ServiceConfig};
pub use errors::{ErrorEnvelope, Result, SignalError};
pub use greeks::{
    ChainResult, ComputeMethod, GreeksEngine, GreeksResult, OptionRequest, SignalEnvelope,
};
pub use historical::{HistoricalDataFacade, RangeAgg};
pub use indicators::{IndicatorCalculator, TechnicalIndicator};
pub use models::{GreekKind, PricingModel};
pub use moneyness::{CohortGreeks, InstrumentCatalog, MoneynessAggregator, MoneynessCohort};
pub use premium::{MispricingSeverity, PremiumAnalyzer, PremiumResult};
pub use service::SignalCore;
pub use ticker::TickerClient;
pub use timeframe::{SeriesPoint, SignalType, Timeframe, TimeframeManager};
pub use types::{Bar, InstrumentKey, OptionType, Price, Tick};
