//! Service core wiring and lifecycle
//!
//! Builds every subsystem once at startup with an explicit init/shutdown
//! lifecycle: config and model are immutable after load, the breaker
//! registry and compute pool are shared, and a single background task per
//! process performs cache eviction and breaker window compaction.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::breaker::BreakerRegistry;
use crate::cache::{MemoryCache, SignalCache};
use crate::config::{ModelConfig, ServiceConfig};
use crate::errors::{Result, SignalError};
use crate::greeks::{ComputePool, GreeksEngine};
use crate::historical::HistoricalDataFacade;
use crate::indicators::IndicatorCalculator;
use crate::moneyness::{MoneynessAggregator, TickerCatalog};
use crate::premium::PremiumAnalyzer;
use crate::ticker::TickerClient;
use crate::timeframe::{BaseSeriesSource, TimeframeManager};

/// Startup health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub environment: String,
    pub model: String,
    pub breaker_classes: usize,
    pub ticker_base_url: String,
}

/// Process-scope service state. No persisted state: restart discards all
/// caches and breaker counters.
pub struct SignalCore {
    config: ServiceConfig,
    model: Arc<ModelConfig>,
    breakers: Arc<BreakerRegistry>,
    pool: Arc<ComputePool>,
    ticker: Arc<TickerClient>,
    facade: Arc<HistoricalDataFacade>,
    cache: Arc<MemoryCache>,
    timeframes: Arc<TimeframeManager>,
    engine: Arc<GreeksEngine>,
    moneyness: Arc<MoneynessAggregator>,
    premium: Arc<PremiumAnalyzer>,
    indicators: Arc<IndicatorCalculator>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl SignalCore {
    /// Build the full subsystem graph. Fail-fast: an unusable ticker URL or
    /// invalid model configuration aborts startup.
    pub fn init(config: ServiceConfig) -> Result<Arc<Self>> {
        reqwest::Url::parse(&config.ticker_service_url).map_err(|e| {
            SignalError::configuration(format!(
                "Invalid ticker_service_url '{}': {e}",
                config.ticker_service_url
            ))
        })?;

        let model = Arc::new(config.model.clone());
        let breakers = Arc::new(BreakerRegistry::new());
        let pool = Arc::new(ComputePool::new(&config.compute));
        let ticker = Arc::new(TickerClient::new(
            &config.ticker_service_url,
            &config.internal_api_key,
        )?);
        let facade = Arc::new(HistoricalDataFacade::new(Arc::clone(&ticker)));
        let cache = Arc::new(MemoryCache::new(config.cache.max_entries));

        let source: Arc<dyn BaseSeriesSource> = facade.clone();
        let cache_handle: Arc<dyn SignalCache> = cache.clone();
        let timeframes = Arc::new(TimeframeManager::new(source, cache_handle));

        let engine = Arc::new(GreeksEngine::new(
            Arc::clone(&model),
            Arc::clone(&pool),
            Arc::clone(&breakers),
            config.environment,
        ));
        let moneyness = Arc::new(MoneynessAggregator::new(
            Arc::new(TickerCatalog::new(Arc::clone(&ticker))),
            Arc::clone(&engine),
        ));
        let premium = Arc::new(PremiumAnalyzer::new(
            Arc::clone(&engine),
            Arc::clone(&model),
            Arc::clone(&pool),
        ));
        let indicators = Arc::new(IndicatorCalculator::new(Arc::clone(&facade)));

        let (shutdown, _) = watch::channel(false);
        let core = Arc::new(Self {
            config,
            model,
            breakers,
            pool,
            ticker,
            facade,
            cache,
            timeframes,
            engine,
            moneyness,
            premium,
            indicators,
            maintenance: Mutex::new(None),
            shutdown,
        });
        info!(
            environment = %core.config.environment,
            model = %core.model.model(),
            "Signal service core initialized"
        );
        Ok(core)
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            environment: self.config.environment.to_string(),
            model: self.model.model().to_string(),
            breaker_classes: self.breakers.all_metrics().len(),
            ticker_base_url: self.ticker.base_url().to_string(),
        }
    }

    /// Start the per-process maintenance task: TTL eviction for the signal
    /// cache and rolling-window compaction for the breakers.
    pub fn start_maintenance(self: &Arc<Self>) {
        let mut slot = self.maintenance.lock();
        if slot.is_some() {
            return;
        }

        let core = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let interval = Duration::from_secs(self.config.maintenance_interval_secs);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = core.cache.evict_expired();
                        core.breakers.compact_all();
                        debug!(evicted, "Maintenance sweep completed");
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Maintenance task stopped");
        });
        *slot = Some(handle);
    }

    /// Stop the maintenance task. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.maintenance.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("Signal service core shut down");
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<GreeksEngine> {
        &self.engine
    }

    pub fn timeframes(&self) -> &Arc<TimeframeManager> {
        &self.timeframes
    }

    pub fn moneyness(&self) -> &Arc<MoneynessAggregator> {
        &self.moneyness
    }

    pub fn premium(&self) -> &Arc<PremiumAnalyzer> {
        &self.premium
    }

    pub fn indicators(&self) -> &Arc<IndicatorCalculator> {
        &self.indicators
    }

    pub fn historical(&self) -> &Arc<HistoricalDataFacade> {
        &self.facade
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn ticker(&self) -> &Arc<TickerClient> {
        &self.ticker
    }

    pub fn compute_pool(&self) -> &Arc<ComputePool> {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ServiceConfig {
        let source = config::Config::builder()
            .set_override("ticker_service_url", "http://127.0.0.1:9000")
            .unwrap()
            .set_override("internal_api_key", "test-key")
            .unwrap()
            .set_override("environment", "test")
            .unwrap()
            .set_override("signal_service.options_pricing_model", "black_scholes")
            .unwrap()
            .set_override("signal_service.model_params.risk_free_rate", 0.05)
            .unwrap()
            .set_override("signal_service.model_params.dividend_yield", 0.0)
            .unwrap()
            .set_override("signal_service.model_params.default_volatility", 0.2)
            .unwrap()
            .set_override("signal_service.model_params.volatility_min", 0.01)
            .unwrap()
            .set_override("signal_service.model_params.volatility_max", 3.0)
            .unwrap()
            .set_override("maintenance_interval_secs", 1)
            .unwrap()
            .build()
            .unwrap();
        ServiceConfig::from_source(&source).unwrap()
    }

    #[tokio::test]
    async fn test_init_and_health() {
        let core = SignalCore::init(test_config()).unwrap();
        let health = core.health();
        assert!(health.healthy);
        assert_eq!(health.breaker_classes, 4);
        assert_eq!(health.model, "black_scholes");
    }

    #[tokio::test]
    async fn test_init_rejects_bad_ticker_url() {
        let mut config = test_config();
        config.ticker_service_url = "not a url".to_string();
        assert!(SignalCore::init(config).is_err());
    }

    #[tokio::test]
    async fn test_maintenance_start_and_shutdown() {
        let core = SignalCore::init(test_config()).unwrap();
        core.start_maintenance();
        // Second start is a no-op.
        core.start_maintenance();
        tokio::time::sleep(Duration::from_millis(50)).await;
        core.shutdown().await;
    }
}
