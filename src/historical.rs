//! Historical data facade
//!
//! Single inward-facing interface for historical lookups, so no component
//! talks to the ticker service directly. Concurrent callers with an equal
//! request fingerprint are coalesced onto one in-flight upstream request
//! and share its response.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::errors::{Result, SignalError};
use crate::moneyness::MoneynessCohort;
use crate::ticker::TickerClient;
use crate::timeframe::{BaseSeriesSource, SeriesPoint, SignalType, Timeframe};
use crate::types::{Bar, InstrumentKey};

/// Reduction applied by [`HistoricalDataFacade::price_range`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeAgg {
    Min,
    Max,
    Mean,
    First,
    Last,
}

impl FromStr for RangeAgg {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "mean" | "avg" => Ok(Self::Mean),
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            other => Err(SignalError::validation(format!(
                "Unknown range aggregation: {other}"
            ))),
        }
    }
}

pub struct HistoricalDataFacade {
    ticker: Arc<TickerClient>,
    inflight: DashMap<String, Arc<OnceCell<Value>>>,
}

impl HistoricalDataFacade {
    pub fn new(ticker: Arc<TickerClient>) -> Self {
        Self {
            ticker,
            inflight: DashMap::new(),
        }
    }

    /// Aggregatable OHLCV bars for an instrument over a closed range.
    pub async fn timeframe_series(
        &self,
        instrument: &InstrumentKey,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        validate_range(start, end)?;
        let fingerprint = format!(
            "bars:{instrument}:{timeframe}:{}:{}",
            start.timestamp(),
            end.timestamp()
        );
        let periods = periods_in_range(start, end, timeframe);
        let symbol = instrument.to_string();
        let tag = timeframe.to_string();
        let value = self
            .deduped(fingerprint, || async move {
                let bars = self
                    .ticker
                    .historical_bars(&symbol, &tag, periods, Some(start), Some(end))
                    .await?;
                encode(&bars)
            })
            .await?;
        decode(&value)
    }

    /// Historical series for a moneyness cohort. Surfaces the upstream
    /// limitation instead of fabricating a body.
    pub async fn moneyness_series(
        &self,
        underlying: &InstrumentKey,
        _cohort: MoneynessCohort,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        _timeframe: Timeframe,
    ) -> Result<Vec<SeriesPoint>> {
        validate_range(start, end)?;
        self.ticker
            .historical_signals(underlying, SignalType::MoneynessGreeks, start, end)
            .await
    }

    /// One reduced price over a range of 1-minute closes.
    pub async fn price_range(
        &self,
        underlying: &InstrumentKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        agg: RangeAgg,
    ) -> Result<Option<f64>> {
        let one_minute = Timeframe::parse("1m")?;
        let bars = self.timeframe_series(underlying, one_minute, start, end).await?;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        Ok(reduce_closes(&closes, agg))
    }

    /// Point-in-time spot lookup is not supported by the upstream contract.
    /// This always fails; callers needing a value must use `price_range`.
    pub async fn historical_spot_price(
        &self,
        underlying: &InstrumentKey,
        _at: DateTime<Utc>,
    ) -> Result<f64> {
        Err(SignalError::data_access(format!(
            "Historical spot price lookup is not supported for {underlying}: the ticker \
             service exposes no point-in-time spot endpoint. Use price_range over an interval."
        )))
    }

    /// Coalesce concurrent equal-fingerprint fetches onto one upstream
    /// request; all callers share the produced response.
    async fn deduped<F, Fut>(&self, fingerprint: String, fetch: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let cell = self
            .inflight
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell.get_or_try_init(fetch).await.cloned();
        // Completed (or failed) requests are no longer in flight.
        self.inflight
            .remove_if(&fingerprint, |_, existing| Arc::ptr_eq(existing, &cell));
        if result.is_ok() {
            debug!(%fingerprint, "Historical fetch completed");
        }
        result
    }
}

#[async_trait]
impl BaseSeriesSource for HistoricalDataFacade {
    async fn base_series(
        &self,
        instrument: &InstrumentKey,
        signal_type: SignalType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SeriesPoint>> {
        validate_range(start, end)?;
        let fingerprint = format!(
            "base:{instrument}:{signal_type}:{}:{}",
            start.timestamp(),
            end.timestamp()
        );
        let value = self
            .deduped(fingerprint, || async move {
                let series = self
                    .ticker
                    .historical_signals(instrument, signal_type, start, end)
                    .await?;
                encode(&series)
            })
            .await?;
        decode(&value)
    }
}

fn validate_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if start >= end {
        return Err(SignalError::validation(format!(
            "Invalid time range: start {start} is not before end {end}"
        )));
    }
    Ok(())
}

fn periods_in_range(start: DateTime<Utc>, end: DateTime<Utc>, timeframe: Timeframe) -> u32 {
    let minutes = (end - start).num_minutes().max(1) as u64;
    let width = u64::from(timeframe.minutes());
    (minutes.div_ceil(width)).min(u32::MAX as u64) as u32
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| SignalError::data_access(format!("Failed to encode payload: {e}")))
}

fn decode<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| SignalError::data_access(format!("Failed to decode payload: {e}")))
}

fn reduce_closes(closes: &[f64], agg: RangeAgg) -> Option<f64> {
    if closes.is_empty() {
        return None;
    }
    match agg {
        RangeAgg::Min => closes.iter().copied().reduce(f64::min),
        RangeAgg::Max => closes.iter().copied().reduce(f64::max),
        RangeAgg::Mean => Some(closes.iter().sum::<f64>() / closes.len() as f64),
        RangeAgg::First => closes.first().copied(),
        RangeAgg::Last => closes.last().copied(),
    }
}
