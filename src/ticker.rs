//! Outbound HTTP client for the ticker service
//!
//! One shared connection-pooled client for every upstream call. Requests
//! authenticate with the internal API key header and carry a 30 second
//! deadline. The client never retries; resilience policy lives with the
//! circuit breakers above it.
//!
//! Status mapping: 404 means empty/absent, 401/403 means bad credentials,
//! anything else non-2xx (and any transport failure) means the service is
//! unavailable.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

use crate::errors::{Result, SignalError};
use crate::timeframe::{SeriesPoint, SignalType};
use crate::types::{Bar, InstrumentKey, OptionType, Price};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const API_KEY_HEADER: &str = "X-Internal-API-Key";

/// One option row from a chain or historical-options response.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOption {
    pub strike: f64,
    pub option_type: OptionType,
    pub expiry: Option<String>,
    pub price: Option<f64>,
    pub iv: Option<f64>,
    pub delta: Option<f64>,
}

impl ChainOption {
    /// Tolerant extraction; rows without a usable strike or option type are
    /// skipped by the caller.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let strike = match obj.get("strike")? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.parse().ok()?,
            _ => return None,
        };
        let option_type = obj
            .get("option_type")
            .or_else(|| obj.get("type"))
            .or_else(|| obj.get("instrument_type"))
            .and_then(Value::as_str)
            .and_then(|s| OptionType::parse(s).ok())?;

        let price = obj
            .get("price")
            .or_else(|| obj.get("ltp"))
            .or_else(|| obj.get("last_price"))
            .and_then(Price::from_value)
            .map(|p| p.value());
        let iv = obj
            .get("iv")
            .or_else(|| obj.get("implied_volatility"))
            .and_then(Value::as_f64);

        Some(Self {
            strike,
            option_type,
            expiry: obj
                .get("expiry")
                .or_else(|| obj.get("expiry_date"))
                .and_then(Value::as_str)
                .map(String::from),
            price,
            iv,
            delta: obj.get("delta").and_then(Value::as_f64),
        })
    }
}

pub struct TickerClient {
    http: reqwest::Client,
    base_url: String,
}

impl TickerClient {
    pub fn new(base_url: &str, internal_api_key: &str) -> Result<Self> {
        let mut api_key = HeaderValue::from_str(internal_api_key)
            .map_err(|_| SignalError::configuration("internal_api_key contains invalid header characters"))?;
        api_key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, api_key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| SignalError::configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Latest traded price for an instrument. `None` when the upstream has
    /// no quote for the key.
    pub async fn latest_price(&self, instrument: &InstrumentKey) -> Result<Option<f64>> {
        let path = format!("/api/v1/latest/{instrument}");
        let Some(body) = self.get_json(&path, &[]).await? else {
            return Ok(None);
        };
        Ok(extract_price(&body))
    }

    /// Current market price for one option.
    pub async fn option_price(
        &self,
        underlying: &str,
        strike: f64,
        expiry: &str,
        option_type: OptionType,
    ) -> Result<Option<f64>> {
        let params = [
            ("underlying", underlying.to_string()),
            ("strike", strike.to_string()),
            ("expiry", expiry.to_string()),
            ("option_type", option_type.as_str().to_string()),
        ];
        let Some(body) = self.get_json("/api/v1/options/price", &params).await? else {
            return Ok(None);
        };
        Ok(extract_price(&body))
    }

    /// Implied volatility for one option, optionally at a historical
    /// timestamp. Upstream may answer `null`.
    pub async fn option_iv(
        &self,
        underlying: &str,
        strike: f64,
        expiry: &str,
        option_type: OptionType,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Option<f64>> {
        let mut params = vec![
            ("underlying", underlying.to_string()),
            ("strike", strike.to_string()),
            ("expiry", expiry.to_string()),
            ("option_type", option_type.as_str().to_string()),
        ];
        if let Some(ts) = timestamp {
            params.push(("timestamp", ts.to_rfc3339()));
        }
        let Some(body) = self.get_json("/api/v1/options/iv", &params).await? else {
            return Ok(None);
        };
        Ok(body
            .get("iv")
            .or_else(|| body.get("implied_volatility"))
            .and_then(Value::as_f64))
    }

    /// Full option chain for an underlying, optionally one expiry.
    pub async fn option_chain(
        &self,
        underlying: &str,
        expiry: Option<&str>,
    ) -> Result<Vec<ChainOption>> {
        let mut params = vec![("underlying", underlying.to_string())];
        if let Some(expiry) = expiry {
            params.push(("expiry", expiry.to_string()));
        }
        let Some(body) = self.get_json("/api/v1/options/chain", &params).await? else {
            return Ok(Vec::new());
        };
        Ok(extract_options(&body))
    }

    /// Historical option rows for an expiry, optionally restricted to a
    /// moneyness level understood by the upstream catalog.
    pub async fn historical_options(
        &self,
        underlying: &str,
        expiry_date: &str,
        timestamp: Option<DateTime<Utc>>,
        moneyness_level: Option<&str>,
    ) -> Result<Vec<ChainOption>> {
        let mut params = vec![
            ("underlying", underlying.to_string()),
            ("expiry_date", expiry_date.to_string()),
        ];
        if let Some(ts) = timestamp {
            params.push(("timestamp", ts.to_rfc3339()));
        }
        if let Some(level) = moneyness_level {
            params.push(("moneyness_level", level.to_string()));
        }
        let Some(body) = self.get_json("/api/v1/options/historical", &params).await? else {
            return Ok(Vec::new());
        };
        Ok(extract_options(&body))
    }

    /// Historical OHLCV bars for a symbol.
    pub async fn historical_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        periods: u32,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>> {
        let minutes = crate::timeframe::Timeframe::parse(timeframe)
            .map(|tf| tf.minutes())
            .unwrap_or(1);
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("timeframe", timeframe.to_string()),
            ("periods", periods.to_string()),
        ];
        if let Some(start) = start {
            params.push(("start_date", start.to_rfc3339()));
        }
        if let Some(end) = end {
            params.push(("end_date", end.to_rfc3339()));
        }
        let Some(body) = self.get_json("/api/v1/historical", &params).await? else {
            return Ok(Vec::new());
        };

        let rows = body
            .get("data")
            .or_else(|| body.get("historical"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(rows.iter().filter_map(|row| bar_from_value(row, minutes)).collect())
    }

    /// 1-minute base series of computed signals for an instrument.
    ///
    /// The moneyness endpoint is not implemented upstream; it surfaces
    /// `ServiceUnavailable` instead of guessing a body.
    pub async fn historical_signals(
        &self,
        instrument: &InstrumentKey,
        signal_type: SignalType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SeriesPoint>> {
        let endpoint = match signal_type {
            SignalType::Greeks => "/api/v1/historical/greeks",
            SignalType::Indicators => "/api/v1/historical/indicators",
            SignalType::MoneynessGreeks => {
                return Err(SignalError::service_unavailable(
                    "Historical moneyness greeks endpoint is not implemented by the ticker service",
                ))
            }
        };
        let params = [
            ("instrument_key", instrument.to_string()),
            ("start_time", start.to_rfc3339()),
            ("end_time", end.to_rfc3339()),
            ("timeframe", "1m".to_string()),
        ];
        let Some(body) = self.get_json(endpoint, &params).await? else {
            return Ok(Vec::new());
        };
        let rows = body
            .get("data_points")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(rows.iter().filter_map(SeriesPoint::from_value).collect())
    }

    async fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<Option<Value>> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "Ticker service request");

        let response = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| {
                error!(%url, error = %e, "Ticker service request failed");
                SignalError::service_unavailable(format!("Ticker service request failed: {e}"))
            })?;

        match response.status() {
            status if status.is_success() => {
                let body = response.json::<Value>().await.map_err(|e| {
                    SignalError::data_access(format!("Invalid JSON from ticker service: {e}"))
                })?;
                Ok(Some(body))
            }
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SignalError::not_authorized(
                "Ticker service rejected internal API key",
            )),
            status => Err(SignalError::service_unavailable(format!(
                "Ticker service returned status {status} for {path}"
            ))),
        }
    }
}

fn extract_price(body: &Value) -> Option<f64> {
    body.get("price")
        .or_else(|| body.get("ltp"))
        .and_then(Price::from_value)
        .map(|p| p.value())
}

fn extract_options(body: &Value) -> Vec<ChainOption> {
    body.get("options")
        .or_else(|| body.get("chain"))
        .and_then(Value::as_array)
        .map(|rows| rows.iter().filter_map(ChainOption::from_value).collect())
        .unwrap_or_default()
}

fn bar_from_value(row: &Value, timeframe_minutes: u32) -> Option<Bar> {
    let point = SeriesPoint::from_value(row)?;
    Some(Bar {
        timestamp: point.timestamp,
        open: point.field("open")?,
        high: point.field("high")?,
        low: point.field("low")?,
        close: point.field("close")?,
        volume: point.field("volume").unwrap_or(0.0),
        oi: point.field("oi"),
        timeframe_minutes,
    })
}
