//! Market data values: prices, ticks and OHLCV bars
//!
//! Tick feeds emit `ltp` either as a bare scalar or as `{value, currency}`.
//! Internally every monetary amount is tagged; cross-currency arithmetic
//! converts to a common unit first.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::errors::{Result, SignalError};
use crate::types::instrument::InstrumentKey;

/// A price observation: bare scalar or currency-tagged money.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Price {
    Scalar(f64),
    Money { value: f64, currency: String },
}

impl Price {
    /// Tolerant extraction from feed JSON: number, numeric string, or
    /// `{value, currency}` object.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(Price::Scalar),
            Value::String(s) => s.trim().parse::<f64>().ok().map(Price::Scalar),
            Value::Object(map) => {
                let amount = map.get("value").and_then(Value::as_f64)?;
                let currency = map.get("currency").and_then(Value::as_str)?;
                Some(Price::Money {
                    value: amount,
                    currency: currency.to_string(),
                })
            }
            _ => None,
        }
    }

    pub fn value(&self) -> f64 {
        match self {
            Self::Scalar(v) => *v,
            Self::Money { value, .. } => *value,
        }
    }

    pub fn currency(&self) -> Option<&str> {
        match self {
            Self::Scalar(_) => None,
            Self::Money { currency, .. } => Some(currency),
        }
    }

    /// Amount expressed in `target` currency. Scalars are assumed to already
    /// be in the target unit.
    pub fn value_in(&self, target: &str) -> f64 {
        match self {
            Self::Scalar(v) => *v,
            Self::Money { value, currency } => convert_currency(*value, currency, target),
        }
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        Price::from_value(&raw).ok_or_else(|| {
            serde::de::Error::custom("price must be a number or a {value, currency} object")
        })
    }
}

fn direct_rate(from: &str, to: &str) -> Option<f64> {
    match (from, to) {
        ("USD", "INR") => Some(83.50),
        ("INR", "USD") => Some(0.01197),
        ("EUR", "USD") => Some(1.08),
        ("USD", "EUR") => Some(0.926),
        ("GBP", "USD") => Some(1.27),
        ("USD", "GBP") => Some(0.787),
        ("USDT", "USD") | ("USD", "USDT") => Some(1.0),
        ("BTC", "USD") => Some(45_000.0),
        ("USD", "BTC") => Some(0.000022),
        ("ETH", "USD") => Some(2_500.0),
        ("USD", "ETH") => Some(0.0004),
        _ => None,
    }
}

/// Convert an amount between currencies using the static rate table.
/// Unknown pairs are routed through USD when possible; otherwise the amount
/// passes through unchanged with a warning. Production deployments should
/// replace the static table with a live rate source.
pub fn convert_currency(amount: f64, from: &str, to: &str) -> f64 {
    if from == to {
        return amount;
    }
    if let Some(rate) = direct_rate(from, to) {
        return amount * rate;
    }
    if from != "USD" && to != "USD" {
        if let (Some(to_usd), Some(from_usd)) = (direct_rate(from, "USD"), direct_rate("USD", to)) {
            return amount * to_usd * from_usd;
        }
    }
    warn!(from, to, "No conversion rate found, using 1.0");
    amount
}

/// One validated market observation.
#[derive(Debug, Clone, Serialize)]
pub struct Tick {
    pub instrument: InstrumentKey,
    pub asset_class: Option<String>,
    pub ltp: Price,
    pub bid: Option<Price>,
    pub ask: Option<Price>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub oi: Option<f64>,
    pub change: Option<f64>,
    pub change_pct: Option<f64>,
    pub exchange_timestamp: DateTime<Utc>,
    pub exchange_tz: String,
}

impl Tick {
    /// Parse and validate an inbound tick envelope. Required fields:
    /// `ik`, `ltp`, `ts_exch`, `tz`; `tz` must be a known IANA zone and
    /// `ts_exch` ISO-8601.
    pub fn from_envelope(envelope: &Value) -> Result<Self> {
        let obj = envelope
            .as_object()
            .ok_or_else(|| SignalError::validation("Tick envelope must be an object"))?;

        for field in ["ik", "ltp", "ts_exch", "tz"] {
            if !obj.contains_key(field) {
                return Err(SignalError::validation(format!(
                    "Missing required field: {field}"
                )));
            }
        }

        let instrument = InstrumentKey::parse(
            obj.get("ik")
                .and_then(Value::as_str)
                .ok_or_else(|| SignalError::validation("Field 'ik' must be a string"))?,
        )?;

        let ltp = Price::from_value(&obj["ltp"]).ok_or_else(|| {
            SignalError::validation("Invalid LTP format: must be numeric or {value, currency}")
        })?;

        let tz = obj["tz"]
            .as_str()
            .ok_or_else(|| SignalError::validation("Field 'tz' must be a string"))?;
        if chrono_tz::Tz::from_str(tz).is_err() {
            return Err(SignalError::validation(format!("Invalid timezone: {tz}")));
        }

        let ts_exch = obj["ts_exch"]
            .as_str()
            .ok_or_else(|| SignalError::validation("Field 'ts_exch' must be a string"))?;
        let exchange_timestamp = DateTime::parse_from_rfc3339(ts_exch)
            .map_err(|_| {
                SignalError::validation(format!("Invalid exchange timestamp format: {ts_exch}"))
            })?
            .with_timezone(&Utc);

        let number = |key: &str| obj.get(key).and_then(Value::as_f64);
        let price_field = |key: &str| obj.get(key).and_then(Price::from_value);

        Ok(Self {
            instrument,
            asset_class: obj.get("ac").and_then(Value::as_str).map(String::from),
            ltp,
            bid: price_field("bid"),
            ask: price_field("ask"),
            open: number("o"),
            high: number("h"),
            low: number("l"),
            close: number("c"),
            volume: number("v"),
            oi: number("oi"),
            change: number("chg"),
            change_pct: number("chgp"),
            exchange_timestamp,
            exchange_tz: tz.to_string(),
        })
    }
}

/// Closed OHLCV interval `[timestamp, timestamp + timeframe_minutes)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bucket start, aligned to the timeframe boundary on UTC.
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oi: Option<f64>,
    pub timeframe_minutes: u32,
}

impl Bar {
    /// Check the structural invariants declared for OHLCV bars.
    pub fn validate(&self) -> Result<()> {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if self.low > body_low || self.high < body_high {
            return Err(SignalError::validation(format!(
                "Bar violates low <= open,close <= high: o={} h={} l={} c={}",
                self.open, self.high, self.low, self.close
            )));
        }
        if self.volume < 0.0 {
            return Err(SignalError::validation(format!(
                "Bar volume must be non-negative, got {}",
                self.volume
            )));
        }
        let bucket_secs = i64::from(self.timeframe_minutes) * 60;
        if bucket_secs > 0 && self.timestamp.timestamp().rem_euclid(bucket_secs) != 0 {
            return Err(SignalError::validation(format!(
                "Bar timestamp {} is not aligned to a {}m boundary",
                self.timestamp, self.timeframe_minutes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    #[test]
    fn test_price_from_scalar_and_object() {
        assert_eq!(Price::from_value(&json!(101.5)), Some(Price::Scalar(101.5)));
        assert_eq!(Price::from_value(&json!("99.25")), Some(Price::Scalar(99.25)));
        assert_eq!(
            Price::from_value(&json!({"value": 75.0, "currency": "INR"})),
            Some(Price::Money {
                value: 75.0,
                currency: "INR".to_string()
            })
        );
        assert_eq!(Price::from_value(&json!({"currency": "INR"})), None);
        assert_eq!(Price::from_value(&json!([1.0])), None);
    }

    #[test]
    fn test_currency_conversion_known_pair() {
        assert_relative_eq!(convert_currency(10.0, "USD", "INR"), 835.0);
        assert_relative_eq!(convert_currency(5.0, "USD", "USD"), 5.0);
    }

    #[test]
    fn test_currency_conversion_via_usd() {
        // INR -> EUR has no direct entry; routed through USD.
        let got = convert_currency(100.0, "INR", "EUR");
        assert_relative_eq!(got, 100.0 * 0.01197 * 0.926, epsilon = 1e-9);
    }

    #[test]
    fn test_currency_conversion_unknown_pair_passes_through() {
        assert_relative_eq!(convert_currency(42.0, "ZAR", "KRW"), 42.0);
    }

    fn sample_envelope() -> Value {
        json!({
            "ik": "NSE@NIFTY@OPT@2026-08-27@CALL@21500",
            "ac": "derivative",
            "ltp": {"value": 152.35, "currency": "INR"},
            "bid": 152.30,
            "ask": 152.40,
            "v": 125000.0,
            "oi": 98000.0,
            "ts_exch": "2026-08-01T10:15:00+05:30",
            "tz": "Asia/Kolkata"
        })
    }

    #[test]
    fn test_tick_envelope_parses() {
        let tick = Tick::from_envelope(&sample_envelope()).unwrap();
        assert_eq!(tick.instrument.symbol, "NIFTY");
        assert_relative_eq!(tick.ltp.value(), 152.35);
        assert_eq!(tick.ltp.currency(), Some("INR"));
        assert_eq!(tick.exchange_tz, "Asia/Kolkata");
    }

    #[test]
    fn test_tick_envelope_missing_field() {
        let mut envelope = sample_envelope();
        envelope.as_object_mut().unwrap().remove("tz");
        let err = Tick::from_envelope(&envelope).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_tick_envelope_bad_timezone() {
        let mut envelope = sample_envelope();
        envelope["tz"] = json!("Mars/Olympus");
        assert!(Tick::from_envelope(&envelope).is_err());
    }

    #[test]
    fn test_tick_envelope_legacy_key_rewritten() {
        let mut envelope = sample_envelope();
        envelope["ik"] = json!("NSE:RELIANCE");
        let tick = Tick::from_envelope(&envelope).unwrap();
        assert_eq!(tick.instrument.to_string(), "NSE@RELIANCE@EQ");
    }

    #[test]
    fn test_bar_invariants() {
        let bar = Bar {
            timestamp: DateTime::parse_from_rfc3339("2026-08-01T10:15:00Z")
                .unwrap()
                .with_timezone(&Utc),
            open: 100.0,
            high: 102.0,
            low: 99.0,
            close: 101.5,
            volume: 1500.0,
            oi: None,
            timeframe_minutes: 5,
        };
        assert!(bar.validate().is_ok());

        let mut bad = bar.clone();
        bad.high = 100.5;
        assert!(bad.validate().is_err());

        let mut misaligned = bar.clone();
        misaligned.timestamp += chrono::Duration::minutes(2);
        assert!(misaligned.validate().is_err());

        let mut negative = bar;
        negative.volume = -1.0;
        assert!(negative.validate().is_err());
    }
}
