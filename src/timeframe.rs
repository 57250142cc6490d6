//! Flexible timeframe aggregation
//!
//! Aggregates the 1-minute base series owned by the ticker service into
//! standard and arbitrary custom timeframes (1 minute to 1 day), with a
//! tiered TTL cache keyed by request fingerprint. Buckets are left-closed on
//! UTC; buckets that have not closed yet are excluded from output.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{ttl_for_minutes, CacheEntry, SignalCache};
use crate::errors::{Result, SignalError};
use crate::types::InstrumentKey;

/// Maximum custom timeframe: one day.
pub const MAX_TIMEFRAME_MINUTES: u32 = 1440;

/// Standard timeframe tags, ascending by width.
pub const STANDARD_TIMEFRAMES: [(&str, u32); 7] = [
    ("1m", 1),
    ("5m", 5),
    ("15m", 15),
    ("30m", 30),
    ("1h", 60),
    ("4h", 240),
    ("1d", 1440),
];

/// Supported timeframe kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeframeKind {
    /// One of the seven standard tags
    Standard,
    /// Any custom minute interval
    Custom,
}

/// A parsed timeframe: standard tag or custom minute count in [1, 1440].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeframe {
    kind: TimeframeKind,
    minutes: u32,
}

impl Timeframe {
    /// Parse a timeframe string: standard tags, `"<n>m"` or `"custom_<n>"`.
    pub fn parse(raw: &str) -> Result<Self> {
        if let Some((_, minutes)) = STANDARD_TIMEFRAMES.iter().find(|(tag, _)| *tag == raw) {
            return Ok(Self {
                kind: TimeframeKind::Standard,
                minutes: *minutes,
            });
        }

        let custom = raw
            .strip_suffix('m')
            .or_else(|| raw.strip_prefix("custom_"));
        if let Some(digits) = custom {
            if let Ok(minutes) = digits.parse::<u32>() {
                if (1..=MAX_TIMEFRAME_MINUTES).contains(&minutes) {
                    return Ok(Self {
                        kind: TimeframeKind::Custom,
                        minutes,
                    });
                }
            }
        }

        Err(SignalError::validation(format!("Invalid timeframe: {raw}")))
    }

    pub fn standard(minutes: u32) -> Option<Self> {
        STANDARD_TIMEFRAMES
            .iter()
            .find(|(_, m)| *m == minutes)
            .map(|_| Self {
                kind: TimeframeKind::Standard,
                minutes,
            })
    }

    pub fn custom(minutes: u32) -> Result<Self> {
        if !(1..=MAX_TIMEFRAME_MINUTES).contains(&minutes) {
            return Err(SignalError::validation(format!(
                "Custom timeframe must be between 1 and {MAX_TIMEFRAME_MINUTES} minutes, got {minutes}"
            )));
        }
        Ok(Self {
            kind: TimeframeKind::Custom,
            minutes,
        })
    }

    pub fn kind(&self) -> TimeframeKind {
        self.kind
    }

    pub fn minutes(&self) -> u32 {
        self.minutes
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TimeframeKind::Standard => {
                let tag = STANDARD_TIMEFRAMES
                    .iter()
                    .find(|(_, m)| *m == self.minutes)
                    .map(|(tag, _)| *tag)
                    .unwrap_or("1m");
                f.write_str(tag)
            }
            TimeframeKind::Custom => write!(f, "{}m", self.minutes),
        }
    }
}

impl FromStr for Timeframe {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Signal families served from the 1-minute base store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Greeks,
    Indicators,
    MoneynessGreeks,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeks => "greeks",
            Self::Indicators => "indicators",
            Self::MoneynessGreeks => "moneyness_greeks",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "greeks" => Ok(Self::Greeks),
            "indicators" => Ok(Self::Indicators),
            "moneyness_greeks" => Ok(Self::MoneynessGreeks),
            other => Err(SignalError::validation(format!(
                "Unknown signal type: {other}"
            ))),
        }
    }
}

/// One observation in a signal series: a timestamp plus numeric fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, f64>,
}

impl SeriesPoint {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: f64) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }

    /// Tolerant extraction from upstream JSON: `timestamp` (ISO-8601 string
    /// or epoch seconds) or `date`, plus every numeric field.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let raw_ts = obj.get("timestamp").or_else(|| obj.get("date"))?;
        let timestamp = match raw_ts {
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| crate::timeutil::parse_expiry(s).ok())?,
            Value::Number(n) => Utc.timestamp_opt(n.as_i64()?, 0).single()?,
            _ => return None,
        };

        let mut fields = BTreeMap::new();
        for (key, val) in obj {
            if key == "timestamp" || key == "date" {
                continue;
            }
            if let Some(num) = val.as_f64() {
                fields.insert(key.clone(), num);
            }
        }
        Some(Self { timestamp, fields })
    }
}

impl<'de> Deserialize<'de> for SeriesPoint {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        SeriesPoint::from_value(&raw)
            .ok_or_else(|| serde::de::Error::custom("series point requires a timestamp"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggRule {
    Mean,
    Max,
    Min,
    Sum,
    First,
    Last,
}

fn rule_for_field(name: &str) -> AggRule {
    match name {
        "open" => AggRule::First,
        "close" => AggRule::Last,
        "high" | "ask" => AggRule::Max,
        "low" | "bid" => AggRule::Min,
        "volume" | "trades" => AggRule::Sum,
        "price" | "delta" | "gamma" | "theta" | "vega" | "rho" => AggRule::Mean,
        _ => AggRule::Mean,
    }
}

/// Resample a 1-minute base series into `minutes`-wide, left-closed UTC
/// buckets. Buckets whose end lies beyond `now` are not yet closed and are
/// excluded. An optional `fields` filter restricts the aggregated columns.
pub fn aggregate_series(
    base: &[SeriesPoint],
    minutes: u32,
    fields: Option<&[String]>,
    now: DateTime<Utc>,
) -> Vec<SeriesPoint> {
    if base.is_empty() {
        return Vec::new();
    }

    let bucket_secs = i64::from(minutes) * 60;
    let mut sorted: Vec<&SeriesPoint> = base.iter().collect();
    sorted.sort_by_key(|p| p.timestamp);

    let mut buckets: BTreeMap<i64, Vec<&SeriesPoint>> = BTreeMap::new();
    for point in sorted {
        let bucket = point.timestamp.timestamp().div_euclid(bucket_secs) * bucket_secs;
        buckets.entry(bucket).or_default().push(point);
    }

    let mut out = Vec::with_capacity(buckets.len());
    for (bucket_start, points) in buckets {
        if bucket_start + bucket_secs > now.timestamp() {
            continue;
        }
        let Some(timestamp) = Utc.timestamp_opt(bucket_start, 0).single() else {
            continue;
        };

        let mut names: BTreeSet<&str> = BTreeSet::new();
        for point in &points {
            names.extend(point.fields.keys().map(String::as_str));
        }
        names.remove("timeframe_minutes");

        let mut aggregated = BTreeMap::new();
        for name in names {
            if let Some(value) = reduce(&points, name) {
                aggregated.insert(name.to_string(), value);
            }
        }

        // Signal series carry a single `value` column; synthesize the
        // open/close of the bucket from its first and last observations.
        if aggregated.contains_key("value") {
            if !aggregated.contains_key("open") {
                if let Some(first) = points.iter().find_map(|p| p.field("value")) {
                    aggregated.insert("open".to_string(), first);
                }
            }
            if !aggregated.contains_key("close") {
                if let Some(last) = points.iter().rev().find_map(|p| p.field("value")) {
                    aggregated.insert("close".to_string(), last);
                }
            }
        }

        if let Some(filter) = fields {
            aggregated.retain(|name, _| filter.iter().any(|f| f == name));
        }
        aggregated.insert("timeframe_minutes".to_string(), f64::from(minutes));

        out.push(SeriesPoint {
            timestamp,
            fields: aggregated,
        });
    }
    out
}

fn reduce(points: &[&SeriesPoint], name: &str) -> Option<f64> {
    let values = || points.iter().filter_map(|p| p.field(name));
    match rule_for_field(name) {
        AggRule::First => values().next(),
        AggRule::Last => values().last(),
        AggRule::Max => values().fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.max(v)))
        }),
        AggRule::Min => values().fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.min(v)))
        }),
        AggRule::Sum => {
            let mut any = false;
            let total: f64 = values().inspect(|_| any = true).sum();
            any.then_some(total)
        }
        AggRule::Mean => {
            let (count, total) = values().fold((0usize, 0.0), |(c, t), v| (c + 1, t + v));
            (count > 0).then(|| total / count as f64)
        }
    }
}

/// Provider of the 1-minute base series (the historical data facade).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BaseSeriesSource: Send + Sync {
    async fn base_series(
        &self,
        instrument: &InstrumentKey,
        signal_type: SignalType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SeriesPoint>>;
}

/// On-demand aggregation of base series to any timeframe, with the tiered
/// TTL cache in front.
pub struct TimeframeManager {
    source: Arc<dyn BaseSeriesSource>,
    cache: Arc<dyn SignalCache>,
    custom_seen: DashMap<(String, SignalType), BTreeSet<u32>>,
}

impl TimeframeManager {
    pub fn new(source: Arc<dyn BaseSeriesSource>, cache: Arc<dyn SignalCache>) -> Self {
        Self {
            source,
            cache,
            custom_seen: DashMap::new(),
        }
    }

    /// Aggregated signal series for the given range. Cache lookup happens
    /// before the upstream fetch, which happens before the cache fill; a
    /// failing cache degrades to a plain fetch.
    pub async fn get(
        &self,
        instrument: &InstrumentKey,
        signal_type: SignalType,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        fields: Option<&[String]>,
    ) -> Result<Vec<SeriesPoint>> {
        let fingerprint = fingerprint(instrument, signal_type, timeframe, start, end, fields);

        match self.cache.get(&fingerprint).await {
            Ok(Some(entry)) => {
                debug!(%fingerprint, "Timeframe cache hit");
                return Ok(entry.payload);
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "Cache retrieval error"),
        }

        let base = self
            .source
            .base_series(instrument, signal_type, start, end)
            .await?;
        if base.is_empty() {
            return Ok(Vec::new());
        }

        let aggregated = aggregate_series(&base, timeframe.minutes(), fields, Utc::now());

        let ttl = ttl_for_minutes(timeframe.minutes());
        if let Err(err) = self
            .cache
            .put(CacheEntry::new(fingerprint.as_str(), aggregated.clone(), ttl))
            .await
        {
            warn!(error = %err, "Cache storage error");
        }

        if timeframe.kind() == TimeframeKind::Custom {
            self.custom_seen
                .entry((instrument.to_string(), signal_type))
                .or_default()
                .insert(timeframe.minutes());
        }

        Ok(aggregated)
    }

    /// Available timeframe tags: the seven standard tags plus custom tags
    /// served for this instrument and signal type, ascending by minutes.
    pub fn list_timeframes(&self, instrument: &InstrumentKey, signal_type: SignalType) -> Vec<String> {
        let mut tagged: Vec<(u32, String)> = STANDARD_TIMEFRAMES
            .iter()
            .map(|(tag, minutes)| (*minutes, (*tag).to_string()))
            .collect();

        if let Some(customs) = self
            .custom_seen
            .get(&(instrument.to_string(), signal_type))
        {
            for minutes in customs.iter() {
                if !STANDARD_TIMEFRAMES.iter().any(|(_, m)| m == minutes) {
                    tagged.push((*minutes, format!("{minutes}m")));
                }
            }
        }

        tagged.sort_by_key(|(minutes, _)| *minutes);
        tagged.into_iter().map(|(_, tag)| tag).collect()
    }
}

fn fingerprint(
    instrument: &InstrumentKey,
    signal_type: SignalType,
    timeframe: Timeframe,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    fields: Option<&[String]>,
) -> String {
    let fields_part = fields.map_or_else(|| "*".to_string(), |f| f.join(","));
    format!(
        "signal:timeframe:{instrument}:{signal_type}:{timeframe}:{}:{}:{fields_part}",
        start.timestamp(),
        end.timestamp()
    )
}
