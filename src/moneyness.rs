//! Moneyness cohort resolution and cross-strike aggregation
//!
//! A cohort is a symbolic group of options (ATM, OTM5delta, ...) resolved
//! against a concrete `(underlying, expiry)` into strikes via the instrument
//! catalog, then priced through the Greeks engine and summarised per side.
//! Missing market data yields an empty result with a reason, never an error.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{Result, SignalError};
use crate::greeks::{GreeksEngine, GreeksResult, OptionRequest};
use crate::models::GreekKind;
use crate::ticker::TickerClient;
use crate::timeutil::parse_expiry;
use crate::types::OptionType;

/// Relative band around spot that counts as at-the-money.
const ATM_BAND: f64 = 0.01;
/// Relative distance from spot that counts as deep in/out of the money.
const DEEP_BAND: f64 = 0.05;
/// Tolerance around the delta target for OTM-delta cohorts.
const DELTA_TOLERANCE: f64 = 0.02;

/// Symbolic moneyness levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MoneynessCohort {
    #[serde(rename = "DITM")]
    DeepItm,
    #[serde(rename = "ITM")]
    Itm,
    #[serde(rename = "ATM")]
    Atm,
    #[serde(rename = "OTM")]
    Otm,
    #[serde(rename = "DOTM")]
    DeepOtm,
    #[serde(rename = "OTM5delta")]
    OtmDelta5,
    #[serde(rename = "OTM10delta")]
    OtmDelta10,
    #[serde(rename = "OTM25delta")]
    OtmDelta25,
}

impl MoneynessCohort {
    pub const ALL: [MoneynessCohort; 8] = [
        MoneynessCohort::DeepItm,
        MoneynessCohort::Itm,
        MoneynessCohort::Atm,
        MoneynessCohort::Otm,
        MoneynessCohort::DeepOtm,
        MoneynessCohort::OtmDelta5,
        MoneynessCohort::OtmDelta10,
        MoneynessCohort::OtmDelta25,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeepItm => "DITM",
            Self::Itm => "ITM",
            Self::Atm => "ATM",
            Self::Otm => "OTM",
            Self::DeepOtm => "DOTM",
            Self::OtmDelta5 => "OTM5delta",
            Self::OtmDelta10 => "OTM10delta",
            Self::OtmDelta25 => "OTM25delta",
        }
    }

    /// Absolute delta target for delta-matched cohorts.
    pub fn delta_target(&self) -> Option<f64> {
        match self {
            Self::OtmDelta5 => Some(0.05),
            Self::OtmDelta10 => Some(0.10),
            Self::OtmDelta25 => Some(0.25),
            _ => None,
        }
    }
}

impl FromStr for MoneynessCohort {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| SignalError::validation(format!("Unknown moneyness level: {s}")))
    }
}

impl fmt::Display for MoneynessCohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One catalog member of a resolved cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogOption {
    pub strike: f64,
    pub option_type: OptionType,
    pub expiry: Option<String>,
    pub market_price: Option<f64>,
    pub volatility: Option<f64>,
}

/// Instrument-catalog collaborator: resolves a cohort to concrete options.
/// For delta cohorts the catalog returns OTM candidates; the aggregator
/// filters on delta after pricing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstrumentCatalog: Send + Sync {
    async fn strikes_by_moneyness<'a>(
        &self,
        underlying: &'a str,
        expiry: Option<&'a str>,
        cohort: MoneynessCohort,
        spot: f64,
    ) -> Result<Vec<CatalogOption>>;
}

/// Catalog implementation backed by the ticker service.
pub struct TickerCatalog {
    ticker: Arc<TickerClient>,
}

impl TickerCatalog {
    pub fn new(ticker: Arc<TickerClient>) -> Self {
        Self { ticker }
    }
}

#[async_trait]
impl InstrumentCatalog for TickerCatalog {
    async fn strikes_by_moneyness<'a>(
        &self,
        underlying: &'a str,
        expiry: Option<&'a str>,
        cohort: MoneynessCohort,
        spot: f64,
    ) -> Result<Vec<CatalogOption>> {
        let rows = match expiry {
            // The historical catalog understands moneyness levels natively.
            Some(expiry_date) => {
                self.ticker
                    .historical_options(underlying, expiry_date, None, Some(cohort.as_str()))
                    .await?
            }
            None => self.ticker.option_chain(underlying, None).await?,
        };

        let options = rows.into_iter().map(|row| CatalogOption {
            strike: row.strike,
            option_type: row.option_type,
            expiry: row.expiry,
            market_price: row.price,
            volatility: row.iv,
        });

        // Chain responses are unclassified; keep only members of the cohort.
        if expiry.is_none() {
            Ok(options
                .filter(|o| cohort_matches(cohort, o.strike, o.option_type, spot))
                .collect())
        } else {
            Ok(options.collect())
        }
    }
}

/// Local moneyness classification for unclassified chain rows. Delta
/// cohorts select the OTM side; the precise match happens after pricing.
fn cohort_matches(cohort: MoneynessCohort, strike: f64, option_type: OptionType, spot: f64) -> bool {
    if spot <= 0.0 {
        return false;
    }
    let distance = (strike - spot) / spot;
    // Positive when the option is out of the money.
    let otm_distance = match option_type {
        OptionType::Call => distance,
        OptionType::Put => -distance,
    };
    match cohort {
        MoneynessCohort::Atm => distance.abs() <= ATM_BAND,
        MoneynessCohort::Itm => otm_distance < -ATM_BAND && otm_distance >= -DEEP_BAND,
        MoneynessCohort::DeepItm => otm_distance < -DEEP_BAND,
        MoneynessCohort::Otm => otm_distance > ATM_BAND && otm_distance <= DEEP_BAND,
        MoneynessCohort::DeepOtm => otm_distance > DEEP_BAND,
        MoneynessCohort::OtmDelta5 | MoneynessCohort::OtmDelta10 | MoneynessCohort::OtmDelta25 => {
            otm_distance > ATM_BAND
        }
    }
}

/// Mean greeks over the members of one side of a cohort.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GreeksSummary {
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub rho: Option<f64>,
    pub iv: Option<f64>,
    pub count: usize,
}

impl GreeksSummary {
    fn from_results(results: &[&GreeksResult]) -> Option<Self> {
        if results.is_empty() {
            return None;
        }
        let mean = |pick: fn(&GreeksResult) -> Option<f64>| {
            let values: Vec<f64> = results.iter().filter_map(|r| pick(r)).collect();
            (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
        };
        Some(Self {
            delta: mean(|r| r.delta),
            gamma: mean(|r| r.gamma),
            theta: mean(|r| r.theta),
            vega: mean(|r| r.vega),
            rho: mean(|r| r.rho),
            iv: mean(|r| r.iv),
            count: results.len(),
        })
    }
}

/// Strike coverage of a cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeStats {
    pub min: f64,
    pub max: f64,
    pub unique: usize,
}

/// Aggregated greeks for one cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortGreeks {
    pub cohort: MoneynessCohort,
    pub all: Option<GreeksSummary>,
    pub calls: Option<GreeksSummary>,
    pub puts: Option<GreeksSummary>,
    pub strikes: Option<StrikeStats>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CohortGreeks {
    pub fn empty(cohort: MoneynessCohort, reason: impl Into<String>) -> Self {
        Self {
            cohort,
            all: None,
            calls: None,
            puts: None,
            strikes: None,
            count: 0,
            reason: Some(reason.into()),
        }
    }
}

/// ATM implied-volatility summary with put/call skew.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtmIvResult {
    pub iv: Option<f64>,
    pub call_iv: Option<f64>,
    pub put_iv: Option<f64>,
    pub skew: Option<f64>,
    pub count: usize,
}

pub struct MoneynessAggregator {
    catalog: Arc<dyn InstrumentCatalog>,
    engine: Arc<GreeksEngine>,
}

impl MoneynessAggregator {
    pub fn new(catalog: Arc<dyn InstrumentCatalog>, engine: Arc<GreeksEngine>) -> Self {
        Self { catalog, engine }
    }

    /// Resolve a cohort to concrete catalog options. Delta cohorts return
    /// candidates; the delta match happens in [`Self::aggregate`].
    pub async fn resolve(
        &self,
        underlying: &str,
        expiry: Option<&str>,
        cohort: MoneynessCohort,
        spot: f64,
    ) -> Result<Vec<CatalogOption>> {
        self.catalog
            .strikes_by_moneyness(underlying, expiry, cohort, spot)
            .await
    }

    /// Resolve and aggregate one cohort.
    pub async fn aggregate(
        &self,
        underlying: &str,
        expiry: Option<&str>,
        cohort: MoneynessCohort,
        spot: f64,
    ) -> Result<CohortGreeks> {
        let members = match self.resolve(underlying, expiry, cohort, spot).await {
            Ok(members) => members,
            Err(err) if err.is_data_access() => {
                warn!(underlying, %cohort, error = %err, "Catalog lookup failed");
                return Ok(CohortGreeks::empty(
                    cohort,
                    format!("Catalog unavailable: {err}"),
                ));
            }
            Err(err) => return Err(err),
        };
        if members.is_empty() {
            debug!(underlying, %cohort, "No options found for cohort");
            return Ok(CohortGreeks::empty(
                cohort,
                format!("No options found for {underlying} at {cohort}"),
            ));
        }
        self.aggregate_options(cohort, &members, expiry, spot).await
    }

    /// Price cohort members and emit per-side mean summaries.
    pub async fn aggregate_options(
        &self,
        cohort: MoneynessCohort,
        members: &[CatalogOption],
        expiry: Option<&str>,
        spot: f64,
    ) -> Result<CohortGreeks> {
        let mut requests = Vec::with_capacity(members.len());
        let mut kept = Vec::with_capacity(members.len());
        for member in members {
            let raw_expiry = member.expiry.as_deref().or(expiry);
            let Some(raw_expiry) = raw_expiry else {
                continue;
            };
            let Ok(expiry_dt) = parse_expiry(raw_expiry) else {
                continue;
            };
            let mut request = OptionRequest::new(member.strike, expiry_dt, member.option_type);
            request.volatility = member.volatility;
            request.market_price = member.market_price;
            requests.push(request);
            kept.push(member);
        }
        if requests.is_empty() {
            return Ok(CohortGreeks::empty(cohort, "No members carried a usable expiry"));
        }

        let chain = self
            .engine
            .price_chain(&requests, spot, &GreekKind::ALL, true)
            .await?;

        let mut paired: Vec<(&CatalogOption, &GreeksResult)> =
            kept.into_iter().zip(chain.results.iter()).collect();

        // Delta-matched cohorts keep the single closest member within
        // tolerance of the target.
        if let Some(target) = cohort.delta_target() {
            let best = paired
                .iter()
                .filter_map(|(option, greeks)| {
                    let delta = greeks.delta?;
                    let distance = (delta.abs() - target).abs();
                    (distance <= DELTA_TOLERANCE).then_some(((*option, *greeks), distance))
                })
                .min_by(|a, b| a.1.total_cmp(&b.1));
            match best {
                Some((pair, _)) => paired = vec![pair],
                None => {
                    return Ok(CohortGreeks::empty(
                        cohort,
                        format!("No options within delta tolerance of {target}"),
                    ))
                }
            }
        }

        Ok(summarise(cohort, &paired))
    }

    /// ATM implied volatility with put/call skew.
    pub async fn atm_iv(
        &self,
        underlying: &str,
        expiry: Option<&str>,
        spot: f64,
    ) -> Result<AtmIvResult> {
        let cohort = self.aggregate(underlying, expiry, MoneynessCohort::Atm, spot).await?;
        let call_iv = cohort.calls.as_ref().and_then(|s| s.iv);
        let put_iv = cohort.puts.as_ref().and_then(|s| s.iv);
        let skew = match (call_iv, put_iv) {
            (Some(call), Some(put)) => Some(put - call),
            _ => None,
        };
        Ok(AtmIvResult {
            iv: cohort.all.as_ref().and_then(|s| s.iv),
            call_iv,
            put_iv,
            skew,
            count: cohort.count,
        })
    }

    /// Greeks distribution across the full cohort set.
    pub async fn distribution(
        &self,
        underlying: &str,
        spot: f64,
        expiry: Option<&str>,
    ) -> Result<BTreeMap<MoneynessCohort, CohortGreeks>> {
        let mut distribution = BTreeMap::new();
        for cohort in MoneynessCohort::ALL {
            let greeks = self.aggregate(underlying, expiry, cohort, spot).await?;
            distribution.insert(cohort, greeks);
        }
        Ok(distribution)
    }
}

fn summarise(cohort: MoneynessCohort, paired: &[(&CatalogOption, &GreeksResult)]) -> CohortGreeks {
    let all: Vec<&GreeksResult> = paired.iter().map(|(_, g)| *g).collect();
    let calls: Vec<&GreeksResult> = paired
        .iter()
        .filter(|(o, _)| o.option_type == OptionType::Call)
        .map(|(_, g)| *g)
        .collect();
    let puts: Vec<&GreeksResult> = paired
        .iter()
        .filter(|(o, _)| o.option_type == OptionType::Put)
        .map(|(_, g)| *g)
        .collect();

    let strikes: Vec<f64> = paired.iter().map(|(o, _)| o.strike).collect();
    let unique: BTreeSet<u64> = strikes.iter().map(|s| s.to_bits()).collect();
    let strike_stats = (!strikes.is_empty()).then(|| StrikeStats {
        min: strikes.iter().copied().fold(f64::INFINITY, f64::min),
        max: strikes.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        unique: unique.len(),
    });

    CohortGreeks {
        cohort,
        count: paired.len(),
        all: GreeksSummary::from_results(&all),
        calls: GreeksSummary::from_results(&calls),
        puts: GreeksSummary::from_results(&puts),
        strikes: strike_stats,
        reason: None,
    }
}
