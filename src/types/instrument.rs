//! Canonical instrument identification
//!
//! All producers emit the canonical textual form
//! `EXCHANGE@SYMBOL@PRODUCT[@EXPIRY[@OPTION_TYPE[@STRIKE]]]`. The legacy
//! `EXCHANGE:SYMBOL` form is accepted on input and rewritten.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::SignalError;

/// Option type for derivatives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionType {
    /// Call option - right to buy the underlying at strike price
    Call,
    /// Put option - right to sell the underlying at strike price
    Put,
}

impl OptionType {
    /// Pricing flag used by the model layer.
    pub fn flag(&self) -> char {
        match self {
            Self::Call => 'c',
            Self::Put => 'p',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "CALL",
            Self::Put => "PUT",
        }
    }

    /// Parse the wire spellings used across feeds (CALL/CE/C, PUT/PE/P).
    pub fn parse(s: &str) -> Result<Self, SignalError> {
        match s.to_ascii_uppercase().as_str() {
            "CALL" | "CE" | "C" => Ok(Self::Call),
            "PUT" | "PE" | "P" => Ok(Self::Put),
            other => Err(SignalError::validation(format!(
                "Invalid option type: '{other}' (expected CALL or PUT)"
            ))),
        }
    }
}

impl FromStr for OptionType {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Product segment used when rewriting legacy spot keys.
const DEFAULT_SPOT_PRODUCT: &str = "EQ";

/// Parsed canonical instrument identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentKey {
    pub exchange: String,
    pub symbol: String,
    pub product: String,
    pub expiry: Option<String>,
    pub option_type: Option<OptionType>,
    pub strike: Option<f64>,
}

impl InstrumentKey {
    /// Parse a canonical or legacy instrument key.
    pub fn parse(raw: &str) -> Result<Self, SignalError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SignalError::validation("Instrument key is empty"));
        }

        if raw.contains('@') {
            return Self::parse_canonical(raw);
        }

        // Legacy format support: EXCHANGE:SYMBOL
        if let Some((exchange, symbol)) = raw.split_once(':') {
            if exchange.is_empty() || symbol.is_empty() {
                return Err(SignalError::validation(format!(
                    "Invalid legacy instrument key: '{raw}'"
                )));
            }
            return Ok(Self {
                exchange: exchange.to_string(),
                symbol: symbol.to_string(),
                product: DEFAULT_SPOT_PRODUCT.to_string(),
                expiry: None,
                option_type: None,
                strike: None,
            });
        }

        Err(SignalError::validation(format!(
            "Invalid instrument key: '{raw}' (expected EXCHANGE@SYMBOL@PRODUCT or EXCHANGE:SYMBOL)"
        )))
    }

    fn parse_canonical(raw: &str) -> Result<Self, SignalError> {
        let parts: Vec<&str> = raw.split('@').collect();
        if parts.len() < 3 || parts.len() > 6 {
            return Err(SignalError::validation(format!(
                "Invalid instrument key: '{raw}' (expected 3 to 6 '@'-separated segments)"
            )));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(SignalError::validation(format!(
                "Invalid instrument key: '{raw}' (empty segment)"
            )));
        }

        let option_type = match parts.get(4) {
            Some(s) => Some(OptionType::parse(s)?),
            None => None,
        };
        let strike = match parts.get(5) {
            Some(s) => Some(s.parse::<f64>().map_err(|_| {
                SignalError::validation(format!("Invalid strike in instrument key: '{s}'"))
            })?),
            None => None,
        };
        if let Some(strike) = strike {
            if strike <= 0.0 {
                return Err(SignalError::validation(format!(
                    "Strike must be positive, got {strike}"
                )));
            }
        }

        Ok(Self {
            exchange: parts[0].to_string(),
            symbol: parts[1].to_string(),
            product: parts[2].to_string(),
            expiry: parts.get(3).map(|s| s.to_string()),
            option_type,
            strike,
        })
    }

    /// Spot key for an underlying (no derivative segments).
    pub fn spot(exchange: &str, symbol: &str, product: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            product: product.to_string(),
            expiry: None,
            option_type: None,
            strike: None,
        }
    }

    pub fn is_option(&self) -> bool {
        self.option_type.is_some()
    }

    /// Canonical textual form. Legacy inputs come out rewritten.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl FromStr for InstrumentKey {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}@{}", self.exchange, self.symbol, self.product)?;
        if let Some(expiry) = &self.expiry {
            write!(f, "@{expiry}")?;
        }
        if let Some(option_type) = &self.option_type {
            write!(f, "@{option_type}")?;
        }
        if let Some(strike) = self.strike {
            if strike.fract() == 0.0 {
                write!(f, "@{}", strike as i64)?;
            } else {
                write!(f, "@{strike}")?;
            }
        }
        Ok(())
    }
}
