//! Error taxonomy for the signals computation core
//!
//! Two-level error domain: per-option failures degrade to missing greeks,
//! batch and transport failures propagate as one of the variants below.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SignalError>;

/// Service error types
#[derive(Debug, Clone, Error)]
pub enum SignalError {
    /// Missing or invalid configuration. Fatal at startup.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Configured model or requested greek is unknown. Non-retryable.
    #[error("Unsupported model: {message}")]
    UnsupportedModel { message: String },

    /// Pricing or IV failure for specific inputs, with the input snapshot.
    #[error("Greeks calculation failed: {message}")]
    GreeksCalculation {
        message: String,
        details: Option<Value>,
    },

    /// Unable to retrieve data from a collaborator.
    #[error("Data access error: {message}")]
    DataAccess { message: String },

    /// Upstream transport failure (network, timeout, 5xx).
    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    /// Best-effort cache failure; callers log and proceed.
    #[error("Cache unavailable: {message}")]
    CacheUnavailable { message: String },

    /// Operation exceeded its deadline. Counted as failure by the breaker.
    #[error("Timeout after {elapsed_ms}ms (limit: {limit_ms}ms)")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },

    /// Upstream rejected credentials. Non-retryable, critical.
    #[error("Not authorized: {message}")]
    NotAuthorized { message: String },

    /// Input did not meet declared constraints.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Circuit breaker rejected the call.
    #[error("Circuit open: {message}")]
    CircuitOpen {
        message: String,
        details: Option<Value>,
    },
}

impl SignalError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn unsupported_model(message: impl Into<String>) -> Self {
        Self::UnsupportedModel {
            message: message.into(),
        }
    }

    pub fn greeks(message: impl Into<String>) -> Self {
        Self::GreeksCalculation {
            message: message.into(),
            details: None,
        }
    }

    pub fn greeks_with_details(message: impl Into<String>, details: Value) -> Self {
        Self::GreeksCalculation {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn data_access(message: impl Into<String>) -> Self {
        Self::DataAccess {
            message: message.into(),
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }

    pub fn cache_unavailable(message: impl Into<String>) -> Self {
        Self::CacheUnavailable {
            message: message.into(),
        }
    }

    pub fn not_authorized(message: impl Into<String>) -> Self {
        Self::NotAuthorized {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn circuit_open(message: impl Into<String>) -> Self {
        Self::CircuitOpen {
            message: message.into(),
            details: None,
        }
    }

    /// Stable kind tag for user-visible envelopes and transport mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::UnsupportedModel { .. } => "unsupported_model",
            Self::GreeksCalculation { .. } => "greeks_calculation",
            Self::DataAccess { .. } => "data_access",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::CacheUnavailable { .. } => "cache_unavailable",
            Self::Timeout { .. } => "timeout",
            Self::NotAuthorized { .. } => "not_authorized",
            Self::Validation { .. } => "validation",
            Self::CircuitOpen { .. } => "circuit_open",
        }
    }

    /// True for the data-access family (transport and cache included).
    pub fn is_data_access(&self) -> bool {
        matches!(
            self,
            Self::DataAccess { .. } | Self::ServiceUnavailable { .. } | Self::CacheUnavailable { .. }
        )
    }

    /// Non-retryable errors: retrying with the same inputs cannot succeed.
    pub fn is_non_retryable(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::UnsupportedModel { .. }
                | Self::NotAuthorized { .. }
                | Self::Validation { .. }
        )
    }

    /// Structured form surfaced to embedding services.
    pub fn envelope(&self) -> ErrorEnvelope {
        let details = match self {
            Self::GreeksCalculation { details, .. } | Self::CircuitOpen { details, .. } => {
                details.clone()
            }
            Self::Timeout {
                elapsed_ms,
                limit_ms,
            } => Some(serde_json::json!({
                "elapsed_ms": elapsed_ms,
                "limit_ms": limit_ms,
            })),
            _ => None,
        };
        ErrorEnvelope {
            kind: self.kind(),
            message: self.to_string(),
            details,
        }
    }
}

/// User-visible structured error.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}
