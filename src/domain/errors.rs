//! Typed error taxonomy for the ETL core.
//!
//! Every failure is classified at the boundary where it occurs so the
//! orchestrator can apply a uniform propagation policy: transient failures
//! retry, permanent and parse failures skip the record, store unavailability
//! is fatal to the run.

use std::time::Duration;

use thiserror::Error;

/// Normalization failure, named by the missing or invalid field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("chipset-not-4070-series: {name}")]
    ChipsetNot4070Series { name: String },

    #[error("brand-missing: {name}")]
    BrandMissing { name: String },

    #[error("vram-missing: {name}")]
    VramMissing { name: String },

    #[error("empty product name")]
    EmptyName,
}

/// Unified ETL error with retry classification.
#[derive(Error, Debug)]
pub enum EtlError {
    /// Network timeout, 5xx, broken connection. Retryable.
    #[error("transient I/O failure: {message}")]
    Transient { message: String },

    /// HTTP 429. Retryable after the hinted (or configured) wait.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// 4xx (except 429), DNS failure. Skip the record and continue.
    #[error("permanent I/O failure: {message}")]
    Permanent { message: String },

    /// Malformed HTML / feed content. Skip the record and continue.
    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    /// Raw product name could not be normalized. Skip the record.
    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    /// Too little history in the analysis window. Caller accepts nulls.
    #[error("insufficient data for sku {sku_id}: {message}")]
    InsufficientData { sku_id: i64, message: String },

    /// Rejected at a boundary: non-positive price, empty required field.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// FK or check-constraint violation after retries. Fatal to the record.
    #[error("store constraint violated for {natural_key}: {message}")]
    StoreConstraint {
        natural_key: String,
        message: String,
    },

    /// Pool exhausted or connect failure after all retries. Fatal to the run.
    #[error("store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// The caller-supplied cancellation signal fired.
    #[error("operation cancelled")]
    Cancelled,
}

impl EtlError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    pub fn parse(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn store_constraint(natural_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StoreConstraint {
            natural_key: natural_key.into(),
            message: message.into(),
        }
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Whether the Retryer may attempt this operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::RateLimited { .. })
    }

    /// Server-provided wait hint (Retry-After), when present.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classify an HTTP response status for a given URL.
    pub fn from_status(status: u16, url: &str, retry_after: Option<Duration>) -> Self {
        match status {
            429 => Self::rate_limited(format!("HTTP 429 from {url}"), retry_after),
            s if s >= 500 => Self::transient(format!("HTTP {s} from {url}")),
            s => Self::permanent(format!("HTTP {s} from {url}")),
        }
    }

    /// Classify a reqwest failure (timeouts and connection errors retry).
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::transient(err.to_string())
        } else {
            Self::permanent(err.to_string())
        }
    }

    /// Classify an sqlx failure for a store operation keyed by `natural_key`.
    pub fn from_sqlx(err: sqlx::Error, natural_key: &str) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                // 23xxx: integrity constraint violations (FK, unique, check).
                if db.code().map(|c| c.starts_with("23")).unwrap_or(false) {
                    Self::store_constraint(natural_key, db.to_string())
                } else {
                    Self::transient(db.to_string())
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::store_unavailable(err.to_string())
            }
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Protocol(_) => {
                Self::transient(err.to_string())
            }
            _ => Self::transient(err.to_string()),
        }
    }
}

pub type EtlResult<T> = Result<T, EtlError>;
