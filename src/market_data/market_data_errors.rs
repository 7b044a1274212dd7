use thiserror::Error;

use crate::db::DatabaseError;

/// Classification for retry policy.
///
/// `Retryable` errors are retried with backoff until the attempt budget or
/// total deadline runs out; `NoData` lets the acquisition policy escalate to
/// the bulk source; `Fatal` surfaces immediately.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    Retryable,
    Fatal,
    NoData,
}

#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] diesel::result::Error),

    #[error("Database error: {0}")]
    DatabaseConnectionError(#[from] DatabaseError),

    #[error("Rate limited: {provider}")]
    RateLimited { provider: String },

    #[error("Timeout: {provider}")]
    Timeout { provider: String },

    #[error("Upstream error: {provider} HTTP {status}: {message}")]
    UpstreamStatus {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Provider error: {provider} - {message}")]
    ProviderError { provider: String, message: String },

    #[error("No data for requested range")]
    NoData,

    #[error("Missing API credential: {0}")]
    MissingCredential(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Canceled")]
    Canceled,
}

impl MarketDataError {
    /// Returns the retry classification for this error.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::RateLimited { .. } | Self::Timeout { .. } => RetryClass::Retryable,

            Self::UpstreamStatus { status, .. } => {
                if *status == 429 || (500..600).contains(&(*status as i32)) {
                    RetryClass::Retryable
                } else {
                    RetryClass::Fatal
                }
            }

            // Transport-level failures are treated as transient.
            Self::Network(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    RetryClass::Retryable
                } else {
                    RetryClass::Fatal
                }
            }

            Self::NoData => RetryClass::NoData,

            Self::DatabaseError(_)
            | Self::DatabaseConnectionError(_)
            | Self::ProviderError { .. }
            | Self::MissingCredential(_)
            | Self::NotFound(_)
            | Self::Canceled => RetryClass::Fatal,
        }
    }
}
