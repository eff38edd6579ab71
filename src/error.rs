// src/error.rs
// Standardized error types for lanewise

use crate::backend::BackendError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the lanewise library
#[derive(Error, Debug)]
pub enum LanewiseError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("aggregation failed: {0}")]
    Aggregation(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using LanewiseError
pub type Result<T> = std::result::Result<T, LanewiseError>;

impl From<tokio::task::JoinError> for LanewiseError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            LanewiseError::Cancelled
        } else {
            LanewiseError::Internal(err.to_string())
        }
    }
}

/// Everything that can go wrong inside one lane attempt, before it is folded
/// into a `LaneResult` at the executor boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LaneError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("lane deadline exceeded")]
    Timeout,

    #[error("circuit open")]
    CircuitOpen,

    #[error("lane cancelled")]
    Cancelled,

    #[error("backend panicked: {0}")]
    Panicked(String),

    #[error("no provider available for lane")]
    NoProvider,
}

impl LaneError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LaneError::Backend(e) => e.kind(),
            LaneError::Timeout => ErrorKind::LaneTimeout,
            LaneError::CircuitOpen => ErrorKind::CircuitOpen,
            LaneError::Cancelled => ErrorKind::Cancelled,
            LaneError::Panicked(_) => ErrorKind::Internal,
            LaneError::NoProvider => ErrorKind::ProviderUnavailable,
        }
    }
}

/// Why a lane (or the request as a whole) did not produce a clean result.
///
/// Serialised into `perLaneStatus` and telemetry, so the variant names are part
/// of the outbound contract.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::IntoStaticStr,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// The lane deadline expired before the backend answered
    LaneTimeout,
    /// Transport, auth or rate-limit error from the provider
    ProviderUnavailable,
    /// The breaker denied the call; the backend was never invoked
    CircuitOpen,
    /// The provider answered but the body could not be used
    InvalidResponse,
    /// The request was cancelled (client disconnect)
    Cancelled,
    /// The backend panicked or its task died
    Internal,
    /// Merging evidence failed
    AggregationFailure,
    /// The global deadline passed before synthesis completed
    TotalBudgetExceeded,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Whether this outcome should count against the provider's breaker.
    ///
    /// Denials and cancellations are not the provider's fault; counting a denial
    /// again would keep the circuit open forever.
    pub fn counts_against_provider(&self) -> bool {
        matches!(
            self,
            ErrorKind::LaneTimeout
                | ErrorKind::ProviderUnavailable
                | ErrorKind::InvalidResponse
                | ErrorKind::Internal
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
