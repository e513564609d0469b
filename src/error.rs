// src/error.rs

//! Unified error handling for the harvester.

use std::fmt;

use thiserror::Error;

use crate::services::retry::Retryable;

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be built or used
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Embedded checkpoint database failed
    #[error("Checkpoint database error: {0}")]
    Sled(#[from] sled::Error),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A page could not be fetched
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Checkpoint bookkeeping failed for a unit
    #[error("Checkpoint error for {unit}: {message}")]
    Checkpoint { unit: String, message: String },

    /// Document store operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// The run was cancelled by the operator
    #[error("Run cancelled")]
    Cancelled,
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a checkpoint error for a unit of work.
    pub fn checkpoint(unit: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Checkpoint {
            unit: unit.into(),
            message: message.to_string(),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }

    /// Whether this error was caused by operator cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Fetch(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

/// Classification of a fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Timeouts, connection resets, 5xx and 429 responses.
    Transient,
    /// The resource is gone or forbidden; retrying will not help.
    Terminal,
    /// The run was cancelled while the request was in flight.
    Cancelled,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Transient => "transient network error",
            Self::Terminal => "terminal fetch error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// A failed page fetch, carrying the attempt count once retries are exhausted.
#[derive(Error, Debug, Clone)]
#[error("{kind} for {url} after {attempts} attempt(s): {message}")]
pub struct FetchError {
    pub url: String,
    pub kind: FetchErrorKind,
    pub status: Option<u16>,
    pub attempts: u32,
    pub message: String,
}

impl FetchError {
    pub fn transient(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::new(url, FetchErrorKind::Transient, None, message)
    }

    pub fn terminal(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::new(url, FetchErrorKind::Terminal, None, message)
    }

    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::new(url, FetchErrorKind::Cancelled, None, "run cancelled")
    }

    /// Classify a non-success HTTP status.
    ///
    /// 429 and 5xx are retryable; every other 4xx (including 404/410 for
    /// resources that no longer exist) is terminal.
    pub fn from_status(url: impl Into<String>, status: u16) -> Self {
        let kind = if status == 429 || (500..600).contains(&status) {
            FetchErrorKind::Transient
        } else {
            FetchErrorKind::Terminal
        };
        Self::new(url, kind, Some(status), format!("HTTP status {status}"))
    }

    /// Classify a transport-level error from the HTTP client.
    pub fn from_transport(url: impl Into<String>, error: &reqwest::Error) -> Self {
        let kind = if error.is_builder() || error.is_redirect() {
            FetchErrorKind::Terminal
        } else {
            // Timeouts, connection refused/reset and truncated bodies.
            FetchErrorKind::Transient
        };
        let status = error.status().map(|s| s.as_u16());
        Self::new(url, kind, status, error)
    }

    fn new(
        url: impl Into<String>,
        kind: FetchErrorKind,
        status: Option<u16>,
        message: impl fmt::Display,
    ) -> Self {
        Self {
            url: url.into(),
            kind,
            status,
            attempts: 1,
            message: message.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == FetchErrorKind::Cancelled
    }

    pub(crate) fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        self.kind == FetchErrorKind::Transient
    }
}
