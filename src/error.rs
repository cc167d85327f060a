//! Error types for BC-10 analyzer operations
//!
//! This module defines every error that can surface from the analyzer link:
//! caller validation, transport exhaustion, protocol noise, and write-back
//! failures against the lab-request store.

use std::fmt;
use thiserror::Error;

/// Analyzer link error types
///
/// All fallible operations in this library return `Result<T, AnalyzerError>`.
#[derive(Error, Debug)]
pub enum AnalyzerError {
    /// Caller supplied an unusable argument
    ///
    /// This error occurs when:
    /// - The sample identifier is empty or only whitespace
    /// - The sample identifier contains a segment or field delimiter
    ///
    /// Validation errors are surfaced immediately and never retried.
    ///
    /// # Example
    /// ```no_run
    /// # use bc10_analyzer::error::AnalyzerError;
    /// let err = AnalyzerError::Validation("sample id must not be empty".to_string());
    /// ```
    #[error("Validation error: {0}")]
    Validation(String),

    /// Every transport strategy was tried and none produced a reply
    ///
    /// Carries the list of attempted strategies together with the reason
    /// each one failed. The rendered message includes remediation guidance
    /// for the operator.
    #[error("{0}")]
    Transport(TransportFailure),

    /// A reply was received but could not be interpreted
    ///
    /// This error occurs when:
    /// - The reply frame is truncated or has no segments
    /// - The reply carries no sample identifier
    ///
    /// The integration layer turns this into "no result" instead of failing,
    /// since noisy replies are expected from serial-style instruments.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Write-back to the lab-request store failed
    ///
    /// This error occurs when:
    /// - The lab request does not exist
    /// - The backing service rejected the update
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// An exchange is already in flight on this client
    ///
    /// The instrument session model has no request correlation, so a client
    /// instance never runs two exchanges at once. Use another client or wait.
    #[error("Analyzer client busy: an exchange is already awaiting a reply")]
    Busy,

    /// Invalid construction parameters (host, port, addresses)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Incoming frame exceeded the maximum accepted size
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Bytes buffered when the limit was hit
        size: usize,
        /// Maximum allowed frame size in bytes
        max: usize,
    },

    /// I/O error during network communication
    ///
    /// Common scenarios:
    /// - Relay process not running on the configured port
    /// - Connection reset while awaiting the reply
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed or returned a non-success status
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for AnalyzerError {
    fn from(e: reqwest::Error) -> Self {
        AnalyzerError::Http(e.to_string())
    }
}

/// Details of a failed exchange after all strategies were exhausted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    /// One entry per attempted strategy, in the order they were tried
    pub attempts: Vec<StrategyAttempt>,
}

/// A single failed strategy attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyAttempt {
    /// Strategy name (e.g. "relay-socket", "http-poll")
    pub strategy: String,
    /// Why the strategy failed
    pub reason: String,
}

impl TransportFailure {
    /// Names of the strategies that were attempted
    pub fn strategies(&self) -> Vec<&str> {
        self.attempts.iter().map(|a| a.strategy.as_str()).collect()
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Could not reach the BC-10 analyzer.")?;
        if self.attempts.is_empty() {
            write!(f, " No transport strategy is configured.")?;
        }
        for attempt in &self.attempts {
            write!(f, " [{}] {}.", attempt.strategy, attempt.reason)?;
        }
        write!(
            f,
            " Check that the analyzer is powered on, the network cable is connected, \
             the LIS port matches the analyzer settings, the local relay process is running, \
             and no firewall blocks the connection."
        )
    }
}

/// Result type alias for analyzer operations
pub type Result<T> = std::result::Result<T, AnalyzerError>;
