//! Error types for the GPU inventory collector

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while collecting and aggregating device facts
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // =========================================================================
    // Fact Source Errors
    // =========================================================================
    /// A fact source raised or produced output it could not parse
    #[error("source '{src}' failed: {reason}")]
    SourceFailed { src: &'static str, reason: String },

    /// A fact source did not report back within its timeout
    #[error("source '{src}' did not return within {timeout:?}")]
    SourceTimeout {
        src: &'static str,
        timeout: Duration,
    },

    /// An external utility could not be executed or exited unsuccessfully
    #[error("command '{command}' failed: {reason}")]
    CommandFailed { command: String, reason: String },

    // =========================================================================
    // Device Identity Errors
    // =========================================================================
    /// A raw bus address could not be normalized into a canonical device key
    #[error("unresolvable device address: {0}")]
    KeyResolution(String),

    // =========================================================================
    // BMC REST Client Errors
    // =========================================================================
    /// BMC connection error
    #[error("BMC connection error: {0}")]
    RestConnection(#[source] reqwest::Error),

    /// BMC authentication failed
    #[error("BMC authentication failed: {0}")]
    RestAuth(String),

    /// BMC request returned an unexpected status or payload
    #[error("BMC request failed: {0}")]
    RestRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Orchestration Errors
    // =========================================================================
    /// The scheduler itself could not be brought up; fatal for the whole run
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

impl Error {
    /// Whether this error aborts the whole run rather than a single source.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Scheduler(_) | Error::Config(_))
    }
}
