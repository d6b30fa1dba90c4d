//! Error types for the integrations service
//!
//! This module defines the error taxonomy used throughout the connect flow,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for integrations operations
///
/// Variants fall into four groups: request validation failures (reported
/// to the caller as HTTP 400), provider exchange failures and storage
/// failures (both converted into an error redirect by the flow), and
/// configuration errors that stop the process at startup.
#[derive(Error, Debug)]
pub enum IntegrationsError {
    /// Configuration-related errors (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The initiating request did not name a subject
    #[error("Missing userId")]
    MissingSubject,

    /// The provider callback did not carry an authorization code
    #[error("Missing authorization code")]
    MissingCode,

    /// The `state` parameter (or its nonce cookie) could not be validated
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The requested provider is unknown or not configured
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// The provider rejected the code or returned an unusable token response
    #[error("Token exchange failed (status={}): {body}", display_status(.status))]
    ExchangeFailed {
        /// HTTP status returned by the provider, `None` on transport failure
        status: Option<u16>,
        /// Provider response body or transport diagnostic
        body: String,
    },

    /// Credential persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// No credential is stored for the requested subject and provider
    #[error("No credential stored for {subject} on {provider}")]
    CredentialNotFound {
        /// Subject identifier that was looked up
        subject: String,
        /// Provider name that was looked up
        provider: String,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

fn display_status(status: &Option<u16>) -> String {
    status.map_or_else(|| "none".to_string(), |s| s.to_string())
}

impl IntegrationsError {
    /// Returns `true` for caller-caused request errors that map to HTTP 400.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingSubject | Self::MissingCode | Self::InvalidState(_)
        )
    }
}

/// Result type alias for integrations operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
