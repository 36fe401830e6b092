//! Error types for the management activity collector.
//!
//! Every failure a run can hit is one variant of [`CollectorError`], so the
//! entry point can branch on the kind (and pick an exit code) instead of
//! matching on messages.

use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias using `CollectorError`.
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Errors that can occur while authenticating, listing or fetching content,
/// or writing output.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Required configuration is missing or invalid.
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// Token endpoint rejected the client credentials.
    #[error("Authentication failed ({status}): {body}")]
    Authentication { status: StatusCode, body: String },

    /// A response body did not have the expected shape.
    #[error("Malformed response from {context}: {message}")]
    MalformedResponse { context: String, message: String },

    /// Content-listing endpoint returned a non-success status.
    #[error("Content listing failed ({status}): {body}")]
    Listing { status: StatusCode, body: String },

    /// Fetching a content blob returned a non-success status.
    #[error("Content fetch failed ({status}) for {uri}")]
    ContentFetch { status: StatusCode, uri: String },

    /// All retry attempts were used up on transient failures.
    #[error("All {attempts} attempts exhausted for {url}. Last error: {last_error}")]
    TransientNetwork {
        url: String,
        attempts: u32,
        last_error: String,
    },

    /// Transport failure that is not worth retrying.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Writing an output file failed.
    #[error("Failed to write {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// HTTP client could not be constructed.
    #[error("Client configuration error: {0}")]
    Client(String),
}

impl CollectorError {
    pub(crate) fn malformed(context: impl Into<String>, message: impl ToString) -> Self {
        CollectorError::MalformedResponse {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Classify a failure while reading a response body: only a body that
    /// does not decode is malformed, a broken transfer stays an HTTP error.
    pub(crate) fn body_error(context: impl Into<String>, error: reqwest::Error) -> Self {
        if error.is_decode() {
            CollectorError::malformed(context, error)
        } else {
            CollectorError::Http(error)
        }
    }

    /// Process exit code for this kind of failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            CollectorError::Configuration(_) => 2,
            CollectorError::Authentication { .. } => 3,
            CollectorError::MalformedResponse { .. } => 4,
            CollectorError::Listing { .. } => 5,
            CollectorError::ContentFetch { .. } => 6,
            CollectorError::TransientNetwork { .. } | CollectorError::Http(_) => 7,
            CollectorError::Output { .. } => 8,
            CollectorError::Client(_) => 9,
        }
    }
}
