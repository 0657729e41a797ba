// Error handling module
// Defines the client error taxonomy surfaced to dashboard callers

use serde_json::Value;
use thiserror::Error;

/// Fallback text shown when the server did not provide a usable message
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

/// Errors that can occur while talking to cr-engine
#[derive(Error, Debug)]
pub enum ClientError {
    /// Access token rejected and the reactive refresh also failed.
    /// Credentials have been purged; the caller must sign in again.
    #[error("Session expired: {message}")]
    AuthExpired { status: u16, message: String },

    /// A refresh was needed but no refresh token is stored
    #[error("No refresh token available: {message}")]
    RefreshUnavailable { status: u16, message: String },

    /// Non-2xx response from cr-engine
    #[error("Upstream error: {status} - {message}")]
    Upstream {
        status: u16,
        message: String,
        body: Option<Value>,
    },

    /// Transport failure, no response received
    #[error("Network error ({kind}): {message}")]
    Network { kind: &'static str, message: String },

    /// Successful response that could not be decoded into the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Credential store or cookie mirror failure
    #[error("Credential store error: {0}")]
    Store(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ClientError {
    /// HTTP status associated with the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::AuthExpired { status, .. }
            | ClientError::RefreshUnavailable { status, .. }
            | ClientError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the session is gone and the UI must route to sign-in
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            ClientError::AuthExpired { .. } | ClientError::RefreshUnavailable { .. }
        )
    }

    /// Text suitable for an inline message or toast
    pub fn user_message(&self) -> String {
        match self {
            ClientError::AuthExpired { .. } | ClientError::RefreshUnavailable { .. } => {
                "Your session has expired. Please sign in again.".to_string()
            }
            ClientError::Upstream { message, .. } if !message.trim().is_empty() => message.clone(),
            _ => GENERIC_ERROR_MESSAGE.to_string(),
        }
    }
}

/// Categorize a reqwest transport error
pub fn network_error(e: &reqwest::Error) -> ClientError {
    let kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() {
        "body_error"
    } else if e.is_decode() {
        "decode_error"
    } else {
        "unknown"
    };

    ClientError::Network {
        kind,
        message: e.to_string(),
    }
}

/// Pull a human-readable message out of an error payload.
/// cr-engine and the auth provider disagree on the field name.
pub fn extract_error_message(body: &Value) -> Option<String> {
    if let Some(s) = body.as_str() {
        return Some(s.to_string());
    }

    let candidates = [
        body.get("error").and_then(|e| e.get("message")),
        body.get("message"),
        body.get("error"),
        body.get("msg"),
        body.get("error_description"),
    ];

    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(str::to_string))
        .filter(|s| !s.is_empty())
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
