// Authentication types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default access token lifetime when the server reports none (seconds)
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Last-known identity of the signed-in user.
/// Display only, never consulted for authorization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, alias = "metadata", skip_serializing_if = "Value::is_null")]
    pub user_metadata: Value,
}

/// Credential record held by the session manager and mirrored to the store.
///
/// `access_token` and `expires_at` live and die together: a record exists
/// with both or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialRecord {
    pub access_token: String,
    /// Absolute expiry, epoch seconds
    pub expires_at: i64,
    pub refresh_token: Option<String>,
    pub user: Option<UserSnapshot>,
}

impl CredentialRecord {
    /// Seconds until expiry relative to `now` (negative once expired)
    pub fn seconds_remaining(&self, now: i64) -> i64 {
        self.expires_at - now
    }
}

/// Normalized session grant produced by sign-in, sign-up or refresh
#[derive(Debug, Clone, PartialEq)]
pub struct SessionGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: i64,
    pub user: Option<UserSnapshot>,
}

/// Refresh request body
#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Refresh response from `POST /auth/refresh`
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<UserSnapshot>,
}

/// Result of a sign-up call
#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    /// Server issued a session immediately
    SignedIn(CredentialRecord),
    /// Account created, confirmation pending
    ConfirmationPending(Option<UserSnapshot>),
}

/// Session lifecycle notifications
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SignedIn,
    Refreshed { expires_at: i64 },
    SignedOut,
    /// Credentials purged; route the user to sign-in
    ReauthRequired { reason: String },
}

/// Redacted token prefix for logs
pub fn token_preview(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    &token[..end]
}
