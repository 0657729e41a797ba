// Boundary normalization of upstream auth payloads
//
// cr-engine and the auth provider in front of it do not agree on field
// names (`token` vs `access_token`, `apiKey` vs `api_key` vs `key`). All of
// that guesswork is confined to this file.

use serde_json::Value;

use super::types::{
    RefreshResponse, SessionGrant, UserSnapshot, DEFAULT_TOKEN_LIFETIME_SECS,
};

const ACCESS_TOKEN_FIELDS: [&str; 2] = ["access_token", "token"];
const API_KEY_FIELDS: [&str; 3] = ["apiKey", "api_key", "key"];

/// First non-empty string among `fields`, looked up on `value` and on its
/// `session` / `data` envelopes
fn first_string(value: &Value, fields: &[&str]) -> Option<String> {
    let scopes = [Some(value), value.get("session"), value.get("data")];
    scopes.into_iter().flatten().find_map(|scope| {
        fields
            .iter()
            .filter_map(|f| scope.get(*f).and_then(Value::as_str))
            .find(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn first_i64(value: &Value, field: &str) -> Option<i64> {
    let scopes = [Some(value), value.get("session"), value.get("data")];
    scopes
        .into_iter()
        .flatten()
        .find_map(|scope| scope.get(field).and_then(Value::as_i64))
}

fn user_snapshot(value: &Value) -> Option<UserSnapshot> {
    let scopes = [Some(value), value.get("session"), value.get("data")];
    scopes
        .into_iter()
        .flatten()
        .filter_map(|scope| scope.get("user"))
        .find_map(|u| serde_json::from_value::<UserSnapshot>(u.clone()).ok())
}

/// Absolute expiry: explicit `expires_at`, else `now + expires_in`, else the
/// default lifetime
pub fn resolve_expiry(expires_at: Option<i64>, expires_in: Option<i64>, now: i64) -> i64 {
    match (expires_at, expires_in) {
        (Some(at), _) if at > 0 => at,
        (_, Some(secs)) if secs > 0 => now + secs,
        _ => now + DEFAULT_TOKEN_LIFETIME_SECS,
    }
}

/// Normalize a sign-in / sign-up response into a session grant.
/// Returns `None` when the payload carries no access token.
pub fn session_grant(value: &Value, now: i64) -> Option<SessionGrant> {
    let access_token = first_string(value, &ACCESS_TOKEN_FIELDS)?;

    Some(SessionGrant {
        access_token,
        refresh_token: first_string(value, &["refresh_token"]),
        expires_at: resolve_expiry(
            first_i64(value, "expires_at"),
            first_i64(value, "expires_in"),
            now,
        ),
        user: user_snapshot(value),
    })
}

/// User snapshot from a sign-up response that did not issue a session
pub fn signup_user(value: &Value) -> Option<UserSnapshot> {
    user_snapshot(value).or_else(|| serde_json::from_value(value.clone()).ok())
}

/// Normalize a refresh response
pub fn refresh_grant(data: RefreshResponse, now: i64) -> SessionGrant {
    SessionGrant {
        expires_at: resolve_expiry(data.expires_at, data.expires_in, now),
        access_token: data.access_token,
        refresh_token: data.refresh_token,
        user: data.user,
    }
}

/// Widget API key from a key-issuance response
pub fn widget_api_key(value: &Value) -> Option<String> {
    first_string(value, &API_KEY_FIELDS)
}
