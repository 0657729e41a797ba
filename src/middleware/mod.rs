// Route guard middleware
// Reads the mirrored `auth_token` cookie and keeps signed-out visitors away
// from dashboard pages (and signed-in visitors away from the auth pages)

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;

use crate::auth::mirror::auth_token_from_cookie_header;

/// Which paths are open and where to send people
#[derive(Debug, Clone)]
pub struct GuardPolicy {
    /// Exact paths or `prefix/*` patterns reachable without a session
    pub public_paths: Vec<String>,
    /// Sign-in / sign-up pages; signed-in visitors are sent home
    pub auth_pages: Vec<String>,
    pub sign_in_path: String,
    pub home_path: String,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            public_paths: vec![
                "/".to_string(),
                "/signin".to_string(),
                "/signup".to_string(),
                "/pricing".to_string(),
                "/auth/*".to_string(),
                "/widget/*".to_string(),
            ],
            auth_pages: vec!["/signin".to_string(), "/signup".to_string()],
            sign_in_path: "/signin".to_string(),
            home_path: "/dashboard".to_string(),
        }
    }
}

/// Outcome of a guard check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect(String),
}

fn matches_pattern(path: &str, pattern: &str) -> bool {
    match pattern.strip_suffix("/*") {
        Some(prefix) => path == prefix || path.starts_with(&format!("{}/", prefix)),
        None => path == pattern,
    }
}

impl GuardPolicy {
    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| matches_pattern(path, p))
    }

    pub fn is_auth_page(&self, path: &str) -> bool {
        self.auth_pages.iter().any(|p| matches_pattern(path, p))
    }

    /// Decide what to do with a page request
    pub fn decide(&self, path: &str, authenticated: bool) -> GuardDecision {
        let path = match path.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };

        if authenticated && self.is_auth_page(path) {
            return GuardDecision::Redirect(self.home_path.clone());
        }

        if !authenticated && !self.is_public(path) {
            return GuardDecision::Redirect(format!(
                "{}?redirect={}",
                self.sign_in_path,
                encode_query_value(path)
            ));
        }

        GuardDecision::Allow
    }
}

/// Minimal percent-encoding for a path placed in a query value
fn encode_query_value(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}

/// Route guard middleware
///
/// A non-empty `auth_token` cookie counts as signed in; token validity is
/// left to cr-engine.
pub async fn route_guard(
    State(policy): State<Arc<GuardPolicy>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let authenticated = request
        .headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|cookies| auth_token_from_cookie_header(cookies).is_some());

    let path = request.uri().path().to_string();

    match policy.decide(&path, authenticated) {
        GuardDecision::Allow => next.run(request).await,
        GuardDecision::Redirect(target) => {
            tracing::debug!(path = %path, target = %target, authenticated, "Route guard redirect");
            Redirect::temporary(&target).into_response()
        }
    }
}
