use anyhow::{Context, Result as AnyResult};
use chrono::Utc;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::normalize;
use crate::auth::{CredentialRecord, SessionManager, SignUpOutcome, REFRESH_PATH};
use crate::error::{extract_error_message, network_error, ClientError, Result};

pub const SIGNIN_PATH: &str = "/auth/signin";
pub const SIGNUP_PATH: &str = "/auth/signup";

/// Endpoints whose 401 must never trigger a refresh
const NO_REFRESH_PATHS: [&str; 3] = [SIGNIN_PATH, SIGNUP_PATH, REFRESH_PATH];

/// Per-request options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Send without credentials and never refresh on 401
    pub skip_auth: bool,
}

impl RequestOptions {
    pub fn skip_auth() -> Self {
        Self { skip_auth: true }
    }
}

/// Request path rooted at `/`, whatever form the caller passed
pub fn rooted_path(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

/// Whether `path` targets one of the credential endpoints.
/// Leading and trailing slashes, query and fragment are ignored.
pub fn is_auth_endpoint(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let path = path.trim_matches('/');
    NO_REFRESH_PATHS
        .iter()
        .any(|p| p.trim_start_matches('/') == path)
}

/// Retry decision for a failed response.
/// Only a 401 on an authenticated, not yet retried, non-auth request
/// qualifies.
pub fn should_retry_unauthorized(
    status: u16,
    options: RequestOptions,
    already_retried: bool,
    path: &str,
) -> bool {
    status == 401 && !options.skip_auth && !already_retried && !is_auth_endpoint(path)
}

/// Pooled client with the configured timeouts (seconds). Shared by the
/// request path and the session manager's refresh calls.
pub fn build_http_client(
    max_connections: usize,
    connect_timeout: u64,
    request_timeout: u64,
) -> AnyResult<Client> {
    Client::builder()
        .pool_max_idle_per_host(max_connections)
        .connect_timeout(Duration::from_secs(connect_timeout))
        .timeout(Duration::from_secs(request_timeout))
        .build()
        .context("Failed to create HTTP client")
}

/// Decode a success body: empty -> null, JSON -> value, anything else -> string
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// HTTP client for cr-engine with bearer attach and retry-once-on-401
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Session manager (credentials + refresh)
    session: Arc<SessionManager>,
}

impl ApiClient {
    /// Create a new client. Timeouts are in seconds.
    pub fn new(
        session: Arc<SessionManager>,
        max_connections: usize,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> AnyResult<Self> {
        let client = build_http_client(max_connections, connect_timeout, request_timeout)?;
        Ok(Self::with_client(session, client))
    }

    /// Create a client around an existing `reqwest::Client`
    pub fn with_client(session: Arc<SessionManager>, client: Client) -> Self {
        Self { client, session }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        let base = self.session.base_url().trim_end_matches('/');
        format!("{}{}", base, rooted_path(path))
    }

    /// Issue a request against the configured base address.
    ///
    /// Attaches the bearer token unless `skip_auth` is set. A 401 on an
    /// eligible request triggers one (single-flight) refresh and one replay;
    /// every other failure is returned as-is.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: RequestOptions,
    ) -> Result<Value> {
        let path = rooted_path(path);
        let path = path.as_str();

        let bearer = if options.skip_auth {
            None
        } else {
            Some(self.session.bearer().await)
        };

        let mut token = bearer.as_ref().and_then(|b| b.token.clone());
        let mut already_retried = false;

        loop {
            match self.dispatch(&method, path, body, token.as_deref()).await {
                Err(ClientError::Upstream {
                    status, message, ..
                }) if should_retry_unauthorized(status, options, already_retried, path) => {
                    let generation = bearer.as_ref().map(|b| b.generation).unwrap_or_default();
                    let fresh = self
                        .session
                        .refresh_after_unauthorized(generation, &message)
                        .await?;

                    tracing::info!(
                        method = %method,
                        path = %path,
                        "Replaying request with refreshed token"
                    );

                    token = Some(fresh);
                    already_retried = true;
                }
                other => return other,
            }
        }
    }

    /// Typed variant of [`ApiClient::request`]
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: RequestOptions,
    ) -> Result<T> {
        let value = self.request(method, path, body, options).await?;
        serde_json::from_value(value).map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        self.request(Method::GET, path, None, RequestOptions::default())
            .await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.request(Method::POST, path, Some(body), RequestOptions::default())
            .await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Value> {
        self.request(Method::PUT, path, Some(body), RequestOptions::default())
            .await
    }

    pub async fn patch(&self, path: &str, body: &Value) -> Result<Value> {
        self.request(Method::PATCH, path, Some(body), RequestOptions::default())
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.request(Method::DELETE, path, None, RequestOptions::default())
            .await
    }

    /// Single HTTP exchange, no retry
    async fn dispatch(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<Value> {
        let url = self.url(path);

        let mut builder = self.client.request(method.clone(), &url);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        tracing::debug!(
            method = %method,
            url = %url,
            authenticated = token.is_some(),
            "Sending HTTP request"
        );

        let response = builder.send().await.map_err(|e| {
            let err = network_error(&e);
            tracing::warn!(url = %url, error = %e, "HTTP request error");
            err
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| network_error(&e))?;

        if status.is_success() {
            tracing::debug!(status = %status, "Request successful");
            return Ok(parse_body(&text));
        }

        let payload = serde_json::from_str::<Value>(&text).ok();
        let message = payload
            .as_ref()
            .and_then(extract_error_message)
            .unwrap_or_else(|| {
                if text.trim().is_empty() {
                    status.canonical_reason().unwrap_or_default().to_string()
                } else {
                    text.clone()
                }
            });

        tracing::warn!(
            status = status.as_u16(),
            url = %url,
            message = %message,
            "Received error response"
        );

        Err(ClientError::Upstream {
            status: status.as_u16(),
            message,
            body: payload,
        })
    }

    /// Sign in with email and password and establish the session
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<CredentialRecord> {
        let body = serde_json::json!({ "email": email, "password": password });
        let value = self
            .request(Method::POST, SIGNIN_PATH, Some(&body), RequestOptions::skip_auth())
            .await?;

        let grant = normalize::session_grant(&value, Utc::now().timestamp()).ok_or_else(|| {
            ClientError::Decode("Sign-in response does not contain a token".to_string())
        })?;

        self.session.establish(grant).await
    }

    /// Create an account. The server may issue a session right away or wait
    /// for email confirmation.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> Result<SignUpOutcome> {
        let mut body = serde_json::json!({ "email": email, "password": password });
        if !metadata.is_null() {
            body["metadata"] = metadata;
        }

        let value = self
            .request(Method::POST, SIGNUP_PATH, Some(&body), RequestOptions::skip_auth())
            .await?;

        match normalize::session_grant(&value, Utc::now().timestamp()) {
            Some(grant) => Ok(SignUpOutcome::SignedIn(self.session.establish(grant).await?)),
            None => {
                tracing::info!("Sign-up accepted, confirmation pending");
                Ok(SignUpOutcome::ConfirmationPending(normalize::signup_user(
                    &value,
                )))
            }
        }
    }

    /// Local sign-out: purge credentials and the cookie mirror
    pub async fn sign_out(&self) {
        self.session.sign_out().await;
    }

    /// Request a widget API key from `path`
    pub async fn issue_widget_key(&self, path: &str) -> Result<String> {
        let value = self
            .request(Method::POST, path, None, RequestOptions::default())
            .await?;

        normalize::widget_api_key(&value).ok_or_else(|| {
            ClientError::Decode("Widget key response does not contain a key".to_string())
        })
    }
}
