// Token refresh call against the cr-engine auth endpoint

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;

use super::normalize;
use super::types::{token_preview, RefreshRequest, RefreshResponse, SessionGrant};

pub const REFRESH_PATH: &str = "/auth/refresh";

/// Build the refresh URL for a base address
fn refresh_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), REFRESH_PATH)
}

/// Exchange a refresh token for a new session grant
pub async fn refresh_session(
    client: &Client,
    base_url: &str,
    refresh_token: &str,
) -> Result<SessionGrant> {
    let url = refresh_url(base_url);
    tracing::debug!(url = %url, "Refreshing access token");

    let response = client
        .post(&url)
        .json(&RefreshRequest { refresh_token })
        .send()
        .await
        .context("Failed to send refresh request")?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(
            status = status.as_u16(),
            body = %error_text,
            "Token refresh rejected"
        );
        anyhow::bail!("Token refresh failed: {} - {}", status, error_text);
    }

    let data: RefreshResponse = response
        .json()
        .await
        .context("Failed to parse refresh response")?;

    if data.access_token.is_empty() {
        anyhow::bail!("Refresh response does not contain access_token");
    }

    let grant = normalize::refresh_grant(data, Utc::now().timestamp());

    tracing::info!(
        token = token_preview(&grant.access_token),
        expires_at = grant.expires_at,
        rotated = grant.refresh_token.is_some(),
        "Access token refreshed"
    );

    Ok(grant)
}
