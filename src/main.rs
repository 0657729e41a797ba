use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use dialoguer::Password;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;

use cr_dashboard::auth::{
    token_preview, CookieFile, CookieJar, FileStore, SessionEvent, SessionManager,
    SessionMirror, SignUpOutcome,
};
use cr_dashboard::config::{Command, Config};
use cr_dashboard::error::ClientError;
use cr_dashboard::http_client::{build_http_client, ApiClient, RequestOptions};
use cr_dashboard::scheduler::RefreshScheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let (config, command) = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(
        base_url = %config.api_base_url,
        credentials = %config.credentials_file.display(),
        "Configuration loaded"
    );

    let client = build_client(&config)?;

    match command {
        Command::Signin { email, password } => {
            let password = password_or_prompt(password)?;
            let record = client
                .sign_in(&email, &password)
                .await
                .map_err(report)?;
            println!(
                "Signed in as {}",
                record
                    .user
                    .as_ref()
                    .and_then(|u| u.email.as_deref())
                    .unwrap_or(&email)
            );
        }

        Command::Signup {
            email,
            password,
            metadata,
        } => {
            let password = password_or_prompt(password)?;
            let metadata = match metadata {
                Some(raw) => serde_json::from_str(&raw).context("--metadata must be valid JSON")?,
                None => serde_json::Value::Null,
            };
            match client
                .sign_up(&email, &password, metadata)
                .await
                .map_err(report)?
            {
                SignUpOutcome::SignedIn(_) => println!("Account created, signed in as {}", email),
                SignUpOutcome::ConfirmationPending(_) => {
                    println!("Account created. Check {} to confirm it.", email)
                }
            }
        }

        Command::Signout => {
            client.sign_out().await;
            println!("Signed out");
        }

        Command::Status => print_status(client.session()).await,

        Command::Refresh => match client
            .session()
            .refresh_access_token()
            .await
            .map_err(report)?
        {
            Some(token) => println!("Refreshed (token: {}...)", token_preview(&token)),
            None => println!("No refresh token stored; sign in first"),
        },

        Command::Request {
            method,
            path,
            data,
            skip_auth,
        } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method: {}", method))?;
            let body = data
                .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
                .transpose()
                .context("--data must be valid JSON")?;

            let value = client
                .request(method, &path, body.as_ref(), RequestOptions { skip_auth })
                .await
                .map_err(report)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }

        Command::WidgetKey { path } => {
            let key = client.issue_widget_key(&path).await.map_err(report)?;
            println!("{}", key);
        }

        Command::Watch => watch(client.session().clone(), &config).await?,
    }

    Ok(())
}

/// Wire store, cookie mirror, session manager and HTTP client together
fn build_client(config: &Config) -> Result<ApiClient> {
    let store = Arc::new(FileStore::new(config.credentials_file.clone()));
    let mirror: Arc<dyn SessionMirror> = match &config.cookie_file {
        Some(path) => Arc::new(CookieFile::new(path.clone())),
        None => Arc::new(CookieJar::new()),
    };

    let http = build_http_client(
        config.http_max_connections,
        config.http_connect_timeout,
        config.http_request_timeout,
    )?;

    let session = Arc::new(SessionManager::with_client(
        config.api_base_url.clone(),
        store,
        mirror,
        config.token_refresh_threshold,
        http.clone(),
    )?);

    Ok(ApiClient::with_client(session, http))
}

fn password_or_prompt(password: Option<String>) -> Result<String> {
    match password {
        Some(p) => Ok(p),
        None => Password::new()
            .with_prompt("Password")
            .interact()
            .context("Failed to read password"),
    }
}

/// Turn a client error into a CLI error with the text a user should see
fn report(e: ClientError) -> anyhow::Error {
    tracing::debug!("Request failed: {:?}", e);
    if e.requires_reauth() {
        anyhow::anyhow!("{} Run `cr-dashboard signin`.", e.user_message())
    } else {
        anyhow::anyhow!(e.user_message())
    }
}

async fn print_status(session: &SessionManager) {
    let Some(record) = session.snapshot().await else {
        println!("Not signed in");
        return;
    };

    let now = Utc::now().timestamp();
    let expires = Utc
        .timestamp_opt(record.expires_at, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| record.expires_at.to_string());

    println!("Signed in");
    if let Some(user) = &record.user {
        println!("  User:        {}", user.email.as_deref().unwrap_or(&user.id));
    }
    println!("  Token:       {}...", token_preview(&record.access_token));
    println!(
        "  Expires:     {} ({}s)",
        expires,
        record.seconds_remaining(now)
    );
    println!(
        "  Refresh:     {}",
        if record.refresh_token.is_some() {
            "available"
        } else {
            "none"
        }
    );
    println!(
        "  Due soon:    {}",
        if session.should_refresh_at(now).await {
            "yes"
        } else {
            "no"
        }
    );
}

/// Run the proactive scheduler until Ctrl+C or until the session is lost
async fn watch(session: Arc<SessionManager>, config: &Config) -> Result<()> {
    if !session.is_authenticated().await {
        anyhow::bail!("Not signed in. Run `cr-dashboard signin` first.");
    }

    let mut events = session.subscribe();
    let scheduler = RefreshScheduler::start(
        session.clone(),
        Duration::from_secs(config.token_refresh_interval),
    );
    tracing::info!(
        interval_secs = config.token_refresh_interval,
        "Watching session, press Ctrl+C to stop"
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Ok(SessionEvent::Refreshed { expires_at }) => {
                    tracing::info!(expires_at, "Session refreshed");
                }
                Ok(SessionEvent::ReauthRequired { reason }) => {
                    tracing::warn!(reason = %reason, "Session lost");
                    scheduler.stop().await;
                    anyhow::bail!("Session expired. Run `cr-dashboard signin`.");
                }
                Ok(SessionEvent::SignedOut) => {
                    scheduler.stop().await;
                    println!("Signed out");
                    return Ok(());
                }
                Ok(SessionEvent::SignedIn) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Missed session events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    scheduler.stop().await;
    tracing::info!("👋 Watch stopped");
    Ok(())
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down...");
        },
    }
}
