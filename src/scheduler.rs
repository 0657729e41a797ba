//! Proactive token refresh.
//!
//! A background task that checks the refresh window immediately on start and
//! then on a fixed cadence, renewing the access token before requests start
//! failing with 401. Failures are logged and swallowed; the reactive path in
//! the HTTP client covers anything this task misses.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::auth::SessionManager;

/// Default check cadence: 5 minutes
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Handle to the running refresh task
pub struct RefreshScheduler {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RefreshScheduler {
    /// Spawn the refresh task. The first check runs immediately.
    pub fn start(session: Arc<SessionManager>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::debug!(interval_secs = interval.as_secs(), "Refresh scheduler started");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => run_tick(&session).await,
                }
            }

            tracing::debug!("Refresh scheduler stopped");
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Whether the background task is still alive
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop the task and wait for it to exit
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::error!("Refresh scheduler task failed: {}", e);
                }
            }
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// One scheduler tick: refresh if inside the window
pub async fn run_tick(session: &SessionManager) {
    if !session.should_refresh().await {
        tracing::trace!("Token outside refresh window");
        return;
    }

    match session.refresh_proactively().await {
        Ok(Some(_)) => tracing::info!("Proactive token refresh complete"),
        Ok(None) => tracing::debug!("Proactive refresh not needed"),
        Err(e) => tracing::warn!("Proactive token refresh failed: {}", e),
    }
}
