use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};

use super::mirror::SessionMirror;
use super::refresh;
use super::store::CredentialStore;
use super::types::{token_preview, CredentialRecord, SessionEvent, SessionGrant};
use crate::error::ClientError;

/// Default proactive refresh window in seconds
pub const DEFAULT_REFRESH_THRESHOLD: u64 = 300;

const EVENT_CAPACITY: usize = 16;

/// Credential record plus a counter bumped on every mutation
#[derive(Debug, Default)]
struct SessionState {
    record: Option<CredentialRecord>,
    generation: u64,
}

/// Token to attach to an outgoing request, tagged with the session
/// generation it was read under
#[derive(Debug, Clone, PartialEq)]
pub struct Bearer {
    pub token: Option<String>,
    pub generation: u64,
}

/// How a purge is reported to subscribers
enum Purge {
    SignOut,
    Reauth(String),
}

/// True iff an expiry is known and `0 < expires_at - now <= threshold`
pub fn in_refresh_window(expires_at: Option<i64>, now: i64, threshold: i64) -> bool {
    match expires_at {
        None => false,
        Some(exp) => {
            let remaining = exp - now;
            remaining > 0 && remaining <= threshold
        }
    }
}

/// Session manager
/// Owns the credential record, serializes every write to it and runs at most
/// one refresh at a time
pub struct SessionManager {
    /// Cached credential state (write-through to `store`)
    state: RwLock<SessionState>,

    /// Persistent credential store
    store: Arc<dyn CredentialStore>,

    /// Cookie mirror for server-side route guarding
    mirror: Arc<dyn SessionMirror>,

    /// HTTP client for refresh requests
    client: Client,

    /// cr-engine base address
    base_url: String,

    /// Proactive refresh window in seconds
    refresh_threshold: i64,

    /// Single-flight guard: held for the whole duration of a refresh
    refresh_lock: Mutex<()>,

    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    /// Create a session manager, loading any persisted credentials.
    /// Refresh calls go through a standalone client with a 30 s timeout;
    /// use [`SessionManager::with_client`] to share a configured one.
    pub fn new(
        base_url: impl Into<String>,
        store: Arc<dyn CredentialStore>,
        mirror: Arc<dyn SessionMirror>,
        refresh_threshold: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Self::with_client(base_url, store, mirror, refresh_threshold, client)
    }

    /// Create a session manager that refreshes through `client`
    pub fn with_client(
        base_url: impl Into<String>,
        store: Arc<dyn CredentialStore>,
        mirror: Arc<dyn SessionMirror>,
        refresh_threshold: u64,
        client: Client,
    ) -> Result<Self> {
        let record = store
            .load_record()
            .context("Failed to load stored credentials")?;

        match &record {
            Some(r) => tracing::info!(
                token = token_preview(&r.access_token),
                expires_at = r.expires_at,
                "Loaded stored session"
            ),
            None => tracing::debug!("No stored session"),
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            state: RwLock::new(SessionState {
                record,
                generation: 0,
            }),
            store,
            mirror,
            client,
            base_url: base_url.into(),
            refresh_threshold: refresh_threshold as i64,
            refresh_lock: Mutex::new(()),
            events,
        })
    }

    /// cr-engine base address
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Subscribe to session lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Copy of the current credential record
    pub async fn snapshot(&self) -> Option<CredentialRecord> {
        self.state.read().await.record.clone()
    }

    /// Current access token, if signed in
    pub async fn access_token(&self) -> Option<String> {
        self.state
            .read()
            .await
            .record
            .as_ref()
            .map(|r| r.access_token.clone())
    }

    /// Current token together with the generation it belongs to
    pub async fn bearer(&self) -> Bearer {
        let state = self.state.read().await;
        Bearer {
            token: state
                .record
                .as_ref()
                .map(|r| r.access_token.clone())
                .filter(|t| !t.is_empty()),
            generation: state.generation,
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.record.is_some()
    }

    /// Whether the token is inside the proactive refresh window
    pub async fn should_refresh(&self) -> bool {
        self.should_refresh_at(Utc::now().timestamp()).await
    }

    pub async fn should_refresh_at(&self, now: i64) -> bool {
        let state = self.state.read().await;
        in_refresh_window(
            state.record.as_ref().map(|r| r.expires_at),
            now,
            self.refresh_threshold,
        )
    }

    /// Install a freshly issued session (sign-in / sign-up)
    pub async fn establish(&self, grant: SessionGrant) -> Result<CredentialRecord, ClientError> {
        let _flight = self.refresh_lock.lock().await;
        let record = self.apply_grant(grant, None).await?;

        tracing::info!(
            token = token_preview(&record.access_token),
            user = record.user.as_ref().map(|u| u.id.as_str()).unwrap_or("-"),
            "Signed in"
        );
        self.emit(SessionEvent::SignedIn);
        Ok(record)
    }

    /// Drop all credentials and the cookie mirror
    pub async fn sign_out(&self) {
        let _flight = self.refresh_lock.lock().await;
        self.purge(Purge::SignOut).await;
        tracing::info!("Signed out");
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// `Ok(None)` when no refresh token is stored (no network call is made).
    /// On failure, including a grant that cannot be persisted, the session
    /// is purged and `ReauthRequired` is emitted.
    pub async fn refresh_access_token(&self) -> Result<Option<String>, ClientError> {
        let _flight = self.refresh_lock.lock().await;

        let Some(refresh_token) = self.current_refresh_token().await else {
            tracing::debug!("No refresh token stored, skipping refresh");
            return Ok(None);
        };

        match refresh::refresh_session(&self.client, &self.base_url, &refresh_token).await {
            Ok(grant) => match self.commit_refresh(grant, refresh_token).await {
                Ok(record) => Ok(Some(record.access_token)),
                Err(message) => Err(ClientError::AuthExpired {
                    status: 401,
                    message,
                }),
            },
            Err(e) => {
                tracing::error!("Token refresh failed: {:#}", e);
                self.purge(Purge::Reauth(e.to_string())).await;
                Err(ClientError::AuthExpired {
                    status: 401,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Reactive refresh after a 401.
    ///
    /// `observed_generation` is the generation the rejected request was sent
    /// under. Callers queue on the single-flight guard; whoever arrives after
    /// credentials changed reuses the outcome instead of refreshing again.
    pub async fn refresh_after_unauthorized(
        &self,
        observed_generation: u64,
        original_message: &str,
    ) -> Result<String, ClientError> {
        let _flight = self.refresh_lock.lock().await;

        {
            let state = self.state.read().await;
            if state.generation != observed_generation {
                return match &state.record {
                    Some(record) => {
                        tracing::debug!(
                            observed = observed_generation,
                            current = state.generation,
                            "Credentials changed since dispatch, reusing current token"
                        );
                        Ok(record.access_token.clone())
                    }
                    // Someone else's refresh failed and already signalled
                    None => Err(ClientError::AuthExpired {
                        status: 401,
                        message: original_message.to_string(),
                    }),
                };
            }
        }

        let Some(refresh_token) = self.current_refresh_token().await else {
            tracing::warn!("Received 401 with no refresh token stored");
            self.purge(Purge::Reauth("no refresh token".to_string()))
                .await;
            return Err(ClientError::RefreshUnavailable {
                status: 401,
                message: original_message.to_string(),
            });
        };

        tracing::warn!("Received 401, refreshing access token");

        match refresh::refresh_session(&self.client, &self.base_url, &refresh_token).await {
            Ok(grant) => match self.commit_refresh(grant, refresh_token).await {
                Ok(record) => Ok(record.access_token),
                Err(_) => Err(ClientError::AuthExpired {
                    status: 401,
                    message: original_message.to_string(),
                }),
            },
            Err(e) => {
                tracing::error!("Reactive token refresh failed: {:#}", e);
                self.purge(Purge::Reauth(e.to_string())).await;
                Err(ClientError::AuthExpired {
                    status: 401,
                    message: original_message.to_string(),
                })
            }
        }
    }

    /// Proactive refresh used by the scheduler.
    ///
    /// Re-checks the window under the guard, so a refresh that completed
    /// while waiting is not repeated. Failures, including a grant that could
    /// not be persisted, leave credentials untouched.
    pub async fn refresh_proactively(&self) -> Result<Option<String>, ClientError> {
        let _flight = self.refresh_lock.lock().await;

        if !self.should_refresh().await {
            return Ok(None);
        }

        let Some(refresh_token) = self.current_refresh_token().await else {
            return Ok(None);
        };

        let grant = refresh::refresh_session(&self.client, &self.base_url, &refresh_token).await?;
        let record = self.apply_grant(grant, Some(refresh_token)).await?;
        self.emit(SessionEvent::Refreshed {
            expires_at: record.expires_at,
        });
        Ok(Some(record.access_token))
    }

    async fn current_refresh_token(&self) -> Option<String> {
        self.state
            .read()
            .await
            .record
            .as_ref()
            .and_then(|r| r.refresh_token.clone())
            .filter(|t| !t.is_empty())
    }

    /// Replace the record wholesale. A grant without a refresh token keeps
    /// `previous_refresh`.
    ///
    /// All or nothing: if either the store or the cookie mirror rejects the
    /// write, the store is restored to the previous record and the in-memory
    /// session is left as it was.
    async fn apply_grant(
        &self,
        grant: SessionGrant,
        previous_refresh: Option<String>,
    ) -> Result<CredentialRecord, ClientError> {
        let record = CredentialRecord {
            access_token: grant.access_token,
            expires_at: grant.expires_at,
            refresh_token: grant.refresh_token.or(previous_refresh),
            user: grant.user,
        };

        let mut state = self.state.write().await;

        let previous = state.record.clone();
        let staged = record.clone();
        self.credential_io(move |store, mirror| {
            store.save_record(&staged)?;
            if let Err(e) = mirror.publish(&staged.access_token) {
                let restored = match &previous {
                    Some(p) => store.save_record(p),
                    None => store.clear_record(),
                };
                if let Err(re) = restored {
                    tracing::error!("Failed to restore credential store: {:#}", re);
                }
                return Err(e.context("Failed to publish auth cookie"));
            }
            Ok(())
        })
        .await
        .map_err(|e| ClientError::Store(format!("{:#}", e)))?;

        state.record = Some(record.clone());
        state.generation += 1;

        Ok(record)
    }

    /// Persist a refreshed grant. A grant that cannot be persisted counts as
    /// a failed refresh: the rotated refresh token is lost, so the session
    /// is purged.
    async fn commit_refresh(
        &self,
        grant: SessionGrant,
        previous_refresh: String,
    ) -> Result<CredentialRecord, String> {
        match self.apply_grant(grant, Some(previous_refresh)).await {
            Ok(record) => {
                self.emit(SessionEvent::Refreshed {
                    expires_at: record.expires_at,
                });
                Ok(record)
            }
            Err(e) => {
                tracing::error!("Failed to persist refreshed credentials: {}", e);
                self.purge(Purge::Reauth(e.to_string())).await;
                Err(e.to_string())
            }
        }
    }

    /// Remove every credential. Storage failures are logged; the in-memory
    /// session is dropped regardless.
    async fn purge(&self, purge: Purge) {
        let mut state = self.state.write().await;

        let cleared = self
            .credential_io(|store, mirror| {
                if let Err(e) = store.clear_record() {
                    tracing::error!("Failed to clear credential store: {:#}", e);
                }
                if let Err(e) = mirror.clear() {
                    tracing::error!("Failed to clear auth cookie: {:#}", e);
                }
                Ok(())
            })
            .await;
        if let Err(e) = cleared {
            tracing::error!("Credential cleanup failed: {:#}", e);
        }

        state.record = None;
        state.generation += 1;
        drop(state);

        match purge {
            Purge::SignOut => self.emit(SessionEvent::SignedOut),
            Purge::Reauth(reason) => {
                tracing::warn!(reason = %reason, "Session purged, sign-in required");
                self.emit(SessionEvent::ReauthRequired { reason });
            }
        }
    }

    /// Run store and mirror I/O on the blocking pool
    async fn credential_io<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn CredentialStore, &dyn SessionMirror) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let mirror = Arc::clone(&self.mirror);
        tokio::task::spawn_blocking(move || f(store.as_ref(), mirror.as_ref()))
            .await
            .context("Credential I/O task failed")?
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
