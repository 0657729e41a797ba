// Auth cookie mirror
// Keeps an `auth_token` cookie in step with the credential record so the
// server-side route guard can tell signed-in visitors apart.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Mutex;

pub const AUTH_COOKIE_NAME: &str = "auth_token";

/// Cookie lifetime: 30 days
pub const AUTH_COOKIE_MAX_AGE: u64 = 2_592_000;

/// `Set-Cookie` value carrying the access token
pub fn auth_cookie(token: &str) -> String {
    format!(
        "{}={}; path=/; max-age={}; SameSite=Lax",
        AUTH_COOKIE_NAME, token, AUTH_COOKIE_MAX_AGE
    )
}

/// `Set-Cookie` value that deletes the auth cookie
pub fn expired_auth_cookie() -> String {
    format!("{}=; path=/; max-age=0; SameSite=Lax", AUTH_COOKIE_NAME)
}

/// Find the auth token in a `Cookie` request header
pub fn auth_token_from_cookie_header(header: &str) -> Option<&str> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name.trim() == AUTH_COOKIE_NAME && !value.trim().is_empty()).then(|| value.trim())
    })
}

/// Destination for the mirrored cookie
pub trait SessionMirror: Send + Sync {
    /// Publish the current access token
    fn publish(&self, token: &str) -> Result<()>;

    /// Expire the cookie
    fn clear(&self) -> Result<()>;
}

/// In-memory cookie jar holding the last `Set-Cookie` value written
#[derive(Debug, Default)]
pub struct CookieJar {
    current: Mutex<Option<String>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last `Set-Cookie` value, if any
    pub fn set_cookie(&self) -> Option<String> {
        self.current.lock().ok().and_then(|c| c.clone())
    }

    /// Token currently carried by the cookie
    pub fn token(&self) -> Option<String> {
        let cookie = self.set_cookie()?;
        auth_token_from_cookie_header(&cookie).map(str::to_string)
    }

    fn replace(&self, value: String) -> Result<()> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| anyhow::anyhow!("Cookie jar lock poisoned"))?;
        *current = Some(value);
        Ok(())
    }
}

impl SessionMirror for CookieJar {
    fn publish(&self, token: &str) -> Result<()> {
        self.replace(auth_cookie(token))
    }

    fn clear(&self) -> Result<()> {
        self.replace(expired_auth_cookie())
    }
}

/// Writes the `Set-Cookie` line to a file for a companion process to pick up
#[derive(Debug)]
pub struct CookieFile {
    path: PathBuf,
}

impl CookieFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn write(&self, line: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, line)
            .with_context(|| format!("Failed to write cookie file: {}", self.path.display()))
    }
}

impl SessionMirror for CookieFile {
    fn publish(&self, token: &str) -> Result<()> {
        self.write(&auth_cookie(token))
    }

    fn clear(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        self.write(&expired_auth_cookie())
    }
}
