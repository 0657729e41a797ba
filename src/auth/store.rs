// Credential persistence
// Key-value stores backing the credential record

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::types::{CredentialRecord, UserSnapshot};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const EXPIRES_AT_KEY: &str = "expires_at";
pub const USER_KEY: &str = "user";

/// All keys owned by the credential record
pub const CREDENTIAL_KEYS: [&str; 4] = [
    ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
    EXPIRES_AT_KEY,
    USER_KEY,
];

/// Key-value credential store.
///
/// Implementors only need `get`/`set`/`remove`; the record-level methods can
/// be overridden when the backend can write several keys in one step.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;

    /// Load the record. Yields `None` unless both the access token and a
    /// parseable expiry are present.
    fn load_record(&self) -> Result<Option<CredentialRecord>> {
        let mut entries = HashMap::new();
        for key in CREDENTIAL_KEYS {
            if let Some(value) = self.get(key)? {
                entries.insert(key.to_string(), value);
            }
        }

        Ok(record_from_entries(&entries))
    }

    /// Overwrite every credential key. Keys with no value are removed so no
    /// stale field survives.
    fn save_record(&self, record: &CredentialRecord) -> Result<()> {
        for (key, value) in record_to_entries(record)? {
            match value {
                Some(v) => self.set(key, &v)?,
                None => self.remove(key)?,
            }
        }
        Ok(())
    }

    /// Remove every credential key
    fn clear_record(&self) -> Result<()> {
        for key in CREDENTIAL_KEYS {
            self.remove(key)?;
        }
        Ok(())
    }
}

/// Serialize a record into `(key, value)` pairs
fn record_to_entries(record: &CredentialRecord) -> Result<Vec<(&'static str, Option<String>)>> {
    let user = record
        .user
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("Failed to serialize user snapshot")?;

    Ok(vec![
        (ACCESS_TOKEN_KEY, Some(record.access_token.clone())),
        (EXPIRES_AT_KEY, Some(record.expires_at.to_string())),
        (REFRESH_TOKEN_KEY, record.refresh_token.clone()),
        (USER_KEY, user),
    ])
}

fn record_from_entries(entries: &HashMap<String, String>) -> Option<CredentialRecord> {
    let access_token = entries.get(ACCESS_TOKEN_KEY).filter(|t| !t.is_empty())?;
    let expires_at = entries.get(EXPIRES_AT_KEY)?.trim().parse::<i64>().ok()?;

    // Unreadable user snapshots are dropped; they are advisory only
    let user = entries
        .get(USER_KEY)
        .and_then(|raw| serde_json::from_str::<UserSnapshot>(raw).ok());

    Some(CredentialRecord {
        access_token: access_token.clone(),
        expires_at,
        refresh_token: entries.get(REFRESH_TOKEN_KEY).cloned(),
        user,
    })
}

/// In-memory store, used by tests and short-lived sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn save_record(&self, record: &CredentialRecord) -> Result<()> {
        let entries = record_to_entries(record)?;
        let mut map = self.lock()?;
        for (key, value) in entries {
            match value {
                Some(v) => map.insert(key.to_string(), v),
                None => map.remove(key),
            };
        }
        Ok(())
    }
}

/// JSON file store (`{ "access_token": "...", ... }`), written atomically
/// via a temp file and rename. Permissions are 0600 on Unix.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within the process
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<HashMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(data) if data.trim().is_empty() => Ok(HashMap::new()),
            Ok(data) => serde_json::from_str(&data).with_context(|| {
                format!("Failed to parse credentials file: {}", self.path.display())
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to read credentials file: {}", self.path.display())
            }),
        }
    }

    fn write_map(&self, map: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
        }

        let data = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)
            .with_context(|| format!("Failed to write credentials file: {}", tmp.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut HashMap<String, String>),
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential file lock poisoned"))?;
        let mut map = self.read_map()?;
        f(&mut map);
        self.write_map(&map)
    }
}

impl CredentialStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_map()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|map| {
            map.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        self.update(|map| {
            map.remove(key);
        })
    }

    fn load_record(&self) -> Result<Option<CredentialRecord>> {
        Ok(record_from_entries(&self.read_map()?))
    }

    fn save_record(&self, record: &CredentialRecord) -> Result<()> {
        let entries = record_to_entries(record)?;
        self.update(|map| {
            for (key, value) in entries {
                match value {
                    Some(v) => map.insert(key.to_string(), v),
                    None => map.remove(key),
                };
            }
        })
    }

    fn clear_record(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        self.update(|map| {
            for key in CREDENTIAL_KEYS {
                map.remove(key);
            }
        })
    }
}
