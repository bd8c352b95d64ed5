//! Credential storage
//!
//! `CredentialStore` is a typed facade over a dumb key-value surface. It
//! enforces the pair invariant on read: access and refresh tokens are either
//! both present or the session is treated as logged out. Backends never
//! validate anything.
//!
//! The surface is synchronous and infallible. `FileStore` keeps an in-memory
//! copy that stays authoritative when a disk write fails; the failure is
//! logged and the next successful write catches the file up.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::Secret;
use tracing::{debug, info, warn};

use crate::constants::{ACCESS_TOKEN_KEY, PRINCIPAL_KEY, REFRESH_TOKEN_KEY};
use crate::error::{Error, Result};
use crate::principal::Principal;

/// Access + refresh credential. Both halves always travel together.
#[derive(Debug, Clone)]
pub struct CredentialPair {
    access: Secret<String>,
    refresh: Secret<String>,
}

impl CredentialPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: Secret::new(access.into()),
            refresh: Secret::new(refresh.into()),
        }
    }

    /// Bearer token for individual requests.
    pub fn access_token(&self) -> &str {
        self.access.expose()
    }

    /// Token exchanged for a new pair.
    pub fn refresh_token(&self) -> &str {
        self.refresh.expose()
    }
}

/// Persistence medium for session material.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);

    /// Write several keys as one update. Backends that can should make the
    /// whole batch visible at once.
    fn set_many(&self, entries: Vec<(&str, String)>) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-local store. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        lock(&self.entries).insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        lock(&self.entries).remove(key);
    }

    fn set_many(&self, entries: Vec<(&str, String)>) {
        let mut map = lock(&self.entries);
        for (key, value) in entries {
            map.insert(key.to_string(), value);
        }
    }
}

/// JSON object on disk mapping storage keys to string values.
///
/// Every mutation rewrites the whole file with a temp-file + rename so a
/// crash never leaves a torn file. The file is created with 0600 permissions
/// since it holds bearer tokens.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, creating it as `{}` if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let entries: HashMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), keys = entries.len(), "loaded credential file");
            entries
        } else {
            info!(path = %path.display(), "credential file not found, starting empty");
            let entries = HashMap::new();
            write_atomic(&path, &entries)?;
            entries
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) {
        if let Err(e) = write_atomic(&self.path, entries) {
            warn!(path = %self.path.display(), error = %e, "failed to persist credential file");
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        let mut entries = lock(&self.entries);
        entries.insert(key.to_string(), value);
        self.persist(&entries);
    }

    fn remove(&self, key: &str) {
        let mut entries = lock(&self.entries);
        if entries.remove(key).is_some() {
            self.persist(&entries);
        }
    }

    fn set_many(&self, batch: Vec<(&str, String)>) {
        let mut entries = lock(&self.entries);
        for (key, value) in batch {
            entries.insert(key.to_string(), value);
        }
        self.persist(&entries);
    }
}

/// Write the store atomically: temp file in the same directory, then rename.
fn write_atomic(path: &Path, entries: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(entries)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    std::fs::write(&tmp_path, json.as_bytes())
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential file");
    Ok(())
}

/// Typed view over the session keys of a `KeyValueStore`.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Store backed by a fresh `MemoryStore`.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Current pair, or `None` unless both tokens are stored.
    pub fn get(&self) -> Option<CredentialPair> {
        let access = self.backend.get(ACCESS_TOKEN_KEY);
        let refresh = self.backend.get(REFRESH_TOKEN_KEY);
        match (access, refresh) {
            (Some(access), Some(refresh)) => Some(CredentialPair::new(access, refresh)),
            (None, None) => None,
            _ => {
                warn!("credential store holds half a pair, treating as logged out");
                None
            }
        }
    }

    /// Replace the stored pair wholesale.
    pub fn set(&self, pair: &CredentialPair) {
        self.backend.set_many(vec![
            (ACCESS_TOKEN_KEY, pair.access_token().to_string()),
            (REFRESH_TOKEN_KEY, pair.refresh_token().to_string()),
        ]);
    }

    /// Remove tokens and principal. Idempotent.
    pub fn clear(&self) {
        self.backend.remove(ACCESS_TOKEN_KEY);
        self.backend.remove(REFRESH_TOKEN_KEY);
        self.backend.remove(PRINCIPAL_KEY);
    }

    /// Stored principal. An unparsable record reads as absent; see
    /// `has_principal_record` to tell the two apart.
    pub fn principal(&self) -> Option<Principal> {
        let raw = self.backend.get(PRINCIPAL_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(principal) => Some(principal),
            Err(e) => {
                warn!(error = %e, "stored principal is unreadable, ignoring it");
                None
            }
        }
    }

    /// Whether a principal record is stored at all, readable or not.
    pub fn has_principal_record(&self) -> bool {
        self.backend.get(PRINCIPAL_KEY).is_some()
    }

    pub fn set_principal(&self, principal: &Principal) {
        match serde_json::to_string(principal) {
            Ok(json) => self.backend.set(PRINCIPAL_KEY, json),
            Err(e) => warn!(error = %e, "failed to serialize principal"),
        }
    }

    /// Whether neither tokens nor principal are stored.
    pub fn is_empty(&self) -> bool {
        self.backend.get(ACCESS_TOKEN_KEY).is_none()
            && self.backend.get(REFRESH_TOKEN_KEY).is_none()
            && self.backend.get(PRINCIPAL_KEY).is_none()
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}
