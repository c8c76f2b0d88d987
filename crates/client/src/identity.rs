// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity resolution from the locally persisted bearer token.
//!
//! The token is a JWT whose payload segment carries the claims we need; the
//! signature is never verified here since issuance and validation belong to
//! the API service. The token file is written atomically (write tmp + rename).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The current identity as decoded from the token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: u64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Decode the claims from a JWT's payload segment. Returns `None` for
/// anything that is not a well-formed token with the expected claims.
pub fn decode_token(token: &str) -> Option<Identity> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Persisted token file shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedToken {
    token: String,
}

/// Token store backed by a JSON file, with an in-memory cache.
pub struct IdentityStore {
    path: PathBuf,
    token: Mutex<Option<String>>,
}

impl IdentityStore {
    /// Open the store, loading any previously persisted token. A missing or
    /// unreadable file simply yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let token = match load(&path) {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::debug!(path = %path.display(), err = %e, "no persisted token loaded");
                None
            }
        };
        Self { path, token: Mutex::new(token) }
    }

    pub fn token(&self) -> Option<String> {
        self.locked().clone()
    }

    /// Cache and persist a fresh token.
    pub fn set_token(&self, token: &str) -> Result<()> {
        save(&self.path, &PersistedToken { token: token.to_owned() })?;
        *self.locked() = Some(token.to_owned());
        Ok(())
    }

    /// Forget the token and remove the file (log out).
    pub fn clear(&self) -> Result<()> {
        *self.locked() = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve the current identity, or `None` when no usable token exists.
    pub fn current(&self) -> Option<Identity> {
        let token = self.token()?;
        let identity = decode_token(&token);
        if identity.is_none() {
            tracing::warn!(path = %self.path.display(), "persisted token does not decode");
        }
        identity
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn load(path: &Path) -> Result<String> {
    let contents = std::fs::read_to_string(path)?;
    let persisted: PersistedToken = serde_json::from_str(&contents)?;
    Ok(persisted.token)
}

/// Atomic save: unique temp filename (PID + counter) then rename, so
/// concurrent saves racing on the same `.tmp` file cannot corrupt it.
fn save(path: &Path, persisted: &PersistedToken) -> Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let json = serde_json::to_string_pretty(persisted)?;
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
