//! Session catalog for sender accounts
//!
//! Sessions are owned by an external store; the engine only needs a
//! `connect` capability and a reliable corrupt-session signal. The shipped
//! implementation keeps one credential file per account with a SHA-256
//! sidecar, so tampered or truncated session data surfaces as
//! `SessionError::Corrupted` instead of a confusing network failure.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::utils::error::SessionError;

/// Opaque credentials needed to connect one account
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Account the credentials belong to
    pub account_id: String,

    /// Bearer credential handed to the transport
    pub auth_token: String,
}

/// Supplies connect capabilities for accounts
pub trait SessionStore: Send + Sync {
    /// Open the session for an account.
    ///
    /// `SessionError::Corrupted` is the unrecoverable signal that the
    /// account must be retired; it is never retried.
    fn open(&self, account_id: &str) -> Result<SessionHandle, SessionError>;
}

/// Directory-backed session catalog
///
/// Layout: `<dir>/<account_id>.session` holds the credential,
/// `<dir>/<account_id>.sha256` holds the hex digest written at import time.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn session_path(&self, account_id: &str) -> PathBuf {
        self.dir.join(format!("{account_id}.session"))
    }

    fn digest_path(&self, account_id: &str) -> PathBuf {
        self.dir.join(format!("{account_id}.sha256"))
    }

    /// Import a session credential, writing the integrity sidecar
    pub fn import(&self, account_id: &str, token: &str) -> Result<(), SessionError> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.session_path(account_id), token)?;
        std::fs::write(self.digest_path(account_id), hex_digest(token.as_bytes()))?;
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

impl SessionStore for FileSessionStore {
    fn open(&self, account_id: &str) -> Result<SessionHandle, SessionError> {
        let session_path = self.session_path(account_id);
        if !self.exists(&session_path) {
            return Err(SessionError::Missing(account_id.to_string()));
        }

        let token = std::fs::read_to_string(&session_path)?;

        // A missing or mismatched sidecar means the session data cannot be
        // trusted; treat both the same way.
        let recorded = std::fs::read_to_string(self.digest_path(account_id))
            .map_err(|_| SessionError::Corrupted(account_id.to_string()))?;
        if recorded.trim() != hex_digest(token.as_bytes()) {
            return Err(SessionError::Corrupted(account_id.to_string()));
        }

        let token = token.trim().to_string();
        if token.is_empty() {
            return Err(SessionError::Corrupted(account_id.to_string()));
        }

        Ok(SessionHandle {
            account_id: account_id.to_string(),
            auth_token: token,
        })
    }
}

fn hex_digest(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_import_and_open() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path());

        store.import("acc1", "token-123").unwrap();
        let handle = store.open("acc1").unwrap();
        assert_eq!(handle.account_id, "acc1");
        assert_eq!(handle.auth_token, "token-123");
    }

    #[test]
    fn test_missing_session() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path());

        assert!(matches!(
            store.open("ghost"),
            Err(SessionError::Missing(_))
        ));
    }

    #[test]
    fn test_tampered_session_is_corrupted() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path());

        store.import("acc1", "token-123").unwrap();
        std::fs::write(dir.path().join("acc1.session"), "tampered").unwrap();

        assert!(matches!(
            store.open("acc1"),
            Err(SessionError::Corrupted(_))
        ));
    }

    #[test]
    fn test_missing_sidecar_is_corrupted() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path());

        store.import("acc1", "token-123").unwrap();
        std::fs::remove_file(dir.path().join("acc1.sha256")).unwrap();

        assert!(matches!(
            store.open("acc1"),
            Err(SessionError::Corrupted(_))
        ));
    }

    #[test]
    fn test_empty_token_is_corrupted() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path());

        store.import("acc1", "").unwrap();
        assert!(matches!(
            store.open("acc1"),
            Err(SessionError::Corrupted(_))
        ));
    }
}
