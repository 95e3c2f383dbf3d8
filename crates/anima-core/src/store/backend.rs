use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use keyring::Entry;
use tracing::debug;

use super::StoreError;

/// Service name the token is filed under in the OS keychain
const SERVICE_NAME: &str = "anima";

/// Key identifying the credential slot in every scope
pub const TOKEN_KEY: &str = "access_token";

/// One key-value storage scope holding at most one token.
///
/// Implementations are synchronous; every call is a single small read or
/// write against local storage.
pub trait TokenBackend: Send + Sync + fmt::Debug {
    /// Short name used in log fields
    fn name(&self) -> &'static str;

    fn read(&self) -> Result<Option<String>, StoreError>;

    fn write(&self, token: &str) -> Result<(), StoreError>;

    /// Remove the stored token. Succeeds when nothing is stored.
    fn delete(&self) -> Result<(), StoreError>;
}

// ============================================================================
// OS keychain
// ============================================================================

/// Token stored in the OS keychain; survives restarts for the user profile.
#[derive(Debug, Clone)]
pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    /// Use a different keychain service name (e.g. per API environment)
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<Entry, StoreError> {
        Ok(Entry::new(&self.service, TOKEN_KEY)?)
    }
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenBackend for KeyringBackend {
    fn name(&self) -> &'static str {
        "keyring"
    }

    fn read(&self) -> Result<Option<String>, StoreError> {
        match self.entry()?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, token: &str) -> Result<(), StoreError> {
        self.entry()?.set_password(token)?;
        Ok(())
    }

    fn delete(&self) -> Result<(), StoreError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Token file
// ============================================================================

/// Token stored as a plain file in the cache directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Token file inside `dir`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(TOKEN_KEY),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn read(&self) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, token: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, token)?;
        debug!(path = %self.path.display(), "Token file written");
        Ok(())
    }

    fn delete(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Memory
// ============================================================================

/// Token held in process memory only; gone when the process exits.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    slot: Mutex<Option<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated slot, handy for seeding a legacy scope
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(token.into())),
        }
    }
}

impl TokenBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn read(&self) -> Result<Option<String>, StoreError> {
        Ok(self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn write(&self, token: &str) -> Result<(), StoreError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        Ok(())
    }

    fn delete(&self) -> Result<(), StoreError> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_backend_missing_file_reads_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path());
        assert_eq!(backend.read().expect("read"), None);
    }

    #[test]
    fn test_file_backend_write_creates_parent_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path().join("nested").join("anima"));

        backend.write("abc.def.ghi").expect("write");

        assert!(backend.path().exists());
        assert_eq!(backend.read().expect("read").as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn test_file_store_returns_token_exactly_as_set() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = crate::store::CredentialStore::new(FileBackend::new(dir.path()));
        for token in ["tok\n", "\n", "tok\r\n", "  spaced  ", "header.payload.signature"] {
            store.set_token(token).expect("set");
            assert_eq!(store.get_token().as_deref(), Some(token), "{token:?}");
            assert!(store.has_token());
        }
    }

    #[test]
    fn test_file_backend_delete_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path());
        backend.write("token").expect("write");

        backend.delete().expect("first delete");
        backend.delete().expect("second delete");
        assert_eq!(backend.read().expect("read"), None);
    }

    #[test]
    fn test_memory_backend_overwrites() {
        let backend = MemoryBackend::with_token("first");
        backend.write("second").expect("write");
        assert_eq!(backend.read().expect("read").as_deref(), Some("second"));

        backend.delete().expect("delete");
        backend.delete().expect("delete again");
        assert_eq!(backend.read().expect("read"), None);
    }
}
