use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::{StoreError, TokenBackend};

/// Owner of the one persisted bearer token.
///
/// Reads go to the canonical scope only. Removal sweeps the canonical scope
/// and every legacy scope so an old token can never resurface. Writes and
/// removals are serialized, so a check-then-remove via
/// [`CredentialStore::take_token_if`] cannot interleave with another one.
///
/// Clone is cheap; clones share the same backends.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    canonical: Arc<dyn TokenBackend>,
    legacy: Vec<Arc<dyn TokenBackend>>,
    write_lock: Arc<Mutex<()>>,
}

impl CredentialStore {
    pub fn new(canonical: impl TokenBackend + 'static) -> Self {
        Self {
            canonical: Arc::new(canonical),
            legacy: Vec::new(),
            write_lock: Arc::default(),
        }
    }

    /// Register a scope that earlier versions wrote the token to
    pub fn with_legacy(mut self, scope: impl TokenBackend + 'static) -> Self {
        self.legacy.push(Arc::new(scope));
        self
    }

    /// Store a token, replacing whatever was there. No shape validation.
    pub fn set_token(&self, token: &str) -> Result<(), StoreError> {
        let _write = self.lock();
        self.canonical.write(token)?;
        debug!(scope = self.canonical.name(), "Token stored");
        Ok(())
    }

    /// The stored token, if any.
    ///
    /// An unreadable scope is logged and reported as no token.
    pub fn get_token(&self) -> Option<String> {
        match self.canonical.read() {
            Ok(token) => token,
            Err(e) => {
                warn!(scope = self.canonical.name(), error = %e, "Token storage unavailable");
                None
            }
        }
    }

    pub fn has_token(&self) -> bool {
        self.get_token().is_some_and(|t| !t.is_empty())
    }

    /// Remove the token from every known scope.
    ///
    /// Safe to call when nothing is stored. All scopes are attempted even if
    /// one fails; the first failure is returned.
    pub fn remove_token(&self) -> Result<(), StoreError> {
        let _write = self.lock();
        self.delete_everywhere()?;
        debug!("Token removed");
        Ok(())
    }

    /// Remove the stored token if `pred` holds for it, returning what was
    /// removed.
    ///
    /// `Ok(None)` means nothing was removed: no token was stored, or `pred`
    /// rejected it. Of several callers racing to clear the same token,
    /// exactly one gets it back.
    pub fn take_token_if(
        &self,
        pred: impl FnOnce(&str) -> bool,
    ) -> Result<Option<String>, StoreError> {
        let _write = self.lock();
        let token = match self.get_token() {
            Some(token) if !token.is_empty() && pred(&token) => token,
            _ => return Ok(None),
        };
        self.delete_everywhere()?;
        debug!("Token taken");
        Ok(Some(token))
    }

    /// Startup cleanup: delete whatever legacy scopes still hold.
    ///
    /// Legacy values are discarded, never copied into the canonical scope.
    /// Returns the number of scopes that held a token.
    pub fn purge_legacy(&self) -> usize {
        let mut purged = 0;
        for scope in &self.legacy {
            let held = match scope.read() {
                Ok(token) => token.is_some(),
                Err(e) => {
                    warn!(scope = scope.name(), error = %e, "Legacy scope unreadable, deleting anyway");
                    true
                }
            };
            if !held {
                continue;
            }
            match scope.delete() {
                Ok(()) => {
                    info!(scope = scope.name(), "Purged stale token from legacy scope");
                    purged += 1;
                }
                Err(e) => warn!(scope = scope.name(), error = %e, "Failed to purge legacy scope"),
            }
        }
        purged
    }

    fn delete_everywhere(&self) -> Result<(), StoreError> {
        let mut first_err = None;
        for scope in self.scopes() {
            if let Err(e) = scope.delete() {
                warn!(scope = scope.name(), error = %e, "Failed to remove token");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scopes(&self) -> impl Iterator<Item = &Arc<dyn TokenBackend>> {
        std::iter::once(&self.canonical).chain(self.legacy.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;

    #[derive(Debug)]
    struct BrokenBackend;

    impl TokenBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn read(&self) -> Result<Option<String>, StoreError> {
            Err(std::io::Error::other("storage disabled").into())
        }

        fn write(&self, _token: &str) -> Result<(), StoreError> {
            Err(std::io::Error::other("storage disabled").into())
        }

        fn delete(&self) -> Result<(), StoreError> {
            Err(std::io::Error::other("storage disabled").into())
        }
    }

    #[test]
    fn test_set_then_get_returns_exact_token() {
        let store = CredentialStore::new(MemoryBackend::new());
        for token in ["a", "header.payload.signature", "  spaced  ", "ñ-unicode"] {
            store.set_token(token).expect("set");
            assert_eq!(store.get_token().as_deref(), Some(token));
        }
    }

    #[test]
    fn test_set_replaces_previous_token() {
        let store = CredentialStore::new(MemoryBackend::new());
        store.set_token("first").expect("set");
        store.set_token("second").expect("set");
        assert_eq!(store.get_token().as_deref(), Some("second"));
    }

    #[test]
    fn test_has_token_false_for_empty_value() {
        let store = CredentialStore::new(MemoryBackend::new());
        assert!(!store.has_token());

        store.set_token("").expect("set");
        assert!(!store.has_token());

        store.set_token("x").expect("set");
        assert!(store.has_token());
    }

    #[test]
    fn test_remove_token_twice_is_fine() {
        let store = CredentialStore::new(MemoryBackend::new());
        store.set_token("token").expect("set");

        store.remove_token().expect("first remove");
        assert!(!store.has_token());

        store.remove_token().expect("second remove");
        assert!(!store.has_token());
    }

    #[test]
    fn test_remove_token_clears_legacy_scopes() {
        let legacy = Arc::new(MemoryBackend::with_token("stale"));
        let store = CredentialStore {
            canonical: Arc::new(MemoryBackend::with_token("current")),
            legacy: vec![legacy.clone() as Arc<dyn TokenBackend>],
            write_lock: Arc::default(),
        };

        store.remove_token().expect("remove");

        assert_eq!(legacy.read().expect("read"), None);
        assert!(!store.has_token());
    }

    #[test]
    fn test_legacy_token_is_never_honored() {
        let store = CredentialStore::new(MemoryBackend::new())
            .with_legacy(MemoryBackend::with_token("stale"));
        assert!(!store.has_token());
        assert_eq!(store.get_token(), None);
    }

    #[test]
    fn test_purge_legacy_counts_only_populated_scopes() {
        let populated = Arc::new(MemoryBackend::with_token("stale"));
        let store = CredentialStore {
            canonical: Arc::new(MemoryBackend::with_token("current")),
            legacy: vec![
                populated.clone() as Arc<dyn TokenBackend>,
                Arc::new(MemoryBackend::new()) as Arc<dyn TokenBackend>,
            ],
            write_lock: Arc::default(),
        };

        assert_eq!(store.purge_legacy(), 1);
        assert_eq!(populated.read().expect("read"), None);
        // Canonical scope untouched
        assert_eq!(store.get_token().as_deref(), Some("current"));

        assert_eq!(store.purge_legacy(), 0);
    }

    #[test]
    fn test_take_token_if_only_takes_matching_token() {
        let store = CredentialStore::new(MemoryBackend::new())
            .with_legacy(MemoryBackend::with_token("stale"));
        assert_eq!(store.take_token_if(|_| true).expect("take"), None);

        store.set_token("current").expect("set");
        assert_eq!(store.take_token_if(|t| t == "other").expect("take"), None);
        assert!(store.has_token());

        assert_eq!(
            store.take_token_if(|t| t == "current").expect("take").as_deref(),
            Some("current")
        );
        assert!(!store.has_token());
        assert_eq!(store.take_token_if(|_| true).expect("take again"), None);
    }

    #[test]
    fn test_concurrent_takers_get_the_token_once() {
        let store = CredentialStore::new(MemoryBackend::new());
        store.set_token("shared").expect("set");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.take_token_if(|_| true).expect("take"))
            })
            .collect();
        let taken = handles
            .into_iter()
            .filter_map(|h| h.join().expect("join"))
            .count();

        assert_eq!(taken, 1);
    }

    #[test]
    fn test_unavailable_storage_reads_as_no_token() {
        let store = CredentialStore::new(BrokenBackend);
        assert_eq!(store.get_token(), None);
        assert!(!store.has_token());
        assert!(store.set_token("token").is_err());
        assert!(store.remove_token().is_err());
    }
}
