//! Credential storage.
//!
//! This module provides:
//! - `CredentialStore`: the single owner of the persisted bearer token
//! - `TokenBackend`: one storage scope (OS keychain, token file, memory)
//!
//! Exactly one scope is canonical. Every other scope the client has ever
//! written to is legacy: its contents are purged at startup and on logout,
//! never read back as a credential.

pub mod backend;
pub mod credentials;

pub use backend::{FileBackend, KeyringBackend, MemoryBackend, TokenBackend};
pub use credentials::CredentialStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Token file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not determine a cache directory for the token file")]
    NoCacheDir,
}
