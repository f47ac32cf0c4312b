//! Error types for role/session synchronization.
//!
//! None of these are fatal: the synchronizer recovers from profile and
//! storage failures locally. `SessionError` is only returned to callers of
//! explicit commands.

use crate::role::Role;
use medplus_ids::UserId;

/// Failures of the remote profile lookup.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("no profile for user {0}")]
    NotFound(UserId),

    #[error("profile store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed profile record: {0}")]
    Malformed(String),

    #[error("profile lookup timed out after {0} ms")]
    Timeout(u64),
}

/// Failures of local persistent storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode stored value for key '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Errors surfaced by explicit session commands.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("role switching is only available to doctor accounts (account role: {account:?})")]
    RoleSwitchNotPermitted { account: Option<Role> },

    #[error("session coordinator is no longer running")]
    CoordinatorClosed,
}

pub type StorageResult<T> = Result<T, StorageError>;
