//! Profile store: the database of record for account roles.
//!
//! The hosted backend exposes a `profiles` table keyed by user id. The client
//! only ever reads the `role` column; `JsonProfileStore` mirrors that table as
//! a JSON array on disk for the local harness.

use crate::error::ProfileError;
use crate::identity::Identity;
use crate::role::Role;
use async_trait::async_trait;
use medplus_ids::UserId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Source of the authoritative role.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Look up the role stored for `identity`.
    ///
    /// A role column holding anything other than `patient`/`doctor` yields
    /// `Role::DEFAULT`, not an error.
    async fn get_role(&self, identity: &Identity) -> Result<Role, ProfileError>;
}

/// One row of the `profiles` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: UserId,
    /// Raw column value; validated on read.
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

impl ProfileRecord {
    pub fn new(id: UserId, role: Role) -> Self {
        Self {
            id,
            role: role.as_str().to_string(),
            full_name: None,
        }
    }

    /// The role column, with malformed values mapped to the default.
    pub fn role(&self) -> Role {
        let (role, fell_back) = Role::parse_or_default(&self.role);
        if fell_back {
            warn!(
                "Profile {} has unknown role {:?}; using '{}'",
                self.id, self.role, role
            );
        }
        role
    }
}

/// `profiles` table backed by a JSON file.
///
/// The file is re-read on every lookup so edits made by another process are
/// picked up, the way a remote query would see them.
pub struct JsonProfileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all rows. A missing file is an empty table.
    pub async fn load_all(&self) -> Result<Vec<ProfileRecord>, ProfileError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(ProfileError::Unavailable(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    err
                )))
            }
        };
        serde_json::from_str(&raw).map_err(|err| {
            ProfileError::Malformed(format!("{}: {}", self.path.display(), err))
        })
    }

    /// Fetch the row for `id`, if any.
    pub async fn find(&self, id: &UserId) -> Result<Option<ProfileRecord>, ProfileError> {
        Ok(self.load_all().await?.into_iter().find(|r| &r.id == id))
    }

    /// Insert or replace the row for `record.id`.
    pub async fn upsert(&self, record: ProfileRecord) -> Result<(), ProfileError> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.load_all().await?;
        match rows.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => rows.push(record),
        }

        let json = serde_json::to_string_pretty(&rows)
            .map_err(|err| ProfileError::Malformed(err.to_string()))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| ProfileError::Unavailable(err.to_string()))?;
        }
        let temp_path = self.path.with_extension(format!("tmp_{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&temp_path, json)
            .await
            .map_err(|err| ProfileError::Unavailable(err.to_string()))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|err| ProfileError::Unavailable(err.to_string()))?;
        debug!("Wrote {} profile rows to {}", rows.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for JsonProfileStore {
    async fn get_role(&self, identity: &Identity) -> Result<Role, ProfileError> {
        let record = self
            .find(&identity.user_id)
            .await?
            .ok_or(ProfileError::NotFound(identity.user_id))?;
        Ok(record.role())
    }
}
