//! Authenticated identity as handed out by the session provider.

use medplus_ids::{SessionId, UserId};
use serde::{Deserialize, Serialize};

/// An authenticated user handle.
///
/// Owned by the session provider; everything else only reads it. A token
/// refresh keeps the `user_id` and replaces the `session_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Identity {
    /// New session for `user_id`.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            session_id: SessionId::new(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Same user, freshly issued session.
    pub fn refreshed(&self) -> Self {
        Self {
            user_id: self.user_id,
            session_id: SessionId::new(),
            email: self.email.clone(),
        }
    }

    /// Whether `other` belongs to the same account.
    pub fn same_user(&self, other: &Identity) -> bool {
        self.user_id == other.user_id
    }
}
