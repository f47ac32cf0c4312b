//! Account roles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The patient/doctor classification of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
}

impl Role {
    pub const ALL: &'static [Role] = &[Role::Patient, Role::Doctor];

    /// Fallback when a role value is missing or cannot be trusted.
    pub const DEFAULT: Role = Role::Patient;

    /// Get the canonical string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
        }
    }

    /// Route segment naming this role's section.
    pub fn segment(&self) -> &'static str {
        self.as_str()
    }

    /// Default route of this role's section.
    pub fn home_route(&self) -> &'static str {
        match self {
            Role::Patient => "/patient",
            Role::Doctor => "/doctor",
        }
    }

    /// The presentation mode a doctor toggles to from this one.
    pub fn toggled(&self) -> Role {
        match self {
            Role::Patient => Role::Doctor,
            Role::Doctor => Role::Patient,
        }
    }

    /// Parse a role value of unknown provenance, falling back to the default.
    ///
    /// Returns the role and whether the fallback was taken.
    pub fn parse_or_default(value: &str) -> (Role, bool) {
        match value.parse() {
            Ok(role) => (role, false),
            Err(_) => (Role::DEFAULT, true),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not one of the known roles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role '{0}' (expected 'patient' or 'doctor')")]
pub struct ParseRoleError(pub String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "patient" => Ok(Role::Patient),
            "doctor" => Ok(Role::Doctor),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}
