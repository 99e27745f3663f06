//! Database models
//!
//! Data structures representing database tables

use crate::core::error::{PassageError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// User role, carried as a claim in access tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Participant,
    Partner,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Participant => "participant",
            Role::Partner => "partner",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = PassageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "participant" => Ok(Role::Participant),
            "partner" => Ok(Role::Partner),
            "admin" => Ok(Role::Admin),
            other => Err(PassageError::ValidationError(format!("unknown role: {}", other))),
        }
    }
}

/// User record in the database
///
/// `pass_hash` is skipped on serialization so the record can never be
/// rendered with its hash.
#[derive(Clone, Serialize)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub tg_name: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub bio: Option<String>,
    #[serde(skip_serializing)]
    pub pass_hash: String,
    pub is_verified: bool,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("is_verified", &self.is_verified)
            .finish_non_exhaustive()
    }
}

/// A session about to be persisted.
///
/// Holds the plaintext refresh token only in memory; stores persist its
/// hash (see `auth::jwt::hash_refresh_token`).
#[derive(Clone)]
pub struct NewSession {
    pub id: String,
    pub user_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for NewSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewSession")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Session record in the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Whether the session is still usable at `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
