//! In-memory store
//!
//! Implements `UserStore` and `SessionStore` with the same contract as the
//! SQLite repositories. Used to run the credential service without a
//! database, and to simulate storage outages.
//!
//! Unlike the `sessions` foreign key in SQLite, a session may reference a
//! user id that does not exist. Tests rely on this to stage orphaned
//! sessions.

use crate::auth::jwt::hash_refresh_token;
use crate::core::error::{PassageError, Result};
use crate::db::models::{NewSession, Session, User};
use crate::db::repository::{SessionStore, UserStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, User>,
    /// Keyed by token hash
    sessions: HashMap<String, Session>,
}

impl MemoryState {
    fn email_taken(&self, email: &str, except_id: Option<&str>) -> bool {
        self.users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(email) && Some(u.id.as_str()) != except_id)
    }

    fn insert_session(&mut self, session: &NewSession) -> Result<()> {
        let token_hash = hash_refresh_token(&session.token);
        if self.sessions.contains_key(&token_hash) {
            return Err(PassageError::StorageError("duplicate session token".to_string()));
        }
        self.sessions.insert(
            token_hash.clone(),
            Session {
                id: session.id.clone(),
                user_id: session.user_id.clone(),
                token_hash,
                expires_at: session.expires_at,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }
}

/// Shared in-memory user and session tables
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `StorageError`
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored sessions, live or expired
    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PassageError::StorageError("simulated write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create(&self, user: &User) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        if state.email_taken(&user.email, None) {
            return Err(PassageError::Conflict(format!(
                "user with email {} already exists",
                user.email
            )));
        }
        state.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn create_with_session(&self, user: &User, session: &NewSession) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        if state.email_taken(&user.email, None) {
            return Err(PassageError::Conflict(format!(
                "user with email {} already exists",
                user.email
            )));
        }
        state.insert_session(session)?;
        state.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        Ok(self.state.lock().await.users.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .state
            .lock()
            .await
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn update(&self, user: &User) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&user.id) {
            return Err(PassageError::NotFound(format!("user {}", user.id)));
        }
        if state.email_taken(&user.email, Some(&user.id)) {
            return Err(PassageError::Conflict(format!(
                "user with email {} already exists",
                user.email
            )));
        }
        // Password hash only changes through update_password_hash
        let pass_hash = state.users[&user.id].pass_hash.clone();
        state.users.insert(
            user.id.clone(),
            User {
                pass_hash,
                ..user.clone()
            },
        );
        Ok(())
    }

    async fn update_password_hash(&self, user_id: &str, pass_hash: &str) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| PassageError::NotFound(format!("user {}", user_id)))?;
        user.pass_hash = pass_hash.to_string();
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn replace_password_hash(&self, user_id: &str, pass_hash: &str) -> Result<usize> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| PassageError::NotFound(format!("user {}", user_id)))?;
        user.pass_hash = pass_hash.to_string();
        user.updated_at = Utc::now();

        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.user_id != user_id);
        Ok(before - state.sessions.len())
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool> {
        Ok(self.state.lock().await.email_taken(email, None))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn save(&self, session: &NewSession) -> Result<()> {
        self.check_writable()?;
        self.state.lock().await.insert_session(session)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Session>> {
        let token_hash = hash_refresh_token(token);
        Ok(self.state.lock().await.sessions.get(&token_hash).cloned())
    }

    async fn delete_by_token(&self, token: &str) -> Result<()> {
        self.check_writable()?;
        let token_hash = hash_refresh_token(token);
        self.state.lock().await.sessions.remove(&token_hash);
        Ok(())
    }

    async fn delete_all_by_user(&self, user_id: &str) -> Result<usize> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.user_id != user_id);
        Ok(before - state.sessions.len())
    }

    async fn rotate(
        &self,
        old_token: &str,
        new_session: &NewSession,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_writable()?;
        let old_hash = hash_refresh_token(old_token);
        let mut state = self.state.lock().await;
        match state.sessions.get(&old_hash) {
            Some(session) if session.is_active_at(now) => {}
            _ => return Ok(false),
        }
        state.insert_session(new_session)?;
        state.sessions.remove(&old_hash);
        Ok(true)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.is_active_at(now));
        Ok(before - state.sessions.len())
    }
}
