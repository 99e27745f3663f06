//! Credential service
//!
//! Orchestrates the password hasher, token signer and the user/session
//! stores into the session lifecycle: register, login, refresh (with
//! rotation), logout and revoke-all. Holds no mutable state of its own, so a
//! single instance is shared by all requests.

use crate::auth::jwt::{TokenClaims, TokenSigner};
use crate::auth::models::{AuthResult, LoginRequest, RegisterRequest, UpdateProfileRequest};
use crate::auth::password::SecretHasher;
use crate::core::error::{PassageError, Result};
use crate::db::models::{NewSession, Role, User};
use crate::db::repository::{SessionStore, UserStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use uuid::Uuid;

/// Credential and session lifecycle service
#[derive(Clone)]
pub struct CredentialService {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    signer: Arc<dyn TokenSigner>,
    hasher: SecretHasher,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl CredentialService {
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        signer: Arc<dyn TokenSigner>,
        hasher: SecretHasher,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            users,
            sessions,
            signer,
            hasher,
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Create a participant account and open its first session
    pub async fn register(&self, req: RegisterRequest) -> Result<AuthResult> {
        let email = normalize_email(&req.email);
        require("first name", &req.first_name)?;
        require("last name", &req.last_name)?;
        require("email", &email)?;
        require("password", &req.password)?;
        validate_email(&email)?;

        tracing::info!(email = %email, "User registration attempt");

        // Fast path; the UNIQUE constraint still decides concurrent races
        if self.users.exists_by_email(&email).await? {
            return Err(PassageError::Conflict(format!(
                "user with email {} already exists",
                email
            )));
        }

        let pass_hash = self.hash_password(req.password).await?;

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            first_name: req.first_name.trim().to_string(),
            last_name: req.last_name.trim().to_string(),
            email,
            role: Role::Participant,
            tg_name: None,
            birth_date: None,
            bio: None,
            pass_hash,
            is_verified: false,
            updated_at: now,
            created_at: now,
        };

        let (result, session) = self.mint(&user)?;
        self.users.create_with_session(&user, &session).await?;

        tracing::info!(
            user_id = %user.id,
            session_id = %session.id,
            "User registered successfully"
        );

        Ok(result)
    }

    /// Verify credentials and open a new session
    pub async fn login(&self, req: LoginRequest) -> Result<AuthResult> {
        let email = normalize_email(&req.email);
        require("email", &email)?;
        require("password", &req.password)?;

        tracing::info!(email = %email, "Login attempt");

        let user = match self.users.find_by_email(&email).await? {
            Some(user) => user,
            None => {
                self.burn_verification(req.password).await?;
                tracing::warn!("Login rejected: invalid credentials");
                return Err(PassageError::InvalidCredentials);
            }
        };

        if !self.verify_password(user.pass_hash.clone(), req.password).await? {
            tracing::warn!(user_id = %user.id, "Login rejected: invalid credentials");
            return Err(PassageError::InvalidCredentials);
        }

        let (result, session) = self.mint(&user)?;
        self.sessions.save(&session).await?;

        tracing::info!(user_id = %user.id, session_id = %session.id, "Login successful");

        Ok(result)
    }

    /// Exchange a refresh token for a new token pair.
    ///
    /// The presented token is consumed; replaying it afterwards fails.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthResult> {
        if refresh_token.is_empty() {
            return Err(PassageError::InvalidToken("empty refresh token".to_string()));
        }

        let now = Utc::now();
        let session = self
            .sessions
            .find_by_token(refresh_token)
            .await?
            .ok_or_else(|| PassageError::InvalidToken("unknown refresh token".to_string()))?;

        if !session.is_active_at(now) {
            self.sessions.delete_by_token(refresh_token).await?;
            tracing::info!(session_id = %session.id, "Refresh rejected: session expired");
            return Err(PassageError::InvalidToken("session expired".to_string()));
        }

        let user = self
            .users
            .find_by_id(&session.user_id)
            .await?
            .ok_or_else(|| PassageError::NotFound(format!("user {}", session.user_id)))?;

        let (result, next) = self.mint(&user)?;
        if !self.sessions.rotate(refresh_token, &next, now).await? {
            tracing::warn!(
                session_id = %session.id,
                user_id = %user.id,
                "Refresh rejected: token already rotated"
            );
            return Err(PassageError::InvalidToken("refresh token already used".to_string()));
        }

        tracing::info!(
            user_id = %user.id,
            old_session_id = %session.id,
            session_id = %next.id,
            "Session rotated"
        );

        Ok(result)
    }

    /// Revoke the session behind `refresh_token`; unknown tokens are fine
    pub async fn logout(&self, refresh_token: &str) -> Result<()> {
        self.sessions.delete_by_token(refresh_token).await?;
        tracing::info!("Session revoked");
        Ok(())
    }

    /// Revoke every session of the user owning `refresh_token`
    pub async fn logout_all(&self, refresh_token: &str) -> Result<usize> {
        let session = self
            .sessions
            .find_by_token(refresh_token)
            .await?
            .filter(|s| s.is_active_at(Utc::now()))
            .ok_or_else(|| PassageError::InvalidToken("unknown refresh token".to_string()))?;

        let revoked = self.sessions.delete_all_by_user(&session.user_id).await?;
        tracing::info!(user_id = %session.user_id, revoked, "All sessions revoked");
        Ok(revoked)
    }

    /// Verify an access token
    pub fn authenticate(&self, access_token: &str) -> Result<TokenClaims> {
        Ok(self.signer.verify_access(access_token)?)
    }

    pub async fn profile(&self, user_id: &str) -> Result<User> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| PassageError::NotFound(format!("user {}", user_id)))
    }

    /// Apply a partial profile update
    pub async fn update_profile(&self, user_id: &str, changes: UpdateProfileRequest) -> Result<User> {
        let mut user = self.profile(user_id).await?;

        if let Some(first_name) = changes.first_name {
            require("first name", &first_name)?;
            user.first_name = first_name.trim().to_string();
        }
        if let Some(last_name) = changes.last_name {
            require("last name", &last_name)?;
            user.last_name = last_name.trim().to_string();
        }
        if let Some(email) = changes.email {
            let email = normalize_email(&email);
            require("email", &email)?;
            validate_email(&email)?;
            if email != user.email && self.users.exists_by_email(&email).await? {
                return Err(PassageError::Conflict(format!(
                    "user with email {} already exists",
                    email
                )));
            }
            if email != user.email {
                user.is_verified = false;
            }
            user.email = email;
        }
        if let Some(tg_name) = changes.tg_name {
            user.tg_name = tg_name;
        }
        if let Some(birth_date) = changes.birth_date {
            user.birth_date = birth_date;
        }
        if let Some(bio) = changes.bio {
            user.bio = bio;
        }
        user.updated_at = Utc::now();

        self.users.update(&user).await?;
        tracing::info!(user_id = %user.id, "Profile updated");

        Ok(user)
    }

    /// Replace the password and revoke every session of the user
    pub async fn change_password(
        &self,
        user_id: &str,
        current_password: String,
        new_password: String,
    ) -> Result<()> {
        require("current password", &current_password)?;
        require("new password", &new_password)?;

        let user = self.profile(user_id).await?;
        if !self.verify_password(user.pass_hash.clone(), current_password).await? {
            tracing::warn!(user_id = %user.id, "Password change rejected: invalid credentials");
            return Err(PassageError::InvalidCredentials);
        }

        let pass_hash = self.hash_password(new_password).await?;
        let revoked = self.users.replace_password_hash(&user.id, &pass_hash).await?;

        tracing::info!(user_id = %user.id, revoked, "Password changed");
        Ok(())
    }

    /// Delete expired session rows
    pub async fn purge_expired_sessions(&self) -> Result<usize> {
        let purged = self.sessions.delete_expired(Utc::now()).await?;
        if purged > 0 {
            tracing::debug!(purged, "Expired sessions purged");
        }
        Ok(purged)
    }

    /// Issue an access/refresh pair for `user` and the session backing it
    fn mint(&self, user: &User) -> Result<(AuthResult, NewSession)> {
        let access = self
            .signer
            .issue_access(&user.id, user.role, self.access_ttl)?;
        let refresh_token = self.signer.issue_refresh();

        let refresh_ttl = chrono::Duration::from_std(self.refresh_ttl)
            .map_err(|e| PassageError::ConfigError(format!("invalid refresh ttl: {}", e)))?;
        let session = NewSession {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            token: refresh_token.clone(),
            expires_at: Utc::now() + refresh_ttl,
        };

        Ok((
            AuthResult {
                access_token: access.token,
                refresh_token,
                expires_at: access.expires_at,
            },
            session,
        ))
    }

    async fn hash_password(&self, password: String) -> Result<String> {
        let hasher = self.hasher.clone();
        task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| PassageError::TaskError(format!("Hashing task panicked: {}", e)))?
    }

    async fn verify_password(&self, hash: String, password: String) -> Result<bool> {
        let hasher = self.hasher.clone();
        task::spawn_blocking(move || hasher.verify(&hash, &password))
            .await
            .map_err(|e| PassageError::TaskError(format!("Hashing task panicked: {}", e)))?
    }

    async fn burn_verification(&self, password: String) -> Result<()> {
        let hasher = self.hasher.clone();
        task::spawn_blocking(move || hasher.verify_dummy(&password))
            .await
            .map_err(|e| PassageError::TaskError(format!("Hashing task panicked: {}", e)))?
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(PassageError::ValidationError(format!("{} cannot be empty", field)));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(())
        }
        _ => Err(PassageError::ValidationError(format!("invalid email: {}", email))),
    }
}
