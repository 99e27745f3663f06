//! Repository pattern implementation for data access layer
//!
//! `UserStore` and `SessionStore` are the storage capabilities the credential
//! service depends on; `UserRepository` and `SessionRepository` implement them
//! on SQLite. Refresh tokens cross this boundary in plaintext and are hashed
//! here with `hash_refresh_token` on every write and read path.

use crate::auth::jwt::hash_refresh_token;
use crate::core::error::{ErrorContext, PassageError, Result};
use crate::db::manager::DatabaseManager;
use crate::db::models::{NewSession, Role, Session, User};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;

/// Persistence for user records
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user; a taken email is `Conflict`
    async fn create(&self, user: &User) -> Result<()>;

    /// Insert a user together with its first session, atomically
    async fn create_with_session(&self, user: &User, session: &NewSession) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Update profile fields; `NotFound` if the user does not exist
    async fn update(&self, user: &User) -> Result<()>;

    async fn update_password_hash(&self, user_id: &str, pass_hash: &str) -> Result<()>;

    /// Store a new password hash and revoke every session of the user in
    /// one step; returns the number of revoked sessions
    async fn replace_password_hash(&self, user_id: &str, pass_hash: &str) -> Result<usize>;

    async fn exists_by_email(&self, email: &str) -> Result<bool>;
}

/// Persistence for refresh-token sessions, keyed by token hash
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session: &NewSession) -> Result<()>;

    async fn find_by_token(&self, token: &str) -> Result<Option<Session>>;

    /// Idempotent
    async fn delete_by_token(&self, token: &str) -> Result<()>;

    /// Idempotent; returns the number of revoked sessions
    async fn delete_all_by_user(&self, user_id: &str) -> Result<usize>;

    /// Consume `old_token` and store `new_session` in one step.
    ///
    /// Returns `false`, storing nothing, when `old_token` has no session
    /// unexpired at `now` (already rotated, revoked, or expired).
    async fn rotate(
        &self,
        old_token: &str,
        new_session: &NewSession,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Remove sessions that expired at or before `now`
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: PassageError| FromSqlError::Other(Box::new(e)))
    }
}

const USER_COLUMNS: &str = "id, first_name, last_name, email, role, tg_name, birth_date, bio, \
                            pass_hash, is_verified, updated_at, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
        role: row.get(4)?,
        tg_name: row.get(5)?,
        birth_date: row.get(6)?,
        bio: row.get(7)?,
        pass_hash: row.get(8)?,
        is_verified: row.get(9)?,
        updated_at: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn insert_user(conn: &rusqlite::Connection, user: &User) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, first_name, last_name, email, role, tg_name, birth_date, bio, \
         pass_hash, is_verified, updated_at, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            user.id,
            user.first_name,
            user.last_name,
            user.email,
            user.role,
            user.tg_name,
            user.birth_date,
            user.bio,
            user.pass_hash,
            user.is_verified,
            user.updated_at,
            user.created_at,
        ],
    )
    .map_err(|e| PassageError::from_user_write(e, &user.email, "insert user"))?;
    Ok(())
}

fn insert_session(conn: &rusqlite::Connection, session: &NewSession) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            session.id,
            session.user_id,
            hash_refresh_token(&session.token),
            session.expires_at.timestamp(),
            Utc::now().timestamp(),
        ],
    )
    .context("insert session")?;
    Ok(())
}

fn delete_user_sessions(conn: &rusqlite::Connection, user_id: &str) -> Result<usize> {
    conn.execute("DELETE FROM sessions WHERE user_id = ?", [user_id])
        .context("delete sessions by user")
}

fn from_unix(secs: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            format!("timestamp out of range: {}", secs).into(),
        )
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        token_hash: row.get(2)?,
        expires_at: from_unix(row.get(3)?)?,
        created_at: from_unix(row.get(4)?)?,
    })
}

/// Repository for User entities
pub struct UserRepository {
    db: Arc<DatabaseManager>,
}

impl UserRepository {
    /// Create a new UserRepository
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for UserRepository {
    async fn create(&self, user: &User) -> Result<()> {
        let user = user.clone();
        self.db.execute(move |conn| insert_user(conn, &user)).await
    }

    async fn create_with_session(&self, user: &User, session: &NewSession) -> Result<()> {
        let user = user.clone();
        let session = session.clone();
        self.db
            .transaction(move |tx| {
                insert_user(tx, &user)?;
                insert_session(tx, &session)
            })
            .await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
                    [&id],
                    user_from_row,
                )
                .optional()
                .context("find user by id")
            })
            .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS),
                    [&email],
                    user_from_row,
                )
                .optional()
                .context("find user by email")
            })
            .await
    }

    async fn update(&self, user: &User) -> Result<()> {
        let user = user.clone();
        self.db
            .execute(move |conn| {
                let updated = conn
                    .execute(
                        "UPDATE users SET first_name = ?1, last_name = ?2, email = ?3, tg_name = ?4, \
                         birth_date = ?5, bio = ?6, is_verified = ?7, updated_at = ?8 WHERE id = ?9",
                        params![
                            user.first_name,
                            user.last_name,
                            user.email,
                            user.tg_name,
                            user.birth_date,
                            user.bio,
                            user.is_verified,
                            user.updated_at,
                            user.id,
                        ],
                    )
                    .map_err(|e| PassageError::from_user_write(e, &user.email, "update user"))?;
                if updated == 0 {
                    return Err(PassageError::NotFound(format!("user {}", user.id)));
                }
                Ok(())
            })
            .await
    }

    async fn update_password_hash(&self, user_id: &str, pass_hash: &str) -> Result<()> {
        let user_id = user_id.to_string();
        let pass_hash = pass_hash.to_string();
        self.db
            .execute(move |conn| set_password_hash(conn, &user_id, &pass_hash))
            .await
    }

    async fn replace_password_hash(&self, user_id: &str, pass_hash: &str) -> Result<usize> {
        let user_id = user_id.to_string();
        let pass_hash = pass_hash.to_string();
        self.db
            .transaction(move |tx| {
                set_password_hash(tx, &user_id, &pass_hash)?;
                delete_user_sessions(tx, &user_id)
            })
            .await
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool> {
        let email = email.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?)",
                    [&email],
                    |row| row.get(0),
                )
                .context("check email exists")
            })
            .await
    }
}

fn set_password_hash(conn: &rusqlite::Connection, user_id: &str, pass_hash: &str) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE users SET pass_hash = ?1, updated_at = ?2 WHERE id = ?3",
            params![pass_hash, Utc::now(), user_id],
        )
        .context("update password hash")?;
    if updated == 0 {
        return Err(PassageError::NotFound(format!("user {}", user_id)));
    }
    Ok(())
}

/// Repository for Session entities
pub struct SessionRepository {
    db: Arc<DatabaseManager>,
}

impl SessionRepository {
    /// Create a new SessionRepository
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for SessionRepository {
    async fn save(&self, session: &NewSession) -> Result<()> {
        let session = session.clone();
        self.db.execute(move |conn| insert_session(conn, &session)).await
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Session>> {
        let token_hash = hash_refresh_token(token);
        self.db
            .execute(move |conn| {
                conn.query_row(
                    "SELECT id, user_id, token_hash, expires_at, created_at \
                     FROM sessions WHERE token_hash = ?",
                    [&token_hash],
                    session_from_row,
                )
                .optional()
                .context("find session by token")
            })
            .await
    }

    async fn delete_by_token(&self, token: &str) -> Result<()> {
        let token_hash = hash_refresh_token(token);
        self.db
            .execute(move |conn| {
                conn.execute("DELETE FROM sessions WHERE token_hash = ?", [&token_hash])
                    .context("delete session by token")?;
                Ok(())
            })
            .await
    }

    async fn delete_all_by_user(&self, user_id: &str) -> Result<usize> {
        let user_id = user_id.to_string();
        self.db
            .execute(move |conn| delete_user_sessions(conn, &user_id))
            .await
    }

    async fn rotate(
        &self,
        old_token: &str,
        new_session: &NewSession,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let old_hash = hash_refresh_token(old_token);
        let new_session = new_session.clone();
        self.db
            .transaction(move |tx| {
                let consumed = tx
                    .execute(
                        "DELETE FROM sessions WHERE token_hash = ?1 AND expires_at > ?2",
                        params![old_hash, now.timestamp()],
                    )
                    .context("consume rotated session")?;
                if consumed == 0 {
                    return Ok(false);
                }
                insert_session(tx, &new_session)?;
                Ok(true)
            })
            .await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.db
            .execute(move |conn| {
                conn.execute(
                    "DELETE FROM sessions WHERE expires_at <= ?",
                    [now.timestamp()],
                )
                .context("delete expired sessions")
            })
            .await
    }
}
