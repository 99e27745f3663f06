//! Passage
//!
//! Credential and session lifecycle service: password hashing, signed
//! access tokens, rotating refresh-token sessions and the HTTP surface
//! that exposes them as cookies.

pub mod api;
pub mod auth;
pub mod core;
pub mod db;

// Re-export commonly used types
pub use crate::core::{Config, PassageError};
pub use api::ApiServer;
pub use auth::CredentialService;
pub use db::DatabaseManager;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
