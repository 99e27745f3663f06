//! Authentication module
//!
//! This module provides the credential and session lifecycle:
//! - Password hashing and verification
//! - Access token signing and refresh token generation
//! - The credential service (register, login, refresh, logout)
//! - Session cookies, HTTP handlers and authentication middleware

pub mod cookies;
pub mod handlers;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod service;

pub use cookies::CookieSettings;
pub use jwt::{hash_refresh_token, AccessToken, JwtSigner, TokenClaims, TokenSigner};
pub use middleware::{authenticate, AuthUser};
pub use password::SecretHasher;
pub use service::CredentialService;
