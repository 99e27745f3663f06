//! Access token signing/verification and refresh token generation
//!
//! Access tokens are HS256 JWTs carrying `{user_id, role, iat, exp}`.
//! Refresh tokens are opaque random strings; only their SHA-256 digest is
//! ever stored.

use crate::core::error::{PassageError, Result, TokenError};
use crate::db::models::Role;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// The only algorithm accepted on verification
const ALGORITHM: Algorithm = Algorithm::HS256;
const ALGORITHM_NAME: &str = "HS256";

/// Random bytes in a refresh token
const REFRESH_TOKEN_BYTES: usize = 32;

/// Claims produced by verifying an access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub user_id: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

/// A freshly signed access token and the instant it stops being valid
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies access tokens, mints refresh tokens
pub trait TokenSigner: Send + Sync {
    /// Sign an access token valid for `ttl`
    fn issue_access(&self, user_id: &str, role: Role, ttl: Duration) -> Result<AccessToken>;

    /// Generate an unguessable opaque refresh token
    fn issue_refresh(&self) -> String;

    /// Verify signature, algorithm and expiry of an access token
    fn verify_access(&self, token: &str) -> std::result::Result<TokenClaims, TokenError>;
}

/// Wire format of the JWT payload
#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    user_id: String,
    role: Role,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
}

/// HMAC-SHA256 token signer holding the process signing secret
#[derive(Clone)]
pub struct JwtSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtSigner {
    /// Create a signer; an empty secret is a configuration error
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(PassageError::ConfigError("signing secret cannot be empty".to_string()));
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }
}

impl TokenSigner for JwtSigner {
    fn issue_access(&self, user_id: &str, role: Role, ttl: Duration) -> Result<AccessToken> {
        let issued_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| PassageError::SigningError(format!("invalid token ttl: {}", e)))?;
        let expires_at = issued_at
            .checked_add_signed(ttl)
            .ok_or_else(|| PassageError::SigningError("Failed to calculate expiration".to_string()))?;

        let claims = JwtClaims {
            user_id: user_id.to_string(),
            role,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| PassageError::SigningError(format!("Failed to sign token: {}", e)))?;

        Ok(AccessToken {
            token,
            // Report the instant actually encoded in the token
            expires_at: timestamp_to_datetime(claims.exp).unwrap_or(expires_at),
        })
    }

    fn issue_refresh(&self) -> String {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    fn verify_access(&self, token: &str) -> std::result::Result<TokenClaims, TokenError> {
        check_algorithm(token)?;

        let data = decode::<JwtClaims>(token, &self.decoding_key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                    TokenError::UnsupportedAlgorithm
                }
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::MalformedClaims,
            },
        )?;

        let claims = data.claims;
        if claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(TokenClaims {
            expires_at: timestamp_to_datetime(claims.exp).ok_or(TokenError::MalformedClaims)?,
            user_id: claims.user_id,
            role: claims.role,
        })
    }
}

/// Reject any header whose `alg` is not the configured one, including
/// names the JWT library itself does not know (e.g. `none`).
fn check_algorithm(token: &str) -> std::result::Result<(), TokenError> {
    let header_segment = token.split('.').next().ok_or(TokenError::MalformedClaims)?;
    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_segment)
        .map_err(|_| TokenError::MalformedClaims)?;
    let header: RawHeader =
        serde_json::from_slice(&header_bytes).map_err(|_| TokenError::MalformedClaims)?;

    if header.alg != ALGORITHM_NAME {
        return Err(TokenError::UnsupportedAlgorithm);
    }
    Ok(())
}

fn timestamp_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Deterministic lookup key for a refresh token: hex SHA-256.
///
/// Used identically on every write and read path of the session stores.
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
