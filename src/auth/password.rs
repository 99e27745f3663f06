//! Password hashing and verification using bcrypt

use crate::core::error::{PassageError, Result};

/// bcrypt only looks at the first 72 bytes of its input
const MAX_PASSWORD_BYTES: usize = 72;

/// One-way salted password hasher with a tunable work factor.
///
/// `verify` compares digests in constant time (bcrypt uses `subtle`).
#[derive(Clone)]
pub struct SecretHasher {
    cost: u32,
    /// Hash verified against when the account does not exist, so a login
    /// for an unknown email costs the same as a wrong password.
    dummy_hash: String,
}

impl SecretHasher {
    /// Create a hasher; fails if bcrypt cannot apply `cost`
    pub fn new(cost: u32) -> Result<Self> {
        let dummy_hash = bcrypt::hash("passage-dummy-password", cost)
            .map_err(|e| PassageError::HashingError(format!("Failed to apply work factor: {}", e)))?;
        Ok(Self { cost, dummy_hash })
    }

    /// Hash a password
    pub fn hash(&self, password: &str) -> Result<String> {
        check_length(password)?;
        bcrypt::hash(password, self.cost)
            .map_err(|e| PassageError::HashingError(format!("Failed to hash password: {}", e)))
    }

    /// Verify a password against a stored hash.
    ///
    /// A malformed hash or an overlong password is a hard error, not a
    /// mismatch.
    pub fn verify(&self, hash: &str, password: &str) -> Result<bool> {
        check_length(password)?;
        bcrypt::verify(password, hash)
            .map_err(|e| PassageError::HashingError(format!("Failed to verify password: {}", e)))
    }

    /// Burn one verification against the dummy hash.
    ///
    /// Fails on the same inputs `verify` fails on, so an unknown account is
    /// indistinguishable from a known one.
    pub fn verify_dummy(&self, password: &str) -> Result<()> {
        check_length(password)?;
        let _ = bcrypt::verify(password, &self.dummy_hash);
        Ok(())
    }
}

fn check_length(password: &str) -> Result<()> {
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(PassageError::HashingError(format!(
            "password exceeds {} bytes",
            MAX_PASSWORD_BYTES
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hasher() -> SecretHasher {
        SecretHasher::new(4).unwrap()
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = hasher();
        let hash = hasher.hash("secret1").unwrap();

        assert_ne!(hash, "secret1");
        assert!(hasher.verify(&hash, "secret1").unwrap());
        assert!(!hasher.verify(&hash, "secret2").unwrap());
    }

    #[test]
    fn test_hash_is_salted() {
        let hasher = hasher();
        assert_ne!(hasher.hash("secret1").unwrap(), hasher.hash("secret1").unwrap());
    }

    #[test]
    fn test_invalid_cost_is_error() {
        assert!(matches!(SecretHasher::new(2), Err(PassageError::HashingError(_))));
        assert!(matches!(SecretHasher::new(40), Err(PassageError::HashingError(_))));
    }

    #[test]
    fn test_overlong_password_is_error() {
        let hasher = hasher();
        let long = "x".repeat(MAX_PASSWORD_BYTES + 1);
        assert!(matches!(hasher.hash(&long), Err(PassageError::HashingError(_))));

        // Would match under silent truncation
        let hash = hasher.hash(&"x".repeat(MAX_PASSWORD_BYTES)).unwrap();
        assert!(matches!(hasher.verify(&hash, &long), Err(PassageError::HashingError(_))));
    }

    #[test]
    fn test_malformed_hash_is_error_not_mismatch() {
        assert!(matches!(
            hasher().verify("not-a-bcrypt-hash", "secret1"),
            Err(PassageError::HashingError(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_verify_accepts_only_original(a in "[ -~]{1,40}", b in "[ -~]{1,40}") {
            let hasher = hasher();
            let hash = hasher.hash(&a).unwrap();
            prop_assert!(hasher.verify(&hash, &a).unwrap());
            if a != b {
                prop_assert!(!hasher.verify(&hash, &b).unwrap());
            }
        }
    }
}
