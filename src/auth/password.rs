use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::warn;

use crate::{
    crypto::{constant_time_eq, sha256_hex},
    errors::ServiceError,
};

/// Outcome of checking a password against a stored hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordMatch {
    /// Matched a bcrypt hash
    Modern,
    /// Matched the legacy digest; the caller should re-hash
    Legacy,
    Mismatch,
}

impl PasswordMatch {
    pub fn is_match(self) -> bool {
        !matches!(self, Self::Mismatch)
    }
}

/// bcrypt hashing with a fallback for pre-migration SHA-256 digests.
#[derive(Clone)]
pub struct PasswordHasher {
    cost: u32,
    legacy_secret: String,
    decoy: Arc<OnceCell<String>>,
}

impl std::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHasher")
            .field("cost", &self.cost)
            .finish_non_exhaustive()
    }
}

impl PasswordHasher {
    pub fn new(cost: u32, legacy_secret: impl Into<String>) -> Self {
        Self {
            cost,
            legacy_secret: legacy_secret.into(),
            decoy: Arc::new(OnceCell::new()),
        }
    }

    pub fn is_modern_hash(stored: &str) -> bool {
        stored.starts_with("$2")
    }

    pub async fn hash(&self, password: &str) -> Result<String, ServiceError> {
        let password = password.to_string();
        let cost = self.cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| ServiceError::InternalError(e.to_string()))?
            .map_err(|e| ServiceError::HashError(e.to_string()))
    }

    pub async fn verify(&self, password: &str, stored: &str) -> Result<PasswordMatch, ServiceError> {
        if Self::is_modern_hash(stored) {
            let password = password.to_string();
            let stored = stored.to_string();
            let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &stored))
                .await
                .map_err(|e| ServiceError::InternalError(e.to_string()))?;
            return Ok(match verified {
                Ok(true) => PasswordMatch::Modern,
                Ok(false) => PasswordMatch::Mismatch,
                Err(e) => {
                    warn!(error = %e, "stored bcrypt hash could not be parsed");
                    PasswordMatch::Mismatch
                }
            });
        }

        let digest = self.legacy_digest(password);
        if constant_time_eq(digest.as_bytes(), stored.trim().to_ascii_lowercase().as_bytes()) {
            Ok(PasswordMatch::Legacy)
        } else {
            Ok(PasswordMatch::Mismatch)
        }
    }

    /// Spends the same bcrypt work as a real check when there is no account
    /// to check against. Always a mismatch.
    pub async fn verify_absent(&self, password: &str) -> PasswordMatch {
        let decoy = self
            .decoy
            .get_or_try_init(|| self.hash("no-such-account"))
            .await;
        match decoy {
            Ok(decoy) => {
                let _ = self.verify(password, decoy).await;
            }
            Err(e) => warn!(error = %e, "decoy password hash unavailable"),
        }
        PasswordMatch::Mismatch
    }

    /// `hex(SHA256(password ‖ secret))`
    pub fn legacy_digest(&self, password: &str) -> String {
        sha256_hex(&[password.as_bytes(), self.legacy_secret.as_bytes()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(4, "legacy-secret")
    }

    #[tokio::test]
    async fn bcrypt_round_trip() {
        let h = hasher();
        let stored = h.hash("correct horse").await.unwrap();
        assert!(PasswordHasher::is_modern_hash(&stored));
        assert_eq!(h.verify("correct horse", &stored).await.unwrap(), PasswordMatch::Modern);
        assert_eq!(h.verify("wrong", &stored).await.unwrap(), PasswordMatch::Mismatch);
    }

    #[tokio::test]
    async fn legacy_digest_matches_and_flags_upgrade() {
        let h = hasher();
        let stored = h.legacy_digest("hunter22");
        assert_eq!(stored.len(), 64);
        assert_eq!(h.verify("hunter22", &stored).await.unwrap(), PasswordMatch::Legacy);
        assert_eq!(h.verify("hunter23", &stored).await.unwrap(), PasswordMatch::Mismatch);

        let other_secret = PasswordHasher::new(4, "different");
        assert_eq!(
            other_secret.verify("hunter22", &stored).await.unwrap(),
            PasswordMatch::Mismatch
        );
    }

    #[tokio::test]
    async fn absent_accounts_still_pay_for_a_bcrypt_check() {
        let h = hasher();
        assert!(h.decoy.get().is_none());
        assert_eq!(h.verify_absent("no-such-account").await, PasswordMatch::Mismatch);
        let decoy = h.decoy.get().cloned().unwrap();
        assert!(PasswordHasher::is_modern_hash(&decoy));

        // clones share the decoy so it is hashed once per process
        let clone = h.clone();
        assert_eq!(clone.verify_absent("guess").await, PasswordMatch::Mismatch);
        assert_eq!(clone.decoy.get(), Some(&decoy));
    }

    #[tokio::test]
    async fn malformed_bcrypt_hash_is_a_mismatch() {
        assert_eq!(
            hasher().verify("x", "$2b$garbage").await.unwrap(),
            PasswordMatch::Mismatch
        );
    }
}
