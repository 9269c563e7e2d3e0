//! Client-secret HMAC validator cache
//!
//! A client authenticating with `client_secret_jwt` signs its assertion
//! with an HMAC over the raw client secret. This cache builds one
//! validator per distinct secret and keeps it warm while the client is
//! active, expiring entries a fixed interval after last use.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::warn;

use crate::key::{JoseKey, KeyStore};
use crate::service::SigningAndValidationService;
use crate::{DEFAULT_CACHE_CAPACITY, DEFAULT_SYMMETRIC_CACHE_TTI_SECONDS, SYMMETRIC_KEY_ID};

/// Tuning for [`SymmetricKeyValidatorCache`].
#[derive(Debug, Clone)]
pub struct SymmetricCacheConfig {
    /// How long an entry survives after its last access.
    pub tti: Duration,
    /// Maximum number of distinct secrets cached at once.
    pub max_entries: u64,
}

impl Default for SymmetricCacheConfig {
    fn default() -> Self {
        Self {
            tti: Duration::from_secs(DEFAULT_SYMMETRIC_CACHE_TTI_SECONDS),
            max_entries: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Idle-expiring cache of HMAC validators keyed by client secret.
pub struct SymmetricKeyValidatorCache {
    validators: Cache<String, Arc<SigningAndValidationService>>,
}

impl std::fmt::Debug for SymmetricKeyValidatorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKeyValidatorCache")
            .field("validators", &self.validators.entry_count())
            .finish()
    }
}

impl Default for SymmetricKeyValidatorCache {
    fn default() -> Self {
        Self::new(SymmetricCacheConfig::default())
    }
}

impl SymmetricKeyValidatorCache {
    /// Create a cache with the given tuning.
    pub fn new(config: SymmetricCacheConfig) -> Self {
        Self {
            validators: Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_idle(config.tti)
                .build(),
        }
    }

    /// Resolve an HMAC validator for a client secret.
    ///
    /// The validator holds a single octet-sequence key named
    /// [`SYMMETRIC_KEY_ID`] and supports HS256/HS384/HS512. Returns
    /// `None` for an empty secret; nothing is cached in that case.
    pub async fn validator(&self, client_secret: &str) -> Option<Arc<SigningAndValidationService>> {
        if client_secret.is_empty() {
            warn!("Refusing to build HMAC validator for empty client secret");
            return None;
        }
        let validator = self
            .validators
            .get_with(client_secret.to_string(), async {
                let key = JoseKey::from_secret(SYMMETRIC_KEY_ID, client_secret.as_bytes());
                Arc::new(SigningAndValidationService::from_key_store(
                    KeyStore::from_keys(vec![key]),
                ))
            })
            .await;
        Some(validator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::Algorithm;

    use crate::token::{Jwt, StandardClaims};

    fn claims() -> StandardClaims {
        StandardClaims {
            iss: Some("client-1".to_string()),
            sub: Some("client-1".to_string()),
            exp: Some(4_102_444_800),
            ..StandardClaims::default()
        }
    }

    #[tokio::test]
    async fn empty_secret_yields_none() {
        let cache = SymmetricKeyValidatorCache::default();
        assert!(cache.validator("").await.is_none());
    }

    #[tokio::test]
    async fn same_secret_shares_one_validator() {
        let cache = SymmetricKeyValidatorCache::default();
        let a = cache.validator("s3cr3t-value").await.unwrap();
        let b = cache.validator("s3cr3t-value").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn validator_round_trips_hmac_signatures() {
        let cache = SymmetricKeyValidatorCache::default();
        let validator = cache.validator("s3cr3t-value").await.unwrap();

        let mut jwt = Jwt::new(Algorithm::HS256, claims());
        validator.sign_default(&mut jwt).unwrap();
        assert!(validator.validate_signature(&jwt));

        let other = cache.validator("different-secret").await.unwrap();
        assert!(!other.validate_signature(&jwt));
    }
}
