//! Remote JWKS cache
//!
//! Fetches JWK Set documents from client-registered `jwks_uri` endpoints
//! and caches the services built from them. Entries expire on a fixed
//! TTL so key rotation at the client is picked up without restarts, and
//! concurrent lookups for the same URI are coalesced into a single fetch.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::{debug, info, warn};

use crate::encryption::EncryptionAndDecryptionService;
use crate::error::{JoseError, Result};
use crate::key::KeyStore;
use crate::service::SigningAndValidationService;
use crate::{DEFAULT_CACHE_CAPACITY, DEFAULT_FETCH_TIMEOUT_SECONDS, DEFAULT_JWKS_CACHE_TTL_SECONDS};

/// Tuning for [`JwksValidatorCache`].
#[derive(Debug, Clone)]
pub struct JwksCacheConfig {
    /// How long a fetched JWK Set stays usable before a refetch.
    pub ttl: Duration,
    /// Maximum number of distinct URIs cached at once.
    pub max_entries: u64,
    /// Timeout applied to each HTTP fetch.
    pub fetch_timeout: Duration,
}

impl Default for JwksCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_JWKS_CACHE_TTL_SECONDS),
            max_entries: DEFAULT_CACHE_CAPACITY,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECONDS),
        }
    }
}

/// TTL cache of validators and encrypters keyed by JWKS URI.
///
/// Lookups return `None` when the document cannot be fetched or parsed;
/// the failure is logged and nothing is cached, so the next lookup
/// retries. A hit for one URI never blocks lookups for another.
pub struct JwksValidatorCache {
    http: reqwest::Client,
    validators: Cache<String, Arc<SigningAndValidationService>>,
    encrypters: Cache<String, Arc<EncryptionAndDecryptionService>>,
}

impl std::fmt::Debug for JwksValidatorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksValidatorCache")
            .field("validators", &self.validators.entry_count())
            .field("encrypters", &self.encrypters.entry_count())
            .finish()
    }
}

impl Default for JwksValidatorCache {
    fn default() -> Self {
        Self::new(JwksCacheConfig::default())
    }
}

impl JwksValidatorCache {
    /// Create a cache with the given tuning.
    pub fn new(config: JwksCacheConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(config.fetch_timeout)
                .build()
                .expect("Failed to create HTTP client"),
            validators: Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(config.ttl)
                .build(),
            encrypters: Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(config.ttl)
                .build(),
        }
    }

    /// Resolve a signature validator for a JWKS URI.
    ///
    /// Concurrent calls for the same URI share one fetch. Returns `None`
    /// on fetch or parse failure.
    pub async fn validator(&self, jwks_uri: &str) -> Option<Arc<SigningAndValidationService>> {
        let uri = jwks_uri.to_string();
        let result = self
            .validators
            .try_get_with(uri.clone(), async {
                let key_store = self.fetch_key_store(&uri).await?;
                Ok::<_, JoseError>(Arc::new(SigningAndValidationService::from_key_store(
                    key_store,
                )))
            })
            .await;
        match result {
            Ok(validator) => Some(validator),
            Err(err) => {
                warn!(jwks_uri = %jwks_uri, error = %err, "Failed to resolve JWKS validator");
                None
            }
        }
    }

    /// Resolve an encrypter for a JWKS URI.
    ///
    /// Same caching and failure behavior as [`Self::validator`].
    pub async fn encrypter(&self, jwks_uri: &str) -> Option<Arc<EncryptionAndDecryptionService>> {
        let uri = jwks_uri.to_string();
        let result = self
            .encrypters
            .try_get_with(uri.clone(), async {
                let key_store = self.fetch_key_store(&uri).await?;
                Ok::<_, JoseError>(Arc::new(EncryptionAndDecryptionService::from_key_store(
                    &key_store,
                )))
            })
            .await;
        match result {
            Ok(encrypter) => Some(encrypter),
            Err(err) => {
                warn!(jwks_uri = %jwks_uri, error = %err, "Failed to resolve JWKS encrypter");
                None
            }
        }
    }

    /// Drop cached entries for a URI, forcing a refetch on next lookup.
    pub async fn invalidate(&self, jwks_uri: &str) {
        self.validators.invalidate(jwks_uri).await;
        self.encrypters.invalidate(jwks_uri).await;
        debug!(jwks_uri = %jwks_uri, "JWKS cache entries invalidated");
    }

    async fn fetch_key_store(&self, jwks_uri: &str) -> Result<KeyStore> {
        info!(jwks_uri = %jwks_uri, "Fetching JWK Set from endpoint");

        // HTTP is only acceptable for loopback endpoints in tests.
        if !jwks_uri.starts_with("https://")
            && !jwks_uri.starts_with("http://localhost")
            && !jwks_uri.starts_with("http://127.0.0.1")
        {
            return Err(JoseError::JwksFetch {
                uri: jwks_uri.to_string(),
                reason: "JWKS endpoint must use HTTPS (HTTP only allowed for loopback)".to_string(),
            });
        }

        let response = self
            .http
            .get(jwks_uri)
            .send()
            .await
            .map_err(|e| JoseError::JwksFetch {
                uri: jwks_uri.to_string(),
                reason: format!("request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(JoseError::JwksFetch {
                uri: jwks_uri.to_string(),
                reason: format!("endpoint returned status {}", response.status()),
            });
        }

        let body = response.text().await.map_err(|e| JoseError::JwksFetch {
            uri: jwks_uri.to_string(),
            reason: format!("failed to read body: {e}"),
        })?;

        let key_store = KeyStore::parse(&body)?;
        info!(
            jwks_uri = %jwks_uri,
            key_count = key_store.len(),
            "Successfully fetched JWK Set"
        );
        Ok(key_store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = JwksCacheConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(3600));
        assert_eq!(config.max_entries, 100);
        assert_eq!(config.fetch_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn plain_http_endpoint_is_rejected() {
        let cache = JwksValidatorCache::default();
        assert!(cache.validator("http://example.com/jwks").await.is_none());
        assert!(cache.encrypter("http://example.com/jwks").await.is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_none_not_panic() {
        let cache = JwksValidatorCache::new(JwksCacheConfig {
            fetch_timeout: Duration::from_millis(200),
            ..JwksCacheConfig::default()
        });
        assert!(cache.validator("http://127.0.0.1:1/jwks").await.is_none());
    }
}
