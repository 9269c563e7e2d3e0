//! Per-client validator and encrypter resolution
//!
//! OAuth clients present signed assertions (`private_key_jwt`,
//! `client_secret_jwt`) or receive encrypted responses. This module maps
//! a client registration to the right validator or encrypter, going
//! through the inline-JWKS, remote-JWKS, or shared-secret path and
//! failing closed on every mismatch.

use std::sync::Arc;

use jsonwebtoken::Algorithm;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{JwksCacheConfig, JwksValidatorCache};
use crate::encryption::EncryptionAndDecryptionService;
use crate::error::JoseError;
use crate::key::KeyStore;
use crate::service::SigningAndValidationService;
use crate::symmetric::{SymmetricCacheConfig, SymmetricKeyValidatorCache};

/// How a client authenticates at the token endpoint (RFC 7591 wire names).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    ClientSecretBasic,
    ClientSecretPost,
    ClientSecretJwt,
    PrivateKeyJwt,
    None,
}

impl TokenEndpointAuthMethod {
    /// Whether this method involves a signed JWT assertion at all.
    pub fn uses_assertion(self) -> bool {
        matches!(self, Self::ClientSecretJwt | Self::PrivateKeyJwt)
    }
}

/// The slice of a client registration the resolver needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    #[serde(default)]
    pub token_endpoint_auth_method: Option<TokenEndpointAuthMethod>,
    #[serde(default)]
    pub token_endpoint_auth_signing_alg: Option<Algorithm>,
    /// Inline JWK Set document registered by the client.
    #[serde(default)]
    pub jwks: Option<String>,
    /// Remote JWK Set location registered by the client.
    #[serde(default)]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Tuning for [`ClientKeyResolver`].
#[derive(Debug, Clone, Default)]
pub struct ResolverConfig {
    /// Reject symmetric (shared-secret) assertion validation outright,
    /// as required by deployment profiles that mandate asymmetric client
    /// authentication.
    pub private_key_only: bool,
    pub jwks_cache: JwksCacheConfig,
    pub symmetric_cache: SymmetricCacheConfig,
}

/// Resolves validators and encrypters for registered clients.
///
/// All three key sources are cached independently: remote JWKS by URI,
/// shared secrets by value, and inline JWK Set documents by content.
/// Every resolution failure returns `None` after logging; callers treat
/// `None` as an authentication or encryption refusal.
pub struct ClientKeyResolver {
    private_key_only: bool,
    remote: JwksValidatorCache,
    symmetric: SymmetricKeyValidatorCache,
    inline_validators: Cache<String, Arc<SigningAndValidationService>>,
    inline_encrypters: Cache<String, Arc<EncryptionAndDecryptionService>>,
}

impl std::fmt::Debug for ClientKeyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientKeyResolver")
            .field("private_key_only", &self.private_key_only)
            .field("remote", &self.remote)
            .field("symmetric", &self.symmetric)
            .finish()
    }
}

impl Default for ClientKeyResolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

impl ClientKeyResolver {
    /// Create a resolver with the given tuning.
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            private_key_only: config.private_key_only,
            inline_validators: inline_cache(&config.jwks_cache),
            inline_encrypters: inline_cache(&config.jwks_cache),
            remote: JwksValidatorCache::new(config.jwks_cache),
            symmetric: SymmetricKeyValidatorCache::new(config.symmetric_cache),
        }
    }

    /// Resolve the validator for a client assertion signed with
    /// `algorithm`.
    ///
    /// Returns `None` whenever the registration and the assertion do not
    /// line up: the auth method carries no assertion, the algorithm
    /// family contradicts the method, the registered signing algorithm
    /// differs, or the key material is missing or unusable.
    pub async fn validator(
        &self,
        client: &ClientConfig,
        algorithm: Algorithm,
    ) -> Option<Arc<SigningAndValidationService>> {
        let method = match client.token_endpoint_auth_method {
            Some(method) if method.uses_assertion() => method,
            _ => {
                debug!(
                    client_id = %client.client_id,
                    "Client auth method does not use signed assertions"
                );
                return None;
            }
        };

        if let Some(registered) = client.token_endpoint_auth_signing_alg {
            if registered != algorithm {
                warn!(
                    client_id = %client.client_id,
                    registered = ?registered,
                    presented = ?algorithm,
                    "Assertion algorithm does not match registration"
                );
                return None;
            }
        }

        match method {
            TokenEndpointAuthMethod::PrivateKeyJwt => {
                if !is_asymmetric(algorithm) {
                    warn!(
                        client_id = %client.client_id,
                        algorithm = ?algorithm,
                        "private_key_jwt requires an asymmetric algorithm"
                    );
                    return None;
                }
                if let Some(document) = &client.jwks {
                    self.inline_validator(&client.client_id, document).await
                } else if let Some(uri) = &client.jwks_uri {
                    self.remote.validator(uri).await
                } else {
                    warn!(
                        client_id = %client.client_id,
                        "private_key_jwt client has neither jwks nor jwks_uri"
                    );
                    None
                }
            }
            TokenEndpointAuthMethod::ClientSecretJwt => {
                if self.private_key_only {
                    warn!(
                        client_id = %client.client_id,
                        "Symmetric client authentication is disabled"
                    );
                    return None;
                }
                if !is_symmetric(algorithm) {
                    warn!(
                        client_id = %client.client_id,
                        algorithm = ?algorithm,
                        "client_secret_jwt requires an HMAC algorithm"
                    );
                    return None;
                }
                match client.client_secret.as_deref() {
                    Some(secret) => self.symmetric.validator(secret).await,
                    None => {
                        warn!(
                            client_id = %client.client_id,
                            "client_secret_jwt client has no secret registered"
                        );
                        None
                    }
                }
            }
            _ => None,
        }
    }

    /// Resolve the encrypter for responses to a client.
    ///
    /// Only asymmetric key sources apply; a client with neither inline
    /// nor remote JWKS gets `None`.
    pub async fn encrypter(
        &self,
        client: &ClientConfig,
    ) -> Option<Arc<EncryptionAndDecryptionService>> {
        if let Some(document) = &client.jwks {
            self.inline_encrypter(&client.client_id, document).await
        } else if let Some(uri) = &client.jwks_uri {
            self.remote.encrypter(uri).await
        } else {
            debug!(client_id = %client.client_id, "Client has no encryption key source");
            None
        }
    }

    async fn inline_validator(
        &self,
        client_id: &str,
        document: &str,
    ) -> Option<Arc<SigningAndValidationService>> {
        let result = self
            .inline_validators
            .try_get_with(document.to_string(), async {
                let key_store = KeyStore::parse(document)?;
                Ok::<_, JoseError>(Arc::new(SigningAndValidationService::from_key_store(
                    key_store,
                )))
            })
            .await;
        match result {
            Ok(validator) => Some(validator),
            Err(err) => {
                warn!(client_id = %client_id, error = %err, "Inline JWK Set rejected");
                None
            }
        }
    }

    async fn inline_encrypter(
        &self,
        client_id: &str,
        document: &str,
    ) -> Option<Arc<EncryptionAndDecryptionService>> {
        let result = self
            .inline_encrypters
            .try_get_with(document.to_string(), async {
                let key_store = KeyStore::parse(document)?;
                Ok::<_, JoseError>(Arc::new(EncryptionAndDecryptionService::from_key_store(
                    &key_store,
                )))
            })
            .await;
        match result {
            Ok(encrypter) => Some(encrypter),
            Err(err) => {
                warn!(client_id = %client_id, error = %err, "Inline JWK Set rejected");
                None
            }
        }
    }
}

/// Inline-document caches share the remote cache's bounds but hold
/// different service types.
fn inline_cache<V: Send + Sync + 'static>(config: &JwksCacheConfig) -> Cache<String, Arc<V>> {
    Cache::builder()
        .max_capacity(config.max_entries)
        .time_to_live(config.ttl)
        .build()
}

/// RSA and EC signature algorithms acceptable for `private_key_jwt`.
fn is_asymmetric(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
            | Algorithm::ES256
            | Algorithm::ES384
    )
}

/// HMAC algorithms acceptable for `client_secret_jwt`.
fn is_symmetric(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}
