//! # jose-keystore - JWT/JOSE signing and validation core
//!
//! The cryptographic heart of an OpenID Connect identity provider:
//! building signers, verifiers, encrypters, and decrypters from JWK key
//! material, dispatching on algorithm family (RSA, EC, HMAC), and caching
//! per-issuer / per-client key material with bounded TTL caches.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            ClientKeyResolver                 │
//! │  auth-method/algorithm dispatch, fail closed │
//! └──────┬───────────────┬───────────────┬───────┘
//!        │ inline JWKS   │ JWKS URI      │ shared secret
//!        ▼               ▼               ▼
//!  bounded cache   JwksValidatorCache  SymmetricKeyValidatorCache
//!        │               │               │
//!        └───────────────┴───────────────┘
//!                        ▼
//!        SigningAndValidationService (one per KeyStore)
//!        EncryptionAndDecryptionService (JWE twin)
//! ```
//!
//! ## Design principles
//!
//! - **Fail closed**: when a validator cannot be resolved (no key
//!   material, fetch failure, algorithm/auth-method mismatch) the caches
//!   and the resolver return `None`, never a permissive default.
//! - **Immutable after construction**: a [`KeyStore`] and the services
//!   built from it are read-only; the caches own the only mutable state
//!   and coalesce concurrent loads so one miss means one fetch.
//! - **No hidden globals**: every cache is an explicitly constructed value
//!   with TTL and capacity taken from its config struct.
//!
//! ## Modules
//!
//! - `key` - JWK parsing, the key model, and [`KeyStore`]
//! - `token` - compact JWT representation and registered-claim checks
//! - `service` - signer/verifier construction and [`SigningAndValidationService`]
//! - `encryption` - the JWE twin, [`EncryptionAndDecryptionService`]
//! - `cache` - remote JWKS URI cache
//! - `symmetric` - client-secret HMAC validator cache
//! - `resolver` - per-client validator/encrypter resolution

pub mod cache;
pub mod encryption;
pub mod error;
pub mod key;
pub mod resolver;
pub mod service;
pub mod symmetric;
pub mod token;

pub use cache::{JwksCacheConfig, JwksValidatorCache};
pub use encryption::{ContentEncryption, EncryptionAndDecryptionService};
pub use error::{JoseError, Result};
pub use key::{EcCurve, JoseKey, KeyStore, KeyType, KeyUse};
pub use resolver::{ClientConfig, ClientKeyResolver, ResolverConfig, TokenEndpointAuthMethod};
pub use service::SigningAndValidationService;
pub use symmetric::{SymmetricCacheConfig, SymmetricKeyValidatorCache};
pub use token::{Audience, ClaimsPolicy, Jwt, StandardClaims};

/// Key id given to the single HMAC key synthesized from a client secret.
pub const SYMMETRIC_KEY_ID: &str = "SYMMETRIC-KEY";

/// Default time-to-live for remote JWKS cache entries (1 hour).
pub const DEFAULT_JWKS_CACHE_TTL_SECONDS: u64 = 60 * 60;

/// Default time-to-idle for symmetric-secret cache entries (24 hours,
/// measured from last access).
pub const DEFAULT_SYMMETRIC_CACHE_TTI_SECONDS: u64 = 24 * 60 * 60;

/// Default maximum number of entries held by each cache.
pub const DEFAULT_CACHE_CAPACITY: u64 = 100;

/// Default clock-skew allowance applied to exp/nbf/iat checks (seconds).
pub const DEFAULT_CLOCK_SKEW_SECONDS: u64 = 300;

/// Default timeout for a remote JWK Set fetch.
pub const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 10;
