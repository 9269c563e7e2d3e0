//! Error types for the JOSE signing and validation core
//!
//! The taxonomy separates configuration errors (missing default signer,
//! no key material registered) from transient conditions (JWKS fetch
//! failures) and per-key construction problems. A signature that simply
//! does not verify is never an error: `validate_signature` reports it as
//! `false`.

use jsonwebtoken::Algorithm;
use thiserror::Error;

/// Errors produced by key parsing, service construction, signing,
/// encryption, and JWKS fetching.
#[derive(Debug, Error)]
pub enum JoseError {
    /// The JWK Set document as a whole could not be parsed.
    #[error("malformed JWK Set document: {reason}")]
    MalformedKeySet { reason: String },

    /// A JWK declared a `kty` this implementation does not handle.
    #[error("unsupported key type `{kty}`")]
    UnsupportedKeyType { kty: String },

    /// Key material was present but cryptographically unusable.
    #[error("invalid key material for `{key_id}`: {reason}")]
    InvalidKeyMaterial { key_id: String, reason: String },

    /// Signing was requested through `sign_default` but no default signer
    /// key is configured. This is a deployment bug, not a runtime
    /// condition, so it surfaces as an error rather than a log line.
    #[error("no default signer key configured")]
    NoDefaultSigner,

    /// The configured default signer key id has no private material.
    #[error("signer key `{key_id}` is not available")]
    UnknownSignerKey { key_id: String },

    /// No signer in the service supports the requested algorithm.
    #[error("no signer supports algorithm {algorithm:?}")]
    NoSignerForAlgorithm { algorithm: Algorithm },

    /// A compact JWT/JWE serialization could not be parsed.
    #[error("malformed token: {reason}")]
    MalformedToken { reason: String },

    /// The signing operation itself failed.
    #[error("signing failed for key `{key_id}`: {reason}")]
    Signing { key_id: String, reason: String },

    /// Fetching or parsing a remote JWK Set failed.
    #[error("JWKS fetch from `{uri}` failed: {reason}")]
    JwksFetch { uri: String, reason: String },

    /// A registered claim failed validation against the policy.
    #[error("claim validation failed: {reason}")]
    ClaimValidation { reason: String },

    /// JWE encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// JWE decryption failed.
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, JoseError>;
