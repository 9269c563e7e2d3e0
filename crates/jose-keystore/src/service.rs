//! Signer/verifier construction and the signing & validation service
//!
//! [`SigningAndValidationService`] is built once from a [`KeyStore`]:
//! every key yields exactly one verifier, and keys with private material
//! additionally yield one signer. Construction never fails as a whole -
//! a key with unusable material is logged and skipped. The service is
//! immutable after construction and safe to share behind an `Arc`.

use std::collections::HashMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{crypto, Algorithm, DecodingKey, EncodingKey};
use p256::pkcs8::EncodePrivateKey;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::BigUint;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{JoseError, Result};
use crate::key::{EcCurve, JoseKey, KeyMaterial, KeyStore};
use crate::token::Jwt;

/// Algorithms an RSA key can serve.
const RSA_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

/// Algorithms an octet-sequence key can serve.
const HMAC_ALGORITHMS: &[Algorithm] = &[Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

struct JwtSigner {
    key_id: String,
    key: EncodingKey,
    algorithms: Vec<Algorithm>,
    preferred_algorithm: Algorithm,
}

struct JwtVerifier {
    key_id: String,
    key: DecodingKey,
    algorithms: Vec<Algorithm>,
}

/// Per-key-store facade exposing sign and verify operations.
///
/// Signing mutates the JWT in place (header `alg`/`kid` and the
/// signature field). Validation tries every verifier and reports a plain
/// bool: a signature that does not check out is not an error.
pub struct SigningAndValidationService {
    key_store: KeyStore,
    signers: HashMap<String, JwtSigner>,
    verifiers: HashMap<String, JwtVerifier>,
    default_signer_key_id: Option<String>,
    default_algorithm: Algorithm,
    match_kid_first: bool,
}

impl std::fmt::Debug for SigningAndValidationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningAndValidationService")
            .field("signers", &self.signers.keys().collect::<Vec<_>>())
            .field("verifiers", &self.verifiers.keys().collect::<Vec<_>>())
            .field("default_signer_key_id", &self.default_signer_key_id)
            .field("default_algorithm", &self.default_algorithm)
            .field("match_kid_first", &self.match_kid_first)
            .finish()
    }
}

impl SigningAndValidationService {
    /// Build signers and verifiers from a key store.
    ///
    /// Dispatches per key on the key type: RSA keys serve RS*/PS*, EC
    /// keys ES256 or ES384 depending on curve, octet-sequence keys HS*.
    /// A key whose cryptographic construction fails is skipped (verifier
    /// and signer independently), never fatal.
    ///
    /// When the store holds exactly one key, that key becomes the default
    /// signer and its preferred algorithm the default algorithm;
    /// [`Self::with_default_signer`] and [`Self::with_default_algorithm`]
    /// override this.
    pub fn from_key_store(key_store: KeyStore) -> Self {
        let mut signers = HashMap::new();
        let mut verifiers = HashMap::new();

        for key in key_store.keys() {
            let key_id = key.key_id().to_string();
            match build_verifier(key) {
                Ok(verifier) => {
                    verifiers.insert(key_id.clone(), verifier);
                }
                Err(e) => {
                    warn!(key_id = %key_id, error = %e, "skipping key: verifier construction failed");
                    continue;
                }
            }
            if key.is_private() {
                match build_signer(key) {
                    Ok(signer) => {
                        signers.insert(key_id, signer);
                    }
                    Err(e) => {
                        warn!(
                            key_id = %key_id,
                            error = %e,
                            "signer construction failed, key keeps its verifier only"
                        );
                    }
                }
            }
        }

        let default_signer_key_id = if key_store.len() == 1 {
            Some(key_store.keys()[0].key_id().to_string())
        } else {
            None
        };
        // The advertised default must be one the default signer can
        // actually produce; RS256 only when no signer decides it.
        let default_algorithm = default_signer_key_id
            .as_deref()
            .and_then(|key_id| signers.get(key_id))
            .map(|signer| signer.preferred_algorithm)
            .unwrap_or(Algorithm::RS256);

        Self {
            key_store,
            signers,
            verifiers,
            default_signer_key_id,
            default_algorithm,
            match_kid_first: false,
        }
    }

    /// Explicitly select the default signer key.
    pub fn with_default_signer(mut self, key_id: impl Into<String>) -> Self {
        self.default_signer_key_id = Some(key_id.into());
        self
    }

    /// Override the default signing algorithm. Out of the box this is
    /// the auto-selected default signer's preferred algorithm, or RS256
    /// when no default signer was selected.
    pub fn with_default_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.default_algorithm = algorithm;
        self
    }

    /// Opt into strict kid-first verification: when the token header
    /// carries a `kid`, only the matching verifier is consulted; the full
    /// scan is used only for tokens without a `kid`. Off by default -
    /// the baseline behavior is the first-successful-verifier scan.
    pub fn with_kid_matching(mut self, enabled: bool) -> Self {
        self.match_kid_first = enabled;
        self
    }

    /// Sign with the default signer key.
    ///
    /// Uses the default algorithm when the key supports it, otherwise the
    /// key's preferred algorithm (an HMAC-only store signs HS256 even if
    /// the service default is RS256).
    ///
    /// # Errors
    ///
    /// [`JoseError::NoDefaultSigner`] when no default key is configured,
    /// [`JoseError::UnknownSignerKey`] when the configured key has no
    /// private material, or a [`JoseError::Signing`] failure.
    pub fn sign_default(&self, jwt: &mut Jwt) -> Result<()> {
        let key_id = self
            .default_signer_key_id
            .as_deref()
            .ok_or(JoseError::NoDefaultSigner)?;
        let signer = self
            .signers
            .get(key_id)
            .ok_or_else(|| JoseError::UnknownSignerKey {
                key_id: key_id.to_string(),
            })?;
        let algorithm = if signer.algorithms.contains(&self.default_algorithm) {
            self.default_algorithm
        } else {
            signer.preferred_algorithm
        };
        self.sign_with(jwt, signer, algorithm)
    }

    /// Sign with the first signer that supports the requested algorithm.
    ///
    /// # Errors
    ///
    /// [`JoseError::NoSignerForAlgorithm`] when no signer in the service
    /// supports it (also logged); the JWT is left untouched.
    pub fn sign_with_algorithm(&self, jwt: &mut Jwt, algorithm: Algorithm) -> Result<()> {
        match self
            .signers
            .values()
            .find(|s| s.algorithms.contains(&algorithm))
        {
            Some(signer) => self.sign_with(jwt, signer, algorithm),
            None => {
                error!(algorithm = ?algorithm, "no signer supports requested algorithm");
                Err(JoseError::NoSignerForAlgorithm { algorithm })
            }
        }
    }

    fn sign_with(&self, jwt: &mut Jwt, signer: &JwtSigner, algorithm: Algorithm) -> Result<()> {
        let input = jwt.prepare_for_signing(algorithm, &signer.key_id)?;
        let signature =
            crypto::sign(input.as_bytes(), &signer.key, algorithm).map_err(|e| {
                JoseError::Signing {
                    key_id: signer.key_id.clone(),
                    reason: e.to_string(),
                }
            })?;
        jwt.set_signature(signature);
        debug!(key_id = %signer.key_id, algorithm = ?algorithm, "signed JWT");
        Ok(())
    }

    /// Validate a signed JWT against the verifiers in this service.
    ///
    /// Tries every verifier whose algorithm family matches the token's
    /// header algorithm, in unspecified order, and returns `true` on the
    /// first success. Per-verifier cryptographic errors are logged and
    /// treated as non-matches. An unsigned token is always `false`.
    pub fn validate_signature(&self, jwt: &Jwt) -> bool {
        let Some(signature) = jwt.signature() else {
            debug!("token has no signature");
            return false;
        };
        let algorithm = jwt.header().alg;
        let input = match jwt.signing_input() {
            Ok(input) => input,
            Err(e) => {
                debug!(error = %e, "could not reconstruct signing input");
                return false;
            }
        };

        if self.match_kid_first {
            if let Some(kid) = jwt.header().kid.as_deref() {
                return match self.verifiers.get(kid) {
                    Some(verifier) => verify_one(verifier, signature, &input, algorithm),
                    None => {
                        debug!(kid = %kid, "no verifier for token kid");
                        false
                    }
                };
            }
            // Tokens without a kid fall back to the full scan.
        }

        for verifier in self.verifiers.values() {
            if verify_one(verifier, signature, &input, algorithm) {
                return true;
            }
        }
        false
    }

    /// Parse a compact serialization and validate its signature.
    pub fn validate_compact(&self, compact: &str) -> bool {
        match Jwt::parse(compact) {
            Ok(jwt) => self.validate_signature(&jwt),
            Err(e) => {
                debug!(error = %e, "token failed to parse");
                false
            }
        }
    }

    /// Public projections of every key; symmetric keys are omitted.
    pub fn all_public_keys(&self) -> Vec<JoseKey> {
        self.key_store
            .keys()
            .iter()
            .filter_map(JoseKey::public_projection)
            .collect()
    }

    /// The public JWK Set document for discovery metadata.
    pub fn public_jwk_set(&self) -> Value {
        self.key_store.public_jwk_set()
    }

    /// Union of the algorithms supported by every signer and verifier,
    /// for advertising in discovery metadata
    /// (`id_token_signing_alg_values_supported` and friends).
    pub fn all_signing_algs_supported(&self) -> Vec<Algorithm> {
        let mut algs: Vec<Algorithm> = Vec::new();
        let all = self
            .signers
            .values()
            .map(|s| &s.algorithms)
            .chain(self.verifiers.values().map(|v| &v.algorithms));
        for list in all {
            for alg in list {
                if !algs.contains(alg) {
                    algs.push(*alg);
                }
            }
        }
        algs
    }

    /// The configured or auto-selected default signer key id.
    pub fn default_signer_key_id(&self) -> Option<&str> {
        self.default_signer_key_id.as_deref()
    }

    /// The default signing algorithm.
    pub fn default_algorithm(&self) -> Algorithm {
        self.default_algorithm
    }

    /// The key store this service was built from.
    pub fn key_store(&self) -> &KeyStore {
        &self.key_store
    }
}

fn verify_one(verifier: &JwtVerifier, signature: &str, input: &str, algorithm: Algorithm) -> bool {
    if !verifier.algorithms.contains(&algorithm) {
        return false;
    }
    match crypto::verify(signature, input.as_bytes(), &verifier.key, algorithm) {
        Ok(valid) => valid,
        Err(e) => {
            debug!(key_id = %verifier.key_id, error = %e, "verifier error during validation");
            false
        }
    }
}

fn build_verifier(key: &JoseKey) -> Result<JwtVerifier> {
    let key_id = key.key_id().to_string();
    let (decoding_key, algorithms) = match key.material() {
        KeyMaterial::Rsa { n, e, .. } => {
            let decoding =
                DecodingKey::from_rsa_components(n, e).map_err(|err| invalid(&key_id, &err))?;
            (decoding, RSA_ALGORITHMS.to_vec())
        }
        KeyMaterial::EllipticCurve { curve, x, y, .. } => {
            let decoding =
                DecodingKey::from_ec_components(x, y).map_err(|err| invalid(&key_id, &err))?;
            (decoding, vec![curve_algorithm(*curve)])
        }
        KeyMaterial::OctetSequence { k } => {
            (DecodingKey::from_secret(k), HMAC_ALGORITHMS.to_vec())
        }
    };
    Ok(JwtVerifier {
        key_id,
        key: decoding_key,
        algorithms,
    })
}

fn build_signer(key: &JoseKey) -> Result<JwtSigner> {
    let key_id = key.key_id().to_string();
    let (encoding_key, algorithms, preferred) = match key.material() {
        KeyMaterial::Rsa { n, e, d, p, q } => {
            let d = d.as_deref().ok_or_else(|| JoseError::InvalidKeyMaterial {
                key_id: key_id.clone(),
                reason: "RSA key has no private exponent".to_string(),
            })?;
            let encoding = rsa_encoding_key(&key_id, n, e, d, p.as_deref(), q.as_deref())?;
            (encoding, RSA_ALGORITHMS.to_vec(), Algorithm::RS256)
        }
        KeyMaterial::EllipticCurve { curve, d, .. } => {
            let d = d.as_deref().ok_or_else(|| JoseError::InvalidKeyMaterial {
                key_id: key_id.clone(),
                reason: "EC key has no private scalar".to_string(),
            })?;
            let encoding = ec_encoding_key(&key_id, *curve, d)?;
            let algorithm = curve_algorithm(*curve);
            (encoding, vec![algorithm], algorithm)
        }
        KeyMaterial::OctetSequence { k } => (
            EncodingKey::from_secret(k),
            HMAC_ALGORITHMS.to_vec(),
            Algorithm::HS256,
        ),
    };
    Ok(JwtSigner {
        key_id,
        key: encoding_key,
        algorithms,
        preferred_algorithm: preferred,
    })
}

fn curve_algorithm(curve: EcCurve) -> Algorithm {
    match curve {
        EcCurve::P256 => Algorithm::ES256,
        EcCurve::P384 => Algorithm::ES384,
    }
}

/// Reassemble an RSA private key from its JWK components and hand it to
/// the JOSE backend as PKCS#1 DER. The CRT primes are passed along when
/// the JWK carries them.
fn rsa_encoding_key(
    key_id: &str,
    n: &str,
    e: &str,
    d: &str,
    p: Option<&str>,
    q: Option<&str>,
) -> Result<EncodingKey> {
    let n = big_uint(key_id, "n", n)?;
    let e = big_uint(key_id, "e", e)?;
    let d = big_uint(key_id, "d", d)?;
    let primes = match (p, q) {
        (Some(p), Some(q)) => vec![big_uint(key_id, "p", p)?, big_uint(key_id, "q", q)?],
        _ => Vec::new(),
    };
    let private_key =
        rsa::RsaPrivateKey::from_components(n, e, d, primes).map_err(|err| {
            JoseError::InvalidKeyMaterial {
                key_id: key_id.to_string(),
                reason: format!("RSA private key rejected: {err}"),
            }
        })?;
    let der = private_key
        .to_pkcs1_der()
        .map_err(|err| JoseError::InvalidKeyMaterial {
            key_id: key_id.to_string(),
            reason: format!("PKCS#1 encoding failed: {err}"),
        })?;
    Ok(EncodingKey::from_rsa_der(der.as_bytes()))
}

/// Convert a raw EC private scalar to the PKCS#8 DER the JOSE backend
/// expects (SEC1 bytes carry no curve identification of their own).
fn ec_encoding_key(key_id: &str, curve: EcCurve, d: &str) -> Result<EncodingKey> {
    let d = decode_b64(key_id, "d", d)?;
    let der = match curve {
        EcCurve::P256 => p256::SecretKey::from_slice(&d)
            .map_err(|err| invalid(key_id, &err))?
            .to_pkcs8_der()
            .map_err(|err| invalid(key_id, &err))?,
        EcCurve::P384 => p384::SecretKey::from_slice(&d)
            .map_err(|err| invalid(key_id, &err))?
            .to_pkcs8_der()
            .map_err(|err| invalid(key_id, &err))?,
    };
    Ok(EncodingKey::from_ec_der(der.as_bytes()))
}

fn big_uint(key_id: &str, field: &str, value: &str) -> Result<BigUint> {
    Ok(BigUint::from_bytes_be(&decode_b64(key_id, field, value)?))
}

fn decode_b64(key_id: &str, field: &str, value: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value.as_bytes())
        .map_err(|err| JoseError::InvalidKeyMaterial {
            key_id: key_id.to_string(),
            reason: format!("invalid base64url in `{field}`: {err}"),
        })
}

fn invalid(key_id: &str, err: &dyn std::fmt::Display) -> JoseError {
    JoseError::InvalidKeyMaterial {
        key_id: key_id.to_string(),
        reason: err.to_string(),
    }
}
