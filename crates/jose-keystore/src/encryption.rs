//! JWE encryption and decryption service
//!
//! The encryption twin of [`crate::service::SigningAndValidationService`]:
//! built once from a [`KeyStore`], one encrypter per RSA key and
//! additionally one decrypter per RSA key with private material.
//! Produces and consumes JWE compact serializations with `RSA-OAEP-256`
//! key management and AES-GCM content encryption. There is no
//! symmetric-secret encryption path.

use std::collections::HashMap;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{BigUint, Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::error::{JoseError, Result};
use crate::key::{KeyMaterial, KeyStore, KeyUse};

/// The only key-management algorithm this service speaks.
const JWE_ALG_RSA_OAEP_256: &str = "RSA-OAEP-256";

/// AES-GCM tag length in bytes.
const GCM_TAG_LEN: usize = 16;

/// AES-GCM IV length in bytes.
const GCM_IV_LEN: usize = 12;

/// Content-encryption algorithm for the JWE payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentEncryption {
    /// AES-128-GCM (`enc: "A128GCM"`)
    #[default]
    A128Gcm,
    /// AES-256-GCM (`enc: "A256GCM"`)
    A256Gcm,
}

impl ContentEncryption {
    /// RFC 7518 `enc` value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A128Gcm => "A128GCM",
            Self::A256Gcm => "A256GCM",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "A128GCM" => Some(Self::A128Gcm),
            "A256GCM" => Some(Self::A256Gcm),
            _ => None,
        }
    }

    fn key_len(self) -> usize {
        match self {
            Self::A128Gcm => 16,
            Self::A256Gcm => 32,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct JweHeader {
    alg: String,
    enc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

struct JweEncrypter {
    key_id: String,
    key: RsaPublicKey,
}

struct JweDecrypter {
    key_id: String,
    key: RsaPrivateKey,
}

/// Per-key-store facade for JWE encrypt/decrypt operations.
pub struct EncryptionAndDecryptionService {
    encrypters: HashMap<String, JweEncrypter>,
    decrypters: HashMap<String, JweDecrypter>,
    default_key_id: Option<String>,
    content_encryption: ContentEncryption,
}

impl std::fmt::Debug for EncryptionAndDecryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionAndDecryptionService")
            .field("encrypters", &self.encrypters.keys().collect::<Vec<_>>())
            .field("decrypters", &self.decrypters.keys().collect::<Vec<_>>())
            .field("default_key_id", &self.default_key_id)
            .field("content_encryption", &self.content_encryption)
            .finish()
    }
}

impl EncryptionAndDecryptionService {
    /// Build encrypters and decrypters from a key store.
    ///
    /// Only RSA keys not marked `use: "sig"` participate; EC and
    /// octet-sequence keys are skipped with a log line. Per-key material
    /// errors are logged and that key skipped, never fatal. When exactly
    /// one encrypter results, its key becomes the default.
    pub fn from_key_store(key_store: &KeyStore) -> Self {
        let mut encrypters = HashMap::new();
        let mut decrypters = HashMap::new();

        for key in key_store.keys() {
            if key.key_use() == Some(KeyUse::Signature) {
                debug!(key_id = %key.key_id(), "skipping signature-use key for JWE");
                continue;
            }
            match key.material() {
                KeyMaterial::Rsa { n, e, d, p, q } => {
                    let key_id = key.key_id().to_string();
                    match rsa_public_key(&key_id, n, e) {
                        Ok(public) => {
                            encrypters.insert(
                                key_id.clone(),
                                JweEncrypter {
                                    key_id: key_id.clone(),
                                    key: public,
                                },
                            );
                        }
                        Err(err) => {
                            warn!(key_id = %key_id, error = %err, "skipping key: encrypter construction failed");
                            continue;
                        }
                    }
                    if let Some(d) = d {
                        match rsa_private_key(&key_id, n, e, d, p.as_deref(), q.as_deref()) {
                            Ok(private) => {
                                decrypters.insert(
                                    key_id.clone(),
                                    JweDecrypter {
                                        key_id,
                                        key: private,
                                    },
                                );
                            }
                            Err(err) => {
                                warn!(key_id = %key_id, error = %err, "decrypter construction failed, key encrypts only");
                            }
                        }
                    }
                }
                _ => {
                    debug!(
                        key_id = %key.key_id(),
                        kty = key.key_type().as_str(),
                        "skipping non-RSA key for JWE"
                    );
                }
            }
        }

        let default_key_id = if encrypters.len() == 1 {
            encrypters.keys().next().cloned()
        } else {
            None
        };

        Self {
            encrypters,
            decrypters,
            default_key_id,
            content_encryption: ContentEncryption::default(),
        }
    }

    /// Explicitly select the default encryption key.
    pub fn with_default_key(mut self, key_id: impl Into<String>) -> Self {
        self.default_key_id = Some(key_id.into());
        self
    }

    /// Override the content-encryption algorithm (A128GCM out of the box).
    pub fn with_content_encryption(mut self, enc: ContentEncryption) -> Self {
        self.content_encryption = enc;
        self
    }

    /// Encrypt a payload with the default key.
    ///
    /// # Errors
    ///
    /// Fails when no default key is configured or the encryption itself
    /// fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let key_id = self
            .default_key_id
            .as_deref()
            .ok_or_else(|| JoseError::Encryption {
                reason: "no default encryption key configured".to_string(),
            })?;
        self.encrypt_with_key(plaintext, key_id)
    }

    /// Encrypt a payload with a specific key.
    ///
    /// # Errors
    ///
    /// Fails when the key id is unknown or encryption fails.
    pub fn encrypt_with_key(&self, plaintext: &[u8], key_id: &str) -> Result<String> {
        let encrypter =
            self.encrypters
                .get(key_id)
                .ok_or_else(|| JoseError::Encryption {
                    reason: format!("no encryption key `{key_id}`"),
                })?;
        let enc = self.content_encryption;

        let header = JweHeader {
            alg: JWE_ALG_RSA_OAEP_256.to_string(),
            enc: enc.as_str().to_string(),
            kid: Some(encrypter.key_id.clone()),
        };
        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).map_err(|e| {
            JoseError::Encryption {
                reason: format!("header serialization failed: {e}"),
            }
        })?);

        let mut cek = vec![0u8; enc.key_len()];
        OsRng.fill_bytes(&mut cek);
        let mut iv = [0u8; GCM_IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let encrypted_key = encrypter
            .key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &cek)
            .map_err(|e| JoseError::Encryption {
                reason: format!("CEK encryption failed: {e}"),
            })?;

        // The AAD of a compact JWE is the ASCII of the encoded header.
        let mut ciphertext = match enc {
            ContentEncryption::A128Gcm => {
                seal::<Aes128Gcm>(&cek, &iv, header_b64.as_bytes(), plaintext)?
            }
            ContentEncryption::A256Gcm => {
                seal::<Aes256Gcm>(&cek, &iv, header_b64.as_bytes(), plaintext)?
            }
        };
        let tag = ciphertext.split_off(ciphertext.len() - GCM_TAG_LEN);

        Ok(format!(
            "{header_b64}.{}.{}.{}.{}",
            URL_SAFE_NO_PAD.encode(encrypted_key),
            URL_SAFE_NO_PAD.encode(iv),
            URL_SAFE_NO_PAD.encode(ciphertext),
            URL_SAFE_NO_PAD.encode(tag),
        ))
    }

    /// Decrypt a JWE compact serialization.
    ///
    /// The decrypter named by the header `kid` is tried first; when the
    /// kid is absent or unknown every decrypter is tried in turn.
    ///
    /// # Errors
    ///
    /// Fails on malformed input, unsupported algorithms, or when no
    /// decrypter can recover the payload.
    pub fn decrypt(&self, compact: &str) -> Result<Vec<u8>> {
        let parts: Vec<&str> = compact.split('.').collect();
        if parts.len() != 5 {
            return Err(JoseError::MalformedToken {
                reason: format!("expected 5 JWE segments, found {}", parts.len()),
            });
        }

        let header_bytes = decode_segment(parts[0], "header")?;
        let header: JweHeader =
            serde_json::from_slice(&header_bytes).map_err(|e| JoseError::MalformedToken {
                reason: format!("invalid JWE header: {e}"),
            })?;
        if header.alg != JWE_ALG_RSA_OAEP_256 {
            return Err(JoseError::Decryption {
                reason: format!("unsupported JWE alg `{}`", header.alg),
            });
        }
        let enc = ContentEncryption::parse(&header.enc).ok_or_else(|| JoseError::Decryption {
            reason: format!("unsupported JWE enc `{}`", header.enc),
        })?;

        let encrypted_key = decode_segment(parts[1], "encrypted key")?;
        let iv = decode_segment(parts[2], "iv")?;
        let mut ciphertext = decode_segment(parts[3], "ciphertext")?;
        let tag = decode_segment(parts[4], "tag")?;
        ciphertext.extend_from_slice(&tag);
        let aad = parts[0].as_bytes();

        let candidates: Vec<&JweDecrypter> = match header.kid.as_deref() {
            Some(kid) => match self.decrypters.get(kid) {
                Some(d) => vec![d],
                None => {
                    debug!(kid = %kid, "no decrypter for JWE kid, trying all");
                    self.decrypters.values().collect()
                }
            },
            None => self.decrypters.values().collect(),
        };

        for decrypter in candidates {
            let cek = match decrypter
                .key
                .decrypt(Oaep::new::<Sha256>(), &encrypted_key)
            {
                Ok(cek) => cek,
                Err(e) => {
                    debug!(key_id = %decrypter.key_id, error = %e, "CEK decryption failed");
                    continue;
                }
            };
            if cek.len() != enc.key_len() {
                debug!(key_id = %decrypter.key_id, "recovered CEK has wrong length");
                continue;
            }
            let opened = match enc {
                ContentEncryption::A128Gcm => open::<Aes128Gcm>(&cek, &iv, aad, &ciphertext),
                ContentEncryption::A256Gcm => open::<Aes256Gcm>(&cek, &iv, aad, &ciphertext),
            };
            match opened {
                Ok(plaintext) => return Ok(plaintext),
                Err(e) => {
                    debug!(key_id = %decrypter.key_id, error = %e, "content decryption failed");
                }
            }
        }
        Err(JoseError::Decryption {
            reason: "no decrypter could recover the payload".to_string(),
        })
    }

    /// The configured or auto-selected default encryption key id.
    pub fn default_key_id(&self) -> Option<&str> {
        self.default_key_id.as_deref()
    }

    /// Whether any decrypter (private key) is available.
    pub fn can_decrypt(&self) -> bool {
        !self.decrypters.is_empty()
    }
}

fn seal<C: Aead + KeyInit>(key: &[u8], iv: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
    let cipher = C::new_from_slice(key).map_err(|e| JoseError::Encryption {
        reason: format!("bad CEK: {e}"),
    })?;
    cipher
        .encrypt(GenericArray::from_slice(iv), Payload { msg, aad })
        .map_err(|e| JoseError::Encryption {
            reason: format!("AEAD sealing failed: {e}"),
        })
}

fn open<C: Aead + KeyInit>(key: &[u8], iv: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
    if iv.len() != GCM_IV_LEN {
        return Err(JoseError::Decryption {
            reason: format!("bad IV length {}", iv.len()),
        });
    }
    let cipher = C::new_from_slice(key).map_err(|e| JoseError::Decryption {
        reason: format!("bad CEK: {e}"),
    })?;
    cipher
        .decrypt(GenericArray::from_slice(iv), Payload { msg, aad })
        .map_err(|e| JoseError::Decryption {
            reason: format!("AEAD opening failed: {e}"),
        })
}

fn decode_segment(segment: &str, what: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment.as_bytes())
        .map_err(|e| JoseError::MalformedToken {
            reason: format!("invalid base64url in JWE {what}: {e}"),
        })
}

fn rsa_public_key(key_id: &str, n: &str, e: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::new(component(key_id, "n", n)?, component(key_id, "e", e)?).map_err(|err| {
        JoseError::InvalidKeyMaterial {
            key_id: key_id.to_string(),
            reason: format!("RSA public key rejected: {err}"),
        }
    })
}

fn rsa_private_key(
    key_id: &str,
    n: &str,
    e: &str,
    d: &str,
    p: Option<&str>,
    q: Option<&str>,
) -> Result<RsaPrivateKey> {
    let primes = match (p, q) {
        (Some(p), Some(q)) => vec![component(key_id, "p", p)?, component(key_id, "q", q)?],
        _ => Vec::new(),
    };
    RsaPrivateKey::from_components(
        component(key_id, "n", n)?,
        component(key_id, "e", e)?,
        component(key_id, "d", d)?,
        primes,
    )
    .map_err(|err| JoseError::InvalidKeyMaterial {
        key_id: key_id.to_string(),
        reason: format!("RSA private key rejected: {err}"),
    })
}

fn component(key_id: &str, field: &str, value: &str) -> Result<BigUint> {
    let bytes =
        URL_SAFE_NO_PAD
            .decode(value.as_bytes())
            .map_err(|err| JoseError::InvalidKeyMaterial {
                key_id: key_id.to_string(),
                reason: format!("invalid base64url in `{field}`: {err}"),
            })?;
    Ok(BigUint::from_bytes_be(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::traits::{PrivateKeyParts, PublicKeyParts};
    use serde_json::json;

    fn rsa_jwk(kid: &str) -> serde_json::Value {
        let key = RsaPrivateKey::new(&mut OsRng, 2048).expect("keygen");
        let b64 = |n: &BigUint| URL_SAFE_NO_PAD.encode(n.to_bytes_be());
        json!({
            "kty": "RSA",
            "kid": kid,
            "n": b64(key.n()),
            "e": b64(key.e()),
            "d": b64(key.d()),
            "p": b64(&key.primes()[0]),
            "q": b64(&key.primes()[1]),
        })
    }

    #[test]
    fn round_trip_and_tamper() {
        let jwk = rsa_jwk("enc-1");
        let store = KeyStore::from_value(&json!({ "keys": [jwk] })).unwrap();
        let service = EncryptionAndDecryptionService::from_key_store(&store);
        assert_eq!(service.default_key_id(), Some("enc-1"));
        assert!(service.can_decrypt());

        let compact = service.encrypt(b"request-object-payload").unwrap();
        assert_eq!(compact.split('.').count(), 5);
        assert_eq!(service.decrypt(&compact).unwrap(), b"request-object-payload");

        // Tampering with the ciphertext must break the GCM tag check.
        let mut parts: Vec<String> = compact.split('.').map(str::to_string).collect();
        let mut ct = parts[3].clone().into_bytes();
        let last = ct.last_mut().unwrap();
        *last = if *last == b'A' { b'B' } else { b'A' };
        parts[3] = String::from_utf8(ct).unwrap();
        assert!(service.decrypt(&parts.join(".")).is_err());
    }

    #[test]
    fn a256gcm_round_trip() {
        let store = KeyStore::from_value(&json!({ "keys": [rsa_jwk("enc-1")] })).unwrap();
        let service = EncryptionAndDecryptionService::from_key_store(&store)
            .with_content_encryption(ContentEncryption::A256Gcm);
        let compact = service.encrypt(b"payload").unwrap();
        assert_eq!(service.decrypt(&compact).unwrap(), b"payload");
    }

    #[test]
    fn public_only_store_cannot_decrypt() {
        let mut jwk = rsa_jwk("enc-1");
        let obj = jwk.as_object_mut().unwrap();
        obj.remove("d");
        obj.remove("p");
        obj.remove("q");
        let store = KeyStore::from_value(&json!({ "keys": [jwk] })).unwrap();
        let service = EncryptionAndDecryptionService::from_key_store(&store);

        let compact = service.encrypt(b"payload").unwrap();
        assert!(!service.can_decrypt());
        assert!(service.decrypt(&compact).is_err());
    }

    #[test]
    fn signature_use_and_non_rsa_keys_are_skipped() {
        let mut sig_jwk = rsa_jwk("sig-1");
        sig_jwk["use"] = json!("sig");
        let store = KeyStore::from_value(&json!({
            "keys": [
                sig_jwk,
                { "kty": "oct", "kid": "hk", "k": URL_SAFE_NO_PAD.encode(b"secret") },
            ]
        }))
        .unwrap();
        let service = EncryptionAndDecryptionService::from_key_store(&store);
        assert!(service.default_key_id().is_none());
        assert!(service.encrypt(b"x").is_err());
    }

    #[test]
    fn decrypt_rejects_unsupported_alg() {
        let store = KeyStore::from_value(&json!({ "keys": [rsa_jwk("enc-1")] })).unwrap();
        let service = EncryptionAndDecryptionService::from_key_store(&store);

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RSA1_5","enc":"A128GCM"}"#);
        let bogus = format!("{header}.AAAA.AAAA.AAAA.AAAA");
        assert!(matches!(
            service.decrypt(&bogus),
            Err(JoseError::Decryption { .. })
        ));
    }
}
