//! JOSE key model and key store
//!
//! Parses RFC 7517 JSON Web Key Set documents into a [`KeyStore`]: an
//! ordered, kid-indexed collection of [`JoseKey`]s. Individual key objects
//! that cannot be parsed are skipped with a warning so one bad entry never
//! poisons the rest of the set; a document that is not a JWK Set at all
//! fails the whole parse.

use std::collections::HashMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{JoseError, Result};

/// JWK `kty` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// RSA key (`kty: "RSA"`)
    Rsa,
    /// Elliptic-curve key (`kty: "EC"`)
    EllipticCurve,
    /// Symmetric octet-sequence key (`kty: "oct"`)
    OctetSequence,
}

impl KeyType {
    /// RFC 7518 `kty` value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rsa => "RSA",
            Self::EllipticCurve => "EC",
            Self::OctetSequence => "oct",
        }
    }
}

/// Intended key use (`use` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUse {
    /// `use: "sig"`
    Signature,
    /// `use: "enc"`
    Encryption,
}

impl KeyUse {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "sig" => Some(Self::Signature),
            "enc" => Some(Self::Encryption),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Signature => "sig",
            Self::Encryption => "enc",
        }
    }
}

/// Supported elliptic curves.
///
/// P-521 is not representable by the JOSE backend (no ES512), so keys on
/// other curves are treated like any other unsupported key type: logged
/// and skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurve {
    /// NIST P-256, pairs with ES256
    P256,
    /// NIST P-384, pairs with ES384
    P384,
}

impl EcCurve {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "P-256" => Some(Self::P256),
            "P-384" => Some(Self::P384),
            _ => None,
        }
    }

    /// RFC 7518 `crv` value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::P256 => "P-256",
            Self::P384 => "P-384",
        }
    }
}

/// Algorithm-specific key material.
///
/// Asymmetric parameters are kept in their base64url wire form; they are
/// only decoded when a signer or verifier is actually built from them.
#[derive(Debug, Clone)]
pub(crate) enum KeyMaterial {
    Rsa {
        n: String,
        e: String,
        d: Option<String>,
        p: Option<String>,
        q: Option<String>,
    },
    EllipticCurve {
        curve: EcCurve,
        x: String,
        y: String,
        d: Option<String>,
    },
    OctetSequence {
        k: Vec<u8>,
    },
}

/// Raw JWK object fields per RFC 7517/7518. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct RawJwk {
    kty: String,
    kid: Option<String>,
    #[serde(rename = "use")]
    key_use: Option<String>,
    // RSA public + private
    n: Option<String>,
    e: Option<String>,
    d: Option<String>,
    p: Option<String>,
    q: Option<String>,
    // EC
    crv: Option<String>,
    x: Option<String>,
    y: Option<String>,
    // oct
    k: Option<String>,
}

/// One cryptographic key: RSA, EC, or symmetric octet sequence.
///
/// Immutable once constructed. A key without private material can only
/// verify or encrypt; an octet-sequence key is symmetric, so holding it
/// at all means holding the secret.
#[derive(Debug, Clone)]
pub struct JoseKey {
    key_id: String,
    key_use: Option<KeyUse>,
    material: KeyMaterial,
}

impl JoseKey {
    /// Parse a single JWK object.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown `kty` values, unsupported curves, and
    /// missing required parameters. Callers building a whole key store
    /// treat these as skip-with-warning.
    pub fn from_jwk_value(value: &Value) -> Result<Self> {
        let raw: RawJwk =
            serde_json::from_value(value.clone()).map_err(|e| JoseError::MalformedKeySet {
                reason: format!("invalid JWK object: {e}"),
            })?;

        let key_id = raw.kid.unwrap_or_default();
        let key_use = raw.key_use.as_deref().and_then(KeyUse::parse);

        let material = match raw.kty.as_str() {
            "RSA" => {
                let n = require_field(&key_id, "n", raw.n)?;
                let e = require_field(&key_id, "e", raw.e)?;
                KeyMaterial::Rsa {
                    n,
                    e,
                    d: raw.d,
                    p: raw.p,
                    q: raw.q,
                }
            }
            "EC" => {
                let crv = require_field(&key_id, "crv", raw.crv)?;
                let curve =
                    EcCurve::parse(&crv).ok_or_else(|| JoseError::UnsupportedKeyType {
                        kty: format!("EC/{crv}"),
                    })?;
                let x = require_field(&key_id, "x", raw.x)?;
                let y = require_field(&key_id, "y", raw.y)?;
                KeyMaterial::EllipticCurve {
                    curve,
                    x,
                    y,
                    d: raw.d,
                }
            }
            "oct" => {
                let k_b64 = require_field(&key_id, "k", raw.k)?;
                let k = URL_SAFE_NO_PAD.decode(k_b64.as_bytes()).map_err(|e| {
                    JoseError::InvalidKeyMaterial {
                        key_id: key_id.clone(),
                        reason: format!("invalid base64url in `k`: {e}"),
                    }
                })?;
                KeyMaterial::OctetSequence { k }
            }
            other => {
                return Err(JoseError::UnsupportedKeyType {
                    kty: other.to_string(),
                })
            }
        };

        Ok(Self {
            key_id,
            key_use,
            material,
        })
    }

    /// Build a symmetric key directly from raw secret bytes.
    ///
    /// Used for clients that authenticate with `client_secret_jwt`: the
    /// shared secret becomes HMAC key material with `use: "sig"`.
    pub fn from_secret(key_id: impl Into<String>, secret: &[u8]) -> Self {
        Self {
            key_id: key_id.into(),
            key_use: Some(KeyUse::Signature),
            material: KeyMaterial::OctetSequence {
                k: secret.to_vec(),
            },
        }
    }

    /// Key identifier. Empty until the owning [`KeyStore`] synthesizes one.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Declared intended use, if any.
    pub fn key_use(&self) -> Option<KeyUse> {
        self.key_use
    }

    /// Key type discriminator.
    pub fn key_type(&self) -> KeyType {
        match self.material {
            KeyMaterial::Rsa { .. } => KeyType::Rsa,
            KeyMaterial::EllipticCurve { .. } => KeyType::EllipticCurve,
            KeyMaterial::OctetSequence { .. } => KeyType::OctetSequence,
        }
    }

    /// Whether private/secret material is present. Octet-sequence keys are
    /// symmetric, so they always count as private.
    pub fn is_private(&self) -> bool {
        match &self.material {
            KeyMaterial::Rsa { d, .. } => d.is_some(),
            KeyMaterial::EllipticCurve { d, .. } => d.is_some(),
            KeyMaterial::OctetSequence { .. } => true,
        }
    }

    /// Public projection of this key, or `None` for symmetric keys which
    /// have nothing publishable.
    pub fn public_projection(&self) -> Option<JoseKey> {
        let material = match &self.material {
            KeyMaterial::Rsa { n, e, .. } => KeyMaterial::Rsa {
                n: n.clone(),
                e: e.clone(),
                d: None,
                p: None,
                q: None,
            },
            KeyMaterial::EllipticCurve { curve, x, y, .. } => KeyMaterial::EllipticCurve {
                curve: *curve,
                x: x.clone(),
                y: y.clone(),
                d: None,
            },
            KeyMaterial::OctetSequence { .. } => return None,
        };
        Some(JoseKey {
            key_id: self.key_id.clone(),
            key_use: self.key_use,
            material,
        })
    }

    /// Public JWK object for this key, or `None` for symmetric keys.
    pub fn public_jwk(&self) -> Option<Value> {
        let mut jwk = match &self.material {
            KeyMaterial::Rsa { n, e, .. } => json!({
                "kty": "RSA",
                "n": n,
                "e": e,
            }),
            KeyMaterial::EllipticCurve { curve, x, y, .. } => json!({
                "kty": "EC",
                "crv": curve.as_str(),
                "x": x,
                "y": y,
            }),
            KeyMaterial::OctetSequence { .. } => return None,
        };
        let obj = jwk.as_object_mut().expect("public JWK is an object");
        if !self.key_id.is_empty() {
            obj.insert("kid".into(), Value::String(self.key_id.clone()));
        }
        if let Some(key_use) = self.key_use {
            obj.insert("use".into(), Value::String(key_use.as_str().to_string()));
        }
        Some(jwk)
    }

    pub(crate) fn material(&self) -> &KeyMaterial {
        &self.material
    }
}

fn require_field(key_id: &str, name: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(JoseError::InvalidKeyMaterial {
            key_id: key_id.to_string(),
            reason: format!("missing required JWK field `{name}`"),
        }),
    }
}

/// Ordered collection of [`JoseKey`]s indexed by key id.
///
/// Keys lacking a `kid` receive a freshly generated UUID before being
/// indexed, so the index is always complete. Constructed once per JWK Set
/// parse and immutable afterwards.
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    keys: Vec<JoseKey>,
    index: HashMap<String, usize>,
}

impl KeyStore {
    /// Build a store from already-parsed keys, synthesizing missing kids.
    ///
    /// Later keys with a duplicate explicit `kid` are dropped with a
    /// warning so the index invariant (one key per id) holds.
    pub fn from_keys(keys: Vec<JoseKey>) -> Self {
        let mut store = Self::default();
        for mut key in keys {
            if key.key_id.is_empty() {
                key.key_id = Uuid::new_v4().to_string();
                debug!(key_id = %key.key_id, "synthesized key id for JWK without kid");
            }
            if store.index.contains_key(&key.key_id) {
                warn!(key_id = %key.key_id, "duplicate kid in JWK Set, keeping first occurrence");
                continue;
            }
            store.index.insert(key.key_id.clone(), store.keys.len());
            store.keys.push(key);
        }
        store
    }

    /// Parse a JWK Set document from its JSON text.
    ///
    /// # Errors
    ///
    /// Fails only when the document itself is malformed (not JSON, or no
    /// `keys` array). Individual unparseable key objects are skipped with
    /// a warning.
    pub fn parse(document: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(document).map_err(|e| JoseError::MalformedKeySet {
                reason: format!("invalid JSON: {e}"),
            })?;
        Self::from_value(&value)
    }

    /// Parse a JWK Set from an already-deserialized JSON value.
    ///
    /// # Errors
    ///
    /// Same contract as [`KeyStore::parse`].
    pub fn from_value(document: &Value) -> Result<Self> {
        let entries = document
            .get("keys")
            .and_then(Value::as_array)
            .ok_or_else(|| JoseError::MalformedKeySet {
                reason: "document has no `keys` array".to_string(),
            })?;

        let mut keys = Vec::with_capacity(entries.len());
        for entry in entries {
            match JoseKey::from_jwk_value(entry) {
                Ok(key) => keys.push(key),
                Err(e) => {
                    warn!(error = %e, "skipping unparseable JWK Set entry");
                }
            }
        }
        Ok(Self::from_keys(keys))
    }

    /// Look up a key by id.
    pub fn get(&self, key_id: &str) -> Option<&JoseKey> {
        self.index.get(key_id).map(|&i| &self.keys[i])
    }

    /// Keys in document order.
    pub fn keys(&self) -> &[JoseKey] {
        &self.keys
    }

    /// Number of keys in the store.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The public JWK Set projection (`{"keys": [...]}`), omitting
    /// symmetric keys. Suitable for publishing at a jwk endpoint.
    pub fn public_jwk_set(&self) -> Value {
        let keys: Vec<Value> = self.keys.iter().filter_map(JoseKey::public_jwk).collect();
        json!({ "keys": keys })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oct_entry(kid: Option<&str>) -> Value {
        let mut v = json!({
            "kty": "oct",
            "k": URL_SAFE_NO_PAD.encode(b"super-secret-value"),
        });
        if let Some(kid) = kid {
            v["kid"] = Value::String(kid.to_string());
        }
        v
    }

    #[test]
    fn parses_rsa_public_key() {
        let doc = json!({
            "keys": [{
                "kty": "RSA",
                "kid": "rsa-1",
                "use": "sig",
                "n": "sXch-dG9oyaRHT4p",
                "e": "AQAB"
            }]
        });
        let store = KeyStore::from_value(&doc).unwrap();
        assert_eq!(store.len(), 1);
        let key = store.get("rsa-1").unwrap();
        assert_eq!(key.key_type(), KeyType::Rsa);
        assert_eq!(key.key_use(), Some(KeyUse::Signature));
        assert!(!key.is_private());
    }

    #[test]
    fn synthesized_kids_are_unique() {
        // Two keys without kid must end up with distinct identifiers.
        let doc = json!({ "keys": [oct_entry(None), oct_entry(None)] });
        let store = KeyStore::from_value(&doc).unwrap();
        assert_eq!(store.len(), 2);
        let ids: Vec<&str> = store.keys().iter().map(JoseKey::key_id).collect();
        assert_ne!(ids[0], ids[1]);
        assert!(!ids[0].is_empty());
        assert!(store.get(ids[0]).is_some());
        assert!(store.get(ids[1]).is_some());
    }

    #[test]
    fn duplicate_kid_keeps_first() {
        let doc = json!({ "keys": [oct_entry(Some("dup")), oct_entry(Some("dup"))] });
        let store = KeyStore::from_value(&doc).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unknown_kty_is_skipped_not_fatal() {
        let doc = json!({
            "keys": [
                { "kty": "OKP", "crv": "Ed25519", "x": "abc", "kid": "okp-1" },
                oct_entry(Some("oct-1")),
            ]
        });
        let store = KeyStore::from_value(&doc).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get("oct-1").is_some());
        assert!(store.get("okp-1").is_none());
    }

    #[test]
    fn unsupported_curve_is_skipped() {
        let doc = json!({
            "keys": [{ "kty": "EC", "crv": "P-521", "x": "a", "y": "b", "kid": "p521" }]
        });
        let store = KeyStore::from_value(&doc).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn malformed_document_fails_parse() {
        assert!(KeyStore::parse("not json at all").is_err());
        assert!(KeyStore::from_value(&json!({ "nokeys": [] })).is_err());
        assert!(KeyStore::from_value(&json!({ "keys": "string" })).is_err());
    }

    #[test]
    fn secret_key_has_no_public_projection() {
        let key = JoseKey::from_secret("SYMMETRIC-KEY", b"s3cr3t");
        assert!(key.is_private());
        assert_eq!(key.key_type(), KeyType::OctetSequence);
        assert!(key.public_projection().is_none());
        assert!(key.public_jwk().is_none());
    }

    #[test]
    fn public_jwk_set_omits_symmetric_keys() {
        let store = KeyStore::from_keys(vec![
            JoseKey::from_secret("sym", b"secret"),
            JoseKey::from_jwk_value(&json!({
                "kty": "EC", "crv": "P-256", "kid": "ec-1",
                "x": "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU",
                "y": "x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0"
            }))
            .unwrap(),
        ]);
        let set = store.public_jwk_set();
        let keys = set["keys"].as_array().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0]["kid"], "ec-1");
        assert_eq!(keys[0]["crv"], "P-256");
    }
}
