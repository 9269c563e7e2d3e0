//! Compact JWT representation and registered-claim checks
//!
//! A [`Jwt`] parsed off the wire keeps the exact base64url segments it
//! arrived with, so signature verification always runs over the bytes
//! that were actually signed and never over a re-serialization.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{Algorithm, Header};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{JoseError, Result};

/// Standard JWT claims per RFC 7519 Section 4.1, with additional claims
/// preserved in a flattened map.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StandardClaims {
    /// Issuer (iss)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Subject (sub)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Audience (aud) - a single string or an array of strings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,

    /// Expiration time (exp) - Unix timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,

    /// Not before (nbf) - Unix timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,

    /// Issued at (iat) - Unix timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,

    /// JWT ID (jti)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// Claims not registered in RFC 7519
    #[serde(flatten)]
    pub additional: HashMap<String, Value>,
}

/// The `aud` claim in either of its RFC 7519 forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// A single audience string
    Single(String),
    /// Multiple audiences
    Multiple(Vec<String>),
}

impl Audience {
    /// Whether the given audience value is present.
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Self::Single(s) => s == audience,
            Self::Multiple(list) => list.iter().any(|s| s == audience),
        }
    }
}

impl From<&str> for Audience {
    fn from(s: &str) -> Self {
        Self::Single(s.to_string())
    }
}

/// The exact base64url header/claims segments a signature covers.
#[derive(Debug, Clone)]
struct ProtectedSegments {
    header: String,
    claims: String,
}

/// A JWT: header, claim set, and (once signed or parsed) a signature.
///
/// Signing mutates the token in place: the header's `alg`/`kid` are set
/// by the signer and the signature field is filled in.
#[derive(Debug, Clone)]
pub struct Jwt {
    header: Header,
    claims: StandardClaims,
    protected: Option<ProtectedSegments>,
    signature: Option<String>,
}

impl Jwt {
    /// Create an unsigned token for the given algorithm and claim set.
    pub fn new(algorithm: Algorithm, claims: StandardClaims) -> Self {
        Self {
            header: Header::new(algorithm),
            claims,
            protected: None,
            signature: None,
        }
    }

    /// Create an unsigned token with a fully specified header.
    pub fn with_header(header: Header, claims: StandardClaims) -> Self {
        Self {
            header,
            claims,
            protected: None,
            signature: None,
        }
    }

    /// Parse a compact serialization (`header.claims.signature`).
    ///
    /// The wire segments are retained verbatim so later verification runs
    /// over the received bytes.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::MalformedToken`] when the segment count is
    /// wrong or the header/claims are not valid base64url JSON.
    pub fn parse(compact: &str) -> Result<Self> {
        let parts: Vec<&str> = compact.split('.').collect();
        if parts.len() != 3 {
            return Err(JoseError::MalformedToken {
                reason: format!("expected 3 segments, found {}", parts.len()),
            });
        }

        let header = jsonwebtoken::decode_header(compact).map_err(|e| {
            JoseError::MalformedToken {
                reason: format!("invalid header: {e}"),
            }
        })?;

        let claims_bytes =
            URL_SAFE_NO_PAD
                .decode(parts[1])
                .map_err(|e| JoseError::MalformedToken {
                    reason: format!("invalid claims encoding: {e}"),
                })?;
        let claims: StandardClaims =
            serde_json::from_slice(&claims_bytes).map_err(|e| JoseError::MalformedToken {
                reason: format!("invalid claims: {e}"),
            })?;

        let signature = if parts[2].is_empty() {
            None
        } else {
            Some(parts[2].to_string())
        };

        Ok(Self {
            header,
            claims,
            protected: Some(ProtectedSegments {
                header: parts[0].to_string(),
                claims: parts[1].to_string(),
            }),
            signature,
        })
    }

    /// The token header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The claim set.
    pub fn claims(&self) -> &StandardClaims {
        &self.claims
    }

    /// The base64url signature, if the token is signed.
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    /// Whether a signature is present.
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// The `header.claims` input a signature covers. Uses the wire
    /// segments for parsed tokens, otherwise encodes the current state.
    ///
    /// # Errors
    ///
    /// Fails only if the header or claims cannot be serialized.
    pub fn signing_input(&self) -> Result<String> {
        match &self.protected {
            Some(p) => Ok(format!("{}.{}", p.header, p.claims)),
            None => {
                let header = encode_segment(&self.header)?;
                let claims = encode_segment(&self.claims)?;
                Ok(format!("{header}.{claims}"))
            }
        }
    }

    /// Fix the header for signing with the given algorithm and key id,
    /// re-encode the protected segments, and drop any stale signature.
    /// Returns the signing input.
    pub(crate) fn prepare_for_signing(
        &mut self,
        algorithm: Algorithm,
        key_id: &str,
    ) -> Result<String> {
        self.header.alg = algorithm;
        self.header.kid = Some(key_id.to_string());
        let header = encode_segment(&self.header)?;
        let claims = encode_segment(&self.claims)?;
        let input = format!("{header}.{claims}");
        self.protected = Some(ProtectedSegments { header, claims });
        self.signature = None;
        Ok(input)
    }

    pub(crate) fn set_signature(&mut self, signature: String) {
        self.signature = Some(signature);
    }

    /// Compact serialization of a signed token.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::MalformedToken`] for an unsigned token.
    pub fn serialize(&self) -> Result<String> {
        let signature = self.signature.as_deref().ok_or(JoseError::MalformedToken {
            reason: "token is not signed".to_string(),
        })?;
        Ok(format!("{}.{signature}", self.signing_input()?))
    }
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value).map_err(|e| JoseError::MalformedToken {
        reason: format!("serialization failed: {e}"),
    })?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Issuer/audience/time checks over a [`StandardClaims`] set.
///
/// The clock-skew allowance (default 300 seconds) is applied to the
/// expiration, not-before, and issued-at checks.
#[derive(Debug, Clone)]
pub struct ClaimsPolicy {
    expected_issuer: Option<String>,
    expected_audience: Option<String>,
    clock_skew: Duration,
}

impl Default for ClaimsPolicy {
    fn default() -> Self {
        Self {
            expected_issuer: None,
            expected_audience: None,
            clock_skew: Duration::from_secs(crate::DEFAULT_CLOCK_SKEW_SECONDS),
        }
    }
}

impl ClaimsPolicy {
    /// Policy with the default skew and no issuer/audience requirements.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the `iss` claim to equal the given issuer.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.expected_issuer = Some(issuer.into());
        self
    }

    /// Require the `aud` claim to contain the given audience.
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.expected_audience = Some(audience.into());
        self
    }

    /// Override the clock-skew allowance.
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Check the claim set against this policy.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::ClaimValidation`] naming the first failing
    /// claim.
    pub fn check(&self, claims: &StandardClaims) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| JoseError::ClaimValidation {
                reason: format!("system clock error: {e}"),
            })?
            .as_secs();
        let skew = self.clock_skew.as_secs();

        if let Some(exp) = claims.exp {
            if now > exp.saturating_add(skew) {
                return Err(JoseError::ClaimValidation {
                    reason: format!("token expired at {exp} (now {now})"),
                });
            }
        }
        if let Some(nbf) = claims.nbf {
            if now.saturating_add(skew) < nbf {
                return Err(JoseError::ClaimValidation {
                    reason: format!("token not valid before {nbf} (now {now})"),
                });
            }
        }
        if let Some(iat) = claims.iat {
            if iat > now.saturating_add(skew) {
                return Err(JoseError::ClaimValidation {
                    reason: format!("token issued in the future at {iat} (now {now})"),
                });
            }
        }
        if let Some(expected) = &self.expected_issuer {
            match &claims.iss {
                Some(iss) if iss == expected => {}
                other => {
                    return Err(JoseError::ClaimValidation {
                        reason: format!("issuer mismatch: expected `{expected}`, got {other:?}"),
                    })
                }
            }
        }
        if let Some(expected) = &self.expected_audience {
            match &claims.aud {
                Some(aud) if aud.contains(expected) => {}
                _ => {
                    return Err(JoseError::ClaimValidation {
                        reason: format!("audience does not include `{expected}`"),
                    })
                }
            }
        }
        Ok(())
    }
}
