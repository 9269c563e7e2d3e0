#![allow(dead_code)]

//! Shared fixtures: JWK builders over freshly generated key material and
//! a wiremock-backed JWKS endpoint.

use std::sync::OnceLock;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::RsaPrivateKey;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn b64(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

// 2048-bit keygen is slow enough to share one key across all tests.
fn rsa_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).expect("RSA keygen"))
}

pub fn rsa_private_jwk(kid: &str) -> Value {
    let key = rsa_key();
    json!({
        "kty": "RSA",
        "kid": kid,
        "n": b64(key.n().to_bytes_be()),
        "e": b64(key.e().to_bytes_be()),
        "d": b64(key.d().to_bytes_be()),
        "p": b64(key.primes()[0].to_bytes_be()),
        "q": b64(key.primes()[1].to_bytes_be()),
    })
}

pub fn rsa_public_jwk(kid: &str) -> Value {
    let mut jwk = rsa_private_jwk(kid);
    let fields = jwk.as_object_mut().expect("object");
    fields.remove("d");
    fields.remove("p");
    fields.remove("q");
    jwk
}

pub fn p256_private_jwk(kid: &str) -> Value {
    let secret = p256::SecretKey::random(&mut rand::rngs::OsRng);
    let point = secret.public_key().to_encoded_point(false);
    json!({
        "kty": "EC",
        "crv": "P-256",
        "kid": kid,
        "x": b64(point.x().expect("x")),
        "y": b64(point.y().expect("y")),
        "d": b64(secret.to_bytes()),
    })
}

pub fn p384_private_jwk(kid: &str) -> Value {
    let secret = p384::SecretKey::random(&mut rand::rngs::OsRng);
    let point = secret.public_key().to_encoded_point(false);
    json!({
        "kty": "EC",
        "crv": "P-384",
        "kid": kid,
        "x": b64(point.x().expect("x")),
        "y": b64(point.y().expect("y")),
        "d": b64(secret.to_bytes()),
    })
}

pub fn oct_jwk(kid: &str, secret: &[u8]) -> Value {
    json!({
        "kty": "oct",
        "kid": kid,
        "k": b64(secret),
    })
}

pub fn jwk_set(keys: Vec<Value>) -> Value {
    json!({ "keys": keys })
}

/// Stand up a mock JWKS endpoint serving `document` at `/jwks`.
pub async fn serve_jwks(document: &Value) -> (MockServer, String) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(document))
        .mount(&server)
        .await;
    let uri = format!("{}/jwks", server.uri());
    (server, uri)
}
