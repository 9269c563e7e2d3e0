//! Client assertion validation through the resolver: shared-secret and
//! remote-JWKS paths, with every mismatch failing closed.

mod common;

use jsonwebtoken::Algorithm;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use jose_keystore::{
    ClientConfig, ClientKeyResolver, Jwt, KeyStore, ResolverConfig,
    SigningAndValidationService, StandardClaims, TokenEndpointAuthMethod,
};

fn assertion_claims(client_id: &str) -> StandardClaims {
    StandardClaims {
        iss: Some(client_id.to_string()),
        sub: Some(client_id.to_string()),
        aud: Some("https://idp.example.com/token".into()),
        exp: Some(4_102_444_800),
        ..StandardClaims::default()
    }
}

#[tokio::test]
async fn shared_secret_assertion_round_trip() {
    let resolver = ClientKeyResolver::default();
    let client = ClientConfig {
        client_id: "client-1".to_string(),
        token_endpoint_auth_method: Some(TokenEndpointAuthMethod::ClientSecretJwt),
        client_secret: Some("s3cr3t-value".to_string()),
        ..ClientConfig::default()
    };

    let validator = resolver.validator(&client, Algorithm::HS256).await.unwrap();
    let mut jwt = Jwt::new(Algorithm::HS256, assertion_claims("client-1"));
    validator.sign_default(&mut jwt).unwrap();
    assert!(validator.validate_signature(&jwt));

    // A different registered secret must reject the same assertion.
    let other = ClientConfig {
        client_secret: Some("different-secret".to_string()),
        ..client.clone()
    };
    let other_validator = resolver.validator(&other, Algorithm::HS256).await.unwrap();
    assert!(!other_validator.validate_signature(&jwt));
}

#[tokio::test]
async fn remote_jwks_assertion_round_trip() {
    // The client keeps its private key and publishes only the public
    // half at its jwks_uri.
    let private_store =
        KeyStore::from_value(&common::jwk_set(vec![common::rsa_private_jwk("rsa-1")])).unwrap();
    let client_signer = SigningAndValidationService::from_key_store(private_store);

    let (_server, jwks_uri) =
        common::serve_jwks(&common::jwk_set(vec![common::rsa_public_jwk("rsa-1")])).await;

    let resolver = ClientKeyResolver::default();
    let client = ClientConfig {
        client_id: "client-1".to_string(),
        token_endpoint_auth_method: Some(TokenEndpointAuthMethod::PrivateKeyJwt),
        jwks_uri: Some(jwks_uri),
        ..ClientConfig::default()
    };

    let mut jwt = Jwt::new(Algorithm::RS256, assertion_claims("client-1"));
    client_signer.sign_default(&mut jwt).unwrap();

    let validator = resolver.validator(&client, Algorithm::RS256).await.unwrap();
    assert!(validator.validate_signature(&jwt));
    assert!(
        validator.sign_default(&mut Jwt::new(Algorithm::RS256, assertion_claims("x"))).is_err(),
        "a remote JWKS must never yield a signer"
    );
}

#[tokio::test]
async fn failing_jwks_endpoint_fails_closed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let resolver = ClientKeyResolver::default();
    let client = ClientConfig {
        client_id: "client-1".to_string(),
        token_endpoint_auth_method: Some(TokenEndpointAuthMethod::PrivateKeyJwt),
        jwks_uri: Some(format!("{}/jwks", server.uri())),
        ..ClientConfig::default()
    };

    assert!(resolver.validator(&client, Algorithm::RS256).await.is_none());
}

#[tokio::test]
async fn method_and_family_mismatches_fail_closed() {
    let resolver = ClientKeyResolver::default();

    let secret_client = ClientConfig {
        client_id: "client-1".to_string(),
        token_endpoint_auth_method: Some(TokenEndpointAuthMethod::ClientSecretJwt),
        client_secret: Some("s3cr3t-value".to_string()),
        ..ClientConfig::default()
    };
    assert!(resolver
        .validator(&secret_client, Algorithm::RS256)
        .await
        .is_none());

    let keyless_client = ClientConfig {
        client_id: "client-2".to_string(),
        token_endpoint_auth_method: Some(TokenEndpointAuthMethod::PrivateKeyJwt),
        ..ClientConfig::default()
    };
    assert!(resolver
        .validator(&keyless_client, Algorithm::RS256)
        .await
        .is_none());
}

#[tokio::test]
async fn private_key_only_deployment_rejects_secret_clients() {
    let resolver = ClientKeyResolver::new(ResolverConfig {
        private_key_only: true,
        ..ResolverConfig::default()
    });
    let client = ClientConfig {
        client_id: "client-1".to_string(),
        token_endpoint_auth_method: Some(TokenEndpointAuthMethod::ClientSecretJwt),
        client_secret: Some("s3cr3t-value".to_string()),
        ..ClientConfig::default()
    };
    assert!(resolver.validator(&client, Algorithm::HS256).await.is_none());
}

#[tokio::test]
async fn encrypter_resolves_from_remote_jwks() {
    let (_server, jwks_uri) =
        common::serve_jwks(&common::jwk_set(vec![common::rsa_public_jwk("rsa-1")])).await;

    let resolver = ClientKeyResolver::default();
    let client = ClientConfig {
        client_id: "client-1".to_string(),
        jwks_uri: Some(jwks_uri),
        ..ClientConfig::default()
    };

    let encrypter = resolver.encrypter(&client).await.unwrap();
    let compact = encrypter.encrypt(b"id-token-payload").unwrap();
    assert_eq!(compact.split('.').count(), 5);
    assert!(
        !encrypter.can_decrypt(),
        "public key material must not decrypt"
    );
}
