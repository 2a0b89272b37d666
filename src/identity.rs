use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    headers::{authorization::Bearer, Authorization},
    http::request::Parts,
    RequestPartsExt, TypedHeader,
};
use serde::Deserialize;
use tap::TapFallible;

use crate::error::Error;

/// Default JWK endpoint of the Google secure-token authority.
pub const GOOGLE_JWK_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// The authenticated identity derived from a verified bearer credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub email: String,
    pub subject: String,
}

#[axum::async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Principal, Error>;
}

#[derive(Clone)]
pub struct IdentityState(pub Arc<dyn TokenVerifier>);

impl IdentityState {
    pub fn new(verifier: impl TokenVerifier + 'static) -> Self {
        Self(Arc::new(verifier))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Principal
where
    IdentityState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(token)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| Error::Unauthenticated("missing or malformed bearer credential"))?;

        let IdentityState(verifier) = IdentityState::from_ref(state);

        verifier.verify(token.token()).await
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Jwk {
    pub kid: String,
    pub n: String,
    pub e: String,
}

impl JwkSet {
    pub fn key(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|it| it.kid == kid)
    }
}

#[derive(Deserialize, Debug)]
struct IdTokenClaims {
    sub: String,
    email: Option<String>,
}

/// Verifies Firebase-issued bearer tokens against the Google secure-token
/// authority. Every gated request re-fetches the authority's current key set;
/// verification results are never cached.
pub struct FirebaseVerifier {
    http: reqwest::Client,
    project_id: String,
    jwk_url: String,
}

impl FirebaseVerifier {
    pub fn new(http: reqwest::Client, project_id: String, jwk_url: String) -> Self {
        Self {
            http,
            project_id,
            jwk_url,
        }
    }

    fn validation(&self) -> jsonwebtoken::Validation {
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::RS256);
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[format!(
            "https://securetoken.google.com/{}",
            self.project_id
        )]);
        validation
    }

    fn decode(&self, token: &str, keys: &JwkSet) -> Result<Principal, Error> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|_| Error::Forbidden("malformed credential"))?;

        let kid = header
            .kid
            .ok_or(Error::Forbidden("credential names no signing key"))?;

        let jwk = keys
            .key(&kid)
            .ok_or(Error::Forbidden("credential signed by unknown key"))
            .tap_err(|_| tracing::debug!("kid not present in authority key set"))?;

        let decoding_key = jsonwebtoken::DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|_| Error::Forbidden("authority key rejected"))?;

        let token = jsonwebtoken::decode::<IdTokenClaims>(token, &decoding_key, &self.validation())
            .map_err(|_| Error::Forbidden("identity authority rejected the credential"))?;

        let email = token
            .claims
            .email
            .ok_or(Error::Forbidden("credential carries no email"))?;

        Ok(Principal {
            email,
            subject: token.claims.sub,
        })
    }

    async fn fetch_keys(&self) -> Result<JwkSet, Error> {
        let keys = self
            .http
            .get(&self.jwk_url)
            .send()
            .await?
            .error_for_status()?
            .json::<JwkSet>()
            .await?;

        Ok(keys)
    }
}

#[axum::async_trait]
impl TokenVerifier for FirebaseVerifier {
    async fn verify(&self, token: &str) -> Result<Principal, Error> {
        let keys = self.fetch_keys().await?;

        self.decode(token, &keys)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::extract::{FromRef, FromRequestParts};

    use crate::error::Error;

    use super::{IdentityState, JwkSet, Principal, TokenVerifier};

    struct StaticVerifier(Principal);

    #[axum::async_trait]
    impl TokenVerifier for StaticVerifier {
        async fn verify(&self, token: &str) -> Result<Principal, Error> {
            match token {
                "good-token" => Ok(self.0.clone()),
                _ => Err(Error::Forbidden("identity authority rejected the credential")),
            }
        }
    }

    #[derive(Clone)]
    struct TestState(IdentityState);

    impl FromRef<TestState> for IdentityState {
        fn from_ref(state: &TestState) -> Self {
            state.0.clone()
        }
    }

    fn test_state() -> TestState {
        TestState(IdentityState::new(StaticVerifier(Principal {
            email: "a@x.com".to_string(),
            subject: "uid-1".to_string(),
        })))
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthenticated() {
        let (mut parts, _) = axum::http::request::Request::get("http://localhost")
            .body(())
            .unwrap()
            .into_parts();

        let error = Principal::from_request_parts(&mut parts, &test_state())
            .await
            .unwrap_err();

        assert_matches!(error, Error::Unauthenticated(..));
    }

    #[tokio::test]
    async fn test_rejected_token_is_forbidden() {
        let (mut parts, _) = axum::http::request::Request::get("http://localhost")
            .header("Authorization", "Bearer expired-token")
            .body(())
            .unwrap()
            .into_parts();

        let error = Principal::from_request_parts(&mut parts, &test_state())
            .await
            .unwrap_err();

        assert_matches!(error, Error::Forbidden(..));
    }

    #[tokio::test]
    async fn test_verified_principal() {
        let (mut parts, _) = axum::http::request::Request::get("http://localhost")
            .header("Authorization", "Bearer good-token")
            .body(())
            .unwrap()
            .into_parts();

        let principal = Principal::from_request_parts(&mut parts, &test_state())
            .await
            .unwrap();

        assert_eq!(principal.email, "a@x.com");
        assert_eq!(principal.subject, "uid-1");
    }

    #[test]
    fn test_jwk_set_lookup() {
        let keys: JwkSet = serde_json::from_str(
            r#"{
                "keys": [
                    {"kty": "RSA", "alg": "RS256", "kid": "key-1", "n": "qqq", "e": "AQAB"},
                    {"kty": "RSA", "alg": "RS256", "kid": "key-2", "n": "zzz", "e": "AQAB"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(keys.key("key-2").unwrap().n, "zzz");
        assert!(keys.key("key-3").is_none());
    }
}
