//! OAuth 2.0 JWT bearer flow.
//!
//! The client signs a short-lived RS256 assertion with its private key and
//! trades it for an access token at the instance's token endpoint.

use std::fmt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::{HeaderValue, ACCEPT};
use serde::Serialize;
use tracing::Instrument;
use url::Url;

use crate::auth::credential::TokenSource;
use crate::auth::flows::{accept_oauth_response, send_token_request, token_url};
use crate::auth::token::Token;
use crate::error::{AuthError, ConfigurationError};
use crate::http::dispatch::Dispatcher;
use crate::http::request::ApiRequest;
use crate::observability::tracing::auth_span;

pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime of a signed assertion.
pub const ASSERTION_LIFETIME: Duration = Duration::from_secs(300);

const PRODUCTION_AUDIENCE: &str = "https://login.salesforce.com";
const SANDBOX_AUDIENCE: &str = "https://test.salesforce.com";
const SANDBOX_HOST_SUFFIX: &str = ".sandbox.my.salesforce.com";

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    aud: &'a str,
    sub: &'a str,
    exp: u64,
}

/// Signs a JWT assertion for `username` and exchanges it for a token.
pub struct JwtBearerFlow {
    token_url: Url,
    audience: &'static str,
    client_id: String,
    username: String,
    key: EncodingKey,
    ttl: Option<Duration>,
}

impl fmt::Debug for JwtBearerFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtBearerFlow")
            .field("token_url", &self.token_url.as_str())
            .field("audience", &self.audience)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl JwtBearerFlow {
    /// `private_key_pem` is an unencrypted PKCS#1 or PKCS#8 RSA key.
    pub fn new(
        base_url: &Url,
        client_id: impl Into<String>,
        username: impl Into<String>,
        private_key_pem: &[u8],
    ) -> Result<Self, ConfigurationError> {
        let key = EncodingKey::from_rsa_pem(private_key_pem).map_err(|e| {
            ConfigurationError::InvalidPrivateKey {
                origin: "(inline)".to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            token_url: token_url(base_url)?,
            audience: audience_for(base_url),
            client_id: client_id.into(),
            username: username.into(),
            key,
            ttl: None,
        })
    }

    /// Like [`JwtBearerFlow::new`], reading the key from a PEM file.
    pub fn from_key_file(
        base_url: &Url,
        client_id: impl Into<String>,
        username: impl Into<String>,
        path: &Path,
    ) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidPrivateKey {
            origin: path.display().to_string(),
            reason,
        };
        let pem = std::fs::read(path).map_err(|e| invalid(e.to_string()))?;
        Self::new(base_url, client_id, username, &pem).map_err(|e| match e {
            ConfigurationError::InvalidPrivateKey { reason, .. } => invalid(reason),
            other => other,
        })
    }

    /// Treat issued tokens as expired after `ttl`.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    pub fn audience(&self) -> &str {
        self.audience
    }

    fn assertion(&self) -> Result<String, AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let claims = Claims {
            iss: &self.client_id,
            aud: self.audience,
            sub: &self.username,
            exp: (now + ASSERTION_LIFETIME).as_secs(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    async fn request_token(&self, dispatcher: &Dispatcher) -> Result<Token, AuthError> {
        let assertion = self.assertion()?;
        let request = ApiRequest::post(self.token_url.clone())
            .with_form([
                ("grant_type", JWT_BEARER_GRANT),
                ("assertion", assertion.as_str()),
            ])
            .with_header(ACCEPT, HeaderValue::from_static("application/json"));
        let response = send_token_request(dispatcher, &request).await?;
        let token = accept_oauth_response(dispatcher, response).await?;
        Ok(Token::new(token, self.ttl))
    }
}

/// Sandbox instances authenticate against the test login host.
fn audience_for(base_url: &Url) -> &'static str {
    match base_url.host_str() {
        Some(host) if host.ends_with(SANDBOX_HOST_SUFFIX) => SANDBOX_AUDIENCE,
        _ => PRODUCTION_AUDIENCE,
    }
}

#[async_trait]
impl TokenSource for JwtBearerFlow {
    fn kind(&self) -> &'static str {
        "jwt_bearer"
    }

    async fn acquire(&self, dispatcher: &Dispatcher) -> Result<Token, AuthError> {
        self.request_token(dispatcher)
            .instrument(auth_span(self.kind()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::http::response::ApiResponse;
    use crate::http::transport::{Transport, TransportError};
    use jsonwebtoken::{DecodingKey, Validation};
    use serde::Deserialize;
    use std::sync::{Arc, Mutex};

    const PRIVATE_KEY: &[u8] = include_bytes!("../../tests/fixtures/jwt_signing_key.pem");
    const PUBLIC_KEY: &[u8] = include_bytes!("../../tests/fixtures/jwt_signing_key.pub.pem");

    #[derive(Debug, Deserialize)]
    struct SignedClaims {
        iss: String,
        aud: String,
        sub: String,
        exp: u64,
    }

    struct OneReply {
        reply: ApiResponse,
        seen: Mutex<Option<ApiRequest>>,
    }

    #[async_trait]
    impl Transport for OneReply {
        async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
            *self.seen.lock().unwrap() = Some(request.clone());
            Ok(self.reply.clone())
        }
    }

    async fn run(flow: &JwtBearerFlow, reply: ApiResponse) -> (Result<Token, AuthError>, ApiRequest) {
        let transport = Arc::new(OneReply {
            reply,
            seen: Mutex::new(None),
        });
        let dispatcher =
            Dispatcher::new(transport.clone(), Arc::new(EventBus::new()), 1).unwrap();
        let result = flow.acquire(&dispatcher).await;
        let seen = transport.seen.lock().unwrap().take().unwrap();
        (result, seen)
    }

    fn form_field(request: &ApiRequest, name: &str) -> Option<String> {
        url::form_urlencoded::parse(request.body())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    fn verify(assertion: &str, audience: &str) -> SignedClaims {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[audience]);
        let key = DecodingKey::from_rsa_pem(PUBLIC_KEY).unwrap();
        jsonwebtoken::decode::<SignedClaims>(assertion, &key, &validation)
            .unwrap()
            .claims
    }

    #[tokio::test]
    async fn test_signed_assertion_is_exchanged() {
        let base: Url = "https://acme.my.salesforce.com/".parse().unwrap();
        let flow = JwtBearerFlow::new(&base, "3MVG9-client", "ops@acme.com", PRIVATE_KEY)
            .unwrap()
            .with_ttl(Some(Duration::from_secs(3600)));

        let (result, request) = run(
            &flow,
            ApiResponse::from_status(200, r#"{"access_token":"00Dxx!jwt","token_type":"Bearer"}"#),
        )
        .await;
        let token = result.unwrap();
        assert_eq!(token.secret(), "00Dxx!jwt");
        assert!(token.expires_at().is_some());

        assert_eq!(request.url().as_str(), "https://acme.my.salesforce.com/services/oauth2/token");
        assert_eq!(request.headers()[ACCEPT], "application/json");
        assert_eq!(form_field(&request, "grant_type").as_deref(), Some(JWT_BEARER_GRANT));

        let assertion = form_field(&request, "assertion").unwrap();
        let claims = verify(&assertion, PRODUCTION_AUDIENCE);
        assert_eq!(claims.iss, "3MVG9-client");
        assert_eq!(claims.sub, "ops@acme.com");
        assert_eq!(claims.aud, PRODUCTION_AUDIENCE);
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        assert!(claims.exp > now && claims.exp <= now + ASSERTION_LIFETIME.as_secs());
    }

    #[tokio::test]
    async fn test_sandbox_uses_test_audience() {
        let base: Url = "https://acme--uat.sandbox.my.salesforce.com/".parse().unwrap();
        let flow = JwtBearerFlow::new(&base, "id", "ops@acme.com.uat", PRIVATE_KEY).unwrap();
        assert_eq!(flow.audience(), SANDBOX_AUDIENCE);

        let (result, request) =
            run(&flow, ApiResponse::from_status(200, r#"{"access_token":"t"}"#)).await;
        assert!(result.unwrap().expires_at().is_none());
        let claims = verify(&form_field(&request, "assertion").unwrap(), SANDBOX_AUDIENCE);
        assert_eq!(claims.aud, SANDBOX_AUDIENCE);
    }

    #[tokio::test]
    async fn test_rejected_assertion() {
        let base: Url = "https://acme.my.salesforce.com/".parse().unwrap();
        let flow = JwtBearerFlow::new(&base, "id", "nobody@acme.com", PRIVATE_KEY).unwrap();
        let (result, _) = run(
            &flow,
            ApiResponse::from_status(
                400,
                r#"{"error":"invalid_grant","error_description":"user hasn't approved this consumer"}"#,
            ),
        )
        .await;
        match result {
            Err(AuthError::Rejected { error_code, message, .. }) => {
                assert_eq!(error_code.as_deref(), Some("invalid_grant"));
                assert_eq!(message, "user hasn't approved this consumer");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_bad_key_is_a_configuration_error() {
        let base: Url = "https://acme.my.salesforce.com/".parse().unwrap();
        let err = JwtBearerFlow::new(&base, "id", "user", b"not a key").unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidPrivateKey { .. }));

        let missing = Path::new("/nonexistent/server.key");
        match JwtBearerFlow::from_key_file(&base, "id", "user", missing) {
            Err(ConfigurationError::InvalidPrivateKey { origin, .. }) => {
                assert_eq!(origin, "/nonexistent/server.key");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
