//! Token sources.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::Instrument;
use url::Url;

use crate::auth::credential::TokenSource;
use crate::auth::token::{AccessToken, Token};
use crate::error::{AuthError, ConfigurationError};
use crate::events::Event;
use crate::http::dispatch::Dispatcher;
use crate::http::request::ApiRequest;
use crate::http::response::ApiResponse;
use crate::observability::tracing::auth_span;

/// Path of the OAuth 2.0 token endpoint, relative to the instance URL.
pub const TOKEN_PATH: &str = "services/oauth2/token";

/// Resolve the OAuth token endpoint for an instance.
pub(crate) fn token_url(base_url: &Url) -> Result<Url, ConfigurationError> {
    base_url
        .join(TOKEN_PATH)
        .map_err(|e| ConfigurationError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })
}

/// Send a token request through the dispatcher under the current policy.
///
/// Publishes `RequestIssued` first. The response is returned whatever its
/// status; only a failed send is an error.
pub(crate) async fn send_token_request(
    dispatcher: &Dispatcher,
    request: &ApiRequest,
) -> Result<ApiResponse, AuthError> {
    dispatcher
        .publish(Event::RequestIssued {
            request: request.clone(),
        })
        .await;
    let policy = dispatcher.policy();
    let mut context = policy.create_context();
    dispatcher
        .send_with_retries(request, &mut context)
        .await
        .map_err(AuthError::Transport)
}

#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    pub(crate) access_token: String,
}

/// Read `access_token` from a successful OAuth response and publish it.
pub(crate) async fn accept_oauth_response(
    dispatcher: &Dispatcher,
    response: ApiResponse,
) -> Result<AccessToken, AuthError> {
    if !response.is_success() {
        return Err(AuthError::rejected(&response));
    }
    let body: TokenResponse = response
        .json()
        .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
    dispatcher.publish(Event::ResponseReceived { response }).await;
    Ok(AccessToken::new(body.access_token))
}

/// A pre-issued token. Refreshing hands back the same secret.
pub struct StaticToken {
    token: AccessToken,
    ttl: Option<Duration>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(token.into()),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticToken")
            .field("token", &self.token)
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    fn kind(&self) -> &'static str {
        "static"
    }

    async fn acquire(&self, _dispatcher: &Dispatcher) -> Result<Token, AuthError> {
        Ok(Token::new(self.token.clone(), self.ttl))
    }

    async fn refresh(&self, _stale: &Token, _dispatcher: &Dispatcher) -> Result<Token, AuthError> {
        tracing::warn!("Static access token was rejected, it cannot be refreshed");
        Ok(Token::new(self.token.clone(), self.ttl))
    }
}

/// OAuth 2.0 client credentials flow.
pub struct ClientCredentialsFlow {
    token_url: Url,
    client_id: String,
    client_secret: String,
    ttl: Option<Duration>,
}

impl fmt::Debug for ClientCredentialsFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialsFlow")
            .field("token_url", &self.token_url.as_str())
            .field("client_id", &self.client_id)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ClientCredentialsFlow {
    /// Token requests are retried with the client's current policy.
    pub fn new(
        base_url: &Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            token_url: token_url(base_url)?,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            ttl: None,
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

    async fn request_token(&self, dispatcher: &Dispatcher) -> Result<Token, AuthError> {
        let request = ApiRequest::post(self.token_url.clone()).with_form([
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ]);
        let response = send_token_request(dispatcher, &request).await?;
        let token = accept_oauth_response(dispatcher, response).await?;
        Ok(Token::new(token, self.ttl))
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsFlow {
    fn kind(&self) -> &'static str {
        "client_credentials"
    }

    async fn acquire(&self, dispatcher: &Dispatcher) -> Result<Token, AuthError> {
        self.request_token(dispatcher)
            .instrument(auth_span(self.kind()))
            .await
    }
}
