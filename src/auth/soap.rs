//! SOAP `login()` with username, password and security token.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use tracing::Instrument;
use url::Url;

use crate::auth::credential::TokenSource;
use crate::auth::token::{AccessToken, Token};
use crate::config::validation::normalize_version;
use crate::error::{AuthError, ConfigurationError};
use crate::events::Event;
use crate::http::dispatch::Dispatcher;
use crate::http::request::ApiRequest;
use crate::observability::tracing::auth_span;
use crate::resilience::context::Outcome;

const SOAP_ACTION: HeaderName = HeaderName::from_static("soapaction");

/// Exchanges user credentials for a session id at the partner SOAP endpoint.
pub struct SoapLogin {
    login_url: Url,
    username: String,
    password: String,
    security_token: String,
    ttl: Option<Duration>,
}

impl fmt::Debug for SoapLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoapLogin")
            .field("login_url", &self.login_url.as_str())
            .field("username", &self.username)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SoapLogin {
    pub fn new(
        base_url: &Url,
        version: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        security_token: impl Into<String>,
    ) -> Result<Self, ConfigurationError> {
        let version = normalize_version(version)?;
        let login_url = base_url
            .join(&format!("services/Soap/u/{version}"))
            .map_err(|e| ConfigurationError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            login_url,
            username: username.into(),
            password: password.into(),
            security_token: security_token.into(),
            ttl: None,
        })
    }

    /// Override the session lifetime reported by the server.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn login_url(&self) -> &Url {
        &self.login_url
    }

    fn envelope(&self) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="utf-8" ?>"#,
                r#"<env:Envelope xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
                r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" "#,
                r#"xmlns:env="http://schemas.xmlsoap.org/soap/envelope/">"#,
                r#"<env:Body><n1:login xmlns:n1="urn:partner.soap.sforce.com">"#,
                "<n1:username>{}</n1:username>",
                "<n1:password>{}{}</n1:password>",
                "</n1:login></env:Body></env:Envelope>",
            ),
            escape(&self.username),
            escape(&self.password),
            escape(&self.security_token),
        )
    }

    async fn login(&self, dispatcher: &Dispatcher) -> Result<Token, AuthError> {
        let request = ApiRequest::post(self.login_url.clone())
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/xml; charset=UTF-8"))
            .with_header(SOAP_ACTION, HeaderValue::from_static("login"))
            .with_body(self.envelope());
        dispatcher
            .publish(Event::RequestIssued {
                request: request.clone(),
            })
            .await;

        // Faults arrive as 500s; resending the same credentials cannot help.
        let response = match dispatcher.send_once(&request).await {
            Outcome::Response(response) => response,
            Outcome::Failure(error) => return Err(AuthError::Transport(error)),
        };
        let body = response.text();
        if !response.is_success() {
            let message = element_text(&body, "sf:exceptionMessage")
                .map(unescape)
                .unwrap_or_else(|| body.trim().to_string());
            return Err(AuthError::Rejected {
                status: response.status().as_u16(),
                error_code: element_text(&body, "sf:exceptionCode").map(str::to_string),
                message: format!("SOAP login failed: {message}"),
            });
        }

        let session_id = element_text(&body, "sessionId").ok_or_else(|| {
            AuthError::MalformedResponse("no sessionId in SOAP login response".to_string())
        })?;
        let ttl = self.ttl.or_else(|| {
            element_text(&body, "sessionSecondsValid")
                .and_then(|secs| secs.trim().parse().ok())
                .map(Duration::from_secs)
        });
        let token = Token::new(AccessToken::new(session_id), ttl);
        dispatcher.publish(Event::ResponseReceived { response }).await;
        Ok(token)
    }
}

#[async_trait]
impl TokenSource for SoapLogin {
    fn kind(&self) -> &'static str {
        "soap_login"
    }

    async fn acquire(&self, dispatcher: &Dispatcher) -> Result<Token, AuthError> {
        self.login(dispatcher).instrument(auth_span(self.kind())).await
    }
}

/// Text of the first `<tag>…</tag>` element in `body`.
fn element_text<'a>(body: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let len = body[start..].find(&close)?;
    Some(&body[start..start + len])
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
