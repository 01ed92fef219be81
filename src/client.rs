//! Client facade.
//!
//! # Responsibilities
//! - Assemble transport, gate, event bus, credential and executor
//! - Resolve request paths against the versioned data endpoint
//! - Apply retry policy reloads from the config watcher
//!
//! # Design Decisions
//! - One credential per client; clients never share tokens implicitly
//! - Everything a call needs is owned by the client, nothing is global

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::auth::{
    ClientCredentialsFlow, Credential, JwtBearerFlow, SoapLogin, StaticToken, TokenSource,
};
use crate::config::schema::{ClientConfig, RetryConfig};
use crate::config::validation::{normalize_version, parse_base_url};
use crate::error::{ConfigurationError, Result};
use crate::events::{EventBus, Observer, SubscriptionId};
use crate::http::dispatch::{Dispatcher, DEFAULT_CONCURRENCY_LIMIT};
use crate::http::executor::RequestExecutor;
use crate::http::request::ApiRequest;
use crate::http::response::ApiResponse;
use crate::http::transport::{ReqwestTransport, Transport};
use crate::resilience::RetryPolicy;

/// Default per-attempt transport timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A resilient client for one API instance.
#[derive(Debug)]
pub struct ApiClient {
    base_url: Url,
    version: String,
    data_url: Url,
    executor: RequestExecutor,
}

/// Builder for [`ApiClient`].
pub struct ApiClientBuilder {
    base_url: String,
    version: String,
    source: Arc<dyn TokenSource>,
    transport: Option<Arc<dyn Transport>>,
    policy: Option<RetryPolicy>,
    concurrency_limit: usize,
    user_agent: String,
    request_timeout: Duration,
    observers: Vec<Arc<dyn Observer>>,
}

impl ApiClientBuilder {
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Replace the default `reqwest` transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Timeout of the default transport; ignored with a custom transport.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Subscribe an observer before the first call.
    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        let base_url = parse_base_url(&self.base_url)?;
        let version = normalize_version(&self.version)?;
        let data_url = base_url
            .join(&format!("services/data/v{version}/"))
            .map_err(|e| ConfigurationError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: e.to_string(),
            })?;
        let policy = match self.policy {
            Some(policy) => policy,
            None => RetryPolicy::standard()?,
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::with_timeout(self.request_timeout)?),
        };

        let bus = Arc::new(EventBus::new());
        for observer in self.observers {
            bus.subscribe(observer);
        }
        let dispatcher =
            Arc::new(Dispatcher::new(transport, bus, self.concurrency_limit)?.with_policy(policy));
        let credential = Arc::new(Credential::new(self.source));
        let executor = RequestExecutor::new(dispatcher, credential, &self.user_agent)?;

        tracing::info!(
            base_url = %base_url,
            version = %version,
            concurrency_limit = self.concurrency_limit,
            token_source = executor.credential().source_kind(),
            "Client ready"
        );
        Ok(ApiClient {
            base_url,
            version,
            data_url,
            executor,
        })
    }
}

impl ApiClient {
    pub fn builder(base_url: impl Into<String>, source: Arc<dyn TokenSource>) -> ApiClientBuilder {
        ApiClientBuilder {
            base_url: base_url.into(),
            version: "60.0".to_string(),
            source,
            transport: None,
            policy: None,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            user_agent: concat!("resilient-client/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            observers: Vec::new(),
        }
    }

    /// Build a client from a validated config.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::builder_from_config(config)?.build()
    }

    /// Like [`ApiClient::from_config`], leaving the builder open for a
    /// custom transport or extra observers.
    pub fn builder_from_config(config: &ClientConfig) -> Result<ApiClientBuilder> {
        let base_url = parse_base_url(&config.api.base_url)?;
        let policy = RetryPolicy::from_config(&config.retries)?;
        let ttl = config.auth.token_ttl_secs.map(Duration::from_secs);

        let auth = &config.auth;
        let source: Arc<dyn TokenSource> = if let Some(creds) = &auth.client_credentials {
            Arc::new(
                ClientCredentialsFlow::new(
                    &base_url,
                    creds.client_id.clone(),
                    creds.client_secret.clone(),
                )?
                .with_ttl(ttl),
            )
        } else if let Some(jwt) = &auth.jwt_bearer {
            Arc::new(
                JwtBearerFlow::from_key_file(
                    &base_url,
                    jwt.client_id.clone(),
                    jwt.username.clone(),
                    &jwt.private_key_file,
                )?
                .with_ttl(ttl),
            )
        } else if let Some(soap) = &auth.soap_login {
            Arc::new(
                SoapLogin::new(
                    &base_url,
                    &config.api.version,
                    soap.username.clone(),
                    soap.password.clone(),
                    soap.security_token.clone(),
                )?
                .with_ttl(ttl),
            )
        } else if let Some(token) = &auth.static_token {
            Arc::new(StaticToken::new(token.token.clone()).with_ttl(ttl))
        } else {
            return Err(ConfigurationError::MissingTokenSource.into());
        };

        Ok(Self::builder(base_url.as_str(), source)
            .version(config.api.version.clone())
            .retry_policy(policy)
            .concurrency_limit(config.api.concurrency_limit)
            .user_agent(config.api.user_agent.clone())
            .request_timeout(Duration::from_secs(config.api.request_timeout_secs)))
    }

    /// Instance origin, e.g. `https://acme.my.salesforce.com/`.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Normalized API version, e.g. `60.0`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// `{base}/services/data/v{version}/`.
    pub fn data_url(&self) -> &Url {
        &self.data_url
    }

    /// Build a request for `path`.
    ///
    /// Relative paths resolve against [`ApiClient::data_url`]; paths starting
    /// with `/` resolve against the instance root.
    pub fn request(&self, method: Method, path: &str) -> Result<ApiRequest> {
        let url = self
            .data_url
            .join(path)
            .map_err(|e| ConfigurationError::InvalidPath {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        Ok(ApiRequest::new(method, url))
    }

    pub fn get(&self, path: &str) -> Result<ApiRequest> {
        self.request(Method::GET, path)
    }

    /// Execute a call through the full resilience stack.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.executor.execute(request).await
    }

    pub fn events(&self) -> &EventBus {
        self.executor.dispatcher().bus()
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> SubscriptionId {
        self.events().subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events().unsubscribe(id)
    }

    pub fn credential(&self) -> &Credential {
        self.executor.credential()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.executor.dispatcher()
    }

    pub fn retry_policy(&self) -> Arc<RetryPolicy> {
        self.executor.policy()
    }

    pub fn set_retry_policy(&self, policy: RetryPolicy) {
        self.executor.set_policy(policy);
    }

    /// Rebuild the retry policy from a `[retries]` section and swap it in.
    pub fn reload_policy(&self, config: &RetryConfig) -> std::result::Result<(), ConfigurationError> {
        let policy = RetryPolicy::from_config(config)?;
        self.set_retry_policy(policy);
        Ok(())
    }

    /// Apply every retry section the watcher delivers.
    pub fn apply_reloads(
        self: &Arc<Self>,
        mut updates: mpsc::UnboundedReceiver<RetryConfig>,
    ) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(retries) = updates.recv().await {
                match client.reload_policy(&retries) {
                    Ok(()) => tracing::info!(
                        max_retries = retries.max_retries,
                        "Retry policy reloaded from config"
                    ),
                    Err(e) => tracing::error!(error = %e, "Rejected reloaded retry settings"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{JwtBearerConfig, SoapLoginConfig, StaticTokenConfig};

    fn client() -> ApiClient {
        ApiClient::builder(
            "https://acme.my.salesforce.com/some/page",
            Arc::new(StaticToken::new("t")),
        )
        .version("v59")
        .build()
        .unwrap()
    }

    #[test]
    fn test_paths_resolve_against_data_url() {
        let client = client();
        assert_eq!(client.version(), "59.0");
        assert_eq!(
            client.data_url().as_str(),
            "https://acme.my.salesforce.com/services/data/v59.0/"
        );
        let request = client.get("sobjects/Account/001xx").unwrap();
        assert_eq!(
            request.url().as_str(),
            "https://acme.my.salesforce.com/services/data/v59.0/sobjects/Account/001xx"
        );
        let request = client.get("/services/data/").unwrap();
        assert_eq!(request.url().path(), "/services/data/");
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let bad_version = ApiClient::builder("https://acme.my.salesforce.com", Arc::new(StaticToken::new("t")))
            .version("latest")
            .build();
        assert!(matches!(
            bad_version,
            Err(crate::Error::Configuration(ConfigurationError::InvalidVersion(_)))
        ));

        let no_gate = ApiClient::builder("https://acme.my.salesforce.com", Arc::new(StaticToken::new("t")))
            .concurrency_limit(0)
            .build();
        assert!(matches!(
            no_gate,
            Err(crate::Error::Configuration(ConfigurationError::InvalidConcurrency))
        ));
    }

    #[test]
    fn test_from_config_requires_token_source() {
        let mut config = ClientConfig::default();
        config.api.base_url = "https://acme.my.salesforce.com".to_string();
        assert!(matches!(
            ApiClient::from_config(&config),
            Err(crate::Error::Configuration(ConfigurationError::MissingTokenSource))
        ));

        config.auth.static_token = Some(StaticTokenConfig {
            token: "t".to_string(),
        });
        let client = ApiClient::from_config(&config).unwrap();
        assert_eq!(client.credential().source_kind(), "static");
    }

    #[test]
    fn test_from_config_builds_each_source() {
        let mut config = ClientConfig::default();
        config.api.base_url = "https://acme.my.salesforce.com".to_string();
        config.auth.jwt_bearer = Some(JwtBearerConfig {
            client_id: "3MVG9-client".to_string(),
            username: "ops@acme.com".to_string(),
            private_key_file: concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/jwt_signing_key.pem")
                .into(),
        });
        let client = ApiClient::from_config(&config).unwrap();
        assert_eq!(client.credential().source_kind(), "jwt_bearer");

        config.auth.jwt_bearer = None;
        config.auth.soap_login = Some(SoapLoginConfig {
            username: "ops@acme.com".to_string(),
            password: "hunter2".to_string(),
            security_token: String::new(),
        });
        let client = ApiClient::from_config(&config).unwrap();
        assert_eq!(client.credential().source_kind(), "soap_login");
    }

    #[test]
    fn test_unreadable_key_file_is_a_configuration_error() {
        let mut config = ClientConfig::default();
        config.api.base_url = "https://acme.my.salesforce.com".to_string();
        config.auth.jwt_bearer = Some(JwtBearerConfig {
            client_id: "id".to_string(),
            username: "user".to_string(),
            private_key_file: "/nonexistent/server.key".into(),
        });
        assert!(matches!(
            ApiClient::from_config(&config),
            Err(crate::Error::Configuration(ConfigurationError::InvalidPrivateKey { .. }))
        ));
    }

    #[test]
    fn test_reload_swaps_policy() {
        let client = client();
        assert_eq!(client.retry_policy().max_retries(), 3);
        let config = RetryConfig {
            max_retries: 7,
            ..RetryConfig::default()
        };
        client.reload_policy(&config).unwrap();
        assert_eq!(client.retry_policy().max_retries(), 7);

        let broken = RetryConfig {
            backoff_factor: -1.0,
            ..RetryConfig::default()
        };
        assert!(client.reload_policy(&broken).is_err());
        assert_eq!(client.retry_policy().max_retries(), 7);
    }
}
