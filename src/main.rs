//! resilient-client CLI
//!
//! Issues calls through the full client stack using a TOML config file.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │                          ApiClient                               │
//!   │                                                                  │
//!   │  request ──▶ RequestExecutor ──▶ Dispatcher ──▶ Transport ───────┼──▶ API
//!   │                 │     ▲             │  ▲                         │
//!   │                 ▼     │             ▼  │                         │
//!   │            Credential │        RetryContext ◀── RetryPolicy      │
//!   │            (one token)│        (rules, budget,   (arc-swapped,   │
//!   │                 │     │         backoff)          hot reload)    │
//!   │                 ▼     │             │                            │
//!   │            TokenSource│             ▼                            │
//!   │                       └────────  EventBus ──▶ observers          │
//!   └──────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use resilient_client::config::{load_config, ClientConfig};
use resilient_client::events::{MetricsObserver, StatsObserver, TracingObserver};
use resilient_client::observability::{init_logging, init_metrics};
use resilient_client::ApiClient;

#[derive(Parser)]
#[command(name = "resilient-client")]
#[command(about = "Send API calls with authentication, retries and backoff", long_about = None)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "client.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate the config, then print a summary
    Check,
    /// GET a path relative to the versioned data endpoint
    Get {
        path: String,
        /// Query parameters as key=value
        #[arg(short, long)]
        query: Vec<String>,
    },
}

fn summarize(config: &ClientConfig) {
    let auth = &config.auth;
    let source = if auth.client_credentials.is_some() {
        "client_credentials"
    } else if auth.jwt_bearer.is_some() {
        "jwt_bearer"
    } else if auth.soap_login.is_some() {
        "soap_login"
    } else {
        "static_token"
    };
    println!("base_url          = {}", config.api.base_url);
    println!("version           = {}", config.api.version);
    println!("concurrency_limit = {}", config.api.concurrency_limit);
    println!("max_retries       = {}", config.retries.max_retries);
    println!("retry_timeout     = {}s", config.retries.timeout_secs);
    println!("token_source      = {source}");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    init_logging(&config.observability)?;
    tracing::info!(path = ?cli.config, "Configuration loaded");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    match cli.command {
        Commands::Check => {
            summarize(&config);
            ApiClient::from_config(&config)?;
            println!("config OK");
        }
        Commands::Get { path, query } => {
            let stats = Arc::new(StatsObserver::new());
            let mut builder = ApiClient::builder_from_config(&config)?
                .observer(Arc::new(TracingObserver))
                .observer(stats.clone());
            if config.observability.metrics_enabled {
                builder = builder.observer(Arc::new(MetricsObserver));
            }
            let client = builder.build()?;

            let params = query
                .iter()
                .map(|pair| pair.split_once('=').unwrap_or((pair.as_str(), "")));
            let request = client.get(&path)?.with_query(params);
            let response = client.execute(request).await?;

            println!("{}", response.text());
            let stats = stats.snapshot();
            tracing::info!(
                status = response.status().as_u16(),
                retries = stats.retries,
                api_calls = stats.api_calls,
                api_usage = ?stats.last_usage.map(|u| u.to_string()),
                "Request complete"
            );
        }
    }

    Ok(())
}
