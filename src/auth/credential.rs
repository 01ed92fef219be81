//! Shared access token with single-flight acquisition and refresh.
//!
//! # Responsibilities
//! - Hand out the cached token without locking on the hot path
//! - Make sure concurrent callers trigger at most one acquisition
//! - Refresh at most once per stale token, however many callers saw it fail
//!
//! # Design Decisions
//! - The token lives in an `ArcSwapOption`; only the holder of the mutex
//!   replaces it
//! - Every completed attempt bumps an epoch. A caller that waited on the
//!   mutex while an attempt ran shares that attempt's failure instead of
//!   starting another one
//! - Staleness is decided by identity (`Arc::ptr_eq`), so a source that
//!   hands back an identical secret still counts as one refresh

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::auth::token::Token;
use crate::error::AuthError;
use crate::http::dispatch::Dispatcher;
use crate::observability::metrics;

/// Something that can mint access tokens.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Short name for logs and metrics.
    fn kind(&self) -> &'static str;

    async fn acquire(&self, dispatcher: &Dispatcher) -> Result<Token, AuthError>;

    /// Replace a token the API rejected. Defaults to a fresh acquisition.
    async fn refresh(&self, stale: &Token, dispatcher: &Dispatcher) -> Result<Token, AuthError> {
        let _ = stale;
        self.acquire(dispatcher).await
    }

    fn is_expired(&self, token: &Token) -> bool {
        token.is_expired()
    }
}

#[derive(Default)]
struct Slot {
    last_failure: Option<AuthError>,
}

/// The client's single token, shared by every call.
pub struct Credential {
    source: Arc<dyn TokenSource>,
    token: ArcSwapOption<Token>,
    slot: Mutex<Slot>,
    epoch: AtomicU64,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("source", &self.source.kind())
            .field("has_token", &self.token.load().is_some())
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .finish()
    }
}

enum Attempt<'a> {
    Acquire,
    Refresh(&'a Token),
}

impl Credential {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            token: ArcSwapOption::empty(),
            slot: Mutex::new(Slot::default()),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn source_kind(&self) -> &'static str {
        self.source.kind()
    }

    /// The cached token, if any, without acquiring.
    pub fn current(&self) -> Option<Arc<Token>> {
        self.token.load_full()
    }

    fn usable(&self) -> Option<Arc<Token>> {
        self.token
            .load_full()
            .filter(|token| !self.source.is_expired(token))
    }

    /// Return the cached token, acquiring one if there is none or it expired.
    pub async fn get_token(&self, dispatcher: &Dispatcher) -> Result<Arc<Token>, AuthError> {
        if let Some(token) = self.usable() {
            return Ok(token);
        }

        let observed = self.epoch.load(Ordering::Acquire);
        let mut slot = self.slot.lock().await;
        if let Some(token) = self.usable() {
            return Ok(token);
        }
        if let Some(err) = self.shared_failure(&slot, observed) {
            return Err(err);
        }
        self.run(&mut slot, Attempt::Acquire, dispatcher).await
    }

    /// Replace `stale` unless another caller already did.
    ///
    /// Callers that saw the same token rejected get exactly one refresh
    /// between them; later callers receive its result.
    pub async fn refresh_from(
        &self,
        stale: &Arc<Token>,
        dispatcher: &Dispatcher,
    ) -> Result<Arc<Token>, AuthError> {
        let observed = self.epoch.load(Ordering::Acquire);
        let mut slot = self.slot.lock().await;
        if let Some(current) = self.token.load_full() {
            if !Arc::ptr_eq(&current, stale) {
                tracing::debug!("Token already refreshed by another call");
                return Ok(current);
            }
        }
        if let Some(err) = self.shared_failure(&slot, observed) {
            return Err(err);
        }
        self.run(&mut slot, Attempt::Refresh(stale), dispatcher).await
    }

    /// Refresh whatever token is cached now; acquire if there is none.
    pub async fn refresh_token(&self, dispatcher: &Dispatcher) -> Result<Arc<Token>, AuthError> {
        match self.token.load_full() {
            Some(stale) => self.refresh_from(&stale, dispatcher).await,
            None => self.get_token(dispatcher).await,
        }
    }

    fn shared_failure(&self, slot: &Slot, observed: u64) -> Option<AuthError> {
        if self.epoch.load(Ordering::Acquire) == observed {
            return None;
        }
        slot.last_failure.clone()
    }

    async fn run(
        &self,
        slot: &mut Slot,
        attempt: Attempt<'_>,
        dispatcher: &Dispatcher,
    ) -> Result<Arc<Token>, AuthError> {
        let (label, result) = match attempt {
            Attempt::Acquire => ("acquire", self.source.acquire(dispatcher).await),
            Attempt::Refresh(stale) => ("refresh", self.source.refresh(stale, dispatcher).await),
        };
        metrics::record_token_acquisition(label);

        let outcome = match result {
            Ok(token) => {
                let token = Arc::new(token);
                self.token.store(Some(Arc::clone(&token)));
                slot.last_failure = None;
                tracing::info!(source = self.source.kind(), attempt = label, "Access token obtained");
                Ok(token)
            }
            Err(err) => {
                tracing::error!(
                    source = self.source.kind(),
                    attempt = label,
                    error = %err,
                    "Access token request failed"
                );
                slot.last_failure = Some(err.clone());
                Err(err)
            }
        };
        self.epoch.fetch_add(1, Ordering::AcqRel);
        outcome
    }
}
