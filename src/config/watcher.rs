//! Retry settings hot reload.
//!
//! # Responsibilities
//! - Watch the config file, including editors that save by rename
//! - Forward the `[retries]` section when, and only when, it changed
//! - Warn about edits to sections that need a new client
//!
//! # Design Decisions
//! - The parent directory is watched and events are filtered by file name,
//!   so replacing the file does not silently end the watch
//! - A broken edit is logged and dropped; the last good section stays current

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::{ClientConfig, RetryConfig};

/// Decides which reloaded configs produce a retry update.
#[derive(Debug, Clone)]
pub struct ReloadFilter {
    last: ClientConfig,
}

impl ReloadFilter {
    /// `current` is the config the client was built from.
    pub fn new(current: ClientConfig) -> Self {
        Self { last: current }
    }

    /// Returns the new `[retries]` section if it differs from the last one
    /// seen. Repeated events for a single save yield at most one update.
    pub fn accept(&mut self, config: ClientConfig) -> Option<RetryConfig> {
        if config.api != self.last.api
            || config.auth != self.last.auth
            || config.observability != self.last.observability
        {
            tracing::warn!("Config changes outside [retries] are not applied until restart");
        }
        let changed = config.retries != self.last.retries;
        self.last = config;
        if changed {
            Some(self.last.retries.clone())
        } else {
            tracing::debug!("Retry settings unchanged, nothing to reload");
            None
        }
    }
}

/// Watches a config file and streams changed retry settings.
pub struct ConfigWatcher {
    path: PathBuf,
    filter: ReloadFilter,
    update_tx: mpsc::UnboundedSender<RetryConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for retry setting updates.
    pub fn new(
        path: &Path,
        current: &ClientConfig,
    ) -> (Self, mpsc::UnboundedReceiver<RetryConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                filter: ReloadFilter::new(current.clone()),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. Dropping the returned watcher stops it.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            path,
            mut filter,
            update_tx,
        } = self;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path.file_name().map(|name| name.to_os_string());
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if !ours || !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    match load_config(&watched) {
                        Ok(config) => {
                            if let Some(retries) = filter.accept(config) {
                                tracing::info!(path = ?watched, "Retry settings changed, reloading");
                                if update_tx.send(retries).is_err() {
                                    tracing::debug!("Reload receiver dropped, ignoring change");
                                }
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload config, keeping current retry settings");
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_retries: u32) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.retries.max_retries = max_retries;
        config
    }

    #[test]
    fn test_only_changed_retries_are_forwarded() {
        let mut filter = ReloadFilter::new(config(3));

        assert_eq!(filter.accept(config(3)), None);
        assert_eq!(filter.accept(config(5)).map(|r| r.max_retries), Some(5));
        // the second event of the same save
        assert_eq!(filter.accept(config(5)), None);
        assert_eq!(filter.accept(config(3)).map(|r| r.max_retries), Some(3));
    }

    #[test]
    fn test_other_sections_are_not_forwarded() {
        let mut filter = ReloadFilter::new(config(3));
        let mut moved = config(3);
        moved.api.base_url = "https://other.my.salesforce.com".to_string();
        moved.api.concurrency_limit = 5;

        assert_eq!(filter.accept(moved.clone()), None);

        moved.retries.backoff_jitter = false;
        let retries = filter.accept(moved).unwrap();
        assert!(!retries.backoff_jitter);
        assert_eq!(retries.max_retries, 3);
    }
}
