//! Configuration file watcher for hot reload.
//!
//! Editors usually emit several modify events per save; a revision equal to
//! the last one published is dropped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GatewayConfig;

/// Monitors the configuration file and publishes every new valid revision.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let mut reloader = Reloader::new(self.path.clone(), self.update_tx);
        // The file as loaded at startup is the baseline.
        reloader.last = load_config(&self.path).ok();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| reloader.on_event(res),
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

struct Reloader {
    path: PathBuf,
    tx: mpsc::UnboundedSender<GatewayConfig>,
    last: Option<GatewayConfig>,
}

impl Reloader {
    fn new(path: PathBuf, tx: mpsc::UnboundedSender<GatewayConfig>) -> Self {
        Self {
            path,
            tx,
            last: None,
        }
    }

    fn on_event(&mut self, res: notify::Result<Event>) {
        match res {
            Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                self.reload();
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = ?e, "Watch error"),
        }
    }

    /// Returns whether a new revision was published.
    fn reload(&mut self) -> bool {
        let config = match load_config(&self.path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(path = ?self.path, error = %e, "Failed to reload config, keeping current services");
                return false;
            }
        };
        if self.last.as_ref() == Some(&config) {
            tracing::trace!(path = ?self.path, "Config unchanged");
            return false;
        }

        tracing::info!(path = ?self.path, services = config.services.len(), "Config reloaded");
        if self.tx.send(config.clone()).is_err() {
            return false;
        }
        self.last = Some(config);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("gateway-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_reload_skips_unchanged_revision() {
        let path = temp_config("[timeouts]\nrequest_secs = 5\n");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reloader = Reloader::new(path.clone(), tx);

        assert!(reloader.reload());
        assert!(!reloader.reload());
        assert_eq!(rx.try_recv().unwrap().timeouts.request_secs, 5);
        assert!(rx.try_recv().is_err());

        std::fs::write(&path, "[timeouts]\nrequest_secs = 9\n").unwrap();
        assert!(reloader.reload());
        assert_eq!(rx.try_recv().unwrap().timeouts.request_secs, 9);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_invalid_revision_is_not_published() {
        let path = temp_config("[pool]\nmax_connections = 0\n");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reloader = Reloader::new(path.clone(), tx);

        assert!(!reloader.reload());
        assert!(rx.try_recv().is_err());

        std::fs::remove_file(path).unwrap();
    }
}
