//! Configuration file watcher for hot reload.
//!
//! The parent directory is watched rather than the file itself: editors that
//! save by writing a new file and renaming it over the old one would otherwise
//! leave the watch pointing at a deleted inode.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::parse_config;
use crate::config::schema::AppConfig;

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<AppConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<AppConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching in a background thread.
    ///
    /// The returned watcher must be kept alive for as long as updates are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut reloader = Reloader::new(self.path.clone());
        let tx = self.update_tx;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if reloader.is_relevant(&event) => {
                    if let Some(config) = reloader.reload() {
                        let _ = tx.send(config);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Turns file events into validated configs, skipping saves that changed nothing.
struct Reloader {
    path: PathBuf,
    last_content: Option<String>,
}

impl Reloader {
    fn new(path: PathBuf) -> Self {
        let last_content = fs::read_to_string(&path).ok();
        Self { path, last_content }
    }

    fn is_relevant(&self, event: &Event) -> bool {
        (event.kind.is_modify() || event.kind.is_create())
            && event.paths.iter().any(|p| p.file_name() == self.path.file_name())
    }

    fn reload(&mut self) -> Option<AppConfig> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(path = ?self.path, error = %e, "Failed to read config file");
                return None;
            }
        };
        if self.last_content.as_deref() == Some(content.as_str()) {
            return None;
        }

        tracing::info!(path = ?self.path, "Config file change detected, reloading");
        let parsed = parse_config(&content);
        self.last_content = Some(content);
        match parsed {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                None
            }
        }
    }
}
