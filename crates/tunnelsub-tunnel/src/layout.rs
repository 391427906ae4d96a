//! File layout of the data directory

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Names of everything the launcher writes under its data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    data_dir: PathBuf,
}

impl DataLayout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn proxy_binary(&self) -> PathBuf {
        self.data_dir.join("web")
    }

    pub fn tunnel_binary(&self) -> PathBuf {
        self.data_dir.join("bot")
    }

    pub fn proxy_config(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn tunnel_log(&self) -> PathBuf {
        self.data_dir.join("boot.log")
    }

    pub fn tunnel_credentials(&self) -> PathBuf {
        self.data_dir.join("tunnel.json")
    }

    pub fn tunnel_ingress(&self) -> PathBuf {
        self.data_dir.join("tunnel.yml")
    }

    pub fn subscription(&self) -> PathBuf {
        self.data_dir.join("sub.txt")
    }

    pub fn links(&self) -> PathBuf {
        self.data_dir.join("list.txt")
    }

    /// Leftovers of a previous run, removed before startup
    ///
    /// Includes the subscription so a failed run never serves old links.
    pub fn stale_artifacts(&self) -> Vec<PathBuf> {
        vec![
            self.subscription(),
            self.tunnel_log(),
            self.links(),
            self.proxy_config(),
            self.tunnel_credentials(),
            self.tunnel_ingress(),
        ]
    }

    /// Files removed by the delayed cleanup after publication
    ///
    /// The subscription file is never part of this set.
    pub fn published_artifacts(&self) -> Vec<PathBuf> {
        vec![self.tunnel_log(), self.proxy_config(), self.links()]
    }

    pub async fn ensure_data_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await
    }
}

/// Remove `paths`, logging and skipping failures
pub async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("Removed {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {:?}: {}", path, e),
        }
    }
}
