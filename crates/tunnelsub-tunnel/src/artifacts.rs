//! Download and preparation of the external binaries

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use tunnelsub_proto::Arch;

const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Download of {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Binary {0:?} does not exist and no download URL is configured")]
    Missing(PathBuf),
}

/// Where a binary lives and where it can be fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySpec {
    pub name: String,
    pub path: PathBuf,
    /// URL template, `{arch}` is replaced by `arm64` or `amd64`
    pub url_template: Option<String>,
}

impl BinarySpec {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            url_template: None,
        }
    }

    pub fn with_url(mut self, url_template: Option<String>) -> Self {
        self.url_template = url_template.filter(|u| !u.trim().is_empty());
        self
    }

    pub fn is_downloaded(&self) -> bool {
        self.url_template.is_some()
    }
}

/// Fetches binaries for the current architecture
#[derive(Debug, Clone)]
pub struct ArtifactFetcher {
    client: reqwest::Client,
    arch: Arch,
    timeout: Duration,
}

impl ArtifactFetcher {
    pub fn new(client: reqwest::Client, arch: Arch) -> Self {
        Self {
            client,
            arch,
            timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }

    /// Upper bound for one whole download, body included
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn resolve_url(&self, template: &str) -> String {
        template.replace("{arch}", self.arch.as_str())
    }

    /// Make sure `binary` is present and executable
    ///
    /// Downloads it when a URL is configured, otherwise requires it to exist.
    pub async fn ensure(&self, binary: &BinarySpec) -> Result<(), ArtifactError> {
        match &binary.url_template {
            Some(template) => {
                let url = self.resolve_url(template);
                info!("Downloading {} from {}", binary.name, url);
                if let Err(e) = self.download(&url, &binary.path).await {
                    if tokio::fs::remove_file(&binary.path).await.is_ok() {
                        warn!("Removed partial download {:?}", binary.path);
                    }
                    return Err(e);
                }
                info!("Downloaded {} to {:?}", binary.name, binary.path);
            }
            None => {
                if !tokio::fs::try_exists(&binary.path).await.unwrap_or(false) {
                    return Err(ArtifactError::Missing(binary.path.clone()));
                }
            }
        }

        make_executable(&binary.path).await
    }

    async fn download(&self, url: &str, path: &Path) -> Result<(), ArtifactError> {
        let download_err = |source| ArtifactError::Download {
            url: url.to_string(),
            source,
        };

        let bytes = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(download_err)?
            .bytes()
            .await
            .map_err(download_err)?;

        tokio::fs::write(path, &bytes)
            .await
            .map_err(|source| ArtifactError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<(), ArtifactError> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o775))
        .await
        .map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<(), ArtifactError> {
    Ok(())
}
