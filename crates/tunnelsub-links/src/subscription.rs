//! Subscription document and its on-disk store

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::generator::{LinkError, LinkSet};

/// URI prefixes recognised as proxy nodes when parsing link text
pub const KNOWN_NODE_PREFIXES: [&str; 5] =
    ["vless://", "vmess://", "trojan://", "hysteria2://", "tuic://"];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Subscription file I/O failed for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Subscription is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Subscription is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Base64 of the blank-line-joined link text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionDocument {
    encoded: String,
}

impl SubscriptionDocument {
    /// Encode a link set. Empty sets are refused.
    pub fn from_links(links: &LinkSet) -> Result<Self, LinkError> {
        if links.is_empty() {
            return Err(LinkError::EmptyLinkSet);
        }
        Ok(Self::from_text(&links.joined()))
    }

    fn from_text(text: &str) -> Self {
        Self {
            encoded: STANDARD.encode(text.as_bytes()),
        }
    }

    /// Wrap an already-encoded document, e.g. one read back from disk
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self {
            encoded: encoded.into().trim().to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// Decode back to the joined link text
    pub fn decode(&self) -> Result<String, StoreError> {
        let bytes = STANDARD.decode(self.encoded.as_bytes())?;
        Ok(String::from_utf8(bytes)?)
    }

    /// Node URIs contained in the document
    pub fn nodes(&self) -> Result<Vec<String>, StoreError> {
        Ok(node_lines(&self.decode()?))
    }
}

/// Lines of `text` that carry a proxy URI
pub fn node_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| KNOWN_NODE_PREFIXES.iter().any(|p| line.contains(p)))
        .map(str::to_string)
        .collect()
}

/// Replace `path` with `contents` without exposing a partial file
///
/// Writes a sibling temp file and renames it over the target.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(|source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    debug!("Wrote {} bytes to {:?}", contents.len(), path);
    Ok(())
}

/// File-backed subscription storage
///
/// Single writer (the pipeline), many readers (the HTTP handler).
#[derive(Debug, Clone)]
pub struct SubscriptionStore {
    path: PathBuf,
}

impl SubscriptionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, document: &SubscriptionDocument) -> Result<(), StoreError> {
        write_atomic(&self.path, document.as_str().as_bytes()).await
    }

    /// Raw stored bytes, or `None` if nothing has been published
    pub async fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    pub async fn load(&self) -> Result<Option<SubscriptionDocument>, StoreError> {
        Ok(self
            .read()
            .await?
            .map(|bytes| SubscriptionDocument::from_encoded(String::from_utf8_lossy(&bytes))))
    }
}
