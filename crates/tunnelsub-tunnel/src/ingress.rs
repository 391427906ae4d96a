//! Named tunnel files: credentials JSON and ingress YAML

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::mode::NamedTunnelCredentials;

#[derive(Error, Debug)]
pub enum IngressError {
    #[error("Failed to render ingress config: {0}")]
    Render(#[from] serde_yaml::Error),

    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginRequest {
    #[serde(rename = "noTLSVerify")]
    pub no_tls_verify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub service: String,
    #[serde(
        rename = "originRequest",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub origin_request: Option<OriginRequest>,
}

/// Config file consumed by the tunnel client in named mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressFile {
    pub tunnel: String,
    #[serde(rename = "credentials-file")]
    pub credentials_file: String,
    pub protocol: String,
    pub ingress: Vec<IngressRule>,
}

impl IngressFile {
    /// Route `hostname` to the local proxy and 404 everything else
    pub fn new(
        credentials: &NamedTunnelCredentials,
        credentials_path: &Path,
        hostname: &str,
        proxy_port: u16,
    ) -> Self {
        Self {
            tunnel: credentials.tunnel_id.clone(),
            credentials_file: credentials_path.display().to_string(),
            protocol: "http2".to_string(),
            ingress: vec![
                IngressRule {
                    hostname: Some(hostname.to_string()),
                    service: format!("http://localhost:{}", proxy_port),
                    origin_request: Some(OriginRequest {
                        no_tls_verify: true,
                    }),
                },
                IngressRule {
                    hostname: None,
                    service: "http_status:404".to_string(),
                    origin_request: None,
                },
            ],
        }
    }

    pub fn render(&self) -> Result<String, IngressError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Write the raw credentials and the ingress file for a named tunnel
pub async fn write_named_tunnel_files(
    raw_credentials: &str,
    ingress: &IngressFile,
    credentials_path: &Path,
    ingress_path: &Path,
) -> Result<(), IngressError> {
    write(credentials_path, raw_credentials.as_bytes()).await?;
    write(ingress_path, ingress.render()?.as_bytes()).await?;
    info!(
        "Named tunnel config written to {:?} and {:?}",
        credentials_path, ingress_path
    );
    Ok(())
}

async fn write(path: &Path, contents: &[u8]) -> Result<(), IngressError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| IngressError::Write {
            path: path.to_path_buf(),
            source,
        })
}
