//! Tunnel mode selection
//!
//! The mode is chosen once at startup from the configured secret and
//! hostname. It decides the tunnel argv and whether the hostname has to be
//! scraped from the tunnel log.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// Accepted length range of a tunnel token
const TOKEN_LEN: std::ops::RangeInclusive<usize> = 120..=250;

/// Credentials of a named tunnel, as issued by the tunnel provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedTunnelCredentials {
    #[serde(rename = "AccountTag")]
    pub account_tag: String,
    #[serde(rename = "TunnelSecret")]
    pub tunnel_secret: String,
    #[serde(rename = "TunnelID")]
    pub tunnel_id: String,
}

/// How the tunnel client authenticates and where its hostname comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelMode {
    /// Pre-registered tunnel authenticated by an opaque token
    Token { token: String, hostname: String },
    /// Named tunnel run from a credentials file and ingress config
    Named {
        credentials: NamedTunnelCredentials,
        /// Credential JSON exactly as configured, written to the credentials file
        raw: String,
        hostname: String,
    },
    /// Ephemeral tunnel whose random hostname only appears in its log
    Quick,
}

/// Paths and ports the tunnel argv refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelContext {
    pub log_path: PathBuf,
    pub ingress_path: PathBuf,
    pub proxy_port: u16,
}

impl TunnelMode {
    /// Pick the mode from the configured secret and hostname
    pub fn select(secret: Option<&str>, hostname: Option<&str>) -> Self {
        let secret = secret.map(str::trim).filter(|s| !s.is_empty());
        let hostname = hostname.map(str::trim).filter(|h| !h.is_empty());

        let (secret, hostname) = match (secret, hostname) {
            (Some(secret), Some(hostname)) => (secret, hostname),
            (None, None) => {
                info!("No tunnel credential configured, using a quick tunnel");
                return TunnelMode::Quick;
            }
            (Some(_), None) => {
                warn!("Tunnel secret set without a hostname, using a quick tunnel");
                return TunnelMode::Quick;
            }
            (None, Some(_)) => {
                warn!("Tunnel hostname set without a secret, using a quick tunnel");
                return TunnelMode::Quick;
            }
        };

        if is_token(secret) {
            info!("Using token authentication for tunnel to {}", hostname);
            return TunnelMode::Token {
                token: secret.to_string(),
                hostname: hostname.to_string(),
            };
        }

        if secret.contains("TunnelSecret") {
            match serde_json::from_str::<NamedTunnelCredentials>(secret) {
                Ok(credentials) => {
                    info!(
                        "Using named tunnel {} for {}",
                        credentials.tunnel_id, hostname
                    );
                    return TunnelMode::Named {
                        credentials,
                        raw: secret.to_string(),
                        hostname: hostname.to_string(),
                    };
                }
                Err(e) => {
                    warn!("Tunnel credential JSON is invalid ({}), using a quick tunnel", e);
                    return TunnelMode::Quick;
                }
            }
        }

        warn!("Tunnel secret is neither a token nor credential JSON, using a quick tunnel");
        TunnelMode::Quick
    }

    pub fn is_quick(&self) -> bool {
        matches!(self, TunnelMode::Quick)
    }

    /// Hostname known up front, `None` for quick tunnels
    pub fn declared_hostname(&self) -> Option<&str> {
        match self {
            TunnelMode::Token { hostname, .. } | TunnelMode::Named { hostname, .. } => {
                Some(hostname)
            }
            TunnelMode::Quick => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelMode::Token { .. } => "token",
            TunnelMode::Named { .. } => "named",
            TunnelMode::Quick => "quick",
        }
    }

    /// Tunnel client argv for this mode
    pub fn args(&self, context: &TunnelContext) -> Vec<String> {
        let mut args: Vec<String> = ["tunnel", "--edge-ip-version", "auto"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        match self {
            TunnelMode::Token { token, .. } => {
                args.extend(
                    ["--no-autoupdate", "--protocol", "http2", "run", "--token"]
                        .iter()
                        .map(|s| s.to_string()),
                );
                args.push(token.clone());
            }
            TunnelMode::Named { .. } => {
                args.push("--config".to_string());
                args.push(context.ingress_path.display().to_string());
                args.push("run".to_string());
            }
            TunnelMode::Quick => {
                args.extend(
                    ["--no-autoupdate", "--protocol", "http2", "--logfile"]
                        .iter()
                        .map(|s| s.to_string()),
                );
                args.push(context.log_path.display().to_string());
                args.push("--loglevel".to_string());
                args.push("info".to_string());
                args.push("--url".to_string());
                args.push(format!("http://localhost:{}", context.proxy_port));
            }
        }

        args
    }
}

/// Whether a secret has the shape of a tunnel token
pub fn is_token(secret: &str) -> bool {
    TOKEN_LEN.contains(&secret.len())
        && secret
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '=')
}
