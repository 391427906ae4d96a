//! Config file for the proxy binary
//!
//! One vless inbound faces the tunnel and falls back by URL path to four
//! loopback inbounds, one per scheme and transport.

use serde_json::{json, Value};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;
use tunnelsub_proto::Scheme;

/// Loopback ports: plain vless ws, then vless, vmess and trojan on their ws paths
pub const INTERNAL_PORTS: [u16; 4] = [3001, 3002, 3003, 3004];

#[derive(Error, Debug)]
pub enum ProxyConfigError {
    #[error("Failed to serialize proxy config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub user_id: String,
    /// Port the tunnel forwards to
    pub listen_port: u16,
}

impl ProxyConfig {
    pub fn new(user_id: impl Into<String>, listen_port: u16) -> Self {
        Self {
            user_id: user_id.into(),
            listen_port,
        }
    }

    pub fn to_json(&self) -> Value {
        let id = self.user_id.as_str();
        let [plain, vless, vmess, trojan] = INTERNAL_PORTS;
        let sniffing = json!({
            "enabled": true,
            "destOverride": ["http", "tls", "quic"],
            "metadataOnly": false
        });

        json!({
            "log": { "access": "/dev/null", "error": "/dev/null", "loglevel": "none" },
            "inbounds": [
                {
                    "port": self.listen_port,
                    "protocol": "vless",
                    "settings": {
                        "clients": [{ "id": id, "flow": "xtls-rprx-vision" }],
                        "decryption": "none",
                        "fallbacks": [
                            { "dest": plain },
                            { "path": Scheme::Vless.ws_path(), "dest": vless },
                            { "path": Scheme::Vmess.ws_path(), "dest": vmess },
                            { "path": Scheme::Trojan.ws_path(), "dest": trojan }
                        ]
                    },
                    "streamSettings": { "network": "tcp" }
                },
                {
                    "port": plain,
                    "listen": "127.0.0.1",
                    "protocol": "vless",
                    "settings": { "clients": [{ "id": id }], "decryption": "none" },
                    "streamSettings": { "network": "ws", "security": "none" }
                },
                {
                    "port": vless,
                    "listen": "127.0.0.1",
                    "protocol": "vless",
                    "settings": { "clients": [{ "id": id, "level": 0 }], "decryption": "none" },
                    "streamSettings": {
                        "network": "ws",
                        "security": "none",
                        "wsSettings": { "path": Scheme::Vless.ws_path() }
                    },
                    "sniffing": sniffing.clone()
                },
                {
                    "port": vmess,
                    "listen": "127.0.0.1",
                    "protocol": "vmess",
                    "settings": { "clients": [{ "id": id, "alterId": 0 }] },
                    "streamSettings": {
                        "network": "ws",
                        "wsSettings": { "path": Scheme::Vmess.ws_path() }
                    },
                    "sniffing": sniffing.clone()
                },
                {
                    "port": trojan,
                    "listen": "127.0.0.1",
                    "protocol": "trojan",
                    "settings": { "clients": [{ "password": id }] },
                    "streamSettings": {
                        "network": "ws",
                        "security": "none",
                        "wsSettings": { "path": Scheme::Trojan.ws_path() }
                    },
                    "sniffing": sniffing
                }
            ],
            "outbounds": [
                { "protocol": "freedom", "tag": "direct" },
                { "protocol": "blackhole", "tag": "block" }
            ]
        })
    }

    pub async fn write(&self, path: &Path) -> Result<(), ProxyConfigError> {
        let json = serde_json::to_string_pretty(&self.to_json())?;
        tokio::fs::write(path, json)
            .await
            .map_err(|source| ProxyConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        info!("Proxy config written to {:?}", path);
        Ok(())
    }
}
