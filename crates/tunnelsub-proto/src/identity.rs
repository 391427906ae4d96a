//! Connection identity and proxy schemes

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::{TROJAN_WS_PATH, VLESS_WS_PATH, VMESS_WS_PATH};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("User id cannot be empty")]
    EmptyUserId,

    #[error("Endpoint host cannot be empty")]
    EmptyEndpointHost,

    #[error("Endpoint port cannot be zero")]
    InvalidEndpointPort,
}

/// Credentials and public endpoint every generated link points at
///
/// Built once from configuration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionIdentity {
    /// Opaque credential shared by all schemes (uuid for vless/vmess, password for trojan)
    pub user_id: String,
    /// Host clients dial (usually a CDN edge address)
    pub endpoint_host: String,
    /// Port clients dial
    pub endpoint_port: u16,
    /// Prefix of the remark shown by clients
    pub display_name: String,
}

impl ConnectionIdentity {
    pub fn new(
        user_id: impl Into<String>,
        endpoint_host: impl Into<String>,
        endpoint_port: u16,
        display_name: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        let identity = Self {
            user_id: user_id.into(),
            endpoint_host: endpoint_host.into(),
            endpoint_port,
            display_name: display_name.into(),
        };
        identity.validate()?;
        Ok(identity)
    }

    pub fn validate(&self) -> Result<(), IdentityError> {
        if self.user_id.trim().is_empty() {
            return Err(IdentityError::EmptyUserId);
        }
        if self.endpoint_host.trim().is_empty() {
            return Err(IdentityError::EmptyEndpointHost);
        }
        if self.endpoint_port == 0 {
            return Err(IdentityError::InvalidEndpointPort);
        }
        Ok(())
    }
}

/// Proxy schemes a subscription carries, in publication order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Vless,
    Vmess,
    Trojan,
}

impl Scheme {
    pub const ALL: [Scheme; 3] = [Scheme::Vless, Scheme::Vmess, Scheme::Trojan];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Vless => "vless",
            Scheme::Vmess => "vmess",
            Scheme::Trojan => "trojan",
        }
    }

    /// URI prefix, e.g. `vless://`
    pub fn prefix(&self) -> &'static str {
        match self {
            Scheme::Vless => "vless://",
            Scheme::Vmess => "vmess://",
            Scheme::Trojan => "trojan://",
        }
    }

    /// Websocket path the proxy routes this scheme on
    pub fn ws_path(&self) -> &'static str {
        match self {
            Scheme::Vless => VLESS_WS_PATH,
            Scheme::Vmess => VMESS_WS_PATH,
            Scheme::Trojan => TROJAN_WS_PATH,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
