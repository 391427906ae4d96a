//! Launcher configuration
//!
//! Values come from three layers: command-line flags and environment
//! variables, an optional YAML file, then built-in defaults. The first layer
//! that sets a value wins. The result is an immutable [`Settings`].

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tunnelsub_links::LinkOptions;
use tunnelsub_proto::ConnectionIdentity;
use tunnelsub_tunnel::{DataLayout, DiscoveryConfig};

pub const DEFAULT_DATA_PATH: &str = "./.cache";
pub const DEFAULT_SUBSCRIPTION_PATH: &str = "sub";
pub const DEFAULT_USER_ID: &str = "ae1ea14e-5fc1-470a-bd0f-f1365c1ebc89";
pub const DEFAULT_PROXY_PORT: u16 = 8001;
pub const DEFAULT_ENDPOINT_HOST: &str = "cf.877774.xyz";
pub const DEFAULT_ENDPOINT_PORT: u16 = 443;
pub const DEFAULT_DISPLAY_NAME: &str = "xxx";
pub const DEFAULT_HTTP_PORT: u16 = 3000;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 120;
pub const DEFAULT_CLEANUP_DELAY_SECS: u64 = 90;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// One configuration layer
///
/// Parsed from flags/environment by clap and from the config file by serde.
/// Every field is optional so layers can be stacked.
#[derive(Args, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    /// Directory for binaries, generated configs and the subscription file
    #[arg(long, env = "DATA_PATH")]
    pub data_path: Option<PathBuf>,

    /// HTTP path the subscription is served under
    #[arg(long, env = "SUBSCRIPTION_PATH")]
    pub subscription_path: Option<String>,

    /// Credential shared by all generated links
    #[arg(long, env = "USER_ID")]
    pub user_id: Option<String>,

    /// Public hostname of a token or named tunnel
    #[arg(long, env = "SERVER_DOMAIN")]
    pub server_domain: Option<String>,

    /// Tunnel token or named-tunnel credential JSON
    #[arg(long, env = "SERVER_SECRET", hide_env_values = true)]
    pub server_secret: Option<String>,

    /// Port the proxy listens on and the tunnel forwards to
    #[arg(long, env = "SERVER_PORT")]
    pub server_port: Option<u16>,

    /// Address clients dial, usually a CDN edge
    #[arg(long, env = "ENDPOINT_IP")]
    pub endpoint_ip: Option<String>,

    /// Port clients dial
    #[arg(long, env = "ENDPOINT_PORT")]
    pub endpoint_port: Option<u16>,

    /// Name prefix of every link remark
    #[arg(long, env = "BOT_NAME")]
    pub bot_name: Option<String>,

    /// Port of the subscription HTTP server
    #[arg(long, env = "HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Same as --http-port, for platforms that assign PORT
    #[arg(long, env = "PORT")]
    #[serde(skip)]
    pub port: Option<u16>,

    /// Telegram bot token for publication notices
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: Option<String>,

    /// Telegram chat receiving publication notices
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: Option<String>,

    /// Base URL of the node registry
    #[arg(long, env = "WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Public URL of this launcher
    #[arg(long, env = "APP_URL")]
    pub app_url: Option<String>,

    /// Periodically request --app-url
    #[arg(
        long,
        env = "ENABLE_KEEP_ALIVE",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub enable_keep_alive: Option<bool>,

    /// Seconds between keep-alive requests
    #[arg(long, env = "KEEP_ALIVE_INTERVAL")]
    pub keep_alive_interval: Option<u64>,

    /// Proxy binary path
    #[arg(long, env = "PROXY_BINARY")]
    pub proxy_binary: Option<PathBuf>,

    /// Tunnel client binary path
    #[arg(long, env = "TUNNEL_BINARY")]
    pub tunnel_binary: Option<PathBuf>,

    /// Download URL of the proxy binary, `{arch}` is replaced by arm64/amd64
    #[arg(long, env = "PROXY_BINARY_URL")]
    pub proxy_binary_url: Option<String>,

    /// Download URL of the tunnel binary, `{arch}` is replaced by arm64/amd64
    #[arg(long, env = "TUNNEL_BINARY_URL")]
    pub tunnel_binary_url: Option<String>,

    /// TLS fingerprint advertised in links, empty to omit
    #[arg(long, env = "FINGERPRINT")]
    pub fingerprint: Option<String>,

    /// Early-data size in ws paths, 0 to omit
    #[arg(long, env = "EARLY_DATA")]
    pub early_data: Option<u32>,

    /// Quick tunnel launches before giving up
    #[arg(long, env = "DISCOVERY_MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,

    /// Seconds after publication before temporary files are removed, 0 keeps them
    #[arg(long, env = "CLEANUP_DELAY")]
    pub cleanup_delay: Option<u64>,

    /// Fixed network label for link remarks, skips the metadata lookup
    #[arg(long, env = "ISP_LABEL")]
    pub isp_label: Option<String>,

    /// Log level (trace, debug, info, warn, error) or a tracing filter
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

macro_rules! merge_fields {
    ($high:expr, $low:expr, $($field:ident),+ $(,)?) => {
        ConfigLayer {
            $($field: $high.$field.or($low.$field),)+
        }
    };
}

impl ConfigLayer {
    /// Read a YAML config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {:?}", path))
    }

    /// Fields set in `self` win, the rest come from `lower`
    pub fn merge(self, lower: ConfigLayer) -> ConfigLayer {
        merge_fields!(
            self,
            lower,
            data_path,
            subscription_path,
            user_id,
            server_domain,
            server_secret,
            server_port,
            endpoint_ip,
            endpoint_port,
            bot_name,
            http_port,
            port,
            telegram_bot_token,
            telegram_chat_id,
            webhook_url,
            app_url,
            enable_keep_alive,
            keep_alive_interval,
            proxy_binary,
            tunnel_binary,
            proxy_binary_url,
            tunnel_binary_url,
            fingerprint,
            early_data,
            max_attempts,
            cleanup_delay,
            isp_label,
            log_level,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub chat_id: String,
}

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct Settings {
    pub layout: DataLayout,
    pub subscription_path: String,
    pub identity: ConnectionIdentity,
    pub link_options: LinkOptions,
    pub server_domain: Option<String>,
    pub server_secret: Option<String>,
    pub proxy_port: u16,
    pub http_port: u16,
    pub telegram: Option<TelegramSettings>,
    pub webhook_url: Option<String>,
    pub app_url: Option<String>,
    /// Keep-alive period, `None` when disabled
    pub keep_alive: Option<Duration>,
    pub proxy_binary: PathBuf,
    pub tunnel_binary: PathBuf,
    pub proxy_binary_url: Option<String>,
    pub tunnel_binary_url: Option<String>,
    pub discovery: DiscoveryConfig,
    /// Delay before temporary files are removed, `None` keeps them
    pub cleanup_delay: Option<Duration>,
    pub isp_label: Option<String>,
    pub log_level: String,
}

impl Settings {
    /// Resolve `overrides` (flags and environment) on top of the file layer
    pub fn resolve(overrides: ConfigLayer, file: ConfigLayer) -> Result<Self> {
        let c = overrides.merge(file);

        let layout = DataLayout::new(c.data_path.unwrap_or_else(|| DEFAULT_DATA_PATH.into()));

        let subscription_path = non_blank(c.subscription_path)
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_SUBSCRIPTION_PATH.to_string());

        let identity = ConnectionIdentity::new(
            non_blank(c.user_id).unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            non_blank(c.endpoint_ip).unwrap_or_else(|| DEFAULT_ENDPOINT_HOST.to_string()),
            c.endpoint_port.unwrap_or(DEFAULT_ENDPOINT_PORT),
            non_blank(c.bot_name).unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string()),
        )
        .context("Invalid connection identity")?;

        let link_options = LinkOptions {
            fingerprint: match c.fingerprint {
                Some(fp) => non_blank(Some(fp)),
                None => LinkOptions::default().fingerprint,
            },
            early_data: match c.early_data {
                Some(0) => None,
                Some(ed) => Some(ed),
                None => LinkOptions::default().early_data,
            },
        };

        let telegram = match (non_blank(c.telegram_bot_token), non_blank(c.telegram_chat_id)) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramSettings { bot_token, chat_id }),
            _ => None,
        };

        let app_url = non_blank(c.app_url);
        let keep_alive = match (c.enable_keep_alive.unwrap_or(false), &app_url) {
            (true, Some(_)) => Some(Duration::from_secs(
                c.keep_alive_interval.unwrap_or(DEFAULT_KEEP_ALIVE_SECS).max(1),
            )),
            _ => None,
        };

        let mut discovery = DiscoveryConfig::default();
        if let Some(max_attempts) = c.max_attempts {
            anyhow::ensure!(max_attempts > 0, "max-attempts must be at least 1");
            discovery.max_attempts = max_attempts;
        }

        let cleanup_delay = match c.cleanup_delay.unwrap_or(DEFAULT_CLEANUP_DELAY_SECS) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            proxy_binary: c.proxy_binary.unwrap_or_else(|| layout.proxy_binary()),
            tunnel_binary: c.tunnel_binary.unwrap_or_else(|| layout.tunnel_binary()),
            layout,
            subscription_path,
            identity,
            link_options,
            server_domain: non_blank(c.server_domain),
            server_secret: non_blank(c.server_secret),
            proxy_port: c.server_port.unwrap_or(DEFAULT_PROXY_PORT),
            http_port: c.http_port.or(c.port).unwrap_or(DEFAULT_HTTP_PORT),
            telegram,
            webhook_url: non_blank(c.webhook_url),
            app_url,
            keep_alive,
            proxy_binary_url: non_blank(c.proxy_binary_url),
            tunnel_binary_url: non_blank(c.tunnel_binary_url),
            discovery,
            cleanup_delay,
            isp_label: non_blank(c.isp_label),
            log_level: non_blank(c.log_level).unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
