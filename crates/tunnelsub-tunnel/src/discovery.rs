//! Public hostname discovery
//!
//! Quick tunnels get a random hostname that only shows up in the tunnel
//! client's log. [`DomainDiscovery`] launches the tunnel, polls the log
//! until the hostname appears, and restarts the tunnel on a bounded number
//! of attempts. Tunnels with a declared hostname skip all of this.

use regex_lite::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::launcher::{LaunchError, TunnelLauncher};
use crate::layout::remove_files;
use crate::mode::{TunnelContext, TunnelMode};

/// Default number of tunnel launches before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("No tunnel hostname found after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("Failed to launch tunnel: {0}")]
    Launch(#[from] LaunchError),
}

/// Retry policy of the discovery loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Tunnel launches before giving up for this run
    pub max_attempts: u32,
    /// Delay between launching the tunnel and the first log read
    pub settle: Duration,
    /// Delay between log reads
    pub poll_interval: Duration,
    /// How long one attempt keeps polling after settling
    pub attempt_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            settle: Duration::from_secs(3),
            poll_interval: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(8),
        }
    }
}

/// State of one discovery run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSession {
    pub log_path: PathBuf,
    pub discovered_hostname: Option<String>,
    pub attempt_count: u32,
}

impl TunnelSession {
    fn new(log_path: PathBuf) -> Self {
        Self {
            log_path,
            discovered_hostname: None,
            attempt_count: 0,
        }
    }
}

/// Drives the tunnel until a public hostname is known
#[derive(Debug, Clone)]
pub struct DomainDiscovery {
    config: DiscoveryConfig,
    mode: TunnelMode,
    context: TunnelContext,
}

impl DomainDiscovery {
    pub fn new(config: DiscoveryConfig, mode: TunnelMode, context: TunnelContext) -> Self {
        Self {
            config,
            mode,
            context,
        }
    }

    pub fn mode(&self) -> &TunnelMode {
        &self.mode
    }

    /// Resolve the public hostname
    ///
    /// Returns immediately with the declared hostname for token and named
    /// tunnels. Otherwise launches a quick tunnel through `launcher` and
    /// scrapes its log, retrying up to `max_attempts` times. On success the
    /// tunnel is left running.
    pub async fn run(
        &self,
        launcher: &mut dyn TunnelLauncher,
    ) -> Result<TunnelSession, DiscoveryError> {
        let mut session = TunnelSession::new(self.context.log_path.clone());

        if let Some(hostname) = self.mode.declared_hostname() {
            info!("Tunnel hostname is declared: {}", hostname);
            session.discovered_hostname = Some(hostname.to_string());
            return Ok(session);
        }

        let args = self.mode.args(&self.context);
        let log_path = &self.context.log_path;

        for attempt in 1..=self.config.max_attempts {
            session.attempt_count = attempt;
            info!(
                "Starting quick tunnel (attempt {}/{})",
                attempt, self.config.max_attempts
            );
            launcher.launch(&args).await?;

            tokio::time::sleep(self.config.settle).await;
            let deadline = Instant::now() + self.config.attempt_timeout;
            if let Some(hostname) =
                poll_for_hostname(log_path, self.config.poll_interval, deadline).await
            {
                info!("Tunnel hostname: {}", hostname);
                session.discovered_hostname = Some(hostname);
                return Ok(session);
            }

            warn!(
                "No tunnel hostname in {:?} on attempt {}, restarting tunnel",
                log_path, attempt
            );
            remove_files(std::slice::from_ref(log_path)).await;
            launcher.terminate().await;
        }

        Err(DiscoveryError::Exhausted {
            attempts: self.config.max_attempts,
        })
    }
}

fn hostname_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"https?://([A-Za-z0-9.-]+\.trycloudflare\.com)")
            .expect("hostname pattern is valid")
    })
}

/// First quick-tunnel hostname mentioned in `log`
///
/// Anything after the hostname (a trailing slash, a query) is ignored.
pub fn extract_hostname(log: &str) -> Option<String> {
    hostname_pattern()
        .captures(log)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Read `log_path` every `interval` until a hostname shows up or `deadline` passes
///
/// The log is read at least once. A missing log counts as "not yet".
pub async fn poll_for_hostname(
    log_path: &Path,
    interval: Duration,
    deadline: Instant,
) -> Option<String> {
    loop {
        match tokio::fs::read(log_path).await {
            Ok(bytes) => {
                if let Some(hostname) = extract_hostname(&String::from_utf8_lossy(&bytes)) {
                    return Some(hostname);
                }
            }
            Err(e) => debug!("Tunnel log not readable yet: {}", e),
        }

        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
