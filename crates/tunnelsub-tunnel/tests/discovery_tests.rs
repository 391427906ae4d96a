//! Discovery loop driven by a scripted launcher

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tunnelsub_tunnel::{
    DiscoveryConfig, DiscoveryError, DomainDiscovery, LaunchError, TunnelContext, TunnelLauncher,
    TunnelMode,
};

/// Writes a canned log line on each launch
struct ScriptedLauncher {
    log_path: PathBuf,
    /// Log contents per launch, the last entry repeats
    script: Vec<String>,
    launches: usize,
    terminations: usize,
    log_existed_at_launch: Vec<bool>,
}

impl ScriptedLauncher {
    fn new(log_path: PathBuf, script: Vec<&str>) -> Self {
        Self {
            log_path,
            script: script.into_iter().map(String::from).collect(),
            launches: 0,
            terminations: 0,
            log_existed_at_launch: Vec::new(),
        }
    }
}

#[async_trait]
impl TunnelLauncher for ScriptedLauncher {
    async fn launch(&mut self, _args: &[String]) -> Result<(), LaunchError> {
        self.log_existed_at_launch.push(self.log_path.exists());
        let index = self.launches.min(self.script.len().saturating_sub(1));
        if let Some(line) = self.script.get(index) {
            tokio::fs::write(&self.log_path, line).await.unwrap();
        }
        self.launches += 1;
        Ok(())
    }

    async fn terminate(&mut self) {
        self.terminations += 1;
    }
}

struct FailingLauncher;

#[async_trait]
impl TunnelLauncher for FailingLauncher {
    async fn launch(&mut self, _args: &[String]) -> Result<(), LaunchError> {
        Err(LaunchError::MissingBinary(PathBuf::from("/nonexistent/bot")))
    }

    async fn terminate(&mut self) {}
}

fn fast_config(max_attempts: u32) -> DiscoveryConfig {
    DiscoveryConfig {
        max_attempts,
        settle: Duration::from_millis(5),
        poll_interval: Duration::from_millis(5),
        attempt_timeout: Duration::from_millis(30),
    }
}

fn context(temp: &TempDir) -> TunnelContext {
    TunnelContext {
        log_path: temp.path().join("boot.log"),
        ingress_path: temp.path().join("tunnel.yml"),
        proxy_port: 8001,
    }
}

#[tokio::test]
async fn test_quick_tunnel_hostname_found_on_first_attempt() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let mut launcher = ScriptedLauncher::new(
        ctx.log_path.clone(),
        vec!["INF |  https://random123.trycloudflare.com/  |\n"],
    );

    let discovery = DomainDiscovery::new(fast_config(3), TunnelMode::Quick, ctx);
    let session = discovery.run(&mut launcher).await.unwrap();

    assert_eq!(
        session.discovered_hostname.as_deref(),
        Some("random123.trycloudflare.com")
    );
    assert_eq!(session.attempt_count, 1);
    assert_eq!(launcher.launches, 1);
    // The tunnel keeps running after a successful discovery
    assert_eq!(launcher.terminations, 0);
}

#[tokio::test]
async fn test_retry_removes_log_and_restarts_tunnel() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let mut launcher = ScriptedLauncher::new(
        ctx.log_path.clone(),
        vec![
            "Requesting new quick Tunnel on trycloudflare.com...\n",
            "Requesting new quick Tunnel on trycloudflare.com...\n",
            "https://third-time.trycloudflare.com\n",
        ],
    );

    let discovery = DomainDiscovery::new(fast_config(5), TunnelMode::Quick, ctx);
    let session = discovery.run(&mut launcher).await.unwrap();

    assert_eq!(
        session.discovered_hostname.as_deref(),
        Some("third-time.trycloudflare.com")
    );
    assert_eq!(session.attempt_count, 3);
    assert_eq!(launcher.launches, 3);
    assert_eq!(launcher.terminations, 2);
    assert_eq!(launcher.log_existed_at_launch, vec![false, false, false]);
}

#[tokio::test]
async fn test_exhaustion_is_an_error() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let log_path = ctx.log_path.clone();
    let mut launcher = ScriptedLauncher::new(log_path.clone(), vec!["nothing useful\n"]);

    let discovery = DomainDiscovery::new(fast_config(3), TunnelMode::Quick, ctx);
    let result = discovery.run(&mut launcher).await;

    assert!(matches!(result, Err(DiscoveryError::Exhausted { attempts: 3 })));
    assert_eq!(launcher.launches, 3);
    assert_eq!(launcher.terminations, 3);
    assert!(!log_path.exists());
}

#[tokio::test]
async fn test_token_mode_skips_discovery() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let log_path = ctx.log_path.clone();
    let token: String = "Zx9=".chars().cycle().take(150).collect();
    let mode = TunnelMode::select(Some(&token), Some("app.example.com"));
    let mut launcher = ScriptedLauncher::new(log_path.clone(), vec!["https://x.trycloudflare.com"]);

    let discovery = DomainDiscovery::new(fast_config(3), mode, ctx);
    let session = discovery.run(&mut launcher).await.unwrap();

    assert_eq!(session.discovered_hostname.as_deref(), Some("app.example.com"));
    assert_eq!(session.attempt_count, 0);
    assert_eq!(launcher.launches, 0);
    assert!(!log_path.exists());
}

#[tokio::test]
async fn test_launch_failure_stops_discovery() {
    let temp = TempDir::new().unwrap();
    let discovery = DomainDiscovery::new(fast_config(5), TunnelMode::Quick, context(&temp));

    let result = discovery.run(&mut FailingLauncher).await;
    assert!(matches!(result, Err(DiscoveryError::Launch(_))));
}
