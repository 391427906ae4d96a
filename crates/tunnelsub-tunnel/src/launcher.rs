//! Child process management for the proxy and tunnel binaries

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Binary not found: {0:?}")]
    MissingBinary(PathBuf),

    #[error("Failed to spawn {binary:?}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Starts and stops the tunnel client
///
/// At most one tunnel process is alive per launcher.
#[async_trait]
pub trait TunnelLauncher: Send {
    /// Start the tunnel with `args`, replacing any running instance
    async fn launch(&mut self, args: &[String]) -> Result<(), LaunchError>;

    /// Terminate the running tunnel, if any
    async fn terminate(&mut self);
}

/// A detached child process owned by the launcher
///
/// Output is discarded. The process is killed when the handle is dropped.
#[derive(Debug)]
pub struct ManagedProcess {
    name: String,
    child: Child,
}

impl ManagedProcess {
    pub fn spawn(name: &str, binary: &Path, args: &[String]) -> Result<Self, LaunchError> {
        if !binary.exists() {
            return Err(LaunchError::MissingBinary(binary.to_path_buf()));
        }

        debug!("Spawning {}: {:?} {:?}", name, binary, args);
        let child = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                binary: binary.to_path_buf(),
                source,
            })?;

        info!("{} started (pid {:?})", name, child.id());
        Ok(Self {
            name: name.to_string(),
            child,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether the process is still running
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the process and reap it
    pub async fn terminate(mut self) {
        match self.child.kill().await {
            Ok(()) => info!("{} terminated", self.name),
            Err(e) => warn!("Failed to terminate {}: {}", self.name, e),
        }
    }
}

/// Runs the real tunnel binary
#[derive(Debug)]
pub struct ProcessLauncher {
    binary: PathBuf,
    current: Option<ManagedProcess>,
}

impl ProcessLauncher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            current: None,
        }
    }

    pub fn is_running(&mut self) -> bool {
        self.current
            .as_mut()
            .map(ManagedProcess::is_running)
            .unwrap_or(false)
    }
}

#[async_trait]
impl TunnelLauncher for ProcessLauncher {
    async fn launch(&mut self, args: &[String]) -> Result<(), LaunchError> {
        if let Some(previous) = self.current.take() {
            previous.terminate().await;
        }
        self.current = Some(ManagedProcess::spawn("tunnel", &self.binary, args)?);
        Ok(())
    }

    async fn terminate(&mut self) {
        if let Some(process) = self.current.take() {
            process.terminate().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary() {
        let mut launcher = ProcessLauncher::new("/nonexistent/tunnel-binary");
        let result = launcher.launch(&["tunnel".to_string()]).await;
        assert!(matches!(result, Err(LaunchError::MissingBinary(_))));
        assert!(!launcher.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_and_terminate() {
        let mut launcher = ProcessLauncher::new("/bin/sleep");
        launcher.launch(&["30".to_string()]).await.unwrap();
        assert!(launcher.is_running());

        // Relaunching replaces the previous process
        launcher.launch(&["30".to_string()]).await.unwrap();
        assert!(launcher.is_running());

        launcher.terminate().await;
        assert!(!launcher.is_running());
    }
}
