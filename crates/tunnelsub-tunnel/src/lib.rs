//! Tunnel and proxy process management
//!
//! Starts the external proxy and tunnel binaries, writes the files they
//! consume, and discovers the public hostname the tunnel ends up on.

pub mod artifacts;
pub mod discovery;
pub mod ingress;
pub mod launcher;
pub mod layout;
pub mod mode;
pub mod proxy_config;

pub use artifacts::{ArtifactError, ArtifactFetcher, BinarySpec};
pub use discovery::{
    extract_hostname, poll_for_hostname, DiscoveryConfig, DiscoveryError, DomainDiscovery,
    TunnelSession,
};
pub use ingress::{write_named_tunnel_files, IngressError, IngressFile};
pub use launcher::{LaunchError, ManagedProcess, ProcessLauncher, TunnelLauncher};
pub use layout::{remove_files, DataLayout};
pub use mode::{NamedTunnelCredentials, TunnelContext, TunnelMode};
pub use proxy_config::{ProxyConfig, ProxyConfigError, INTERNAL_PORTS};
