//! Shared types for the tunnelsub launcher
//!
//! Identity, proxy schemes and platform detection used by the tunnel,
//! link and publishing crates.

pub mod arch;
pub mod identity;

pub use arch::Arch;
pub use identity::{ConnectionIdentity, IdentityError, Scheme};

/// Internal ws path served by the vless inbound
pub const VLESS_WS_PATH: &str = "/vless-argo";

/// Internal ws path served by the vmess inbound
pub const VMESS_WS_PATH: &str = "/vmess-argo";

/// Internal ws path served by the trojan inbound
pub const TROJAN_WS_PATH: &str = "/trojan-argo";

/// Placeholder network label used when the metadata lookup fails
pub const PLACEHOLDER_ISP_LABEL: &str = "CF";
