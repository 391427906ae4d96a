//! Link generation for tunnelsub
//!
//! Turns a discovered tunnel hostname plus the configured connection identity
//! into one proxy URI per scheme, and packs them into the base64 subscription
//! document served to clients.

pub mod generator;
pub mod isp;
pub mod subscription;

pub use generator::{Link, LinkError, LinkGenerator, LinkOptions, LinkSet, VmessPayload};
pub use isp::{resolve_label, CloudflareMeta, IspLookup, IspLookupError, StaticIsp};
pub use subscription::{
    node_lines, write_atomic, StoreError, SubscriptionDocument, SubscriptionStore,
    KNOWN_NODE_PREFIXES,
};
