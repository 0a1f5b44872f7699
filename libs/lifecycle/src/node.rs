//! Node model and lifecycle states.

use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bnode_cloud::ProviderKind;

/// Lifecycle states a node moves through.
///
/// Success path: Init → Provisioning → AwaitingAddress → DnsSync →
/// AwaitingReachability → Bootstrapping → Ready. `Failed` is reachable
/// from any non-terminal state. Destroy path: PoweringOff → Deleting →
/// VolumeCleanup → DnsTeardown → Destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Init,
    Provisioning,
    AwaitingAddress,
    DnsSync,
    AwaitingReachability,
    Bootstrapping,
    Ready,
    Failed,
    PoweringOff,
    Deleting,
    VolumeCleanup,
    DnsTeardown,
    Destroyed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Provisioning => "provisioning",
            Self::AwaitingAddress => "awaiting_address",
            Self::DnsSync => "dns_sync",
            Self::AwaitingReachability => "awaiting_reachability",
            Self::Bootstrapping => "bootstrapping",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::PoweringOff => "powering_off",
            Self::Deleting => "deleting",
            Self::VolumeCleanup => "volume_cleanup",
            Self::DnsTeardown => "dns_teardown",
            Self::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// One logical backup-serving host across its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Stable short identifier (e.g. "b1").
    pub name: String,

    pub provider: ProviderKind,

    /// Vendor-side server id, set once created.
    pub server_id: Option<String>,

    /// Public address, set once the vendor assigns one.
    pub public_address: Option<Ipv4Addr>,

    /// `{name}.{domain}`.
    pub hostname: String,

    pub lifecycle_state: LifecycleState,

    pub created_at: DateTime<Utc>,
}

impl Node {
    pub fn new(name: &str, provider: ProviderKind, domain: &str) -> Self {
        Self {
            name: name.to_string(),
            provider,
            server_id: None,
            public_address: None,
            hostname: format!("{name}.{domain}"),
            lifecycle_state: LifecycleState::Init,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_derived_from_domain() {
        let node = Node::new("b1", ProviderKind::Hetzner, "example.com");
        assert_eq!(node.hostname, "b1.example.com");
        assert_eq!(node.lifecycle_state, LifecycleState::Init);
        assert!(node.public_address.is_none());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LifecycleState::AwaitingAddress.to_string(), "awaiting_address");
        assert_eq!(LifecycleState::Ready.to_string(), "ready");
    }
}
