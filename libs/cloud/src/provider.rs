//! Provider adapter interface.
//!
//! One trait covers the capability set every vendor must offer:
//! create, list, get, destroy, snapshot, power-state change, and
//! external-volume cleanup. The orchestrator depends only on this
//! trait; vendor specifics stay inside each adapter and inside the
//! opaque `extra` map of [`ProviderSpec`].

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CloudError;

/// Supported cloud vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Scaleway,
    Hetzner,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scaleway => "scaleway",
            Self::Hetzner => "hetzner",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scaleway" => Ok(Self::Scaleway),
            "hetzner" => Ok(Self::Hetzner),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Immutable description of how to materialize a server on one vendor.
///
/// Selected by [`ProviderKind`]; never mutated at runtime. The `extra`
/// map is passed through verbatim to the vendor create call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub kind: ProviderKind,

    /// Machine class (e.g. "STARDUST1-S", "cx22").
    pub server_type: String,

    /// OS image identifier in the vendor's naming.
    pub image: String,

    /// Region/zone (e.g. "fr-par-1", "fsn1").
    pub zone: String,

    /// Informational monthly cost estimate.
    pub monthly_cost_eur: f64,

    /// Vendor-specific create parameters, passed through verbatim.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A server as reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: String,
    pub name: String,

    /// Public IPv4, absent until the vendor assigns one.
    pub address: Option<Ipv4Addr>,

    /// Vendor status string ("running", "stopped", ...).
    pub status: String,

    pub server_type: String,
}

/// An externally-attached (non-local) storage volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRecord {
    pub id: String,
    pub volume_type: String,
}

/// Desired power state for `set_power`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
}

/// Uniform capability set implemented per vendor.
///
/// Contract notes:
/// - `create` returns once the vendor accepted the request. The record
///   may not yet carry an address; callers must not assume readiness.
///   Resource creation has real monetary cost, so callers invoke it at
///   most once per lifecycle run.
/// - `destroy` and `delete_volume` are idempotent: an absent resource
///   is a no-op success, because destroy may be retried after a prior
///   partial failure.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Which vendor this adapter talks to.
    fn kind(&self) -> ProviderKind;

    /// Request a new server. The returned record may lack an address.
    async fn create(&self, spec: &ProviderSpec, name: &str) -> Result<ServerRecord, CloudError>;

    /// List all servers in the configured zone/project.
    async fn list(&self) -> Result<Vec<ServerRecord>, CloudError>;

    /// Fetch one server by vendor id.
    async fn get(&self, id: &str) -> Result<ServerRecord, CloudError>;

    /// Delete a server. Absent server is a no-op success.
    async fn destroy(&self, id: &str) -> Result<(), CloudError>;

    /// Snapshot the server's volumes; returns the snapshot ids created.
    async fn snapshot(&self, id: &str) -> Result<Vec<String>, CloudError>;

    /// Power the server on or off.
    async fn set_power(&self, id: &str, state: PowerState) -> Result<(), CloudError>;

    /// Externally-attached volumes that survive server deletion and
    /// need explicit cleanup. Vendors whose volumes die with the
    /// server return an empty list.
    async fn attached_volumes(&self, id: &str) -> Result<Vec<VolumeRecord>, CloudError>;

    /// Delete an orphaned volume. Absent volume is a no-op success.
    async fn delete_volume(&self, volume_id: &str) -> Result<(), CloudError>;
}

/// Find a named server in a listing.
pub fn find_by_name<'a>(servers: &'a [ServerRecord], name: &str) -> Option<&'a ServerRecord> {
    servers.iter().find(|s| s.name == name)
}

/// Built-in specs for the supported vendors, keyed by kind.
///
/// Mirrors the machine classes the backup fleet actually runs on; the
/// `extra` map stays empty here and can be extended per deployment.
pub fn default_specs() -> HashMap<ProviderKind, ProviderSpec> {
    let mut specs = HashMap::new();
    specs.insert(
        ProviderKind::Scaleway,
        ProviderSpec {
            kind: ProviderKind::Scaleway,
            server_type: "STARDUST1-S".to_string(),
            image: "ubuntu_jammy".to_string(),
            zone: "fr-par-1".to_string(),
            monthly_cost_eur: 1.80,
            extra: serde_json::Map::new(),
        },
    );
    specs.insert(
        ProviderKind::Hetzner,
        ProviderSpec {
            kind: ProviderKind::Hetzner,
            server_type: "cx22".to_string(),
            image: "ubuntu-22.04".to_string(),
            zone: "fsn1".to_string(),
            monthly_cost_eur: 3.49,
            extra: serde_json::Map::new(),
        },
    );
    specs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_round_trip() {
        for kind in [ProviderKind::Scaleway, ProviderKind::Hetzner] {
            let parsed: ProviderKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("aws".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_default_specs_cover_all_kinds() {
        let specs = default_specs();
        for kind in [ProviderKind::Scaleway, ProviderKind::Hetzner] {
            let spec = specs.get(&kind).unwrap();
            assert_eq!(spec.kind, kind);
            assert!(spec.monthly_cost_eur > 0.0);
        }
    }

    #[test]
    fn test_find_by_name() {
        let servers = vec![
            ServerRecord {
                id: "1".to_string(),
                name: "b1".to_string(),
                address: None,
                status: "running".to_string(),
                server_type: "cx22".to_string(),
            },
            ServerRecord {
                id: "2".to_string(),
                name: "b2".to_string(),
                address: Some("203.0.113.7".parse().unwrap()),
                status: "running".to_string(),
                server_type: "cx22".to_string(),
            },
        ];

        assert_eq!(find_by_name(&servers, "b2").unwrap().id, "2");
        assert!(find_by_name(&servers, "b3").is_none());
    }
}
