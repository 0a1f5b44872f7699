//! Cloud provider adapters for the backup-node fleet.
//!
//! One [`Provider`] trait covers the capability set the lifecycle
//! orchestrator needs (create, list, get, destroy, snapshot, power,
//! volume cleanup), with one adapter per vendor and a scriptable mock
//! for tests. Vendor error encodings are normalized to [`CloudError`].

mod error;
mod hetzner;
mod mock;
mod provider;
mod scaleway;

pub use error::CloudError;
pub use hetzner::HetznerProvider;
pub use mock::{FailureClass, MockProvider};
pub use provider::{
    default_specs, find_by_name, PowerState, Provider, ProviderKind, ProviderSpec, ServerRecord,
    VolumeRecord,
};
pub use scaleway::{ScalewayCredentials, ScalewayProvider};
