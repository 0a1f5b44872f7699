//! Node lifecycle orchestration for the backup fleet.
//!
//! The orchestrator drives one node through its full create-to-destroy
//! lifecycle, composing four external collaborators behind narrow
//! interfaces:
//!
//! - a cloud [`Provider`](bnode_cloud::Provider) (compute),
//! - a [`DnsSync`](dns::DnsSync) (one A record per node),
//! - a [`RemoteExecutor`](remote::RemoteExecutor) (readiness probing
//!   and bootstrap commands),
//! - a [`Notifier`](notify::Notifier) (best-effort messages).
//!
//! Provisioning fails fast; destruction makes maximum forward progress
//! even when individual cleanup calls fail.

pub mod bootstrap;
pub mod config;
pub mod dns;
pub mod error;
pub mod node;
pub mod notify;
pub mod orchestrator;
pub mod poll;
pub mod remote;

pub use config::{Config, PollConfig, SshConfig};
pub use dns::{CloudflareDns, DnsError, DnsSync};
pub use error::LifecycleError;
pub use node::{LifecycleState, Node};
pub use notify::{DiscordNotifier, NotificationEvent, Notifier, NullNotifier, Severity};
pub use orchestrator::{DestroyReport, Orchestrator};
pub use remote::{ExecOutput, RemoteError, RemoteExecutor, SshExecutor};
