//! Node lifecycle orchestrator.
//!
//! Drives a node from "does not exist" to "fully bootstrapped and
//! reachable" and back to "destroyed", coordinating the provider, DNS,
//! remote execution, and notifications. The create path fails fast so
//! a broken node stops wasting steps; the destroy path is best-effort
//! everywhere so billable resources are not orphaned by one failed
//! cleanup call.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex as StdMutex};

use serde::Serialize;
use tokio::sync::{watch, Mutex as TokioMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use bnode_cloud::{find_by_name, PowerState, Provider, ProviderKind, ProviderSpec};

use crate::bootstrap;
use crate::config::Config;
use crate::dns::{DnsError, DnsSync};
use crate::error::LifecycleError;
use crate::node::{LifecycleState, Node};
use crate::notify::{NotificationEvent, Notifier};
use crate::poll;
use crate::remote::RemoteExecutor;

/// Outcome of a destroy run.
///
/// Destroy-path failures are folded in here instead of aborting the
/// teardown; the caller decides how to report partial failure.
#[derive(Debug, Clone, Serialize)]
pub struct DestroyReport {
    pub node: String,
    pub last_address: Option<Ipv4Addr>,

    /// The server listing itself failed; the VM's existence is
    /// unknown and no teardown was attempted.
    pub lookup_failed: bool,

    pub server_found: bool,
    pub server_deleted: bool,
    pub volumes_deleted: Vec<String>,
    pub volumes_failed: Vec<String>,
    pub dns_deleted: bool,
}

impl DestroyReport {
    fn new(node: &str) -> Self {
        Self {
            node: node.to_string(),
            last_address: None,
            lookup_failed: false,
            server_found: false,
            server_deleted: false,
            volumes_deleted: Vec::new(),
            volumes_failed: Vec::new(),
            dns_deleted: false,
        }
    }

    /// True when every cleanup action succeeded.
    pub fn fully_succeeded(&self) -> bool {
        !self.lookup_failed
            && self.server_deleted
            && self.volumes_failed.is_empty()
            && self.dns_deleted
    }
}

/// The lifecycle orchestrator.
pub struct Orchestrator {
    providers: HashMap<ProviderKind, Arc<dyn Provider>>,
    dns: Arc<dyn DnsSync>,
    remote: Arc<dyn RemoteExecutor>,
    notifier: Arc<dyn Notifier>,
    config: Config,

    /// Per-name locks serializing create/destroy of the same logical
    /// node within this process.
    locks: StdMutex<HashMap<String, Arc<TokioMutex<()>>>>,

    /// Shutdown signal; polling loops abort with `Cancelled` when it
    /// flips to true.
    cancel: watch::Receiver<bool>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        providers: HashMap<ProviderKind, Arc<dyn Provider>>,
        dns: Arc<dyn DnsSync>,
        remote: Arc<dyn RemoteExecutor>,
        notifier: Arc<dyn Notifier>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            providers,
            dns,
            remote,
            notifier,
            config,
            locks: StdMutex::new(HashMap::new()),
            cancel,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn provider_for(&self, kind: ProviderKind) -> Result<Arc<dyn Provider>, LifecycleError> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| LifecycleError::Config(format!("no provider configured for {kind}")))
    }

    /// Take the in-process lock for a node name.
    async fn lock_node(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("node lock table poisoned");
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(TokioMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    fn set_state(&self, node: &mut Node, state: LifecycleState) {
        info!(
            node = %node.name,
            from = %node.lifecycle_state,
            to = %state,
            "Lifecycle transition"
        );
        node.lifecycle_state = state;
    }

    async fn notify(&self, event: NotificationEvent) {
        // Fire-and-forget: delivery failure is logged, never surfaced.
        if !self.notifier.emit(&event).await {
            debug!("Notification not delivered");
        }
    }

    /// Provision a node end to end: create, await address, DNS upsert,
    /// await reachability, bootstrap.
    pub async fn provision(
        &self,
        name: &str,
        kind: ProviderKind,
    ) -> Result<Node, LifecycleError> {
        let _guard = self.lock_node(name).await;

        let provider = self.provider_for(kind)?;
        let spec = self.config.spec_for(kind)?.clone();

        let mut node = Node::new(name, kind, &self.config.domain);
        info!(node = %name, provider = %kind, "Starting provisioning lifecycle");
        self.notify(NotificationEvent::info(format!(
            "**{name}** provisioning on {kind}..."
        )))
        .await;

        match self.provision_inner(&mut node, provider.as_ref(), &spec).await {
            Ok(()) => {
                self.set_state(&mut node, LifecycleState::Ready);
                let address = node
                    .public_address
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                info!(node = %name, address = %address, "Node ready");
                self.notify(NotificationEvent::success(format!(
                    "**{name}** is ALIVE!\n\
                     • Provider: {kind}\n\
                     • IP: {address}\n\
                     • SSH: `ssh {user}@{hostname}`\n\
                     • Endpoints: http://{hostname}/env",
                    user = self.config.admin_user,
                    hostname = node.hostname,
                )))
                .await;
                Ok(node)
            }
            Err(e) => {
                self.set_state(&mut node, LifecycleState::Failed);
                error!(node = %name, state = %node.lifecycle_state, error = %e, "Provisioning failed");
                self.notify(NotificationEvent::failure(format!(
                    "**{name}** provisioning failed: {e}"
                )))
                .await;
                Err(e)
            }
        }
    }

    async fn provision_inner(
        &self,
        node: &mut Node,
        provider: &dyn Provider,
        spec: &ProviderSpec,
    ) -> Result<(), LifecycleError> {
        let mut cancel = self.cancel.clone();

        // Create is invoked exactly once per lifecycle run; a failure
        // here needs no cleanup since nothing was created.
        self.set_state(node, LifecycleState::Provisioning);
        let record = provider
            .create(spec, &node.name)
            .await
            .map_err(|e| LifecycleError::provider(LifecycleState::Provisioning, e))?;
        node.server_id = Some(record.id);

        // A timeout here leaves the server running: it is billable and
        // in an ambiguous state, so cleanup is left to the operator.
        self.set_state(node, LifecycleState::AwaitingAddress);
        let address =
            poll::wait_for_address(provider, &node.name, &self.config.poll, &mut cancel).await?;
        node.public_address = Some(address);

        // Soft dependency: the record is upserted with the freshly
        // assigned address before reachability is confirmed, and a
        // failure is a warning, not an abort.
        self.set_state(node, LifecycleState::DnsSync);
        if let Err(e) = self.dns.upsert(&node.name, address).await {
            warn!(node = %node.name, error = %e, "DNS upsert failed, continuing without it");
        }

        self.set_state(node, LifecycleState::AwaitingReachability);
        poll::wait_for_reachable(self.remote.as_ref(), address, &self.config.poll, &mut cancel)
            .await?;
        poll::sleep_or_cancel(self.config.poll.post_reachable_settle, &mut cancel).await?;

        // Step failure leaves the VM and DNS record in place for
        // diagnosis rather than auto-destroying a half-configured host.
        self.set_state(node, LifecycleState::Bootstrapping);
        let steps = bootstrap::plan(node, spec, &self.config);
        bootstrap::run_bootstrap(
            self.remote.as_ref(),
            address,
            &steps,
            self.config.ssh.command_timeout,
        )
        .await?;

        Ok(())
    }

    /// Tear a node down: power off, delete, reclaim orphan volumes,
    /// remove DNS. Every action is best-effort; the report records
    /// what actually happened.
    pub async fn destroy(
        &self,
        name: &str,
        kind: ProviderKind,
    ) -> Result<DestroyReport, LifecycleError> {
        let _guard = self.lock_node(name).await;

        let provider = self.provider_for(kind)?;
        let mut cancel = self.cancel.clone();
        let mut report = DestroyReport::new(name);

        info!(node = %name, provider = %kind, "Starting destroy lifecycle");
        self.notify(NotificationEvent::info(format!("**{name}** shutting down...")))
            .await;

        let server = match provider.list().await {
            Ok(servers) => find_by_name(&servers, name).cloned(),
            Err(e) => {
                // A failed listing is not "server absent": the VM may
                // still exist and bill, so the report must not claim
                // a satisfied deletion.
                warn!(node = %name, error = %e, "Could not list servers, skipping VM teardown");
                report.lookup_failed = true;
                None
            }
        };

        match server {
            Some(server) => {
                report.server_found = true;
                report.last_address = server.address;

                info!(node = %name, server_id = %server.id, state = %LifecycleState::PoweringOff, "Powering off");
                if let Err(e) = provider.set_power(&server.id, PowerState::Off).await {
                    // May already be off.
                    warn!(node = %name, error = %e, "Poweroff request failed, proceeding");
                }
                poll::wait_for_powered_off(
                    provider.as_ref(),
                    &server.id,
                    &self.config.poll,
                    &mut cancel,
                )
                .await;

                // Volume ids must be captured before the server is
                // gone; afterwards nothing links them to this node.
                let volumes = match provider.attached_volumes(&server.id).await {
                    Ok(volumes) => volumes,
                    Err(e) => {
                        warn!(node = %name, error = %e, "Could not enumerate volumes");
                        Vec::new()
                    }
                };

                info!(node = %name, server_id = %server.id, state = %LifecycleState::Deleting, "Deleting server");
                match provider.destroy(&server.id).await {
                    Ok(()) => report.server_deleted = true,
                    Err(e) => {
                        error!(node = %name, error = %e, "Server deletion failed, continuing cleanup");
                    }
                }

                if !volumes.is_empty() {
                    info!(
                        node = %name,
                        volume_count = volumes.len(),
                        state = %LifecycleState::VolumeCleanup,
                        "Reclaiming orphan volumes"
                    );
                    let _ = poll::sleep_or_cancel(self.config.poll.volume_settle, &mut cancel).await;
                    for volume in volumes {
                        match provider.delete_volume(&volume.id).await {
                            Ok(()) => report.volumes_deleted.push(volume.id),
                            Err(e) => {
                                warn!(
                                    volume_id = %volume.id,
                                    error = %e,
                                    "Volume deletion failed, needs manual cleanup"
                                );
                                report.volumes_failed.push(volume.id);
                            }
                        }
                    }
                }
            }
            None if report.lookup_failed => {
                info!(node = %name, "Server state unknown, VM teardown skipped");
            }
            None => {
                // Absent server is a satisfied destroy.
                info!(node = %name, "No server found, nothing to delete");
                report.server_deleted = true;
            }
        }

        // DNS teardown happens independently of VM deletion outcome.
        info!(node = %name, state = %LifecycleState::DnsTeardown, "Removing DNS record");
        match self.dns.delete(name).await {
            Ok(()) => report.dns_deleted = true,
            // Unconfigured DNS means there never was a record to
            // remove; soft on the create path, satisfied here.
            Err(e @ DnsError::NotConfigured(_)) => {
                warn!(node = %name, error = %e, "DNS not configured, no record to remove");
                report.dns_deleted = true;
            }
            Err(e) => {
                warn!(node = %name, error = %e, "DNS deletion failed");
            }
        }

        let last_address = report
            .last_address
            .map(|a| a.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        info!(node = %name, state = %LifecycleState::Destroyed, "Destroy lifecycle finished");
        self.notify(NotificationEvent::info(format!(
            "**{name}** destroyed\n• Was at: {last_address}"
        )))
        .await;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use bnode_cloud::MockProvider;

    use crate::dns::DnsError;
    use crate::notify::NullNotifier;
    use crate::remote::{ExecOutput, RemoteError};

    struct NoopDns;

    #[async_trait]
    impl DnsSync for NoopDns {
        async fn upsert(&self, _name: &str, _address: Ipv4Addr) -> Result<(), DnsError> {
            Ok(())
        }

        async fn delete(&self, _name: &str) -> Result<(), DnsError> {
            Ok(())
        }
    }

    struct AlwaysReachable;

    #[async_trait]
    impl RemoteExecutor for AlwaysReachable {
        async fn run(
            &self,
            _address: Ipv4Addr,
            _user: &str,
            _command: &str,
            _timeout: std::time::Duration,
        ) -> Result<ExecOutput, RemoteError> {
            Ok(ExecOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            })
        }

        async fn probe(
            &self,
            _address: Ipv4Addr,
            _port: u16,
            _timeout: std::time::Duration,
        ) -> bool {
            true
        }
    }

    fn orchestrator(provider: Arc<MockProvider>) -> Orchestrator {
        let mut providers: HashMap<ProviderKind, Arc<dyn Provider>> = HashMap::new();
        providers.insert(ProviderKind::Hetzner, provider);
        let (_tx, rx) = watch::channel(false);

        Orchestrator::new(
            Config::for_tests(),
            providers,
            Arc::new(NoopDns),
            Arc::new(AlwaysReachable),
            Arc::new(NullNotifier),
            rx,
        )
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_config_error() {
        let orchestrator = orchestrator(Arc::new(MockProvider::new()));
        let err = orchestrator
            .provision("b1", ProviderKind::Scaleway)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Config(_)));
    }

    #[tokio::test]
    async fn test_same_name_operations_are_serialized() {
        let provider = Arc::new(MockProvider::new());
        let orchestrator = Arc::new(orchestrator(Arc::clone(&provider)));

        let a = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.provision("b1", ProviderKind::Hetzner).await }
        });
        let b = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.destroy("b1", ProviderKind::Hetzner).await }
        });

        // Both complete; the per-name lock prevents interleaving, so
        // whichever ran second saw a consistent world.
        let (a, b) = tokio::join!(a, b);
        assert!(a.unwrap().is_ok());
        assert!(b.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_destroy_report_on_absent_server() {
        let orchestrator = orchestrator(Arc::new(MockProvider::new()));
        let report = orchestrator
            .destroy("ghost", ProviderKind::Hetzner)
            .await
            .unwrap();
        assert!(!report.server_found);
        assert!(report.server_deleted);
        assert!(report.dns_deleted);
        assert!(report.fully_succeeded());
    }
}
