//! Readiness polling.
//!
//! Two independent bounded wait phases: address acquisition against
//! the provider, then TCP reachability of the SSH port. Fixed-interval
//! polling, no backoff; every loop is cancellable through the shutdown
//! signal and terminates within its configured bound.

use std::net::Ipv4Addr;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use bnode_cloud::{find_by_name, Provider};

use crate::config::PollConfig;
use crate::error::LifecycleError;
use crate::node::LifecycleState;
use crate::remote::RemoteExecutor;

const SSH_PORT: u16 = 22;

/// Sleep for `duration` unless the shutdown signal fires first.
pub(crate) async fn sleep_or_cancel(
    duration: std::time::Duration,
    cancel: &mut watch::Receiver<bool>,
) -> Result<(), LifecycleError> {
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return Ok(()),
            changed = cancel.changed() => {
                match changed {
                    Ok(()) if *cancel.borrow() => return Err(LifecycleError::Cancelled),
                    Ok(()) => continue,
                    Err(_) => {
                        // Sender dropped; cancellation is no longer
                        // possible, finish the sleep plainly.
                        (&mut sleep).await;
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Poll the provider until the named server has a public address.
///
/// Transient provider errors are retried within the bound; any other
/// error class aborts immediately. Exhausting the bound is fatal and
/// leaves the resource running: it is billable and its state is
/// ambiguous, so cleanup is an operator decision.
pub async fn wait_for_address(
    provider: &dyn Provider,
    name: &str,
    poll: &PollConfig,
    cancel: &mut watch::Receiver<bool>,
) -> Result<Ipv4Addr, LifecycleError> {
    debug!(node = %name, settle = ?poll.address_settle, "Waiting before first address poll");
    sleep_or_cancel(poll.address_settle, cancel).await?;

    for attempt in 1..=poll.address_attempts {
        match provider.list().await {
            Ok(servers) => {
                if let Some(address) = find_by_name(&servers, name).and_then(|s| s.address) {
                    info!(node = %name, address = %address, attempt, "Address assigned");
                    return Ok(address);
                }
                debug!(node = %name, attempt, "No address yet");
            }
            Err(e) if e.is_transient() => {
                warn!(node = %name, attempt, error = %e, "Address poll failed, retrying");
            }
            Err(e) => return Err(LifecycleError::provider(LifecycleState::AwaitingAddress, e)),
        }

        if attempt < poll.address_attempts {
            sleep_or_cancel(poll.address_interval, cancel).await?;
        }
    }

    Err(LifecycleError::Timeout {
        what: "address assignment",
        elapsed: poll.address_settle + poll.address_interval * poll.address_attempts,
    })
}

/// Probe the SSH port until it answers or the wall clock runs out.
pub async fn wait_for_reachable(
    remote: &dyn RemoteExecutor,
    address: Ipv4Addr,
    poll: &PollConfig,
    cancel: &mut watch::Receiver<bool>,
) -> Result<(), LifecycleError> {
    let deadline = Instant::now() + poll.reachability_timeout;

    loop {
        if remote
            .probe(address, SSH_PORT, poll.reachability_interval)
            .await
        {
            info!(address = %address, "SSH port reachable");
            return Ok(());
        }

        if Instant::now() >= deadline {
            return Err(LifecycleError::Timeout {
                what: "ssh reachability",
                elapsed: poll.reachability_timeout,
            });
        }
        sleep_or_cancel(poll.reachability_interval, cancel).await?;
    }
}

/// Poll until the server reports powered off, up to the bound.
///
/// Best-effort destroy-path helper: errors and exhaustion are logged
/// and swallowed, deletion proceeds regardless of the outcome.
pub async fn wait_for_powered_off(
    provider: &dyn Provider,
    server_id: &str,
    poll: &PollConfig,
    cancel: &mut watch::Receiver<bool>,
) {
    for _ in 0..poll.poweroff_attempts {
        match provider.get(server_id).await {
            Ok(server) if server.status == "stopped" || server.status == "off" => {
                debug!(server_id = %server_id, "Server powered off");
                return;
            }
            Ok(server) => {
                debug!(server_id = %server_id, status = %server.status, "Waiting for poweroff");
            }
            Err(e) => {
                warn!(server_id = %server_id, error = %e, "Poweroff poll failed, proceeding");
                return;
            }
        }

        if sleep_or_cancel(poll.poweroff_interval, cancel).await.is_err() {
            return;
        }
    }
    warn!(server_id = %server_id, "Server did not report powered off in time, deleting anyway");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use bnode_cloud::{default_specs, MockProvider, ProviderKind};

    use crate::remote::{ExecOutput, RemoteError};

    struct NeverReachable;

    #[async_trait]
    impl RemoteExecutor for NeverReachable {
        async fn run(
            &self,
            _address: Ipv4Addr,
            _user: &str,
            _command: &str,
            _timeout: Duration,
        ) -> Result<ExecOutput, RemoteError> {
            unreachable!("reachability tests never run commands")
        }

        async fn probe(&self, _address: Ipv4Addr, _port: u16, _timeout: Duration) -> bool {
            false
        }
    }

    struct ReachableAfter {
        probes: AtomicU32,
        threshold: u32,
    }

    #[async_trait]
    impl RemoteExecutor for ReachableAfter {
        async fn run(
            &self,
            _address: Ipv4Addr,
            _user: &str,
            _command: &str,
            _timeout: Duration,
        ) -> Result<ExecOutput, RemoteError> {
            unreachable!()
        }

        async fn probe(&self, _address: Ipv4Addr, _port: u16, _timeout: Duration) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst) + 1 >= self.threshold
        }
    }

    fn cancel_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    async fn create_node(provider: &MockProvider, name: &str) {
        let spec = default_specs().remove(&ProviderKind::Hetzner).unwrap();
        provider.create(&spec, name).await.unwrap();
    }

    #[tokio::test]
    async fn test_address_found_after_delay() {
        let provider = MockProvider::new().with_address_after_calls(3);
        create_node(&provider, "b1").await;

        let (_tx, mut rx) = cancel_channel();
        let address = wait_for_address(&provider, "b1", &PollConfig::fast(), &mut rx)
            .await
            .unwrap();
        assert_eq!(address, "203.0.113.10".parse::<Ipv4Addr>().unwrap());
    }

    #[tokio::test]
    async fn test_address_poll_terminates_at_bound() {
        let provider = MockProvider::new().never_assigns_address();
        create_node(&provider, "b2").await;

        let (_tx, mut rx) = cancel_channel();
        let err = wait_for_address(&provider, "b2", &PollConfig::fast(), &mut rx)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Timeout { what: "address assignment", .. }));
    }

    #[tokio::test]
    async fn test_address_poll_cancellable() {
        let provider = MockProvider::new().never_assigns_address();
        create_node(&provider, "b1").await;

        let mut poll = PollConfig::fast();
        poll.address_settle = Duration::from_secs(60);

        let (tx, mut rx) = cancel_channel();
        let wait = tokio::spawn(async move {
            let provider = provider;
            wait_for_address(&provider, "b1", &poll, &mut rx).await
        });

        tx.send(true).unwrap();
        let err = wait.await.unwrap().unwrap_err();
        assert!(matches!(err, LifecycleError::Cancelled));
    }

    #[tokio::test]
    async fn test_reachability_succeeds_after_retries() {
        let remote = ReachableAfter {
            probes: AtomicU32::new(0),
            threshold: 3,
        };
        let (_tx, mut rx) = cancel_channel();
        wait_for_reachable(
            &remote,
            "203.0.113.1".parse().unwrap(),
            &PollConfig::fast(),
            &mut rx,
        )
        .await
        .unwrap();
        assert_eq!(remote.probes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_reachability_times_out() {
        let (_tx, mut rx) = cancel_channel();
        let err = wait_for_reachable(
            &NeverReachable,
            "203.0.113.1".parse().unwrap(),
            &PollConfig::fast(),
            &mut rx,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LifecycleError::Timeout { what: "ssh reachability", .. }));
    }

    #[tokio::test]
    async fn test_powered_off_returns_when_stopped() {
        let provider = MockProvider::new();
        create_node(&provider, "b1").await;
        let id = provider.list().await.unwrap()[0].id.clone();
        provider
            .set_power(&id, bnode_cloud::PowerState::Off)
            .await
            .unwrap();

        let (_tx, mut rx) = cancel_channel();
        // Must return promptly, not exhaust the bound.
        wait_for_powered_off(&provider, &id, &PollConfig::fast(), &mut rx).await;
    }
}
