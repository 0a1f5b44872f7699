//! Remote command execution over SSH.
//!
//! The executor runs one self-contained command per call as a given
//! user, and probes TCP reachability for the readiness poller. Both
//! readiness probing and bootstrap go through this interface so tests
//! can script the remote side.

use std::net::{Ipv4Addr, SocketAddr};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Result of one remote command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Remote execution errors.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to invoke ssh: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("remote command timed out after {0:?}")]
    Timeout(Duration),
}

/// Command execution and reachability probing against one host.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a command on the host as `user`, bounded by `timeout`.
    async fn run(
        &self,
        address: Ipv4Addr,
        user: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, RemoteError>;

    /// Single TCP connect probe, bounded by `timeout`.
    async fn probe(&self, address: Ipv4Addr, port: u16, timeout: Duration) -> bool;
}

/// Executor shelling out to the system ssh binary.
pub struct SshExecutor {
    connect_timeout: Duration,
}

impl SshExecutor {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(
        &self,
        address: Ipv4Addr,
        user: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, RemoteError> {
        debug!(address = %address, user = %user, "Running remote command");

        let child = tokio::process::Command::new("ssh")
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.connect_timeout.as_secs().max(1)
            ))
            .arg(format!("{user}@{address}"))
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| RemoteError::Timeout(timeout))??;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn probe(&self, address: Ipv4Addr, port: u16, timeout: Duration) -> bool {
        let addr = SocketAddr::from((address, port));
        matches!(
            tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_refused_port_is_false() {
        let executor = SshExecutor::new(Duration::from_secs(1));
        // TEST-NET-1 is unroutable; the connect attempt has to fail
        // within the probe timeout.
        let reachable = executor
            .probe("192.0.2.1".parse().unwrap(), 22, Duration::from_millis(100))
            .await;
        assert!(!reachable);
    }

    #[tokio::test]
    async fn test_probe_open_port_is_true() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let executor = SshExecutor::new(Duration::from_secs(1));
        let reachable = executor
            .probe("127.0.0.1".parse().unwrap(), port, Duration::from_secs(1))
            .await;
        assert!(reachable);
    }
}
