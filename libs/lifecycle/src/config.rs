//! Configuration for the lifecycle orchestrator.
//!
//! One explicit `Config` is built from the environment at process
//! start and passed by reference into every component; no component
//! reads the environment on its own.

use std::collections::HashMap;
use std::time::Duration;

use bnode_cloud::{default_specs, ProviderKind, ProviderSpec, ScalewayCredentials};

use crate::error::LifecycleError;

/// Polling bounds for the readiness poller and the destroy path.
///
/// Plain fixed-interval polling, no backoff; the expected waits are
/// short and bounded.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Wait before the first address poll, giving the vendor time to
    /// register the server.
    pub address_settle: Duration,

    /// Interval between address polls.
    pub address_interval: Duration,

    /// Maximum address polls before giving up.
    pub address_attempts: u32,

    /// Interval between SSH reachability probes.
    pub reachability_interval: Duration,

    /// Wall-clock bound for SSH reachability.
    pub reachability_timeout: Duration,

    /// Extra wait after SSH answers, letting the system settle before
    /// bootstrap.
    pub post_reachable_settle: Duration,

    /// Interval between powered-off polls during destroy.
    pub poweroff_interval: Duration,

    /// Maximum powered-off polls (best-effort; delete proceeds anyway).
    pub poweroff_attempts: u32,

    /// Wait for volumes to detach before deleting them.
    pub volume_settle: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            address_settle: Duration::from_secs(15),
            address_interval: Duration::from_secs(5),
            address_attempts: 12,
            reachability_interval: Duration::from_secs(5),
            reachability_timeout: Duration::from_secs(120),
            post_reachable_settle: Duration::from_secs(5),
            poweroff_interval: Duration::from_secs(1),
            poweroff_attempts: 30,
            volume_settle: Duration::from_secs(5),
        }
    }
}

impl PollConfig {
    /// Millisecond-scale bounds for tests.
    pub fn fast() -> Self {
        Self {
            address_settle: Duration::from_millis(1),
            address_interval: Duration::from_millis(5),
            address_attempts: 5,
            reachability_interval: Duration::from_millis(5),
            reachability_timeout: Duration::from_millis(50),
            post_reachable_settle: Duration::from_millis(1),
            poweroff_interval: Duration::from_millis(1),
            poweroff_attempts: 3,
            volume_settle: Duration::from_millis(1),
        }
    }
}

/// SSH invocation settings for the remote executor.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Connect timeout passed to ssh itself.
    pub connect_timeout: Duration,

    /// Per-command execution timeout.
    pub command_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(300),
        }
    }
}

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// DNS zone the nodes live under; hostnames are `{name}.{domain}`.
    pub domain: String,

    /// Operating-system user created on each node.
    pub admin_user: String,

    /// URL serving the authorized public keys for the admin user.
    pub keys_url: String,

    /// Git URL of the backup-service repository cloned onto each node.
    pub backup_repo_url: String,

    /// Token written into each node's credential file.
    pub github_token: Option<String>,

    /// Webhook for lifecycle and heartbeat notifications.
    pub discord_webhook: Option<String>,

    pub cloudflare_token: Option<String>,
    pub cloudflare_zone_id: Option<String>,

    pub hetzner_token: Option<String>,
    pub scaleway: ScalewayCredentials,

    /// One immutable spec per provider.
    pub specs: HashMap<ProviderKind, ProviderSpec>,

    pub poll: PollConfig,
    pub ssh: SshConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, LifecycleError> {
        let domain = std::env::var("BNODE_DOMAIN").unwrap_or_else(|_| "example.com".to_string());
        let admin_user = std::env::var("BNODE_ADMIN_USER").unwrap_or_else(|_| "backup".to_string());

        let keys_url = std::env::var("BNODE_KEYS_URL")
            .unwrap_or_else(|_| format!("https://github.com/{admin_user}.keys"));
        let backup_repo_url = std::env::var("BNODE_BACKUP_REPO")
            .unwrap_or_else(|_| format!("https://github.com/{admin_user}/gitbackup.git"));

        Ok(Self {
            domain,
            admin_user,
            keys_url,
            backup_repo_url,
            github_token: std::env::var("GITHUB_TOKEN").ok(),
            discord_webhook: std::env::var("DISCORD_BACKUP_WEBHOOK").ok(),
            cloudflare_token: std::env::var("CLOUDFLARE_API_TOKEN").ok(),
            cloudflare_zone_id: std::env::var("BNODE_CLOUDFLARE_ZONE_ID").ok(),
            hetzner_token: std::env::var("HETZNER_API_TOKEN").ok(),
            scaleway: ScalewayCredentials {
                secret_key: std::env::var("SCALEWAY_SECRET_KEY").ok(),
                project_id: std::env::var("SCALEWAY_PROJECT_ID").ok(),
            },
            specs: default_specs(),
            poll: PollConfig::default(),
            ssh: SshConfig::default(),
        })
    }

    /// Minimal configuration for tests: no credentials, fast polls.
    pub fn for_tests() -> Self {
        Self {
            domain: "example.com".to_string(),
            admin_user: "backup".to_string(),
            keys_url: "https://github.com/backup.keys".to_string(),
            backup_repo_url: "https://github.com/backup/gitbackup.git".to_string(),
            github_token: None,
            discord_webhook: None,
            cloudflare_token: None,
            cloudflare_zone_id: None,
            hetzner_token: None,
            scaleway: ScalewayCredentials::default(),
            specs: default_specs(),
            poll: PollConfig::fast(),
            ssh: SshConfig::default(),
        }
    }

    /// The spec for a provider, or a config error naming it.
    pub fn spec_for(&self, kind: ProviderKind) -> Result<&ProviderSpec, LifecycleError> {
        self.specs
            .get(&kind)
            .ok_or_else(|| LifecycleError::Config(format!("no spec configured for {kind}")))
    }
}
