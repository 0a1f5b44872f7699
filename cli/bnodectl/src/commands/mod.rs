//! CLI commands.

mod destroy;
mod list;
mod snapshot;
mod spawn;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::warn;

use bnode_cloud::{HetznerProvider, Provider, ProviderKind, ScalewayProvider};
use bnode_lifecycle::{
    CloudflareDns, Config, DiscordNotifier, DnsSync, Notifier, Orchestrator, RemoteExecutor,
    SshExecutor,
};

use crate::output::OutputFormat;

/// Backup-node fleet CLI - provision, inspect, and retire nodes.
#[derive(Debug, Parser)]
#[command(name = "bnode")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Provision a new backup node end to end.
    Spawn(spawn::SpawnCommand),

    /// Destroy a node and reclaim its VM, volumes, and DNS record.
    Destroy(destroy::DestroyCommand),

    /// List servers across providers.
    List(list::ListCommand),

    /// Snapshot a node's disks.
    Snapshot(snapshot::SnapshotCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let format = match self.format.as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Table,
        };

        let config = Config::from_env()?;
        let ctx = CommandContext { config, format };

        match self.command {
            Commands::Spawn(cmd) => cmd.run(ctx).await,
            Commands::Destroy(cmd) => cmd.run(ctx).await,
            Commands::List(cmd) => cmd.run(ctx).await,
            Commands::Snapshot(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("bnode {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub config: Config,
    pub format: OutputFormat,
}

impl CommandContext {
    /// Vendor adapters, one per provider the config knows a spec for.
    ///
    /// Adapters are built even without credentials; a call without the
    /// token fails with an auth error naming the missing variable.
    pub fn providers(&self) -> HashMap<ProviderKind, Arc<dyn Provider>> {
        let mut providers: HashMap<ProviderKind, Arc<dyn Provider>> = HashMap::new();

        if self.config.specs.contains_key(&ProviderKind::Hetzner) {
            providers.insert(
                ProviderKind::Hetzner,
                Arc::new(HetznerProvider::new(self.config.hetzner_token.clone())),
            );
        }
        if let Some(spec) = self.config.specs.get(&ProviderKind::Scaleway) {
            providers.insert(
                ProviderKind::Scaleway,
                Arc::new(ScalewayProvider::new(
                    self.config.scaleway.clone(),
                    &spec.zone,
                )),
            );
        }

        providers
    }

    /// Build the full orchestrator with real collaborators, wiring
    /// Ctrl+C to lifecycle cancellation.
    pub fn orchestrator(&self) -> Orchestrator {
        let dns: Arc<dyn DnsSync> = Arc::new(CloudflareDns::new(
            self.config.cloudflare_token.clone(),
            self.config.cloudflare_zone_id.clone(),
            &self.config.domain,
        ));
        let remote: Arc<dyn RemoteExecutor> =
            Arc::new(SshExecutor::new(self.config.ssh.connect_timeout));
        let notifier: Arc<dyn Notifier> =
            Arc::new(DiscordNotifier::new(self.config.discord_webhook.clone()));

        let (cancel_tx, cancel_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling at the next safe point");
                let _ = cancel_tx.send(true);
            }
        });

        Orchestrator::new(
            self.config.clone(),
            self.providers(),
            dns,
            remote,
            notifier,
            cancel_rx,
        )
    }
}
