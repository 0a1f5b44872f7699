//! Snapshot command: snapshot a node's disks in place.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use bnode_cloud::{find_by_name, ProviderKind};
use bnode_lifecycle::LifecycleError;

use crate::output::{print_single, print_success, OutputFormat};

use super::CommandContext;

/// Snapshot command.
#[derive(Debug, Args)]
pub struct SnapshotCommand {
    /// Node name (e.g. "b1").
    name: String,

    /// Cloud provider the node lives on.
    #[arg(long, default_value = "scaleway")]
    provider: ProviderKind,
}

#[derive(Debug, Serialize)]
struct SnapshotResult {
    node: String,
    provider: ProviderKind,
    snapshot_ids: Vec<String>,
}

impl SnapshotCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let providers = ctx.providers();
        let provider = providers.get(&self.provider).ok_or_else(|| {
            LifecycleError::Config(format!("provider {} not configured", self.provider))
        })?;

        let servers = provider.list().await?;
        let server = find_by_name(&servers, &self.name).ok_or_else(|| {
            anyhow::anyhow!("node '{}' not found on {}", self.name, self.provider)
        })?;

        let snapshot_ids = provider.snapshot(&server.id).await?;

        let result = SnapshotResult {
            node: self.name,
            provider: self.provider,
            snapshot_ids,
        };
        match ctx.format {
            OutputFormat::Table => {
                print_success(&format!(
                    "Snapshotted '{}': {}",
                    result.node,
                    result.snapshot_ids.join(", ")
                ));
            }
            OutputFormat::Json => print_single(&result, ctx.format),
        }
        Ok(())
    }
}
