//! Spawn command: provision a backup node end to end.

use anyhow::Result;
use clap::Args;

use bnode_cloud::ProviderKind;

use crate::output::{print_info, print_single, print_success, OutputFormat};

use super::CommandContext;

/// Spawn command.
#[derive(Debug, Args)]
pub struct SpawnCommand {
    /// Node name (e.g. "b1"); also the DNS label under the fleet domain.
    name: String,

    /// Cloud provider to create the server on.
    #[arg(long, default_value = "scaleway")]
    provider: ProviderKind,
}

impl SpawnCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let orchestrator = ctx.orchestrator();

        let node = orchestrator.provision(&self.name, self.provider).await?;

        match ctx.format {
            OutputFormat::Table => {
                print_success(&format!(
                    "Node '{}' is ready at {}",
                    node.name,
                    node.public_address
                        .map(|a| a.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                ));
                print_info(&format!(
                    "SSH: ssh {}@{}",
                    ctx.config.admin_user, node.hostname
                ));
                print_info(&format!("Identity: http://{}/env", node.hostname));
            }
            OutputFormat::Json => print_single(&node, ctx.format),
        }
        Ok(())
    }
}
