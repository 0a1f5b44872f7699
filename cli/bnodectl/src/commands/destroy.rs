//! Destroy command: retire a node and reclaim everything it billed for.

use anyhow::Result;
use clap::Args;

use bnode_cloud::ProviderKind;

use crate::output::{print_single, print_success, print_warning, OutputFormat};

use super::CommandContext;

/// Destroy command.
#[derive(Debug, Args)]
pub struct DestroyCommand {
    /// Node name (e.g. "b1").
    name: String,

    /// Cloud provider the node lives on.
    #[arg(long, default_value = "scaleway")]
    provider: ProviderKind,

    /// Skip the confirmation prompt.
    #[arg(long)]
    yes: bool,
}

impl DestroyCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        if !self.yes && !confirm(&self.name)? {
            println!("Aborted.");
            return Ok(());
        }

        let orchestrator = ctx.orchestrator();
        let report = orchestrator.destroy(&self.name, self.provider).await?;

        match ctx.format {
            OutputFormat::Table => {
                if report.fully_succeeded() {
                    print_success(&format!("Node '{}' destroyed", report.node));
                } else {
                    if report.lookup_failed {
                        print_warning("Could not query the provider; the VM state is unknown");
                    }
                    if !report.server_deleted && report.server_found {
                        print_warning("Server deletion failed; the VM may still be billing");
                    }
                    for volume in &report.volumes_failed {
                        print_warning(&format!("Volume {volume} could not be deleted"));
                    }
                    if !report.dns_deleted {
                        print_warning("DNS record was not removed");
                    }
                }
            }
            OutputFormat::Json => print_single(&report, ctx.format),
        }

        if report.fully_succeeded() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "destroy of '{}' completed with failures; re-run to retry the remaining cleanup",
                report.node
            ))
        }
    }
}

fn confirm(name: &str) -> Result<bool> {
    use std::io::Write;

    print!("Destroy node '{name}' and delete its volumes and DNS record? [y/N] ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
