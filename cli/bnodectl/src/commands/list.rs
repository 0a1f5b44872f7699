//! List command: show servers across providers.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use bnode_cloud::{ProviderKind, ServerRecord};

use crate::output::{print_output, print_warning};

use super::CommandContext;

/// List command.
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Only list servers on this provider.
    #[arg(long)]
    provider: Option<ProviderKind>,
}

/// One row of the listing.
#[derive(Debug, Serialize, Tabled)]
struct ServerRow {
    #[tabled(rename = "Name")]
    name: String,

    #[tabled(rename = "Provider")]
    provider: String,

    #[tabled(rename = "IP", display = "display_option")]
    address: Option<String>,

    #[tabled(rename = "Status")]
    status: String,

    #[tabled(rename = "Type")]
    server_type: String,
}

fn display_option(opt: &Option<String>) -> String {
    opt.as_deref().unwrap_or("-").to_string()
}

impl ServerRow {
    fn from_record(kind: ProviderKind, record: ServerRecord) -> Self {
        Self {
            name: record.name,
            provider: kind.to_string(),
            address: record.address.map(|a| a.to_string()),
            status: record.status,
            server_type: record.server_type,
        }
    }
}

impl ListCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let providers = ctx.providers();

        let mut rows = Vec::new();
        for (kind, provider) in &providers {
            if self.provider.is_some_and(|wanted| wanted != *kind) {
                continue;
            }
            // A vendor without credentials should not hide the others.
            match provider.list().await {
                Ok(servers) => {
                    rows.extend(
                        servers
                            .into_iter()
                            .map(|record| ServerRow::from_record(*kind, record)),
                    );
                }
                Err(e) => print_warning(&format!("Could not list {kind}: {e}")),
            }
        }
        rows.sort_by(|a, b| a.name.cmp(&b.name));

        print_output(&rows, ctx.format);
        Ok(())
    }
}
