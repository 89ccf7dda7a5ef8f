//! CLI computer subcommands.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::collections::HashMap;
use std::io::{self, Write};

use clap::Subcommand;

use metallic::{
    ComputerRecord, ComputerState, CreateComputerOptions, ListOptions, Metallic, Page, SortOrder,
};

use crate::{parse_key_val, write_json};

/// Computer subcommand actions.
#[derive(Subcommand, Debug)]
pub enum ComputerAction {
    /// List computers
    List {
        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<u32>,
        /// Sort order: asc or desc
        #[arg(long)]
        order: Option<String>,
        /// Cursor: return items after this ID
        #[arg(long)]
        after: Option<String>,
        /// Cursor: return items before this ID
        #[arg(long)]
        before: Option<String>,
    },
    /// Show a computer as JSON
    Get {
        /// Computer ID
        id: String,
    },
    /// Create a computer
    Create {
        /// Template slug (server default if omitted)
        #[arg(short, long)]
        template: Option<String>,
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        instance: Option<String>,
        /// Stop after this many idle milliseconds
        #[arg(long)]
        inactivity_timeout_ms: Option<u64>,
        /// Metadata entry, repeatable
        #[arg(short, long = "metadata", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        metadata: Vec<(String, String)>,
        /// Create without booting
        #[arg(long)]
        skip_launch: bool,
    },
    /// Start a stopped computer
    Start { id: String },
    /// Stop a running computer
    Stop { id: String },
    /// Destroy a computer
    Destroy { id: String },
    /// Block until a computer reaches a state
    Wait {
        /// Computer ID
        id: String,
        /// Target state, e.g. started or stopped
        #[arg(short, long, default_value = "started")]
        state: ComputerState,
    },
}

pub fn parse_order(s: &str) -> Result<SortOrder, String> {
    match s {
        "asc" => Ok(SortOrder::Asc),
        "desc" => Ok(SortOrder::Desc),
        other => Err(format!("Invalid order '{other}'. Use: asc, desc")),
    }
}

/// Execute a computer subcommand.
pub async fn run(client: &Metallic, action: ComputerAction) -> anyhow::Result<()> {
    let mut out = io::stdout();
    match action {
        ComputerAction::List {
            limit,
            order,
            after,
            before,
        } => {
            let order = order
                .as_deref()
                .map(parse_order)
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;
            let page = client
                .computers
                .list(&ListOptions {
                    limit,
                    order,
                    after,
                    before,
                })
                .await?;
            write_table(&mut out, &page)?;
        }
        ComputerAction::Get { id } => {
            let computer = client.computers.get(&id).await?;
            write_json(&mut out, computer.record())?;
        }
        ComputerAction::Create {
            template,
            region,
            instance,
            inactivity_timeout_ms,
            metadata,
            skip_launch,
        } => {
            let opts = CreateComputerOptions {
                template,
                region,
                instance,
                inactivity_timeout_ms,
                metadata: (!metadata.is_empty())
                    .then(|| metadata.into_iter().collect::<HashMap<_, _>>()),
                skip_launch: skip_launch.then_some(true),
            };
            let computer = client.computers.create(&opts).await?;
            write_json(&mut out, computer.record())?;
        }
        ComputerAction::Start { id } => {
            let computer = client.computers.start(&id).await?;
            writeln!(out, "{} {}", computer.id(), computer.state())?;
        }
        ComputerAction::Stop { id } => {
            let computer = client.computers.stop(&id).await?;
            writeln!(out, "{} {}", computer.id(), computer.state())?;
        }
        ComputerAction::Destroy { id } => {
            let resp = client.computers.destroy(&id).await?;
            if resp.destroyed {
                writeln!(out, "Computer {id} destroyed.")?;
            } else {
                writeln!(out, "Computer {id} was not destroyed.")?;
            }
        }
        ComputerAction::Wait { id, state } => {
            let computer = client.computers.wait_for_state(&id, state).await?;
            writeln!(out, "{} {}", computer.id(), computer.state())?;
        }
    }
    Ok(())
}

fn write_table(out: &mut impl Write, page: &Page<ComputerRecord>) -> io::Result<()> {
    if page.data.is_empty() {
        return writeln!(out, "No computers found.");
    }
    writeln!(
        out,
        "{:<24}  {:<28}  {:<10}  {:<10}",
        "ID", "TEMPLATE", "STATE", "REGION"
    )?;
    for c in &page.data {
        writeln!(
            out,
            "{:<24}  {:<28}  {:<10}  {:<10}",
            c.id,
            c.template.slug(),
            c.state.as_str(),
            c.region.as_deref().unwrap_or("-"),
        )?;
    }
    if let (true, Some(last)) = (page.has_more, &page.last) {
        writeln!(out, "\nMore results: --after {last}")?;
    }
    Ok(())
}
