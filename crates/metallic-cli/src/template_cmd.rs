//! CLI template subcommands.

use std::io::{self, Write};

use clap::Subcommand;

use metallic::{ListOptions, Metallic, Page, Template};

use crate::computer_cmd::parse_order;
use crate::write_json;

/// Template subcommand actions.
#[derive(Subcommand, Debug)]
pub enum TemplateAction {
    /// List templates
    List {
        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<u32>,
        /// Sort order: asc or desc
        #[arg(long)]
        order: Option<String>,
        #[arg(long)]
        after: Option<String>,
        #[arg(long)]
        before: Option<String>,
    },
    /// Show a template as JSON
    Get { slug: String },
    /// Destroy a template
    Destroy { slug: String },
}

/// Execute a template subcommand.
pub async fn run(client: &Metallic, action: TemplateAction) -> anyhow::Result<()> {
    let mut out = io::stdout();
    match action {
        TemplateAction::List {
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
                .templates
                .list(&ListOptions {
                    limit,
                    order,
                    after,
                    before,
                })
                .await?;
            write_table(&mut out, &page)?;
        }
        TemplateAction::Get { slug } => {
            let template = client.templates.get(&slug).await?;
            write_json(&mut out, &template)?;
        }
        TemplateAction::Destroy { slug } => {
            let resp = client.templates.destroy(&slug).await?;
            if resp.destroyed {
                writeln!(out, "Template {slug} destroyed.")?;
            } else {
                writeln!(out, "Template {slug} was not destroyed.")?;
            }
        }
    }
    Ok(())
}

fn write_table(out: &mut impl Write, page: &Page<Template>) -> io::Result<()> {
    if page.data.is_empty() {
        return writeln!(out, "No templates found.");
    }
    writeln!(out, "{:<28}  {:<28}  {:<6}", "SLUG", "BASE", "PUBLIC")?;
    for t in &page.data {
        writeln!(
            out,
            "{:<28}  {:<28}  {:<6}",
            t.slug,
            t.base_template.as_deref().unwrap_or("-"),
            if t.is_public { "yes" } else { "no" },
        )?;
    }
    if let (true, Some(last)) = (page.has_more, &page.last) {
        writeln!(out, "\nMore results: --after {last}")?;
    }
    Ok(())
}
