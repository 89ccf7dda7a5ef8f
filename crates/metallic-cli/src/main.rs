//! Metallic CLI
//!
//! Manage computers and templates, and run commands or code inside a computer.

use clap::{Parser, Subcommand};
use tracing::info;

use metallic::{ClientOptions, Metallic};
use metallic_cli::code_cmd::{self, CodeArgs};
use metallic_cli::computer_cmd::{self, ComputerAction};
use metallic_cli::exec_cmd::{self, ExecArgs};
use metallic_cli::template_cmd::{self, TemplateAction};

#[derive(Parser, Debug)]
#[command(name = "metallic")]
#[command(version, about = "Metallic remote computers CLI", long_about = None)]
struct Cli {
    /// API key
    #[arg(long, env = "METALLIC_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Control-plane base URL
    #[arg(long, env = "METALLIC_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage computers
    Computers {
        #[command(subcommand)]
        action: ComputerAction,
    },
    /// Manage templates
    Templates {
        #[command(subcommand)]
        action: TemplateAction,
    },
    /// Run a shell command on a computer
    Exec(ExecArgs),
    /// Execute code in a computer's code interpreter
    Code(CodeArgs),
}

impl Cli {
    fn client_options(&self) -> ClientOptions {
        let mut opts = ClientOptions::new();
        if let Some(key) = &self.api_key {
            opts = opts.api_key(key.clone());
        }
        if let Some(url) = &self.base_url {
            opts = opts.base_url(url.clone());
        }
        opts
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    metallic_core::tracing_init::init_tracing("metallic=warn", cli.log_json);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting metallic CLI");

    let client = Metallic::new(cli.client_options())?;

    let exit_code = match cli.command {
        Command::Computers { action } => computer_cmd::run(&client, action).await.map(|()| 0)?,
        Command::Templates { action } => template_cmd::run(&client, action).await.map(|()| 0)?,
        Command::Exec(args) => exec_cmd::run(&client, args).await?,
        Command::Code(args) => code_cmd::run(&client, args).await?,
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
