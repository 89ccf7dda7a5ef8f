//! `metallic exec`: run a shell command on a computer and stream its output.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Args;
use tracing::debug;

use metallic::tools::{ProcessListener, RunOptions};
use metallic::{Metallic, ProcessError};

use crate::parse_key_val;

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Computer ID
    pub id: String,
    /// Command line, run with `bash -l -c`
    pub command: String,
    /// Working directory on the computer
    #[arg(long)]
    pub cwd: Option<String>,
    /// Kill the process after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Environment variable, repeatable
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,
}

impl ExecArgs {
    fn run_options(&self) -> RunOptions {
        let mut opts = RunOptions::new();
        if let Some(cwd) = &self.cwd {
            opts = opts.cwd(cwd.clone());
        }
        for (key, value) in &self.env {
            opts = opts.env(key.clone(), value.clone());
        }
        if let Some(ms) = self.timeout_ms {
            opts = opts.timeout(Duration::from_millis(ms));
        }
        opts
    }
}

/// Forwards process output to a writer as it arrives.
pub struct WriterListener<W> {
    out: Mutex<W>,
}

impl<W> WriterListener<W> {
    pub const fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl<W: Write + Send + 'static> ProcessListener for WriterListener<W> {
    fn on_data(&self, data: &str) {
        if let Ok(mut out) = self.out.lock() {
            let _ = out.write_all(data.as_bytes());
            let _ = out.flush();
        }
    }

    fn on_error(&self, error: &ProcessError) {
        debug!(%error, "Process stream error");
    }
}

/// Run the command and return its remote exit code.
pub async fn run(client: &Metallic, args: ExecArgs) -> anyhow::Result<i32> {
    let computer = client.computers.get(&args.id).await?;
    let opts = args.run_options();
    let listener = Arc::new(WriterListener::new(io::stdout()));
    let result = computer
        .terminal()
        .run_with(&args.command, opts, listener)
        .await?;
    debug!(exit_code = result.exit_code, "Command finished");
    Ok(result.exit_code)
}
