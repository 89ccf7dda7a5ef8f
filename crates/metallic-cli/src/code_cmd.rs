//! `metallic code`: execute code in a computer's code interpreter.

use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

use clap::Args;

use metallic::tools::{ExecutionListener, OutputMessage, RunCodeOptions};
use metallic::{Execution, ExecutionError, Metallic};

#[derive(Args, Debug)]
pub struct CodeArgs {
    /// Computer ID
    pub id: String,
    /// Source code to execute
    pub code: String,
    /// Kernel language (python if omitted)
    #[arg(short, long)]
    pub language: Option<String>,
    /// Execution deadline in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

/// Echoes stdout and stderr lines while the execution runs.
pub struct EchoListener<O, E> {
    stdout: Mutex<O>,
    stderr: Mutex<E>,
}

impl<O, E> EchoListener<O, E> {
    pub const fn new(stdout: O, stderr: E) -> Self {
        Self {
            stdout: Mutex::new(stdout),
            stderr: Mutex::new(stderr),
        }
    }
}

fn echo(out: &Mutex<impl Write>, line: &str) {
    if let Ok(mut out) = out.lock() {
        let _ = out.write_all(line.as_bytes());
        if !line.ends_with('\n') {
            let _ = out.write_all(b"\n");
        }
        let _ = out.flush();
    }
}

impl<O: Write + Send, E: Write + Send> ExecutionListener for EchoListener<O, E> {
    fn on_stdout(&self, output: &OutputMessage) {
        echo(&self.stdout, &output.line);
    }

    fn on_stderr(&self, output: &OutputMessage) {
        echo(&self.stderr, &output.line);
    }
}

/// Write the main result to `out` and any raised exception to `err`.
/// Returns the process exit code for the CLI.
pub fn report(execution: &Execution, out: &mut impl Write, err: &mut impl Write) -> io::Result<i32> {
    if let Some(text) = execution.text() {
        writeln!(out, "{text}")?;
    }
    match &execution.error {
        Some(ExecutionError {
            name,
            value,
            traceback,
        }) => {
            writeln!(err, "{name}: {value}")?;
            if !traceback.is_empty() {
                writeln!(err, "{traceback}")?;
            }
            Ok(1)
        }
        None => Ok(0),
    }
}

pub async fn run(client: &Metallic, args: CodeArgs) -> anyhow::Result<i32> {
    let computer = client.computers.get(&args.id).await?;
    let Some(interpreter) = computer.code() else {
        anyhow::bail!(
            "Computer {} ({}) has no code interpreter",
            computer.id(),
            computer.template_slug()
        );
    };

    let mut opts = RunCodeOptions::default();
    if let Some(language) = args.language {
        opts = opts.language(language);
    }
    if let Some(ms) = args.timeout_ms {
        opts = opts.timeout(Duration::from_millis(ms));
    }

    let listener = EchoListener::new(io::stdout(), io::stderr());
    let execution = interpreter.run_with(&args.code, opts, &listener).await?;
    Ok(report(&execution, &mut io::stdout(), &mut io::stderr())?)
}
