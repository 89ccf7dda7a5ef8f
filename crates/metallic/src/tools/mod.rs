//! Data-plane tools bound to one computer.

pub mod agent;
pub mod browser;
pub mod code_interpreter;
pub mod filesystem;
pub mod process;
pub mod terminal;
pub mod watch;

pub use agent::{Agent, Metrics};
pub use browser::{Browser, BrowserLaunchOptions, BrowserSession, Cookie, SessionContext};
pub use code_interpreter::{
    CodeInterpreter, CreateContextOptions, ExecutionContext, ExecutionListener, OutputMessage,
    RunCodeOptions,
};
pub use filesystem::{ChunkStream, FileContent, FileStats, FileWriter, Filesystem, ReadFormat};
pub use process::{
    CommandResult, EventStream, NoopListener, ProcessControl, ProcessHandle, ProcessListener,
};
pub use terminal::{ProcessInfo, RunOptions, Terminal};
pub use watch::{WatchEvent, WatchEventKind, WatchHandle, WatchListener, WatchOptions};

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
#[path = "service_tests.rs"]
mod service_tests;
