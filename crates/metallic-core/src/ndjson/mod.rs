//! NDJSON handling for the code-interpreter execution stream.
//!
//! The interpreter answers an execute request with newline-delimited JSON
//! events. [`LineBuffer`] reassembles lines from body chunks and
//! [`parse_line`] turns each line into an [`ExecutionEvent`].

mod lines;
mod parser;
mod types;

pub use lines::LineBuffer;
pub use parser::{parse_line, parse_value};
pub use types::*;
