//! Metallic CLI library: subcommand definitions and handlers.

pub mod code_cmd;
pub mod computer_cmd;
pub mod exec_cmd;
pub mod template_cmd;

use std::io::Write;

/// Write `value` to `out` as pretty-printed JSON followed by a newline.
pub fn write_json<T: serde::Serialize>(out: &mut impl Write, value: &T) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Parse a `KEY=VALUE` argument.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}
