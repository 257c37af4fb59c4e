//! Output formatting and error reporting

use std::io::Write;

use hitl_client::ApprovalError;
use hitl_common::{ConfigError, FunctionCall};
use serde::Serialize;

/// Exit code for invalid input or configuration
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_FAILURE: i32 = 1;

/// Write `value` as pretty JSON followed by a newline
pub fn print_json<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Write `value` as a single JSON line, for streams
pub fn print_json_line<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> anyhow::Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// One-paragraph summary of a call for interactive review
pub fn summarize_call(call: &FunctionCall) -> String {
    let kwargs = serde_json::to_string_pretty(&call.spec.kwargs).unwrap_or_default();
    let channel = call
        .spec
        .channel
        .as_ref()
        .map(|c| c.describe())
        .unwrap_or_else(|| "no channel".to_string());
    format!(
        "{} [{}] {}({})\n  via {}",
        call.call_id,
        call.state(),
        call.spec.fn_name,
        kwargs,
        channel
    )
}

/// `<kind>: <message>` plus the exit code for an error that ended the program
pub fn describe_error(err: &anyhow::Error) -> (String, i32) {
    for cause in err.chain() {
        if let Some(approval) = cause.downcast_ref::<ApprovalError>() {
            let code = if approval.is_usage_error() {
                EXIT_USAGE
            } else {
                EXIT_FAILURE
            };
            return (format!("{}: {:#}", approval.kind(), err), code);
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return (format!("ConfigError: {:#}", err), EXIT_USAGE);
        }
    }
    (format!("Error: {:#}", err), EXIT_FAILURE)
}
