//! Interactive review of pending function calls

use std::io::Write;

use hitl_client::{ApprovalClient, ApprovalError};
use hitl_common::FunctionCall;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::display::summarize_call;

const HELP: &str = "  y [comment]   approve\n  n <reason>    deny\n  s             skip\n  q             quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewAction {
    Approve(Option<String>),
    Deny(String),
    Skip,
    Quit,
    Help,
    Invalid(String),
}

pub fn parse_review_input(line: &str) -> ReviewAction {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let rest = (!rest.is_empty()).then(|| rest.to_string());

    match word.to_lowercase().as_str() {
        "y" | "yes" | "approve" => ReviewAction::Approve(rest),
        "n" | "no" | "deny" => match rest {
            Some(reason) => ReviewAction::Deny(reason),
            None => ReviewAction::Invalid("a reason is required to deny, e.g. `n too risky`".to_string()),
        },
        "s" | "skip" => ReviewAction::Skip,
        "q" | "quit" | "exit" => ReviewAction::Quit,
        "" | "?" | "h" | "help" => ReviewAction::Help,
        other => ReviewAction::Invalid(format!("unknown answer '{}'", other)),
    }
}

pub async fn run<W: Write>(client: &ApprovalClient, out: &mut W) -> anyhow::Result<()> {
    let pending = client.pending_function_calls().await?;
    if pending.is_empty() {
        writeln!(out, "no pending function calls")?;
        return Ok(());
    }

    let mut rl = DefaultEditor::new()?;
    writeln!(out, "{} pending function call(s)\n{}", pending.len(), HELP)?;

    'calls: for call in &pending {
        writeln!(out, "\n{}", summarize_call(call))?;
        loop {
            let line = match rl.readline("review> ") {
                Ok(line) => line,
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => break 'calls,
                Err(e) => return Err(e.into()),
            };
            let _ = rl.add_history_entry(line.as_str());

            match parse_review_input(&line) {
                ReviewAction::Approve(comment) => {
                    let result = client.approve_function_call(&call.call_id, comment).await;
                    report(out, call, "approved", result)?;
                    break;
                }
                ReviewAction::Deny(reason) => {
                    let result = client.deny_function_call(&call.call_id, reason).await;
                    report(out, call, "denied", result)?;
                    break;
                }
                ReviewAction::Skip => break,
                ReviewAction::Quit => break 'calls,
                ReviewAction::Help => writeln!(out, "{}", HELP)?,
                ReviewAction::Invalid(message) => writeln!(out, "{}", message)?,
            }
        }
    }

    Ok(())
}

/// A call decided by someone else meanwhile is reported, not fatal
fn report<W: Write>(
    out: &mut W,
    call: &FunctionCall,
    verb: &str,
    result: hitl_client::Result<FunctionCall>,
) -> anyhow::Result<()> {
    match result {
        Ok(_) => writeln!(out, "{} {}", verb, call.call_id)?,
        Err(ApprovalError::Conflict { .. }) => {
            writeln!(out, "{} was already decided, skipping", call.call_id)?
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_review_input() {
        assert_eq!(parse_review_input("y"), ReviewAction::Approve(None));
        assert_eq!(
            parse_review_input("yes  ship it "),
            ReviewAction::Approve(Some("ship it".to_string()))
        );
        assert_eq!(
            parse_review_input("n too risky"),
            ReviewAction::Deny("too risky".to_string())
        );
        assert!(matches!(parse_review_input("n"), ReviewAction::Invalid(_)));
        assert_eq!(parse_review_input("S"), ReviewAction::Skip);
        assert_eq!(parse_review_input("quit"), ReviewAction::Quit);
        assert_eq!(parse_review_input(""), ReviewAction::Help);
        assert!(matches!(parse_review_input("maybe"), ReviewAction::Invalid(_)));
    }
}
