//! Line-oriented parser for planner output.
//!
//! The accepted shape is:
//!
//! ```text
//! BEGIN
//! QUERY(get_issue(PROJ-1))
//! TASK(add_comment(PROJ-1, "looks good"))
//! END
//! ```
//!
//! Anything else fails the whole batch.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ParseError;
use crate::event::{CommandType, ParsedEvent};

const BEGIN: &str = "BEGIN";
const END: &str = "END";

/// `TYPE(inner)`.
static COMMAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]\w*)\((.*)\)$").expect("command pattern is valid"));

/// `tool(args)`.
static CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][\w.\-]*)\s*\((.*)\)$").expect("call pattern is valid")
});

/// Parse planner output into events, one per non-blank line between the
/// first `BEGIN` and the first `END`.
///
/// Line numbers are 1-based positions in `text`.
pub fn parse(text: &str) -> Result<Vec<ParsedEvent>, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::whole("planner output is empty"));
    }

    let lines: Vec<&str> = text.lines().collect();
    let begin =
        find_marker(&lines, BEGIN).ok_or_else(|| ParseError::whole("missing BEGIN marker"))?;
    let end = find_marker(&lines, END).ok_or_else(|| ParseError::whole("missing END marker"))?;
    if begin >= end {
        return Err(ParseError::at(end + 1, "END marker appears before BEGIN"));
    }

    lines[begin + 1..end]
        .iter()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(offset, line)| parse_line(line, begin + offset + 2))
        .collect()
}

fn find_marker(lines: &[&str], marker: &str) -> Option<usize> {
    lines.iter().position(|line| line.trim() == marker)
}

fn parse_line(raw: &str, line_number: usize) -> Result<ParsedEvent, ParseError> {
    let line = raw.trim();
    let command = COMMAND_RE.captures(line).ok_or_else(|| {
        ParseError::at(line_number, format!("expected COMMANDTYPE(tool(args)), got '{line}'"))
    })?;

    let command_type: CommandType = command[1]
        .parse()
        .map_err(|reason: String| ParseError::at(line_number, reason))?;

    let inner = command[2].trim();
    let call = CALL_RE.captures(inner).ok_or_else(|| {
        ParseError::at(
            line_number,
            format!("expected tool(args) inside {command_type}, got '{inner}'"),
        )
    })?;
    let tool_args = split_args(&call[2]).map_err(|reason| ParseError::at(line_number, reason))?;

    Ok(ParsedEvent {
        command_type,
        tool_name: call[1].to_string(),
        tool_args,
        raw_line: line.to_string(),
        line_number,
        result: None,
    })
}

/// Split on commas that are outside brackets and double quotes.
///
/// Arguments are trimmed but otherwise kept verbatim, quotes included.
fn split_args(args: &str) -> Result<Vec<String>, String> {
    if args.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_quotes = false;

    for ch in args.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '(' | '[' | '{' if !in_quotes => depth += 1,
            ')' | ']' | '}' if !in_quotes => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| format!("unbalanced '{ch}' in arguments"))?;
            }
            ',' if !in_quotes && depth == 0 => {
                out.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }

    if in_quotes {
        return Err("unterminated quote in arguments".into());
    }
    if depth > 0 {
        return Err("unclosed bracket in arguments".into());
    }
    out.push(current.trim().to_string());
    Ok(out)
}
