//! Parsed planner commands.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

/// How the planner classified a command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandType {
    Query,
    Task,
    /// The planner could not form a plan; dispatch stops here.
    Error,
}

impl CommandType {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandType::Query => "QUERY",
            CommandType::Task => "TASK",
            CommandType::Error => "ERROR",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandType {
    type Err = String;

    /// Case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "QUERY" => Ok(CommandType::Query),
            "TASK" => Ok(CommandType::Task),
            "ERROR" => Ok(CommandType::Error),
            _ => Err(format!("unknown command type '{s}'")),
        }
    }
}

/// One command extracted from planner output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedEvent {
    pub command_type: CommandType,
    pub tool_name: String,
    /// Arguments exactly as the planner wrote them, trimmed.
    pub tool_args: Vec<String>,
    pub raw_line: String,
    /// 1-based line in the planner output.
    pub line_number: usize,
    /// Filled in by dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ParsedEvent {
    /// The inner call, `tool(arg1,arg2)`.
    pub fn call_text(&self) -> String {
        format!("{}({})", self.tool_name, self.tool_args.join(","))
    }
}

impl fmt::Display for ParsedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.command_type, self.call_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_type_is_case_insensitive() {
        assert_eq!("query".parse(), Ok(CommandType::Query));
        assert_eq!("Task".parse(), Ok(CommandType::Task));
        assert_eq!("ERROR".parse(), Ok(CommandType::Error));
        assert!("UNKNOWNTYPE".parse::<CommandType>().is_err());
    }

    #[test]
    fn call_text_rebuilds_the_call() {
        let event = ParsedEvent {
            command_type: CommandType::Query,
            tool_name: "get_issue".into(),
            tool_args: vec!["PROJ-1".into(), "\"a b\"".into()],
            raw_line: "QUERY(get_issue(PROJ-1, \"a b\"))".into(),
            line_number: 2,
            result: None,
        };
        assert_eq!(event.call_text(), "get_issue(PROJ-1,\"a b\")");
        assert_eq!(event.to_string(), "QUERY(get_issue(PROJ-1,\"a b\"))");
    }
}
