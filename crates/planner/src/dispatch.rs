//! Sequential execution of parsed events.

use runtime::{Arguments, Schema, ToolLayer};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::event::{CommandType, ParsedEvent};

/// What dispatch needs from the tool layer.
pub trait Executor {
    fn schema(&self, tool: &str) -> runtime::Result<Schema>;

    fn execute(&self, tool: &str, args: Arguments) -> runtime::Result<Value>;
}

impl Executor for ToolLayer {
    fn schema(&self, tool: &str) -> runtime::Result<Schema> {
        ToolLayer::schema(self, tool)
    }

    fn execute(&self, tool: &str, args: Arguments) -> runtime::Result<Value> {
        ToolLayer::execute(self, tool, args)
    }
}

/// How a dispatch run ended, when no tool failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every event ran.
    Completed { executed: usize },
    /// An `ERROR` event at `line` stopped processing.
    Halted { line: usize, message: String },
}

/// Execute `events` in order, storing each result on its event.
///
/// Stops at the first `ERROR` event or the first failure. Results attached
/// to earlier events are kept either way.
pub fn dispatch<E>(executor: &E, events: &mut [ParsedEvent]) -> Result<Outcome>
where
    E: Executor + ?Sized,
{
    let mut executed = 0;
    for event in events.iter_mut() {
        match event.command_type {
            CommandType::Query | CommandType::Task => {
                let result = run_event(executor, event)?;
                event.result = Some(result);
                executed += 1;
            }
            CommandType::Error => {
                let message = format!("planner reported an error: {}", event.call_text());
                warn!(line = event.line_number, "{message}");
                return Ok(Outcome::Halted {
                    line: event.line_number,
                    message,
                });
            }
        }
    }
    info!(executed, "dispatch completed");
    Ok(Outcome::Completed { executed })
}

fn run_event<E>(executor: &E, event: &ParsedEvent) -> Result<Value>
where
    E: Executor + ?Sized,
{
    let tool_err = |source| Error::Tool {
        line: event.line_number,
        tool: event.tool_name.clone(),
        source,
    };

    let args = executor
        .schema(&event.tool_name)
        .and_then(|schema| schema.bind(&event.tool_name, &event.tool_args))
        .map_err(tool_err)?;
    debug!(line = event.line_number, tool = %event.tool_name, ?args, "dispatching");
    executor.execute(&event.tool_name, args).map_err(tool_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use serde_json::json;
    use std::cell::RefCell;

    /// Echoes bound arguments and records every call.
    #[derive(Default)]
    struct FakeExecutor {
        calls: RefCell<Vec<String>>,
    }

    impl Executor for FakeExecutor {
        fn schema(&self, tool: &str) -> runtime::Result<Schema> {
            match tool {
                "ping" => Ok(Schema::empty()),
                "get_issue" => Ok(Schema::empty().required("key").optional("fields")),
                "fail" => Ok(Schema::empty()),
                _ => Err(runtime::Error::UnknownTool(tool.to_string())),
            }
        }

        fn execute(&self, tool: &str, args: Arguments) -> runtime::Result<Value> {
            self.calls.borrow_mut().push(tool.to_string());
            if tool == "fail" {
                return Err(runtime::Error::Tool {
                    tool: tool.into(),
                    reason: "broken".into(),
                });
            }
            Ok(json!({ "tool": tool, "args": args }))
        }
    }

    #[test]
    fn runs_events_in_order_and_attaches_results() {
        let executor = FakeExecutor::default();
        let mut events =
            parse("BEGIN\nQUERY(ping())\nTASK(get_issue(PROJ-1, summary))\nEND").unwrap();
        let outcome = dispatch(&executor, &mut events).unwrap();

        assert_eq!(outcome, Outcome::Completed { executed: 2 });
        assert_eq!(*executor.calls.borrow(), ["ping", "get_issue"]);
        assert_eq!(
            events[1].result,
            Some(json!({"tool": "get_issue", "args": {"key": "PROJ-1", "fields": "summary"}}))
        );
    }

    #[test]
    fn error_event_halts_before_later_events() {
        let executor = FakeExecutor::default();
        let plan = "BEGIN\nQUERY(ping())\nERROR(cannot_plan(\"no project\"))\nQUERY(ping())\nEND";
        let mut events = parse(plan).unwrap();
        let outcome = dispatch(&executor, &mut events).unwrap();

        let Outcome::Halted { line, message } = outcome else {
            panic!("expected halt, got {outcome:?}");
        };
        assert_eq!(line, 3);
        assert!(message.contains("no project"));
        assert_eq!(executor.calls.borrow().len(), 1);
        assert!(events[0].result.is_some());
        assert!(events[2].result.is_none());
    }

    #[test]
    fn binding_failure_happens_before_execution() {
        let executor = FakeExecutor::default();
        let mut events = parse("BEGIN\nQUERY(ping())\nQUERY(get_issue())\nEND").unwrap();
        let err = dispatch(&executor, &mut events).unwrap_err();

        assert_eq!(err.line(), Some(3));
        assert!(matches!(
            err,
            Error::Tool { source: runtime::Error::Binding { .. }, .. }
        ));
        assert_eq!(*executor.calls.borrow(), ["ping"]);
        assert!(events[0].result.is_some());
    }

    #[test]
    fn unknown_tool_is_reported_with_its_line() {
        let executor = FakeExecutor::default();
        let mut events = parse("BEGIN\nQUERY(nope(1))\nEND").unwrap();
        let err = dispatch(&executor, &mut events).unwrap_err();
        assert!(matches!(
            &err,
            Error::Tool { line: 2, tool, source: runtime::Error::UnknownTool(_) } if tool == "nope"
        ));
        assert!(executor.calls.borrow().is_empty());
    }

    #[test]
    fn execution_failure_keeps_earlier_results() {
        let executor = FakeExecutor::default();
        let mut events = parse("BEGIN\nQUERY(ping())\nTASK(fail())\nQUERY(ping())\nEND").unwrap();
        let err = dispatch(&executor, &mut events).unwrap_err();
        assert_eq!(err.line(), Some(3));
        assert!(events[0].result.is_some());
        assert!(events[1].result.is_none());
        assert_eq!(executor.calls.borrow().len(), 2);
    }

    #[test]
    fn empty_plan_completes() {
        let executor = FakeExecutor::default();
        let mut events = Vec::new();
        assert_eq!(dispatch(&executor, &mut events).unwrap(), Outcome::Completed { executed: 0 });
    }
}
