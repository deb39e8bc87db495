//! Parsing and dispatching against a real tool layer.

use planner::{CommandType, Error, Outcome, dispatch, parse, render_result};
use runtime::{LayerConfig, Schema, ToolDescriptor, ToolLayer};
use serde_json::json;

#[test]
fn ping_plan_executes_the_builtin() {
    let layer = ToolLayer::new();
    layer.start(LayerConfig::default()).unwrap();

    let mut events = parse("BEGIN\nQUERY(ping())\nEND").unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].command_type, CommandType::Query);

    let outcome = dispatch(&layer, &mut events).unwrap();
    assert_eq!(outcome, Outcome::Completed { executed: 1 });
    assert_eq!(events[0].result, Some(json!({"ok": true, "reply": "pong"})));
    layer.shutdown();
}

#[test]
fn local_tools_receive_bound_arguments() {
    let layer = ToolLayer::new();
    layer
        .register_local(ToolDescriptor::local(
            "multiply",
            "Multiply two integers",
            Schema::empty().required("a").required("b"),
            |args| {
                let operand = |name: &str| {
                    args.get(name)
                        .and_then(|v| v.parse::<i64>().ok())
                        .ok_or_else(|| format!("'{name}' is not an integer"))
                };
                Ok(json!(operand("a")? * operand("b")?))
            },
        ))
        .unwrap();

    let mut events = parse("BEGIN\nQUERY(multiply(3, 4))\nTASK(multiply(x, 2))\nEND").unwrap();
    let err = dispatch(&layer, &mut events).unwrap_err();

    assert_eq!(render_result(events[0].result.as_ref().unwrap()), "12");
    assert_eq!(err.line(), Some(3));
    assert!(err.to_string().contains("'a' is not an integer"), "{err}");
}

#[test]
fn remote_tool_before_start_is_not_started() {
    let layer = ToolLayer::new();
    layer.directory().merge_remote(
        "jira",
        vec![runtime::tools::DiscoveredTool {
            name: "get_issue".into(),
            description: String::new(),
            schema: Schema::empty().required("key"),
        }],
    );

    let mut events = parse("BEGIN\nQUERY(get_issue(PROJ-1))\nEND").unwrap();
    let err = dispatch(&layer, &mut events).unwrap_err();
    assert!(matches!(err, Error::Tool { source: runtime::Error::NotStarted, .. }));
}

#[test]
fn parse_failure_surfaces_through_the_crate_error() {
    let err: Error = parse("BEGIN\nUNKNOWNTYPE(x())\nEND").unwrap_err().into();
    assert_eq!(err.line(), Some(2));
    assert!(err.to_string().starts_with("parse error at line 2"));
}

#[test]
fn surplus_arguments_do_not_fail_dispatch() {
    let layer = ToolLayer::new();
    let mut events = parse("BEGIN\nQUERY(ping(now))\nEND").unwrap();
    let outcome = dispatch(&layer, &mut events).unwrap();
    assert_eq!(outcome, Outcome::Completed { executed: 1 });
    assert_eq!(events[0].result, Some(json!({"ok": true, "reply": "pong"})));
}
