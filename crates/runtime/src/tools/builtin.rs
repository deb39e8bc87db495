//! Tools that are always available, without any server.

use serde_json::json;

use super::{Schema, ToolDescriptor};

pub const PING: &str = "ping";

/// Health-check tool. Ignores its input and always answers `pong`.
pub fn ping() -> ToolDescriptor {
    ToolDescriptor::local(
        PING,
        "Health-check; always returns 'pong'.",
        Schema::empty(),
        |_| Ok(json!({ "ok": true, "reply": "pong" })),
    )
}

/// Every built-in tool.
pub fn all() -> Vec<ToolDescriptor> {
    vec![ping()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Arguments, Origin};

    #[test]
    fn ping_ignores_arguments() {
        let Origin::Local(handler) = ping().origin else {
            panic!("ping must be local");
        };
        let mut args = Arguments::new();
        args.insert("message".into(), "hello".into());
        assert_eq!(handler(&args).unwrap(), json!({"ok": true, "reply": "pong"}));
        assert_eq!(handler(&Arguments::new()).unwrap()["reply"], "pong");
    }
}
