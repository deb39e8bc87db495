//! Human-readable rendering of tool results.

use serde_json::Value;

/// Render a tool result for display.
///
/// Remote results (arrays of content blocks) show their text blocks, one per
/// line; other blocks get a short placeholder. Strings print as-is and any
/// other value prints as pretty JSON.
pub fn render_result(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(blocks) if !blocks.is_empty() && blocks.iter().all(is_content_block) => blocks
            .iter()
            .map(render_block)
            .collect::<Vec<_>>()
            .join("\n"),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn is_content_block(value: &Value) -> bool {
    value.get("type").is_some_and(Value::is_string)
}

fn render_block(block: &Value) -> String {
    let kind = block["type"].as_str().unwrap_or_default();
    match kind {
        "text" => block["text"].as_str().unwrap_or_default().to_string(),
        "image" => format!("[image: {}]", block["mimeType"].as_str().unwrap_or("unknown")),
        other => format!("[{other}]"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_blocks_are_joined() {
        let value = json!([
            {"type": "text", "text": "PROJ-1: Fix login"},
            {"type": "image", "data": "...", "mimeType": "image/png"},
            {"type": "text", "text": "Status: Open"}
        ]);
        assert_eq!(render_result(&value), "PROJ-1: Fix login\n[image: image/png]\nStatus: Open");
    }

    #[test]
    fn local_results_print_as_json() {
        let value = json!({"ok": true, "reply": "pong"});
        assert_eq!(render_result(&value), "{\n  \"ok\": true,\n  \"reply\": \"pong\"\n}");
        assert_eq!(render_result(&json!("plain")), "plain");
        assert_eq!(render_result(&json!([])), "[]");
    }
}
