//! Turn ranked payloads into prompt-ready text.

use serde_json::Value;

use crate::models::{Payload, TEXT_FIELD};

pub const NO_CONTEXT: &str = "No relevant information found.";

/// Numbered `Document N:` blocks listing every payload field as
/// `key: value`. Empty input yields [`NO_CONTEXT`].
pub fn format_contexts(payloads: &[Payload]) -> String {
    if payloads.is_empty() {
        return NO_CONTEXT.to_string();
    }

    let mut out = String::new();
    for (i, payload) in payloads.iter().enumerate() {
        out.push_str(&format!("Document {}:\n", i + 1));
        for (key, value) in payload {
            out.push_str(&format!("  {key}: {}\n", scalar(value)));
        }
        out.push('\n');
    }
    out
}

/// The text of each payload: `text`, else `content`, else the payload as
/// JSON.
pub fn context_texts(payloads: &[Payload]) -> Vec<String> {
    payloads
        .iter()
        .map(|p| {
            p.get(TEXT_FIELD)
                .or_else(|| p.get("content"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(p.clone()).to_string())
        })
        .collect()
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
