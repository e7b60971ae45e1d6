//! Outgoing `text/event-stream` frames.
//!
//! Every payload is written with its `type` key first so consumers can sniff
//! the event kind from a fixed prefix. Remaining keys follow in sorted order,
//! which is what `serde_json::Map` iteration yields.

use serde_json::{json, Value};

use crate::util::{push_json_string_escaped, push_usize_decimal};

/// Format `event: <name>\ndata: <json>\n\n`, reordering an object payload so
/// `type` is its first key. Other values are serialized unchanged.
#[must_use]
pub fn format_sse(event: &str, payload: &Value) -> String {
    sse_frame(event, &type_first_json(payload))
}

/// Wrap an already-serialized JSON payload in an SSE frame.
#[must_use]
pub fn sse_frame(event: &str, json: &str) -> String {
    let mut out = String::with_capacity(18 + event.len() + json.len());
    out.push_str("event: ");
    out.push_str(event);
    out.push('\n');
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

#[must_use]
pub fn type_first_json(payload: &Value) -> String {
    let Value::Object(map) = payload else {
        return payload.to_string();
    };
    let Some(type_value) = map.get("type") else {
        return payload.to_string();
    };

    let mut out = String::with_capacity(64);
    out.push_str("{\"type\":");
    out.push_str(&type_value.to_string());
    for (key, value) in map.iter().filter(|(key, _)| key.as_str() != "type") {
        out.push(',');
        push_json_string_escaped(&mut out, key);
        out.push(':');
        out.push_str(&value.to_string());
    }
    out.push('}');
    out
}

/// Extract the payload of the first `data:` line of an SSE frame.
#[must_use]
pub fn extract_sse_data(frame: &str) -> Option<&str> {
    frame.lines().find_map(|line| {
        let payload = line
            .strip_prefix("data: ")
            .or_else(|| line.strip_prefix("data:"))?
            .trim();
        if payload.is_empty() || payload == "[DONE]" {
            return None;
        }
        Some(payload)
    })
}

/// Kind of a text-bearing content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextBlockKind {
    Text,
    Thinking,
}

impl TextBlockKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TextBlockKind::Text => "text",
            TextBlockKind::Thinking => "thinking",
        }
    }
}

#[must_use]
pub fn message_start(message_id: &str, model: &str, input_tokens: u64) -> String {
    format_sse(
        "message_start",
        &json!({
            "type": "message_start",
            "message": {
                "model": model,
                "id": message_id,
                "type": "message",
                "role": "assistant",
                "content": [],
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {
                    "input_tokens": input_tokens,
                    "cache_creation_input_tokens": 0,
                    "cache_read_input_tokens": 0,
                    "output_tokens": 1
                }
            }
        }),
    )
}

#[must_use]
pub fn text_block_start(index: usize, kind: TextBlockKind) -> String {
    let mut json = String::with_capacity(96);
    json.push_str("{\"type\":\"content_block_start\",\"content_block\":{\"text\":\"\",\"type\":\"");
    json.push_str(kind.as_str());
    json.push_str("\"},\"index\":");
    push_usize_decimal(&mut json, index);
    json.push('}');
    sse_frame("content_block_start", &json)
}

#[must_use]
pub fn tool_use_block_start(index: usize, tool_use_id: &str, name: &str) -> String {
    format_sse(
        "content_block_start",
        &json!({
            "type": "content_block_start",
            "index": index,
            "content_block": {
                "type": "tool_use",
                "id": tool_use_id,
                "name": name,
                "input": {}
            }
        }),
    )
}

#[must_use]
pub fn text_delta(index: usize, text: &str) -> String {
    let mut json = String::with_capacity(80 + text.len());
    json.push_str("{\"type\":\"content_block_delta\",\"delta\":{\"text\":");
    push_json_string_escaped(&mut json, text);
    json.push_str(",\"type\":\"text_delta\"},\"index\":");
    push_usize_decimal(&mut json, index);
    json.push('}');
    sse_frame("content_block_delta", &json)
}

#[must_use]
pub fn input_json_delta(index: usize, partial_json: &str) -> String {
    let mut json = String::with_capacity(96 + partial_json.len());
    json.push_str("{\"type\":\"content_block_delta\",\"delta\":{\"partial_json\":");
    push_json_string_escaped(&mut json, partial_json);
    json.push_str(",\"type\":\"input_json_delta\"},\"index\":");
    push_usize_decimal(&mut json, index);
    json.push('}');
    sse_frame("content_block_delta", &json)
}

#[must_use]
pub fn content_block_stop(index: usize) -> String {
    let mut json = String::with_capacity(48);
    json.push_str("{\"type\":\"content_block_stop\",\"index\":");
    push_usize_decimal(&mut json, index);
    json.push('}');
    sse_frame("content_block_stop", &json)
}

#[must_use]
pub fn ping() -> String {
    sse_frame("ping", "{\"type\":\"ping\"}")
}

#[must_use]
pub fn message_delta(stop_reason: &str, input_tokens: u64, output_tokens: u64) -> String {
    format_sse(
        "message_delta",
        &json!({
            "type": "message_delta",
            "delta": {
                "stop_reason": stop_reason,
                "stop_sequence": null
            },
            "usage": {
                "input_tokens": input_tokens,
                "cache_creation_input_tokens": 0,
                "cache_read_input_tokens": 0,
                "output_tokens": output_tokens
            }
        }),
    )
}

#[must_use]
pub fn message_stop() -> String {
    sse_frame("message_stop", "{\"type\":\"message_stop\"}")
}
