use serde_json::Value;

use super::frame::{Frame, FramePayload, Headers};

/// Envelope pulled from a decoded frame's headers.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedEvent {
    pub event_type: String,
    pub content_type: String,
    pub message_type: String,
    pub payload: FramePayload,
}

/// Colon-prefixed header names win over bare ones when both are present and
/// non-empty.
#[must_use]
pub fn classify(frame: Frame) -> ClassifiedEvent {
    let headers = &frame.headers;
    ClassifiedEvent {
        event_type: lookup(headers, ":event-type", "event-type"),
        content_type: lookup(headers, ":content-type", "content-type"),
        message_type: lookup(headers, ":message-type", "message-type"),
        payload: frame.payload,
    }
}

fn lookup(headers: &Headers, primary: &str, fallback: &str) -> String {
    headers
        .get_str(primary)
        .filter(|value| !value.is_empty())
        .or_else(|| headers.get_str(fallback))
        .unwrap_or_default()
        .to_owned()
}

/// One increment of a tool invocation as the backend streams it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUseFragment {
    pub tool_use_id: String,
    pub name: String,
    pub input: Option<Value>,
    pub stop: bool,
}

/// Backend events the response transcoder understands.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    InitialResponse { conversation_id: Option<String> },
    AssistantResponse { content: String },
    ToolUse(ToolUseFragment),
    AssistantResponseEnd,
    Exception { kind: String, message: String },
    Unknown { event_type: String },
}

impl BackendEvent {
    /// Interpret a classified event. Missing or mistyped payload fields
    /// degrade to empty values.
    #[must_use]
    pub fn from_classified(event: &ClassifiedEvent) -> Self {
        if matches!(event.message_type.as_str(), "exception" | "error") {
            return BackendEvent::Exception {
                kind: exception_kind(event),
                message: exception_message(&event.payload),
            };
        }

        let payload = event.payload.as_json();
        match event.event_type.as_str() {
            "initial-response" => BackendEvent::InitialResponse {
                conversation_id: str_field(payload, "conversationId")
                    .filter(|id| !id.is_empty())
                    .map(str::to_owned),
            },
            "assistantResponseEvent" => BackendEvent::AssistantResponse {
                content: str_field(payload, "content").unwrap_or_default().to_owned(),
            },
            "toolUseEvent" => BackendEvent::ToolUse(ToolUseFragment {
                tool_use_id: str_field(payload, "toolUseId").unwrap_or_default().to_owned(),
                name: str_field(payload, "name").unwrap_or_default().to_owned(),
                input: payload
                    .and_then(|value| value.get("input"))
                    .filter(|input| !input.is_null())
                    .cloned(),
                stop: payload
                    .and_then(|value| value.get("stop"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            "assistantResponseEnd" => BackendEvent::AssistantResponseEnd,
            other => BackendEvent::Unknown {
                event_type: other.to_owned(),
            },
        }
    }
}

fn str_field<'a>(payload: Option<&'a Value>, key: &str) -> Option<&'a str> {
    payload.and_then(|value| value.get(key)).and_then(Value::as_str)
}

fn exception_kind(event: &ClassifiedEvent) -> String {
    if !event.event_type.is_empty() {
        return event.event_type.clone();
    }
    event.message_type.clone()
}

fn exception_message(payload: &FramePayload) -> String {
    match payload {
        FramePayload::Json(value) => str_field(Some(value), "message")
            .or_else(|| str_field(Some(value), "Message"))
            .map_or_else(|| value.to_string(), str::to_owned),
        FramePayload::Text(text) => text.clone(),
        FramePayload::Empty => String::new(),
    }
}
