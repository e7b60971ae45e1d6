use chrono::{TimeZone, Utc};
use qbridge_rs::protocol::anthropic::MessagesRequest;
use qbridge_rs::protocol::upstream::{
    RequestTranscoder, TranscodeOptions, TOOL_DESCRIPTION_POINTER,
};
use serde_json::{json, Value};

fn transcode(request: Value) -> Value {
    let request: MessagesRequest = serde_json::from_value(request).expect("parse request");
    let now = Utc
        .with_ymd_and_hms(2024, 5, 7, 9, 15, 0)
        .single()
        .expect("fixed time");
    let upstream = RequestTranscoder::new(TranscodeOptions::default()).transcode_at(
        &request,
        Some("conv-1".to_string()),
        &now,
    );
    serde_json::to_value(&upstream).expect("serialize upstream request")
}

#[test]
fn test_wire_shape_of_multi_turn_request() {
    let body = transcode(json!({
        "model": "claude-sonnet-4",
        "max_tokens": 1024,
        "messages": [
            {"role": "user", "content": "What is the weather?"},
            {"role": "assistant", "content": [
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "tu_1", "name": "weather", "input": {"city": "SF"}}
            ]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "tu_1", "content": "Sunny"}
            ]}
        ],
        "tools": [{"name": "weather", "description": "Look up weather",
                   "input_schema": {"type": "object"}}]
    }));

    let state = &body["conversationState"];
    assert_eq!(state["conversationId"], "conv-1");
    assert_eq!(state["chatTriggerType"], "MANUAL");

    let history = state["history"].as_array().expect("history array");
    assert_eq!(history.len(), 2);
    assert_eq!(
        history[0]["userInputMessage"]["content"],
        "What is the weather?"
    );
    assert_eq!(
        history[0]["userInputMessage"]["userInputMessageContext"]["envState"],
        json!({"operatingSystem": "macos", "currentWorkingDirectory": "/"})
    );
    let assistant = &history[1]["assistantResponseMessage"];
    assert_eq!(assistant["content"], "Checking.");
    assert_eq!(
        assistant["toolUses"],
        json!([{"toolUseId": "tu_1", "name": "weather", "input": {"city": "SF"}}])
    );

    let current = &state["currentMessage"]["userInputMessage"];
    assert_eq!(current["content"], "");
    assert_eq!(current["modelId"], "claude-sonnet-4");
    assert_eq!(current["origin"], "CLI");
    let context = &current["userInputMessageContext"];
    assert_eq!(
        context["toolResults"],
        json!([{"toolUseId": "tu_1", "content": [{"text": "Sunny"}], "status": "success"}])
    );
    assert_eq!(
        context["tools"][0]["toolSpecification"]["inputSchema"],
        json!({"json": {"type": "object"}})
    );
}

#[test]
fn test_oversized_tool_description_moves_to_documentation() {
    let description = "d".repeat(10_300);
    let body = transcode(json!({
        "model": "m",
        "messages": [{"role": "user", "content": "go"}],
        "tools": [{"name": "big", "description": description, "input_schema": {}}]
    }));

    let current = &body["conversationState"]["currentMessage"]["userInputMessage"];
    let content = current["content"].as_str().expect("content string");
    assert!(content.starts_with("--- TOOL DOCUMENTATION BEGIN ---\nTool: big\nFull Description:\n"));
    assert!(content.contains(&format!("\n{description}\n--- TOOL DOCUMENTATION END ---\n\n")));

    let embedded = current["userInputMessageContext"]["tools"][0]["toolSpecification"]
        ["description"]
        .as_str()
        .expect("embedded description");
    assert!(embedded.ends_with(TOOL_DESCRIPTION_POINTER));
    assert_eq!(
        embedded.chars().count(),
        10_100 + TOOL_DESCRIPTION_POINTER.chars().count()
    );
}

#[test]
fn test_history_images_keep_last_two_turns() {
    let image = |data: &str| {
        json!({"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": data}})
    };
    let body = transcode(json!({
        "model": "m",
        "messages": [
            {"role": "user", "content": [image("A")]},
            {"role": "user", "content": [image("B")]},
            {"role": "user", "content": [image("C")]},
            {"role": "assistant", "content": "seen"},
            {"role": "user", "content": "next"}
        ]
    }));

    let merged = &body["conversationState"]["history"][0]["userInputMessage"];
    assert_eq!(
        merged["images"],
        json!([
            {"format": "png", "source": {"bytes": "B"}},
            {"format": "png", "source": {"bytes": "C"}}
        ])
    );
}

#[test]
fn test_thinking_hint_in_history_and_current_turn() {
    let body = transcode(json!({
        "model": "m",
        "thinking": {"type": "enabled", "budget_tokens": 2048},
        "messages": [
            {"role": "user", "content": "first"},
            {"role": "assistant", "content": "ok"},
            {"role": "user", "content": "second"}
        ]
    }));
    let hint = "<thinking_mode>interleaved</thinking_mode><max_thinking_length>2048</max_thinking_length>";

    let state = &body["conversationState"];
    assert_eq!(
        state["history"][0]["userInputMessage"]["content"],
        format!("first\n{hint}")
    );
    let current = state["currentMessage"]["userInputMessage"]["content"]
        .as_str()
        .expect("content string");
    assert!(current.contains(&format!("second\n{hint}\n--- USER MESSAGE END ---")));
    assert!(current.contains("Current time: Tuesday, 2024-05-07T09:15:00.000Z"));
}
