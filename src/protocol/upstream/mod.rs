//! Conversation-state request schema of the streaming backend.

pub mod encoder;
pub mod history;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use encoder::{RequestTranscoder, TranscodeOptions, TOOL_DESCRIPTION_POINTER};

pub const CHAT_TRIGGER_TYPE: &str = "MANUAL";
pub const ORIGIN_CLI: &str = "CLI";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamRequest {
    pub conversation_state: ConversationState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub conversation_id: String,
    pub history: Vec<HistoryEntry>,
    pub current_message: CurrentMessage,
    pub chat_trigger_type: String,
}

/// One history turn. Exactly one side is present on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HistoryEntry {
    #[serde(rename = "userInputMessage")]
    User(UserInputMessage),
    #[serde(rename = "assistantResponseMessage")]
    Assistant(AssistantResponseMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentMessage {
    pub user_input_message: UserInputMessage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputMessage {
    pub content: String,
    pub user_input_message_context: UserInputMessageContext,
    pub origin: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<UpstreamImage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputMessageContext {
    pub env_state: EnvState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<UpstreamTool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvState {
    pub operating_system: String,
    pub current_working_directory: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamTool {
    pub tool_specification: ToolSpecification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpecification {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    pub json: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: Vec<ToolResultContent>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResultContent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamImage {
    pub format: String,
    pub source: ImageBytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBytes {
    pub bytes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantResponseMessage {
    pub message_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_uses: Vec<ToolUse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUse {
    pub tool_use_id: String,
    pub name: String,
    pub input: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_history_entry_wire_shape() {
        let entry = HistoryEntry::Assistant(AssistantResponseMessage {
            message_id: "m1".into(),
            content: "ok".into(),
            tool_uses: vec![ToolUse {
                tool_use_id: "t1".into(),
                name: "run".into(),
                input: json!({}),
            }],
        });
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({
                "assistantResponseMessage": {
                    "messageId": "m1",
                    "content": "ok",
                    "toolUses": [{"toolUseId": "t1", "name": "run", "input": {}}]
                }
            })
        );
    }

    #[test]
    fn test_user_message_omits_empty_optionals() {
        let msg = UserInputMessage {
            content: "hi".into(),
            user_input_message_context: UserInputMessageContext {
                env_state: EnvState {
                    operating_system: "macos".into(),
                    current_working_directory: "/".into(),
                },
                ..UserInputMessageContext::default()
            },
            origin: ORIGIN_CLI.into(),
            ..UserInputMessage::default()
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "content": "hi",
                "userInputMessageContext": {
                    "envState": {"operatingSystem": "macos", "currentWorkingDirectory": "/"}
                },
                "origin": "CLI"
            })
        );
    }
}
