pub mod stream;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Messages API request wire type.
///
/// `messages[].content` and `system` accept either a string or a block list;
/// blocks or fields of an unexpected shape degrade to empty values instead of
/// failing the request.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesRequest {
    #[serde(default, deserialize_with = "lenient")]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub max_tokens: u64,
    #[serde(default, deserialize_with = "lenient")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub tools: Option<Vec<Tool>>,
    #[serde(default, deserialize_with = "lenient")]
    pub stream: bool,
    #[serde(default)]
    pub system: Option<SystemPrompt>,
    #[serde(default, deserialize_with = "lenient")]
    pub thinking: Option<ThinkingConfig>,
}

/// Accept any JSON for an optional field; `null` or a mistyped value becomes
/// the default.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Integer value of a JSON number, accepting floats with no fractional part.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::float_cmp
)]
fn whole_number(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    let float = value.as_f64()?;
    let in_range = float >= i64::MIN as f64 && float <= i64::MAX as f64;
    (float.fract() == 0.0 && in_range).then(|| float as i64)
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(whole_number(&value).unwrap_or_default())
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_u64()
        .or_else(|| whole_number(&value).and_then(|n| u64::try_from(n).ok()))
        .unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "Value")]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl From<Value> for MessageContent {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => MessageContent::Text(text),
            Value::Array(items) => {
                MessageContent::Blocks(items.into_iter().map(ContentBlock::from).collect())
            }
            _ => MessageContent::default(),
        }
    }
}

impl MessageContent {
    #[must_use]
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            MessageContent::Text(_) => &[],
            MessageContent::Blocks(blocks) => blocks,
        }
    }

    /// Plain text of the message: the string itself, or the text blocks
    /// joined with newlines.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    #[must_use]
    pub fn has_tool_content(&self) -> bool {
        self.blocks().iter().any(|block| {
            matches!(
                block,
                ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. }
            )
        })
    }
}

/// Image payload. Only `base64` sources are forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource {
    pub kind: String,
    pub media_type: Option<String>,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        /// Text pieces in order: a string body becomes one piece, a list body
        /// contributes every item that is a string or carries a `text` field.
        content: Vec<String>,
        status: Option<String>,
    },
    Other,
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_owned)
}

impl From<Value> for ContentBlock {
    fn from(value: Value) -> Self {
        let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
        match kind {
            "text" => match value.get("text").and_then(Value::as_str) {
                Some(text) => ContentBlock::Text {
                    text: text.to_owned(),
                },
                None => ContentBlock::Other,
            },
            "image" => {
                let Some(source) = value.get("source") else {
                    return ContentBlock::Other;
                };
                ContentBlock::Image {
                    source: ImageSource {
                        kind: str_field(source, "type").unwrap_or_default(),
                        media_type: str_field(source, "media_type"),
                        data: str_field(source, "data").unwrap_or_default(),
                    },
                }
            }
            "tool_use" => ContentBlock::ToolUse {
                id: str_field(&value, "id").unwrap_or_default(),
                name: str_field(&value, "name").unwrap_or_default(),
                input: value.get("input").cloned().unwrap_or(Value::Null),
            },
            "tool_result" => ContentBlock::ToolResult {
                tool_use_id: str_field(&value, "tool_use_id").unwrap_or_default(),
                content: tool_result_pieces(value.get("content")),
                status: str_field(&value, "status"),
            },
            _ => ContentBlock::Other,
        }
    }
}

fn tool_result_pieces(content: Option<&Value>) -> Vec<String> {
    match content {
        Some(Value::String(text)) => vec![text.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text.clone()),
                Value::Object(_) => str_field(item, "text"),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// System prompt: a string or a list of text blocks.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "Value")]
pub struct SystemPrompt {
    pub parts: Vec<String>,
}

impl From<Value> for SystemPrompt {
    fn from(value: Value) -> Self {
        let parts = match value {
            Value::String(text) => vec![text],
            Value::Array(items) => items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|item| str_field(item, "text"))
                .collect(),
            _ => Vec::new(),
        };
        Self { parts }
    }
}

impl SystemPrompt {
    #[must_use]
    pub fn text(&self) -> String {
        self.parts.join("\n")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingConfig {
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub budget_tokens: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    #[serde(default, deserialize_with = "lenient")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient")]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
}

/// Non-streaming Messages API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub role: String,
    pub model: String,
    pub content: Vec<ResponseBlock>,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

/// A content block as streamed in `content_block_start` and assembled in the
/// non-streaming response. Thinking blocks carry their text in `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseBlock {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partial_json: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}
