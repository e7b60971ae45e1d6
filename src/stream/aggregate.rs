use serde_json::Value;

use super::sse::extract_sse_data;
use super::transcoder::STOP_REASON_END_TURN;
use crate::protocol::anthropic::stream::{BlockDelta, StreamEvent};
use crate::protocol::anthropic::{MessagesResponse, ResponseBlock, Usage};

/// Rebuilds a single [`MessagesResponse`] from the outgoing event sequence.
#[derive(Debug, Default)]
pub struct NonStreamAggregator {
    blocks: Vec<Option<ResponseBlock>>,
    stop_reason: Option<String>,
    usage: Usage,
    skipped: usize,
}

impl NonStreamAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one formatted SSE frame. Frames without a JSON `data:` line are
    /// counted and ignored.
    pub fn push_event(&mut self, frame: &str) {
        let Some(data) = extract_sse_data(frame) else {
            self.skipped += 1;
            return;
        };
        match serde_json::from_str::<StreamEvent>(data) {
            Ok(event) => self.apply(event),
            Err(e) => {
                tracing::debug!("skipping unparsable stream event: {e}");
                self.skipped += 1;
            }
        }
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                if self.blocks.len() <= index {
                    self.blocks.resize(index + 1, None);
                }
                self.blocks[index] = Some(content_block);
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                let Some(Some(block)) = self.blocks.get_mut(index) else {
                    return;
                };
                match (block, delta) {
                    (
                        ResponseBlock::Text { text } | ResponseBlock::Thinking { text },
                        BlockDelta::TextDelta { text: piece },
                    ) => text.push_str(&piece),
                    (
                        ResponseBlock::ToolUse { partial_json, .. },
                        BlockDelta::InputJsonDelta {
                            partial_json: piece,
                        },
                    ) => partial_json.get_or_insert_with(String::new).push_str(&piece),
                    _ => {}
                }
            }
            StreamEvent::ContentBlockStop { index } => {
                if let Some(Some(ResponseBlock::ToolUse {
                    input,
                    partial_json,
                    ..
                })) = self.blocks.get_mut(index)
                {
                    let parsed = partial_json
                        .as_deref()
                        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
                        .filter(Value::is_object);
                    if let Some(value) = parsed {
                        *input = value;
                        *partial_json = None;
                    }
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                self.usage = usage;
            }
            StreamEvent::MessageStart {}
            | StreamEvent::MessageStop {}
            | StreamEvent::Ping {}
            | StreamEvent::Other => {}
        }
    }

    /// Compact the collected blocks in index order and assemble the response.
    #[must_use]
    pub fn finish(self, id: impl Into<String>, model: impl Into<String>) -> MessagesResponse {
        MessagesResponse {
            id: id.into(),
            type_: "message".to_string(),
            role: "assistant".to_string(),
            model: model.into(),
            content: self.blocks.into_iter().flatten().collect(),
            stop_reason: Some(
                self.stop_reason
                    .unwrap_or_else(|| STOP_REASON_END_TURN.to_string()),
            ),
            stop_sequence: None,
            usage: self.usage,
        }
    }
}
