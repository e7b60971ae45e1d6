use memchr::memmem;
use rustc_hash::FxHashSet;
use serde_json::Value;

use super::sse::{self, TextBlockKind};
use crate::eventstream::{BackendEvent, ClassifiedEvent, ToolUseFragment};
use crate::util::generate_message_id;

pub const THINKING_START_TAG: &str = "<thinking>";
pub const THINKING_END_TAG: &str = "</thinking>";
pub const STOP_REASON_END_TURN: &str = "end_turn";
pub const STOP_REASON_TOOL_USE: &str = "tool_use";

/// Which content block, if any, is currently open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    NoBlock,
    TextOpen,
    ThinkingOpen,
    ToolOpen,
}

#[derive(Debug, Clone)]
struct OpenToolUse {
    id: String,
    name: String,
    input: String,
}

/// A tool invocation whose block has been closed, with its raw input text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedToolUse {
    pub id: String,
    pub name: String,
    pub input: String,
}

/// Turns backend events into the Messages streaming event sequence.
///
/// Guarantees, for any event sequence followed by [`finish`](Self::finish):
/// - at most one content block is open at a time and every opened block is
///   closed;
/// - block indices count up from 0;
/// - `message_start` comes once, before the first block, and `ping` comes
///   once, right after the first block start;
/// - `<thinking>` / `</thinking>` markers split across fragments are still
///   recognized, because a trailing partial marker is held back until the
///   next fragment decides it.
#[derive(Debug)]
pub struct ResponseStreamTranscoder {
    model: String,
    message_id: String,
    input_tokens: u64,
    conversation_id: Option<String>,
    state: BlockState,
    next_index: usize,
    message_start_sent: bool,
    ping_pending: bool,
    in_thinking: bool,
    scan_buffer: String,
    tool: Option<OpenToolUse>,
    seen_tool_ids: FxHashSet<String>,
    completed_tools: Vec<CompletedToolUse>,
    emitted_text_len: usize,
    emitted_tool_input_len: usize,
    finished: bool,
}

impl ResponseStreamTranscoder {
    #[must_use]
    pub fn new(model: impl Into<String>, input_tokens: u64) -> Self {
        Self {
            model: model.into(),
            message_id: generate_message_id(),
            input_tokens,
            conversation_id: None,
            state: BlockState::NoBlock,
            next_index: 0,
            message_start_sent: false,
            ping_pending: false,
            in_thinking: false,
            scan_buffer: String::new(),
            tool: None,
            seen_tool_ids: FxHashSet::default(),
            completed_tools: Vec::new(),
            emitted_text_len: 0,
            emitted_tool_input_len: 0,
            finished: false,
        }
    }

    /// Seed the conversation id used until the backend reports its own.
    #[must_use]
    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    #[must_use]
    pub fn state(&self) -> BlockState {
        self.state
    }

    #[must_use]
    pub fn completed_tool_uses(&self) -> &[CompletedToolUse] {
        &self.completed_tools
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// `ceil((text bytes + tool input bytes) / 4)`, never below 1.
    #[must_use]
    pub fn output_tokens(&self) -> u64 {
        let emitted = self.emitted_text_len + self.emitted_tool_input_len;
        (emitted.div_ceil(4) as u64).max(1)
    }

    #[must_use]
    pub fn stop_reason(&self) -> &'static str {
        if self.seen_tool_ids.is_empty() {
            STOP_REASON_END_TURN
        } else {
            STOP_REASON_TOOL_USE
        }
    }

    pub fn process_classified(&mut self, event: &ClassifiedEvent, out: &mut Vec<String>) {
        self.process_into(&BackendEvent::from_classified(event), out);
    }

    #[must_use]
    pub fn process(&mut self, event: &BackendEvent) -> Vec<String> {
        let mut out = Vec::new();
        self.process_into(event, &mut out);
        out
    }

    pub fn process_into(&mut self, event: &BackendEvent, out: &mut Vec<String>) {
        if self.finished {
            return;
        }
        match event {
            BackendEvent::InitialResponse { conversation_id } => {
                if self.message_start_sent {
                    return;
                }
                if let Some(id) = conversation_id {
                    self.conversation_id = Some(id.clone());
                }
                self.ensure_message_start(out);
            }
            BackendEvent::AssistantResponse { content } => {
                if self.state == BlockState::ToolOpen {
                    self.close_block(out);
                }
                if content.is_empty() {
                    return;
                }
                self.scan_buffer.push_str(content);
                self.scan(out, false);
            }
            BackendEvent::ToolUse(fragment) => self.handle_tool_use(fragment, out),
            BackendEvent::AssistantResponseEnd => {
                self.scan(out, true);
                self.close_block(out);
            }
            BackendEvent::Exception { kind, message } => {
                tracing::warn!(kind = %kind, "upstream exception frame: {message}");
            }
            BackendEvent::Unknown { event_type } => {
                tracing::debug!(event_type = %event_type, "ignoring unrecognized upstream event");
            }
        }
    }

    /// Close everything and emit `message_delta` + `message_stop`. Further
    /// calls, and further events, produce nothing.
    #[must_use]
    pub fn finish(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        self.finish_into(&mut out);
        out
    }

    pub fn finish_into(&mut self, out: &mut Vec<String>) {
        if self.finished {
            return;
        }
        self.scan(out, true);
        self.close_block(out);
        self.ensure_message_start(out);
        out.push(sse::message_delta(
            self.stop_reason(),
            self.input_tokens,
            self.output_tokens(),
        ));
        out.push(sse::message_stop());
        self.finished = true;
    }

    fn handle_tool_use(&mut self, fragment: &ToolUseFragment, out: &mut Vec<String>) {
        let starts_tool = !fragment.tool_use_id.is_empty()
            && !fragment.name.is_empty()
            && self.tool.is_none();
        if starts_tool {
            if self.seen_tool_ids.contains(&fragment.tool_use_id) {
                tracing::debug!(
                    tool_use_id = %fragment.tool_use_id,
                    "dropping fragment for an already closed tool use"
                );
            } else {
                self.scan(out, true);
                self.open_block(BlockState::ToolOpen, out, |index| {
                    sse::tool_use_block_start(index, &fragment.tool_use_id, &fragment.name)
                });
                self.seen_tool_ids.insert(fragment.tool_use_id.clone());
                self.tool = Some(OpenToolUse {
                    id: fragment.tool_use_id.clone(),
                    name: fragment.name.clone(),
                    input: String::new(),
                });
            }
        }

        if let (Some(tool), Some(input)) = (self.tool.as_mut(), fragment.input.as_ref()) {
            let piece = match input {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            if !piece.is_empty() {
                out.push(sse::input_json_delta(self.next_index - 1, &piece));
                self.emitted_tool_input_len += piece.len();
                tool.input.push_str(&piece);
            }
        }

        if fragment.stop && self.tool.is_some() {
            self.close_block(out);
        }
    }

    /// Consume the scan buffer, switching between text and thinking blocks on
    /// markers. Unless `flush_all`, a suffix that could begin the awaited
    /// marker stays buffered.
    fn scan(&mut self, out: &mut Vec<String>, flush_all: bool) {
        while !self.scan_buffer.is_empty() {
            let marker = if self.in_thinking {
                THINKING_END_TAG
            } else {
                THINKING_START_TAG
            };

            if let Some(pos) = memmem::find(self.scan_buffer.as_bytes(), marker.as_bytes()) {
                let before: String = self.scan_buffer.drain(..pos + marker.len()).collect();
                self.emit_text(&before[..pos], out);
                if self.in_thinking {
                    self.close_block(out);
                    self.in_thinking = false;
                } else {
                    self.open_block(BlockState::ThinkingOpen, out, |index| {
                        sse::text_block_start(index, TextBlockKind::Thinking)
                    });
                    self.in_thinking = true;
                }
                continue;
            }

            let keep = if flush_all {
                0
            } else {
                partial_marker_suffix_len(&self.scan_buffer, marker)
            };
            let flush_len = self.scan_buffer.len() - keep;
            if flush_len > 0 {
                let text: String = self.scan_buffer.drain(..flush_len).collect();
                self.emit_text(&text, out);
            }
            break;
        }
    }

    /// Emit a delta in the current mode, opening a block of that mode first
    /// when needed.
    fn emit_text(&mut self, text: &str, out: &mut Vec<String>) {
        if text.is_empty() {
            return;
        }
        let (wanted, kind) = if self.in_thinking {
            (BlockState::ThinkingOpen, TextBlockKind::Thinking)
        } else {
            (BlockState::TextOpen, TextBlockKind::Text)
        };
        if self.state != wanted {
            self.open_block(wanted, out, |index| sse::text_block_start(index, kind));
        }
        out.push(sse::text_delta(self.next_index - 1, text));
        self.emitted_text_len += text.len();
    }

    fn open_block<F>(&mut self, state: BlockState, out: &mut Vec<String>, start_frame: F)
    where
        F: FnOnce(usize) -> String,
    {
        self.ensure_message_start(out);
        self.close_block(out);
        let index = self.next_index;
        self.next_index += 1;
        out.push(start_frame(index));
        if self.ping_pending {
            out.push(sse::ping());
            self.ping_pending = false;
        }
        self.state = state;
    }

    fn close_block(&mut self, out: &mut Vec<String>) {
        if self.state == BlockState::NoBlock {
            return;
        }
        out.push(sse::content_block_stop(self.next_index - 1));
        if self.state == BlockState::ToolOpen {
            if let Some(tool) = self.tool.take() {
                self.completed_tools.push(CompletedToolUse {
                    id: tool.id,
                    name: tool.name,
                    input: tool.input,
                });
            }
        }
        self.state = BlockState::NoBlock;
    }

    fn ensure_message_start(&mut self, out: &mut Vec<String>) {
        if self.message_start_sent {
            return;
        }
        out.push(sse::message_start(
            &self.message_id,
            &self.model,
            self.input_tokens,
        ));
        self.message_start_sent = true;
        self.ping_pending = true;
    }
}

/// Length of the longest proper prefix of `marker` that `text` ends with.
fn partial_marker_suffix_len(text: &str, marker: &str) -> usize {
    let text = text.as_bytes();
    let marker = marker.as_bytes();
    let longest = (marker.len() - 1).min(text.len());
    (1..=longest)
        .rev()
        .find(|&len| text.ends_with(&marker[..len]))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(content: &str) -> BackendEvent {
        BackendEvent::AssistantResponse {
            content: content.to_string(),
        }
    }

    fn tool(id: &str, name: &str, input: Option<Value>, stop: bool) -> BackendEvent {
        BackendEvent::ToolUse(ToolUseFragment {
            tool_use_id: id.to_string(),
            name: name.to_string(),
            input,
            stop,
        })
    }

    fn event_names(frames: &[String]) -> Vec<&str> {
        frames
            .iter()
            .filter_map(|frame| frame.strip_prefix("event: "))
            .filter_map(|rest| rest.split('\n').next())
            .collect()
    }

    fn run(events: &[BackendEvent]) -> (ResponseStreamTranscoder, Vec<String>) {
        let mut transcoder = ResponseStreamTranscoder::new("m", 3);
        let mut out = Vec::new();
        for event in events {
            transcoder.process_into(event, &mut out);
        }
        transcoder.finish_into(&mut out);
        (transcoder, out)
    }

    #[test]
    fn test_partial_marker_suffix() {
        assert_eq!(partial_marker_suffix_len("abc<thi", THINKING_START_TAG), 4);
        assert_eq!(partial_marker_suffix_len("abc<", THINKING_START_TAG), 1);
        assert_eq!(partial_marker_suffix_len("abc", THINKING_START_TAG), 0);
        assert_eq!(partial_marker_suffix_len("x</thinking", THINKING_END_TAG), 10);
        assert_eq!(partial_marker_suffix_len("", THINKING_END_TAG), 0);
    }

    #[test]
    fn test_plain_text_lifecycle() {
        let (_, out) = run(&[
            BackendEvent::InitialResponse {
                conversation_id: Some("c".into()),
            },
            text("Hello"),
            BackendEvent::AssistantResponseEnd,
        ]);
        assert_eq!(
            event_names(&out),
            [
                "message_start",
                "content_block_start",
                "ping",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
    }

    #[test]
    fn test_split_start_tag_opens_thinking_block() {
        let (_, out) = run(&[text("Hi <thi"), text("nking>plan</thin"), text("king>done")]);
        let joined = out.concat();
        assert!(!joined.contains("<thi"));
        assert_eq!(
            event_names(&out),
            [
                "message_start",
                "content_block_start",
                "ping",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
        assert!(out[5].contains("\"type\":\"thinking\""));
        assert!(out[6].contains("\"text\":\"plan\""));
        assert!(out[8].contains("\"index\":2"));
    }

    #[test]
    fn test_held_back_prefix_flushed_when_not_a_marker() {
        let (_, out) = run(&[text("a <th"), text("e end")]);
        let deltas: Vec<_> = out
            .iter()
            .filter(|frame| frame.starts_with("event: content_block_delta"))
            .collect();
        assert_eq!(deltas.len(), 2);
        assert!(deltas[0].contains("\"text\":\"a \""));
        assert!(deltas[1].contains("\"text\":\"<the end\""));
    }

    #[test]
    fn test_held_back_prefix_flushed_on_finish() {
        let (_, out) = run(&[text("tail <")]);
        assert!(out.concat().contains("\"text\":\"<\""));
    }

    #[test]
    fn test_tool_use_sequence() {
        let (transcoder, out) = run(&[
            BackendEvent::InitialResponse {
                conversation_id: None,
            },
            text("Let me check."),
            tool("t1", "lookup", Some(json!("{\"q\":")), false),
            tool("t1", "lookup", Some(json!("\"x\"}")), false),
            tool("t1", "lookup", None, true),
        ]);
        assert_eq!(
            event_names(&out),
            [
                "message_start",
                "content_block_start",
                "ping",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
        assert!(out[5].contains("\"id\":\"t1\""));
        assert!(out[6].contains("\"partial_json\":\"{\\\"q\\\":\""));
        assert!(out[9].contains("\"stop_reason\":\"tool_use\""));
        assert_eq!(
            transcoder.completed_tool_uses(),
            [CompletedToolUse {
                id: "t1".into(),
                name: "lookup".into(),
                input: "{\"q\":\"x\"}".into()
            }]
        );
    }

    #[test]
    fn test_object_tool_input_serialized_compactly() {
        let (_, out) = run(&[tool("t1", "f", Some(json!({"a": [1, 2]})), true)]);
        assert!(out
            .iter()
            .any(|frame| frame.contains("\"partial_json\":\"{\\\"a\\\":[1,2]}\"")));
    }

    #[test]
    fn test_text_closes_open_tool_block() {
        let (_, out) = run(&[tool("t1", "f", Some(json!("{}")), false), text("after")]);
        let names = event_names(&out);
        assert_eq!(names.iter().filter(|n| **n == "content_block_start").count(), 2);
        assert_eq!(names.iter().filter(|n| **n == "content_block_stop").count(), 2);
    }

    #[test]
    fn test_text_after_tool_keeps_tool_use_stop_reason() {
        let (transcoder, out) = run(&[tool("a", "f", None, true), text("done")]);
        assert_eq!(transcoder.stop_reason(), "tool_use");
        let delta = out
            .iter()
            .find(|frame| frame.starts_with("event: message_delta"))
            .unwrap();
        assert!(delta.contains("\"stop_reason\":\"tool_use\""));
    }

    #[test]
    fn test_duplicate_tool_id_not_reopened() {
        let (_, out) = run(&[
            tool("t1", "f", Some(json!("{}")), true),
            tool("t1", "f", Some(json!("{}")), true),
        ]);
        let names = event_names(&out);
        assert_eq!(names.iter().filter(|n| **n == "content_block_start").count(), 1);
        assert_eq!(names.iter().filter(|n| **n == "content_block_delta").count(), 1);
    }

    #[test]
    fn test_message_start_emitted_lazily() {
        let (_, out) = run(&[text("no initial response")]);
        assert_eq!(event_names(&out)[0], "message_start");
        assert_eq!(event_names(&out)[2], "ping");
    }

    #[test]
    fn test_empty_stream_floor_of_one_output_token() {
        let (transcoder, out) = run(&[]);
        assert_eq!(transcoder.output_tokens(), 1);
        assert_eq!(event_names(&out), ["message_start", "message_delta", "message_stop"]);
        assert!(out[1].contains("\"output_tokens\":1"));
        assert!(out[1].contains("\"stop_reason\":\"end_turn\""));
    }

    #[test]
    fn test_output_tokens_round_up() {
        let (transcoder, _) = run(&[text("12345")]);
        assert_eq!(transcoder.output_tokens(), 2);
    }

    #[test]
    fn test_finish_is_idempotent_and_final() {
        let mut transcoder = ResponseStreamTranscoder::new("m", 0);
        assert!(!transcoder.finish().is_empty());
        assert!(transcoder.finish().is_empty());
        assert!(transcoder.process(&text("late")).is_empty());
        assert!(transcoder.is_finished());
    }

    #[test]
    fn test_exception_does_not_emit() {
        let mut transcoder = ResponseStreamTranscoder::new("m", 0);
        let out = transcoder.process(&BackendEvent::Exception {
            kind: "ThrottlingException".into(),
            message: "slow".into(),
        });
        assert!(out.is_empty());
        assert_eq!(transcoder.state(), BlockState::NoBlock);
    }

    #[test]
    fn test_initial_response_sets_conversation_id() {
        let mut transcoder = ResponseStreamTranscoder::new("m", 0).with_conversation_id("seed");
        assert_eq!(transcoder.conversation_id(), Some("seed"));
        let _ = transcoder.process(&BackendEvent::InitialResponse {
            conversation_id: Some("server".into()),
        });
        assert_eq!(transcoder.conversation_id(), Some("server"));
        assert!(transcoder.message_id().starts_with("msg_"));
    }
}
