use chrono::{DateTime, Local, TimeZone};

use super::history::build_history;
use super::{
    ConversationState, CurrentMessage, EnvState, ImageBytes, InputSchema, ToolResult,
    ToolResultContent, ToolSpecification, UpstreamImage, UpstreamRequest, UpstreamTool,
    UserInputMessage, UserInputMessageContext, CHAT_TRIGGER_TYPE, ORIGIN_CLI,
};
use crate::config::AppConfig;
use crate::protocol::anthropic::{
    ContentBlock, MessageContent, MessagesRequest, Role, ThinkingConfig, Tool,
};
use crate::util::{format_context_timestamp, generate_uuid};

pub const TOOL_DESCRIPTION_POINTER: &str =
    "\n\n...(Full description provided in TOOL DOCUMENTATION section)";
pub const CANCELLED_TOOL_RESULT: &str = "Tool use was cancelled by the user";
pub const DEFAULT_TOOL_RESULT_STATUS: &str = "success";

#[derive(Debug, Clone)]
pub struct TranscodeOptions {
    pub operating_system: String,
    pub working_directory: String,
    pub thinking_budget_default: u32,
    /// Descriptions longer than this many characters are truncated.
    pub tool_description_limit: usize,
    pub tool_description_truncate_at: usize,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl TranscodeOptions {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            operating_system: config.upstream.operating_system.clone(),
            working_directory: config.upstream.working_directory.clone(),
            thinking_budget_default: config.features.thinking_budget_default,
            tool_description_limit: config.features.tool_description_limit,
            tool_description_truncate_at: config.features.tool_description_truncate_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkingMode {
    pub enabled: bool,
    pub budget: u64,
}

impl ThinkingMode {
    /// Enabled iff `type` is `enabled` (any case); non-positive budgets fall
    /// back to `default_budget`.
    #[must_use]
    pub fn resolve(config: Option<&ThinkingConfig>, default_budget: u32) -> Self {
        let enabled = config.is_some_and(|cfg| cfg.kind.eq_ignore_ascii_case("enabled"));
        let budget = config
            .and_then(|cfg| u64::try_from(cfg.budget_tokens).ok())
            .filter(|budget| *budget > 0)
            .unwrap_or(u64::from(default_budget));
        Self { enabled, budget }
    }

    #[must_use]
    pub fn hint(&self) -> String {
        format!(
            "<thinking_mode>interleaved</thinking_mode><max_thinking_length>{}</max_thinking_length>",
            self.budget
        )
    }
}

/// Append `hint` unless the trimmed text already ends with it.
#[must_use]
pub fn append_thinking_hint(text: &str, hint: &str) -> String {
    if text.trim().ends_with(hint) {
        return text.to_owned();
    }
    if text.is_empty() {
        return hint.to_owned();
    }
    let mut out = String::with_capacity(text.len() + hint.len() + 1);
    out.push_str(text);
    if !text.ends_with('\n') && !text.ends_with('\r') {
        out.push('\n');
    }
    out.push_str(hint);
    out
}

/// Text, tool results and a tool-result marker extracted from one user turn.
#[derive(Debug, Default)]
pub(crate) struct UserTurn {
    pub text: String,
    pub tool_results: Vec<ToolResult>,
    pub has_tool_result: bool,
}

pub(crate) fn extract_user_turn(content: &MessageContent) -> UserTurn {
    let MessageContent::Blocks(blocks) = content else {
        return UserTurn {
            text: content.text(),
            ..UserTurn::default()
        };
    };

    let mut turn = UserTurn::default();
    let mut texts = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text } => texts.push(text.as_str()),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                status,
            } => {
                turn.has_tool_result = true;
                merge_tool_result(
                    &mut turn.tool_results,
                    tool_use_id,
                    content,
                    status.as_deref(),
                );
            }
            _ => {}
        }
    }
    turn.text = texts.join("\n");
    turn
}

/// Add one `tool_result` block, appending to an existing entry with the same
/// id. Blank bodies become the cancellation placeholder.
pub(crate) fn merge_tool_result(
    results: &mut Vec<ToolResult>,
    tool_use_id: &str,
    pieces: &[String],
    status: Option<&str>,
) {
    let mut content: Vec<ToolResultContent> = pieces
        .iter()
        .map(|text| ToolResultContent { text: text.clone() })
        .collect();
    if content.iter().all(|item| item.text.trim().is_empty()) {
        content = vec![ToolResultContent {
            text: CANCELLED_TOOL_RESULT.to_owned(),
        }];
    }

    if let Some(existing) = results
        .iter_mut()
        .find(|result| result.tool_use_id == tool_use_id)
    {
        existing.content.extend(content);
        return;
    }
    results.push(ToolResult {
        tool_use_id: tool_use_id.to_owned(),
        content,
        status: status.unwrap_or(DEFAULT_TOOL_RESULT_STATUS).to_owned(),
    });
}

/// Base64 image blocks in backend form. The format is the media-type
/// subtype, `png` when absent.
pub(crate) fn extract_images(content: &MessageContent) -> Vec<UpstreamImage> {
    content
        .blocks()
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Image { source } if source.kind == "base64" => Some(source),
            _ => None,
        })
        .map(|source| {
            let media_type = source.media_type.as_deref().unwrap_or("image/png");
            let format = match media_type.rsplit_once('/') {
                Some((_, subtype)) => subtype,
                None => "png",
            };
            UpstreamImage {
                format: format.to_owned(),
                source: ImageBytes {
                    bytes: source.data.clone(),
                },
            }
        })
        .collect()
}

/// A tool description that was cut for the tool spec; the full text goes
/// into the prompt's documentation block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDocumentation {
    pub name: String,
    pub full_description: String,
}

/// Converts a Messages API request into the backend's conversation state.
#[derive(Debug, Clone, Default)]
pub struct RequestTranscoder {
    options: TranscodeOptions,
}

impl RequestTranscoder {
    #[must_use]
    pub fn new(options: TranscodeOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub fn options(&self) -> &TranscodeOptions {
        &self.options
    }

    #[must_use]
    pub fn env_state(&self) -> EnvState {
        EnvState {
            operating_system: self.options.operating_system.clone(),
            current_working_directory: self.options.working_directory.clone(),
        }
    }

    /// Transcode using the local clock for the context timestamp. A missing
    /// conversation id is generated.
    #[must_use]
    pub fn transcode(
        &self,
        request: &MessagesRequest,
        conversation_id: Option<String>,
    ) -> UpstreamRequest {
        self.transcode_at(request, conversation_id, &Local::now())
    }

    #[must_use]
    pub fn transcode_at<Tz>(
        &self,
        request: &MessagesRequest,
        conversation_id: Option<String>,
        now: &DateTime<Tz>,
    ) -> UpstreamRequest
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let thinking = ThinkingMode::resolve(
            request.thinking.as_ref(),
            self.options.thinking_budget_default,
        );
        let hint = thinking.hint();

        let mut tools = Vec::new();
        let mut docs = Vec::new();
        for tool in request.tools.as_deref().unwrap_or_default() {
            let (spec, doc) = self.convert_tool(tool);
            tools.push(spec);
            docs.extend(doc);
        }

        let (history_messages, last) = match request.messages.split_last() {
            Some((last, rest)) => (rest, Some(last)),
            None => (&request.messages[..], None),
        };

        let mut turn = UserTurn::default();
        let mut images = Vec::new();
        if let Some(last) = last.filter(|msg| msg.role == Role::User) {
            turn = extract_user_turn(&last.content);
            images = extract_images(&last.content);
        }
        if thinking.enabled && last.is_some_and(|msg| !msg.content.has_tool_content()) {
            turn.text = append_thinking_hint(&turn.text, &hint);
        }

        let system_text = request
            .system
            .as_ref()
            .map(|system| system.text())
            .unwrap_or_default();
        let content = format_prompt(
            &turn.text,
            turn.has_tool_result,
            &docs,
            &system_text,
            &format_context_timestamp(now),
        );

        let current = UserInputMessage {
            content,
            user_input_message_context: UserInputMessageContext {
                env_state: self.env_state(),
                tools,
                tool_results: turn.tool_results,
            },
            origin: ORIGIN_CLI.to_owned(),
            model_id: request.model.clone(),
            images,
        };

        let history = build_history(
            history_messages,
            thinking.enabled.then_some(hint.as_str()),
            &self.env_state(),
        );

        UpstreamRequest {
            conversation_state: ConversationState {
                conversation_id: conversation_id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(generate_uuid),
                history,
                current_message: CurrentMessage {
                    user_input_message: current,
                },
                chat_trigger_type: CHAT_TRIGGER_TYPE.to_owned(),
            },
        }
    }

    fn convert_tool(&self, tool: &Tool) -> (UpstreamTool, Option<ToolDocumentation>) {
        let limit = self.options.tool_description_limit;
        let overflows = tool.description.chars().nth(limit).is_some();
        let (description, doc) = if overflows {
            let mut cut: String = tool
                .description
                .chars()
                .take(self.options.tool_description_truncate_at)
                .collect();
            cut.push_str(TOOL_DESCRIPTION_POINTER);
            (
                cut,
                Some(ToolDocumentation {
                    name: tool.name.clone(),
                    full_description: tool.description.clone(),
                }),
            )
        } else {
            (tool.description.clone(), None)
        };

        let spec = UpstreamTool {
            tool_specification: ToolSpecification {
                name: tool.name.clone(),
                description,
                input_schema: InputSchema {
                    json: tool.input_schema.clone(),
                },
            },
        };
        (spec, doc)
    }
}

fn format_prompt(
    text: &str,
    has_tool_result: bool,
    docs: &[ToolDocumentation],
    system_text: &str,
    timestamp: &str,
) -> String {
    let mut body = if has_tool_result && text.is_empty() {
        String::new()
    } else {
        format!(
            "--- CONTEXT ENTRY BEGIN ---\nCurrent time: {timestamp}\n--- CONTEXT ENTRY END ---\n\n--- USER MESSAGE BEGIN ---\n{text}\n--- USER MESSAGE END ---"
        )
    };

    if !docs.is_empty() {
        let mut block = String::from("--- TOOL DOCUMENTATION BEGIN ---\n");
        for doc in docs {
            block.push_str("Tool: ");
            block.push_str(&doc.name);
            block.push_str("\nFull Description:\n");
            block.push_str(&doc.full_description);
            block.push('\n');
        }
        block.push_str("--- TOOL DOCUMENTATION END ---\n\n");
        block.push_str(&body);
        body = block;
    }

    if !system_text.is_empty() && !body.is_empty() {
        body = format!(
            "--- SYSTEM PROMPT BEGIN ---\n{system_text}\n--- SYSTEM PROMPT END ---\n\n{body}"
        );
    }
    body
}
