use rustc_hash::FxHashSet;
use serde_json::Value;

use super::encoder::{append_thinking_hint, extract_images, extract_user_turn};
use super::{
    AssistantResponseMessage, EnvState, HistoryEntry, ToolUse, UserInputMessage,
    UserInputMessageContext, ORIGIN_CLI,
};
use crate::protocol::anthropic::{ContentBlock, Message, Role};
use crate::util::generate_uuid;

/// Images survive only from this many trailing image-bearing turns of a
/// merged user run.
const MERGED_IMAGE_TURNS: usize = 2;

/// Convert prior turns into backend history.
///
/// Each message is converted on its own first; then every run of
/// consecutive user entries is collapsed into one entry so the history
/// alternates. `thinking_hint` is appended to user turns without tool
/// content when thinking is enabled.
#[must_use]
pub fn build_history(
    messages: &[Message],
    thinking_hint: Option<&str>,
    env_state: &EnvState,
) -> Vec<HistoryEntry> {
    let mut seen_tool_use_ids = FxHashSet::default();
    let converted = messages.iter().filter_map(|message| match message.role {
        Role::User => Some(HistoryEntry::User(convert_user(
            message,
            thinking_hint,
            env_state,
        ))),
        Role::Assistant => Some(HistoryEntry::Assistant(convert_assistant(
            message,
            &mut seen_tool_use_ids,
        ))),
        Role::Unknown => None,
    });

    let mut history = Vec::new();
    let mut pending_users = Vec::new();
    for entry in converted {
        match entry {
            HistoryEntry::User(user) => pending_users.push(user),
            HistoryEntry::Assistant(_) => {
                if !pending_users.is_empty() {
                    history.push(HistoryEntry::User(merge_user_run(std::mem::take(
                        &mut pending_users,
                    ))));
                }
                history.push(entry);
            }
        }
    }
    if !pending_users.is_empty() {
        history.push(HistoryEntry::User(merge_user_run(pending_users)));
    }
    history
}

fn convert_user(
    message: &Message,
    thinking_hint: Option<&str>,
    env_state: &EnvState,
) -> UserInputMessage {
    let mut turn = extract_user_turn(&message.content);
    if let Some(hint) = thinking_hint {
        if !message.content.has_tool_content() {
            turn.text = append_thinking_hint(&turn.text, hint);
        }
    }

    UserInputMessage {
        content: turn.text,
        user_input_message_context: UserInputMessageContext {
            env_state: env_state.clone(),
            tools: Vec::new(),
            tool_results: turn.tool_results,
        },
        origin: ORIGIN_CLI.to_owned(),
        model_id: String::new(),
        images: extract_images(&message.content),
    }
}

fn convert_assistant(
    message: &Message,
    seen_tool_use_ids: &mut FxHashSet<String>,
) -> AssistantResponseMessage {
    let mut tool_uses = Vec::new();
    for block in message.content.blocks() {
        let ContentBlock::ToolUse { id, name, input } = block else {
            continue;
        };
        if id.is_empty() || !seen_tool_use_ids.insert(id.clone()) {
            continue;
        }
        let input = match input {
            Value::Object(_) => input.clone(),
            _ => Value::Object(serde_json::Map::new()),
        };
        tool_uses.push(ToolUse {
            tool_use_id: id.clone(),
            name: name.clone(),
            input,
        });
    }

    AssistantResponseMessage {
        message_id: generate_uuid(),
        content: message.content.text(),
        tool_uses,
    }
}

/// Collapse consecutive user entries. Non-empty texts are joined with a
/// blank line; context, origin and model come from the first entry; images
/// come from the last two entries that carry any.
#[must_use]
pub fn merge_user_run(run: Vec<UserInputMessage>) -> UserInputMessage {
    let mut entries = run.into_iter();
    let Some(first) = entries.next() else {
        return UserInputMessage::default();
    };

    let mut contents = Vec::new();
    let mut image_groups = Vec::new();
    let UserInputMessage {
        content,
        user_input_message_context,
        origin,
        model_id,
        images,
    } = first;
    if !content.is_empty() {
        contents.push(content);
    }
    if !images.is_empty() {
        image_groups.push(images);
    }
    for entry in entries {
        if !entry.content.is_empty() {
            contents.push(entry.content);
        }
        if !entry.images.is_empty() {
            image_groups.push(entry.images);
        }
    }

    let skip = image_groups.len().saturating_sub(MERGED_IMAGE_TURNS);
    UserInputMessage {
        content: contents.join("\n\n"),
        user_input_message_context,
        origin,
        model_id,
        images: image_groups.into_iter().skip(skip).flatten().collect(),
    }
}
