use crate::protocol::anthropic::{ContentBlock, MessageContent, MessagesRequest};
use std::time::Duration;
use tracing::info;

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`, rounded up) instead of a real
/// tokenizer.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Estimate the total input tokens for a Messages request.
///
/// Sums tokens from the system prompt, message text, tool-use inputs, tool
/// results and serialized tool definitions. Images are not counted.
#[must_use]
pub fn estimate_request_tokens(request: &MessagesRequest) -> u64 {
    let mut total: u64 = 0;

    if let Some(system) = &request.system {
        total += system.parts.iter().map(|part| estimate_tokens(part)).sum::<u64>();
    }

    for message in &request.messages {
        if let MessageContent::Text(text) = &message.content {
            total += estimate_tokens(text);
        }
        for block in message.content.blocks() {
            total += match block {
                ContentBlock::Text { text } => estimate_tokens(text),
                ContentBlock::ToolUse { name, input, .. } => {
                    estimate_tokens(name) + estimate_tokens(&input.to_string())
                }
                ContentBlock::ToolResult { content, .. } => {
                    content.iter().map(|piece| estimate_tokens(piece)).sum()
                }
                ContentBlock::Image { .. } | ContentBlock::Other => 0,
            };
        }
    }

    for tool in request.tools.iter().flatten() {
        if let Ok(schema) = serde_json::to_string(&tool.input_schema) {
            total += estimate_tokens(&schema);
        }
        total += estimate_tokens(&tool.description);
        total += estimate_tokens(&tool.name);
    }

    total
}

/// Log token usage for a completed request at INFO level.
pub fn log_request_usage(model: &str, input_tokens: u64, output_tokens: u64, duration: Duration) {
    info!(
        model = model,
        input_tokens,
        output_tokens,
        total_tokens = input_tokens + output_tokens,
        duration_seconds = duration.as_secs_f64(),
        "request completed"
    );
}
