//! Response side of the gateway: backend events in, Messages stream events
//! out, optionally folded back into a single response.

pub mod aggregate;
pub mod pipeline;
pub mod sse;
pub mod transcoder;

pub use aggregate::NonStreamAggregator;
pub use pipeline::spawn_pipeline;
pub use sse::{extract_sse_data, format_sse, TextBlockKind};
pub use transcoder::{
    BlockState, CompletedToolUse, ResponseStreamTranscoder, STOP_REASON_END_TURN,
    STOP_REASON_TOOL_USE, THINKING_END_TAG, THINKING_START_TAG,
};
