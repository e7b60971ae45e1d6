//! Binary event-stream decoding and classification.

pub mod classify;
pub mod decoder;
pub mod frame;

pub use classify::{classify, BackendEvent, ClassifiedEvent, ToolUseFragment};
pub use decoder::{frame_stream, DecoderStats, EventStreamDecoder, DEFAULT_MAX_FRAME_BYTES};
pub use frame::{
    encode_event_frame, encode_frame, encode_headers, parse_frame, parse_headers, EncodeError,
    Frame, FrameError, FramePayload, Header, HeaderError, HeaderValue, Headers,
};
