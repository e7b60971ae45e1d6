//! Binary event-stream frame layout.
//!
//! ```text
//! [total_len u32][headers_len u32][prelude_crc u32][headers ...][payload ...][message_crc u32]
//! ```
//!
//! All integers are big-endian. `total_len` covers the whole frame including
//! both checksums. Each header is `[name_len u8][name][type_tag u8][value_len u16][value]`.

use serde_json::Value;
use smallvec::SmallVec;

pub const PRELUDE_LEN: usize = 12;
pub const MESSAGE_CRC_LEN: usize = 4;
pub const MIN_FRAME_LEN: usize = PRELUDE_LEN + MESSAGE_CRC_LEN;
pub const STRING_TYPE_TAG: u8 = 7;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("header block truncated at offset {offset}")]
    Truncated { offset: usize },
    #[error("header name at offset {offset} is not valid UTF-8")]
    InvalidName { offset: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short: {len} bytes")]
    TooShort { len: usize },
    #[error("declared length {declared} does not match {actual} available bytes")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("headers length {headers_len} overflows frame of {total_len} bytes")]
    HeadersOverflow { headers_len: usize, total_len: usize },
    #[error("prelude checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    PreludeChecksum { expected: u32, actual: u32 },
    #[error("message checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    MessageChecksum { expected: u32, actual: u32 },
    #[error(transparent)]
    Header(#[from] HeaderError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("header name `{0}` exceeds 255 bytes")]
    NameTooLong(String),
    #[error("value of header `{0}` exceeds 65535 bytes")]
    ValueTooLong(String),
    #[error("frame of {0} bytes exceeds u32 range")]
    FrameTooLarge(usize),
}

/// A single header value. Type tag 7 with valid UTF-8 decodes to `String`;
/// everything else is kept as raw bytes with its original tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    String(String),
    Bytes { type_tag: u8, bytes: Vec<u8> },
}

impl HeaderValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(value) => Some(value),
            HeaderValue::Bytes { .. } => None,
        }
    }

    #[must_use]
    pub fn type_tag(&self) -> u8 {
        match self {
            HeaderValue::String(_) => STRING_TYPE_TAG,
            HeaderValue::Bytes { type_tag, .. } => *type_tag,
        }
    }

    #[must_use]
    pub fn value_bytes(&self) -> &[u8] {
        match self {
            HeaderValue::String(value) => value.as_bytes(),
            HeaderValue::Bytes { bytes, .. } => bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: HeaderValue,
}

/// Ordered header list. Lookups return the last header with a matching
/// name, so a repeated key behaves like an overwrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(SmallVec<[Header; 4]>);

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: HeaderValue) {
        self.0.push(Header {
            name: name.into(),
            value,
        });
    }

    pub fn push_str(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.push(name, HeaderValue::String(value.into()));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.0
            .iter()
            .rev()
            .find(|header| header.name == name)
            .map(|header| &header.value)
    }

    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(HeaderValue::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Frame payload: JSON when it parses, otherwise the raw text.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    Empty,
    Json(Value),
    Text(String),
}

impl FramePayload {
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return FramePayload::Empty;
        }
        match serde_json::from_slice(bytes) {
            Ok(value) => FramePayload::Json(value),
            Err(_) => FramePayload::Text(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            FramePayload::Json(value) => Some(value),
            FramePayload::Empty | FramePayload::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub headers: Headers,
    pub payload: FramePayload,
    pub total_length: u32,
}

#[inline]
pub(crate) fn read_u32_be(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_be_bytes(buf)
}

/// Parse a header block that has already been cut to its declared length.
///
/// # Errors
///
/// Returns [`HeaderError`] when a header runs past the end of the block or
/// its name is not UTF-8.
pub fn parse_headers(block: &[u8]) -> Result<Headers, HeaderError> {
    let mut headers = Headers::new();
    let mut offset = 0usize;

    while offset < block.len() {
        let name_len = usize::from(block[offset]);
        let name_start = offset + 1;
        let name_end = name_start + name_len;
        // name, type tag and the two length bytes
        if name_end + 3 > block.len() {
            return Err(HeaderError::Truncated { offset });
        }
        let name = std::str::from_utf8(&block[name_start..name_end])
            .map_err(|_| HeaderError::InvalidName { offset })?;
        let type_tag = block[name_end];
        let value_len = usize::from(u16::from_be_bytes([block[name_end + 1], block[name_end + 2]]));
        let value_start = name_end + 3;
        let value_end = value_start + value_len;
        if value_end > block.len() {
            return Err(HeaderError::Truncated { offset });
        }

        let raw = &block[value_start..value_end];
        let value = if type_tag == STRING_TYPE_TAG {
            match std::str::from_utf8(raw) {
                Ok(text) => HeaderValue::String(text.to_owned()),
                Err(_) => HeaderValue::Bytes {
                    type_tag,
                    bytes: raw.to_vec(),
                },
            }
        } else {
            HeaderValue::Bytes {
                type_tag,
                bytes: raw.to_vec(),
            }
        };
        headers.push(name, value);
        offset = value_end;
    }

    Ok(headers)
}

/// Check the 12-byte prelude checksum.
#[must_use]
pub fn prelude_checksum_ok(prelude: &[u8]) -> bool {
    prelude.len() >= PRELUDE_LEN && crc32fast::hash(&prelude[..8]) == read_u32_be(prelude, 8)
}

/// Parse exactly one frame. `data` must hold exactly `total_length` bytes.
///
/// # Errors
///
/// Returns [`FrameError`] when the frame's internal offsets are inconsistent
/// or, with `validate_checksums`, when either checksum does not match.
pub fn parse_frame(data: &[u8], validate_checksums: bool) -> Result<Frame, FrameError> {
    if data.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort { len: data.len() });
    }
    let total_length = read_u32_be(data, 0);
    let total = total_length as usize;
    if total != data.len() {
        return Err(FrameError::LengthMismatch {
            declared: total,
            actual: data.len(),
        });
    }
    let headers_len = read_u32_be(data, 4) as usize;
    if headers_len > total - MIN_FRAME_LEN {
        return Err(FrameError::HeadersOverflow {
            headers_len,
            total_len: total,
        });
    }

    if validate_checksums {
        let expected = read_u32_be(data, 8);
        let actual = crc32fast::hash(&data[..8]);
        if expected != actual {
            return Err(FrameError::PreludeChecksum { expected, actual });
        }
        let expected = read_u32_be(data, total - MESSAGE_CRC_LEN);
        let actual = crc32fast::hash(&data[..total - MESSAGE_CRC_LEN]);
        if expected != actual {
            return Err(FrameError::MessageChecksum { expected, actual });
        }
    }

    let headers_end = PRELUDE_LEN + headers_len;
    let headers = parse_headers(&data[PRELUDE_LEN..headers_end])?;
    let payload = FramePayload::from_bytes(&data[headers_end..total - MESSAGE_CRC_LEN]);

    Ok(Frame {
        headers,
        payload,
        total_length,
    })
}

/// Serialize headers back to their wire form.
///
/// # Errors
///
/// Returns [`EncodeError`] when a name or value exceeds its length prefix.
pub fn encode_headers(headers: &Headers, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    for header in headers.iter() {
        let name_len =
            u8::try_from(header.name.len()).map_err(|_| EncodeError::NameTooLong(header.name.clone()))?;
        let value = header.value.value_bytes();
        let value_len =
            u16::try_from(value.len()).map_err(|_| EncodeError::ValueTooLong(header.name.clone()))?;
        out.push(name_len);
        out.extend_from_slice(header.name.as_bytes());
        out.push(header.value.type_tag());
        out.extend_from_slice(&value_len.to_be_bytes());
        out.extend_from_slice(value);
    }
    Ok(())
}

/// Build a complete frame with valid prelude and message checksums.
///
/// # Errors
///
/// Returns [`EncodeError`] when a header cannot be encoded or the frame is
/// larger than the 32-bit length field allows.
pub fn encode_frame(headers: &Headers, payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let mut header_block = Vec::new();
    encode_headers(headers, &mut header_block)?;

    let total = MIN_FRAME_LEN + header_block.len() + payload.len();
    let total_u32 = u32::try_from(total).map_err(|_| EncodeError::FrameTooLarge(total))?;
    let headers_u32 =
        u32::try_from(header_block.len()).map_err(|_| EncodeError::FrameTooLarge(total))?;

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&total_u32.to_be_bytes());
    out.extend_from_slice(&headers_u32.to_be_bytes());
    let prelude_crc = crc32fast::hash(&out[..8]);
    out.extend_from_slice(&prelude_crc.to_be_bytes());
    out.extend_from_slice(&header_block);
    out.extend_from_slice(payload);
    let message_crc = crc32fast::hash(&out);
    out.extend_from_slice(&message_crc.to_be_bytes());
    Ok(out)
}

/// Build an `event` frame carrying a JSON payload, shaped like the backend's.
///
/// # Errors
///
/// Returns [`EncodeError`] when the event type is too long to encode.
pub fn encode_event_frame(event_type: &str, payload: &Value) -> Result<Vec<u8>, EncodeError> {
    let mut headers = Headers::new();
    headers.push_str(":event-type", event_type);
    headers.push_str(":content-type", "application/json");
    headers.push_str(":message-type", "event");
    let body = serde_json::to_vec(payload).unwrap_or_default();
    encode_frame(&headers, &body)
}
