use chrono::{DateTime, SecondsFormat, TimeZone};
use sha2::{Digest, Sha256};

const HEX: &[u8; 16] = b"0123456789abcdef";
const MESSAGE_ID_HEX_LEN: usize = 27;

/// `msg_` followed by 27 lowercase hex characters.
#[inline]
pub(crate) fn generate_message_id() -> String {
    let mut out = String::with_capacity(4 + MESSAGE_ID_HEX_LEN);
    out.push_str("msg_");
    for _ in 0..MESSAGE_ID_HEX_LEN {
        out.push(char::from(HEX[fastrand::usize(..16)]));
    }
    out
}

#[inline]
pub(crate) fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Weekday name plus an RFC 3339 timestamp with milliseconds, e.g.
/// `Tuesday, 2024-05-07T09:15:00.123+02:00`.
pub(crate) fn format_context_timestamp<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut out = now.format("%A").to_string();
    out.push_str(", ");
    out.push_str(&now.to_rfc3339_opts(SecondsFormat::Millis, true));
    out
}

pub(crate) fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}

#[inline]
pub(crate) fn push_json_string_escaped(out: &mut String, value: &str) {
    let bytes = value.as_bytes();
    if bytes.iter().all(|&b| b >= 0x20 && b != b'"' && b != b'\\') {
        out.push('"');
        out.push_str(value);
        out.push('"');
        return;
    }

    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c <= '\u{1f}' => {
                let control = c as u8;
                out.push_str("\\u00");
                out.push(char::from(HEX[(control >> 4) as usize]));
                out.push(char::from(HEX[(control & 0x0f) as usize]));
            }
            _ => out.push(ch),
        }
    }
    out.push('"');
}

#[inline]
pub(crate) fn push_u64_decimal(out: &mut String, mut n: u64) {
    if n == 0 {
        out.push('0');
        return;
    }

    let mut buf = [0u8; 20];
    let mut i = buf.len();
    while n > 0 {
        i -= 1;
        buf[i] = b'0' + ((n % 10) as u8);
        n /= 10;
    }
    let digits = std::str::from_utf8(&buf[i..]).unwrap_or("0");
    out.push_str(digits);
}

#[inline]
pub(crate) fn push_usize_decimal(out: &mut String, n: usize) {
    push_u64_decimal(out, n as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn test_message_id_shape() {
        let id = generate_message_id();
        assert_eq!(id.len(), 31);
        assert!(id.starts_with("msg_"));
        assert!(id[4..].bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(id, generate_message_id());
    }

    #[test]
    fn test_context_timestamp_with_offset() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2024, 5, 7, 9, 15, 0).unwrap();
        assert_eq!(
            format_context_timestamp(&now),
            "Tuesday, 2024-05-07T09:15:00.000+02:00"
        );
    }

    #[test]
    fn test_context_timestamp_utc_uses_z() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            format_context_timestamp(&now),
            "Monday, 2024-01-01T00:00:00.000Z"
        );
    }

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn push_json_string_escaped_matches_serde_json() {
        let inputs = [
            "",
            "plain ascii",
            "quote \" and slash \\",
            "line\nbreak\r\n",
            "\u{08}\u{0c}\t",
            "control \u{001f} tail",
            "emoji \u{1f600} caf\u{e9}",
        ];

        for input in inputs {
            let mut out = String::new();
            push_json_string_escaped(&mut out, input);
            let expected = serde_json::to_string(input).expect("serialize");
            assert_eq!(out, expected);
        }
    }

    #[test]
    fn test_push_decimal() {
        let mut out = String::new();
        push_usize_decimal(&mut out, 0);
        out.push(',');
        push_u64_decimal(&mut out, 18_446_744_073_709_551_615);
        assert_eq!(out, "0,18446744073709551615");
    }
}
