use std::convert::Infallible;

use bytes::Bytes;
use futures_util::StreamExt;
use qbridge_rs::eventstream::{
    classify, encode_event_frame, encode_headers, frame_stream, parse_headers, BackendEvent,
    EventStreamDecoder, FramePayload, HeaderValue, Headers,
};
use serde_json::json;

fn conversation_frames() -> Vec<Vec<u8>> {
    vec![
        encode_event_frame("initial-response", &json!({"conversationId": "conv-1"}))
            .expect("encode initial"),
        encode_event_frame("assistantResponseEvent", &json!({"content": "Hel"}))
            .expect("encode text"),
        encode_event_frame("assistantResponseEvent", &json!({"content": "lo"}))
            .expect("encode text"),
        encode_event_frame("assistantResponseEnd", &json!({})).expect("encode end"),
    ]
}

fn drain(decoder: &mut EventStreamDecoder) -> Vec<BackendEvent> {
    let mut events = Vec::new();
    while let Some(frame) = decoder.next_frame() {
        events.push(BackendEvent::from_classified(&classify(frame)));
    }
    events
}

#[test]
fn test_decoder_accepts_byte_at_a_time_feed() {
    let wire: Vec<u8> = conversation_frames().concat();
    let mut decoder = EventStreamDecoder::default();
    let mut events = Vec::new();
    for byte in &wire {
        decoder.feed(std::slice::from_ref(byte));
        events.extend(drain(&mut decoder));
    }

    assert_eq!(
        events,
        vec![
            BackendEvent::InitialResponse {
                conversation_id: Some("conv-1".to_string())
            },
            BackendEvent::AssistantResponse {
                content: "Hel".to_string()
            },
            BackendEvent::AssistantResponse {
                content: "lo".to_string()
            },
            BackendEvent::AssistantResponseEnd,
        ]
    );
    assert_eq!(decoder.stats().frames, 4);
    assert_eq!(decoder.buffered_len(), 0);
}

#[test]
fn test_corrupted_frame_is_skipped_and_decoding_continues() {
    let mut frames = conversation_frames();
    let middle = &mut frames[1];
    let payload_byte = middle.len() - 6;
    middle[payload_byte] ^= 0xff;

    let mut decoder = EventStreamDecoder::default();
    decoder.feed(&frames.concat());
    let events = drain(&mut decoder);

    assert_eq!(events.len(), 3);
    assert_eq!(
        events[1],
        BackendEvent::AssistantResponse {
            content: "lo".to_string()
        }
    );
    assert_eq!(decoder.stats().skipped_frames, 1);
}

#[test]
fn test_corruption_passes_through_without_checksum_validation() {
    let mut frames = conversation_frames();
    let middle = &mut frames[1];
    let crc_byte = middle.len() - 1;
    middle[crc_byte] ^= 0xff;

    let mut decoder = EventStreamDecoder::new(false, 1024);
    decoder.feed(&frames.concat());
    assert_eq!(drain(&mut decoder).len(), 4);
    assert_eq!(decoder.stats().skipped_frames, 0);
}

#[test]
fn test_leading_garbage_is_discarded() {
    let mut wire = b"xyz".to_vec();
    wire.extend(conversation_frames().concat());

    let mut decoder = EventStreamDecoder::default();
    decoder.feed(&wire);
    let events = drain(&mut decoder);

    assert_eq!(events.len(), 4);
    assert_eq!(decoder.stats().discarded_bytes, 3);
}

#[test]
fn test_header_block_round_trip_is_byte_exact() {
    let mut headers = Headers::new();
    headers.push_str(":event-type", "toolUseEvent");
    headers.push_str(":content-type", "application/json");
    headers.push(
        ":timestamp",
        HeaderValue::Bytes {
            type_tag: 8,
            bytes: vec![0, 0, 1, 144, 0, 0, 0, 1],
        },
    );
    headers.push(
        "raw",
        HeaderValue::Bytes {
            type_tag: 7,
            bytes: vec![0xff, 0xfe],
        },
    );

    let mut encoded = Vec::new();
    encode_headers(&headers, &mut encoded).expect("encode headers");
    let decoded = parse_headers(&encoded).expect("parse headers");
    assert_eq!(decoded, headers);

    let mut reencoded = Vec::new();
    encode_headers(&decoded, &mut reencoded).expect("re-encode headers");
    assert_eq!(reencoded, encoded);
}

#[tokio::test]
async fn test_frame_stream_over_uneven_chunks() {
    let wire = conversation_frames().concat();
    let chunks: Vec<Result<Bytes, Infallible>> = wire
        .chunks(7)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect();

    let frames: Vec<_> = frame_stream(futures_util::stream::iter(chunks), EventStreamDecoder::default())
        .collect()
        .await;

    assert_eq!(frames.len(), 4);
    let first = frames[0].as_ref().expect("first frame");
    assert_eq!(first.headers.get_str(":event-type"), Some("initial-response"));
    assert_eq!(
        first.payload,
        FramePayload::Json(json!({"conversationId": "conv-1"}))
    );
}
