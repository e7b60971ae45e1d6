use std::fmt::Display;
use std::time::Instant;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::transcoder::ResponseStreamTranscoder;
use crate::eventstream::{classify, frame_stream, EventStreamDecoder, Frame};
use crate::observability::log_request_complete;

/// Spawn the decode and transcode stages for one upstream response.
///
/// Stage 1 reads `byte_stream` and pushes frames; stage 2 classifies them,
/// drives `transcoder` and pushes formatted SSE frames into the returned
/// receiver, which is stage 3. Both queues hold at most `capacity` items, so
/// a slow consumer stalls the upstream read.
///
/// Cancelling `cancel`, or dropping the returned receiver, stops both stages
/// at their next suspension point and drops the upstream body.
pub fn spawn_pipeline<S, E>(
    byte_stream: S,
    decoder: EventStreamDecoder,
    transcoder: ResponseStreamTranscoder,
    capacity: usize,
    cancel: CancellationToken,
) -> mpsc::Receiver<String>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let capacity = capacity.max(1);
    let (frame_tx, frame_rx) = mpsc::channel(capacity);
    let (event_tx, event_rx) = mpsc::channel(capacity);

    tokio::spawn(decode_stage(
        frame_stream(byte_stream, decoder),
        frame_tx,
        cancel.clone(),
    ));
    tokio::spawn(transcode_stage(frame_rx, event_tx, transcoder, cancel));

    event_rx
}

async fn decode_stage<F, E>(frames: F, frame_tx: mpsc::Sender<Frame>, cancel: CancellationToken)
where
    F: Stream<Item = Result<Frame, E>> + Send,
    E: Display + Send,
{
    let mut frames = std::pin::pin!(frames);
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("decode stage cancelled");
                return;
            }
            next = frames.next() => next,
        };
        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                tracing::warn!("upstream read failed: {e}");
                return;
            }
            None => return,
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            sent = frame_tx.send(frame) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

async fn transcode_stage(
    mut frame_rx: mpsc::Receiver<Frame>,
    event_tx: mpsc::Sender<String>,
    mut transcoder: ResponseStreamTranscoder,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    let mut pending = Vec::new();

    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("transcode stage cancelled");
                return;
            }
            frame = frame_rx.recv() => frame,
        };
        let Some(frame) = frame else {
            break;
        };
        transcoder.process_classified(&classify(frame), &mut pending);
        if !forward(&event_tx, &mut pending, &cancel).await {
            cancel.cancel();
            return;
        }
    }

    transcoder.finish_into(&mut pending);
    if forward(&event_tx, &mut pending, &cancel).await {
        log_request_complete(
            transcoder.model(),
            transcoder.input_tokens(),
            transcoder.output_tokens(),
            started,
        );
    }
}

/// Send every pending frame in order. Returns `false` once the consumer is
/// gone or the pipeline was cancelled.
async fn forward(
    event_tx: &mpsc::Sender<String>,
    pending: &mut Vec<String>,
    cancel: &CancellationToken,
) -> bool {
    for event in pending.drain(..) {
        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => return false,
            sent = event_tx.send(event) => sent,
        };
        if sent.is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventstream::encode_event_frame;
    use serde_json::json;
    use std::convert::Infallible;

    fn chunks(frames: Vec<Vec<u8>>) -> Vec<Result<Bytes, Infallible>> {
        frames.into_iter().map(|f| Ok(Bytes::from(f))).collect()
    }

    fn hello_frames() -> Vec<Vec<u8>> {
        vec![
            encode_event_frame("initial-response", &json!({"conversationId": "c"})).unwrap(),
            encode_event_frame("assistantResponseEvent", &json!({"content": "Hello"})).unwrap(),
            encode_event_frame("assistantResponseEnd", &json!({})).unwrap(),
        ]
    }

    async fn collect(mut rx: mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(event) = rx.recv().await {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_pipeline_emits_full_lifecycle() {
        let rx = spawn_pipeline(
            futures_util::stream::iter(chunks(hello_frames())),
            EventStreamDecoder::default(),
            ResponseStreamTranscoder::new("m", 1),
            4,
            CancellationToken::new(),
        );
        let events = collect(rx).await;
        assert!(events[0].starts_with("event: message_start"));
        assert!(events.iter().any(|e| e.contains("\"text\":\"Hello\"")));
        assert!(events.last().unwrap().starts_with("event: message_stop"));
    }

    #[tokio::test]
    async fn test_pipeline_finishes_after_read_error() {
        let mut items: Vec<Result<Bytes, String>> = hello_frames()
            .into_iter()
            .take(2)
            .map(|f| Ok(Bytes::from(f)))
            .collect();
        items.push(Err("connection reset".to_string()));
        let rx = spawn_pipeline(
            futures_util::stream::iter(items),
            EventStreamDecoder::default(),
            ResponseStreamTranscoder::new("m", 1),
            4,
            CancellationToken::new(),
        );
        let events = collect(rx).await;
        assert!(events.iter().any(|e| e.starts_with("event: content_block_stop")));
        assert!(events.last().unwrap().starts_with("event: message_stop"));
    }

    #[tokio::test]
    async fn test_cancelled_pipeline_stops_without_message_stop() {
        let cancel = CancellationToken::new();
        let (_tx, body_rx) = mpsc::channel::<Result<Bytes, Infallible>>(1);
        let upstream = futures_util::stream::unfold(body_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        let rx = spawn_pipeline(
            upstream,
            EventStreamDecoder::default(),
            ResponseStreamTranscoder::new("m", 1),
            4,
            cancel.clone(),
        );
        cancel.cancel();
        let events = collect(rx).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_receiver_cancels_pipeline() {
        let cancel = CancellationToken::new();
        let frames: Vec<Vec<u8>> = (0..50)
            .map(|i| {
                encode_event_frame("assistantResponseEvent", &json!({"content": format!("chunk {i}")}))
                    .unwrap()
            })
            .collect();
        let mut rx = spawn_pipeline(
            futures_util::stream::iter(chunks(frames)),
            EventStreamDecoder::default(),
            ResponseStreamTranscoder::new("m", 1),
            1,
            cancel.clone(),
        );
        assert!(rx.recv().await.is_some());
        drop(rx);
        tokio::time::timeout(std::time::Duration::from_secs(5), cancel.cancelled())
            .await
            .unwrap();
    }
}
