use bytes::{Buf, Bytes, BytesMut};
use futures_util::Stream;
use tokio_util::codec::Decoder;

use super::frame::{parse_frame, prelude_checksum_ok, read_u32_be, Frame, MIN_FRAME_LEN, PRELUDE_LEN};

pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub frames: u64,
    pub skipped_frames: u64,
    pub discarded_bytes: u64,
}

/// Incremental frame decoder.
///
/// Bytes are fed in arbitrary chunks; complete frames are pulled with
/// [`EventStreamDecoder::next_frame`]. A frame that is not fully buffered
/// yet is left in place until more bytes arrive.
///
/// Corruption is handled without surfacing an error:
/// - an untrustworthy prelude (bad length or bad prelude checksum) drops one
///   byte and re-synchronizes on the next offset;
/// - a frame with a sane prelude but a bad body is skipped by its declared
///   length.
#[derive(Debug)]
pub struct EventStreamDecoder {
    buffer: BytesMut,
    validate_checksums: bool,
    max_frame_len: usize,
    resyncing: bool,
    stats: DecoderStats,
}

impl EventStreamDecoder {
    #[must_use]
    pub fn new(validate_checksums: bool, max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            validate_checksums,
            max_frame_len: max_frame_len.max(MIN_FRAME_LEN),
            resyncing: false,
            stats: DecoderStats::default(),
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    #[must_use]
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Bytes buffered but not yet consumed as a frame.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_frame(&mut self) -> Option<Frame> {
        let mut buffer = std::mem::take(&mut self.buffer);
        let frame = self.decode_from(&mut buffer);
        self.buffer = buffer;
        frame
    }

    fn decode_from(&mut self, buffer: &mut BytesMut) -> Option<Frame> {
        loop {
            if buffer.len() < PRELUDE_LEN {
                return None;
            }

            let total = read_u32_be(buffer, 0) as usize;
            if !self.prelude_trusted(total, &buffer[..PRELUDE_LEN]) {
                if !self.resyncing {
                    tracing::warn!(
                        declared_len = total,
                        "event-stream prelude rejected, re-synchronizing"
                    );
                    self.resyncing = true;
                }
                buffer.advance(1);
                self.stats.discarded_bytes += 1;
                continue;
            }

            if buffer.len() < total {
                return None;
            }

            let raw: Bytes = buffer.split_to(total).freeze();
            match parse_frame(&raw, self.validate_checksums) {
                Ok(frame) => {
                    self.resyncing = false;
                    self.stats.frames += 1;
                    return Some(frame);
                }
                Err(err) => {
                    self.stats.skipped_frames += 1;
                    tracing::warn!(frame_len = total, "skipping malformed event-stream frame: {err}");
                }
            }
        }
    }

    fn prelude_trusted(&self, total: usize, prelude: &[u8]) -> bool {
        if total < MIN_FRAME_LEN || total > self.max_frame_len {
            return false;
        }
        !self.validate_checksums || prelude_checksum_ok(prelude)
    }
}

/// Codec form of the decoder for `FramedRead` over any `AsyncRead`.
///
/// Corrupt input never surfaces as a decode error; it is skipped or
/// re-synchronized exactly as in [`EventStreamDecoder::next_frame`]. A
/// partial frame left at end of input is dropped.
impl Decoder for EventStreamDecoder {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        Ok(self.decode_from(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        let frame = self.decode_from(src);
        if frame.is_none() && !src.is_empty() {
            tracing::debug!(
                trailing_bytes = src.len(),
                "event stream ended with an incomplete frame"
            );
            src.clear();
        }
        Ok(frame)
    }
}

impl Default for EventStreamDecoder {
    fn default() -> Self {
        Self::new(true, DEFAULT_MAX_FRAME_BYTES)
    }
}

/// Turn a byte stream into a stream of frames.
///
/// Ends when the byte stream ends. A read error is yielded once and ends the
/// stream.
pub fn frame_stream<S, E>(
    byte_stream: S,
    decoder: EventStreamDecoder,
) -> impl Stream<Item = Result<Frame, E>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (Box::pin(byte_stream), decoder, false),
        |(mut stream, mut decoder, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some(frame) = decoder.next_frame() {
                    return Some((Ok(frame), (stream, decoder, false)));
                }
                match stream.as_mut().next().await {
                    Some(Ok(chunk)) => decoder.feed(&chunk),
                    Some(Err(err)) => return Some((Err(err), (stream, decoder, true))),
                    None => {
                        let stats = decoder.stats();
                        if decoder.buffered_len() > 0 {
                            tracing::debug!(
                                trailing_bytes = decoder.buffered_len(),
                                "event stream ended with an incomplete frame"
                            );
                        }
                        tracing::debug!(
                            frames = stats.frames,
                            skipped_frames = stats.skipped_frames,
                            discarded_bytes = stats.discarded_bytes,
                            "event stream finished"
                        );
                        return None;
                    }
                }
            }
        },
    )
}
