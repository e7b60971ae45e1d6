use std::sync::Arc;

use crate::auth::AuthProvider;
use crate::config::AppConfig;
use crate::eventstream::EventStreamDecoder;
use crate::protocol::upstream::{RequestTranscoder, TranscodeOptions};
use crate::transport::UpstreamClient;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub upstream: UpstreamClient,
    pub auth: Arc<dyn AuthProvider>,
    pub request_transcoder: RequestTranscoder,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, upstream: UpstreamClient, auth: Arc<dyn AuthProvider>) -> Self {
        let request_transcoder = RequestTranscoder::new(TranscodeOptions::from_config(&config));
        Self {
            config,
            upstream,
            auth,
            request_transcoder,
        }
    }

    /// A fresh frame decoder configured for the upstream stream.
    #[must_use]
    pub fn new_decoder(&self) -> EventStreamDecoder {
        EventStreamDecoder::new(
            self.config.upstream.validate_checksums,
            self.config.upstream.max_frame_bytes,
        )
    }

    #[must_use]
    pub fn pipeline_capacity(&self) -> usize {
        self.config.server.pipeline_queue_capacity.max(1)
    }
}
