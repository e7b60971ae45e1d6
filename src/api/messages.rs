use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::auth::extract_credential;
use crate::error::GatewayError;
use crate::observability::token_counter::estimate_request_tokens;
use crate::protocol::anthropic::MessagesRequest;
use crate::state::AppState;
use crate::stream::{spawn_pipeline, NonStreamAggregator, ResponseStreamTranscoder};
use crate::util::generate_uuid;

/// `POST /v1/messages`.
pub async fn handler(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    match handle(&state, &headers, &body).await {
        Ok(response) => response,
        Err(err) => {
            tracing::debug!(status = err.status().as_u16(), "messages request failed: {err}");
            err.into_response()
        }
    }
}

async fn handle(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<Response, GatewayError> {
    let credential = extract_credential(headers)?;
    let request: MessagesRequest = serde_json::from_slice(body)
        .map_err(|err| GatewayError::InvalidRequest(format!("Invalid request: {err}")))?;
    let access_token = state.auth.resolve(credential).await?;

    let upstream_request = state.request_transcoder.transcode(&request, None);
    let input_tokens = estimate_request_tokens(&request);
    tracing::debug!(
        model = %request.model,
        stream = request.stream,
        history = upstream_request.conversation_state.history.len(),
        input_tokens,
        "forwarding messages request"
    );

    let upstream_response = state.upstream.send(&access_token, &upstream_request).await?;
    let transcoder = ResponseStreamTranscoder::new(request.model.clone(), input_tokens)
        .with_conversation_id(upstream_request.conversation_state.conversation_id);
    let cancel = CancellationToken::new();
    let events = spawn_pipeline(
        upstream_response.bytes_stream(),
        state.new_decoder(),
        transcoder,
        state.pipeline_capacity(),
        cancel.clone(),
    );

    if request.stream {
        Ok(streaming_response(events, cancel.drop_guard()))
    } else {
        Ok(aggregated_response(events, cancel.drop_guard(), request.model).await)
    }
}

/// Body that forwards pipeline output as it arrives. Dropping the body,
/// as happens when the client disconnects, cancels the pipeline.
fn streaming_response(events: mpsc::Receiver<String>, guard: DropGuard) -> Response {
    let stream = futures_util::stream::unfold((events, guard), |(mut events, guard)| async move {
        let event = events.recv().await?;
        Some((Ok::<_, Infallible>(Bytes::from(event)), (events, guard)))
    });

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

async fn aggregated_response(
    mut events: mpsc::Receiver<String>,
    _guard: DropGuard,
    model: String,
) -> Response {
    let mut aggregator = NonStreamAggregator::new();
    while let Some(event) = events.recv().await {
        aggregator.push_event(&event);
    }
    let response = aggregator.finish(format!("msg_{}", generate_uuid()), model);
    Json(response).into_response()
}
