use crate::Gateway;
use crate::error::Error;
use crate::tools::json_response;
use bytes::Bytes;
use common::proxy::RelayOutcome;
use common::stream::UpstreamLines;
use futures_util::StreamExt;
use http_body::Frame;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use volo_http::{
    body::Body,
    response::Response,
    server::{
        IntoResponse,
        route::{Router, post},
    },
    utils::Extension,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Lines held between the upstream reader and a slow caller.
const STREAM_BUFFER: usize = 32;

async fn chat_completion_handler(Extension(gateway): Extension<Gateway>, body: Bytes) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!("rejecting malformed chat completion body: {err}");
            return Error::from(err).into_response();
        }
    };

    match gateway.ragflow.chat_completions(payload).await {
        Ok(RelayOutcome::Buffered(data)) => json_response(StatusCode::OK, &data),
        Ok(RelayOutcome::Streamed(lines)) => create_stream_response(lines),
        Err(err) => {
            let err = Error::from(err);
            info!(status=%err.status(), "chat completion failed: {err}");
            err.into_response()
        }
    }
}

/// Relays upstream lines to the caller as they arrive.
///
/// A dropped receiver means the caller went away: the relay task stops at
/// once, even while waiting on upstream, and drops the upstream response,
/// closing that connection.
fn create_stream_response(mut lines: UpstreamLines) -> Response {
    let (tx, rx) = mpsc::channel::<Bytes>(STREAM_BUFFER);
    tokio::spawn(async move {
        let mut relayed = 0usize;
        loop {
            let line = tokio::select! {
                _ = tx.closed() => None,
                line = lines.next() => match line {
                    Some(line) => Some(line),
                    None => {
                        debug!(relayed, "stream relay finished");
                        return;
                    }
                },
            };
            let Some(line) = line else { break };
            if tx.send(line).await.is_err() {
                break;
            }
            relayed += 1;
        }
        info!(relayed, "caller disconnected, closing upstream stream");
    });

    let stream = ReceiverStream::new(rx).map(|line| Ok::<_, BoxError>(Frame::data(line)));
    let mut response = Response::new(Body::from_stream(stream));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    response
}

pub fn chat_completion_router() -> Router {
    Router::new().route("/v1/chat/completions", post(chat_completion_handler))
}
