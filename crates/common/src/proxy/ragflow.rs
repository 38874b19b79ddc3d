use crate::RequestBuilder;
use crate::config::{GatewayConfig, Mode};
use crate::data::{RequestData, is_truthy};
use crate::error::{Error, Result};
use crate::stream::{LineStream, UpstreamLines};

use faststr::FastStr;
use futures_util::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// Picks the RAGFlow OpenAI-compatible endpoint for the configured mode.
///
/// Agent mode needs `agent_id`, every other mode needs `chat_id`. Trailing
/// slashes of `base_url` are dropped so the result never contains `//`
/// between the base and the path.
pub fn ragflow_endpoint(
    mode: Mode,
    chat_id: Option<&str>,
    agent_id: Option<&str>,
    base_url: &str,
) -> Result<FastStr> {
    let base = base_url.trim_end_matches('/');
    match mode {
        Mode::Agent => {
            let agent_id = agent_id.filter(|id| !id.is_empty()).ok_or_else(|| {
                Error::Config("RAGFLOW_AGENT_ID is required when RAGFLOW_MODE=agent".into())
            })?;
            Ok(format!("{base}/api/v1/agents_openai/{agent_id}/chat/completions").into())
        }
        Mode::Chat => {
            let chat_id = chat_id.filter(|id| !id.is_empty()).ok_or_else(|| {
                Error::Config("RAGFLOW_CHAT_ID is required when RAGFLOW_MODE=chat".into())
            })?;
            Ok(format!("{base}/api/v1/chats_openai/{chat_id}/chat/completions").into())
        }
    }
}

pub enum RelayOutcome {
    /// Upstream JSON document, untouched.
    Buffered(Value),
    Streamed(UpstreamLines),
}

impl std::fmt::Debug for RelayOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffered(v) => f.debug_tuple("Buffered").field(v).finish(),
            Self::Streamed(_) => f.write_str("Streamed(..)"),
        }
    }
}

/// Forwards chat completions to a single RAGFlow chat or agent.
#[derive(Debug, Clone)]
pub struct RagflowClient {
    endpoint: FastStr,
    api_key:  Option<FastStr>,
    model_id: FastStr,
    timeout:  Duration,
    http:     reqwest::Client,
}

impl RagflowClient {
    /// Fails with [`Error::Config`] when the identifier required by the mode
    /// is missing, before any request can be made.
    pub fn new(config: &GatewayConfig, http: reqwest::Client) -> Result<Self> {
        let endpoint = ragflow_endpoint(
            config.mode,
            config.chat_id.as_deref(),
            config.agent_id.as_deref(),
            &config.base_url,
        )?;
        Ok(Self {
            endpoint,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model_id: config.model_id.clone(),
            timeout: config.timeout,
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn chat_completions(&self, payload: Value) -> Result<RelayOutcome> {
        let request_data = self.prepare_chat_completions(payload)?;
        let stream = request_data.stream;
        info!(url=%request_data.url, stream, "forwarding chat completion");
        let builder = request_builder(request_data, &self.http);
        if stream {
            chat_completions_streaming(builder, self.timeout).await
        } else {
            chat_completions_buffered(builder, self.timeout).await
        }
    }

    fn prepare_chat_completions(&self, mut payload: Value) -> Result<RequestData> {
        default_model(&mut payload, &self.model_id)?;
        let mut request_data = RequestData::new(self.endpoint.clone(), payload);
        if let Some(key) = &self.api_key {
            request_data.bearer_auth(key.clone());
        }
        Ok(request_data)
    }
}

/// Sets `model` to `model_id` when it is absent or falsy.
pub fn default_model(payload: &mut Value, model_id: &str) -> Result<()> {
    let body = payload
        .as_object_mut()
        .ok_or_else(|| Error::InvalidRequestBody("expected a JSON object".into()))?;
    if !body.get("model").is_some_and(is_truthy) {
        body.insert("model".to_owned(), Value::String(model_id.to_owned()));
    }
    Ok(())
}

fn request_builder(request_data: RequestData, client: &reqwest::Client) -> RequestBuilder {
    let RequestData {
        url, body, headers, ..
    } = request_data;
    let mut builder = client.post(url.as_str());
    for (k, v) in headers {
        builder = builder.header(k.as_str(), v.as_str());
    }
    builder = builder.json(&body);
    builder
}

async fn chat_completions_buffered(
    builder: RequestBuilder,
    timeout: Duration,
) -> Result<RelayOutcome> {
    let resp = builder.timeout(timeout).send().await.map_err(Error::connection)?;
    let resp = check_status(resp).await?;
    let status = resp.status().as_u16();
    let text = resp.text().await.map_err(Error::connection)?;
    match serde_json::from_str(&text) {
        Ok(data) => Ok(RelayOutcome::Buffered(data)),
        Err(e) => {
            warn!(status, "upstream returned a non-JSON body: {e}");
            Err(Error::InvalidResponseData(text.into(), status))
        }
    }
}

/// Connecting, the response head and a rejected request's error body are
/// bounded by `timeout`; a successful body may stream for as long as upstream
/// keeps it open.
async fn chat_completions_streaming(
    builder: RequestBuilder,
    timeout: Duration,
) -> Result<RelayOutcome> {
    let deadline = Instant::now() + timeout;
    let elapsed = |_: time::error::Elapsed| Error::connection(format!("no response within {timeout:?}"));
    let resp = time::timeout_at(deadline, builder.send())
        .await
        .map_err(elapsed)?
        .map_err(Error::connection)?;
    let resp = time::timeout_at(deadline, check_status(resp))
        .await
        .map_err(elapsed)??;
    debug!(status=%resp.status(), "upstream stream opened");
    Ok(RelayOutcome::Streamed(LineStream::new(
        resp.bytes_stream().boxed(),
    )))
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.map_err(Error::connection)?;
    let detail = serde_json::from_str(&text).unwrap_or(Value::String(text));
    warn!(status=%status, detail=%detail, "upstream rejected chat completion");
    Err(Error::Upstream { status, detail })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use mockito::{Matcher, Server};
    use reqwest::StatusCode;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const CHAT_PATH: &str = "/api/v1/chats_openai/abc123/chat/completions";

    fn chat_config(base_url: &str) -> GatewayConfig {
        GatewayConfig {
            base_url: base_url.to_owned().into(),
            chat_id: Some("abc123".into()),
            ..Default::default()
        }
    }

    fn client(config: &GatewayConfig) -> RagflowClient {
        RagflowClient::new(config, reqwest::Client::new()).unwrap()
    }

    #[test]
    fn test_chat_endpoint() {
        let url = ragflow_endpoint(Mode::Chat, Some("abc123"), None, "http://x:9380/").unwrap();
        assert_eq!(url, "http://x:9380/api/v1/chats_openai/abc123/chat/completions");
    }

    #[test]
    fn test_agent_endpoint() {
        let url = ragflow_endpoint(Mode::Agent, Some("ignored"), Some("ag1"), "http://x:9380").unwrap();
        assert_eq!(url, "http://x:9380/api/v1/agents_openai/ag1/chat/completions");
    }

    #[test]
    fn test_missing_ids() {
        let err = ragflow_endpoint(Mode::Chat, None, Some("ag1"), "http://x").unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("RAGFLOW_CHAT_ID")));

        let err = ragflow_endpoint(Mode::Chat, Some(""), None, "http://x").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = ragflow_endpoint(Mode::Agent, Some("abc"), None, "http://x").unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("RAGFLOW_AGENT_ID")));
    }

    #[test]
    fn test_client_requires_id() {
        let config = GatewayConfig {
            mode: Mode::Agent,
            chat_id: Some("abc123".into()),
            ..Default::default()
        };
        let res = RagflowClient::new(&config, reqwest::Client::new());
        assert!(matches!(res, Err(Error::Config(_))));
    }

    #[test]
    fn test_default_model() {
        for payload in [json!({}), json!({"model": ""}), json!({"model": null})] {
            let mut payload = payload;
            default_model(&mut payload, "ragflow-kb").unwrap();
            assert_eq!(payload["model"], "ragflow-kb");
        }

        let mut payload = json!({"model": "custom", "messages": [], "stream": true});
        default_model(&mut payload, "ragflow-kb").unwrap();
        assert_eq!(payload, json!({"model": "custom", "messages": [], "stream": true}));

        let mut payload = json!([1, 2]);
        assert!(matches!(
            default_model(&mut payload, "ragflow-kb"),
            Err(Error::InvalidRequestBody(_))
        ));
    }

    #[tokio::test]
    async fn test_buffered_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", CHAT_PATH)
            .match_header("content-type", "application/json")
            .match_header("authorization", Matcher::Missing)
            .match_body(Matcher::Json(json!({
                "model": "ragflow-kb",
                "messages": [{"role": "user", "content": "hi"}],
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"x","choices":[]}"#)
            .create_async()
            .await;

        let client = client(&chat_config(&format!("{}/", server.url())));
        let outcome = client
            .chat_completions(json!({"messages": [{"role": "user", "content": "hi"}]}))
            .await
            .unwrap();

        match outcome {
            RelayOutcome::Buffered(data) => {
                assert_eq!(data, json!({"id": "x", "choices": []}));
                assert_eq!(data.to_string(), r#"{"id":"x","choices":[]}"#);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_bearer_auth() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", CHAT_PATH)
            .match_header("authorization", "Bearer ragflow-key")
            .match_body(Matcher::PartialJson(json!({"model": "mine"})))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let config = GatewayConfig {
            api_key: Some("ragflow-key".into()),
            ..chat_config(&server.url())
        };
        client(&config)
            .chat_completions(json!({"model": "mine", "messages": []}))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upstream_json_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", CHAT_PATH)
            .with_status(404)
            .with_body(r#"{"error":"not found"}"#)
            .create_async()
            .await;

        let err = client(&chat_config(&server.url()))
            .chat_completions(json!({"messages": []}))
            .await
            .unwrap_err();
        match err {
            Error::Upstream { status, detail } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(detail, json!({"error": "not found"}));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upstream_text_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", CHAT_PATH)
            .with_status(503)
            .with_body("service unavailable")
            .create_async()
            .await;

        let err = client(&chat_config(&server.url()))
            .chat_completions(json!({"stream": true}))
            .await
            .unwrap_err();
        match err {
            Error::Upstream { status, detail } => {
                assert_eq!(status.as_u16(), 503);
                assert_eq!(detail, json!("service unavailable"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_json_success_body() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", CHAT_PATH)
            .with_status(200)
            .with_body("<html></html>")
            .create_async()
            .await;

        let err = client(&chat_config(&server.url()))
            .chat_completions(json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidResponseData(ref body, 200) if body.as_str() == "<html></html>"));
    }

    #[tokio::test]
    async fn test_streamed_lines() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", CHAT_PATH)
            .match_body(Matcher::PartialJson(json!({"stream": true})))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("a\n\nb\n")
            .create_async()
            .await;

        let outcome = client(&chat_config(&server.url()))
            .chat_completions(json!({"stream": true, "messages": []}))
            .await
            .unwrap();
        let RelayOutcome::Streamed(lines) = outcome else {
            panic!("expected a stream");
        };
        let lines: Vec<Bytes> = lines.collect().await;
        assert_eq!(lines, vec![Bytes::from("a\n"), Bytes::from("b\n")]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&chat_config(&format!("http://{addr}")))
            .chat_completions(json!({}))
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::Connection(ref m) if m.starts_with("Upstream connection error:"))
        );
    }

    #[tokio::test]
    async fn test_timeout_before_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = GatewayConfig {
            timeout: Duration::from_millis(200),
            ..chat_config(&format!("http://{addr}"))
        };
        let client = client(&config);
        for payload in [json!({}), json!({"stream": true})] {
            let err = client.chat_completions(payload).await.unwrap_err();
            assert!(matches!(err, Error::Connection(_)), "unexpected error: {err:?}");
        }
    }

    /// Serves one connection: writes `head`, then each part after its delay,
    /// then keeps the socket open without sending anything else.
    async fn scripted_upstream(
        head: &'static str,
        parts: Vec<(Duration, &'static str)>,
    ) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(head.as_bytes()).await.unwrap();
            for (delay, part) in parts {
                time::sleep(delay).await;
                socket.write_all(part.as_bytes()).await.unwrap();
            }
            time::sleep(Duration::from_secs(30)).await;
        });
        addr
    }

    #[tokio::test]
    async fn test_stalled_error_body_times_out() {
        let addr = scripted_upstream(
            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 100\r\n\r\n",
            vec![(Duration::ZERO, "oops")],
        )
        .await;
        let config = GatewayConfig {
            timeout: Duration::from_millis(200),
            ..chat_config(&format!("http://{addr}"))
        };

        let res = time::timeout(
            Duration::from_secs(3),
            client(&config).chat_completions(json!({"stream": true})),
        )
        .await
        .expect("rejected stream must be reported within the timeout");
        assert!(matches!(res, Err(Error::Connection(_))), "unexpected result: {res:?}");
    }

    #[tokio::test]
    async fn test_stream_outlives_timeout() {
        let addr = scripted_upstream(
            "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n",
            vec![
                (Duration::ZERO, "2\r\na\n\r\n"),
                (Duration::from_millis(600), "2\r\nb\n\r\n"),
                (Duration::ZERO, "0\r\n\r\n"),
            ],
        )
        .await;
        let config = GatewayConfig {
            timeout: Duration::from_millis(200),
            ..chat_config(&format!("http://{addr}"))
        };

        let outcome = client(&config)
            .chat_completions(json!({"stream": true}))
            .await
            .unwrap();
        let RelayOutcome::Streamed(lines) = outcome else {
            panic!("expected a stream");
        };
        let lines: Vec<Bytes> = lines.collect().await;
        assert_eq!(lines, vec![Bytes::from("a\n"), Bytes::from("b\n")]);
    }
}
