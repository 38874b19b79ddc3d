use crate::error::{Error, Result};
use common::GatewayConfig;
use reqwest::Client as ReqwestClient;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde_json::Value;
use std::time::Duration;
use volo_http::{body::Body, response::Response};

const POOL_IDLE_TIMEOUT: u64 = 90;

/// Shared outbound client. Per-request deadlines are applied by the relay,
/// so only connecting is bounded here.
#[inline]
pub fn build_http_client(config: &GatewayConfig) -> Result<ReqwestClient> {
    let builder = ReqwestClient::builder();
    let client = builder
        .connect_timeout(config.timeout)
        .pool_idle_timeout(Duration::from_secs(POOL_IDLE_TIMEOUT))
        .build()
        .map_err(|e| Error::FailedToBuildClient(e.to_string().into()))?;
    Ok(client)
}

#[inline]
pub fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// JSON response serialized with `serde_json`, keeping the key order of `value`.
pub fn json_response(status: StatusCode, value: &Value) -> Response {
    let mut response = Response::new(Body::from(value.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
