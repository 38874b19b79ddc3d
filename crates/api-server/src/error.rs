use faststr::FastStr;
use reqwest::StatusCode;
use serde_json::{Value, json};
use thiserror::Error;
use volo_http::{response::Response, server::IntoResponse};

use crate::tools::json_response;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid request body: {0}")]
    InvalidRequestBody(#[from] serde_json::Error),

    #[error(transparent)]
    Gateway(#[from] common::error::Error),

    #[error("failed to build client: {0}")]
    FailedToBuildClient(FastStr),

    #[error("server error: {0}")]
    Serve(FastStr),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status(&self) -> StatusCode {
        use common::error::Error as GatewayError;
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::Gateway(e) => match e {
                GatewayError::Upstream { status, .. } => *status,
                GatewayError::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
                GatewayError::Connection(_) | GatewayError::InvalidResponseData(..) => {
                    StatusCode::BAD_GATEWAY
                }
                GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::FailedToBuildClient(_) | Self::Serve(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body of the `detail` field. Upstream rejections are passed back as-is.
    pub fn detail(self) -> Value {
        use common::error::Error as GatewayError;
        match self {
            Self::Gateway(GatewayError::Upstream { detail, .. }) => detail,
            Self::Gateway(GatewayError::Connection(msg)) => Value::String(msg.to_string()),
            Self::Gateway(GatewayError::InvalidResponseData(body, _)) => {
                Value::String(body.to_string())
            }
            other => Value::String(other.to_string()),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        json_response(status, &json!({ "detail": self.detail() }))
    }
}
