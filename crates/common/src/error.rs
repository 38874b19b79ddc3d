use faststr::FastStr;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Config(FastStr),
    #[error("{0}")]
    Connection(FastStr),
    #[error("Upstream error: status: {status}, detail: {detail}")]
    Upstream { status: StatusCode, detail: Value },
    #[error("Invalid response data: {0} status: {1}")]
    InvalidResponseData(FastStr, u16),
    #[error("Invalid request body: {0}")]
    InvalidRequestBody(FastStr),
}

impl Error {
    pub fn connection<E: std::fmt::Display>(err: E) -> Self {
        Self::Connection(format!("Upstream connection error: {err}").into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
