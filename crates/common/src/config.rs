use crate::error::{Error, Result};
use faststr::FastStr;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://ragflow-gpu:9380";
pub const DEFAULT_MODEL_ID: &str = "ragflow-kb";
pub const DEFAULT_TIMEOUT_SECS: f64 = 300.0;
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";

/// Which RAGFlow resource the gateway talks to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Chat,
    Agent,
}

impl From<&str> for Mode {
    fn from(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("agent") {
            Mode::Agent
        } else {
            Mode::Chat
        }
    }
}

/// Process-wide settings. Built once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url:    FastStr,
    pub api_key:     Option<FastStr>,
    pub mode:        Mode,
    pub chat_id:     Option<FastStr>,
    pub agent_id:    Option<FastStr>,
    pub model_id:    FastStr,
    pub model_name:  FastStr,
    pub timeout:     Duration,
    pub listen_addr: SocketAddr,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url:    FastStr::from_static_str(DEFAULT_BASE_URL),
            api_key:     None,
            mode:        Mode::Chat,
            chat_id:     None,
            agent_id:    None,
            model_id:    FastStr::from_static_str(DEFAULT_MODEL_ID),
            model_name:  FastStr::from_static_str(DEFAULT_MODEL_ID),
            timeout:     Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads every setting through `lookup`, applying defaults for unset or
    /// empty values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let base_url = var("RAGFLOW_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        let model_id = var("MODEL_ID").unwrap_or_else(|| DEFAULT_MODEL_ID.to_owned());
        let model_name = var("MODEL_NAME").unwrap_or_else(|| model_id.clone());
        let mode = var("RAGFLOW_MODE")
            .map(|m| Mode::from(m.as_str()))
            .unwrap_or_default();

        let timeout = match var("HTTP_TIMEOUT") {
            Some(raw) => parse_timeout(&raw)?,
            None => Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
        };

        let listen_addr = var("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_owned());
        let listen_addr = listen_addr.parse().map_err(|_| {
            Error::Config(format!("LISTEN_ADDR is not a socket address: {listen_addr}").into())
        })?;

        Ok(Self {
            base_url: trim_base_url(&base_url),
            api_key: var("RAGFLOW_API_KEY").map(FastStr::from),
            mode,
            chat_id: var("RAGFLOW_CHAT_ID").map(FastStr::from),
            agent_id: var("RAGFLOW_AGENT_ID").map(FastStr::from),
            model_id: model_id.into(),
            model_name: model_name.into(),
            timeout,
            listen_addr,
        })
    }
}

#[inline]
pub fn trim_base_url(url: &str) -> FastStr {
    url.trim_end_matches('/').to_owned().into()
}

fn parse_timeout(raw: &str) -> Result<Duration> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("HTTP_TIMEOUT is not a number: {raw}").into()))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(Error::Config(
            format!("HTTP_TIMEOUT must be positive: {raw}").into(),
        ));
    }
    Ok(Duration::from_secs_f64(secs))
}
