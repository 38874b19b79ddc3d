pub mod config;
pub mod data;
pub mod error;
pub mod proxy;
pub mod stream;

mod log;

pub use config::{GatewayConfig, Mode};
pub use log::logging_stdout;
pub use reqwest::RequestBuilder;
