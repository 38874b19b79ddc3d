pub use common::logging_stdout;
use common::GatewayConfig;
use common::proxy::RagflowClient;
use error::{Error, Result};
use std::sync::Arc;
use tracing::info;
use volo_http::Address;
use volo_http::server::{Router, Server};
use volo_http::utils::Extension;

pub mod error;
pub mod handlers;
pub mod tools;

/// State shared by every handler. Read-only once built.
#[derive(Debug, Clone)]
pub struct Gateway {
    pub config:  Arc<GatewayConfig>,
    pub ragflow: RagflowClient,
}

impl Gateway {
    /// Resolves the upstream endpoint, so a missing chat or agent id fails here.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let http = tools::build_http_client(&config)?;
        let ragflow = RagflowClient::new(&config, http)?;
        Ok(Self {
            config: Arc::new(config),
            ragflow,
        })
    }
}

pub fn router(gateway: Gateway) -> Router {
    Router::new()
        .merge(handlers::health_router())
        .merge(handlers::models_router())
        .merge(handlers::chat_completion_router())
        .layer(Extension(gateway))
}

pub async fn run_api_server(gateway: Gateway) -> Result<()> {
    let addr = gateway.config.listen_addr;
    info!(addr=%addr, upstream=%gateway.ragflow.endpoint(), "starting api server");
    let app = router(gateway);
    Server::new(app)
        .run(Address::from(addr))
        .await
        .map_err(|e| Error::Serve(e.to_string().into()))
}
