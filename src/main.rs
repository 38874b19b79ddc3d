use anyhow::Result;
use api_server::Gateway;
use common::GatewayConfig;
use dotenvy::dotenv;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let _guard = api_server::logging_stdout();

    let config = GatewayConfig::from_env()?;
    info!(mode=?config.mode, model_id=%config.model_id, "loaded configuration");

    let gateway = Gateway::new(config)?;

    api_server::run_api_server(gateway).await?;

    Ok(())
}
