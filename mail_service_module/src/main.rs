use mail_service_module::service::{run_server, ServiceConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = ServiceConfig::from_env()?;
    info!("starting MajuMail ({} environment)", config.app_env);
    run_server(config, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for shutdown signal: {}", err);
        }
        info!("shutdown requested");
    })
    .await
}
