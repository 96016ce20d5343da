use anyhow::Result;
use redis_lite::config::ServerConfig;
use redis_lite::server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_args(std::env::args().skip(1))?;
    let server = Server::setup(config).await?;
    info!("listening on {}", server.local_addr());
    server.run().await
}
