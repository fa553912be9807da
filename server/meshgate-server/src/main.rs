use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use meshgate::coordinator::{Coordinator, CoordinationStore, InMemoryCoordinationStore};
use meshgate::{init_logging, GatewayConfig, GatewayServer};
use meshgate_server::GatewayHttpServer;

#[derive(Parser, Debug)]
#[command(name = "meshgate-server", about = "Multi-tenant MCP tool-integration gateway")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, env = "MESHGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the configured bind port.
    #[arg(long)]
    port: Option<u16>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut config = match &cli.config {
        Some(path) => GatewayConfig::from_yaml_file(path)?,
        None => {
            let mut config = GatewayConfig::default();
            config.apply_env();
            config
        }
    };
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    let host = config.server.host.clone();
    let port = config.server.port;

    let coordination_store = build_coordination_store(&config)?;
    let coordinator = Arc::new(Coordinator::new(
        config.coordinator.clone(),
        coordination_store,
    ));

    let server = GatewayServer::new(config)?;
    coordinator.clone().start().await;

    let result = GatewayHttpServer::new(server)
        .start(Some(host), Some(port))
        .await;

    coordinator.stop().await;
    result
}

#[cfg(feature = "redis")]
fn build_coordination_store(config: &GatewayConfig) -> anyhow::Result<Arc<dyn CoordinationStore>> {
    match &config.redis {
        Some(redis) => Ok(Arc::new(
            meshgate::coordinator::store::RedisCoordinationStore::new(
                &redis.url,
                redis.prefix.clone(),
            )?,
        )),
        None => Ok(Arc::new(InMemoryCoordinationStore::new())),
    }
}

#[cfg(not(feature = "redis"))]
fn build_coordination_store(config: &GatewayConfig) -> anyhow::Result<Arc<dyn CoordinationStore>> {
    if config.redis.is_some() {
        anyhow::bail!("redis coordination requires the `redis` feature");
    }
    Ok(Arc::new(InMemoryCoordinationStore::new()))
}
