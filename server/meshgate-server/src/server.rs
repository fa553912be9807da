//! HTTP server wiring: system routes, the MCP WebSocket upgrade, and the
//! versioned control plane.

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use std::sync::Arc;

use meshgate::server::GatewayServer;

use crate::routes;
use crate::ws;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "localhost";

pub struct GatewayHttpServer {
    server: Arc<GatewayServer>,
}

impl GatewayHttpServer {
    pub fn new(server: Arc<GatewayServer>) -> Self {
        Self { server }
    }

    pub async fn start(&self, host: Option<String>, port: Option<u16>) -> Result<()> {
        let host = host.unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = port.unwrap_or(DEFAULT_PORT);

        self.server.start_background().await;

        tracing::info!("Starting meshgate on http://{}:{}", host, port);
        tracing::info!("  MCP WebSocket:  ws://{}:{}/mcp/ws", host, port);
        tracing::info!("  Control plane:  http://{}:{}/api/v1/tools", host, port);
        tracing::info!("  Metrics:        http://{}:{}/metrics", host, port);

        let server = self.server.clone();
        HttpServer::new(move || {
            App::new()
                .wrap(Logger::default())
                .wrap(
                    Cors::default()
                        .allow_any_origin()
                        .allow_any_method()
                        .allow_any_header()
                        .max_age(3600),
                )
                .app_data(web::Data::new(server.clone()))
                .configure(routes::system)
                .route("/mcp/ws", web::get().to(ws::mcp_ws))
                .service(web::scope("/api/v1").configure(routes::api_v1))
        })
        .bind((host, port))?
        .run()
        .await?;

        self.server.shutdown().await;
        Ok(())
    }
}
