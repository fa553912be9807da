//! Route mounting: the versioned control plane and the unauthenticated
//! system surface (health probes and Prometheus metrics).

pub mod tools;

use actix_web::{web, HttpResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use serde_json::json;

/// Global recorder; installed once per process.
static PROMETHEUS: Lazy<PrometheusHandle> = Lazy::new(|| {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("install prometheus recorder")
});

/// Control-plane routes under the versioned prefix.
pub fn api_v1(cfg: &mut web::ServiceConfig) {
    tools::configure(cfg);
}

/// Unauthenticated system endpoints.
pub fn system(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/healthz", web::get().to(health))
        .route("/readyz", web::get().to(ready))
        .route("/metrics", web::get().to(metrics));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "meshgate",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn ready() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ready" }))
}

async fn metrics() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(PROMETHEUS.render())
}
