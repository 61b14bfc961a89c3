use std::sync::Arc;

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Order lifecycle counters, registered with a dedicated registry and scraped
// via /metrics on a separate port from the API itself.
//
// ============================================================================

pub struct Metrics {
    registry: Registry,

    /// Order engine operations by operation ("create"/"replace"/"delete")
    /// and outcome ("ok"/"error").
    pub order_operations: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let order_operations = IntCounterVec::new(
            Opts::new("order_operations_total", "Order engine operations"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(order_operations.clone()))?;

        Ok(Self {
            registry,
            order_operations,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_order_operation(&self, operation: &str, success: bool) {
        let outcome = if success { "ok" } else { "error" };
        self.order_operations
            .with_label_values(&[operation, outcome])
            .inc();
    }
}

/// Start the metrics HTTP server. Runs alongside the API server on its own
/// port so scrapes never contend with request traffic.
pub async fn start_metrics_server(registry: Arc<Registry>, port: u16) -> std::io::Result<()> {
    tracing::info!("Starting metrics server on http://0.0.0.0:{}/metrics", port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .route("/metrics", web::get().to(metrics_handler))
            .route("/health", web::get().to(health_handler))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

async fn metrics_handler(registry: web::Data<Arc<Registry>>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "storefront",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert!(!metrics.registry.gather().is_empty());
    }

    #[test]
    fn test_record_order_operation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_order_operation("create", true);
        metrics.record_order_operation("create", false);
        metrics.record_order_operation("delete", true);

        let gathered = metrics.registry.gather();
        let ops = gathered
            .iter()
            .find(|m| m.name() == "order_operations_total")
            .unwrap();
        assert_eq!(ops.metric.len(), 3); // Three distinct label pairs
    }
}
