//! HTTP server exposing the telemetry read-side.
//!
//! Two endpoints: `/metrics` in Prometheus text format and `/health` for
//! liveness probes.

use crate::metrics;
use axum::http::header::CONTENT_TYPE;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tracing::info;

pub struct HttpMetricsServer {
    addr: SocketAddr,
}

impl HttpMetricsServer {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Serve until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> crate::Result<()> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler));

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!("metrics endpoint listening on http://{}/metrics", self.addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                info!("metrics endpoint shutting down");
            })
            .await?;
        Ok(())
    }
}

async fn metrics_handler() -> ([(axum::http::HeaderName, &'static str); 1], String) {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        metrics::encode_text(),
    )
}

async fn health_handler() -> ([(axum::http::HeaderName, &'static str); 1], &'static str) {
    (
        [(CONTENT_TYPE, "application/json")],
        r#"{"status":"healthy","service":"kafka-sniffer"}"#,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_handler_emits_text_format() {
        crate::metrics::REQUESTS_COUNT
            .with_label_values(&["192.0.2.80", "metadata", "1"])
            .inc();
        let (headers, body) = metrics_handler().await;
        assert_eq!(headers[0].1, "text/plain; version=0.0.4; charset=utf-8");
        assert!(body.contains("kafka_sniffer_typed_requests_total"));
    }
}
