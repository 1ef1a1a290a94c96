//! Self-observability: a single shared Prometheus registry plus the
//! health/readiness/metrics HTTP server, in the teacher's
//! `LazyLock<Registry>` + `axum::serve(...).with_graceful_shutdown(...)`
//! idiom (`commands/reconcile.rs`, `commands/watch.rs`), collapsed into one
//! registry since this crate runs a single combined process rather than the
//! teacher's several independent subcommands.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::sync::broadcast;
use tracing::info;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static SCRAPE_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new("epp_scrape_errors_total", "Total failed metric scrapes")
        .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static SCRAPE_DURATION_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    let h = Histogram::with_opts(HistogramOpts::new(
        "epp_scrape_duration_seconds",
        "Duration of one metric-refresh cycle in seconds",
    ))
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(h.clone())).expect("metric not yet registered");
    h
});

pub static SCHEDULE_DECISIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        Opts::new("epp_schedule_decisions_total", "Scheduling outcomes by result"),
        &["result"],
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static RECONCILE_EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        Opts::new("epp_reconcile_events_total", "Reconciler events processed by kind"),
        &["reconciler"],
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

/// Forces every lazily-registered metric to exist so `/metrics` reports a
/// zero value instead of omitting the series before first use.
pub fn install() {
    LazyLock::force(&SCRAPE_ERRORS_TOTAL);
    LazyLock::force(&SCRAPE_DURATION_SECONDS);
    LazyLock::force(&SCHEDULE_DECISIONS_TOTAL);
    LazyLock::force(&RECONCILE_EVENTS_TOTAL);
}

#[derive(Clone, Default)]
pub struct ReadinessState(Arc<AtomicBool>);

impl ReadinessState {
    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn build_router(readiness: ReadinessState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route(
            "/readyz",
            get(move || {
                let readiness = readiness.clone();
                async move {
                    if readiness.is_ready() {
                        (StatusCode::OK, "READY")
                    } else {
                        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
                    }
                }
            }),
        )
}

pub async fn start_server(
    readiness: ReadinessState,
    addr: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let app = build_router(readiness);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind health/metrics server on {addr}"))?;

    info!(%addr, "observability_server_started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buffer = Vec::new();
    match encoder.encode(&families, &mut buffer) {
        Ok(()) => match String::from_utf8(buffer) {
            Ok(body) => (StatusCode::OK, body),
            Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error".to_string()),
        },
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn healthz_is_always_ok() {
        let app = build_router(ReadinessState::default());
        let resp = app
            .oneshot(axum::http::Request::builder().uri("/healthz").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_reflects_readiness_state() {
        let readiness = ReadinessState::default();
        let app = build_router(readiness.clone());
        let resp = app
            .clone()
            .oneshot(axum::http::Request::builder().uri("/readyz").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        readiness.mark_ready();
        let resp = app
            .oneshot(axum::http::Request::builder().uri("/readyz").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_text() {
        install();
        let app = build_router(ReadinessState::default());
        let resp = app
            .oneshot(axum::http::Request::builder().uri("/metrics").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8(body.to_vec()).unwrap().contains("epp_scrape_errors_total"));
    }
}
