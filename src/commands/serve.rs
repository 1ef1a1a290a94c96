//! `epp serve`: wires the datastore, metrics provider, scheduler, the three
//! reconcilers, the ext-proc gRPC server, and the health/metrics HTTP server
//! together, in the teacher's `commands::reconcile::run`/`watch::run`
//! broadcast-shutdown idiom.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use kube::Client;
use tokio::signal;
use tokio::sync::broadcast;
use tonic::transport::Server;
use tracing::{error, info};

use epp::config::ServeConfig;
use epp::datastore::Datastore;
use epp::extproc::proto::external_processor_server::ExternalProcessorServer;
use epp::extproc::ExtProcService;
use epp::metrics::scrape::ReqwestScraper;
use epp::metrics::MetricsProvider;
use epp::observability::{self, ReadinessState};
use epp::reconcilers::{endpointslice, model, pool};
use epp::scheduler::Scheduler;

use crate::cli::ServeArgs;

fn init_tracing(log_json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = std::env::var("EPP_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = fmt().with_env_filter(filter);
    if log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

impl From<ServeArgs> for ServeConfig {
    fn from(args: ServeArgs) -> Self {
        ServeConfig {
            grpc_addr: SocketAddr::from(([0, 0, 0, 0], args.port)),
            health_addr: SocketAddr::from(([0, 0, 0, 0], args.health_port)),
            target_pod_header: args.target_pod_header,
            pool_name: args.pool_name,
            pool_namespace: args.pool_namespace,
            service_name: args.service_name,
            zone: args.zone,
            refresh_pods_interval: Duration::from_millis(args.refresh_pods_interval_ms),
            refresh_metrics_interval: Duration::from_millis(args.refresh_metrics_interval_ms),
            scrape_timeout: Duration::from_millis(args.scrape_timeout_ms),
            tls_cert: args.tls_cert,
            tls_key: args.tls_key,
            log_json: args.log_json,
            enable_response_buffering: args.enable_response_buffering,
        }
    }
}

pub async fn run(args: ServeArgs) -> Result<()> {
    let config: ServeConfig = args.into();
    init_tracing(config.log_json);

    if config.tls_cert.is_some() != config.tls_key.is_some() {
        anyhow::bail!("--tls-cert and --tls-key must both be set, or neither");
    }

    info!(pool = %config.pool_name, service = %config.service_name, "epp_starting");

    let client = Client::try_default().await.context("failed to load kubeconfig")?;

    let datastore = Arc::new(Datastore::new());
    let scraper = Arc::new(ReqwestScraper::new(reqwest::Client::new(), config.scrape_timeout));
    let metrics = Arc::new(MetricsProvider::new(datastore.clone(), scraper));
    let scheduler = Arc::new(Scheduler::new(metrics.clone()));

    observability::install();
    let readiness = ReadinessState::default();

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let pool_handle = tokio::spawn(pool::run(
        client.clone(),
        datastore.clone(),
        config.pool_name.clone(),
        config.pool_namespace.clone(),
        shutdown_tx.subscribe(),
    ));
    let model_handle = tokio::spawn(model::run(
        client.clone(),
        datastore.clone(),
        config.pool_name.clone(),
        config.pool_namespace.clone(),
        shutdown_tx.subscribe(),
    ));
    let endpointslice_handle = tokio::spawn(endpointslice::run(
        client.clone(),
        datastore.clone(),
        config.service_name.clone(),
        config.pool_namespace.clone(),
        config.zone.clone(),
        shutdown_tx.subscribe(),
    ));

    let (metrics_pod_handle, metrics_refresh_handle) = metrics
        .init(config.refresh_pods_interval, config.refresh_metrics_interval, config.scrape_timeout, &shutdown_tx)
        .await;

    let observability_handle = tokio::spawn(observability::start_server(
        readiness.clone(),
        config.health_addr,
        shutdown_tx.subscribe(),
    ));

    let extproc_service = ExtProcService::new(
        datastore.clone(),
        scheduler.clone(),
        config.target_pod_header.clone(),
        config.enable_response_buffering,
    );

    let (_health_reporter, health_service) = tonic_health::server::health_reporter();

    let grpc_addr = config.grpc_addr;
    let health_addr = config.health_addr;
    let mut grpc_shutdown = shutdown_tx.subscribe();

    readiness.mark_ready();
    info!(%grpc_addr, %health_addr, "epp_ready");

    let grpc_server = async move {
        let mut builder = Server::builder();
        if config.tls_enabled() {
            let cert = std::fs::read(config.tls_cert.as_ref().expect("checked by tls_enabled"))
                .context("failed to read tls-cert")?;
            let key = std::fs::read(config.tls_key.as_ref().expect("checked by tls_enabled"))
                .context("failed to read tls-key")?;
            let identity = tonic::transport::Identity::from_pem(cert, key);
            builder = builder
                .tls_config(tonic::transport::ServerTlsConfig::new().identity(identity))
                .context("failed to configure TLS for the gRPC server")?;
        }

        builder
            .add_service(health_service)
            .add_service(ExternalProcessorServer::new(extproc_service))
            .serve_with_shutdown(grpc_addr, async move {
                let _ = grpc_shutdown.recv().await;
            })
            .await
            .context("grpc server error")
    };

    tokio::select! {
        result = grpc_server => {
            if let Err(e) = result {
                error!(error = %e, "grpc_server_failed");
            }
            info!("grpc_server_stopped");
        }
        _ = signal::ctrl_c() => {
            info!("shutdown_signal_received");
        }
    }

    let _ = shutdown_tx.send(());
    let _ = pool_handle.await;
    let _ = model_handle.await;
    let _ = endpointslice_handle.await;
    let _ = metrics_pod_handle.await;
    let _ = metrics_refresh_handle.await;
    let _ = observability_handle.await;

    info!("epp_stopped");
    Ok(())
}
