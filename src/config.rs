//! Resolved runtime configuration for `epp serve`, built from CLI flags
//! (`src/cli.rs`), per spec.md §6's CLI surface.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub grpc_addr: SocketAddr,
    pub health_addr: SocketAddr,
    pub target_pod_header: String,
    pub pool_name: String,
    pub pool_namespace: String,
    pub service_name: String,
    pub zone: Option<String>,
    pub refresh_pods_interval: Duration,
    pub refresh_metrics_interval: Duration,
    pub scrape_timeout: Duration,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub log_json: bool,
    pub enable_response_buffering: bool,
}

impl ServeConfig {
    /// The gRPC server terminates TLS itself only when both a cert and a
    /// key are configured; one without the other is a startup error, caught
    /// by `commands::serve::run` before anything is bound.
    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }
}
