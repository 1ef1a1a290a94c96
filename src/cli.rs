use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "epp")]
#[command(about = "Endpoint Picker: ext-proc scheduling plane for an LLM inference gateway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gRPC ext-proc server, the HTTP health/metrics server, and
    /// the pool/model/EndpointSlice reconcilers
    Serve(ServeArgs),

    /// Manage the InferencePool/InferenceModel CRDs
    Crd {
        #[command(subcommand)]
        action: CrdAction,
    },

    /// Check cluster connectivity and confirm the configured pool exists
    Check(CheckArgs),

    /// Display application version
    Version,
}

#[derive(Parser)]
pub struct ServeArgs {
    /// gRPC ext-proc listen port
    #[arg(long, default_value_t = 9002)]
    pub port: u16,

    /// HTTP health/readiness/metrics listen port
    #[arg(long, default_value_t = 9090)]
    pub health_port: u16,

    /// Header carrying the chosen backend pod's address
    #[arg(long, default_value = "target-pod")]
    pub target_pod_header: String,

    /// Name of the InferencePool this EPP instance serves
    #[arg(long)]
    pub pool_name: String,

    /// Namespace of the InferencePool and watched InferenceModels
    #[arg(long, default_value = "default")]
    pub pool_namespace: String,

    /// Name of the Kubernetes Service whose EndpointSlices back the pool
    #[arg(long)]
    pub service_name: String,

    /// Restrict pod membership to endpoints in this topology zone
    #[arg(long)]
    pub zone: Option<String>,

    /// Pod-membership refresh period, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    pub refresh_pods_interval_ms: u64,

    /// Metrics-scrape period, in milliseconds
    #[arg(long, default_value_t = 50)]
    pub refresh_metrics_interval_ms: u64,

    /// Per-pod scrape timeout, in milliseconds
    #[arg(long, default_value_t = 5_000)]
    pub scrape_timeout_ms: u64,

    /// TLS certificate; when set with `--tls-key`, the gRPC server
    /// terminates TLS itself instead of plaintext
    #[arg(long)]
    pub tls_cert: Option<std::path::PathBuf>,

    /// TLS private key, paired with `--tls-cert`
    #[arg(long)]
    pub tls_key: Option<std::path::PathBuf>,

    /// Emit structured logs as JSON instead of human-readable text
    #[arg(long)]
    pub log_json: bool,

    /// Parse buffered response bodies for token-usage accounting
    #[arg(long)]
    pub enable_response_buffering: bool,
}

#[derive(Parser)]
pub struct CheckArgs {
    /// Namespace to check the InferencePool in
    #[arg(long, default_value = "default")]
    pub pool_namespace: String,

    /// Name of the InferencePool to confirm exists (skipped if omitted)
    #[arg(long)]
    pub pool_name: Option<String>,
}

#[derive(Subcommand)]
pub enum CrdAction {
    /// Print the InferencePool/InferenceModel CRD YAML to stdout
    Generate,

    /// Install the CRDs into the connected cluster
    Install,
}
