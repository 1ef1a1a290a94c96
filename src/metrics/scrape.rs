//! Prometheus text-format scraping and reduction into [`PodMetrics`].
//!
//! Grounded on `examples/original_source/pkg/ext-proc/backend/vllm/metrics.go`
//! (`FetchMetrics`/`promToPodMetrics`/`getLatestMetric`/`getLatestLoraMetric`),
//! adapted to spec.md §4.2's semantic mapping rather than the source's exact
//! (partially unfinished) field list. `prometheus-parse` is the library
//! consuming the text format, matching spec.md §1's "Prometheus text-format
//! parser consumed as a library".

use std::time::Duration;

use async_trait::async_trait;
use prometheus_parse::{Scrape, Value};
use tracing::warn;

use crate::error::{EppError, Result};
use crate::pod::{Pod, PodMetrics};

pub const RUNNING_QUEUE_SIZE_METRIC: &str = "vllm:num_requests_running";
pub const WAITING_QUEUE_SIZE_METRIC: &str = "vllm:num_requests_waiting";
pub const KV_CACHE_USAGE_METRIC: &str = "vllm:gpu_cache_usage_perc";
pub const LORA_REQUESTS_INFO_METRIC: &str = "vllm:lora_requests_info";

/// Capability injected into the [`MetricsProvider`](super::MetricsProvider):
/// fetch a fresh snapshot for one pod, given its previous snapshot for
/// error-path retention.
#[async_trait]
pub trait PodMetricsClient: Send + Sync {
    async fn fetch(&self, pod: &Pod, previous: &PodMetrics) -> Result<PodMetrics>;
}

pub struct ReqwestScraper {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestScraper {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl PodMetricsClient for ReqwestScraper {
    async fn fetch(&self, pod: &Pod, previous: &PodMetrics) -> Result<PodMetrics> {
        let url = format!("http://{}/metrics", pod.address);
        let body = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| EppError::ScrapeFailure { pod: pod.address.clone(), source: e.into() })?
            .error_for_status()
            .map_err(|e| EppError::ScrapeFailure { pod: pod.address.clone(), source: e.into() })?
            .text()
            .await
            .map_err(|e| EppError::ScrapeFailure { pod: pod.address.clone(), source: e.into() })?;

        parse_metrics(&body, previous).map_err(|e| EppError::ScrapeFailure {
            pod: pod.address.clone(),
            source: anyhow::anyhow!(e),
        })
    }
}

/// Reduces a scraped Prometheus payload into a new [`PodMetrics`] snapshot,
/// `existing` providing the previous values for fields left unparseable by
/// this cycle.
pub fn parse_metrics(text: &str, existing: &PodMetrics) -> std::result::Result<PodMetrics, String> {
    let lines = text.lines().map(|l| Ok(l.to_string()));
    let scrape = Scrape::parse(lines).map_err(|e| format!("failed to parse metrics text: {e}"))?;

    let mut updated = existing.clone();

    if let Some(v) = latest_gauge(&scrape, RUNNING_QUEUE_SIZE_METRIC) {
        updated.running_queue_size = v as i64;
    } else {
        warn!(metric = RUNNING_QUEUE_SIZE_METRIC, "metric_family_not_found");
    }

    if let Some(v) = latest_gauge(&scrape, WAITING_QUEUE_SIZE_METRIC) {
        updated.waiting_queue_size = v as i64;
    } else {
        warn!(metric = WAITING_QUEUE_SIZE_METRIC, "metric_family_not_found");
    }

    if let Some(v) = latest_gauge(&scrape, KV_CACHE_USAGE_METRIC) {
        updated.kv_cache_usage_percent = v;
    } else {
        warn!(metric = KV_CACHE_USAGE_METRIC, "metric_family_not_found");
    }

    match most_recent_lora_sample(&scrape) {
        Some(sample) => {
            let mut active_models = std::collections::HashMap::new();
            if let Some(csv) = sample.labels.get("running_lora_adapters") {
                if !csv.is_empty() {
                    for adapter in csv.split(',') {
                        active_models.insert(adapter.to_string(), 0);
                    }
                }
            }
            updated.active_models = active_models;

            match sample.labels.get("max_lora").and_then(|s| s.parse::<i64>().ok()) {
                Some(max) => updated.max_active_models = max,
                None => {
                    updated.max_active_models = 0;
                    warn!("max_lora_unparseable");
                }
            }
        }
        None => {
            warn!(metric = LORA_REQUESTS_INFO_METRIC, "metric_family_not_found");
        }
    }

    Ok(updated)
}

fn latest_gauge(scrape: &Scrape, name: &str) -> Option<f64> {
    scrape
        .samples
        .iter()
        .filter(|s| s.metric == name)
        .max_by(|a, b| a.timestamp.cmp(&b.timestamp))
        .and_then(|s| match s.value {
            Value::Gauge(v) | Value::Counter(v) | Value::Untyped(v) => Some(v),
            _ => None,
        })
}

/// The lora-requests-info sample whose gauge value is numerically largest
/// (the value itself encodes a recency timestamp, per spec.md §4.2).
fn most_recent_lora_sample(scrape: &Scrape) -> Option<&prometheus_parse::Sample> {
    scrape
        .samples
        .iter()
        .filter(|s| s.metric == LORA_REQUESTS_INFO_METRIC)
        .max_by(|a, b| gauge_value(a).partial_cmp(&gauge_value(b)).unwrap_or(std::cmp::Ordering::Equal))
}

fn gauge_value(sample: &prometheus_parse::Sample) -> f64 {
    match sample.value {
        Value::Gauge(v) | Value::Counter(v) | Value::Untyped(v) => v,
        _ => f64::MIN,
    }
}
