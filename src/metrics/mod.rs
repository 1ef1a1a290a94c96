//! Concurrent cache of per-pod runtime metrics, refreshed by two
//! independent background loops, per spec.md §4.2.

pub mod scrape;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{info, warn};

use crate::datastore::Datastore;
use crate::observability::{SCRAPE_DURATION_SECONDS, SCRAPE_ERRORS_TOTAL};
use crate::pod::{Pod, PodMetrics};
use scrape::PodMetricsClient;

pub struct MetricsProvider {
    metrics: DashMap<Pod, Arc<PodMetrics>>,
    datastore: Arc<Datastore>,
    client: Arc<dyn PodMetricsClient>,
}

impl MetricsProvider {
    pub fn new(datastore: Arc<Datastore>, client: Arc<dyn PodMetricsClient>) -> Self {
        Self { metrics: DashMap::new(), datastore, client }
    }

    /// O(n) iteration, no shard-wide lock held across the walk (see
    /// `datastore` module docs for the same `DashMap` property).
    pub fn all_pod_metrics(&self) -> Vec<(Pod, Arc<PodMetrics>)> {
        self.metrics.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    pub fn update_pod_metrics(&self, pod: Pod, snapshot: PodMetrics) {
        self.metrics.insert(pod, Arc::new(snapshot));
    }

    /// Performs one synchronous pod refresh and one synchronous metric
    /// refresh, then spawns the two background loops, returning their
    /// join handles so the caller can await them at shutdown.
    pub async fn init(
        self: &Arc<Self>,
        pod_refresh_interval: Duration,
        metric_refresh_interval: Duration,
        scrape_timeout: Duration,
        shutdown: &broadcast::Sender<()>,
    ) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        self.refresh_pods_once();
        self.refresh_metrics_once(scrape_timeout).await;

        let pod_provider = self.clone();
        let mut pod_shutdown = shutdown.subscribe();
        let pod_handle = tokio::spawn(async move {
            let mut ticker = interval(pod_refresh_interval);
            ticker.tick().await; // first tick fires immediately; already refreshed once above
            loop {
                tokio::select! {
                    _ = pod_shutdown.recv() => {
                        info!("pod_refresh_loop_stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        pod_provider.refresh_pods_once();
                    }
                }
            }
        });

        let metric_provider = self.clone();
        let mut metric_shutdown = shutdown.subscribe();
        let metric_handle = tokio::spawn(async move {
            let mut ticker = interval(metric_refresh_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = metric_shutdown.recv() => {
                        info!("metric_refresh_loop_stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        metric_provider.refresh_metrics_once(scrape_timeout).await;
                    }
                }
            }
        });

        (pod_handle, metric_handle)
    }

    /// Add-first, then remove absent, so a concurrent scrape never targets
    /// a just-removed pod.
    fn refresh_pods_once(&self) {
        let current = self.datastore.pod_set();
        let current_set: HashSet<&Pod> = current.iter().collect();

        for pod in &current {
            self.metrics
                .entry(pod.clone())
                .or_insert_with(|| Arc::new(PodMetrics::default()));
        }

        let stale: Vec<Pod> = self
            .metrics
            .iter()
            .map(|e| e.key().clone())
            .filter(|p| !current_set.contains(p))
            .collect();
        for pod in stale {
            self.metrics.remove(&pod);
        }
    }

    async fn refresh_metrics_once(&self, scrape_timeout: Duration) {
        let start = Instant::now();
        let pods: Vec<Pod> = self.metrics.iter().map(|e| e.key().clone()).collect();

        let fetches = pods.into_iter().map(|pod| {
            let client = self.client.clone();
            let previous = self
                .metrics
                .get(&pod)
                .map(|r| (**r.value()).clone())
                .unwrap_or_default();
            async move {
                match tokio::time::timeout(scrape_timeout, client.fetch(&pod, &previous)).await {
                    Ok(Ok(snapshot)) => Ok((pod, snapshot)),
                    Ok(Err(err)) => Err((pod, err.to_string())),
                    Err(_) => Err((pod, "scrape timed out".to_string())),
                }
            }
        });

        let results = futures::future::join_all(fetches).await;
        let mut errors = 0usize;
        for result in results {
            match result {
                Ok((pod, snapshot)) => self.update_pod_metrics(pod, snapshot),
                Err((pod, reason)) => {
                    errors += 1;
                    SCRAPE_ERRORS_TOTAL.inc();
                    warn!(pod = %pod.address, reason = %reason, "scrape_failed_retaining_previous");
                }
            }
        }

        SCRAPE_DURATION_SECONDS.observe(start.elapsed().as_secs_f64());
        if errors > 0 {
            warn!(errors, "metric_refresh_cycle_completed_with_errors");
        }
    }
}
