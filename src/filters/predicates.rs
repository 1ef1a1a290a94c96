//! Concrete filter functions, grounded on
//! `examples/original_source/pkg/ext-proc/scheduling/filter.go`'s
//! `leastQueuingFilterFunc`/`leastKVCacheFilterFunc`/`toFilterFunc`, with
//! the banding divisor being the current candidate count (`pods.len()`),
//! matching the source exactly.

use crate::error::Result;
use crate::pod::LlmRequest;

use super::PodRef;

pub const CAPACITY_QUEUE_THRESHOLD: i64 = 5;
pub const CAPACITY_KV_THRESHOLD: f64 = 0.8;

/// Keep pods whose `waitingQueueSize` falls in `[min, min + (max-min)/n]`,
/// `n` = number of candidates, per spec.md §4.3 step 1.
pub fn least_queuing(_req: &LlmRequest, pods: &[PodRef]) -> Result<Vec<PodRef>> {
    if pods.is_empty() {
        return Ok(Vec::new());
    }
    let min = pods.iter().map(|(_, m)| m.waiting_queue_size).min().unwrap();
    let max = pods.iter().map(|(_, m)| m.waiting_queue_size).max().unwrap();
    let band = min + (max - min) / pods.len() as i64;
    Ok(pods
        .iter()
        .filter(|(_, m)| m.waiting_queue_size >= min && m.waiting_queue_size <= band)
        .cloned()
        .collect())
}

/// Analogous banding over `kvCacheUsagePercent` with float arithmetic, per
/// spec.md §4.3 step 3.
pub fn least_kv_cache(_req: &LlmRequest, pods: &[PodRef]) -> Result<Vec<PodRef>> {
    if pods.is_empty() {
        return Ok(Vec::new());
    }
    let min = pods
        .iter()
        .map(|(_, m)| m.kv_cache_usage_percent)
        .fold(f64::MAX, f64::min);
    let max = pods
        .iter()
        .map(|(_, m)| m.kv_cache_usage_percent)
        .fold(f64::MIN, f64::max);
    let band = min + (max - min) / pods.len() as f64;
    Ok(pods
        .iter()
        .filter(|(_, m)| m.kv_cache_usage_percent >= min && m.kv_cache_usage_percent <= band)
        .cloned()
        .collect())
}

/// Keep pods where the resolved target is already resident, or the pod has
/// spare adapter capacity, per spec.md §4.3 step 2.
pub fn low_lora_cost(req: &LlmRequest, pod: &PodRef) -> bool {
    let metrics = &pod.1;
    metrics.active_models.contains_key(&req.resolved_target_model)
        || (metrics.active_models.len() as i64) < metrics.max_active_models
}

/// Admit pods under both the queue and KV-cache thresholds, per spec.md
/// §4.3's Sheddable branch.
pub fn capacity_gate(_req: &LlmRequest, pod: &PodRef) -> bool {
    let metrics = &pod.1;
    metrics.waiting_queue_size <= CAPACITY_QUEUE_THRESHOLD
        && metrics.kv_cache_usage_percent <= CAPACITY_KV_THRESHOLD
}

/// Lifts a per-pod predicate into a filter over the whole candidate slice,
/// mirroring `toFilterFunc`.
pub fn to_filter_fn(
    predicate: impl Fn(&LlmRequest, &PodRef) -> bool + Send + Sync + 'static,
) -> impl Fn(&LlmRequest, &[PodRef]) -> Result<Vec<PodRef>> + Send + Sync + 'static {
    move |req, pods| {
        Ok(pods
            .iter()
            .filter(|pod| predicate(req, pod))
            .cloned()
            .collect())
    }
}
