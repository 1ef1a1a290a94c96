//! Scheduling-plane data model: pod identity and per-pod runtime snapshots.

use std::collections::HashMap;

/// Identity of a backend pod, keyed by namespace+name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    /// `host:port` the EPP forwards to and scrapes metrics from.
    pub address: String,
}

impl Pod {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Per-pod runtime snapshot scraped from the backend's `/metrics` endpoint.
///
/// Replaced wholesale on each scrape cycle (clone-then-set); never mutated
/// in place so a reader holding a clone always sees a fully-formed value.
#[derive(Debug, Clone, PartialEq)]
pub struct PodMetrics {
    pub running_queue_size: i64,
    pub waiting_queue_size: i64,
    pub kv_cache_usage_percent: f64,
    /// Adapter name -> opaque value; only membership matters.
    pub active_models: HashMap<String, i32>,
    pub max_active_models: i64,
}

impl Default for PodMetrics {
    fn default() -> Self {
        Self {
            running_queue_size: 0,
            waiting_queue_size: 0,
            kv_cache_usage_percent: 0.0,
            active_models: HashMap::new(),
            max_active_models: 0,
        }
    }
}

/// Ephemeral scheduling input derived from one HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmRequest {
    pub model: String,
    pub resolved_target_model: String,
    pub critical: bool,
}
