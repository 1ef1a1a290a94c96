//! `Schedule(LLMRequest) -> Pod | Error`, grounded on
//! `examples/original_source/pkg/ext-proc/scheduling/scheduler.go`.

use std::sync::Arc;

use rand::Rng;

use crate::error::{EppError, Result};
use crate::filters::{default_pipeline, FilterNode};
use crate::metrics::MetricsProvider;
use crate::observability::SCHEDULE_DECISIONS_TOTAL;
use crate::pod::{LlmRequest, Pod};

pub struct Scheduler {
    metrics: Arc<MetricsProvider>,
    pipeline: FilterNode,
}

impl Scheduler {
    pub fn new(metrics: Arc<MetricsProvider>) -> Self {
        Self { metrics, pipeline: default_pipeline() }
    }

    pub fn schedule(&self, request: &LlmRequest) -> Result<Pod> {
        self.schedule_with_rng(request, &mut rand::rng())
    }

    /// Split out so tests can inject a seeded RNG (spec.md §9's randomness
    /// requirement: non-deterministic in production, reproducible in
    /// tests).
    pub fn schedule_with_rng(&self, request: &LlmRequest, rng: &mut impl Rng) -> Result<Pod> {
        let snapshot = self.metrics.all_pod_metrics();
        let survivors = match self.pipeline.evaluate(request, &snapshot) {
            Ok(survivors) => survivors,
            Err(err @ EppError::ResourceExhausted(_)) => {
                SCHEDULE_DECISIONS_TOTAL.with_label_values(&["resource_exhausted"]).inc();
                return Err(err);
            }
            Err(_) => {
                SCHEDULE_DECISIONS_TOTAL.with_label_values(&["failed"]).inc();
                return Err(EppError::SchedulingFailed);
            }
        };
        if survivors.is_empty() {
            SCHEDULE_DECISIONS_TOTAL.with_label_values(&["failed"]).inc();
            return Err(EppError::SchedulingFailed);
        }
        let index = rng.random_range(0..survivors.len());
        SCHEDULE_DECISIONS_TOTAL.with_label_values(&["routed"]).inc();
        Ok(survivors[index].0.clone())
    }
}
