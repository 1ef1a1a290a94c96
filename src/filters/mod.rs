//! The pod filter pipeline: a flat node-tree interpreter over pure filter
//! functions, replacing the source's self-referential pointer struct
//! (`examples/original_source/pkg/ext-proc/scheduling/filter.go`) per
//! spec.md §9's redesign note. Filters never mutate their input; the tree
//! is built once at startup by [`default_pipeline`] and is reentrant.

mod predicates;

use std::sync::Arc;

use crate::error::{EppError, Result};
use crate::pod::{LlmRequest, Pod, PodMetrics};

pub use predicates::{CAPACITY_QUEUE_THRESHOLD, CAPACITY_KV_THRESHOLD};

/// One surviving candidate: identity plus the metrics snapshot it was
/// filtered against.
pub type PodRef = (Pod, Arc<PodMetrics>);

type FilterFn = Arc<dyn Fn(&LlmRequest, &[PodRef]) -> Result<Vec<PodRef>> + Send + Sync>;

/// A node in the filter flow-chart: `{name, filter, onSuccess, onFailure,
/// onAny}` per spec.md §4.3. A bare terminal (no matching successor)
/// returns whatever the current stage produced.
///
/// `Branch` is not part of the source's node shape; it exists so the
/// criticality decision can pick an entire subtree up front instead of
/// being encoded as a `Stage`'s success/failure routing. A `Stage` has only
/// one `on_failure`/`on_any` pair, so it cannot send "input was already
/// empty" and "this request doesn't qualify" to different children — which
/// is exactly what the Critical/Sheddable split needs, since only the
/// Sheddable side may ever reach the `Drop` node.
pub enum FilterNode {
    Stage {
        name: &'static str,
        filter: FilterFn,
        on_success: Option<Box<FilterNode>>,
        on_failure: Option<Box<FilterNode>>,
        on_any: Option<Box<FilterNode>>,
    },
    Branch {
        critical: Box<FilterNode>,
        sheddable: Box<FilterNode>,
    },
}

impl FilterNode {
    pub fn evaluate(&self, request: &LlmRequest, input: &[PodRef]) -> Result<Vec<PodRef>> {
        match self {
            FilterNode::Branch { critical, sheddable } => {
                if request.critical {
                    critical.evaluate(request, input)
                } else {
                    sheddable.evaluate(request, input)
                }
            }
            FilterNode::Stage { name, filter, on_success, on_failure, on_any } => {
                match filter(request, input) {
                    Ok(result) if !result.is_empty() => match on_success.as_deref().or(on_any.as_deref()) {
                        Some(next) => next.evaluate(request, &result),
                        None => Ok(result),
                    },
                    Ok(_empty) => match on_failure.as_deref().or(on_any.as_deref()) {
                        Some(next) => next.evaluate(request, input),
                        None => Err(EppError::FilterEmptyResult((*name).to_string())),
                    },
                    Err(err) => match on_failure.as_deref().or(on_any.as_deref()) {
                        Some(next) => next.evaluate(request, input),
                        None => Err(err),
                    },
                }
            }
        }
    }
}

fn stage(
    name: &'static str,
    filter: FilterFn,
    on_success: Option<FilterNode>,
    on_failure: Option<FilterNode>,
) -> FilterNode {
    FilterNode::Stage {
        name,
        filter,
        on_success: on_success.map(Box::new),
        on_failure: on_failure.map(Box::new),
        on_any: None,
    }
}

/// `LeastQueuing -> LowLoRACost -> LeastKVCache`, reused verbatim by both
/// the Critical branch and the Sheddable branch's admitted path.
fn low_latency_chain() -> FilterNode {
    let kv_terminal = || stage("least_kv_cache", Arc::new(predicates::least_kv_cache), None, None);

    let lora_stage = stage(
        "low_lora_cost",
        Arc::new(predicates::to_filter_fn(predicates::low_lora_cost)),
        Some(kv_terminal()),
        Some(kv_terminal()),
    );

    stage("least_queuing", Arc::new(predicates::least_queuing), Some(lora_stage), None)
}

/// The default policy: criticality gate over Critical / Sheddable
/// branches, per spec.md §4.3. The Critical branch *is* `low_latency_chain`
/// directly, with no `capacity_gate`/`Drop` node anywhere in its subtree, so
/// `ResourceExhausted` is structurally unreachable for Critical requests
/// regardless of how many pods survive filtering (spec.md §8 Invariant 2) —
/// including the degenerate case of zero pods reaching the gate at all,
/// which then terminates as `FilterEmptyResult` instead of falling through
/// to the Sheddable branch's `Drop` node.
pub fn default_pipeline() -> FilterNode {
    let drop = stage(
        "drop",
        Arc::new(|_req: &LlmRequest, _input: &[PodRef]| -> Result<Vec<PodRef>> {
            Err(EppError::ResourceExhausted("no pods within capacity thresholds".to_string()))
        }),
        None,
        None,
    );

    let capacity_gate = stage(
        "capacity_gate",
        Arc::new(predicates::to_filter_fn(predicates::capacity_gate)),
        Some(low_latency_chain()),
        Some(drop),
    );

    FilterNode::Branch { critical: Box::new(low_latency_chain()), sheddable: Box::new(capacity_gate) }
}
