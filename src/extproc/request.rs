//! `HandleRequestBody`/`HandleRequestHeaders` equivalents, grounded on
//! `examples/original_source/pkg/ext-proc/handlers/request.go`. Unlike that
//! source snapshot (which hardcodes a 100%-self traffic split and leaves
//! body mutation commented out), this resolves the weighted `targetModels`
//! split and always re-serializes the body, per spec.md §4.5.

use rand::Rng;
use serde_json::Value;

use crate::crd::{Criticality, InferenceModel};
use crate::datastore::Datastore;
use crate::error::{EppError, Result};
use crate::pod::{LlmRequest, Pod};
use crate::scheduler::Scheduler;

use super::RequestContext;

pub enum BodyOutcome {
    Route { target_pod: Pod, body: Vec<u8> },
    ResourceExhausted,
}

/// `ClearRouteCache: true`, no header or body mutation — this EPP never
/// makes a routing decision until the body arrives.
pub fn handle_request_headers() -> bool {
    true
}

pub fn handle_request_body(
    ctx: &mut RequestContext,
    datastore: &Datastore,
    scheduler: &Scheduler,
    body: &[u8],
) -> Result<BodyOutcome> {
    handle_request_body_with_rng(ctx, datastore, scheduler, body, &mut rand::rng())
}

/// Split out so tests can inject a seeded RNG.
pub fn handle_request_body_with_rng(
    ctx: &mut RequestContext,
    datastore: &Datastore,
    scheduler: &Scheduler,
    body: &[u8],
    rng: &mut impl Rng,
) -> Result<BodyOutcome> {
    let mut value: Value = serde_json::from_slice(body)
        .map_err(|e| EppError::ParseFailure(format!("request body is not valid JSON: {e}")))?;

    let model = value
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| EppError::ParseFailure("model not found in request".to_string()))?
        .to_string();

    let inference_model = datastore
        .lookup_model(&model)
        .ok_or_else(|| EppError::ModelNotFound(model.clone()))?;

    let resolved = resolve_target_model(&inference_model, rng)?;
    if resolved != model {
        value["model"] = Value::String(resolved.clone());
    }

    let llm_request = LlmRequest {
        model: model.clone(),
        resolved_target_model: resolved,
        critical: inference_model.spec.criticality == Criticality::Critical,
    };

    match scheduler.schedule(&llm_request) {
        Ok(pod) => {
            ctx.model = llm_request.model;
            ctx.target_pod = Some(pod.clone());
            let rewritten = serde_json::to_vec(&value)
                .map_err(|e| EppError::ParseFailure(format!("failed to re-serialize request body: {e}")))?;
            Ok(BodyOutcome::Route { target_pod: pod, body: rewritten })
        }
        Err(EppError::ResourceExhausted(reason)) => {
            tracing::warn!(model = %llm_request.model, reason = %reason, "request_shed");
            Ok(BodyOutcome::ResourceExhausted)
        }
        Err(err) => Err(err),
    }
}

/// Cumulative-weight draw over `targetModels`, per spec.md §4.5 step 5. An
/// `InferenceModel` with no `targetModels` resolves to its own `modelName`.
fn resolve_target_model(model: &InferenceModel, rng: &mut impl Rng) -> Result<String> {
    if model.spec.target_models.is_empty() {
        return Ok(model.spec.model_name.clone());
    }

    let total: u32 = model.spec.target_models.iter().map(|t| t.weight).sum();
    if total == 0 {
        return Err(EppError::WeightedDrawEmpty);
    }

    let draw = rng.random_range(0..total);
    let mut cumulative = 0u32;
    for target in &model.spec.target_models {
        cumulative += target.weight;
        if draw < cumulative {
            return Ok(target.name.clone());
        }
    }
    Err(EppError::WeightedDrawEmpty)
}
