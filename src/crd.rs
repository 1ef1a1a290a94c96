//! Declarative configuration objects: `InferencePool` and `InferenceModel`.
//!
//! Mirrors `api/v1alpha1/{inferencepool,inferencemodel}_types.go` from the
//! upstream gateway-api inference extension, expressed as `kube` custom
//! resources in the teacher's `CustomResource` idiom.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A named reference to an object in the same namespace (here: always an
/// `InferencePool`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectReference {
    pub name: String,
}

/// Request-class governing admission under load.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum Criticality {
    Critical,
    #[default]
    Default,
    Sheddable,
}

/// One weighted entry in an `InferenceModel`'s traffic split.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetModel {
    pub name: String,
    #[serde(default)]
    pub weight: u32,
}

/// `InferencePool` — pool configuration, singleton per EPP process.
///
/// Only the `targetPort` and `selector` fields are read by this EPP; the
/// selector is informational here since pod membership is reconciled from
/// EndpointSlices rather than by the EPP re-running the selector itself.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "inference.networking.x-k8s.io",
    version = "v1alpha1",
    kind = "InferencePool",
    plural = "inferencepools",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct InferencePoolSpec {
    /// Label selector identifying member pods. Not evaluated directly by
    /// the EPP (EndpointSlice watches already scope membership); kept for
    /// round-trip fidelity with the upstream CRD.
    #[serde(default)]
    pub selector: BTreeMap<String, String>,

    /// Port each pool member listens on for inference traffic.
    pub target_port: i32,
}

/// `InferenceModel` — a routing rule keyed by a logical `modelName`.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "inference.networking.x-k8s.io",
    version = "v1alpha1",
    kind = "InferenceModel",
    plural = "inferencemodels",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct InferenceModelSpec {
    pub model_name: String,

    #[serde(default)]
    pub criticality: Criticality,

    pub pool_ref: LocalObjectReference,

    /// Weighted traffic split across concrete adapter names. When empty,
    /// the resolved target equals `modelName`.
    #[serde(default)]
    pub target_models: Vec<TargetModel>,
}
