//! Full per-request handler lifecycle — request headers, request body,
//! response headers, response body — threaded through one shared
//! `RequestContext`, the same sequence a live ext-proc stream drives one
//! message at a time (see `extproc::server::ExtProcService::process`), but
//! exercised here against the public handler functions directly rather than
//! through the gRPC transport.

use std::sync::Arc;

use async_trait::async_trait;
use epp::crd::{Criticality, InferenceModel, InferenceModelSpec, LocalObjectReference};
use epp::datastore::Datastore;
use epp::extproc::request::{handle_request_body_with_rng, handle_request_headers, BodyOutcome};
use epp::extproc::response::{parse_response_usage, response_headers};
use epp::extproc::RequestContext;
use epp::metrics::scrape::PodMetricsClient;
use epp::metrics::MetricsProvider;
use epp::pod::{Pod, PodMetrics};
use epp::scheduler::Scheduler;
use kube::api::ObjectMeta;
use rand::rngs::StdRng;
use rand::SeedableRng;

struct NoopScraper;

#[async_trait]
impl PodMetricsClient for NoopScraper {
    async fn fetch(&self, _pod: &Pod, previous: &PodMetrics) -> epp::error::Result<PodMetrics> {
        Ok(previous.clone())
    }
}

fn model(name: &str, criticality: Criticality) -> InferenceModel {
    InferenceModel {
        metadata: ObjectMeta::default(),
        spec: InferenceModelSpec {
            model_name: name.to_string(),
            criticality,
            pool_ref: LocalObjectReference { name: "pool-1".to_string() },
            target_models: vec![],
        },
    }
}

#[test]
fn one_request_drives_headers_body_response_headers_and_response_body_in_order() {
    let datastore = Arc::new(Datastore::new());
    let pod = Pod::new("default", "p1", "10.0.0.1:8000");
    datastore.add_pod(pod.clone());
    let metrics = Arc::new(MetricsProvider::new(datastore.clone(), Arc::new(NoopScraper)));
    metrics.update_pod_metrics(pod.clone(), PodMetrics::default());
    let scheduler = Scheduler::new(metrics);
    datastore.upsert_model("chat".into(), model("chat", Criticality::Critical));

    let mut ctx = RequestContext::default();

    // 1. RequestHeaders: no routing decision yet, always clears the route
    //    cache since this EPP defers the decision to the body.
    assert!(handle_request_headers());
    assert!(ctx.target_pod.is_none());

    // 2. RequestBody: resolves the model and picks a pod, mutating ctx.
    let outcome = handle_request_body_with_rng(
        &mut ctx,
        &datastore,
        &scheduler,
        br#"{"model": "chat", "prompt": "hello"}"#,
        &mut StdRng::seed_from_u64(3),
    )
    .unwrap();
    let routed_pod = match outcome {
        BodyOutcome::Route { target_pod, .. } => target_pod,
        BodyOutcome::ResourceExhausted => panic!("single healthy pod must not be shed"),
    };
    assert_eq!(routed_pod, pod);
    assert_eq!(ctx.target_pod, Some(pod.clone()));
    assert_eq!(ctx.model, "chat");

    // 3. ResponseHeaders: echoes the routing decision back for observability.
    let headers = response_headers(&ctx);
    assert!(headers.contains(&("target-pod".to_string(), pod.address.clone())));

    // 4. ResponseBody: buffered usage accounting, only meaningful once a
    //    pod has actually been chosen.
    let usage = parse_response_usage(br#"{"usage": {"prompt_tokens": 12, "completion_tokens": 8, "total_tokens": 20}}"#).unwrap();
    assert_eq!(usage.total_tokens, 20);
}

#[test]
fn response_headers_before_any_body_carry_no_target_pod() {
    let ctx = RequestContext::default();
    let headers = response_headers(&ctx);
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].0, "x-went-into-resp-headers");
}

#[test]
fn shed_request_never_populates_target_pod_for_the_response_headers_pass() {
    let datastore = Arc::new(Datastore::new());
    let overloaded = Pod::new("default", "p1", "10.0.0.1:8000");
    datastore.add_pod(overloaded.clone());
    let metrics = Arc::new(MetricsProvider::new(datastore.clone(), Arc::new(NoopScraper)));
    metrics.update_pod_metrics(
        overloaded,
        PodMetrics { waiting_queue_size: 999, kv_cache_usage_percent: 0.99, ..Default::default() },
    );
    let scheduler = Scheduler::new(metrics);
    datastore.upsert_model("batch".into(), model("batch", Criticality::Sheddable));

    let mut ctx = RequestContext::default();
    let outcome = handle_request_body_with_rng(
        &mut ctx,
        &datastore,
        &scheduler,
        br#"{"model": "batch"}"#,
        &mut StdRng::seed_from_u64(1),
    )
    .unwrap();

    assert!(matches!(outcome, BodyOutcome::ResourceExhausted));
    assert!(ctx.target_pod.is_none());
    assert_eq!(response_headers(&ctx).len(), 1);
}

#[test]
fn s1_happy_path_rewrites_the_body_to_the_exact_expected_bytes() {
    use std::collections::HashMap;

    let datastore = Arc::new(Datastore::new());
    let metrics = Arc::new(MetricsProvider::new(datastore.clone(), Arc::new(NoopScraper)));

    let mut active0 = HashMap::new();
    active0.insert("foo".to_string(), 0);
    active0.insert("bar".to_string(), 0);
    let p0 = Pod::new("default", "p0", "address-0");
    datastore.add_pod(p0.clone());
    metrics.update_pod_metrics(
        p0,
        PodMetrics { waiting_queue_size: 0, kv_cache_usage_percent: 0.2, active_models: active0, max_active_models: 4, ..Default::default() },
    );

    let mut active1 = HashMap::new();
    active1.insert("foo".to_string(), 0);
    active1.insert("my-model-v1".to_string(), 0);
    let p1 = Pod::new("default", "p1", "address-1");
    datastore.add_pod(p1.clone());
    metrics.update_pod_metrics(
        p1.clone(),
        PodMetrics { waiting_queue_size: 0, kv_cache_usage_percent: 0.1, active_models: active1, max_active_models: 4, ..Default::default() },
    );

    let mut active2 = HashMap::new();
    active2.insert("foo".to_string(), 0);
    let p2 = Pod::new("default", "p2", "address-2");
    datastore.add_pod(p2.clone());
    metrics.update_pod_metrics(
        p2,
        PodMetrics { waiting_queue_size: 10, kv_cache_usage_percent: 0.2, active_models: active2, max_active_models: 4, ..Default::default() },
    );

    datastore.upsert_model(
        "my-model".into(),
        InferenceModel {
            metadata: ObjectMeta::default(),
            spec: InferenceModelSpec {
                model_name: "my-model".into(),
                criticality: Criticality::Critical,
                pool_ref: LocalObjectReference { name: "pool-1".into() },
                target_models: vec![epp::crd::TargetModel { name: "my-model-v1".into(), weight: 100 }],
            },
        },
    );

    let scheduler = Scheduler::new(metrics);
    let mut ctx = RequestContext::default();
    let outcome = handle_request_body_with_rng(
        &mut ctx,
        &datastore,
        &scheduler,
        br#"{"model": "my-model", "prompt": "hello", "max_tokens": 100, "temperature": 0}"#,
        &mut StdRng::seed_from_u64(1),
    )
    .unwrap();

    match outcome {
        BodyOutcome::Route { target_pod, body } => {
            assert_eq!(target_pod, p1);
            assert_eq!(body.len(), 73);
            assert_eq!(
                body,
                br#"{"max_tokens":100,"model":"my-model-v1","prompt":"hello","temperature":0}"#.to_vec()
            );
        }
        BodyOutcome::ResourceExhausted => panic!("the single under-threshold pod must be chosen"),
    }
}

#[test]
fn malformed_response_body_is_a_parse_failure_not_a_panic() {
    let result = parse_response_usage(br#"{"not_usage": true}"#);
    assert!(matches!(result, Err(epp::error::EppError::ParseFailure(_))));
}
