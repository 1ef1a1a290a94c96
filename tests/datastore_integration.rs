//! Cross-module datastore lifecycle: pool migration, model acceptance, and
//! pod churn, as the three reconcilers would drive it independently against
//! the same shared `Datastore`. No fake API server: fixtures are built
//! directly, per the no-cluster end-to-end style the teacher uses in its own
//! `tests/governance_integration.rs`.

use std::collections::BTreeMap;

use epp::crd::{Criticality, InferenceModel, InferenceModelSpec, InferencePool, InferencePoolSpec, LocalObjectReference};
use epp::datastore::Datastore;
use epp::error::EppError;
use epp::pod::Pod;
use kube::api::ObjectMeta;

fn pool(name: &str, rv: &str) -> InferencePool {
    InferencePool {
        metadata: ObjectMeta { name: Some(name.to_string()), resource_version: Some(rv.to_string()), ..Default::default() },
        spec: InferencePoolSpec { selector: BTreeMap::new(), target_port: 8000 },
    }
}

fn model(model_name: &str, pool_ref: &str) -> InferenceModel {
    InferenceModel {
        metadata: ObjectMeta::default(),
        spec: InferenceModelSpec {
            model_name: model_name.to_string(),
            criticality: Criticality::Default,
            pool_ref: LocalObjectReference { name: pool_ref.to_string() },
            target_models: vec![],
        },
    }
}

#[test]
fn model_accepted_before_pool_is_known_then_purged_on_pool_migration() {
    let ds = Datastore::new();

    // ModelReconciler's watch fires before PoolReconciler's: accepted
    // optimistically per Datastore::upsert_model's documented None branch.
    ds.upsert_model("chat".into(), model("chat", "pool-a"));
    assert!(ds.lookup_model("chat").is_some());

    // PoolReconciler now reconciles a pool with a different name than the
    // model's poolRef.
    ds.set_pool(pool("pool-b", "1"));
    assert_eq!(ds.get_pool().unwrap().metadata.name.as_deref(), Some("pool-b"));

    // ModelReconciler re-evaluates on its own next watch event (simulated
    // here by re-upserting the same object): now rejected as a mismatch.
    ds.upsert_model("chat".into(), model("chat", "pool-a"));
    assert!(ds.lookup_model("chat").is_none());
}

#[test]
fn pod_membership_is_independent_of_pool_and_model_state() {
    let ds = Datastore::new();
    let p1 = Pod::new("default", "p1", "10.0.0.1:8000");
    let p2 = Pod::new("default", "p2", "10.0.0.2:8000");

    ds.add_pod(p1.clone());
    ds.add_pod(p2.clone());
    assert_eq!(ds.pod_set().len(), 2);

    // Pool and model churn happening concurrently (in practice, on other
    // tokio tasks) must not perturb pod membership.
    ds.set_pool(pool("pool-a", "1"));
    ds.upsert_model("chat".into(), model("chat", "pool-a"));
    ds.set_pool(pool("pool-a", "2"));

    assert!(ds.has_pod(&p1));
    assert!(ds.has_pod(&p2));
    assert_eq!(ds.pod_set().len(), 2);

    ds.remove_pod(&p1);
    assert!(!ds.has_pod(&p1));
    assert_eq!(ds.pod_set(), vec![p2]);
}

#[test]
fn pool_target_port_tracks_the_current_pool_across_resource_version_bumps() {
    let ds = Datastore::new();
    assert_eq!(ds.pool_target_port(), None);

    ds.set_pool(pool("pool-a", "1"));
    assert_eq!(ds.pool_target_port(), Some(8000));

    let mut updated = pool("pool-a", "2");
    updated.spec.target_port = 9000;
    ds.set_pool(updated);
    assert_eq!(ds.pool_target_port(), Some(9000));
}

#[test]
fn get_pool_before_any_reconcile_is_not_initialized() {
    let ds = Datastore::new();
    assert!(matches!(ds.get_pool(), Err(EppError::NotInitialized)));
}
