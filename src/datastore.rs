//! Concurrent-safe, in-memory authoritative cache of pool config, model
//! routing rules, and pod membership.
//!
//! Grounded on `examples/original_source/pkg/ext-proc/backend/datastore.go`:
//! a single pool pointer behind a reader/writer lock plus two concurrent
//! maps (model-name -> model, pod -> {}). `DashMap`/`DashSet` reproduce the
//! Go `sync.Map` property that `Range` does not hold a shard-wide lock
//! across the whole walk, so callers must tolerate membership drift during
//! iteration (spec's concurrent-map-semantics design note).

use std::sync::RwLock;

use dashmap::{DashMap, DashSet};

use crate::crd::{InferenceModel, InferencePool};
use crate::error::{EppError, Result};
use crate::pod::Pod;

#[derive(Default)]
pub struct Datastore {
    pool: RwLock<Option<InferencePool>>,
    models: DashMap<String, InferenceModel>,
    pods: DashSet<Pod>,
}

impl Datastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-writer assignment of the pool singleton.
    pub fn set_pool(&self, pool: InferencePool) {
        let mut guard = self.pool.write().expect("pool lock poisoned");
        *guard = Some(pool);
    }

    pub fn get_pool(&self) -> Result<InferencePool> {
        self.pool
            .read()
            .expect("pool lock poisoned")
            .clone()
            .ok_or(EppError::NotInitialized)
    }

    /// Convenience read used by the EndpointSlice reconciler so it does not
    /// have to take the pool lock twice per pod.
    pub fn pool_target_port(&self) -> Option<i32> {
        self.pool
            .read()
            .expect("pool lock poisoned")
            .as_ref()
            .map(|p| p.spec.target_port)
    }

    /// Upsert of a model whose `poolRef` does not name this pool is treated
    /// as a delete, per §4.1.
    pub fn upsert_model(&self, name: String, model: InferenceModel) {
        match self.configured_pool_name() {
            Some(configured) if model.spec.pool_ref.name == configured => {
                self.models.insert(name, model);
            }
            Some(_) => {
                self.models.remove(&name);
            }
            // Pool not yet known: accept optimistically, the pool
            // reconciler will not retroactively purge mismatches but the
            // model reconciler re-evaluates on its own watch events.
            None => {
                self.models.insert(name, model);
            }
        }
    }

    fn configured_pool_name(&self) -> Option<String> {
        self.pool
            .read()
            .expect("pool lock poisoned")
            .as_ref()
            .and_then(|p| p.metadata.name.clone())
    }

    pub fn delete_model(&self, name: &str) {
        self.models.remove(name);
    }

    pub fn lookup_model(&self, name: &str) -> Option<InferenceModel> {
        self.models.get(name).map(|r| r.value().clone())
    }

    pub fn pod_set(&self) -> Vec<Pod> {
        self.pods.iter().map(|p| p.clone()).collect()
    }

    pub fn add_pod(&self, pod: Pod) {
        self.pods.insert(pod);
    }

    pub fn remove_pod(&self, pod: &Pod) {
        self.pods.remove(pod);
    }

    pub fn has_pod(&self, pod: &Pod) -> bool {
        self.pods.contains(pod)
    }
}
