use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::{self, Config, Event};
use kube::{Api, Client, ResourceExt};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::crd::InferencePool;
use crate::datastore::Datastore;
use crate::observability::RECONCILE_EVENTS_TOTAL;

/// Watches `InferencePool` objects in `namespace`, applying the one whose
/// name matches `pool_name` into the datastore. Only applies an update
/// when the resource version actually changed, per
/// `examples/original_source/pkg/ext-proc/backend/inferencepool_reconciler.go`.
pub async fn run(
    client: Client,
    datastore: Arc<Datastore>,
    pool_name: String,
    namespace: String,
    mut shutdown: broadcast::Receiver<()>,
) {
    let api: Api<InferencePool> = Api::namespaced(client, &namespace);
    let mut stream = watcher(api, Config::default()).boxed();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("pool_reconciler_stopped");
                return;
            }
            event = stream.next() => {
                match event {
                    Some(Ok(event)) => handle_event(&datastore, &pool_name, event),
                    Some(Err(err)) => warn!(error = %err, "pool_watch_error"),
                    None => {
                        info!("pool_watch_stream_ended");
                        return;
                    }
                }
            }
        }
    }
}

fn handle_event(datastore: &Datastore, pool_name: &str, event: Event<InferencePool>) {
    RECONCILE_EVENTS_TOTAL.with_label_values(&["pool"]).inc();
    match event {
        Event::Applied(pool) => apply(datastore, pool_name, pool),
        Event::Deleted(_) => {}
        Event::Restarted(pools) => {
            for pool in pools {
                apply(datastore, pool_name, pool);
            }
        }
    }
}

fn apply(datastore: &Datastore, pool_name: &str, pool: InferencePool) {
    if pool.name_any() != pool_name {
        return;
    }
    let changed = match datastore.get_pool() {
        Ok(current) => current.resource_version() != pool.resource_version(),
        Err(_) => true,
    };
    if changed {
        info!(pool = %pool_name, "pool_reconciled");
        datastore.set_pool(pool);
    }
}
