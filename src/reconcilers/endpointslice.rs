use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::discovery::v1::{Endpoint, EndpointSlice};
use kube::runtime::watcher::{self, Config, Event};
use kube::{Api, Client};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::datastore::Datastore;
use crate::observability::RECONCILE_EVENTS_TOTAL;
use crate::pod::Pod;

const SERVICE_OWNER_LABEL: &str = "kubernetes.io/service-name";
const ZONE_LABEL: &str = "topology.kubernetes.io/zone";

/// Watches `EndpointSlice` objects belonging to `service_name` and
/// reconciles the pod set, grounded on
/// `examples/original_source/pkg/ext-proc/backend/endpointslice_reconciler.go`:
/// build the set of currently-ready pods named by *this* slice, add them
/// all, then remove any datastore pod absent from that set. This mirrors
/// the source exactly, including its property that a reconcile of one
/// slice can only ever assert membership for the pods that slice names.
pub async fn run(
    client: Client,
    datastore: Arc<Datastore>,
    service_name: String,
    namespace: String,
    zone: Option<String>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let api: Api<EndpointSlice> = Api::namespaced(client, &namespace);
    let mut stream = watcher(api, Config::default()).boxed();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("endpointslice_reconciler_stopped");
                return;
            }
            event = stream.next() => {
                match event {
                    Some(Ok(event)) => {
                        handle_event(&datastore, &service_name, zone.as_deref(), event)
                    }
                    Some(Err(err)) => warn!(error = %err, "endpointslice_watch_error"),
                    None => {
                        info!("endpointslice_watch_stream_ended");
                        return;
                    }
                }
            }
        }
    }
}

fn handle_event(
    datastore: &Datastore,
    service_name: &str,
    zone: Option<&str>,
    event: Event<EndpointSlice>,
) {
    RECONCILE_EVENTS_TOTAL.with_label_values(&["endpointslice"]).inc();
    match event {
        Event::Applied(slice) => update_datastore(datastore, service_name, zone, &slice),
        Event::Deleted(slice) => update_datastore(datastore, service_name, zone, &empty_of(&slice)),
        Event::Restarted(slices) => {
            for slice in slices {
                update_datastore(datastore, service_name, zone, &slice);
            }
        }
    }
}

/// A deleted slice carries no live endpoints; reconciling against an
/// emptied copy purges everything it previously contributed.
fn empty_of(slice: &EndpointSlice) -> EndpointSlice {
    let mut empty = slice.clone();
    empty.endpoints = Vec::new();
    empty
}

fn update_datastore(datastore: &Datastore, service_name: &str, zone: Option<&str>, slice: &EndpointSlice) {
    if !owns_slice(slice, service_name) {
        return;
    }

    let Some(target_port) = datastore.pool_target_port() else {
        warn!("endpointslice_reconcile_skipped_pool_uninitialized");
        return;
    };

    let mut current = std::collections::HashSet::new();
    for endpoint in &slice.endpoints {
        if !valid_pod(endpoint, zone) {
            continue;
        }
        let Some(target_ref) = &endpoint.target_ref else { continue };
        let Some(name) = &target_ref.name else { continue };
        let Some(address) = endpoint.addresses.first() else { continue };
        let namespace = target_ref.namespace.clone().unwrap_or_default();
        let pod = Pod::new(namespace, name.clone(), format!("{address}:{target_port}"));
        datastore.add_pod(pod.clone());
        current.insert(pod);
    }

    for pod in datastore.pod_set() {
        if !current.contains(&pod) {
            datastore.remove_pod(&pod);
        }
    }

    info!(service = %service_name, count = current.len(), "endpointslice_reconciled");
}

fn owns_slice(slice: &EndpointSlice, service_name: &str) -> bool {
    slice
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(SERVICE_OWNER_LABEL))
        .map(|v| v == service_name)
        .unwrap_or(false)
}

fn valid_pod(endpoint: &Endpoint, zone: Option<&str>) -> bool {
    let ready = endpoint
        .conditions
        .as_ref()
        .and_then(|c| c.ready)
        .unwrap_or(false);
    if !ready {
        return false;
    }
    match zone {
        None => true,
        Some(zone) => endpoint
            .zone
            .as_deref()
            .map(|z| z == zone)
            .unwrap_or(false),
    }
}
