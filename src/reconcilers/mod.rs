//! Watch-driven reducers that mutate the [`Datastore`](crate::datastore::Datastore).
//!
//! Each reconciler owns one `tokio::spawn`ed task reading a
//! `kube_runtime::watcher::Event` stream, in the teacher's `watch_loop`
//! style (`commands/watch.rs`) rather than its `Controller`-driven
//! `reconcile.rs` style: these are plain single-object reducers with no
//! requeue/retry/finalizer/status-subresource semantics, so the leaner
//! `watcher()` primitive is the better fit — the teacher itself reaches for
//! it for its own bare `Pod` watch.

pub mod endpointslice;
pub mod model;
pub mod pool;
