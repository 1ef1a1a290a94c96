//! Library surface for the `epp` binary: everything the `commands::*`
//! entrypoints wire together, in the teacher's `kube_devops::{crd,
//! governance, enforcement}` layout (modules declared here, consumed by
//! `commands` via the crate path rather than `mod`-included into `main.rs`).

pub mod config;
pub mod crd;
pub mod datastore;
pub mod error;
pub mod extproc;
pub mod filters;
pub mod metrics;
pub mod observability;
pub mod pod;
pub mod reconcilers;
pub mod scheduler;
