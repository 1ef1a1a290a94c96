//! The ext-proc gRPC surface: wire types generated from `proto/ext_proc.proto`
//! plus the per-message handlers grounded on
//! `examples/original_source/pkg/ext-proc/handlers/{server,request,response}.go`.

pub mod proto {
    tonic::include_proto!("epp.extproc.v1");
}

pub mod request;
pub mod response;
pub mod server;

pub use server::{ExtProcService, RequestContext};
