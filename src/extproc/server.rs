//! The `ExternalProcessor` gRPC service: one task per bidirectional stream,
//! dispatching each `ProcessingRequest` to the matching handler and mapping
//! errors onto either an immediate 429 or a propagated gRPC status, grounded
//! on `examples/original_source/pkg/ext-proc/handlers/server.go`'s
//! `Process`/`RequestContext`.

use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{error, warn};

use crate::datastore::Datastore;
use crate::error::EppError;
use crate::pod::Pod;
use crate::scheduler::Scheduler;

use super::proto::external_processor_server::ExternalProcessor;
use super::proto::processing_request::Request as ReqKind;
use super::proto::processing_response::Response as RespKind;
use super::proto::{
    body_mutation, BodyMutation, BodyResponse, CommonResponse, HeaderMutation, HeaderValue,
    HeaderValueOption, HeadersResponse, HttpStatus, ImmediateResponse, ProcessingRequest,
    ProcessingResponse,
};
use super::request::{self as req_handlers, BodyOutcome};
use super::response as resp_handlers;

/// Per-stream state threaded through the handler calls, mirroring the Go
/// source's `RequestContext` (`TargetPod`, `Model`).
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub target_pod: Option<Pod>,
    pub model: String,
}

pub struct ExtProcService {
    datastore: Arc<Datastore>,
    scheduler: Arc<Scheduler>,
    target_pod_header: String,
    enable_response_buffering: bool,
}

impl ExtProcService {
    pub fn new(
        datastore: Arc<Datastore>,
        scheduler: Arc<Scheduler>,
        target_pod_header: String,
        enable_response_buffering: bool,
    ) -> Self {
        Self { datastore, scheduler, target_pod_header, enable_response_buffering }
    }
}

fn request_headers_response(clear_route_cache: bool) -> ProcessingResponse {
    ProcessingResponse {
        response: Some(RespKind::RequestHeaders(HeadersResponse {
            response: Some(CommonResponse { clear_route_cache, ..Default::default() }),
        })),
    }
}

fn request_body_response(header_key: &str, pod: &Pod, body: Vec<u8>) -> ProcessingResponse {
    let mutation = HeaderMutation {
        set_headers: vec![
            HeaderValueOption {
                header: Some(HeaderValue { key: header_key.to_string(), raw_value: pod.address.clone().into_bytes() }),
            },
            HeaderValueOption {
                header: Some(HeaderValue { key: "content-length".to_string(), raw_value: body.len().to_string().into_bytes() }),
            },
        ],
    };
    ProcessingResponse {
        response: Some(RespKind::RequestBody(BodyResponse {
            response: Some(CommonResponse {
                header_mutation: Some(mutation),
                body_mutation: Some(BodyMutation { mutation: Some(body_mutation::Mutation::Body(body)) }),
                ..Default::default()
            }),
        })),
    }
}

/// Sheddable traffic shed by the filter pipeline is surfaced to Envoy as an
/// immediate 429, per spec.md §4.5 and the Go source's
/// `codes.ResourceExhausted -> StatusCode_TooManyRequests` mapping.
fn immediate_response(http_status: u32) -> ProcessingResponse {
    ProcessingResponse {
        response: Some(RespKind::ImmediateResponse(ImmediateResponse {
            status: Some(HttpStatus { code: http_status }),
            ..Default::default()
        })),
    }
}

fn response_headers_response(headers: Vec<(String, String)>) -> ProcessingResponse {
    let mutation = HeaderMutation {
        set_headers: headers
            .into_iter()
            .map(|(key, value)| HeaderValueOption { header: Some(HeaderValue { key, raw_value: value.into_bytes() }) })
            .collect(),
    };
    ProcessingResponse {
        response: Some(RespKind::ResponseHeaders(HeadersResponse {
            response: Some(CommonResponse { header_mutation: Some(mutation), ..Default::default() }),
        })),
    }
}

fn response_body_response() -> ProcessingResponse {
    ProcessingResponse {
        response: Some(RespKind::ResponseBody(BodyResponse { response: Some(CommonResponse::default()) })),
    }
}

/// Dispatches one inbound message. `Ok(None)` means "no response for this
/// message" (not currently reachable, kept for symmetry with the Go switch).
async fn handle_message(
    service: &ExtProcService,
    ctx: &mut RequestContext,
    req: ProcessingRequest,
) -> std::result::Result<ProcessingResponse, EppError> {
    match req.request {
        Some(ReqKind::RequestHeaders(_)) => {
            Ok(request_headers_response(req_handlers::handle_request_headers()))
        }
        Some(ReqKind::RequestBody(body)) => {
            match req_handlers::handle_request_body(ctx, &service.datastore, &service.scheduler, &body.body)? {
                BodyOutcome::Route { target_pod, body } => {
                    Ok(request_body_response(&service.target_pod_header, &target_pod, body))
                }
                BodyOutcome::ResourceExhausted => Ok(immediate_response(429)),
            }
        }
        Some(ReqKind::ResponseHeaders(_)) => {
            Ok(response_headers_response(resp_handlers::response_headers(ctx)))
        }
        Some(ReqKind::ResponseBody(body)) => {
            if service.enable_response_buffering {
                let usage = resp_handlers::parse_response_usage(&body.body)?;
                tracing::info!(
                    model = %ctx.model,
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    total_tokens = usage.total_tokens,
                    "response_usage_observed"
                );
            }
            Ok(response_body_response())
        }
        None => Err(EppError::ParseFailure("processing request had no payload".to_string())),
    }
}

/// Maps a handler error onto the wire: `ResourceExhausted` is shed as an
/// immediate 429 response rather than tearing down the stream; every other
/// error ends the stream with the matching gRPC status. The Go source never
/// wraps these in a `status.Error` of their own, so `status.Code(err)`
/// resolves them all to `codes.Unknown`
/// (`examples/original_source/pkg/ext-proc/handlers/server.go:111`); this
/// mirrors that rather than inventing a more specific code per variant.
fn error_to_outcome(err: EppError) -> std::result::Result<ProcessingResponse, Status> {
    match err {
        EppError::ResourceExhausted(_) => Ok(immediate_response(429)),
        EppError::ModelNotFound(model) => Err(Status::unknown(format!("unknown model: {model}"))),
        EppError::ParseFailure(reason) => Err(Status::unknown(reason)),
        EppError::WeightedDrawEmpty => Err(Status::unknown("inference model has no usable target weights")),
        EppError::NotInitialized => Err(Status::unknown("pool configuration not yet loaded")),
        other => Err(Status::internal(other.to_string())),
    }
}

impl ExternalProcessor for ExtProcService {
    type ProcessStream = Pin<Box<dyn Stream<Item = std::result::Result<ProcessingResponse, Status>> + Send + 'static>>;

    async fn process(
        &self,
        request: Request<Streaming<ProcessingRequest>>,
    ) -> std::result::Result<Response<Self::ProcessStream>, Status> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(16);

        let datastore = self.datastore.clone();
        let scheduler = self.scheduler.clone();
        let target_pod_header = self.target_pod_header.clone();
        let enable_response_buffering = self.enable_response_buffering;

        tokio::spawn(async move {
            let service = ExtProcService { datastore, scheduler, target_pod_header, enable_response_buffering };
            let mut ctx = RequestContext::default();

            loop {
                let next = match inbound.message().await {
                    Ok(Some(req)) => req,
                    Ok(None) => return,
                    Err(status) => {
                        warn!(error = %status, "extproc_stream_recv_failed");
                        return;
                    }
                };

                let outcome = match handle_message(&service, &mut ctx, next).await {
                    Ok(resp) => Ok(resp),
                    Err(err) => {
                        error!(error = %err, "extproc_handler_failed");
                        error_to_outcome(err)
                    }
                };

                let should_stop = outcome.is_err();
                if tx.send(outcome).await.is_err() {
                    return;
                }
                if should_stop {
                    return;
                }
            }
        });

        let stream = ReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Criticality, InferenceModel, InferenceModelSpec, LocalObjectReference};
    use crate::metrics::scrape::PodMetricsClient;
    use crate::metrics::MetricsProvider;
    use crate::pod::PodMetrics;
    use async_trait::async_trait;
    use kube::api::ObjectMeta;

    struct NoopScraper;
    #[async_trait]
    impl PodMetricsClient for NoopScraper {
        async fn fetch(&self, _pod: &Pod, previous: &PodMetrics) -> crate::error::Result<PodMetrics> {
            Ok(previous.clone())
        }
    }

    fn service_with_one_pod_model(model_name: &str) -> ExtProcService {
        let datastore = Arc::new(Datastore::new());
        datastore.upsert_model(
            model_name.to_string(),
            InferenceModel {
                metadata: ObjectMeta::default(),
                spec: InferenceModelSpec {
                    model_name: model_name.to_string(),
                    criticality: Criticality::Critical,
                    pool_ref: LocalObjectReference { name: "pool-1".into() },
                    target_models: vec![],
                },
            },
        );
        let pod = Pod::new("default", "p1", "10.0.0.1:8000");
        datastore.add_pod(pod.clone());
        let metrics = Arc::new(MetricsProvider::new(datastore.clone(), Arc::new(NoopScraper)));
        metrics.update_pod_metrics(pod, PodMetrics::default());
        let scheduler = Arc::new(Scheduler::new(metrics));
        ExtProcService::new(datastore, scheduler, "target-pod".to_string(), true)
    }

    #[tokio::test]
    async fn request_headers_sets_clear_route_cache() {
        let service = service_with_one_pod_model("m");
        let mut ctx = RequestContext::default();
        let req = ProcessingRequest { request: Some(ReqKind::RequestHeaders(Default::default())) };
        let resp = handle_message(&service, &mut ctx, req).await.unwrap();
        match resp.response {
            Some(RespKind::RequestHeaders(h)) => assert!(h.response.unwrap().clear_route_cache),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_body_routes_and_sets_target_pod_header() {
        let service = service_with_one_pod_model("my-model");
        let mut ctx = RequestContext::default();
        let body = super::super::proto::HttpBody {
            body: br#"{"model": "my-model"}"#.to_vec(),
            end_of_stream: false,
        };
        let req = ProcessingRequest { request: Some(ReqKind::RequestBody(body)) };
        let resp = handle_message(&service, &mut ctx, req).await.unwrap();
        match resp.response {
            Some(RespKind::RequestBody(b)) => {
                let mutation = b.response.unwrap().header_mutation.unwrap();
                let keys: Vec<_> = mutation.set_headers.iter().filter_map(|h| h.header.as_ref().map(|hv| hv.key.clone())).collect();
                assert!(keys.contains(&"target-pod".to_string()));
                assert!(keys.contains(&"content-length".to_string()));
            }
            other => panic!("unexpected response: {other:?}"),
        }
        assert!(ctx.target_pod.is_some());
    }

    #[tokio::test]
    async fn unknown_model_becomes_an_unknown_status() {
        let service = service_with_one_pod_model("known-model");
        let mut ctx = RequestContext::default();
        let body = super::super::proto::HttpBody { body: br#"{"model": "unknown"}"#.to_vec(), end_of_stream: false };
        let req = ProcessingRequest { request: Some(ReqKind::RequestBody(body)) };
        let err = handle_message(&service, &mut ctx, req).await.unwrap_err();
        let status = error_to_outcome(err).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unknown);
    }

    #[test]
    fn resource_exhausted_becomes_an_immediate_429_not_a_stream_error() {
        let outcome = error_to_outcome(EppError::ResourceExhausted("full".to_string())).unwrap();
        match outcome.response {
            Some(RespKind::ImmediateResponse(r)) => assert_eq!(r.status.unwrap().code, 429),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn response_headers_echo_target_pod_once_known() {
        let service = service_with_one_pod_model("my-model");
        let mut ctx = RequestContext { target_pod: Some(Pod::new("default", "p1", "10.0.0.1:8000")), model: "my-model".into() };
        let req = ProcessingRequest { request: Some(ReqKind::ResponseHeaders(Default::default())) };
        let resp = handle_message(&service, &mut ctx, req).await.unwrap();
        match resp.response {
            Some(RespKind::ResponseHeaders(h)) => {
                let mutation = h.response.unwrap().header_mutation.unwrap();
                assert!(mutation.set_headers.iter().any(|hv| hv.header.as_ref().unwrap().key == "target-pod"));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
