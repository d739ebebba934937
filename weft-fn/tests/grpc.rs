//! End-to-end transport test: a real tonic server on a loopback port,
//! called through the production gRPC transport.

use std::time::Duration;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use weft_fn::{FunctionEndpoint, FunctionRunner, RunnerConfig};
use weft_proto::tonic::transport::Server;
use weft_proto::tonic::{Request, Response, Status};
use weft_proto::v1::{
    FunctionRunner as FunctionRunnerService, FunctionRunnerServiceServer, RunFunctionRequest,
    RunFunctionResponse,
};

/// Echoes the request's observed state back as desired.
struct EchoFunction;

#[weft_proto::tonic::async_trait]
impl FunctionRunnerService for EchoFunction {
    async fn run_function(
        &self,
        request: Request<RunFunctionRequest>,
    ) -> Result<Response<RunFunctionResponse>, Status> {
        let request = request.into_inner();
        Ok(Response::new(RunFunctionResponse {
            desired: request.observed,
            context: request.context,
            ..Default::default()
        }))
    }
}

async fn serve_echo() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        Server::builder()
            .add_service(FunctionRunnerServiceServer::new(EchoFunction))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    format!("127.0.0.1:{}", address.port())
}

#[tokio::test]
async fn runner_calls_a_live_function_over_grpc() {
    let address = serve_echo().await;
    let runner = FunctionRunner::grpc(RunnerConfig {
        allow_insecure: true,
        default_timeout: Duration::from_secs(5),
    });

    let mut request = RunFunctionRequest::default();
    request
        .context
        .insert("fn.weft.io/key".to_string(), b"opaque".to_vec());

    let response = runner
        .run_function(
            "echo",
            &FunctionEndpoint::plaintext(&address),
            request,
            None,
        )
        .await
        .unwrap();

    assert_eq!(
        response.context.get("fn.weft.io/key").map(Vec::as_slice),
        Some(b"opaque".as_ref())
    );
}

#[tokio::test]
async fn unreachable_endpoint_is_transient() {
    let runner = FunctionRunner::grpc(RunnerConfig {
        allow_insecure: true,
        default_timeout: Duration::from_millis(500),
    });

    let err = runner
        .run_function(
            "echo",
            // Reserved port with nothing listening.
            &FunctionEndpoint::plaintext("127.0.0.1:1"),
            RunFunctionRequest::default(),
            None,
        )
        .await
        .unwrap_err();
    assert!(!err.is_terminal());
}
