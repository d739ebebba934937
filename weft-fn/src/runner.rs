//! Single-call function transport: one gRPC invocation with deadline,
//! TLS selection and metrics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tonic::{Code, Status};
use weft_proto::{FunctionRunnerServiceClient, RunFunctionRequest, RunFunctionResponse, Severity};

use crate::error::FunctionError;
use crate::metrics;

/// PEM material for mutual TLS against a function endpoint.
#[derive(Debug, Clone)]
pub struct ClientTlsBundle {
    pub ca_cert: Vec<u8>,
    pub client_cert: Vec<u8>,
    pub client_key: Vec<u8>,
}

/// A resolved function endpoint: where to dial and how.
#[derive(Debug, Clone)]
pub struct FunctionEndpoint {
    /// `host:port`, resolved from the revision's published endpoint.
    pub address: String,
    /// Client TLS material from the function's server TLS secret. `None`
    /// means plaintext, which the runner only permits when configured to.
    pub tls: Option<ClientTlsBundle>,
}

impl FunctionEndpoint {
    pub fn plaintext(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tls: None,
        }
    }
}

/// Transport seam under the runner, so callers above it can be tested
/// without a live endpoint.
#[async_trait]
pub trait FunctionTransport: Send + Sync {
    async fn run(
        &self,
        endpoint: &FunctionEndpoint,
        request: RunFunctionRequest,
        timeout: Duration,
    ) -> Result<RunFunctionResponse, Status>;
}

/// The production transport: tonic channels pooled per endpoint address.
#[derive(Default)]
pub struct GrpcTransport {
    channels: DashMap<String, Channel>,
}

impl GrpcTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel_for(&self, endpoint: &FunctionEndpoint) -> Result<Channel, Status> {
        if let Some(channel) = self.channels.get(&endpoint.address) {
            return Ok(channel.clone());
        }
        let channel = match &endpoint.tls {
            Some(tls) => {
                let config = ClientTlsConfig::new()
                    .ca_certificate(Certificate::from_pem(&tls.ca_cert))
                    .identity(Identity::from_pem(&tls.client_cert, &tls.client_key));
                Endpoint::from_shared(format!("https://{}", endpoint.address))
                    .and_then(|e| e.tls_config(config))
                    .map_err(|e| Status::unavailable(e.to_string()))?
                    .connect_lazy()
            }
            None => Endpoint::from_shared(format!("http://{}", endpoint.address))
                .map_err(|e| Status::unavailable(e.to_string()))?
                .connect_lazy(),
        };
        self.channels
            .insert(endpoint.address.clone(), channel.clone());
        Ok(channel)
    }
}

#[async_trait]
impl FunctionTransport for GrpcTransport {
    async fn run(
        &self,
        endpoint: &FunctionEndpoint,
        request: RunFunctionRequest,
        timeout: Duration,
    ) -> Result<RunFunctionResponse, Status> {
        let channel = self.channel_for(endpoint)?;
        let mut client = FunctionRunnerServiceClient::new(channel);
        let mut request = tonic::Request::new(request);
        request.set_timeout(timeout);
        client.run_function(request).await.map(|r| r.into_inner())
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Permit plaintext calls to functions without a server TLS secret.
    pub allow_insecure: bool,
    /// Deadline when the caller does not carry one.
    pub default_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            allow_insecure: false,
            default_timeout: Duration::from_secs(60),
        }
    }
}

/// Invokes one function once, with metrics and error classification.
/// Cloning shares the transport (and so the channel pool).
#[derive(Clone)]
pub struct FunctionRunner {
    transport: Arc<dyn FunctionTransport>,
    config: RunnerConfig,
}

impl FunctionRunner {
    pub fn new(transport: Arc<dyn FunctionTransport>, config: RunnerConfig) -> Self {
        Self { transport, config }
    }

    /// A runner backed by the production gRPC transport.
    pub fn grpc(config: RunnerConfig) -> Self {
        Self::new(Arc::new(GrpcTransport::new()), config)
    }

    /// Call `function` at `endpoint` once.
    ///
    /// `timeout` is normally the remaining reconcile budget; the configured
    /// default applies when absent. `InvalidArgument` and `Unimplemented`
    /// are terminal, every other failure is transient.
    pub async fn run_function(
        &self,
        function: &str,
        endpoint: &FunctionEndpoint,
        request: RunFunctionRequest,
        timeout: Option<Duration>,
    ) -> Result<RunFunctionResponse, FunctionError> {
        if endpoint.tls.is_none() && !self.config.allow_insecure {
            return Err(FunctionError::Terminal {
                function: function.to_string(),
                message: format!(
                    "endpoint {} has no TLS configuration and insecure functions are disabled",
                    endpoint.address
                ),
            });
        }

        let timeout = timeout.unwrap_or(self.config.default_timeout);
        metrics::record_request(function);
        let start = Instant::now();

        let outcome =
            tokio::time::timeout(timeout, self.transport.run(endpoint, request, timeout)).await;
        let elapsed = start.elapsed().as_secs_f64();

        match outcome {
            Err(_) => {
                metrics::record_response(function, "DeadlineExceeded", "", elapsed);
                Err(FunctionError::Transient {
                    function: function.to_string(),
                    message: format!("call did not complete within {timeout:?}"),
                })
            }
            Ok(Err(status)) => {
                metrics::record_response(function, &format!("{:?}", status.code()), "", elapsed);
                tracing::debug!(
                    function,
                    code = ?status.code(),
                    "RunFunction failed"
                );
                Err(classify(function, status))
            }
            Ok(Ok(response)) => {
                metrics::record_response(
                    function,
                    "Ok",
                    severity_label(response.most_severe()),
                    elapsed,
                );
                Ok(response)
            }
        }
    }
}

fn severity_label(severity: Option<Severity>) -> &'static str {
    match severity {
        Some(Severity::Fatal) => "Fatal",
        Some(Severity::Warning) => "Warning",
        Some(Severity::Normal) => "Normal",
        Some(Severity::Unspecified) | None => "",
    }
}

fn classify(function: &str, status: Status) -> FunctionError {
    match status.code() {
        Code::InvalidArgument | Code::Unimplemented => FunctionError::Terminal {
            function: function.to_string(),
            message: status.message().to_string(),
        },
        _ => FunctionError::Transient {
            function: function.to_string(),
            message: format!("{}: {}", status.code(), status.message()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticTransport(Result<RunFunctionResponse, Code>);

    #[async_trait]
    impl FunctionTransport for StaticTransport {
        async fn run(
            &self,
            _endpoint: &FunctionEndpoint,
            _request: RunFunctionRequest,
            _timeout: Duration,
        ) -> Result<RunFunctionResponse, Status> {
            match &self.0 {
                Ok(response) => Ok(response.clone()),
                Err(code) => Err(Status::new(*code, "boom")),
            }
        }
    }

    fn insecure_runner(transport: StaticTransport) -> FunctionRunner {
        FunctionRunner::new(
            Arc::new(transport),
            RunnerConfig {
                allow_insecure: true,
                ..RunnerConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn insecure_endpoint_without_opt_in_is_terminal() {
        let runner = FunctionRunner::new(
            Arc::new(StaticTransport(Ok(RunFunctionResponse::default()))),
            RunnerConfig::default(),
        );
        let err = runner
            .run_function(
                "fn",
                &FunctionEndpoint::plaintext("fn.ns.svc:9443"),
                RunFunctionRequest::default(),
                None,
            )
            .await
            .unwrap_err();
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn invalid_argument_is_terminal() {
        let runner = insecure_runner(StaticTransport(Err(Code::InvalidArgument)));
        let err = runner
            .run_function(
                "fn",
                &FunctionEndpoint::plaintext("fn.ns.svc:9443"),
                RunFunctionRequest::default(),
                None,
            )
            .await
            .unwrap_err();
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn unavailable_is_transient() {
        let runner = insecure_runner(StaticTransport(Err(Code::Unavailable)));
        let err = runner
            .run_function(
                "fn",
                &FunctionEndpoint::plaintext("fn.ns.svc:9443"),
                RunFunctionRequest::default(),
                None,
            )
            .await
            .unwrap_err();
        assert!(!err.is_terminal());
    }

    #[tokio::test]
    async fn successful_call_returns_the_response() {
        let runner = insecure_runner(StaticTransport(Ok(RunFunctionResponse::default())));
        let response = runner
            .run_function(
                "fn",
                &FunctionEndpoint::plaintext("fn.ns.svc:9443"),
                RunFunctionRequest::default(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(response, RunFunctionResponse::default());
    }
}
