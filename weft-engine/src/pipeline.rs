//! The function pipeline driver.
//!
//! Executes a revision's steps strictly in declared order, threading the
//! observed state, the desired state and the opaque context from step to
//! step. Each step runs through the stabilizing runner, so a step may be
//! invoked several times before the pipeline moves on.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use weft_api::meta::CONTEXT_KEY_ENVIRONMENT;
use weft_api::{Composite, CompositionRevision, DynamicObject, ObjectKey, PipelineStep, Secret};
use weft_fn::{ExtraResourcesFetcher, FunctionRunner, StabilizingRunner};
use weft_proto::v1::{
    self, CredentialData, Credentials, CredentialsSource, RequestMeta, Resource,
    RunFunctionRequest, Severity, State,
};
use weft_store::{get_as, ObjectStore};

use crate::endpoint::FunctionEndpointResolver;
use crate::error::EngineError;

/// Everything one pipeline run reads.
pub struct PipelineInput<'a> {
    pub xr: &'a Composite,
    pub revision: &'a CompositionRevision,
    /// Observed composed resources, keyed by resource name within the
    /// composition.
    pub observed: &'a BTreeMap<String, DynamicObject>,
    /// Observed per-resource connection details, harvested with the
    /// controller-UID check.
    pub observed_connection: &'a BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    /// Merged environment, if the composition references any.
    pub environment: Option<&'a Value>,
    /// Hard deadline shared by every function call of this reconcile.
    pub deadline: Instant,
}

/// One desired composed resource, decoded from the final pipeline state.
#[derive(Debug, Clone)]
pub struct DesiredComposed {
    pub object: DynamicObject,
    /// Readiness the function asserted explicitly, if any.
    pub ready: Option<bool>,
}

/// What one pipeline run produced.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub desired_composite: Option<DynamicObject>,
    /// Connection details functions declared for the composite itself.
    pub composite_connection: BTreeMap<String, Vec<u8>>,
    pub desired_resources: BTreeMap<String, DesiredComposed>,
    pub results: Vec<v1::Result>,
    pub conditions: Vec<v1::Condition>,
    /// Final context, for observability; the engine owns only the
    /// environment key.
    pub context: HashMap<String, Vec<u8>>,
    /// Smallest non-zero TTL any response hinted.
    pub ttl: Option<Duration>,
}

#[derive(Clone)]
pub struct PipelineRunner {
    runner: FunctionRunner,
    fetcher: ExtraResourcesFetcher,
    resolver: FunctionEndpointResolver,
    store: Arc<dyn ObjectStore>,
}

impl PipelineRunner {
    pub fn new(
        runner: FunctionRunner,
        fetcher: ExtraResourcesFetcher,
        resolver: FunctionEndpointResolver,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            runner,
            fetcher,
            resolver,
            store,
        }
    }

    /// Run the full pipeline once.
    ///
    /// Within one run, a later step's desired state replaces an earlier
    /// step's wholesale; across reconciles the engine reseeds from the live
    /// composite, so out-of-band user edits always win between runs.
    pub async fn run(&self, input: PipelineInput<'_>) -> Result<PipelineOutput, EngineError> {
        let steps = &input.revision.spec.composition.pipeline;

        let observed = seed_state(input.xr, input.observed, input.observed_connection);
        // Functions mutate from observed toward desired.
        let mut desired = observed.clone();

        let mut context: HashMap<String, Vec<u8>> = HashMap::new();
        if let Some(environment) = input.environment {
            context.insert(
                CONTEXT_KEY_ENVIRONMENT.to_string(),
                serde_json::to_vec(environment).expect("JSON values serialize"),
            );
        }

        let mut results: Vec<v1::Result> = Vec::new();
        let mut conditions: Vec<v1::Condition> = Vec::new();
        let mut ttl: Option<Duration> = None;

        let stabilizer = StabilizingRunner::new(&self.runner, &self.fetcher);
        for step in steps {
            let endpoint = self.resolver.resolve(&step.function_ref.name).await?;
            let credentials = self.load_credentials(step).await?;

            let request = RunFunctionRequest {
                meta: Some(RequestMeta {
                    tag: step.step.clone(),
                }),
                observed: Some(observed.clone()),
                desired: Some(desired.clone()),
                context: context.clone(),
                input: step
                    .input
                    .as_ref()
                    .map(|v| serde_json::to_vec(v).expect("JSON values serialize"))
                    .unwrap_or_default(),
                extra_resources: HashMap::new(),
                credentials,
            };

            let response = stabilizer
                .run(
                    &step.step,
                    &step.function_ref.name,
                    &endpoint,
                    request,
                    input.deadline,
                )
                .await?;

            if let Some(hint) = response.meta.as_ref().and_then(|m| m.ttl_duration()) {
                if !hint.is_zero() {
                    ttl = Some(match ttl {
                        Some(current) => current.min(hint),
                        None => hint,
                    });
                }
            }
            conditions.extend(response.conditions.iter().cloned());

            if response.is_fatal() {
                let message = response
                    .results
                    .iter()
                    .find(|r| r.severity() == Severity::Fatal)
                    .map(|r| r.message.clone())
                    .unwrap_or_else(|| "fatal result".to_string());
                tracing::warn!(step = %step.step, %message, "Pipeline aborted by fatal result");
                return Err(EngineError::FatalResult {
                    step: step.step.clone(),
                    message,
                    ttl,
                    conditions,
                });
            }

            results.extend(response.results.iter().cloned());
            // The function is authoritative for its outputs: desired state
            // and context replace, never merge.
            desired = response.desired.unwrap_or_default();
            context = response.context;
        }

        decode_output(desired, results, conditions, context, ttl)
    }

    async fn load_credentials(
        &self,
        step: &PipelineStep,
    ) -> Result<HashMap<String, Credentials>, EngineError> {
        let mut credentials = HashMap::new();
        for source in &step.credentials {
            let secret: Secret = get_as(
                self.store.as_ref(),
                &ObjectKey::namespaced(
                    Secret::type_ref(),
                    source.secret_ref.namespace.clone(),
                    source.secret_ref.name.clone(),
                ),
            )
            .await?;
            let data = secret
                .data
                .iter()
                .map(|(k, v)| (k.clone(), v.as_bytes().to_vec()))
                .collect();
            credentials.insert(
                source.name.clone(),
                Credentials {
                    source: Some(CredentialsSource::CredentialData(CredentialData { data })),
                },
            );
        }
        Ok(credentials)
    }
}

fn seed_state(
    xr: &Composite,
    observed: &BTreeMap<String, DynamicObject>,
    observed_connection: &BTreeMap<String, BTreeMap<String, Vec<u8>>>,
) -> State {
    let mut resources = HashMap::with_capacity(observed.len());
    for (name, object) in observed {
        let mut resource = Resource::from_object(object);
        if let Some(details) = observed_connection.get(name) {
            resource.connection_details = details
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
        }
        resources.insert(name.clone(), resource);
    }
    State {
        composite: Some(Resource::from_object(&xr.0)),
        resources,
    }
}

fn decode_output(
    desired: State,
    results: Vec<v1::Result>,
    conditions: Vec<v1::Condition>,
    context: HashMap<String, Vec<u8>>,
    ttl: Option<Duration>,
) -> Result<PipelineOutput, EngineError> {
    let (desired_composite, composite_connection) = match desired.composite {
        Some(resource) if !resource.resource.is_empty() => {
            let object = resource
                .try_to_object()
                .map_err(|e| EngineError::MalformedResponse {
                    step: "<composite>".to_string(),
                    message: e.to_string(),
                })?;
            let connection = resource
                .connection_details
                .into_iter()
                .collect::<BTreeMap<_, _>>();
            (Some(object), connection)
        }
        _ => (None, BTreeMap::new()),
    };

    let mut desired_resources = BTreeMap::new();
    for (name, resource) in desired.resources {
        let object = resource
            .try_to_object()
            .map_err(|e| EngineError::MalformedResponse {
                step: name.clone(),
                message: e.to_string(),
            })?;
        let ready = match resource.ready() {
            v1::Ready::True => Some(true),
            v1::Ready::False => Some(false),
            v1::Ready::Unspecified => None,
        };
        desired_resources.insert(name, DesiredComposed { object, ready });
    }

    Ok(PipelineOutput {
        desired_composite,
        composite_connection,
        desired_resources,
        results,
        conditions,
        context,
        ttl,
    })
}
