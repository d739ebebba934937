//! Controller assembly.
//!
//! One cooperative worker pool per controller: every composite kind served,
//! every claim kind bound to it, plus compositions and package revisions.
//! Each pool pulls from its own deduplicating rate-limited queue, fed by the
//! store's watch streams; a single cancellation token stops everything.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use weft_api::{Composition, FunctionRevision, ProviderRevision, TypeRef};
use weft_core::{forward_watch, Controller, EngineConfig, RateLimit, WorkQueue};
use weft_engine::{
    claim_key_of, ClaimReconciler, CompositeReconciler, CompositionReconciler,
    FunctionEndpointResolver, PipelineRunner,
};
use weft_fn::{ExtraResourcesFetcher, FunctionRunner};
use weft_runtime::{FunctionRevisionReconciler, ProviderRevisionReconciler};
use weft_store::{ObjectStore, WatchEvent};

/// Wires reconcilers, queues and watches into running worker pools.
///
/// # Example
///
/// ```ignore
/// let handles = ControllerManager::new(store, runner, config)
///     .serve_composite(TypeRef::new("example.org/v1", "XDatabase"))
///     .serve_claim(
///         TypeRef::new("example.org/v1", "Database"),
///         TypeRef::new("example.org/v1", "XDatabase"),
///     )
///     .run(cancel.clone())
///     .await;
/// ```
pub struct ControllerManager {
    store: Arc<dyn ObjectStore>,
    runner: FunctionRunner,
    config: EngineConfig,
    composite_types: Vec<TypeRef>,
    claim_types: Vec<(TypeRef, TypeRef)>,
}

impl ControllerManager {
    pub fn new(store: Arc<dyn ObjectStore>, runner: FunctionRunner, config: EngineConfig) -> Self {
        Self {
            store,
            runner,
            config,
            composite_types: Vec::new(),
            claim_types: Vec::new(),
        }
    }

    /// Serve composites of this kind.
    pub fn serve_composite(mut self, xr_type: TypeRef) -> Self {
        self.composite_types.push(xr_type);
        self
    }

    /// Serve claims of `claim_type`, bound to composites of `xr_type`.
    pub fn serve_claim(mut self, claim_type: TypeRef, xr_type: TypeRef) -> Self {
        self.claim_types.push((claim_type, xr_type));
        self
    }

    fn rate(&self) -> RateLimit {
        RateLimit {
            max: self.config.max_backoff,
            ..RateLimit::default()
        }
    }

    /// Start every controller. Returns the worker and watch task handles;
    /// they finish when `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        let workers = self.config.workers;

        // Composites: one pool per served kind, re-triggered by the kind
        // itself and by its labeled composed resources where watchable.
        for xr_type in &self.composite_types {
            let pipeline = PipelineRunner::new(
                self.runner.clone(),
                ExtraResourcesFetcher::new(self.store.clone()),
                FunctionEndpointResolver::new(self.store.clone(), self.config.namespace.clone()),
                self.store.clone(),
            );
            let reconciler =
                CompositeReconciler::new(self.store.clone(), pipeline, self.config.clone());
            let controller = Controller::new("composite", reconciler, workers, self.rate());
            handles.extend(controller.start(cancel.clone()));
            handles.push(self.watch_keys(xr_type, controller.queue(), cancel.clone()).await);

            // A composite waiting on a missing composition or function
            // endpoint re-queues when the dependency appears.
            for dep_type in [Composition::type_ref(), FunctionRevision::type_ref()] {
                handles.push(
                    self.watch_retrigger(dep_type, xr_type.clone(), controller.queue(), cancel.clone())
                        .await,
                );
            }
        }

        // Claims: triggered by the claim itself and by its bound composite.
        for (claim_type, xr_type) in &self.claim_types {
            let reconciler =
                ClaimReconciler::new(self.store.clone(), self.config.namespace.clone());
            let controller = Controller::new("claim", reconciler, workers, self.rate());
            handles.extend(controller.start(cancel.clone()));
            handles.push(self.watch_keys(claim_type, controller.queue(), cancel.clone()).await);

            let claim_type = claim_type.clone();
            let stream = self.store.watch(xr_type).await;
            handles.push(forward_watch(
                stream,
                controller.queue(),
                cancel.clone(),
                move |event: &WatchEvent| {
                    claim_key_of(event.object(), &claim_type).into_iter().collect()
                },
            ));
        }

        // Compositions: snapshot revisions eagerly.
        let controller = Controller::new(
            "composition",
            CompositionReconciler::new(self.store.clone()),
            workers,
            self.rate(),
        );
        handles.extend(controller.start(cancel.clone()));
        handles.push(
            self.watch_keys(&Composition::type_ref(), controller.queue(), cancel.clone())
                .await,
        );

        // Package revisions: the runtime hook.
        let controller = Controller::new(
            "function-revision",
            FunctionRevisionReconciler::new(
                self.store.clone(),
                self.config.namespace.clone(),
                self.config.default_registry.clone(),
            ),
            workers,
            self.rate(),
        );
        handles.extend(controller.start(cancel.clone()));
        handles.push(
            self.watch_keys(&FunctionRevision::type_ref(), controller.queue(), cancel.clone())
                .await,
        );

        let controller = Controller::new(
            "provider-revision",
            ProviderRevisionReconciler::new(
                self.store.clone(),
                self.config.namespace.clone(),
                self.config.default_registry.clone(),
            ),
            workers,
            self.rate(),
        );
        handles.extend(controller.start(cancel.clone()));
        handles.push(
            self.watch_keys(&ProviderRevision::type_ref(), controller.queue(), cancel.clone())
                .await,
        );

        handles
    }

    /// Watch one type and enqueue the object's own key for each event.
    async fn watch_keys(
        &self,
        type_ref: &TypeRef,
        queue: Arc<WorkQueue<weft_api::ObjectKey>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let stream = self.store.watch(type_ref).await;
        forward_watch(stream, queue, cancel, |event: &WatchEvent| {
            event.object().key().into_iter().collect()
        })
    }

    /// Watch `dep_type` and re-enqueue every composite of `xr_type` on each
    /// event. Coarse on purpose: reconciles are idempotent recomputation, and
    /// dependency changes (a new composition spec, a published endpoint) are
    /// rare next to composite churn.
    async fn watch_retrigger(
        &self,
        dep_type: TypeRef,
        xr_type: TypeRef,
        queue: Arc<WorkQueue<weft_api::ObjectKey>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        use futures_util::StreamExt as _;

        let store = self.store.clone();
        let mut stream = store.watch(&dep_type).await;
        tokio::spawn(async move {
            loop {
                let _event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = stream.next() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                if let Ok(composites) = store.list(&xr_type, None, None).await {
                    for composite in composites {
                        if let Some(key) = composite.key() {
                            queue.add(key);
                        }
                    }
                }
            }
        })
    }
}
