//! Controller worker pools.
//!
//! One pool per controller; workers pull keyed items from the shared queue
//! and run the reconciler. A reconcile returns an [`Action`] on success
//! (optionally requeueing after a delay) or an error, which requeues with
//! rate-limited backoff. Each reconcile is idempotent recomputation from
//! observed state; the queue guarantees per-key serialization.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use weft_store::{BoxWatchStream, WatchEvent};

use crate::queue::{RateLimit, WorkQueue};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The result of a successful reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    requeue_after: Option<Duration>,
}

impl Action {
    /// Reconcile again after `duration` even without a watch trigger.
    pub fn requeue(duration: Duration) -> Self {
        Self {
            requeue_after: Some(duration),
        }
    }

    /// Do nothing until a relevant watch event arrives.
    pub fn await_change() -> Self {
        Self {
            requeue_after: None,
        }
    }

    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }
}

/// A keyed reconciler driven by a controller pool.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    async fn reconcile(&self, key: &Self::Key) -> Result<Action, BoxError>;
}

/// A worker pool driving one reconciler.
pub struct Controller<R: Reconciler> {
    name: &'static str,
    reconciler: Arc<R>,
    queue: Arc<WorkQueue<R::Key>>,
    workers: usize,
}

impl<R: Reconciler> Controller<R> {
    pub fn new(name: &'static str, reconciler: R, workers: usize, rate: RateLimit) -> Self {
        Self {
            name,
            reconciler: Arc::new(reconciler),
            queue: Arc::new(WorkQueue::new(rate)),
            workers: workers.max(1),
        }
    }

    /// The queue feeding this controller, for watch plumbing and tests.
    pub fn queue(&self) -> Arc<WorkQueue<R::Key>> {
        self.queue.clone()
    }

    /// Start the worker pool. Workers stop when `cancel` fires.
    pub fn start(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        tracing::info!(controller = self.name, workers = self.workers, "Starting controller");
        (0..self.workers)
            .map(|worker| {
                let name = self.name;
                let queue = self.queue.clone();
                let reconciler = self.reconciler.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        let key = tokio::select! {
                            _ = cancel.cancelled() => break,
                            key = queue.next() => key,
                        };
                        match reconciler.reconcile(&key).await {
                            Ok(action) => {
                                queue.forget(&key);
                                if let Some(delay) = action.requeue_after() {
                                    queue.add_after(key.clone(), delay);
                                }
                            }
                            Err(err) => {
                                tracing::warn!(
                                    controller = name,
                                    worker,
                                    key = ?key,
                                    error = %err,
                                    "Reconcile failed"
                                );
                                queue.add_rate_limited(key.clone());
                            }
                        }
                        queue.done(&key);
                    }
                })
            })
            .collect()
    }
}

/// Feed a controller queue from a store watch stream.
///
/// `mapper` turns one event into the keys to reconcile (the object itself,
/// its controller owner, ...). The task ends when the stream closes or
/// `cancel` fires.
pub fn forward_watch<K, F>(
    mut stream: BoxWatchStream,
    queue: Arc<WorkQueue<K>>,
    cancel: CancellationToken,
    mapper: F,
) -> JoinHandle<()>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    F: Fn(&WatchEvent) -> Vec<K> + Send + Sync + 'static,
{
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = stream.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            for key in mapper(&event) {
                queue.add(key);
            }
        }
    })
}
