//! Deduplicating, rate-limited work queue.
//!
//! Guarantees: a key is never handed to two workers at once; a key added
//! while being processed is re-queued when its worker calls [`WorkQueue::done`];
//! repeated failures back off exponentially up to a cap.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Exponential backoff applied by [`WorkQueue::add_rate_limited`].
#[derive(Debug, Clone)]
pub struct RateLimit {
    pub base: Duration,
    pub max: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(600),
        }
    }
}

impl RateLimit {
    fn delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(32);
        let delay = self
            .base
            .saturating_mul(2_u32.saturating_pow(exp));
        delay.min(self.max)
    }
}

struct Inner<K> {
    ready: VecDeque<K>,
    queued: HashSet<K>,
    processing: HashSet<K>,
    dirty: HashSet<K>,
    delayed: Vec<(Instant, K)>,
    failures: HashMap<K, u32>,
}

impl<K: Clone + Eq + Hash> Inner<K> {
    fn enqueue(&mut self, key: K) -> bool {
        if self.processing.contains(&key) {
            self.dirty.insert(key);
            return false;
        }
        if self.queued.insert(key.clone()) {
            self.ready.push_back(key);
            return true;
        }
        false
    }

    fn promote_due(&mut self, now: Instant) -> bool {
        let mut promoted = false;
        let mut remaining = Vec::with_capacity(self.delayed.len());
        for (due, key) in std::mem::take(&mut self.delayed) {
            if due <= now {
                promoted |= self.enqueue(key);
            } else {
                remaining.push((due, key));
            }
        }
        self.delayed = remaining;
        promoted
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.iter().map(|(due, _)| *due).min()
    }
}

/// A keyed work queue shared by the workers of one controller pool.
pub struct WorkQueue<K> {
    inner: Mutex<Inner<K>>,
    notify: Notify,
    rate: RateLimit,
}

impl<K: Clone + Eq + Hash> WorkQueue<K> {
    pub fn new(rate: RateLimit) -> Self {
        Self {
            inner: Mutex::new(Inner {
                ready: VecDeque::new(),
                queued: HashSet::new(),
                processing: HashSet::new(),
                dirty: HashSet::new(),
                delayed: Vec::new(),
                failures: HashMap::new(),
            }),
            notify: Notify::new(),
            rate,
        }
    }

    /// Add a key for processing. Duplicates of queued keys collapse;
    /// duplicates of in-flight keys are deferred until the worker finishes.
    pub fn add(&self, key: K) {
        let added = self.inner.lock().unwrap().enqueue(key);
        if added {
            self.notify.notify_one();
        }
    }

    /// Add a key after `delay`.
    pub fn add_after(&self, key: K, delay: Duration) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.delayed.push((Instant::now() + delay, key));
        }
        self.notify.notify_one();
    }

    /// Add a key with exponential backoff based on its failure count.
    pub fn add_rate_limited(&self, key: K) {
        let delay = {
            let mut inner = self.inner.lock().unwrap();
            let failures = inner.failures.entry(key.clone()).or_insert(0);
            *failures += 1;
            self.rate.delay(*failures)
        };
        self.add_after(key, delay);
    }

    /// Clear a key's failure history after a successful reconcile.
    pub fn forget(&self, key: &K) {
        self.inner.lock().unwrap().failures.remove(key);
    }

    /// Pull the next key. Resolves when a key is ready; the caller must
    /// call [`Self::done`] when finished with it.
    pub async fn next(&self) -> K {
        loop {
            let (item, wait) = {
                let mut inner = self.inner.lock().unwrap();
                inner.promote_due(Instant::now());
                match inner.ready.pop_front() {
                    Some(key) => {
                        inner.queued.remove(&key);
                        inner.processing.insert(key.clone());
                        (Some(key), None)
                    }
                    None => (None, inner.next_due()),
                }
            };
            if let Some(key) = item {
                return key;
            }
            match wait {
                Some(due) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(due) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Mark a key's processing finished, re-queueing it if it was re-added
    /// while in flight.
    pub fn done(&self, key: &K) {
        let readded = {
            let mut inner = self.inner.lock().unwrap();
            inner.processing.remove(key);
            if inner.dirty.remove(key) {
                inner.enqueue(key.clone())
            } else {
                false
            }
        };
        if readded {
            self.notify.notify_one();
        }
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.ready.len() + inner.delayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
