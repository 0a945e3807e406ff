//! Isolated Dispatcher
//!
//! Runs owned work without putting the scheduler at risk. With isolation
//! enabled every unit of work gets its own task, and an error or panic inside
//! it is caught at the task boundary, logged, and counted. The scheduler never
//! waits for the outcome and never sees it.
//!
//! There is no retry here. Work that must survive transient failures retries
//! internally, or relies on the event being published again.

use crate::config::DispatchIsolation;
use crate::observability::{events, metrics};
use futures::FutureExt;
use futures::future::BoxFuture;
use jumpshard_core::ResourceId;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

/// External unit of work invoked with the owned resource identifier.
pub type Work = Arc<dyn Fn(ResourceId) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as [`Work`].
pub fn work_fn<F, Fut>(f: F) -> Work
where
    F: Fn(ResourceId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |resource: ResourceId| f(resource).boxed())
}

/// Snapshot of dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
    pub in_flight: u64,
}

impl DispatchStats {
    /// Every dispatched unit has finished, including ones still waiting to start.
    pub fn is_idle(&self) -> bool {
        self.dispatched == self.succeeded + self.failed + self.panicked
    }
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    in_flight: AtomicU64,
}

impl Counters {
    fn started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        metrics::record_dispatch_started();
    }

    fn finished(&self, counter: &AtomicU64, result: &'static str, started: Instant) {
        counter.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        metrics::record_dispatch_finished(result, started.elapsed());
    }
}

/// Fire-and-forget executor for owned work.
#[derive(Clone)]
pub struct IsolatedDispatcher {
    work: Work,
    isolation: DispatchIsolation,
    limiter: Option<Arc<Semaphore>>,
    counters: Arc<Counters>,
}

impl IsolatedDispatcher {
    /// Create a dispatcher.
    ///
    /// `max_concurrency` bounds how many work units run at once. The bound is
    /// applied inside each spawned task, so intake is never throttled by it.
    pub fn new(work: Work, isolation: DispatchIsolation, max_concurrency: Option<usize>) -> Self {
        Self {
            work,
            isolation,
            limiter: max_concurrency.map(|limit| Arc::new(Semaphore::new(limit.max(1)))),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn isolation(&self) -> DispatchIsolation {
        self.isolation
    }

    /// Hand a resource to the work callback.
    ///
    /// With isolation enabled this returns immediately with the handle of the
    /// detached task; callers are free to drop it. With isolation disabled the
    /// work runs to completion before this returns and `None` is returned.
    pub async fn dispatch(&self, resource: ResourceId) -> Option<JoinHandle<()>> {
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);

        match self.isolation {
            DispatchIsolation::Enabled => Some(self.spawn_isolated(resource)),
            DispatchIsolation::Disabled => {
                self.run_inline(resource).await;
                None
            }
        }
    }

    fn spawn_isolated(&self, resource: ResourceId) -> JoinHandle<()> {
        let work = Arc::clone(&self.work);
        let limiter = self.limiter.clone();
        let counters = Arc::clone(&self.counters);

        tokio::spawn(async move {
            let _permit = match limiter {
                Some(semaphore) => match semaphore.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    // Semaphore is never closed while the dispatcher lives
                    Err(_) => return,
                },
                None => None,
            };

            counters.started();
            let started = Instant::now();
            let label = resource.to_string();

            // Inner task: a panic, including one raised while building the
            // future, surfaces here as a JoinError instead of unwinding further.
            let outcome = tokio::spawn(async move { work(resource).await }).await;

            match outcome {
                Ok(Ok(())) => {
                    trace!(resource_id = %label, "Dispatched work completed");
                    counters.finished(&counters.succeeded, "succeeded", started);
                }
                Ok(Err(e)) => {
                    events::work_failed(&label, &format!("{e:#}"));
                    counters.finished(&counters.failed, "failed", started);
                }
                Err(join_error) => {
                    let reason = if join_error.is_panic() {
                        panic_message(join_error.into_panic())
                    } else {
                        "task cancelled".to_string()
                    };
                    events::work_panicked(&label, &reason);
                    counters.finished(&counters.panicked, "panicked", started);
                }
            }
        })
    }

    async fn run_inline(&self, resource: ResourceId) {
        let _permit = match &self.limiter {
            Some(semaphore) => semaphore.acquire().await.ok(),
            None => None,
        };

        self.counters.started();
        let started = Instant::now();
        let label = resource.to_string();

        match (self.work)(resource).await {
            Ok(()) => self
                .counters
                .finished(&self.counters.succeeded, "succeeded", started),
            Err(e) => {
                events::work_failed(&label, &format!("{e:#}"));
                self.counters
                    .finished(&self.counters.failed, "failed", started);
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
            in_flight: self.counters.in_flight.load(Ordering::Relaxed),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
