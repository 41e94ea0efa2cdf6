//! Semaphore-gated task spawner with explicit concurrency bounds.
//!
//! Two limits apply to every batch:
//!
//! - `max_in_flight` bounds how many items are admitted but not yet
//!   complete (download, remote call and write all count). Admission of
//!   the next item suspends until a slot frees up.
//! - `max_concurrent` bounds how many items hold a remote-call slot at the
//!   same time. Items take it through [`WorkContext::remote_slot`] around
//!   each remote attempt only.
//!
//! Endpoints are assigned in the sequential admission loop, so item `i`
//! always runs against endpoint `i mod N`. Completion order is unordered.
//! Once the cancellation token fires no further item is admitted; items
//! already admitted run to completion.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::endpoint_pool::{Endpoint, EndpointPool};
use crate::error::CoreError;
use crate::observer::{ProgressEvent, SharedObserver, TaskLabel};
use crate::outcome::{ErrorKind, ResultAggregator, TaskError, TaskOutcome};
use crate::types::{PromptKey, Timestamp};

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Concurrency bounds for one pipeline run. Computed once at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConcurrencyLimits {
    pub max_concurrent: usize,
    pub max_in_flight: usize,
}

impl ConcurrencyLimits {
    /// `(N, 2N)`: one remote call per endpoint, plus room for every
    /// endpoint to have its next item already downloading.
    pub fn for_endpoints(endpoints: usize) -> Self {
        let n = endpoints.max(1);
        Self {
            max_concurrent: n,
            max_in_flight: n * 2,
        }
    }

    pub fn fixed(max_concurrent: usize, max_in_flight: usize) -> Self {
        Self {
            max_concurrent,
            max_in_flight,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_concurrent == 0 || self.max_in_flight == 0 {
            return Err(CoreError::Configuration(
                "Concurrency limits must be at least 1".to_string(),
            ));
        }
        if self.max_in_flight < self.max_concurrent {
            return Err(CoreError::Configuration(format!(
                "max_in_flight ({}) must not be below max_concurrent ({})",
                self.max_in_flight, self.max_concurrent
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Work items
// ---------------------------------------------------------------------------

/// A unit of work before dispatch. It has no endpoint yet.
#[derive(Debug, Clone)]
pub struct WorkRequest<P> {
    pub key: PromptKey,
    pub payload: P,
}

impl<P> WorkRequest<P> {
    pub fn new(key: PromptKey, payload: P) -> Self {
        Self { key, payload }
    }
}

/// A dispatched unit of work, bound to one endpoint.
#[derive(Debug, Clone)]
pub struct WorkItem<P> {
    /// Position in submission order.
    pub index: usize,
    pub key: PromptKey,
    pub payload: P,
    pub endpoint: Endpoint,
}

impl<P> WorkItem<P> {
    pub fn label(&self) -> TaskLabel {
        TaskLabel {
            key: self.key.clone(),
            endpoint: self.endpoint.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Gauges and permits
// ---------------------------------------------------------------------------

/// Current and peak value of a counter.
#[derive(Debug, Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Semaphore permit that also keeps a gauge up to date.
///
/// The gauge is decremented before the permit is returned, so the gauge
/// never exceeds the semaphore's capacity.
struct GaugedPermit {
    gauge: Arc<Gauge>,
    _permit: OwnedSemaphorePermit,
}

impl GaugedPermit {
    fn new(permit: OwnedSemaphorePermit, gauge: Arc<Gauge>) -> Self {
        gauge.enter();
        Self {
            gauge,
            _permit: permit,
        }
    }
}

impl Drop for GaugedPermit {
    fn drop(&mut self) {
        self.gauge.leave();
    }
}

/// Held while a remote call is in progress. Dropping it frees the slot.
pub struct RemoteSlot {
    _inner: GaugedPermit,
}

/// Handle given to each running item.
#[derive(Clone)]
pub struct WorkContext {
    remote: Arc<Semaphore>,
    remote_gauge: Arc<Gauge>,
}

impl WorkContext {
    /// Wait for one of the `max_concurrent` remote-call slots.
    pub async fn remote_slot(&self) -> RemoteSlot {
        let permit = Arc::clone(&self.remote)
            .acquire_owned()
            .await
            .expect("scheduler semaphores are never closed");
        RemoteSlot {
            _inner: GaugedPermit::new(permit, Arc::clone(&self.remote_gauge)),
        }
    }

    /// Number of remote calls running right now.
    pub fn active_remote_calls(&self) -> usize {
        self.remote_gauge.current()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Everything a batch produced.
#[derive(Debug)]
pub struct SchedulerReport<R> {
    pub results: ResultAggregator<R>,
    pub stats: BatchStats,
}

/// Counters describing how a batch ran.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStats {
    pub submitted: usize,
    pub admitted: usize,
    /// Items never admitted because the batch was cancelled.
    pub skipped: usize,
    pub cancelled: bool,
    pub limits: ConcurrencyLimits,
    pub peak_in_flight: usize,
    pub peak_concurrent: usize,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
}

/// Runs batches of work items under [`ConcurrencyLimits`].
pub struct Scheduler {
    limits: ConcurrencyLimits,
    observer: SharedObserver,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(limits: ConcurrencyLimits, observer: SharedObserver) -> Result<Self, CoreError> {
        limits.validate()?;
        Ok(Self {
            limits,
            observer,
            cancel: CancellationToken::new(),
        })
    }

    /// Use an externally owned cancellation token (e.g. tied to Ctrl-C).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Dispatch every request and wait for all admitted items to finish.
    ///
    /// `exec` runs once per admitted item on its own task and must produce
    /// exactly one [`TaskOutcome`]. A panic inside `exec` is recorded as an
    /// [`ErrorKind::Internal`] failure for that item.
    pub async fn run<P, R, F, Fut, I>(
        &self,
        pool: &EndpointPool,
        requests: I,
        exec: F,
    ) -> SchedulerReport<R>
    where
        I: IntoIterator<Item = WorkRequest<P>>,
        P: Send + 'static,
        R: Send + 'static,
        F: Fn(WorkItem<P>, WorkContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskOutcome<R>> + Send + 'static,
    {
        let started_at = chrono::Utc::now();
        let exec = Arc::new(exec);
        let admission = Arc::new(Semaphore::new(self.limits.max_in_flight));
        let in_flight_gauge = Arc::new(Gauge::default());
        let ctx = WorkContext {
            remote: Arc::new(Semaphore::new(self.limits.max_concurrent)),
            remote_gauge: Arc::new(Gauge::default()),
        };

        let mut tasks = JoinSet::new();
        let mut labels: HashMap<tokio::task::Id, TaskLabel> = HashMap::new();
        let mut results = ResultAggregator::new();
        let mut submitted = 0usize;
        let mut admitted = 0usize;
        let mut skipped = 0usize;

        let mut requests = requests.into_iter().enumerate();
        while let Some((index, request)) = requests.next() {
            submitted += 1;

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = Arc::clone(&admission).acquire_owned() => {
                    Some(permit.expect("scheduler semaphores are never closed"))
                }
            };
            let Some(permit) = permit else {
                let remaining = requests.by_ref().count();
                submitted += remaining;
                skipped = 1 + remaining;
                tracing::warn!(skipped, "Batch cancelled, no further items admitted");
                break;
            };

            // Reap whatever finished while we were waiting for the slot.
            while let Some(joined) = tasks.try_join_next_with_id() {
                self.collect(joined, &mut labels, &mut results);
            }

            let item = WorkItem {
                index,
                key: request.key,
                payload: request.payload,
                endpoint: pool.next(),
            };
            let label = item.label();
            self.observer.notify(&ProgressEvent::Admitted {
                label: label.clone(),
                index,
            });
            admitted += 1;

            let guard = GaugedPermit::new(permit, Arc::clone(&in_flight_gauge));
            let exec = Arc::clone(&exec);
            let ctx = ctx.clone();
            let observer = Arc::clone(&self.observer);
            let task_label = label.clone();

            let handle = tasks.spawn(async move {
                let _guard = guard;
                let started = Instant::now();
                let outcome = exec(item, ctx).await;
                observer.notify(&ProgressEvent::Finished {
                    label: task_label,
                    success: outcome.is_success(),
                    elapsed: started.elapsed(),
                });
                outcome
            });
            labels.insert(handle.id(), label);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            self.collect(joined, &mut labels, &mut results);
        }

        SchedulerReport {
            results,
            stats: BatchStats {
                submitted,
                admitted,
                skipped,
                cancelled: self.cancel.is_cancelled(),
                limits: self.limits,
                peak_in_flight: in_flight_gauge.peak(),
                peak_concurrent: ctx.remote_gauge.peak(),
                started_at,
                finished_at: chrono::Utc::now(),
            },
        }
    }

    fn collect<R>(
        &self,
        joined: Result<(tokio::task::Id, TaskOutcome<R>), JoinError>,
        labels: &mut HashMap<tokio::task::Id, TaskLabel>,
        results: &mut ResultAggregator<R>,
    ) {
        match joined {
            Ok((id, outcome)) => {
                if let Some(label) = labels.remove(&id) {
                    results.record(label, outcome);
                }
            }
            Err(err) => {
                let Some(label) = labels.remove(&err.id()) else {
                    tracing::error!(error = %err, "Unknown task failed");
                    return;
                };
                tracing::error!(prompt_key = %label.key, error = %err, "Work item panicked");
                results.record(
                    label,
                    TaskOutcome::failed(
                        TaskError::new(ErrorKind::Internal, format!("task failed: {err}")),
                        0,
                    ),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::observer::{CollectingObserver, NoopObserver};

    fn requests(n: usize) -> Vec<WorkRequest<usize>> {
        (0..n)
            .map(|i| WorkRequest::new(PromptKey::new(format!("p{i}")), i))
            .collect()
    }

    fn scheduler(limits: ConcurrencyLimits) -> Scheduler {
        Scheduler::new(limits, Arc::new(NoopObserver)).unwrap()
    }

    // -- limits --------------------------------------------------------------

    #[test]
    fn limits_scale_with_endpoints() {
        assert_eq!(ConcurrencyLimits::for_endpoints(4), ConcurrencyLimits::fixed(4, 8));
    }

    #[test]
    fn zero_limits_rejected() {
        assert!(ConcurrencyLimits::fixed(0, 2).validate().is_err());
        assert!(ConcurrencyLimits::fixed(3, 2).validate().is_err());
        assert!(Scheduler::new(ConcurrencyLimits::fixed(0, 0), Arc::new(NoopObserver)).is_err());
    }

    // -- run -----------------------------------------------------------------

    #[tokio::test]
    async fn every_item_yields_one_outcome() {
        let pool = EndpointPool::parse(&["http://e0", "http://e1"]).unwrap();
        let report = scheduler(pool.concurrency())
            .run(&pool, requests(10), |item, _ctx| async move {
                TaskOutcome::Succeeded {
                    value: item.payload * 2,
                    attempts: 1,
                }
            })
            .await;

        assert_eq!(report.results.total(), 10);
        assert!(report.results.is_success());
        assert_eq!(report.stats.submitted, 10);
        assert_eq!(report.stats.admitted, 10);
        let mut values: Vec<_> = report.results.succeeded().iter().map(|c| c.value).collect();
        values.sort_unstable();
        assert_eq!(values, (0..10).map(|v| v * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn assignment_follows_submission_order() {
        let pool = EndpointPool::parse(&["http://e0", "http://e1", "http://e2"]).unwrap();
        let report = scheduler(pool.concurrency())
            .run(&pool, requests(7), |item, _ctx| async move {
                // Later items finish first.
                tokio::time::sleep(Duration::from_millis(20 - item.index as u64 * 2)).await;
                TaskOutcome::Succeeded {
                    value: (item.index, item.endpoint.to_string()),
                    attempts: 1,
                }
            })
            .await;

        for done in report.results.succeeded() {
            let (index, endpoint) = &done.value;
            assert_eq!(endpoint, &format!("http://e{}", index % 3));
        }
    }

    #[tokio::test]
    async fn bounds_are_never_exceeded() {
        let pool = EndpointPool::parse(&["http://e0", "http://e1"]).unwrap();
        let limits = pool.concurrency();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let (in_flight_c, max_seen_c) = (Arc::clone(&in_flight), Arc::clone(&max_seen));
        let report = scheduler(limits)
            .run(&pool, requests(20), move |_item, ctx| {
                let in_flight = Arc::clone(&in_flight_c);
                let max_seen = Arc::clone(&max_seen_c);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    // Download phase.
                    tokio::time::sleep(Duration::from_millis(3)).await;
                    {
                        let _slot = ctx.remote_slot().await;
                        assert!(ctx.active_remote_calls() <= 2);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    TaskOutcome::Succeeded { value: (), attempts: 1 }
                }
            })
            .await;

        assert!(max_seen.load(Ordering::SeqCst) <= limits.max_in_flight);
        assert!(report.stats.peak_in_flight <= limits.max_in_flight);
        assert!(report.stats.peak_concurrent <= limits.max_concurrent);
        assert!(report.stats.peak_concurrent >= 1);
        assert!(report.results.failed().is_empty());
    }

    #[tokio::test]
    async fn admission_blocks_until_a_slot_frees() {
        let pool = EndpointPool::parse(&["http://e0"]).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_c = Arc::clone(&order);

        scheduler(ConcurrencyLimits::fixed(1, 1))
            .run(&pool, requests(3), move |item, _ctx| {
                let order = Arc::clone(&order_c);
                async move {
                    order.lock().unwrap().push(format!("start {}", item.index));
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    order.lock().unwrap().push(format!("end {}", item.index));
                    TaskOutcome::Succeeded { value: (), attempts: 1 }
                }
            })
            .await;

        let order = order.lock().unwrap().clone();
        assert_eq!(
            order,
            vec!["start 0", "end 0", "start 1", "end 1", "start 2", "end 2"]
        );
    }

    #[tokio::test]
    async fn failures_do_not_abort_siblings() {
        let pool = EndpointPool::parse(&["http://e0"]).unwrap();
        let report = scheduler(pool.concurrency())
            .run(&pool, requests(4), |item, _ctx| async move {
                if item.index == 1 {
                    TaskOutcome::failed(TaskError::new(ErrorKind::Client, "rejected"), 1)
                } else {
                    TaskOutcome::Succeeded { value: (), attempts: 1 }
                }
            })
            .await;

        assert_eq!(report.results.succeeded().len(), 3);
        assert_eq!(report.results.failed().len(), 1);
        assert_eq!(report.results.first_error().as_deref(), Some("p1: rejected"));
    }

    #[tokio::test]
    async fn panic_is_recorded_as_internal_failure() {
        let pool = EndpointPool::parse(&["http://e0"]).unwrap();
        let report = scheduler(pool.concurrency())
            .run(&pool, requests(2), |item, _ctx| async move {
                if item.index == 0 {
                    panic!("boom");
                }
                TaskOutcome::Succeeded { value: (), attempts: 1 }
            })
            .await;

        assert_eq!(report.results.failed().len(), 1);
        assert_eq!(report.results.failed()[0].kind, ErrorKind::Internal);
        assert_eq!(report.results.failed()[0].key.as_str(), "p0");
    }

    #[tokio::test]
    async fn cancellation_stops_admission_and_drains() {
        let pool = EndpointPool::parse(&["http://e0"]).unwrap();
        let cancel = CancellationToken::new();
        let cancel_c = cancel.clone();

        let report = scheduler(ConcurrencyLimits::fixed(1, 1))
            .with_cancellation(cancel.clone())
            .run(&pool, requests(5), move |item, _ctx| {
                let cancel = cancel_c.clone();
                async move {
                    if item.index == 1 {
                        cancel.cancel();
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    TaskOutcome::Succeeded { value: (), attempts: 1 }
                }
            })
            .await;

        // Item 1 cancelled the batch while running; it still completes.
        assert!(report.stats.cancelled);
        assert_eq!(report.stats.admitted, 2);
        assert_eq!(report.stats.skipped, 3);
        assert_eq!(report.stats.submitted, 5);
        assert_eq!(report.results.succeeded().len(), 2);
    }

    #[tokio::test]
    async fn admitted_and_finished_events_are_emitted() {
        let pool = EndpointPool::parse(&["http://e0", "http://e1"]).unwrap();
        let observer = CollectingObserver::new();
        let scheduler = Scheduler::new(pool.concurrency(), observer.clone()).unwrap();

        scheduler
            .run(&pool, requests(2), |_item, _ctx| async {
                TaskOutcome::Succeeded { value: (), attempts: 1 }
            })
            .await;

        let events = observer.events();
        let admitted: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Admitted { label, index } => {
                    Some((*index, label.endpoint.to_string()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            admitted,
            vec![(0, "http://e0".to_string()), (1, "http://e1".to_string())]
        );
        let finished = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Finished { success: true, .. }))
            .count();
        assert_eq!(finished, 2);
    }
}
