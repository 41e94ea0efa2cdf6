//! Progress notifications emitted by the scheduler, retry executor and
//! pipelines.
//!
//! Observers are injected as `Arc<dyn ProgressObserver>` rather than held
//! in global state, so tests can capture the exact event sequence with
//! [`CollectingObserver`]. [`TracingObserver`] is the production default
//! and turns each event into a `tracing` record on stderr.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::endpoint_pool::Endpoint;
use crate::types::PromptKey;

/// Identifies which work item and endpoint an event refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLabel {
    pub key: PromptKey,
    pub endpoint: Endpoint,
}

/// A progress event.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The scheduler admitted an item and assigned it an endpoint.
    Admitted { label: TaskLabel, index: usize },

    /// A remote attempt is about to start.
    AttemptStarted {
        label: TaskLabel,
        attempt: u32,
        max_attempts: u32,
    },

    /// A remote attempt returned a result.
    AttemptSucceeded {
        label: TaskLabel,
        attempt: u32,
        elapsed: Duration,
    },

    /// A remote attempt failed. `retry_in` is set when another attempt
    /// will follow after that delay.
    AttemptFailed {
        label: TaskLabel,
        attempt: u32,
        error: String,
        retry_in: Option<Duration>,
    },

    /// An output file was written.
    Saved { label: TaskLabel, path: PathBuf },

    /// An item reached its final outcome.
    Finished {
        label: TaskLabel,
        success: bool,
        elapsed: Duration,
    },
}

/// Receives progress events. Implementations must be cheap and must not
/// block; they are called from inside running tasks.
pub trait ProgressObserver: Send + Sync {
    fn notify(&self, event: &ProgressEvent);
}

/// Shared observer handle passed through the stack.
pub type SharedObserver = Arc<dyn ProgressObserver>;

// ---------------------------------------------------------------------------
// TracingObserver
// ---------------------------------------------------------------------------

/// Writes every event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn notify(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Admitted { label, index } => tracing::debug!(
                prompt_key = %label.key,
                endpoint = %label.endpoint,
                index,
                "Admitted work item",
            ),
            ProgressEvent::AttemptStarted {
                label,
                attempt,
                max_attempts,
            } => tracing::info!(
                prompt_key = %label.key,
                endpoint = %label.endpoint,
                "Attempt {attempt}/{max_attempts}",
            ),
            ProgressEvent::AttemptSucceeded {
                label,
                attempt,
                elapsed,
            } => tracing::info!(
                prompt_key = %label.key,
                endpoint = %label.endpoint,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                "Remote call completed in {:.1}s",
                elapsed.as_secs_f64(),
            ),
            ProgressEvent::AttemptFailed {
                label,
                attempt,
                error,
                retry_in,
            } => match retry_in {
                Some(delay) => tracing::warn!(
                    prompt_key = %label.key,
                    endpoint = %label.endpoint,
                    attempt,
                    error = %error,
                    "Attempt failed, retrying in {:.1}s",
                    delay.as_secs_f64(),
                ),
                None => tracing::error!(
                    prompt_key = %label.key,
                    endpoint = %label.endpoint,
                    attempt,
                    error = %error,
                    "Attempt failed, giving up",
                ),
            },
            ProgressEvent::Saved { label, path } => tracing::info!(
                prompt_key = %label.key,
                path = %path.display(),
                "Saved output",
            ),
            ProgressEvent::Finished {
                label,
                success,
                elapsed,
            } => tracing::info!(
                prompt_key = %label.key,
                endpoint = %label.endpoint,
                success,
                elapsed_ms = elapsed.as_millis() as u64,
                "Finished in {:.1}s",
                elapsed.as_secs_f64(),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// CollectingObserver
// ---------------------------------------------------------------------------

/// Records every event in memory, in notification order.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of all events received so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressObserver for CollectingObserver {
    fn notify(&self, event: &ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn notify(&self, _event: &ProgressEvent) {}
}
