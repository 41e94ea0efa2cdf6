//! Settings shared by every pipeline run.

use std::sync::Arc;

use meshgen_core::observer::{SharedObserver, TracingObserver};
use meshgen_core::retry::{RetryExecutor, RetryPolicy};
use meshgen_core::scheduler::{ConcurrencyLimits, Scheduler};
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

/// Retry policy, progress observer and cancellation for one run.
#[derive(Clone)]
pub struct RunOptions {
    pub retry: RetryPolicy,
    pub observer: SharedObserver,
    pub cancel: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), Arc::new(TracingObserver))
    }
}

impl RunOptions {
    pub fn new(retry: RetryPolicy, observer: SharedObserver) -> Self {
        Self {
            retry,
            observer,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub(crate) fn executor(&self) -> RetryExecutor {
        RetryExecutor::new(self.retry.clone(), Arc::clone(&self.observer))
    }

    /// Validate the settings and build a scheduler for `limits`.
    pub(crate) fn scheduler(&self, limits: ConcurrencyLimits) -> Result<Scheduler, PipelineError> {
        self.retry.validate()?;
        let scheduler = Scheduler::new(limits, Arc::clone(&self.observer))?;
        Ok(scheduler.with_cancellation(self.cancel.clone()))
    }
}
