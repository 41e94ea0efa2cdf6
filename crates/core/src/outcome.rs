//! Per-item outcomes and their aggregation into a batch report.

use std::fmt;

use serde::Serialize;

use crate::endpoint_pool::Endpoint;
use crate::error::CoreError;
use crate::observer::TaskLabel;
use crate::retry::RetryOutcome;
use crate::types::PromptKey;

/// Coarse classification of why a work item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad configuration discovered while running the item.
    Configuration,
    /// Network, timeout or 5xx failure that was not retried further.
    Transient,
    /// The endpoint rejected the request (4xx).
    Client,
    /// Input or response failed validation (missing file, malformed body).
    Validation,
    /// Every attempt failed with a retryable error.
    Exhausted,
    /// Local filesystem failure.
    Io,
    /// Bug or panic inside the item.
    Internal,
}

/// Failure of one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TaskError {}

impl From<CoreError> for TaskError {
    fn from(err: CoreError) -> Self {
        let kind = match &err {
            CoreError::Configuration(_) => ErrorKind::Configuration,
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::Io { .. } => ErrorKind::Io,
            CoreError::Internal(_) => ErrorKind::Internal,
        };
        Self::new(kind, err.to_string())
    }
}

impl<T, E: Into<TaskError>> RetryOutcome<T, E> {
    /// Value and attempt count, or the classified error and attempt count.
    ///
    /// Items made of several retried steps use this to bail out of the
    /// first step that fails.
    pub fn into_task_result(self) -> Result<(T, u32), (TaskError, u32)> {
        match self {
            RetryOutcome::Succeeded { value, attempts } => Ok((value, attempts)),
            RetryOutcome::Failed {
                error,
                attempts,
                exhausted,
            } => {
                let mut error = error.into();
                if exhausted {
                    error = TaskError::new(
                        ErrorKind::Exhausted,
                        format!("giving up after {attempts} attempts: {}", error.message),
                    );
                }
                Err((error, attempts))
            }
        }
    }
}

/// Result of one work item: a value, or an error after retries were spent.
#[derive(Debug)]
pub enum TaskOutcome<R> {
    Succeeded { value: R, attempts: u32 },
    Failed { error: TaskError, attempts: u32 },
}

impl<R> TaskOutcome<R> {
    pub fn failed(error: TaskError, attempts: u32) -> Self {
        Self::Failed { error, attempts }
    }

    /// Convert a retry result, marking budget exhaustion as
    /// [`ErrorKind::Exhausted`].
    pub fn from_retry<E: Into<TaskError>>(outcome: RetryOutcome<R, E>) -> Self {
        match outcome.into_task_result() {
            Ok((value, attempts)) => Self::Succeeded { value, attempts },
            Err((error, attempts)) => Self::Failed { error, attempts },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// A successfully completed item.
#[derive(Debug)]
pub struct Completed<R> {
    pub key: PromptKey,
    pub endpoint: Endpoint,
    pub value: R,
    pub attempts: u32,
}

/// A failed item, as reported in the final JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub key: PromptKey,
    pub endpoint: Endpoint,
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
}

/// Collects item outcomes in completion order.
///
/// The first failure recorded is kept as the batch's summary error.
#[derive(Debug)]
pub struct ResultAggregator<R> {
    succeeded: Vec<Completed<R>>,
    failed: Vec<FailedItem>,
}

impl<R> Default for ResultAggregator<R> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<R> ResultAggregator<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, label: TaskLabel, outcome: TaskOutcome<R>) {
        match outcome {
            TaskOutcome::Succeeded { value, attempts } => self.succeeded.push(Completed {
                key: label.key,
                endpoint: label.endpoint,
                value,
                attempts,
            }),
            TaskOutcome::Failed { error, attempts } => self.failed.push(FailedItem {
                key: label.key,
                endpoint: label.endpoint,
                kind: error.kind,
                message: error.message,
                attempts,
            }),
        }
    }

    pub fn succeeded(&self) -> &[Completed<R>] {
        &self.succeeded
    }

    pub fn failed(&self) -> &[FailedItem] {
        &self.failed
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Summary of the first failure, e.g. `"p2: missing image"`.
    pub fn first_error(&self) -> Option<String> {
        self.failed
            .first()
            .map(|f| format!("{}: {}", f.key, f.message))
    }

    pub fn into_parts(self) -> (Vec<Completed<R>>, Vec<FailedItem>) {
        (self.succeeded, self.failed)
    }
}
