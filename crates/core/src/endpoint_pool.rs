//! Round-robin pool of remote compute endpoints.
//!
//! One endpoint per accelerator. The pool hands endpoints out in strict
//! rotation using a single atomic cursor, so the `i`-th call to
//! [`EndpointPool::next`] always returns endpoint `i mod N`.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::CoreError;
use crate::scheduler::ConcurrencyLimits;

/// Address of one remote compute service, e.g. `http://10.0.0.4:10006`.
///
/// Cheap to clone; the address is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Endpoint(Arc<str>);

impl Endpoint {
    /// Parse and normalize an endpoint address.
    ///
    /// Rules:
    /// - Must start with `http://` or `https://`.
    /// - Must have a non-empty host.
    /// - Trailing slashes are stripped so paths can be appended.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim().trim_end_matches('/');
        let rest = trimmed
            .strip_prefix("http://")
            .or_else(|| trimmed.strip_prefix("https://"))
            .ok_or_else(|| {
                CoreError::Configuration(format!(
                    "Endpoint must start with http:// or https://, got: '{raw}'"
                ))
            })?;

        if rest.is_empty() || rest.starts_with('/') {
            return Err(CoreError::Configuration(format!(
                "Endpoint has no host: '{raw}'"
            )));
        }

        Ok(Self(Arc::from(trimmed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join a path onto the endpoint, e.g. `endpoint.url("/generate")`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.0, path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse every raw address, failing on the first invalid one.
pub fn parse_endpoints<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Endpoint>, CoreError> {
    raw.iter().map(|r| Endpoint::parse(r.as_ref())).collect()
}

/// Ordered, non-empty set of endpoints with a shared round-robin cursor.
///
/// Each pipeline run builds its own pool, so the rotation of a run always
/// starts at the first endpoint.
#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Vec<Endpoint>,
    cursor: AtomicUsize,
}

impl EndpointPool {
    /// Build a pool from already-parsed endpoints.
    ///
    /// An empty list is a configuration error.
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, CoreError> {
        if endpoints.is_empty() {
            return Err(CoreError::Configuration(
                "At least one endpoint is required".to_string(),
            ));
        }
        Ok(Self {
            endpoints,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Parse raw addresses and build a pool. Duplicates are kept, which
    /// gives that endpoint a proportionally larger share of the work.
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Result<Self, CoreError> {
        Self::new(parse_endpoints(raw)?)
    }

    /// Return the next endpoint in rotation. Never blocks, never fails.
    pub fn next(&self) -> Endpoint {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        self.endpoints[index].clone()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Always `false`; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Concurrency limits scaled to the pool size: `(N, 2N)`.
    pub fn concurrency(&self) -> ConcurrencyLimits {
        ConcurrencyLimits::for_endpoints(self.endpoints.len())
    }
}
