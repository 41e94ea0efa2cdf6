//! Endpoint liveness checks.
//!
//! An endpoint is healthy when `GET {endpoint}/health` answers 2xx. Freshly
//! started GPU services take a while to load their weights, so callers can
//! poll until healthy or a deadline passes.

use std::time::{Duration, Instant};

use meshgen_core::endpoint_pool::Endpoint;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::RemoteError;
use crate::http::{build_client, ensure_success, CONNECT_TIMEOUT};

/// Total time allowed for one health request.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between probes while waiting for an endpoint.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Result of probing one endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub endpoint: Endpoint,
    pub healthy: bool,
    /// Status of the last response, if one arrived.
    pub status: Option<u16>,
    pub error: Option<String>,
    pub probes: u32,
    pub elapsed_ms: u64,
}

#[derive(Clone)]
pub struct HealthChecker {
    client: reqwest::Client,
    interval: Duration,
}

impl HealthChecker {
    pub fn new() -> Result<Self, RemoteError> {
        Ok(Self::with_client(build_client(CONNECT_TIMEOUT, HEALTH_TIMEOUT)?))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One `GET /health` request.
    pub async fn check(&self, endpoint: &Endpoint) -> Result<(), RemoteError> {
        let response = self.client.get(endpoint.url("/health")).send().await?;
        ensure_success(response).await?;
        Ok(())
    }

    /// Probe `endpoint` until it is healthy, `wait` has elapsed, or
    /// `cancel` fires. A zero `wait` probes exactly once.
    pub async fn wait_until_healthy(
        &self,
        endpoint: &Endpoint,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> HealthStatus {
        let started = Instant::now();
        let mut probes = 0u32;

        loop {
            probes += 1;
            let result = self.check(endpoint).await;
            let done = result.is_ok() || started.elapsed() + self.interval > wait;

            if done || cancel.is_cancelled() {
                let status = match &result {
                    Ok(()) => Some(200),
                    Err(RemoteError::Status { status, .. }) => Some(*status),
                    Err(_) => None,
                };
                if let Err(e) = &result {
                    tracing::warn!(endpoint = %endpoint, probes, error = %e, "Endpoint unhealthy");
                } else {
                    tracing::info!(endpoint = %endpoint, probes, "Endpoint healthy");
                }
                return HealthStatus {
                    endpoint: endpoint.clone(),
                    healthy: result.is_ok(),
                    status,
                    error: result.err().map(|e| e.to_string()),
                    probes,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
            }

            tracing::debug!(endpoint = %endpoint, probes, "Endpoint not ready yet");
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Probe every endpoint concurrently. Results keep the input order.
    pub async fn check_all(
        &self,
        endpoints: &[Endpoint],
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Vec<HealthStatus> {
        futures::future::join_all(
            endpoints
                .iter()
                .map(|endpoint| self.wait_until_healthy(endpoint, wait, cancel)),
        )
        .await
    }
}
