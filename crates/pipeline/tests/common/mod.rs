//! In-memory fakes of the remote services.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meshgen_core::duel::JudgeVerdict;
use meshgen_core::endpoint_pool::Endpoint;
use meshgen_core::observer::NoopObserver;
use meshgen_core::retry::RetryPolicy;
use meshgen_pipeline::RunOptions;
use meshgen_remote::services::{
    DuelJudge, ImageFetcher, JudgeRequest, ModelFormat, ModelGenerator, ModelRenderer,
};
use meshgen_remote::RemoteError;

/// Options with immediate retries and no logging.
pub fn options(max_attempts: u32) -> RunOptions {
    RunOptions::new(RetryPolicy::immediate(max_attempts), Arc::new(NoopObserver))
}

pub fn status(code: u16) -> RemoteError {
    RemoteError::Status {
        status: code,
        body: String::new(),
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Returns `image:<url>` for every URL except the ones marked missing.
#[derive(Clone, Default)]
pub struct FakeFetcher {
    missing: Arc<HashSet<String>>,
    calls: Arc<AtomicUsize>,
}

impl FakeFetcher {
    pub fn with_missing(urls: &[&str]) -> Self {
        Self {
            missing: Arc::new(urls.iter().map(|u| u.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn image_for(url: &str) -> Vec<u8> {
    format!("image:{url}").into_bytes()
}

impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.missing.contains(url) {
            return Err(status(404));
        }
        Ok(image_for(url))
    }
}

// ---------------------------------------------------------------------------
// Generator / renderer
// ---------------------------------------------------------------------------

type Responder = dyn Fn(&Endpoint, &[u8], u32) -> Result<Vec<u8>, RemoteError> + Send + Sync;

/// Scripted generation or render service.
///
/// The responder sees the endpoint, the input bytes and how many times
/// those exact bytes have been sent so far (1-based).
#[derive(Clone)]
pub struct FakeRemote {
    inner: Arc<RemoteInner>,
}

struct RemoteInner {
    respond: Box<Responder>,
    delay: Duration,
    calls: Mutex<Vec<(Endpoint, Vec<u8>)>>,
    per_input: Mutex<HashMap<Vec<u8>, u32>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeRemote {
    pub fn new(
        delay: Duration,
        respond: impl Fn(&Endpoint, &[u8], u32) -> Result<Vec<u8>, RemoteError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(RemoteInner {
                respond: Box::new(respond),
                delay,
                calls: Mutex::default(),
                per_input: Mutex::default(),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Answers `out:<input>` immediately.
    pub fn echo() -> Self {
        Self::new(Duration::ZERO, |_, input, _| Ok(echo_of(input)))
    }

    pub fn calls(&self) -> Vec<(Endpoint, Vec<u8>)> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    async fn call(&self, endpoint: &Endpoint, input: &[u8]) -> Result<Vec<u8>, RemoteError> {
        let attempt = {
            let mut counts = self.inner.per_input.lock().unwrap();
            let count = counts.entry(input.to_vec()).or_insert(0);
            *count += 1;
            *count
        };
        self.inner
            .calls
            .lock()
            .unwrap()
            .push((endpoint.clone(), input.to_vec()));

        let now = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(now, Ordering::SeqCst);
        if !self.inner.delay.is_zero() {
            tokio::time::sleep(self.inner.delay).await;
        }
        self.inner.active.fetch_sub(1, Ordering::SeqCst);

        (self.inner.respond)(endpoint, input, attempt)
    }
}

pub fn echo_of(input: &[u8]) -> Vec<u8> {
    [b"out:".as_slice(), input].concat()
}

impl ModelGenerator for FakeRemote {
    async fn generate(
        &self,
        endpoint: &Endpoint,
        image: &[u8],
        _seed: u64,
    ) -> Result<Vec<u8>, RemoteError> {
        self.call(endpoint, image).await
    }
}

impl ModelRenderer for FakeRemote {
    async fn render(
        &self,
        endpoint: &Endpoint,
        _format: ModelFormat,
        _file_name: &str,
        model: &[u8],
    ) -> Result<Vec<u8>, RemoteError> {
        self.call(endpoint, model).await
    }
}

// ---------------------------------------------------------------------------
// Judge
// ---------------------------------------------------------------------------

/// Judge whose penalty for a render is looked up from its bytes.
///
/// Renders containing `good` score 1, `bad` score 9, anything else 5.
/// `bias` is added to whichever render is shown first.
#[derive(Clone, Default)]
pub struct FakeJudge {
    bias: u8,
    calls: Arc<Mutex<Vec<(Vec<u8>, Vec<u8>)>>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FakeJudge {
    pub fn with_first_position_bias(bias: u8) -> Self {
        Self {
            bias,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

fn penalty_of(render: &[u8]) -> u8 {
    let text = String::from_utf8_lossy(render);
    if text.contains("good") {
        1
    } else if text.contains("bad") {
        9
    } else {
        5
    }
}

impl DuelJudge for FakeJudge {
    async fn evaluate(
        &self,
        _endpoint: &Endpoint,
        request: JudgeRequest<'_>,
    ) -> Result<JudgeVerdict, RemoteError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.first.to_vec(), request.second.to_vec()));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        Ok(JudgeVerdict {
            penalty_1: (penalty_of(request.first) + self.bias).min(10),
            penalty_2: penalty_of(request.second),
            issues: format!(
                "shown {} then {}",
                String::from_utf8_lossy(request.first),
                String::from_utf8_lossy(request.second)
            ),
        })
    }
}
