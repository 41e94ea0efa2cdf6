//! Integration tests for the generate pipeline against fake services.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use common::{echo_of, image_for, options, status, FakeFetcher, FakeRemote};
use meshgen_core::endpoint_pool::{parse_endpoints, Endpoint};
use meshgen_core::error::CoreError;
use meshgen_core::outcome::ErrorKind;
use meshgen_core::prompts::parse_prompts;
use meshgen_core::storage::OutputNaming;
use meshgen_pipeline::generate::{GenerateConfig, GeneratePipeline};
use meshgen_pipeline::PipelineError;
use tokio_util::sync::CancellationToken;

fn endpoints(n: usize) -> Vec<Endpoint> {
    let raw: Vec<String> = (0..n).map(|i| format!("http://gpu{i}:10006")).collect();
    parse_endpoints(&raw).unwrap()
}

const FOUR: &str = "https://cdn.test/p1.png\nhttps://cdn.test/p2.png\nhttps://cdn.test/p3.png\nhttps://cdn.test/p4.png";

// ---------------------------------------------------------------------------
// Test: four prompts over two endpoints go E0, E1, E0, E1
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prompts_are_spread_round_robin() {
    let dir = tempfile::tempdir().unwrap();
    let generator = FakeRemote::echo();
    let pipeline = GeneratePipeline::new(FakeFetcher::default(), generator.clone(), options(3));

    let report = pipeline
        .run(&endpoints(2), parse_prompts(FOUR), &GenerateConfig::new(dir.path()))
        .await
        .unwrap();

    assert!(report.summary.success);
    assert_eq!(report.summary.succeeded, 4);
    let endpoints: Vec<_> = report
        .outputs
        .iter()
        .map(|o| (o.key.to_string(), o.endpoint.to_string()))
        .collect();
    assert_eq!(
        endpoints,
        vec![
            ("p1".to_string(), "http://gpu0:10006".to_string()),
            ("p2".to_string(), "http://gpu1:10006".to_string()),
            ("p3".to_string(), "http://gpu0:10006".to_string()),
            ("p4".to_string(), "http://gpu1:10006".to_string()),
        ]
    );

    let written = std::fs::read(dir.path().join("p2.ply")).unwrap();
    assert_eq!(written, echo_of(&image_for("https://cdn.test/p2.png")));
    assert_eq!(generator.calls().len(), 4);
}

// ---------------------------------------------------------------------------
// Test: two transient failures then success counts three attempts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_failures_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let generator = FakeRemote::new(Duration::ZERO, |_, input, attempt| {
        if attempt < 3 {
            Err(status(503))
        } else {
            Ok(echo_of(input))
        }
    });
    let pipeline = GeneratePipeline::new(FakeFetcher::default(), generator.clone(), options(3));

    let report = pipeline
        .run(
            &endpoints(1),
            parse_prompts("https://cdn.test/p1.png"),
            &GenerateConfig::new(dir.path()),
        )
        .await
        .unwrap();

    assert!(report.summary.success);
    assert_eq!(report.outputs[0].attempts, 3);
    assert!(dir.path().join("p1.ply").exists());
}

// ---------------------------------------------------------------------------
// Test: exhausted retries fail one prompt without touching the others
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exhausted_prompt_fails_alone() {
    let dir = tempfile::tempdir().unwrap();
    let doomed = image_for("https://cdn.test/p3.png");
    let generator = FakeRemote::new(Duration::ZERO, move |_, input, _| {
        if input == doomed.as_slice() {
            Err(status(502))
        } else {
            Ok(echo_of(input))
        }
    });
    let pipeline = GeneratePipeline::new(FakeFetcher::default(), generator.clone(), options(3));

    let report = pipeline
        .run(&endpoints(2), parse_prompts(FOUR), &GenerateConfig::new(dir.path()))
        .await
        .unwrap();

    assert!(!report.summary.success);
    assert_eq!(report.summary.succeeded, 3);
    assert_eq!(report.summary.failures.len(), 1);
    let failure = &report.summary.failures[0];
    assert_eq!(failure.key.as_str(), "p3");
    assert_eq!(failure.kind, ErrorKind::Exhausted);
    assert_eq!(failure.attempts, 3);
    assert!(report.summary.error.as_deref().unwrap().starts_with("p3: "));

    // Three attempts for p3, one each for the rest.
    assert_eq!(generator.calls().len(), 6);
    assert!(!dir.path().join("p3.ply").exists());
    assert!(dir.path().join("p4.ply").exists());
}

// ---------------------------------------------------------------------------
// Test: a 4xx rejection is not retried
// ---------------------------------------------------------------------------

#[tokio::test]
async fn client_error_fails_after_one_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let generator = FakeRemote::new(Duration::ZERO, |_, _, _| Err(status(400)));
    let pipeline = GeneratePipeline::new(FakeFetcher::default(), generator.clone(), options(3));

    let report = pipeline
        .run(
            &endpoints(1),
            parse_prompts("https://cdn.test/p1.png"),
            &GenerateConfig::new(dir.path()),
        )
        .await
        .unwrap();

    assert_eq!(report.summary.failures[0].kind, ErrorKind::Client);
    assert_eq!(report.summary.failures[0].attempts, 1);
    assert_eq!(generator.calls().len(), 1);
}

// ---------------------------------------------------------------------------
// Test: a prompt image that cannot be downloaded never reaches the endpoint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_download_skips_generation() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::with_missing(&["https://cdn.test/p2.png"]);
    let generator = FakeRemote::echo();
    let pipeline = GeneratePipeline::new(fetcher.clone(), generator.clone(), options(3));

    let report = pipeline
        .run(
            &endpoints(2),
            parse_prompts("https://cdn.test/p1.png\nhttps://cdn.test/p2.png"),
            &GenerateConfig::new(dir.path()),
        )
        .await
        .unwrap();

    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.failures[0].key.as_str(), "p2");
    assert_eq!(report.summary.failures[0].kind, ErrorKind::Client);
    assert_eq!(generator.calls().len(), 1);
    assert_eq!(fetcher.calls(), 2);
}

// ---------------------------------------------------------------------------
// Test: content-hash naming is stable across reruns
// ---------------------------------------------------------------------------

#[tokio::test]
async fn content_hash_naming_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let config = GenerateConfig {
        naming: OutputNaming::ContentHash,
        ..GenerateConfig::new(dir.path())
    };
    let pipeline = GeneratePipeline::new(FakeFetcher::default(), FakeRemote::echo(), options(1));

    let first = pipeline.run(&endpoints(2), parse_prompts(FOUR), &config).await.unwrap();
    let second = pipeline.run(&endpoints(2), parse_prompts(FOUR), &config).await.unwrap();

    let names = |r: &meshgen_pipeline::report::FileReport| {
        r.outputs.iter().map(|o| o.path.clone()).collect::<Vec<_>>()
    };
    assert_eq!(names(&first), names(&second));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 4);
    for output in &first.outputs {
        let stem = output.path.file_stem().unwrap().to_str().unwrap();
        assert_eq!(stem.len(), 64);
    }
}

// ---------------------------------------------------------------------------
// Test: remote calls never exceed one per endpoint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remote_concurrency_is_bounded_by_endpoint_count() {
    let dir = tempfile::tempdir().unwrap();
    let generator = FakeRemote::new(Duration::from_millis(5), |_, input, _| Ok(echo_of(input)));
    let pipeline = GeneratePipeline::new(FakeFetcher::default(), generator.clone(), options(1));
    let prompts: String = (0..12)
        .map(|i| format!("https://cdn.test/q{i}.png\n"))
        .collect();

    let report = pipeline
        .run(&endpoints(3), parse_prompts(&prompts), &GenerateConfig::new(dir.path()))
        .await
        .unwrap();

    assert!(report.summary.success);
    assert!(generator.peak_concurrency() <= 3);
    assert!(report.summary.stats.peak_concurrent <= 3);
    assert!(report.summary.stats.peak_in_flight <= 6);
}

// ---------------------------------------------------------------------------
// Test: a cancelled run admits nothing and reports interruption
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_run_is_interrupted() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let generator = FakeRemote::echo();
    let pipeline = GeneratePipeline::new(
        FakeFetcher::default(),
        generator.clone(),
        options(3).with_cancellation(cancel),
    );

    let report = pipeline
        .run(&endpoints(2), parse_prompts(FOUR), &GenerateConfig::new(dir.path()))
        .await
        .unwrap();

    assert!(!report.summary.success);
    assert!(report.summary.interrupted);
    assert_eq!(report.summary.skipped, 4);
    assert!(generator.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Test: every run starts its rotation at the first endpoint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn each_run_starts_at_the_first_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let generator = FakeRemote::echo();
    let pipeline = GeneratePipeline::new(FakeFetcher::default(), generator.clone(), options(1));
    let endpoints = endpoints(2);

    for url in ["https://cdn.test/a.png", "https://cdn.test/b.png"] {
        let report = pipeline
            .run(&endpoints, parse_prompts(url), &GenerateConfig::new(dir.path()))
            .await
            .unwrap();
        assert_eq!(report.outputs[0].endpoint, endpoints[0]);
    }

    let used: Vec<_> = generator.calls().into_iter().map(|(e, _)| e).collect();
    assert_eq!(used, vec![endpoints[0].clone(), endpoints[0].clone()]);
}

// ---------------------------------------------------------------------------
// Test: an empty endpoint list is a configuration error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn no_endpoints_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = GeneratePipeline::new(FakeFetcher::default(), FakeRemote::echo(), options(1));

    let result = pipeline
        .run(&[], parse_prompts(FOUR), &GenerateConfig::new(dir.path()))
        .await;

    assert_matches!(
        result,
        Err(PipelineError::Core(CoreError::Configuration(_)))
    );
}
