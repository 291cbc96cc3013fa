//! Async measurement integration tests.
//!
//! Requires the `async` feature. Fixture-dependent tests return early
//! when the fixture is missing.

#![cfg(feature = "async")]

use std::path::Path;

use loudscan::{LoudnormOptions, LoudscanError, measure_file_async};

fn sample_audio_path() -> &'static str {
    "tests/fixtures/sample_audio.mp4"
}

#[tokio::test]
async fn async_measure_nonexistent_file() {
    let result = measure_file_async("this_file_does_not_exist.mp4", LoudnormOptions::new()).await;
    assert!(matches!(result, Err(LoudscanError::FileOpen { .. })));
}

#[tokio::test]
async fn async_measure_returns_statistics() {
    let path = sample_audio_path();
    if !Path::new(path).exists() {
        return;
    }

    let stats = measure_file_async(path, LoudnormOptions::new())
        .await
        .expect("measurement")
        .expect("statistics");

    assert!(stats.input_i < 0.0);
}

#[tokio::test]
async fn async_measurements_queue_without_contamination() {
    let path = sample_audio_path();
    if !Path::new(path).exists() {
        return;
    }

    let (first, second) = tokio::join!(
        measure_file_async(path, LoudnormOptions::new()),
        measure_file_async(path, LoudnormOptions::new()),
    );

    let first = first.expect("first measurement").expect("statistics");
    let second = second.expect("second measurement").expect("statistics");
    assert!((first.input_i - second.input_i).abs() < 0.1);
}
