//! # `HttpSender` Live Smoke Test
//!
//! Runs a small pipeline against `httpbin.org`, a public, well-behaved echo
//! service. `/status/201` answers every request with `201 Created`, which is
//! what `HttpSender` expects by default; `/status/409` answers with a conflict,
//! which must come back as a rejection trace rather than a failure.
//!
//! Executed with `tokio::main`; needs network access.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;

use lib_reqflow::retrieve::ky_http::ApiClient;
use lib_reqflow::senders::http_sender::HttpSender;
use lib_reqflow::{
    ControlStatus, EventRecorder, EventSink, LoopRole, Payload, Pipeline, PipelineConfig, PipelineError,
    RateConfig,
};
use serde::Serialize;

/// The body posted for each request.
#[derive(Debug, Clone, Serialize)]
struct Ping {
    sequence: u64,
    message: String,
}

fn config() -> PipelineConfig {
    PipelineConfig {
        generator: RateConfig::new(4, "seconds"),
        generator_count: 3,
        dispatcher: RateConfig::new(2, "seconds"),
        capacity: 2,
    }
}

async fn run(path: &str) -> anyhow::Result<Arc<EventRecorder>> {
    let client = ApiClient::new("https://httpbin.org/", Some("test_secret_123".into()), 2)?;
    let sender = HttpSender::new(client, path);
    let recorder = Arc::new(EventRecorder::new());
    let events: Arc<dyn EventSink<Ping>> = recorder.clone();

    let mut sequence = 0u64;
    let source = move || {
        sequence += 1;
        Ok::<_, PipelineError>(Payload::new(
            sequence,
            Ping {
                sequence,
                message: "Hello from Rust".into(),
            },
        ))
    };

    let report = Pipeline::from_config(&config())?.run(source, sender, events).await?;
    println!("Report: {report}");
    anyhow::ensure!(report.is_complete(), "pipeline did not complete: {report}");
    Ok(recorder)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("--- Starting HttpSender Live Tests ---");

    // --- TEST 1: Accepted requests ---
    println!("\n[Test 1] Posting to status/201...");
    let recorder = run("status/201").await?;
    assert_eq!(recorder.count(LoopRole::Dispatcher, ControlStatus::Data), 3);
    for event in recorder.events_of(LoopRole::Dispatcher) {
        if event.status == ControlStatus::Data {
            println!("✅ Accepted, trace: {}", event.trace.unwrap_or_default());
        }
    }

    // --- TEST 2: Rejected requests ---
    println!("\n[Test 2] Posting to status/409...");
    let recorder = run("status/409").await?;
    assert_eq!(recorder.count(LoopRole::Dispatcher, ControlStatus::Failed), 0);
    for event in recorder.events_of(LoopRole::Dispatcher) {
        if event.status == ControlStatus::Data {
            let trace = event.trace.unwrap_or_default();
            assert!(trace.contains("'409, Conflict'"), "unexpected trace {trace}");
            println!("✅ Rejected, trace: {trace}");
        }
    }

    println!("\n--- All Tests Passed Successfully ---");
    Ok(())
}
