//! # Pipeline Scenario Tests
//!
//! End-to-end runs of the generator, channel and dispatcher through the public
//! `lib_reqflow` API. Every test that depends on pacing runs on tokio's paused
//! clock, so rate intervals elapse instantly and deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use http::StatusCode;
use lib_reqflow::{
    ControlStatus, Dispatcher, EventRecorder, EventSink, LoopReport, LoopRole, Outcome, Payload,
    PayloadSource, Pipeline, PipelineConfig, PipelineError, RateConfig, RateLimiter, RateSpec,
    TimeUnit, TransportSender, bounded,
};
use proptest::prelude::*;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize)]
struct Order {
    number: u64,
    item: String,
}

fn orders() -> impl PayloadSource<Order> {
    let mut id = 0u64;
    move || {
        id += 1;
        Ok::<_, PipelineError>(Payload::new(
            id,
            Order {
                number: id * 100,
                item: format!("item-{id}"),
            },
        ))
    }
}

#[derive(Clone, Copy)]
enum Behaviour {
    Accept,
    Reject,
    FaultAt(usize),
}

/// Answers according to `behaviour` and counts every call.
#[derive(Clone)]
struct Remote {
    behaviour: Behaviour,
    calls: Arc<AtomicUsize>,
}

impl Remote {
    fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TransportSender<Order> for Remote {
    async fn send(&self, _payload: &Payload<Order>) -> anyhow::Result<Outcome> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Accept => Ok(Outcome::Success {
                status: StatusCode::CREATED,
            }),
            Behaviour::Reject => Ok(Outcome::rejected(StatusCode::UNPROCESSABLE_ENTITY, StatusCode::CREATED)),
            Behaviour::FaultAt(at) if n == at => anyhow::bail!("connection refused"),
            Behaviour::FaultAt(_) => Ok(Outcome::Success {
                status: StatusCode::CREATED,
            }),
        }
    }
}

fn config(generator: (i64, &str), count: i64, dispatcher: (i64, &str), capacity: i64) -> PipelineConfig {
    PipelineConfig {
        generator: RateConfig::new(generator.0, generator.1),
        generator_count: count,
        dispatcher: RateConfig::new(dispatcher.0, dispatcher.1),
        capacity,
    }
}

fn sink(recorder: &Arc<EventRecorder>) -> Arc<dyn EventSink<Order>> {
    recorder.clone()
}

#[tokio::test(start_paused = true)]
async fn test_three_items_through_a_single_slot_channel() {
    let recorder = Arc::new(EventRecorder::new());
    let remote = Remote::new(Behaviour::Accept);
    let pipeline = Pipeline::from_config(&config((10, "seconds"), 3, (5, "seconds"), 1)).unwrap();
    let start = tokio::time::Instant::now();

    let report = pipeline.run(orders(), remote.clone(), sink(&recorder)).await.unwrap();

    assert!(report.is_complete(), "{report}");
    assert_eq!(remote.calls(), 3);
    assert_eq!(recorder.len(), 10);
    for role in [LoopRole::Generator, LoopRole::Dispatcher] {
        assert_eq!(recorder.count(role, ControlStatus::Started), 1);
        assert_eq!(recorder.count(role, ControlStatus::Data), 3);
        assert_eq!(recorder.count(role, ControlStatus::Terminal), 1);
        assert_eq!(recorder.last_status(role), Some(ControlStatus::Terminal));
    }
    assert_eq!(recorder.data_ids(LoopRole::Dispatcher), vec![2, 3, 4]);

    // Three dispatcher intervals of 200ms, the sentinel is not paced.
    assert_eq!(start.elapsed(), Duration::from_millis(600));
}

#[tokio::test(start_paused = true)]
async fn test_correlation_tokens_reach_the_dispatcher() {
    let recorder = Arc::new(EventRecorder::new());
    let pipeline = Pipeline::from_config(&config((50, "seconds"), 4, (50, "seconds"), 2)).unwrap();

    pipeline
        .run(orders(), Remote::new(Behaviour::Accept), sink(&recorder))
        .await
        .unwrap();

    let generated = recorder.events_of(LoopRole::Generator);
    let dispatched = recorder.events_of(LoopRole::Dispatcher);
    for (g, d) in generated.iter().zip(dispatched.iter()).filter(|(g, _)| g.status == ControlStatus::Data) {
        assert_eq!(g.payload_id, d.payload_id);
        assert!(g.correlation.is_some());
        assert_eq!(g.correlation, d.correlation);
    }
    assert_eq!(
        dispatched[1].trace.as_deref(),
        Some(r#"{"number":200,"item":"item-2"}"#)
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejecting_remote_still_completes() {
    let recorder = Arc::new(EventRecorder::new());
    let pipeline = Pipeline::from_config(&config((10, "seconds"), 3, (5, "seconds"), 1)).unwrap();

    let report = pipeline
        .run(orders(), Remote::new(Behaviour::Reject), sink(&recorder))
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(recorder.count(LoopRole::Dispatcher, ControlStatus::Failed), 0);
    let traces: Vec<String> = recorder
        .events_of(LoopRole::Dispatcher)
        .into_iter()
        .filter(|e| e.status == ControlStatus::Data)
        .filter_map(|e| e.trace)
        .collect();
    assert_eq!(traces.len(), 3);
    assert_eq!(
        traces[0],
        "Request (id=2) was rejected by remote side with status '422, Unprocessable Entity', status '201, Created' expected"
    );
}

#[tokio::test(start_paused = true)]
async fn test_transport_fault_stops_the_run() {
    let recorder = Arc::new(EventRecorder::new());
    let remote = Remote::new(Behaviour::FaultAt(1));
    let pipeline = Pipeline::from_config(&config((10, "seconds"), 50, (10, "seconds"), 2)).unwrap();

    let report = pipeline.run(orders(), remote.clone(), sink(&recorder)).await.unwrap();

    assert!(!report.is_complete());
    assert!(matches!(
        report.dispatcher,
        LoopReport::Failed {
            items: 1,
            error: PipelineError::TransportFault(_)
        }
    ));
    assert!(matches!(report.generator.error(), Some(PipelineError::ChannelClosed)));
    assert_eq!(remote.calls(), 2);

    let failed = recorder.events_of(LoopRole::Dispatcher).pop().unwrap();
    assert_eq!(failed.status, ControlStatus::Failed);
    assert_eq!(failed.payload_id, Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_fault_after_generator_finished() {
    let recorder = Arc::new(EventRecorder::new());
    let pipeline = Pipeline::from_config(&config((1000, "seconds"), 2, (1, "seconds"), 10)).unwrap();

    let report = pipeline
        .run(orders(), Remote::new(Behaviour::FaultAt(1)), sink(&recorder))
        .await
        .unwrap();

    assert!(matches!(report.generator, LoopReport::Completed { items: 2 }));
    assert!(report.dispatcher.error().is_some());
    assert!(!report.is_complete());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_dispatcher_waits_for_input() {
    let recorder = Arc::new(EventRecorder::new());
    let remote = Remote::new(Behaviour::Accept);
    let cancel = CancellationToken::new();
    let (_tx, rx) = bounded::<Payload<Order>>(4).unwrap();
    let dispatcher = Dispatcher::new(
        rx,
        remote.clone(),
        RateLimiter::new(RateSpec::new(5, TimeUnit::Seconds).unwrap()),
        sink(&recorder),
        cancel.clone(),
    );
    let task = tokio::spawn(dispatcher.run());

    tokio::time::sleep(Duration::from_secs(30)).await;
    cancel.cancel();
    let report = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();

    assert!(matches!(report, LoopReport::Interrupted { items: 0 }));
    assert_eq!(remote.calls(), 0);
    assert_eq!(
        recorder.last_status(LoopRole::Dispatcher),
        Some(ControlStatus::Interrupted)
    );
}

#[tokio::test(start_paused = true)]
async fn test_graceful_stop_drains_an_unbounded_run() {
    let recorder = Arc::new(EventRecorder::new());
    let config = config((20, "seconds"), 1, (40, "seconds"), 3).validate().unwrap().unbounded();
    let handle = Pipeline::new(config)
        .spawn(orders(), Remote::new(Behaviour::Accept), sink(&recorder))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1_010)).await;
    handle.stop();
    let report = handle.join().await;

    assert!(report.is_complete(), "{report}");
    assert!(report.generator.is_completed());
    assert!(report.generator.items() >= 20);
    assert!(recorder.pipeline_completed());
}

#[tokio::test(start_paused = true)]
async fn test_graceful_stop_of_a_fixed_run_is_not_complete() {
    let recorder = Arc::new(EventRecorder::new());
    let handle = Pipeline::from_config(&config((1, "seconds"), 10, (10, "seconds"), 5))
        .unwrap()
        .spawn(orders(), Remote::new(Behaviour::Accept), sink(&recorder))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    handle.stop();
    let report = handle.join().await;

    assert!(matches!(report.generator, LoopReport::Stopped { items: 3, requested: 10 }), "{report}");
    assert!(matches!(report.dispatcher, LoopReport::Completed { items: 3 }));
    assert!(!report.is_complete(), "{report}");
    assert!(report.is_drained());
    assert!(recorder.pipeline_completed());
    assert!(!recorder.delivered(10));
    assert!(recorder.delivered(3));
}

#[tokio::test(start_paused = true)]
async fn test_hard_cancel_interrupts_both_loops() {
    let recorder = Arc::new(EventRecorder::new());
    let handle = Pipeline::from_config(&config((10, "seconds"), 10_000, (1, "minutes"), 5))
        .unwrap()
        .spawn(orders(), Remote::new(Behaviour::Accept), sink(&recorder))
        .unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    handle.cancel();
    let report = handle.join().await;

    assert!(matches!(report.generator, LoopReport::Interrupted { .. }));
    assert!(matches!(report.dispatcher, LoopReport::Interrupted { .. }));
    assert_eq!(recorder.count(LoopRole::Generator, ControlStatus::Terminal), 0);
}

#[test]
fn test_invalid_configuration_lists_every_field() {
    let err = Pipeline::from_config(&config((0, "seconds"), 0, (2, "fortnights"), 10_001)).unwrap_err();

    let PipelineError::InvalidConfig(problems) = err else {
        panic!("expected an invalid configuration error");
    };
    assert_eq!(problems.problems.len(), 4, "{problems}");
    for field in ["generator.limit", "generatorCount", "dispatcher.unit", "capacity"] {
        assert!(problems.mentions(field), "{field} missing from {problems}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_dispatch_order_matches_generation_order(count in 1i64..40, capacity in 1i64..8) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();
        let recorder = Arc::new(EventRecorder::new());
        let report = rt.block_on(async {
            Pipeline::from_config(&config((100, "seconds"), count, (70, "seconds"), capacity))
                .unwrap()
                .run(orders(), Remote::new(Behaviour::Accept), sink(&recorder))
                .await
                .unwrap()
        });

        prop_assert!(report.is_complete());
        let expected: Vec<u64> = (2..count as u64 + 2).collect();
        prop_assert_eq!(recorder.data_ids(LoopRole::Generator), expected.clone());
        prop_assert_eq!(recorder.data_ids(LoopRole::Dispatcher), expected);
        let last = recorder.events_of(LoopRole::Dispatcher).pop().unwrap();
        prop_assert_eq!(last.status, ControlStatus::Terminal);
        prop_assert_eq!(last.payload_id, Some(1));
    }
}
