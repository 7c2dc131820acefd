//! End-to-end tests for the queue service.
//!
//! Each test runs a real service (worker threads, channels, timers) against
//! an in-memory sink and checks what arrived:
//! 1. Items are enqueued before or after `start()`
//! 2. Workers accumulate and flush by size, count or time
//! 3. `stop()` drains whatever is still queued
//! 4. The sink's recorded calls are compared with what was sent

use std::collections::BTreeSet;
use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flate2::read::MultiGzDecoder;
use qio_core::{CoreError, JsonLinesMapper, Limits, StrategyKind, StringMapper, WireRecord};
use qio_service::{
    ChannelReporter, HashedKey, MemorySink, PipelineFailure, PutMode, QueueService,
    ServiceConfig, SinkError,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Event {
    id: u64,
    user: String,
    action: String,
}

fn event(id: u64) -> Event {
    Event {
        id,
        user: format!("user-{}", id % 37),
        action: if id % 3 == 0 { "click" } else { "view" }.to_string(),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// One worker, one destination, timer effectively off.
fn base_config() -> ServiceConfig {
    ServiceConfig {
        destinations: vec!["events".to_string()],
        worker_threads: 1,
        flush_interval_ms: 60_000,
        drain_timeout_ms: 10_000,
        limits: Limits::new(1000, 100),
        ..Default::default()
    }
}

/// Nine digits plus the newline: exactly ten bytes on the wire.
fn ten_bytes(i: usize) -> String {
    format!("{:09}", i)
}

fn decode_events(records: &[WireRecord]) -> Vec<Event> {
    records
        .iter()
        .flat_map(|r| {
            std::str::from_utf8(r.data())
                .unwrap()
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect::<Vec<Event>>()
        })
        .collect()
}

#[test]
fn test_size_bound_splits_batches() {
    init_tracing();
    let sink = Arc::new(MemorySink::new());
    let mut service =
        QueueService::<String>::configure(base_config(), StringMapper, sink.clone()).unwrap();

    for i in 0..150 {
        service.enqueue(ten_bytes(i)).unwrap();
    }
    service.start().unwrap();
    let report = service.stop().unwrap();
    assert!(report.is_clean());

    let batches = sink.batches();
    assert_eq!(batches.len(), 2);
    let sizes: Vec<usize> = batches
        .iter()
        .map(|b| b.iter().map(WireRecord::len).sum())
        .collect();
    assert_eq!(sizes, vec![990, 510]);

    let stats = service.stats();
    assert_eq!(stats.enqueued, 150);
    assert_eq!(stats.accepted, 150);
    assert_eq!(stats.delivered_items, 150);
    assert_eq!(stats.flushes_batch_full, 1);
    assert_eq!(stats.flushes_shutdown, 1);
}

#[test]
fn test_record_cap_flushes_on_saturation() {
    init_tracing();
    let sink = Arc::new(MemorySink::new());
    let config = ServiceConfig {
        limits: Limits::new(1000, 100).with_max_records(4),
        ..base_config()
    };
    let mut service = QueueService::<String>::configure(config, StringMapper, sink.clone()).unwrap();

    for i in 0..10 {
        service.enqueue(ten_bytes(i)).unwrap();
    }
    service.start().unwrap();
    service.stop().unwrap();

    let lens: Vec<usize> = sink.batches().iter().map(Vec::len).collect();
    assert_eq!(lens, vec![4, 4, 2]);
    assert_eq!(service.stats().flushes_saturated, 2);
}

#[test]
fn test_oversized_items_reported_and_skipped() {
    init_tracing();
    let sink = Arc::new(MemorySink::new());
    let (reporter, failures) = ChannelReporter::new();
    let mut service = QueueService::builder(base_config())
        .mapper(StringMapper)
        .sink(sink.clone())
        .reporter(reporter)
        .build()
        .unwrap();

    service.enqueue("fits".to_string()).unwrap();
    service.enqueue("y".repeat(200)).unwrap();
    service.enqueue("fits too".to_string()).unwrap();
    service.start().unwrap();
    service.stop().unwrap();

    let failure = failures.try_recv().unwrap();
    assert!(matches!(
        failure,
        PipelineFailure::Oversized {
            size: 201,
            limit: 100,
            ..
        }
    ));
    assert_eq!(failure.into_item().unwrap().len(), 200);
    assert!(failures.try_recv().is_err());

    let records = sink.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].data().as_ref(), b"fits\n");
    assert_eq!(service.stats().oversized, 1);
}

#[test]
fn test_unmappable_items_reported() {
    init_tracing();
    let sink = Arc::new(MemorySink::new());
    let (reporter, failures) = ChannelReporter::new();
    let mut service = QueueService::builder(base_config())
        .mapper(|s: &String| -> qio_core::Result<WireRecord> {
            if s.starts_with('!') {
                Err(CoreError::Mapping(format!("refusing {}", s)))
            } else {
                Ok(WireRecord::from(s.clone()))
            }
        })
        .sink(sink.clone())
        .reporter(reporter)
        .build()
        .unwrap();

    service.enqueue("ok".to_string()).unwrap();
    service.enqueue("!bad".to_string()).unwrap();
    service.enqueue(String::new()).unwrap();
    service.start().unwrap();
    service.stop().unwrap();

    let kinds: Vec<&str> = failures.try_iter().map(|f| f.kind()).collect();
    assert_eq!(kinds, vec!["unmappable", "unmappable"]);
    assert_eq!(sink.total_records(), 1);
    assert_eq!(service.stats().unmappable, 2);
}

#[test]
fn test_partial_batch_flushed_by_timer() {
    init_tracing();
    let sink = Arc::new(MemorySink::new());
    let config = ServiceConfig {
        flush_interval_ms: 100,
        ..base_config()
    };
    let mut service = QueueService::<String>::configure(config, StringMapper, sink.clone()).unwrap();
    service.start().unwrap();

    for i in 0..5 {
        service.enqueue(ten_bytes(i)).unwrap();
    }
    assert!(sink.wait_for_records(5, Duration::from_secs(5)));
    assert_eq!(sink.call_count(), 1);
    assert_eq!(service.stats().flushes_timeout, 1);

    service.stop().unwrap();
    assert_eq!(sink.call_count(), 1);
    assert_eq!(service.stats().flushes_shutdown, 0);
}

#[test]
fn test_json_items_delivered_exactly_once() {
    init_tracing();
    let sink = Arc::new(MemorySink::new());
    let config = ServiceConfig {
        worker_threads: 3,
        limits: Limits::new(4096, 1024),
        ..base_config()
    };
    let mut service = QueueService::<Event>::configure(config, JsonLinesMapper, sink.clone()).unwrap();
    service.start().unwrap();

    for id in 0..1000 {
        service.enqueue(event(id)).unwrap();
    }
    let report = service.stop().unwrap();
    assert_eq!(report.workers_joined, 3);

    let mut events = decode_events(&sink.records());
    events.sort_by_key(|e| e.id);
    assert_eq!(events.len(), 1000);
    assert_eq!(events, (0..1000).map(event).collect::<Vec<_>>());
    assert!(sink
        .batches()
        .iter()
        .all(|b| b.iter().map(WireRecord::len).sum::<usize>() < 4096));
}

#[test]
fn test_smart_gzip_batches_decode_and_fit() {
    init_tracing();
    let sink = Arc::new(MemorySink::new());
    let config = ServiceConfig {
        worker_threads: 4,
        strategy: StrategyKind::SmartGzip,
        limits: Limits::new(2048, 512),
        ..base_config()
    };
    let mut service = QueueService::<Event>::configure(config, JsonLinesMapper, sink.clone()).unwrap();
    service.start().unwrap();

    for id in 0..2000 {
        service.enqueue(event(id)).unwrap();
    }
    service.stop().unwrap();

    let mut ids = BTreeSet::new();
    let mut raw_total = 0;
    let mut payload_total = 0;
    for call in sink.calls() {
        let batch_bytes: usize = call.records.iter().map(WireRecord::len).sum();
        assert!(batch_bytes < 2048);

        for record in &call.records {
            let payload = record.data();
            assert!(payload.len() <= 512);
            assert_eq!(&payload[..2], b"\x1f\x8b");

            let mut text = String::new();
            MultiGzDecoder::new(&payload[..])
                .read_to_string(&mut text)
                .unwrap();
            raw_total += text.len();
            payload_total += payload.len();
            for line in text.lines() {
                let e: Event = serde_json::from_str(line).unwrap();
                assert!(ids.insert(e.id), "duplicate id {}", e.id);
            }
        }
    }
    assert_eq!(ids.len(), 2000);
    assert!(payload_total < raw_total);
}

#[test]
fn test_smart_gzip_single_mode_puts_each_member() {
    init_tracing();
    let sink = Arc::new(MemorySink::new());
    let config = ServiceConfig {
        strategy: StrategyKind::SmartGzip,
        put_mode: PutMode::Single,
        limits: Limits::new(4096, 600),
        ..base_config()
    };
    let mut service = QueueService::<Event>::configure(config, JsonLinesMapper, sink.clone()).unwrap();
    for id in 0..400 {
        service.enqueue(event(id)).unwrap();
    }
    service.start().unwrap();
    service.stop().unwrap();

    let calls = sink.calls();
    assert!(calls.len() > 1);
    assert!(calls.iter().all(|c| c.mode == PutMode::Single && c.records.len() == 1));
    assert!(calls.iter().all(|c| c.records[0].len() <= 600));

    let mut text = String::new();
    for call in &calls {
        MultiGzDecoder::new(&call.records[0].data()[..])
            .read_to_string(&mut text)
            .unwrap();
    }
    assert_eq!(text.lines().count(), 400);
    assert_eq!(service.stats().delivered_items, 400);
}

#[test]
fn test_put_modes() {
    init_tracing();
    for (mode, expected_calls) in [(PutMode::Single, 10), (PutMode::Batch, 1)] {
        let sink = Arc::new(MemorySink::new());
        let config = ServiceConfig {
            put_mode: mode,
            ..base_config()
        };
        let mut service =
            QueueService::<String>::configure(config, StringMapper, sink.clone()).unwrap();
        for i in 0..10 {
            service.enqueue(ten_bytes(i)).unwrap();
        }
        service.start().unwrap();
        service.stop().unwrap();

        let calls = sink.calls();
        assert_eq!(calls.len(), expected_calls, "mode {}", mode);
        assert!(calls.iter().all(|c| c.mode == mode));
        assert_eq!(sink.total_records(), 10);
    }
}

#[test]
fn test_every_destination_gets_every_batch() {
    init_tracing();
    let sink = Arc::new(MemorySink::new());
    let config = ServiceConfig {
        destinations: vec!["primary".to_string(), "archive".to_string()],
        ..base_config()
    };
    let mut service = QueueService::builder(config)
        .mapper(StringMapper)
        .sink(sink.clone())
        .partition_key(|items: &[String]| format!("n{}", items.len()))
        .build()
        .unwrap();

    for i in 0..150 {
        service.enqueue(ten_bytes(i)).unwrap();
    }
    service.start().unwrap();
    service.stop().unwrap();

    let calls = sink.calls();
    let routing: Vec<(&str, Option<&str>)> = calls
        .iter()
        .map(|c| (c.destination.as_str(), c.partition_key.as_deref()))
        .collect();
    assert_eq!(
        routing,
        vec![
            ("primary", Some("n99")),
            ("archive", Some("n99")),
            ("primary", Some("n51")),
            ("archive", Some("n51")),
        ]
    );
    assert_eq!(calls[0].records, calls[1].records);
    assert_eq!(service.stats().delivered_items, 150);
}

#[test]
fn test_hashed_partition_key_is_stable() {
    init_tracing();
    let sink = Arc::new(MemorySink::new());
    let mut service = QueueService::builder(base_config())
        .mapper(StringMapper)
        .sink(sink.clone())
        .partition_key(HashedKey::new())
        .build()
        .unwrap();

    service.enqueue("a".to_string()).unwrap();
    service.start().unwrap();
    service.stop().unwrap();

    let key = sink.calls()[0].partition_key.clone().unwrap();
    assert_eq!(key.len(), 16);
    assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_sink_failure_reported_and_pipeline_continues() {
    init_tracing();
    let sink = Arc::new(MemorySink::new());
    sink.fail_next(SinkError::Permanent("stream not found".into()));
    let (reporter, failures) = ChannelReporter::new();
    let config = ServiceConfig {
        limits: Limits::new(1000, 100).with_max_records(2),
        ..base_config()
    };
    let mut service = QueueService::builder(config)
        .mapper(StringMapper)
        .sink(sink.clone())
        .reporter(reporter)
        .build()
        .unwrap();

    for i in 0..4 {
        service.enqueue(ten_bytes(i)).unwrap();
    }
    service.start().unwrap();
    service.stop().unwrap();

    match failures.try_recv().unwrap() {
        PipelineFailure::SinkFailed {
            destination,
            records,
            items,
            error,
        } => {
            assert_eq!(destination, "events");
            assert_eq!(records, 2);
            assert_eq!(items, 2);
            assert!(!error.is_retryable());
        }
        other => panic!("unexpected failure {:?}", other),
    }

    assert_eq!(sink.failed_calls(), 1);
    assert_eq!(sink.total_records(), 2);
    let stats = service.stats();
    assert_eq!(stats.sink_failures, 1);
    assert_eq!(stats.delivered_items, 2);
}

#[test]
fn test_concurrent_producers_on_bounded_queue() {
    init_tracing();
    let sink = Arc::new(MemorySink::new());
    let config = ServiceConfig {
        worker_threads: 2,
        queue_capacity: Some(16),
        enqueue_timeout_ms: Some(5_000),
        ..base_config()
    };
    let mut service = QueueService::<String>::configure(config, StringMapper, sink.clone()).unwrap();
    service.start().unwrap();

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let enqueuer = service.enqueuer();
            thread::spawn(move || {
                for i in 0..250 {
                    enqueuer.enqueue(ten_bytes(p * 1000 + i)).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    service.stop().unwrap();
    assert_eq!(sink.total_records(), 1000);
    assert_eq!(service.stats().enqueued, 1000);
}

#[test]
fn test_stop_drains_queue_and_closes_enqueuer() {
    init_tracing();
    let sink = Arc::new(MemorySink::new());
    let config = ServiceConfig {
        worker_threads: 2,
        ..base_config()
    };
    let mut service = QueueService::<String>::configure(config, StringMapper, sink.clone()).unwrap();
    let enqueuer = service.enqueuer();

    for i in 0..500 {
        enqueuer.enqueue(ten_bytes(i)).unwrap();
    }
    service.start().unwrap();
    let report = service.stop().unwrap();

    assert_eq!(report.workers_joined, 2);
    assert_eq!(report.undelivered, 0);
    assert_eq!(sink.total_records(), 500);
    assert_eq!(service.queue_len(), 0);

    let err = enqueuer.enqueue("late".to_string()).unwrap_err();
    assert!(err.is_closed());
}

#[test]
fn test_service_from_toml_config() {
    init_tracing();
    let config = ServiceConfig::from_toml_str(
        r#"
        destinations = ["clicks"]
        put_mode = "single"
        worker_threads = 1
        flush_interval_ms = 60000

        [limits]
        max_batch_bytes = 1000
        max_record_bytes = 100
        max_records = 3
        "#,
    )
    .unwrap();

    let sink = Arc::new(MemorySink::new());
    let mut service = QueueService::<String>::configure(config, StringMapper, sink.clone()).unwrap();
    for i in 0..3 {
        service.enqueue(ten_bytes(i)).unwrap();
    }
    service.start().unwrap();
    service.stop().unwrap();

    let calls = sink.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.destination == "clicks" && c.mode == PutMode::Single));
    assert_eq!(service.stats().flushes_saturated, 1);
}

#[test]
fn test_metrics_exported_after_run() {
    init_tracing();
    let sink = Arc::new(MemorySink::new());
    let mut service = QueueService::<String>::configure(base_config(), StringMapper, sink).unwrap();
    service.enqueue("m".to_string()).unwrap();
    service.start().unwrap();
    service.stop().unwrap();

    let text = qio_service::metrics::gather_text();
    assert!(text.contains("qio_batches_flushed_total"));
    assert!(text.contains("qio_batch_bytes"));
}
