//! Dry run of a queue pipeline against the logging sink.
//!
//! Reads an optional TOML config, pushes synthetic JSON events through the
//! service, and prints the resulting stats and Prometheus metrics.
//!
//! Usage:
//!   cargo run -p qio-service --example dry_run -- [config.toml] [events]

use std::env;
use std::time::Instant;

use qio_core::JsonLinesMapper;
use qio_service::{metrics, HashedKey, LoggingSink, QueueService, ServiceConfig};
use serde::Serialize;

#[derive(Debug, Hash, Serialize)]
struct Event {
    id: u64,
    kind: &'static str,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let mut args = env::args().skip(1);
    let config = match args.next() {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig {
            destinations: vec!["dry-run".to_string()],
            ..Default::default()
        },
    };
    let events: u64 = args.next().map(|n| n.parse()).transpose()?.unwrap_or(10_000);

    let mut service = QueueService::builder(config)
        .mapper(JsonLinesMapper)
        .sink(LoggingSink)
        .partition_key(HashedKey::new())
        .build()?;

    let start = Instant::now();
    service.start()?;
    for id in 0..events {
        let event = Event {
            id,
            kind: if id % 2 == 0 { "view" } else { "click" },
        };
        if let Err(err) = service.enqueue(event) {
            eprintln!("enqueue failed: {}", err);
        }
    }
    let report = service.stop()?;
    let elapsed = start.elapsed();

    let stats = service.stats();
    println!();
    println!("  Events:      {}", events);
    println!("  Delivered:   {}", stats.delivered_items);
    println!("  Flushes:     {}", stats.flushes());
    println!("  Workers:     {} joined, {} detached", report.workers_joined, report.workers_detached);
    println!("  Elapsed:     {:?}", elapsed);
    println!();
    print!("{}", metrics::gather_text());
    Ok(())
}
