use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use tripbook::catalog::{CatalogEntry, InMemoryCatalog, PriceUnit};
use tripbook::engine::{Engine, EngineError, EngineOptions};
use tripbook::identity::Caller;
use tripbook::model::*;

/// 2030-01-01T00:00:00Z, safely in the future for the system clock.
const EPOCH: Ms = 1_893_456_000_000;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn guide(i: usize) -> ResourceKey {
    ResourceKey::new(ResourceType::Guide, format!("G{i}"))
}

fn homestay(i: usize) -> ResourceKey {
    ResourceKey::new(ResourceType::Homestay, format!("H{i}"))
}

fn setup(name: &str) -> Arc<Engine> {
    let catalog = InMemoryCatalog::new();
    for i in 0..10 {
        catalog.upsert(
            guide(i),
            CatalogEntry {
                capacity: if i < 5 { 1 } else { 10 },
                unit_price: 2_000,
                price_unit: PriceUnit::PerHour,
                active: true,
            },
        );
        catalog.upsert(
            homestay(i),
            CatalogEntry {
                capacity: 1,
                unit_price: 5_000,
                price_unit: PriceUnit::PerNight,
                active: true,
            },
        );
    }
    catalog.upsert(
        ResourceKey::new(ResourceType::Product, "P0"),
        CatalogEntry {
            capacity: 1_000,
            unit_price: 1_500,
            price_unit: PriceUnit::PerItem,
            active: true,
        },
    );

    let dir = std::env::temp_dir().join(format!("tripbook_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let engine = Engine::new(dir.join(name), Arc::new(catalog), EngineOptions::default())
        .expect("open engine");
    Arc::new(engine)
}

fn tour(resource: ResourceKey, hour: i64) -> NewBooking {
    NewBooking {
        resource,
        window: Window::Time(Span::new(EPOCH + hour * HOUR_MS, EPOCH + (hour + 1) * HOUR_MS)),
    }
}

async fn phase1_sequential() {
    let engine = setup("sequential.wal");
    let caller = Caller::customer("bench");
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        engine
            .create_booking(&caller, tour(guide(9), i as i64))
            .await
            .expect("sequential create");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_contention() {
    let engine = setup("contention.wal");
    let n_tasks = 200;
    let won = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..n_tasks {
        let engine = engine.clone();
        let won = won.clone();
        let lost = lost.clone();
        handles.push(tokio::spawn(async move {
            let caller = Caller::customer(format!("c{i}"));
            // Everyone wants the same night on one of five homestays.
            match engine.create_booking(&caller, tour(homestay(i % 5), 24)).await {
                Ok(_) => won.fetch_add(1, Ordering::Relaxed),
                Err(EngineError::SlotUnavailable { .. }) => lost.fetch_add(1, Ordering::Relaxed),
                Err(e) => panic!("unexpected error: {e}"),
            };
        }));
    }
    for h in handles {
        h.await.expect("task panicked");
    }

    let elapsed = start.elapsed();
    println!(
        "  {n_tasks} racing creates in {:.2}s: {} won, {} rejected",
        elapsed.as_secs_f64(),
        won.load(Ordering::Relaxed),
        lost.load(Ordering::Relaxed)
    );
    assert_eq!(won.load(Ordering::Relaxed), 5, "a homestay was double-booked");
    assert!(engine.verify_ledger().await.is_empty(), "ledger drifted");
}

async fn phase3_read_under_load() {
    let engine = setup("read_under_load.wal");
    let caller = Caller::customer("bench");
    for i in 0..200 {
        engine
            .create_booking(&caller, tour(guide(8), i * 2))
            .await
            .expect("prefill");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let engine = engine.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let caller = Caller::customer(format!("writer-{w}"));
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let _ = engine.create_booking(&caller, tour(guide(5 + w), i)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let engine = engine.clone();
        reader_handles.push(tokio::spawn(async move {
            let query = Span::new(EPOCH, EPOCH + 300 * HOUR_MS);
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                engine.availability(&guide(8), query).await.expect("availability");
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.expect("reader panicked"));
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

async fn phase4_churn() {
    let engine = setup("churn.wal");
    let product = ResourceKey::new(ResourceType::Product, "P0");
    let n_tasks = 20;
    let rounds = 100;

    let start = Instant::now();
    let mut handles = Vec::new();
    for t in 0..n_tasks {
        let engine = engine.clone();
        let product = product.clone();
        handles.push(tokio::spawn(async move {
            let caller = Caller::customer(format!("shopper-{t}"));
            for _ in 0..rounds {
                let request = NewBooking {
                    resource: product.clone(),
                    window: Window::Quantity(10),
                };
                if let Ok(b) = engine.create_booking(&caller, request).await {
                    let _ = engine.cancel_booking(&caller, b.id, None).await;
                }
            }
        }));
    }
    for h in handles {
        h.await.expect("task panicked");
    }

    let elapsed = start.elapsed();
    let total = n_tasks * rounds * 2;
    println!(
        "  {total} create/cancel ops in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    assert_eq!(engine.remaining_units(&product).await.expect("remaining"), 1_000);

    let t = Instant::now();
    let written = engine.compact_wal().await.expect("compact");
    println!("  compacted {written} bookings in {:.2}ms", t.elapsed().as_secs_f64() * 1000.0);
}

#[tokio::main]
async fn main() {
    println!("=== tripbook stress benchmark ===\n");

    println!("[phase 1] sequential write throughput");
    phase1_sequential().await;

    println!("\n[phase 2] contended creates on capacity-1 homestays");
    phase2_contention().await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load().await;

    println!("\n[phase 4] create/cancel churn and compaction");
    phase4_churn().await;

    println!("\n=== benchmark complete ===");
}
