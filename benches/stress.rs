use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

use rentald::service::{format_ms, parse_date};

const DAY: i64 = 86_400_000; // 1 day in ms

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("rentald")
        .user("rentald")
        .password(std::env::var("RENTALD_PASSWORD").unwrap_or_else(|_| "rentald".into()));

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

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

fn insert_sql(vehicle_id: u32, start: i64, end: i64) -> String {
    format!(
        "INSERT INTO bookings (first_name, last_name, vehicle_id, start_date, end_date) \
         VALUES ('Bench', 'Runner', {vehicle_id}, '{}', '{}')",
        format_ms(start),
        format_ms(end)
    )
}

fn is_conflict(e: &tokio_postgres::Error) -> bool {
    e.code().map(|c| c.code()) == Some("23P01")
}

/// Bookings persist across runs, so every run works in its own far-future window.
fn run_base() -> i64 {
    let epoch = parse_date("2100-01-01").expect("valid base date");
    let slot = (Ulid::new().random() % 100) as i64;
    epoch + slot * 400_000 * DAY
}

async fn phase1_sequential(host: &str, port: u16, base: i64) {
    let client = connect(host, port).await;
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let s = base + i as i64 * DAY;
        let t = Instant::now();
        client.batch_execute(&insert_sql(1, s, s + DAY)).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Every task races for the same slots on one vehicle: each slot must be won once.
async fn phase2_contention(host: &str, port: u16, base: i64) {
    let n_tasks = 20;
    let n_slots = 100;
    let wins = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let wins = wins.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for j in 0..n_slots {
                let s = base + j as i64 * DAY;
                match client.batch_execute(&insert_sql(2, s, s + DAY)).await {
                    Ok(()) => wins.fetch_add(1, Ordering::Relaxed),
                    Err(e) if is_conflict(&e) => conflicts.fetch_add(1, Ordering::Relaxed),
                    Err(e) => panic!("unexpected error: {e}"),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_slots;
    let won = wins.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {n_slots} slots = {total} attempts in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    println!(
        "  won={won}, conflicts={}, double-booked={}",
        conflicts.load(Ordering::Relaxed),
        won.saturating_sub(n_slots)
    );
    assert_eq!(won, n_slots, "every slot must be won exactly once");
}

async fn phase3_read_under_load(host: &str, port: u16, base: i64) {
    let setup_client = connect(host, port).await;
    for i in 0..200 {
        let s = base + i * 2 * DAY;
        setup_client.batch_execute(&insert_sql(3, s, s + DAY)).await.unwrap();
    }
    drop(setup_client);

    // Writers book other vehicles so readers see steady WAL traffic.
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5u32 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let vehicle_id = 4 + w;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let s = base + i * DAY;
                let _ = client.batch_execute(&insert_sql(vehicle_id, s, s + DAY)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let query = format!(
        "SELECT * FROM availability WHERE vehicle_id = 3 AND start_date >= '{}' AND end_date <= '{}'",
        format_ms(base + 100 * DAY),
        format_ms(base + 110 * DAY)
    );
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        let query = query.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client.simple_query(&query).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16, base: i64) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for c in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            // 14 seeded vehicles; spread connections across them.
            let vehicle_id = (c % 14) as u32 + 1;
            let offset = base + (c as i64 / 14) * ops_per_conn as i64 * DAY;
            for i in 0..ops_per_conn {
                let s = offset + i as i64 * DAY;
                client.batch_execute(&insert_sql(vehicle_id, s, s + DAY)).await.unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("RENTALD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("RENTALD_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid RENTALD_PORT");

    println!("=== rentald stress benchmark ===");
    println!("target: {host}:{port}\n");

    let base = run_base();
    // Phases use disjoint date windows so they never conflict with each other.
    let window = 100_000 * DAY;

    println!("[phase 1] sequential write throughput");
    phase1_sequential(&host, port, base).await;

    println!("\n[phase 2] same-vehicle contention");
    phase2_contention(&host, port, base + window).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port, base + 2 * window).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port, base + 3 * window).await;

    println!("\n=== benchmark complete ===");
}
