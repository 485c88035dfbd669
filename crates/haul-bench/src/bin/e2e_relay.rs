//! End-to-end relay throughput benchmark for Haul.
//!
//! Attaches one debugger and N clients to a running server and measures how
//! many client messages reach the debugger with real network I/O.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8081/debugger-proxy";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let server_url = args.get(2).cloned().unwrap_or_else(|| SERVER_URL.to_string());

    println!("Haul relay benchmark against {server_url}");
    println!("The server must be running with no debugger attached.");
    println!();

    if let Err(e) = run_relay_benchmark(&server_url, num_clients).await {
        eprintln!("Benchmark failed: {}", e);
    }
}

async fn run_relay_benchmark(server_url: &str, num_clients: usize) -> Result<(), BoxError> {
    println!("{num_clients} clients -> 1 debugger, warmup {WARMUP_SECS}s, measuring {BENCH_SECS}s");

    let received = Arc::new(AtomicU64::new(0));

    let (debugger, _) = connect_async(format!("{server_url}?role=debugger")).await?;
    let (_debugger_tx, mut debugger_rx) = debugger.split();
    let debugger_count = Arc::clone(&received);
    let debugger_task = tokio::spawn(async move {
        while let Some(Ok(message)) = debugger_rx.next().await {
            if let Message::Text(text) = message {
                if text.contains("\"bench\"") {
                    debugger_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    let barrier = Arc::new(Barrier::new(num_clients + 1));
    let mut handles = Vec::new();

    // Spawn client tasks
    for client_id in 0..num_clients {
        let barrier = Arc::clone(&barrier);
        let url = format!("{server_url}?role=client");

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(&url, client_id, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        });
        handles.push(handle);
    }

    barrier.wait().await;
    println!("{num_clients} clients connected");

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    received.store(0, Ordering::SeqCst);
    let start = Instant::now();

    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_messages = received.load(Ordering::SeqCst);
    let msgs_per_sec = total_messages as f64 / elapsed.as_secs_f64();

    println!();
    println!("clients:     {num_clients}");
    println!("duration:    {:.2}s", elapsed.as_secs_f64());
    println!("relayed:     {total_messages}");
    println!("throughput:  {msgs_per_sec:.0} msg/s");

    for handle in handles {
        handle.abort();
    }
    debugger_task.abort();
    Ok(())
}

async fn run_client(url: &str, client_id: usize, barrier: Arc<Barrier>) -> Result<(), BoxError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // Keep reading so relay notices never back up.
    let drain = tokio::spawn(async move { while let Some(Ok(_)) = receiver.next().await {} });

    barrier.wait().await;

    let message = Message::Text(
        serde_json::json!({ "type": "bench", "payload": { "client": client_id } }).to_string(),
    );

    loop {
        if sender.send(message.clone()).await.is_err() {
            break;
        }
        // Small yield to not starve the reader tasks
        tokio::task::yield_now().await;
    }

    drain.abort();
    Ok(())
}
