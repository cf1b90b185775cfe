//! cluster_bench: drives a Put/Get workload through a cluster client.
//!
//! The cluster runs over in-memory nodes that share one store, so the
//! numbers measure the engine itself: key encoding, node selection, retries
//! and health bookkeeping. `--failing N` makes the first N nodes fail every
//! call, which exercises the retry path and the selection policy.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use merklekv_cluster::{
    ClusterClient, ClusterConfig, MemoryNode, MemoryStore, MemoryTransport, OpenErrorMode,
    TransportError,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Benchmark the MerkleKV cluster client over in-memory nodes.
#[derive(Parser, Debug)]
#[command(name = "cluster_bench", version, about)]
struct Args {
    /// Cluster configuration file (TOML). Without it, `--nodes` local nodes are used.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of nodes when no configuration file is given.
    #[arg(short, long, default_value_t = 3)]
    nodes: u16,

    /// Total operations to run.
    #[arg(long, default_value_t = 100_000)]
    ops: usize,

    /// Distinct keys touched by the workload.
    #[arg(long, default_value_t = 10_000)]
    keyspace: u64,

    /// Size of every written value in bytes.
    #[arg(long, default_value_t = 16)]
    value_size: usize,

    /// Percentage of operations that are reads.
    #[arg(long, default_value_t = 50)]
    get_percent: u8,

    /// Make the first N nodes fail every call.
    #[arg(long, default_value_t = 0)]
    failing: usize,

    /// Concurrent async tasks; 0 runs the blocking API on the main thread.
    #[arg(long, default_value_t = 0)]
    concurrency: usize,
}

#[derive(Debug, Default)]
struct Tally {
    latencies_us: Vec<f64>,
    errors: usize,
    misses: usize,
}

impl Tally {
    fn record(&mut self, started: Instant, outcome: merklekv_cluster::Result<()>) {
        self.latencies_us.push(started.elapsed().as_secs_f64() * 1_000_000.0);
        match outcome {
            Ok(()) => {}
            Err(err) if err.is_not_found() => self.misses += 1,
            Err(_) => self.errors += 1,
        }
    }

    fn merge(&mut self, other: Tally) {
        self.latencies_us.extend(other.latencies_us);
        self.errors += other.errors;
        self.misses += other.misses;
    }

    fn percentile(sorted: &[f64], pct: usize) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        sorted[(sorted.len() * pct / 100).min(sorted.len() - 1)]
    }
}

type Cluster = ClusterClient<u64, MemoryTransport>;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ClusterConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ClusterConfig {
            nodes: (0..args.nodes)
                .map(|i| format!("127.0.0.1:{}", 7379 + i))
                .collect(),
            retry_count: Some(-1),
            ..ClusterConfig::default()
        },
    };

    let store = MemoryStore::new();
    let mut memory_nodes = Vec::new();
    let cluster = config.builder::<u64>()?.build(|address| {
        let node = MemoryNode::with_store(store.clone());
        if memory_nodes.len() < args.failing {
            node.fail_with(Some(TransportError::Internal("injected failure".into())));
        }
        memory_nodes.push((address.to_string(), node.clone()));
        MemoryTransport::new(node)
    })?;
    let cluster = Arc::new(cluster);
    cluster.open(config.timeout(), OpenErrorMode::SkipErrors)?;

    println!("MerkleKV Cluster Client Benchmark");
    println!("=================================");
    println!("Nodes: {} ({} failing)", memory_nodes.len(), args.failing.min(memory_nodes.len()));
    println!("Policy: {}", config.policy.kind);
    println!("Retry budget: {}", cluster.retry_budget());
    println!("Workload: {} ops, {}% reads", args.ops, args.get_percent);
    println!("Mode: {}", mode_name(args.concurrency));
    println!();

    let value = vec![b'x'; args.value_size];
    let started = Instant::now();
    let mut tally = if args.concurrency == 0 {
        run_sync(&cluster, &args, &value)
    } else {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(run_async(cluster.clone(), &args, Arc::new(value)))?
    };
    let elapsed = started.elapsed();

    tally.latencies_us.sort_by(|a, b| a.total_cmp(b));
    let completed = tally.latencies_us.len();
    let throughput = completed as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    let p50 = Tally::percentile(&tally.latencies_us, 50);
    let p95 = Tally::percentile(&tally.latencies_us, 95);
    let p99 = Tally::percentile(&tally.latencies_us, 99);

    println!("Results:");
    println!("========");
    println!("  Throughput: {:.1} ops/sec", throughput);
    println!("  P50: {:.2} us", p50);
    println!("  P95: {:.2} us", p95);
    println!("  P99: {:.2} us", p99);
    println!("  Errors: {}/{}", tally.errors, completed);
    println!("  Misses: {}", tally.misses);
    println!();

    let requests: HashMap<String, u64> = memory_nodes
        .iter()
        .map(|(address, node)| (address.clone(), node.request_count()))
        .collect();
    let report = json!({
        "mode": mode_name(args.concurrency),
        "ops": completed,
        "elapsed_ms": elapsed.as_millis() as u64,
        "throughput_ops_sec": throughput,
        "p50_us": p50,
        "p95_us": p95,
        "p99_us": p99,
        "errors": tally.errors,
        "misses": tally.misses,
        "node_requests": requests,
        "nodes": cluster.status(),
    });
    println!("JSON Results:");
    println!("{}", serde_json::to_string_pretty(&report)?);

    cluster.close()?;
    info!("Benchmark finished in {:?}", elapsed);
    Ok(())
}

fn mode_name(concurrency: usize) -> String {
    match concurrency {
        0 => "sync".to_string(),
        n => format!("async x{}", n),
    }
}

fn is_read(i: usize, get_percent: u8) -> bool {
    i % 100 < get_percent as usize
}

fn run_sync(cluster: &Cluster, args: &Args, value: &[u8]) -> Tally {
    let token = CancellationToken::new();
    let mut tally = Tally::default();
    for i in 0..args.ops {
        let key = i as u64 % args.keyspace.max(1);
        let started = Instant::now();
        let outcome = if is_read(i, args.get_percent) {
            cluster.get(&key, false, &token).map(|_| ())
        } else {
            cluster.put(&key, value, &token)
        };
        tally.record(started, outcome);
    }
    tally
}

async fn run_async(cluster: Arc<Cluster>, args: &Args, value: Arc<Vec<u8>>) -> Result<Tally> {
    let token = CancellationToken::new();
    let per_task = args.ops / args.concurrency;
    let mut handles = Vec::with_capacity(args.concurrency);
    for task in 0..args.concurrency {
        let cluster = cluster.clone();
        let value = value.clone();
        let token = token.clone();
        let keyspace = args.keyspace.max(1);
        let get_percent = args.get_percent;
        handles.push(tokio::spawn(async move {
            let mut tally = Tally::default();
            for n in 0..per_task {
                let i = task * per_task + n;
                let key = i as u64 % keyspace;
                let started = Instant::now();
                let outcome = if is_read(i, get_percent) {
                    cluster.get_async(&key, false, &token).await.map(|_| ())
                } else {
                    cluster.put_async(&key, &value, &token).await
                };
                tally.record(started, outcome);
            }
            tally
        }));
    }

    let deadline = Duration::from_secs(600);
    let mut total = Tally::default();
    for handle in handles {
        let tally = tokio::time::timeout(deadline, handle)
            .await
            .context("benchmark task did not finish")?
            .context("benchmark task panicked")?;
        total.merge(tally);
    }
    Ok(total)
}
