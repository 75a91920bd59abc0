//! `julea-bench` — a smoke-test/benchmark client exercising the KV,
//! distributed-object and DB facades end-to-end against a live `Client`.
//!
//! Grounded on `original_source/benchmarks/small-access.c`'s shape: build one
//! store/collection/item-equivalent up front, then run fixed-size rounds of
//! writes, reads and updates, printing a throughput line after each round.
//! `original_source/benchmarks/reader-writer.c` adds the second role this
//! binary plays — a `--mode read`/`--mode write` split between producer and
//! consumer threads hitting the same object concurrently — folded in here as
//! `--readers`/`--writers` thread counts sharing one namespace/key instead of
//! two separate processes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use julea_client::{Client, Consistency, Semantics, Template};
use julea_client::db::{query, DbEntry, DbSchema};
use julea_client::kv::Kv;
use julea_client::object::DistributedObject;
use julea_core::Configuration;

#[derive(Parser, Debug)]
#[command(name = "julea-bench")]
#[command(about = "JULEA KV/object/DB smoke-test and throughput benchmark")]
struct Args {
    /// Configuration file path, overriding the `$JULEA_CONFIG` search order.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Operations per round, per thread (spec.md §4.6 doesn't bound this;
    /// `small-access.c` uses 1000).
    #[arg(short = 'n', long, default_value_t = 1000)]
    round_size: u64,

    /// Number of rounds to run before exiting. `0` runs until Ctrl-C.
    #[arg(short, long, default_value_t = 10)]
    rounds: u64,

    /// Payload size in bytes for each write.
    #[arg(long, default_value_t = 4096)]
    value_size: usize,

    /// Concurrent reader threads hitting the shared object
    /// (`reader-writer.c`'s read side).
    #[arg(long, default_value_t = 2)]
    readers: usize,

    /// Concurrent writer threads hitting the shared object
    /// (`reader-writer.c`'s write side).
    #[arg(long, default_value_t = 2)]
    writers: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Configuration::load_from_path(path)?,
        None => Configuration::load()?,
    };
    let client = Client::new(config)?;

    let mut round = 0u64;
    loop {
        round += 1;
        tracing::info!(round, "starting round");
        run_kv_round(&client, args.round_size, args.value_size)?;
        run_db_round(&client, args.round_size)?;
        run_object_benchmark(&client, &args)?;

        if args.rounds != 0 && round >= args.rounds {
            break;
        }
    }

    Ok(())
}

/// One round of individually-executed KV puts followed by gets, timed the
/// way `small-access.c` times its write/read loops.
fn run_kv_round(client: &Arc<Client>, round_size: u64, value_size: usize) -> Result<()> {
    let value = vec![0xABu8; value_size];
    let started = Instant::now();

    for i in 0..round_size {
        let kv = Kv::new("bench", format!("key-{i}"));
        let mut batch = julea_client::Batch::new(client.clone(), Template::Default);
        kv.put(&mut batch, value.clone());
        batch.execute()?;
    }

    let elapsed = started.elapsed();
    tracing::info!(count = round_size, ?elapsed, "kv put round complete");

    let started = Instant::now();
    let mut hits = 0u64;
    for i in 0..round_size {
        let kv = Kv::new("bench", format!("key-{i}"));
        let mut batch = julea_client::Batch::new(client.clone(), Template::Default);
        let slot = kv.get(&mut batch);
        batch.execute()?;
        if slot.get().flatten().is_some() {
            hits += 1;
        }
    }
    tracing::info!(count = round_size, hits, elapsed = ?started.elapsed(), "kv get round complete");
    Ok(())
}

/// Creates a schema once, then inserts and queries rows against it — the
/// structured-record equivalent of `small-access.c`'s item-update loop.
fn run_db_round(client: &Arc<Client>, round_size: u64) -> Result<()> {
    let schema = DbSchema::new("bench-records");
    let mut setup = julea_client::Batch::new(client.clone(), Template::Default);
    schema.create(&mut setup, serde_json::json!({"id": "integer", "value": "string"}).as_object().unwrap().clone());
    setup.execute()?;

    let entry = DbEntry::new("bench-records");
    let started = Instant::now();
    for i in 0..round_size {
        let mut batch = julea_client::Batch::new(client.clone(), Template::Default);
        let row = serde_json::json!({"id": i, "value": format!("row-{i}")}).as_object().unwrap().clone();
        entry.insert(&mut batch, row);
        batch.execute()?;
    }
    tracing::info!(count = round_size, elapsed = ?started.elapsed(), "db insert round complete");

    let mut batch = julea_client::Batch::new(client.clone(), Template::Default);
    let rows = query(&mut batch, "bench-records", None);
    batch.execute()?;
    tracing::info!(rows = rows.get().map(|r| r.len()).unwrap_or(0), "db query complete");
    Ok(())
}

/// Spawns `args.writers` threads striping writes across a single distributed
/// object and `args.readers` threads reading the same ranges back, the split
/// `reader-writer.c` runs as two cooperating processes over a shared store.
fn run_object_benchmark(client: &Arc<Client>, args: &Args) -> Result<()> {
    let namespace = "bench";
    let path = "shared-object";

    {
        let object = DistributedObject::new(namespace, path);
        let semantics = Semantics::new(Template::Default);
        semantics.set_consistency(Consistency::Immediate);
        let mut batch = julea_client::Batch::with_semantics(client.clone(), Arc::new(semantics));
        object.create(&mut batch);
        batch.execute()?;
    }

    let bytes_written = Arc::new(AtomicU64::new(0));
    let bytes_read = Arc::new(AtomicU64::new(0));

    std::thread::scope(|scope| {
        for w in 0..args.writers {
            let client = client.clone();
            let bytes_written = bytes_written.clone();
            let value_size = args.value_size;
            scope.spawn(move || {
                let object = DistributedObject::new(namespace, path);
                let data = vec![w as u8; value_size];
                let mut batch = julea_client::Batch::new(client, Template::Default);
                let write = object.write(&mut batch, &data, (w * value_size) as u64);
                if batch.execute().is_ok() {
                    if let Some(n) = write.get() {
                        bytes_written.fetch_add(n, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    std::thread::scope(|scope| {
        for _ in 0..args.readers {
            let client = client.clone();
            let bytes_read = bytes_read.clone();
            let value_size = args.value_size;
            let total = (args.writers.max(1) * value_size) as u64;
            scope.spawn(move || {
                let object = DistributedObject::new(namespace, path);
                let mut batch = julea_client::Batch::new(client, Template::Default);
                let read = object.read(&mut batch, total, 0);
                if batch.execute().is_ok() {
                    if let Some((_, n)) = read.get() {
                        bytes_read.fetch_add(n, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    tracing::info!(
        written = bytes_written.load(Ordering::Relaxed),
        read = bytes_read.load(Ordering::Relaxed),
        writers = args.writers,
        readers = args.readers,
        "object benchmark complete"
    );

    Ok(())
}
