//! `julead` — the storage daemon: loads whichever object/KV/DB backends
//! this host is configured to serve (spec.md §4.2's `component = server`
//! sections) and runs the connection-accepting dispatch loop
//! (`julea_net::serve`) until killed.
//!
//! Grounded on `bins/rde-cli/src/main.rs`'s `tokio::main` + `clap` +
//! `tracing_subscriber::registry().with(EnvFilter).with(fmt::layer())`
//! startup shape; statistics are exported as Prometheus counters the same
//! way SPEC_FULL.md's ambient stack wires up the `metrics` crate the
//! teacher declares but never uses.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use julea_backend::{load_db, load_kv, load_object};
use julea_core::{BackendError, BackendKind, Component, Configuration, Statistics};
use julea_net::{serve, Backends};
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "julead")]
#[command(about = "JULEA storage daemon")]
struct Args {
    /// Configuration file path, overriding the `$JULEA_CONFIG` search order
    /// (spec.md §6).
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Port this daemon listens on; substituted into each backend's
    /// `{PORT}` path template.
    #[arg(short, long, default_value_t = 4711)]
    port: u16,

    /// Prometheus exporter bind address for the statistics counters.
    #[arg(long, default_value = "127.0.0.1:9090")]
    metrics_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Configuration::load_from_path(path)?,
        None => Configuration::load()?,
    };

    metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(args.metrics_addr).install()?;

    let backends = Arc::new(load_backends(&config, args.port)?);
    let statistics = Arc::new(Statistics::new());

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, max_operation_size = config.max_operation_size, "julead listening");

    serve(listener, backends, config.max_operation_size, statistics).await?;
    Ok(())
}

/// Loads every backend kind whose configuration section declares the
/// `SERVER` component, leaving the rest `None` (spec.md §4.2).
fn load_backends(config: &Configuration, port: u16) -> Result<Backends> {
    let object = load_component(config, BackendKind::Object, port, |name, path| load_object(name, path, Component::SERVER).map(|d| d.backend))?;
    let kv = load_component(config, BackendKind::Kv, port, |name, _| load_kv(name, Component::SERVER).map(|d| d.backend))?;
    let db = load_component(config, BackendKind::Db, port, |name, _| load_db(name, Component::SERVER).map(|d| d.backend))?;

    if object.is_none() && kv.is_none() && db.is_none() {
        tracing::warn!("no backend section declares component = server; this daemon will reply to nothing but ping");
    }

    Ok(Backends { object, kv, db })
}

fn load_component<B: ?Sized>(
    config: &Configuration,
    kind: BackendKind,
    port: u16,
    load: impl FnOnce(&str, &str) -> Result<Arc<B>, BackendError>,
) -> Result<Option<Arc<B>>> {
    let section = config.backend_section(kind);
    if section.backend.is_empty() || !section.component.contains(Component::SERVER) {
        return Ok(None);
    }

    let path = section.resolved_path(port);
    tracing::info!(kind = kind.as_str(), backend = %section.backend, %path, "loading backend");
    Ok(Some(load(&section.backend, &path)?))
}
