//! vouchd - the Vouch forensic reverse proxy daemon.
//!
//! Startup order: policy (fatal on error), repository, signer, metrics,
//! worker (which creates the genesis run when the store is empty), then the
//! two HTTP listeners: the proxy itself and the admin surface. On SIGINT or
//! SIGTERM the listeners stop, the worker drains the remaining ring
//! contents, and the repository closes.

use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use vouch_core::crypto::LedgerSigner;
use vouch_core::policy::PolicyEngine;
use vouch_core::repo::{EventRepository, SqliteEventRepository};
use vouch_daemon::admin;
use vouch_daemon::engine::Engine;
use vouch_daemon::metrics::DaemonMetrics;
use vouch_daemon::pool::{EventPool, DEFAULT_POOL_CAPACITY};
use vouch_daemon::proxy::ProxyState;
use vouch_daemon::worker::LedgerWorker;

/// vouchd - tamper-evident forensic ledger proxy for agent traffic
#[derive(Parser, Debug)]
#[command(name = "vouchd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Address the intercepting proxy listens on
    #[arg(long, default_value = "0.0.0.0:9999")]
    listen: String,

    /// Upstream tool/API backend the proxy forwards to
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    upstream: String,

    /// Address the admin surface (rekey/stats/metrics) listens on
    #[arg(long, default_value = "127.0.0.1:9998")]
    admin_listen: String,

    /// Path to the policy document
    #[arg(long, default_value = "vouch-policy.yaml")]
    policy: PathBuf,

    /// Path to the event database
    #[arg(long, default_value = "vouch.db")]
    db: PathBuf,

    /// Path to the Ed25519 key file
    #[arg(long, default_value = ".vouch_key")]
    key: PathBuf,

    /// Ring buffer capacity between the proxy and the ledger worker
    #[arg(long, default_value = "1000")]
    buffer_capacity: usize,

    /// Agent name recorded on new runs
    #[arg(long, default_value = "vouch-agent")]
    agent_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args)?;

    // Policy problems are fatal at startup: running unclassified would
    // silently downgrade every event to the default risk.
    let policy = PolicyEngine::from_file(&args.policy)
        .with_context(|| format!("loading policy from {:?}", args.policy))?;
    info!(
        version = %policy.version(),
        rules = policy.rule_count(),
        "policy loaded"
    );

    let repo: Arc<dyn EventRepository> = Arc::new(
        SqliteEventRepository::open(&args.db)
            .with_context(|| format!("opening event database {:?}", args.db))?,
    );
    let signer = Arc::new(
        LedgerSigner::load_or_generate(&args.key)
            .with_context(|| format!("initializing signer key {:?}", args.key))?,
    );

    let metrics = Arc::new(DaemonMetrics::new().context("initializing metrics")?);
    let pool = Arc::new(EventPool::new(DEFAULT_POOL_CAPACITY, Arc::clone(&metrics)));

    let worker = Arc::new(
        LedgerWorker::new(
            Arc::clone(&repo),
            Arc::clone(&signer),
            Arc::clone(&pool),
            Arc::clone(&metrics),
            args.buffer_capacity,
            args.agent_name.clone(),
        )
        .context("creating ledger worker")?,
    );
    let worker_handle = worker.start().context("starting ledger worker")?;

    let engine = Arc::new(Engine::new(Arc::clone(&worker), policy, pool, metrics));

    let proxy_router = ProxyState::router(Arc::new(ProxyState::new(
        Arc::clone(&engine),
        args.upstream.clone(),
    )));
    let admin_router = admin::router(Arc::clone(&engine));

    let proxy_listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("binding proxy listener on {}", args.listen))?;
    let admin_listener = tokio::net::TcpListener::bind(&args.admin_listen)
        .await
        .with_context(|| format!("binding admin listener on {}", args.admin_listen))?;

    info!(listen = %args.listen, upstream = %args.upstream, "proxy ready");
    info!(admin = %args.admin_listen, "admin surface ready");
    info!(buffer = args.buffer_capacity, "event pipeline active");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let proxy_server = axum::serve(proxy_listener, proxy_router).into_future();
    let admin_server = axum::serve(admin_listener, admin_router).into_future();

    tokio::select! {
        result = proxy_server => {
            result.context("proxy server failed")?;
        },
        result = admin_server => {
            result.context("admin server failed")?;
        },
        () = &mut shutdown => {
            info!("shutdown signal received");
        },
    }

    // Stop accepting; the worker drains whatever the ring still holds and
    // closes the repository behind it.
    worker.close();
    worker_handle.await.context("joining ledger worker")?;
    let (processed, dropped) = worker.stats();
    info!(processed, dropped, "ledger worker drained, exiting");

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(sig) => sig,
        Err(e) => {
            warn!(error = %e, "failed to install SIGINT handler");
            return std::future::pending::<()>().await;
        },
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            return std::future::pending::<()>().await;
        },
    };

    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
}
