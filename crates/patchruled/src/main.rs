//! patchruled — the PatchRule controller daemon.
//!
//! Runs the rule controller against an embedded store and serves health
//! probes and Prometheus metrics. The same binary loads rules and target documents into the store
//! and prints rule status.
//!
//! # Usage
//!
//! ```text
//! patchruled --config /etc/patchrule/patchruled.toml run
//! patchruled --data-dir /var/lib/patchrule apply rule.json
//! patchruled status prod/error-rate
//! ```

mod commands;
mod config;
mod logging;
mod metrics;
mod probes;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use patchrule_controller::{Clock, Controller, Reconciler, SystemClock};
use patchrule_state::StateStore;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::{DaemonConfig, Overrides};

#[derive(Parser)]
#[command(name = "patchruled", about = "Prometheus-driven patch rule controller")]
struct Cli {
    /// Path to patchruled.toml.
    #[arg(long, short, global = true, env = "PATCHRULE_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller, the probe server and the metrics server.
    Run,

    /// Store a rule or a target resource from a JSON file.
    Apply {
        file: PathBuf,

        /// Plural resource name, when it is not `<kind>s`.
        #[arg(long)]
        resource: Option<String>,
    },

    /// Print the conditions of a rule.
    Status {
        /// Rule key as `<namespace>/<name>`.
        rule: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = DaemonConfig::load(cli.config.as_deref(), &cli.overrides)?;
    logging::init(config.log_format)?;

    match cli.command {
        Command::Run => run(config).await,
        Command::Apply { file, resource } => {
            let store = open_store(&config)?;
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let doc = serde_json::from_str(&content)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;
            println!("{}", commands::apply_document(&store, doc, resource.as_deref())?);
            Ok(())
        }
        Command::Status { rule } => {
            let store = open_store(&config)?;
            let (namespace, name) = commands::parse_key(&rule)?;
            let rule = store
                .get_rule(namespace, name)?
                .with_context(|| format!("rule {namespace}/{name} not found"))?;
            print!("{}", commands::render_status(&rule, SystemClock.now()));
            Ok(())
        }
    }
}

fn open_store(config: &DaemonConfig) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create {}", config.data_dir.display()))?;
    let path = config.store_path();
    let store = StateStore::open(&path)?;
    info!(path = ?path, "state store opened");
    Ok(store)
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    info!(
        field_manager = %config.field_manager,
        probe_addr = %config.probe_addr,
        metrics_addr = %config.metrics_addr,
        "patchruled starting"
    );

    let store = open_store(&config)?;
    let reconciler = Reconciler::new(
        config.query_engine()?,
        store,
        Arc::new(SystemClock),
        config.reconciler(),
    );
    let reconcile_metrics = reconciler.metrics();
    let controller = Controller::new(reconciler, config.controller());

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controller_handle = tokio::spawn(controller.run(shutdown_rx.clone()));

    // ── Probe and metrics servers ──────────────────────────────

    let probe_state = probes::ProbeState::default();
    let probe_listener = tokio::net::TcpListener::bind(config.probe_addr)
        .await
        .with_context(|| format!("failed to bind probe server on {}", config.probe_addr))?;
    let metrics_listener = tokio::net::TcpListener::bind(config.metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics server on {}", config.metrics_addr))?;
    probe_state.set_ready(true);
    info!(addr = %config.probe_addr, "probe server listening");
    info!(addr = %config.metrics_addr, "metrics server listening");

    let probe_server = axum::serve(probe_listener, probes::router(probe_state.clone()))
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
    let metrics_server = axum::serve(metrics_listener, metrics::router(reconcile_metrics))
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx));

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        probe_state.set_ready(false);
        let _ = shutdown_tx.send(true);
    });

    let (probes, metrics) = tokio::join!(probe_server, metrics_server);
    probes.context("probe server failed")?;
    metrics.context("metrics server failed")?;

    if let Err(e) = controller_handle.await {
        error!(error = %e, "controller task failed");
    }

    info!("patchruled stopped");
    Ok(())
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}
