mod alert;
mod config;
mod lifecycle;
mod notify;
mod probe;
mod render;
mod sampler;
mod store;

use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use dotenvy::Error as DotenvError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::lifecycle::ExitGuard;
use crate::notify::SmtpNotifier;
use crate::probe::PingProber;
use crate::render::PlottersRenderer;
use crate::sampler::Sampler;
use crate::store::{Store, DEFAULT_ARCHIVES};

#[derive(Debug, Parser)]
#[command(author, version, about = "rttmon — latency monitoring agent")]
struct Cli {
    /// Path to YAML configuration file. Defaults to env RTTMON_CONFIG or built-in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;

    let store = Store::open_or_create(&config.store.path, config.store.step, &DEFAULT_ARCHIVES)
        .await
        .context("failed to open latency store")?;

    let prober = PingProber::new(&config);
    let renderer = PlottersRenderer::new(&config.graph);
    let notifier = SmtpNotifier::new(&config.email).context("invalid email settings")?;
    let guard = ExitGuard::new();

    info!(host = %config.host, store = ?config.store.path, "rttmon starting");

    let sampler = Sampler::new(&config, store, &prober, &renderer, &notifier);

    // The loop never returns on its own; a completed run() arm means an
    // error escaped the tick contract.
    let loop_result = tokio::select! {
        _ = lifecycle::shutdown_signal() => None,
        res = sampler.run() => Some(res),
    };

    // Exit notification happens here, in normal control flow, exactly once.
    guard.notify_once(&notifier);

    match loop_result {
        None => {
            info!("shutting down after signal");
            Ok(())
        }
        Some(Ok(())) => {
            error!("sampling loop stopped without a shutdown signal");
            anyhow::bail!("sampling loop stopped unexpectedly");
        }
        Some(Err(err)) => {
            error!(error = ?err, "sampling loop failed");
            Err(err)
        }
    }
}

fn load_env() {
    if let Err(err) = dotenvy::dotenv() {
        match err {
            DotenvError::Io(io_err) if io_err.kind() == ErrorKind::NotFound => {}
            other => eprintln!("warning: failed to load .env file: {other}"),
        }
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rttmon=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
