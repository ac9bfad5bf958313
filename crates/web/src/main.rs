//! Shotcheck report server
//!
//! Receives screenshot notifications over the channel socket, compares each
//! reference/test pair and serves the rolling report.

use clap::Parser;
use shotcheck_compare::ImageComparator;
use shotcheck_engine::{ChannelTransport, ReportSnapshot, Session, Verdict};
use shotcheck_web::{ReportServer, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "shotcheck")]
#[command(about = "Shotcheck - visual regression report server")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "shotcheck.toml")]
    config: PathBuf,

    /// HTTP listen address, overrides the configuration
    #[arg(short, long, env = "SHOTCHECK_LISTEN")]
    listen: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    info!("Shotcheck v{}", shotcheck_engine::VERSION);

    let mut config = ServerConfig::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    let addr = config.listen_addr()?;

    let comparator = Arc::new(ImageComparator::new(config.compare.clone()));
    let (session, handle) = Session::new(config.engine.clone(), comparator)?;
    let (publisher, transport) = ChannelTransport::new(&config.topic, config.transport_capacity);
    info!("Session {} on topic '{}'", handle.session_id(), config.topic);

    let server = ReportServer::new(handle.clone(), publisher, config.engine.images.clone());
    let mut session_task = tokio::spawn(session.run(transport));
    let server_task = tokio::spawn(server.serve(addr));

    let session_done = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Report server error: {}", e),
                Err(e) => error!("Report server task failed: {}", e),
                Ok(Ok(())) => {}
            }
            false
        }
        result = &mut session_task => {
            match result {
                Ok(report) => log_report(&report),
                Err(e) => error!("Session task failed: {}", e),
            }
            true
        }
    };

    if !session_done {
        if let Err(e) = handle.shutdown().await {
            warn!("Session already stopped: {}", e);
        }
        match session_task.await {
            Ok(report) => log_report(&report),
            Err(e) => error!("Session task failed: {}", e),
        }
    }

    info!("Shotcheck shutdown complete");
    Ok(())
}

fn log_report(report: &ReportSnapshot) {
    info!(
        "Final report: {} passed, {} failed, {} errored",
        report.count(Verdict::Passed),
        report.count(Verdict::Failed),
        report.count(Verdict::Errored)
    );
}
