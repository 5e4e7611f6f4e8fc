use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use process_monitoring::{
    actors::{forwarder::ForwarderHandle, scheduler::SchedulerHandle},
    config::read_config_file,
    detect::HttpDetectionClient,
    discovery::resolve_monitored_processes,
    sampler::ProcSampler,
};
use tracing::{debug, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("process_monitoring", LevelFilter::TRACE),
        ("vigil_agent", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    if let Some(name) = &config.project.name {
        debug!(
            "monitoring {name} ({})",
            config.project.environment.as_deref().unwrap_or("unknown")
        );
    }

    if !config.metrics.enabled {
        info!("metrics collection is disabled, idling until shutdown");
        tokio::signal::ctrl_c().await?;
        return Ok(());
    }

    let processes = resolve_monitored_processes(&config.process.ports);
    if processes.is_empty() {
        warn!("no monitored process could be resolved, the agent will idle");
    } else {
        info!("monitoring {} processes: {processes:?}", processes.len());
    }

    let forwarder = ForwarderHandle::spawn(&config.sink);

    let detector = Arc::new(HttpDetectionClient::new(
        &config.detection.url,
        Duration::from_secs(config.detection.timeout_secs),
    ));

    let scheduler = SchedulerHandle::spawn(
        processes,
        Duration::from_secs(config.metrics.interval),
        Arc::new(ProcSampler),
        detector,
        forwarder.clone(),
    );

    tokio::signal::ctrl_c().await?;

    debug!("shutting down");
    scheduler.shutdown().await?;
    forwarder.shutdown().await?;

    Ok(())
}
