use anyhow::Context;
use clap::Parser;
use drizzle::reporter::{resolve_sink, GraphiteConfig, MetricsReporter, ReporterArgs};
use drizzle::{default_registry, ProducerSettings, METRICS_REPORTER_NAME};
use drizzle_producer::aggregator::ConsoleProgress;
use drizzle_producer::{shutdown, start_load, Arguments};
use drizzle_producer::supervisor::LoadSupervisorMessage;
use ractor::rpc::CallResult;
use ractor::Actor;
use std::time::Duration;
use tracing::{info, warn};

const STATS_TIMEOUT: Duration = Duration::from_secs(1);

// ============================== Main ============================== //

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Arguments::parse();

    drizzle::init_logging();
    println!("Starting Producer");

    let mut settings = ProducerSettings::resolve(&args.config)?;
    args.apply_overrides(&mut settings)?;

    info!(
        "Using configuration:\n{}",
        serde_json::to_string_pretty(&settings)?
    );

    let registry = default_registry();

    let sink = resolve_sink(&settings.graphite_connect).await?;
    Actor::spawn(
        Some(METRICS_REPORTER_NAME.to_string()),
        MetricsReporter,
        ReporterArgs {
            config: GraphiteConfig {
                addr: sink,
                flush_interval: settings.flush_interval,
                prefix: settings.metrics_prefix.clone(),
            },
            registry: registry.clone(),
        },
    )
    .await
    .context("Failed to start the metrics reporter")?;

    // the supervisor's tasks are detached, nothing is joined on the way out
    let (supervisor, _) = start_load(
        &settings,
        args.backend,
        args.fail_every,
        &registry,
        Box::new(ConsoleProgress),
    )
    .await?;

    shutdown::wait_for_interrupt().await?;

    match supervisor
        .call(LoadSupervisorMessage::Stats, Some(STATS_TIMEOUT))
        .await
    {
        Ok(CallResult::Success(stats)) => info!("Final stats: {}", serde_json::to_string(&stats)?),
        Ok(_) => warn!("Load supervisor did not report final stats in time"),
        Err(e) => warn!("Failed to collect final stats: {e}"),
    }
    Ok(())
}
