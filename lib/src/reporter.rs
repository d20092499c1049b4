//! Periodic export of registered meters to a Graphite collector.

use crate::meter::{MeterRegistry, MeterSnapshot, TICK_INTERVAL};
use anyhow::{anyhow, Context};
use ractor::{async_trait, Actor, ActorProcessingErr, ActorRef};
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Upper bound on a single connect-and-write to the collector.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct GraphiteConfig {
    pub addr: SocketAddr,
    pub flush_interval: Duration,
    /// Prepended to every metric path, e.g. `metrics.ProduceRate.count`
    pub prefix: String,
}

/// Resolve a `host:port` collector address. Called once at startup so that an
/// unresolvable collector fails the process before any load is generated.
pub async fn resolve_sink(addr: &str) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("Failed to resolve metrics sink address {addr}"))?
        .next()
        .ok_or_else(|| anyhow!("Metrics sink address {addr} resolved to nothing"))
}

/// Render one meter in the Graphite plaintext protocol.
pub fn format_meter(prefix: &str, name: &str, snapshot: &MeterSnapshot, timestamp: u64) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{prefix}.{name}.count {} {timestamp}", snapshot.count);
    let _ = writeln!(out, "{prefix}.{name}.one-minute {:.2} {timestamp}", snapshot.rate1);
    let _ = writeln!(out, "{prefix}.{name}.five-minute {:.2} {timestamp}", snapshot.rate5);
    let _ = writeln!(out, "{prefix}.{name}.fifteen-minute {:.2} {timestamp}", snapshot.rate15);
    let _ = writeln!(out, "{prefix}.{name}.mean {:.2} {timestamp}", snapshot.rate_mean);
    out
}

/// Write every meter in `registry` to the collector at `addr` over a fresh connection.
pub async fn flush_once(
    addr: SocketAddr,
    prefix: &str,
    registry: &MeterRegistry,
) -> anyhow::Result<()> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let body: String = registry
        .snapshots()
        .iter()
        .map(|(name, snapshot)| format_meter(prefix, name, snapshot, timestamp))
        .collect();

    timeout(FLUSH_TIMEOUT, async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(body.as_bytes()).await?;
        stream.flush().await?;
        stream.shutdown().await
    })
    .await
    .map_err(|_| anyhow!("timed out writing to {addr}"))?
    .with_context(|| format!("Failed to write metrics to {addr}"))
}

pub enum ReporterMessage {
    /// Advance every meter's moving averages.
    Tick,
    /// Export the current snapshots.
    Flush,
}

pub struct ReporterArgs {
    pub config: GraphiteConfig,
    pub registry: Arc<MeterRegistry>,
}

pub struct ReporterState {
    config: GraphiteConfig,
    registry: Arc<MeterRegistry>,
    timers: Vec<JoinHandle<()>>,
    failed_flushes: u64,
}

pub struct MetricsReporter;

#[async_trait]
impl Actor for MetricsReporter {
    type Msg = ReporterMessage;
    type State = ReporterState;
    type Arguments = ReporterArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: ReporterArgs,
    ) -> Result<Self::State, ActorProcessingErr> {
        debug!("{myself:?} starting");
        Ok(ReporterState {
            config: args.config,
            registry: args.registry,
            timers: Vec::new(),
            failed_flushes: 0,
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        info!(
            "Reporting metrics to {} every {}",
            state.config.addr,
            humantime::format_duration(state.config.flush_interval)
        );

        state
            .timers
            .push(myself.send_interval(TICK_INTERVAL, || ReporterMessage::Tick));
        state.timers.push(
            myself.send_interval(state.config.flush_interval, || ReporterMessage::Flush),
        );
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for timer in state.timers.drain(..) {
            timer.abort();
        }
        debug!("Successfully stopped {myself:?}");
        Ok(())
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ReporterMessage::Tick => state.registry.tick_all(),
            ReporterMessage::Flush => {
                // the collector being down never stops the load
                match flush_once(state.config.addr, &state.config.prefix, &state.registry).await {
                    Ok(()) => {
                        if state.failed_flushes > 0 {
                            info!(
                                "Metrics sink reachable again after {} failed flushes",
                                state.failed_flushes
                            );
                            state.failed_flushes = 0;
                        }
                    }
                    Err(e) => {
                        state.failed_flushes += 1;
                        warn!("{e:#}");
                    }
                }
            }
        }
        Ok(())
    }
}
