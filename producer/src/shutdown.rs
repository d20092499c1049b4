//! Keeps the main task parked until the operator interrupts the process.
//!
//! Nothing is drained on the way out: in-flight submissions and unread delivery
//! reports are abandoned when the process exits.

use anyhow::Context;
use std::future::Future;
use tracing::info;

/// Block until `signal` resolves.
pub async fn until_interrupted<F>(signal: F) -> anyhow::Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    signal
        .await
        .context("Failed to listen for the interrupt signal")?;
    info!("Interrupt received, shutting down");
    Ok(())
}

/// Block until Ctrl-C.
pub async fn wait_for_interrupt() -> anyhow::Result<()> {
    until_interrupted(tokio::signal::ctrl_c()).await
}
