//! Periodic ingestion.
//!
//! First cycle after `initial_delay`, then one every `interval`. Cycles that
//! overrun are not queued up; the next tick is delayed instead.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::ingestion::Ingestor;

/// Run the ingestion loop until `shutdown` flips to `true` or its sender drops.
pub async fn run(
    ingestor: Arc<Ingestor>,
    initial_delay: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(
        initial_delay_secs = initial_delay.as_secs(),
        interval_secs = interval.as_secs(),
        "Feed poller started"
    );

    let start = tokio::time::Instant::now() + initial_delay;
    let mut ticker = tokio::time::interval_at(start, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Feed poller stopping");
                    break;
                }
            }
            _ = ticker.tick() => {
                match ingestor.run_cycle().await {
                    Ok(report) => {
                        if report.created > 0 {
                            tracing::info!(created = report.created, "Feed poll: new leads ingested");
                        } else {
                            tracing::debug!("Feed poll: no new leads");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Feed poll failed");
                    }
                }
            }
        }
    }
}
