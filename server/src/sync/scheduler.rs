//! Background role sync task.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::info;

use super::RoleSyncEngine;

/// Start the periodic role sync.
///
/// The first cycle runs immediately, then once per `period`. A slow cycle
/// delays the next one instead of bunching ticks. Cycles never fail; the
/// returned handle only ends when aborted.
pub fn spawn_role_sync_task(
    engine: Arc<RoleSyncEngine>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    info!(period_secs = period.as_secs(), "Automatic role synchronization enabled");

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            engine.reconcile_all_communities().await;
        }
    })
}
