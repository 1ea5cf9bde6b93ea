//! Role Synchronization
//!
//! Keeps the local role mirror and member role lists consistent with the
//! platform. Runs as a periodic background sweep plus on-demand triggers
//! (platform events, dashboard "sync now", permission checks that need fresh
//! truth). There is no retry queue: the next pass is the retry.

mod engine;
mod events;
mod scheduler;

use thiserror::Error;

pub use engine::{CycleReport, PrincipalOutcome, RoleSyncEngine, RosterReport, SyncReport};
pub use events::PlatformEvent;
pub use scheduler::spawn_role_sync_task;

use crate::db::StoreError;
use crate::platform::PlatformError;

/// Failures of a single reconciliation unit.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Registration of a member that already has a profile.
    #[error("Member is already registered in this community")]
    AlreadyRegistered,
}
