use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for snapshot retirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotOptions {
    /// Age after which a retiring snapshot is closed even if a reader still
    /// holds it. That reader's next access fails with `SnapshotClosed`.
    pub retiring_lifetime_ms: u64,
    /// How long `close_all` waits for readers before forcing
    pub force_close_timeout_ms: u64,
    /// Pause between sweeps while `close_all` waits
    pub force_close_poll_interval_ms: u64,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        SnapshotOptions {
            retiring_lifetime_ms: 30_000,
            force_close_timeout_ms: 3_000,
            force_close_poll_interval_ms: 1,
        }
    }
}

impl SnapshotOptions {
    pub fn force_close_timeout(&self) -> Duration {
        Duration::from_millis(self.force_close_timeout_ms)
    }

    pub fn force_close_poll_interval(&self) -> Duration {
        Duration::from_millis(self.force_close_poll_interval_ms)
    }
}
