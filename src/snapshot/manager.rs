use std::{collections::BTreeMap, sync::Arc, time::Instant};

use parking_lot::RwLock;

use crate::{
    engine::Engine,
    snapshot::{Snapshot, SnapshotOptions},
    statistics::Statistics,
    util::{Clock, SystemClock},
};

#[derive(Default)]
struct SnapshotState {
    /// Snapshot new readers should use
    last: Option<Arc<Snapshot>>,
    /// Superseded snapshots that may still be in use, by instance id
    retiring: BTreeMap<u64, Arc<Snapshot>>,
}

/// Tracks the latest block snapshot and retires the older ones.
///
/// The writer calls [`add_snapshot_for_epoch`](Self::add_snapshot_for_epoch)
/// after every unit of work. Readers call
/// [`last_snapshot`](Self::last_snapshot) and keep the returned `Arc` for as
/// long as their query runs.
///
/// A retiring snapshot is closed once nobody but the manager holds it, or
/// once it is older than the allowed lifetime, whichever comes first.
///
/// # Thread Safety
///
/// `state` is held only for map updates and snapshot creation. Snapshots
/// are removed from the map before they are closed, so no thread can reach a
/// snapshot through the manager while its close waits for readers.
pub struct SnapshotManager {
    state: RwLock<SnapshotState>,
    options: SnapshotOptions,
    clock: Arc<dyn Clock>,
    statistics: Arc<Statistics>,
}

impl SnapshotManager {
    pub fn new(options: SnapshotOptions, clock: Arc<dyn Clock>) -> Self {
        SnapshotManager {
            state: RwLock::new(SnapshotState::default()),
            options,
            clock,
            statistics: Arc::new(Statistics::new()),
        }
    }

    /// Take a snapshot of `engine` for `epoch_id` and make it the last one.
    /// The previous last snapshot moves to the retiring set, then unused or
    /// expired retiring snapshots are collected.
    ///
    /// # Panics
    ///
    /// If the engine cannot produce a snapshot handle.
    pub fn add_snapshot_for_epoch<E: Engine + ?Sized>(
        &self,
        epoch_id: u64,
        engine: &E,
        reopen_epoch: u64,
    ) {
        {
            let mut state = self.state.write();

            let native = match engine.create_snapshot() {
                Some(native) => native,
                None => panic!(
                    "engine returned a null snapshot for epoch {epoch_id} at reopen epoch {reopen_epoch}"
                ),
            };
            let snapshot = Arc::new(Snapshot::new(
                epoch_id,
                native,
                reopen_epoch,
                self.clock.as_ref(),
            ));
            self.statistics.record_snapshot_created();

            tracing::debug!(
                instance_id = snapshot.instance_id(),
                epoch_id,
                reopen_epoch,
                "created block snapshot"
            );

            if let Some(previous) = state.last.replace(snapshot) {
                state.retiring.insert(previous.instance_id(), previous);
            }
        }

        self.garbage_collect_unused(engine, reopen_epoch, self.options.retiring_lifetime_ms);
    }

    /// Current snapshot, or `None` before the first one is taken or after
    /// [`close_all`](Self::close_all)
    pub fn last_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.state.read().last.clone()
    }

    /// Close retiring snapshots that are unused or at least
    /// `max_lifetime_ms` old. Returns how many remain.
    pub fn garbage_collect_unused<E: Engine + ?Sized>(
        &self,
        engine: &E,
        reopen_epoch: u64,
        max_lifetime_ms: u64,
    ) -> u64 {
        let now_ms = self.clock.now_ms();
        let mut eligible = Vec::new();

        let remaining = {
            let mut state = self.state.write();
            state.retiring.retain(|_, snapshot| {
                // The map's own reference is the only one left.
                let unused = Arc::strong_count(snapshot) == 1;
                let expired =
                    now_ms.saturating_sub(snapshot.creation_time_ms()) >= max_lifetime_ms;
                if unused || expired {
                    eligible.push((Arc::clone(snapshot), !unused));
                    false
                } else {
                    true
                }
            });
            state.retiring.len() as u64
        };
        self.statistics.record_gc_sweep();

        if !eligible.is_empty() {
            tracing::debug!(
                closing = eligible.len(),
                remaining,
                max_lifetime_ms,
                "collecting retiring snapshots"
            );
        }

        for (snapshot, forced) in eligible {
            if forced {
                tracing::warn!(
                    instance_id = snapshot.instance_id(),
                    epoch_id = snapshot.epoch_id(),
                    age_ms = now_ms.saturating_sub(snapshot.creation_time_ms()),
                    "force closing snapshot still held by a reader"
                );
            }
            if snapshot.close(engine, reopen_epoch) {
                self.statistics.record_snapshot_closed(forced);
            } else {
                self.statistics.record_double_close();
            }
        }

        remaining
    }

    /// Close every snapshot, including the last one. Must run before the
    /// engine incarnation `reopen_epoch` is dropped.
    ///
    /// Readers get `force_close_timeout_ms` to let go; whatever is still
    /// held after that is closed anyway.
    ///
    /// # Panics
    ///
    /// If snapshots remain after the forced pass.
    pub fn close_all<E: Engine + ?Sized>(&self, engine: &E, reopen_epoch: u64) {
        self.statistics.record_close_all();

        {
            let mut state = self.state.write();
            if let Some(last) = state.last.take() {
                state.retiring.insert(last.instance_id(), last);
            }
        }

        let deadline = Instant::now() + self.options.force_close_timeout();
        while Instant::now() <= deadline {
            let alive = self.garbage_collect_unused(
                engine,
                reopen_epoch,
                self.options.retiring_lifetime_ms,
            );
            if alive == 0 {
                break;
            }
            std::thread::sleep(self.options.force_close_poll_interval());
        }

        let alive = self.garbage_collect_unused(engine, reopen_epoch, 0);
        assert_eq!(
            alive, 0,
            "{alive} snapshots still open after forced close at reopen epoch {reopen_epoch}"
        );

        tracing::info!(reopen_epoch, "closed all snapshots");
    }

    pub fn retiring_count(&self) -> usize {
        self.state.read().retiring.len()
    }

    /// Instance ids of the retiring snapshots, ascending
    pub fn retiring_ids(&self) -> Vec<u64> {
        self.state.read().retiring.keys().copied().collect()
    }

    pub fn is_retiring(&self, instance_id: u64) -> bool {
        self.state.read().retiring.contains_key(&instance_id)
    }

    pub fn options(&self) -> &SnapshotOptions {
        &self.options
    }

    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.statistics
    }
}

impl Default for SnapshotManager {
    fn default() -> Self {
        SnapshotManager::new(SnapshotOptions::default(), Arc::new(SystemClock))
    }
}
