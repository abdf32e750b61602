use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    engine::{Engine, EngineIterator, EngineOpener, ReadOptions, WriteBatch},
    snapshot::{Snapshot, SnapshotIterator, SnapshotManager, SnapshotOptions},
    statistics::Statistics,
    util::{Clock, Error, Result, Status, SystemClock},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DBOptions {
    /// Close and reopen the engine this often to let it compact and drop
    /// stale state. `None` disables periodic reopen.
    pub reopen_period_ms: Option<u64>,
    pub snapshot: SnapshotOptions,
}

impl DBOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::from(Status::from(e)))
    }
}

/// One open engine handle and the reopen epoch that identifies it
struct Incarnation<E> {
    engine: E,
    reopen_epoch: u64,
}

/// Key-value database with block snapshots over a reopenable engine.
///
/// # Reopen
///
/// ```text
/// write() -> reopen period elapsed?
///     ↓ yes
/// exclusive lock -> close_all(snapshots) -> drop engine -> open engine
///                   (reopen epoch + 1)
/// ```
///
/// Every other operation holds the engine lock shared, so an engine handle
/// is never dropped under a running read, and every snapshot taken from it
/// is closed before it goes away.
pub struct DB<O: EngineOpener> {
    opener: O,
    incarnation: RwLock<Option<Incarnation<O::Engine>>>,
    next_reopen_epoch: AtomicU64,
    last_open_time_ms: AtomicU64,
    snapshots: SnapshotManager,
    statistics: Arc<Statistics>,
    options: DBOptions,
    clock: Arc<dyn Clock>,
}

impl<O: EngineOpener> DB<O> {
    pub fn open(opener: O, options: DBOptions) -> Result<Self> {
        Self::open_with_clock(opener, options, Arc::new(SystemClock))
    }

    pub fn open_with_clock(opener: O, options: DBOptions, clock: Arc<dyn Clock>) -> Result<Self> {
        let snapshots = SnapshotManager::new(options.snapshot.clone(), Arc::clone(&clock));
        let statistics = Arc::clone(snapshots.statistics());

        let db = DB {
            opener,
            incarnation: RwLock::new(None),
            next_reopen_epoch: AtomicU64::new(0),
            last_open_time_ms: AtomicU64::new(0),
            snapshots,
            statistics,
            options,
            clock,
        };

        {
            let mut slot = db.incarnation.write();
            *slot = Some(db.open_incarnation()?);
        }

        Ok(db)
    }

    fn open_incarnation(&self) -> Result<Incarnation<O::Engine>> {
        let start_ms = self.clock.now_ms();
        let reopen_epoch = self.next_reopen_epoch.fetch_add(1, Ordering::SeqCst);
        let engine = self.opener.open()?;
        let opened_ms = self.clock.now_ms();
        self.last_open_time_ms.store(opened_ms, Ordering::Release);

        tracing::info!(
            reopen_epoch,
            elapsed_ms = opened_ms.saturating_sub(start_ms),
            "opened database"
        );

        Ok(Incarnation {
            engine,
            reopen_epoch,
        })
    }

    /// Run `f` against the current engine while holding the engine lock
    /// shared
    fn with_engine<T>(&self, f: impl FnOnce(&O::Engine, u64) -> Result<T>) -> Result<T> {
        let guard = self.incarnation.read();
        match guard.as_ref() {
            Some(incarnation) => f(&incarnation.engine, incarnation.reopen_epoch),
            None => Err(Status::shutdown_in_progress("database is closed").into()),
        }
    }

    #[inline]
    pub fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Bytes>> {
        self.with_engine(|engine, _| Ok(engine.get(options, key)?))
    }

    /// Scan the latest state
    pub fn iter(&self, options: &ReadOptions) -> Result<EngineIterator> {
        self.with_engine(|engine, _| Ok(engine.iter(options)?))
    }

    #[inline]
    pub fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        let mut batch = WriteBatch::with_capacity(1);
        batch.put(key, value);
        self.write(&batch)
    }

    #[inline]
    pub fn delete(&self, key: impl Into<Bytes>) -> Result<()> {
        let mut batch = WriteBatch::with_capacity(1);
        batch.delete(key);
        self.write(&batch)
    }

    /// Apply a batch, then reopen the engine if the reopen period elapsed
    pub fn write(&self, batch: &WriteBatch) -> Result<()> {
        self.with_engine(|engine, _| Ok(engine.write(batch)?))?;
        // Deletes take effect only once the batch has committed.
        self.statistics.record_keys_deleted(batch.delete_count() as u64);
        self.reopen_if_needed()?;
        Ok(())
    }

    /// Snapshot the current state as the result of unit of work `epoch_id`
    pub fn create_block_snapshot(&self, epoch_id: u64) -> Result<()> {
        self.with_engine(|engine, reopen_epoch| {
            self.snapshots
                .add_snapshot_for_epoch(epoch_id, engine, reopen_epoch);
            Ok(())
        })
    }

    /// Latest block snapshot, if any
    pub fn last_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshots.last_snapshot()
    }

    /// Point read through `snapshot`.
    ///
    /// Fails with [`Error::SnapshotClosed`] if the snapshot was retired in
    /// the meantime; retry with a fresh [`DB::last_snapshot`].
    pub fn get_at(&self, snapshot: &Snapshot, key: &[u8]) -> Result<Option<Bytes>> {
        self.statistics.record_snapshot_read();
        let result = self.with_engine(|engine, reopen_epoch| {
            Self::check_incarnation(snapshot, reopen_epoch)?;
            snapshot.get(engine, &ReadOptions::for_snapshot_reads(), key)
        });
        self.record_rejection(&result);
        result
    }

    /// Whether `key` exists in the latest state
    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(&ReadOptions::default(), key)?.is_some())
    }

    /// Whether `key` exists as of `snapshot`. Counted and rejected like
    /// [`DB::get_at`].
    pub fn exists_at(&self, snapshot: &Snapshot, key: &[u8]) -> Result<bool> {
        Ok(self.get_at(snapshot, key)?.is_some())
    }

    /// Scan through `snapshot`
    pub fn iter_at(&self, snapshot: &Snapshot) -> Result<SnapshotIterator> {
        self.statistics.record_snapshot_iterator();
        let result = self.with_engine(|engine, reopen_epoch| {
            Self::check_incarnation(snapshot, reopen_epoch)?;
            snapshot.iter(engine, &ReadOptions::for_snapshot_reads())
        });
        self.record_rejection(&result);
        result
    }

    fn check_incarnation(snapshot: &Snapshot, reopen_epoch: u64) -> Result<()> {
        // Only an already closed snapshot can come from another incarnation.
        if snapshot.parent_reopen_epoch() != reopen_epoch {
            return Err(Error::SnapshotClosed {
                instance_id: snapshot.instance_id(),
                epoch_id: snapshot.epoch_id(),
            });
        }
        Ok(())
    }

    fn record_rejection<T>(&self, result: &Result<T>) {
        if let Err(e) = result
            && e.is_snapshot_closed()
        {
            self.statistics.record_closed_snapshot_read();
        }
    }

    /// Close retiring snapshots that are unused or past their lifetime.
    /// Returns the number still retiring.
    pub fn garbage_collect_snapshots(&self) -> Result<u64> {
        self.with_engine(|engine, reopen_epoch| {
            Ok(self.snapshots.garbage_collect_unused(
                engine,
                reopen_epoch,
                self.options.snapshot.retiring_lifetime_ms,
            ))
        })
    }

    /// Close every snapshot and open a new engine incarnation.
    ///
    /// If opening fails the database stays closed and later calls fail
    /// with `ShutdownInProgress` until a reopen succeeds.
    pub fn reopen(&self) -> Result<()> {
        let mut slot = self.incarnation.write();
        self.rotate(&mut slot)
    }

    fn reopen_due(&self, period_ms: u64) -> bool {
        let last = self.last_open_time_ms.load(Ordering::Acquire);
        self.clock.now_ms().saturating_sub(last) >= period_ms
    }

    /// Returns true if the engine was reopened
    pub fn reopen_if_needed(&self) -> Result<bool> {
        let Some(period_ms) = self.options.reopen_period_ms else {
            return Ok(false);
        };
        if !self.reopen_due(period_ms) {
            return Ok(false);
        }

        let mut slot = self.incarnation.write();
        // Another writer may have reopened while we waited for the lock.
        if !self.reopen_due(period_ms) {
            return Ok(false);
        }
        self.rotate(&mut slot)?;
        Ok(true)
    }

    fn rotate(&self, slot: &mut Option<Incarnation<O::Engine>>) -> Result<()> {
        if let Some(old) = slot.take() {
            self.snapshots.close_all(&old.engine, old.reopen_epoch);
            drop(old);
        }
        *slot = Some(self.open_incarnation()?);
        self.statistics.record_reopen();
        Ok(())
    }

    /// Close all snapshots and the engine. Later calls fail with
    /// `ShutdownInProgress`.
    pub fn close(&self) {
        let mut slot = self.incarnation.write();
        if let Some(old) = slot.take() {
            self.snapshots.close_all(&old.engine, old.reopen_epoch);
            tracing::info!(reopen_epoch = old.reopen_epoch, "closed database");
        }
    }

    pub fn is_open(&self) -> bool {
        self.incarnation.read().is_some()
    }

    /// Reopen epoch of the current engine handle
    pub fn reopen_epoch(&self) -> Option<u64> {
        self.incarnation.read().as_ref().map(|i| i.reopen_epoch)
    }

    pub fn snapshot_manager(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.statistics
    }

    pub fn options(&self) -> &DBOptions {
        &self.options
    }
}

impl<O: EngineOpener> Drop for DB<O> {
    fn drop(&mut self) {
        if let Some(old) = self.incarnation.get_mut().take() {
            self.snapshots.close_all(&old.engine, old.reopen_epoch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::MemoryStore,
        util::{Code, ManualClock},
    };

    fn open_db(reopen_period_ms: Option<u64>) -> (DB<MemoryStore>, MemoryStore, Arc<ManualClock>) {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let options = DBOptions {
            reopen_period_ms,
            snapshot: SnapshotOptions {
                force_close_timeout_ms: 20,
                ..SnapshotOptions::default()
            },
        };
        let db = DB::open_with_clock(store.clone(), options, clock.clone()).unwrap();
        (db, store, clock)
    }

    #[test]
    fn test_db_put_get_delete() {
        let (db, _store, _clock) = open_db(None);
        db.put("key1", "value1").unwrap();
        assert_eq!(
            db.get(&ReadOptions::default(), b"key1").unwrap(),
            Some(Bytes::from_static(b"value1"))
        );

        db.delete("key1").unwrap();
        assert_eq!(db.get(&ReadOptions::default(), b"key1").unwrap(), None);
    }

    #[test]
    fn test_block_snapshot_reads() {
        let (db, _store, _clock) = open_db(None);
        db.put("balance", "10").unwrap();
        db.create_block_snapshot(1).unwrap();
        db.put("balance", "20").unwrap();

        let snap = db.last_snapshot().unwrap();
        assert_eq!(snap.epoch_id(), 1);
        assert_eq!(
            db.get_at(&snap, b"balance").unwrap(),
            Some(Bytes::from_static(b"10"))
        );

        let items: Vec<_> = db.iter_at(&snap).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(
            items,
            vec![(Bytes::from_static(b"balance"), Bytes::from_static(b"10"))]
        );
    }

    #[test]
    fn test_periodic_reopen_closes_snapshots() {
        let (db, store, clock) = open_db(Some(60_000));
        db.put("k", "v").unwrap();
        db.create_block_snapshot(1).unwrap();
        let snap = db.last_snapshot().unwrap();
        assert_eq!(db.reopen_epoch(), Some(0));

        clock.advance(60_000);
        db.put("k", "v2").unwrap();

        assert_eq!(db.reopen_epoch(), Some(1));
        assert_eq!(store.open_count(), 2);
        assert!(snap.is_closed());
        assert!(db.last_snapshot().is_none());
        assert!(db.get_at(&snap, b"k").unwrap_err().is_snapshot_closed());
        assert_eq!(
            db.get(&ReadOptions::default(), b"k").unwrap(),
            Some(Bytes::from_static(b"v2"))
        );
        assert_eq!(db.statistics().db_reopens.load(Ordering::Relaxed), 1);
        assert_eq!(
            db.statistics().closed_snapshot_reads.load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_exists_at_snapshot() {
        let (db, _store, _clock) = open_db(Some(60_000));
        db.put("kept", "1").unwrap();
        db.put("dropped", "2").unwrap();
        db.create_block_snapshot(1).unwrap();
        db.delete("dropped").unwrap();
        db.put("added", "3").unwrap();

        let snap = db.last_snapshot().unwrap();
        assert!(db.exists_at(&snap, b"kept").unwrap());
        assert!(db.exists_at(&snap, b"dropped").unwrap());
        assert!(!db.exists_at(&snap, b"added").unwrap());
        assert!(!db.exists(b"dropped").unwrap());
        assert!(db.exists(b"added").unwrap());
        assert_eq!(db.statistics().snapshot_reads.load(Ordering::Relaxed), 3);

        db.reopen().unwrap();
        let err = db.exists_at(&snap, b"kept").unwrap_err();
        assert!(err.is_snapshot_closed());
        assert_eq!(
            db.statistics().closed_snapshot_reads.load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_keys_deleted_counts_committed_deletes() {
        let (db, _store, _clock) = open_db(None);
        db.put("a", "1").unwrap();
        db.delete("a").unwrap();

        let mut batch = WriteBatch::new();
        batch.put("b", "2");
        batch.delete("c");
        batch.delete("d");
        db.write(&batch).unwrap();
        assert_eq!(db.statistics().keys_deleted.load(Ordering::Relaxed), 3);

        // A batch that never commits is not counted.
        db.close();
        assert!(db.write(&batch).is_err());
        assert_eq!(db.statistics().keys_deleted.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_no_reopen_before_period() {
        let (db, store, clock) = open_db(Some(60_000));
        clock.advance(59_999);
        db.put("k", "v").unwrap();
        assert!(!db.reopen_if_needed().unwrap());
        assert_eq!(store.open_count(), 1);
    }

    #[test]
    fn test_close_rejects_operations() {
        let (db, _store, _clock) = open_db(None);
        db.create_block_snapshot(1).unwrap();
        let snap = db.last_snapshot().unwrap();

        db.close();
        assert!(!db.is_open());
        assert!(snap.is_closed());

        let err = db.put("k", "v").unwrap_err();
        assert_eq!(err.status().map(|s| s.code()), Some(Code::ShutdownInProgress));

        db.close();
    }

    #[test]
    fn test_options_from_json() {
        let options = DBOptions::from_json(
            r#"{ "reopen_period_ms": 86400000, "snapshot": { "force_close_timeout_ms": 100 } }"#,
        )
        .unwrap();
        assert_eq!(options.reopen_period_ms, Some(86_400_000));
        assert_eq!(options.snapshot.force_close_timeout_ms, 100);
        assert_eq!(options.snapshot.retiring_lifetime_ms, 30_000);

        let err = DBOptions::from_json("{ not json").unwrap_err();
        assert_eq!(err.status().map(|s| s.code()), Some(Code::InvalidArgument));
    }
}
