use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::{RwLock, RwLockReadGuard};

use crate::{
    engine::{Engine, EngineIterator, NativeSnapshot, ReadOptions},
    util::{Clock, Error, Result},
};

/// Source of process-wide unique snapshot instance ids
static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(0);

/// Point-in-time view of the database taken right after a unit of work
/// (typically a block) was applied.
///
/// # Lifecycle
///
/// ```text
/// created -> last -> retiring -> closed
/// ```
///
/// A snapshot is bound to the engine incarnation it was taken from
/// (`parent_reopen_epoch`). It must be closed through that incarnation
/// before the incarnation is dropped.
///
/// # Thread Safety
///
/// The native handle sits behind a readers-writer lock. Every read holds
/// the lock shared; [`Snapshot::close`] holds it exclusively, so the
/// handle is never released while a read is using it and no read can
/// observe it afterwards.
pub struct Snapshot {
    epoch_id: u64,
    parent_reopen_epoch: u64,
    creation_time_ms: u64,
    instance_id: u64,
    closed: AtomicBool,
    /// `None` once closed
    handle: RwLock<Option<NativeSnapshot>>,
}

impl Snapshot {
    pub fn new(
        epoch_id: u64,
        native: NativeSnapshot,
        parent_reopen_epoch: u64,
        clock: &dyn Clock,
    ) -> Self {
        Snapshot {
            epoch_id,
            parent_reopen_epoch,
            creation_time_ms: clock.now_ms(),
            instance_id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            closed: AtomicBool::new(false),
            handle: RwLock::new(Some(native)),
        }
    }

    #[inline]
    pub fn epoch_id(&self) -> u64 {
        self.epoch_id
    }

    #[inline]
    pub fn parent_reopen_epoch(&self) -> u64 {
        self.parent_reopen_epoch
    }

    #[inline]
    pub fn creation_time_ms(&self) -> u64 {
        self.creation_time_ms
    }

    #[inline]
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release the native handle.
    ///
    /// Blocks until in-flight reads on this snapshot finish. Returns `false`
    /// if the snapshot was already closed, in which case nothing is released.
    ///
    /// # Panics
    ///
    /// If `reopen_epoch` is not the incarnation this snapshot was taken from.
    /// Only the first close is checked; a repeated close returns `false`
    /// before the epoch is compared.
    pub fn close<E: Engine + ?Sized>(&self, engine: &E, reopen_epoch: u64) -> bool {
        let mut handle = self.handle.write();

        if self.is_closed() {
            tracing::warn!(
                instance_id = self.instance_id,
                epoch_id = self.epoch_id,
                "close called twice on a snapshot"
            );
            return false;
        }

        assert_eq!(
            reopen_epoch, self.parent_reopen_epoch,
            "snapshot {} closed through reopen epoch {} but was taken from epoch {}",
            self.instance_id, reopen_epoch, self.parent_reopen_epoch
        );

        if let Some(native) = handle.take() {
            engine.release_snapshot(native);
        }
        self.closed.store(true, Ordering::Release);
        true
    }

    /// Point read as of this snapshot
    pub fn get<E: Engine + ?Sized>(
        &self,
        engine: &E,
        options: &ReadOptions,
        key: &[u8],
    ) -> Result<Option<Bytes>> {
        let handle = self.acquire()?;
        let options = self.bind(options, &handle)?;
        Ok(engine.get(&options, key)?)
    }

    /// Scan as of this snapshot.
    ///
    /// The usage lock is held only while the engine iterator is created;
    /// the engine iterator keeps its own view alive from then on.
    pub fn iter<E: Engine + ?Sized>(
        &self,
        engine: &E,
        options: &ReadOptions,
    ) -> Result<SnapshotIterator> {
        let handle = self.acquire()?;
        let options = self.bind(options, &handle)?;
        let inner = engine.iter(&options)?;
        Ok(SnapshotIterator {
            inner,
            instance_id: self.instance_id,
        })
    }

    fn acquire(&self) -> Result<RwLockReadGuard<'_, Option<NativeSnapshot>>> {
        // Don't queue behind a pending close.
        if self.is_closed() {
            return Err(self.closed_error());
        }
        Ok(self.handle.read())
    }

    fn bind(&self, options: &ReadOptions, handle: &Option<NativeSnapshot>) -> Result<ReadOptions> {
        // A close may have completed between the first check and the lock.
        match handle {
            Some(native) if !self.is_closed() => Ok(ReadOptions {
                snapshot: Some(*native),
                ..options.clone()
            }),
            _ => Err(self.closed_error()),
        }
    }

    fn closed_error(&self) -> Error {
        Error::SnapshotClosed {
            instance_id: self.instance_id,
            epoch_id: self.epoch_id,
        }
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("instance_id", &self.instance_id)
            .field("epoch_id", &self.epoch_id)
            .field("parent_reopen_epoch", &self.parent_reopen_epoch)
            .field("creation_time_ms", &self.creation_time_ms)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        if !self.is_closed() {
            tracing::error!(
                instance_id = self.instance_id,
                epoch_id = self.epoch_id,
                "destroying active snapshot, the native handle will leak"
            );
        }
    }
}

/// Scan returned by [`Snapshot::iter`].
///
/// Finite and forward-only. Engine errors are yielded unchanged.
pub struct SnapshotIterator {
    inner: EngineIterator,
    instance_id: u64,
}

impl SnapshotIterator {
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }
}

impl std::fmt::Debug for SnapshotIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotIterator")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

impl Iterator for SnapshotIterator {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|item| item.map_err(Error::from))
    }
}
