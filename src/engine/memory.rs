use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    engine::{
        Engine, EngineIterator, EngineOpener, NativeSnapshot, ReadOptions, WriteBatch, WriteOp,
    },
    memtable::MemTable,
    util::{EngineResult, Status},
};

struct StoreInner {
    mem: MemTable,
    /// Highest sequence whose write is fully visible
    last_sequence: AtomicU64,
    /// Serializes batch application
    write_lock: Mutex<()>,
    next_handle: AtomicU64,
    open_count: AtomicU64,
}

/// Durable-for-the-process data shared by every [`MemoryEngine`]
/// incarnation opened from it.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            inner: Arc::new(StoreInner {
                mem: MemTable::new(),
                last_sequence: AtomicU64::new(0),
                write_lock: Mutex::new(()),
                next_handle: AtomicU64::new(1),
                open_count: AtomicU64::new(0),
            }),
        }
    }

    /// Number of incarnations opened so far
    pub fn open_count(&self) -> u64 {
        self.inner.open_count.load(Ordering::Relaxed)
    }

    pub fn last_sequence(&self) -> u64 {
        self.inner.last_sequence.load(Ordering::Acquire)
    }

    pub fn approximate_memory_usage(&self) -> usize {
        self.inner.mem.approximate_memory_usage()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineOpener for MemoryStore {
    type Engine = MemoryEngine;

    fn open(&self) -> EngineResult<MemoryEngine> {
        let incarnation = self.inner.open_count.fetch_add(1, Ordering::Relaxed);
        Ok(MemoryEngine {
            store: Arc::clone(&self.inner),
            incarnation,
            snapshots: Mutex::new(HashMap::new()),
        })
    }
}

/// One open handle over a [`MemoryStore`].
///
/// Native snapshots are registered per incarnation: a handle released
/// here, or minted by another incarnation, is rejected with
/// `InvalidArgument`.
pub struct MemoryEngine {
    store: Arc<StoreInner>,
    incarnation: u64,
    /// native handle -> pinned sequence
    snapshots: Mutex<HashMap<u64, u64>>,
}

impl MemoryEngine {
    pub fn incarnation(&self) -> u64 {
        self.incarnation
    }

    pub fn live_snapshot_count(&self) -> usize {
        self.snapshots.lock().len()
    }

    fn read_sequence(&self, options: &ReadOptions) -> EngineResult<u64> {
        match options.snapshot {
            None => Ok(self.store.last_sequence.load(Ordering::Acquire)),
            Some(handle) => self
                .snapshots
                .lock()
                .get(&handle.raw())
                .copied()
                .ok_or_else(|| {
                    Status::invalid_argument(format!(
                        "unknown snapshot handle {} for incarnation {}",
                        handle.raw(),
                        self.incarnation
                    ))
                }),
        }
    }
}

impl Engine for MemoryEngine {
    fn create_snapshot(&self) -> Option<NativeSnapshot> {
        let raw = self.store.next_handle.fetch_add(1, Ordering::Relaxed);
        let sequence = self.store.last_sequence.load(Ordering::Acquire);
        self.snapshots.lock().insert(raw, sequence);
        Some(NativeSnapshot::from_raw(raw))
    }

    fn release_snapshot(&self, snapshot: NativeSnapshot) {
        if self.snapshots.lock().remove(&snapshot.raw()).is_none() {
            tracing::error!(
                handle = snapshot.raw(),
                incarnation = self.incarnation,
                "release of unknown snapshot handle"
            );
        }
    }

    fn get(&self, options: &ReadOptions, key: &[u8]) -> EngineResult<Option<Bytes>> {
        let sequence = self.read_sequence(options)?;
        Ok(self.store.mem.get(key, sequence))
    }

    fn iter(&self, options: &ReadOptions) -> EngineResult<EngineIterator> {
        let sequence = self.read_sequence(options)?;
        Ok(Box::new(self.store.mem.iter(sequence).map(Ok)))
    }

    fn write(&self, batch: &WriteBatch) -> EngineResult<()> {
        let _guard = self.store.write_lock.lock();
        let mut sequence = self.store.last_sequence.load(Ordering::Acquire);
        for op in batch.ops() {
            sequence += 1;
            match op {
                WriteOp::Put { key, value } => {
                    self.store.mem.add(sequence, key.clone(), value.clone())
                },
                WriteOp::Delete { key } => self.store.mem.delete(sequence, key.clone()),
            }
        }
        self.store.last_sequence.store(sequence, Ordering::Release);
        Ok(())
    }
}

impl Drop for MemoryEngine {
    fn drop(&mut self) {
        let live = self.snapshots.get_mut().len();
        if live > 0 {
            tracing::error!(
                incarnation = self.incarnation,
                live,
                "closing engine with live snapshots"
            );
        }
    }
}
