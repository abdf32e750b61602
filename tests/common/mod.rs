#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use bytes::Bytes;
use parking_lot::Mutex;
use rucksnap::{
    Engine, EngineIterator, EngineOpener, EngineResult, MemoryEngine, MemoryStore,
    NativeSnapshot, ReadOptions, Status, WriteBatch,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Engine wrapper that records every snapshot release and flags any read
/// that arrives with an already released handle.
pub struct RecordingEngine {
    inner: MemoryEngine,
    releases: Mutex<HashMap<u64, usize>>,
    violations: AtomicU64,
    fail_reads: AtomicBool,
    read_delay: Mutex<Option<Duration>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::with_store(&MemoryStore::new())
    }

    pub fn with_store(store: &MemoryStore) -> Self {
        RecordingEngine {
            inner: store.open().unwrap(),
            releases: Mutex::new(HashMap::new()),
            violations: AtomicU64::new(0),
            fail_reads: AtomicBool::new(false),
            read_delay: Mutex::new(None),
        }
    }

    /// Reads after a release of the handle they carry
    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::SeqCst)
    }

    pub fn release_count(&self, snapshot: NativeSnapshot) -> usize {
        self.releases
            .lock()
            .get(&snapshot.raw())
            .copied()
            .unwrap_or(0)
    }

    pub fn total_releases(&self) -> usize {
        self.releases.lock().values().sum()
    }

    pub fn live_snapshot_count(&self) -> usize {
        self.inner.live_snapshot_count()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.lock() = delay;
    }

    fn check_read(&self, options: &ReadOptions) -> EngineResult<()> {
        if let Some(snapshot) = options.snapshot
            && self.release_count(snapshot) > 0
        {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Status::io_error("injected read failure"));
        }
        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        Ok(())
    }
}

impl Engine for RecordingEngine {
    fn create_snapshot(&self) -> Option<NativeSnapshot> {
        self.inner.create_snapshot()
    }

    fn release_snapshot(&self, snapshot: NativeSnapshot) {
        *self.releases.lock().entry(snapshot.raw()).or_insert(0) += 1;
        self.inner.release_snapshot(snapshot);
    }

    fn get(&self, options: &ReadOptions, key: &[u8]) -> EngineResult<Option<Bytes>> {
        self.check_read(options)?;
        self.inner.get(options, key)
    }

    fn iter(&self, options: &ReadOptions) -> EngineResult<EngineIterator> {
        self.check_read(options)?;
        self.inner.iter(options)
    }

    fn write(&self, batch: &WriteBatch) -> EngineResult<()> {
        self.inner.write(batch)
    }
}

pub fn put(engine: &impl Engine, key: &str, value: &str) {
    let mut batch = WriteBatch::new();
    batch.put(key.to_string(), value.to_string());
    engine.write(&batch).unwrap();
}
