//! Storage engine interface consumed by the snapshot layer.
//!
//! The snapshot code needs very little from an engine: a way to pin and
//! unpin a point-in-time view, point reads and scans through such a view,
//! and batched writes. [`MemoryEngine`] is the reference implementation.

mod memory;
mod write_batch;

use bytes::Bytes;

pub use memory::{MemoryEngine, MemoryStore};
pub use write_batch::{WriteBatch, WriteOp};

use crate::util::EngineResult;

/// Opaque engine snapshot handle.
///
/// Only the engine that minted it can interpret the value. After
/// [`Engine::release_snapshot`] the token must never be passed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeSnapshot(u64);

impl NativeSnapshot {
    pub fn from_raw(raw: u64) -> Self {
        NativeSnapshot(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub verify_checksums: bool,
    pub fill_cache: bool,
    /// Read as of this snapshot instead of the latest state
    pub snapshot: Option<NativeSnapshot>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            verify_checksums: false,
            fill_cache: true,
            snapshot: None,
        }
    }
}

impl ReadOptions {
    /// Options used for reads served from a block snapshot. Such scans are
    /// usually one-off queries and should not churn the cache.
    pub fn for_snapshot_reads() -> Self {
        ReadOptions {
            verify_checksums: false,
            fill_cache: false,
            snapshot: None,
        }
    }
}

/// Finite, forward-only scan in ascending key order
pub type EngineIterator = Box<dyn Iterator<Item = EngineResult<(Bytes, Bytes)>> + Send>;

/// One open incarnation of a storage engine.
pub trait Engine: Send + Sync {
    /// Pin the current state. `None` means the engine could not produce a
    /// handle, which only happens when the engine itself is broken.
    fn create_snapshot(&self) -> Option<NativeSnapshot>;

    fn release_snapshot(&self, snapshot: NativeSnapshot);

    /// `Ok(None)` when the key does not exist.
    fn get(&self, options: &ReadOptions, key: &[u8]) -> EngineResult<Option<Bytes>>;

    fn iter(&self, options: &ReadOptions) -> EngineResult<EngineIterator>;

    fn write(&self, batch: &WriteBatch) -> EngineResult<()>;
}

/// Opens fresh incarnations of an engine over the same data.
pub trait EngineOpener: Send + Sync {
    type Engine: Engine;

    fn open(&self) -> EngineResult<Self::Engine>;
}
