//! Block snapshots for a key-value store whose engine handle is
//! periodically closed and reopened.
//!
//! The writer takes a snapshot after every applied block; readers query the
//! latest one for as long as they need, and superseded snapshots are retired
//! once unused or too old. Before the engine handle is replaced, every
//! snapshot taken from it is closed.

pub mod db;
pub mod engine;
pub mod memtable;
pub mod snapshot;
pub mod statistics;
pub mod util;

pub use db::{DB, DBOptions};
pub use engine::{
    Engine, EngineIterator, EngineOpener, MemoryEngine, MemoryStore, NativeSnapshot, ReadOptions,
    WriteBatch, WriteOp,
};
pub use snapshot::{Snapshot, SnapshotIterator, SnapshotManager, SnapshotOptions};
pub use statistics::Statistics;
pub use util::{Clock, Code, EngineResult, Error, ManualClock, Result, Status, SystemClock};
