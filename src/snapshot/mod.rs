mod manager;
mod options;
#[allow(clippy::module_inception)]
mod snapshot;

pub use manager::SnapshotManager;
pub use options::SnapshotOptions;
pub use snapshot::{Snapshot, SnapshotIterator};
