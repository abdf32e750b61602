use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot lifecycle statistics
///
/// Shared by the snapshot manager and the database wrapper.
/// Uses atomic counters for lock-free updates.
#[derive(Debug, Default)]
pub struct Statistics {
    // Lifecycle
    pub snapshots_created: AtomicU64,
    pub snapshots_closed: AtomicU64,
    pub snapshots_force_closed: AtomicU64,
    pub double_closes: AtomicU64,

    // Reads through snapshots
    pub snapshot_reads: AtomicU64,
    pub snapshot_iterators: AtomicU64,
    pub closed_snapshot_reads: AtomicU64,

    // Writes
    /// Keys removed by committed batches
    pub keys_deleted: AtomicU64,

    // Maintenance
    pub gc_sweeps: AtomicU64,
    pub close_all_calls: AtomicU64,
    pub db_reopens: AtomicU64,
}

impl Statistics {
    pub fn new() -> Self {
        Statistics::default()
    }

    #[inline]
    pub fn record_snapshot_created(&self) {
        self.snapshots_created.fetch_add(1, Ordering::Relaxed);
    }

    /// `forced` is set when the snapshot was still referenced by a reader
    #[inline]
    pub fn record_snapshot_closed(&self, forced: bool) {
        self.snapshots_closed.fetch_add(1, Ordering::Relaxed);
        if forced {
            self.snapshots_force_closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_double_close(&self) {
        self.double_closes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_snapshot_read(&self) {
        self.snapshot_reads.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_snapshot_iterator(&self) {
        self.snapshot_iterators.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_closed_snapshot_read(&self) {
        self.closed_snapshot_reads.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_keys_deleted(&self, count: u64) {
        self.keys_deleted.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gc_sweep(&self) {
        self.gc_sweeps.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_close_all(&self) {
        self.close_all_calls.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reopen(&self) {
        self.db_reopens.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshots created but not yet closed
    pub fn open_snapshots(&self) -> u64 {
        let created = self.snapshots_created.load(Ordering::Relaxed);
        let closed = self.snapshots_closed.load(Ordering::Relaxed);
        created.saturating_sub(closed)
    }

    pub fn reset(&self) {
        self.snapshots_created.store(0, Ordering::Relaxed);
        self.snapshots_closed.store(0, Ordering::Relaxed);
        self.snapshots_force_closed.store(0, Ordering::Relaxed);
        self.double_closes.store(0, Ordering::Relaxed);
        self.snapshot_reads.store(0, Ordering::Relaxed);
        self.snapshot_iterators.store(0, Ordering::Relaxed);
        self.closed_snapshot_reads.store(0, Ordering::Relaxed);
        self.keys_deleted.store(0, Ordering::Relaxed);
        self.gc_sweeps.store(0, Ordering::Relaxed);
        self.close_all_calls.store(0, Ordering::Relaxed);
        self.db_reopens.store(0, Ordering::Relaxed);
    }

    /// Human-readable summary
    pub fn report(&self) -> String {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let mut report = String::new();
        report.push_str("** Snapshots **\n");
        report.push_str(&format!(
            "Created: {}, Closed: {} (forced: {}), Open: {}\n",
            load(&self.snapshots_created),
            load(&self.snapshots_closed),
            load(&self.snapshots_force_closed),
            self.open_snapshots(),
        ));
        report.push_str(&format!("Double closes: {}\n", load(&self.double_closes)));
        report.push_str("\n** Snapshot Reads **\n");
        report.push_str(&format!(
            "Reads: {}, Iterators: {}, Rejected (closed): {}\n",
            load(&self.snapshot_reads),
            load(&self.snapshot_iterators),
            load(&self.closed_snapshot_reads),
        ));
        report.push_str("\n** Writes **\n");
        report.push_str(&format!("Keys deleted: {}\n", load(&self.keys_deleted)));
        report.push_str("\n** Maintenance **\n");
        report.push_str(&format!(
            "GC sweeps: {}, Close-all: {}, Reopens: {}\n",
            load(&self.gc_sweeps),
            load(&self.close_all_calls),
            load(&self.db_reopens),
        ));
        report
    }
}
