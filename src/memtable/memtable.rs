use std::{
    cmp::Reverse,
    ops::Bound,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

/// Memtable key: user key ascending, then sequence descending, so the
/// newest version of a key is met first when scanning forward.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct InternalKey {
    user_key: Bytes,
    sequence: Reverse<u64>,
}

impl InternalKey {
    pub fn new(user_key: Bytes, sequence: u64) -> Self {
        InternalKey {
            user_key,
            sequence: Reverse(sequence),
        }
    }

    pub fn user_key(&self) -> &Bytes {
        &self.user_key
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.0
    }
}

/// `None` marks a deletion.
type Table = SkipMap<InternalKey, Option<Bytes>>;

/// Multi-version in-memory table.
///
/// Every write carries a sequence number and older versions are kept, so
/// a reader pinned at sequence `s` sees exactly the writes numbered `<= s`.
pub struct MemTable {
    table: Arc<Table>,
    approximate_memory: AtomicUsize,
}

impl MemTable {
    pub fn new() -> Self {
        MemTable {
            table: Arc::new(SkipMap::new()),
            approximate_memory: AtomicUsize::new(0),
        }
    }

    pub fn add(&self, sequence: u64, key: Bytes, value: Bytes) {
        self.approximate_memory
            .fetch_add(key.len() + value.len() + 8, Ordering::Relaxed);
        self.table
            .insert(InternalKey::new(key, sequence), Some(value));
    }

    pub fn delete(&self, sequence: u64, key: Bytes) {
        self.approximate_memory
            .fetch_add(key.len() + 8, Ordering::Relaxed);
        self.table.insert(InternalKey::new(key, sequence), None);
    }

    /// Newest value of `key` written at or before `sequence`
    pub fn get(&self, key: &[u8], sequence: u64) -> Option<Bytes> {
        let start = InternalKey::new(Bytes::copy_from_slice(key), sequence);
        let entry = self.table.range(start..).next()?;
        if entry.key().user_key.as_ref() != key {
            return None;
        }
        entry.value().clone()
    }

    /// Lazy scan of the live keys visible at `sequence`
    pub fn iter(&self, sequence: u64) -> MemTableIterator {
        MemTableIterator {
            table: Arc::clone(&self.table),
            sequence,
            cursor: Some(Bound::Unbounded),
        }
    }

    pub fn approximate_memory_usage(&self) -> usize {
        self.approximate_memory.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward iterator over one sequence-pinned view of a [`MemTable`].
///
/// Owns a reference to the table, so it outlives whatever handle it was
/// created through.
pub struct MemTableIterator {
    table: Arc<Table>,
    sequence: u64,
    // None once exhausted
    cursor: Option<Bound<InternalKey>>,
}

impl Iterator for MemTableIterator {
    type Item = (Bytes, Bytes);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let lower = self.cursor.take()?;
            let user_key = {
                let first = self.table.range((lower, Bound::Unbounded)).next()?;
                first.key().user_key.clone()
            };

            // Sequence 0 sorts after every real version of the key.
            self.cursor = Some(Bound::Excluded(InternalKey::new(user_key.clone(), 0)));

            let visible = self
                .table
                .range(InternalKey::new(user_key.clone(), self.sequence)..)
                .next()
                .filter(|entry| entry.key().user_key == user_key)
                .and_then(|entry| entry.value().clone());

            if let Some(value) = visible {
                return Some((user_key, value));
            }
        }
    }
}
