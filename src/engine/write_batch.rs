use std::collections::HashMap;

use bytes::Bytes;

/// Write operation type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: Bytes, value: Bytes },
    Delete { key: Bytes },
}

impl WriteOp {
    pub fn key(&self) -> &Bytes {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key } => key,
        }
    }
}

/// WriteBatch accumulates write operations that an engine applies
/// atomically, in insertion order
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
    /// key -> index of the latest op for that key
    index: HashMap<Bytes, usize>,
    data_size: usize,
}

impl WriteBatch {
    #[inline]
    pub fn new() -> Self {
        WriteBatch::default()
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        WriteBatch {
            ops: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            data_size: 0,
        }
    }

    pub fn put(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        let key = key.into();
        let value = value.into();
        self.data_size += key.len() + value.len();
        self.push(WriteOp::Put { key, value });
    }

    pub fn delete(&mut self, key: impl Into<Bytes>) {
        let key = key.into();
        self.data_size += key.len();
        self.push(WriteOp::Delete { key });
    }

    fn push(&mut self, op: WriteOp) {
        self.index.insert(op.key().clone(), self.ops.len());
        self.ops.push(op);
    }

    /// Latest pending operation for `key`
    pub fn get_for_update(&self, key: &[u8]) -> Option<&WriteOp> {
        self.index.get(key).and_then(|&idx| self.ops.get(idx))
    }

    #[inline]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.index.contains_key(key)
    }

    #[inline]
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.ops.len()
    }

    /// Number of `Delete` operations
    pub fn delete_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, WriteOp::Delete { .. }))
            .count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
        self.index.clear();
        self.data_size = 0;
    }

    /// Approximate payload size in bytes
    #[inline]
    pub fn data_size(&self) -> usize {
        self.data_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_batch_put_delete() {
        let mut batch = WriteBatch::new();
        batch.put("key1", "value1");
        batch.delete("key2");

        assert_eq!(batch.count(), 2);
        assert_eq!(batch.data_size(), 4 + 6 + 4);
        assert!(batch.contains_key(b"key1"));
        assert!(batch.contains_key(b"key2"));
        assert!(!batch.contains_key(b"key3"));
        assert_eq!(batch.delete_count(), 1);
    }

    #[test]
    fn test_write_batch_latest_op_wins() {
        let mut batch = WriteBatch::new();
        batch.put("key1", "value1");
        batch.delete("key1");

        assert_eq!(
            batch.get_for_update(b"key1"),
            Some(&WriteOp::Delete {
                key: Bytes::from_static(b"key1")
            })
        );
        assert_eq!(batch.ops().len(), 2);
    }

    #[test]
    fn test_write_batch_clear() {
        let mut batch = WriteBatch::with_capacity(4);
        batch.put("key1", "value1");
        batch.clear();

        assert!(batch.is_empty());
        assert_eq!(batch.data_size(), 0);
        assert!(batch.get_for_update(b"key1").is_none());
    }
}
