use crate::util::Status;

/// Errors returned by snapshot reads and database operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The snapshot was retired and closed, usually by forced eviction or a
    /// database reopen. Retry against a fresh snapshot.
    #[error("snapshot {instance_id} for epoch {epoch_id} is already closed")]
    SnapshotClosed { instance_id: u64, epoch_id: u64 },

    #[error(transparent)]
    Engine(#[from] Status),
}

impl Error {
    pub fn is_snapshot_closed(&self) -> bool {
        matches!(self, Error::SnapshotClosed { .. })
    }

    /// True when repeating the call on a fresh snapshot can succeed.
    pub fn is_retryable(&self) -> bool {
        self.is_snapshot_closed()
    }

    pub fn status(&self) -> Option<&Status> {
        match self {
            Error::Engine(status) => Some(status),
            Error::SnapshotClosed { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Code;

    #[test]
    fn test_snapshot_closed_is_retryable() {
        let err = Error::SnapshotClosed {
            instance_id: 4,
            epoch_id: 10,
        };
        assert!(err.is_snapshot_closed());
        assert!(err.is_retryable());
        assert!(err.status().is_none());
        assert_eq!(
            err.to_string(),
            "snapshot 4 for epoch 10 is already closed"
        );
    }

    #[test]
    fn test_engine_error_passes_through() {
        let err: Error = Status::corruption("bad checksum").into();
        assert!(!err.is_retryable());
        assert_eq!(err.status().map(|s| s.code()), Some(Code::Corruption));
        assert_eq!(err.to_string(), "Corruption: bad checksum");
    }
}
