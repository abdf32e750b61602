#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    NotFound,
    Corruption,
    InvalidArgument,
    IOError,
    ShutdownInProgress,
}

/// Error reported by a storage engine.
///
/// Snapshot code never interprets these; they travel to the caller
/// unchanged inside [`crate::Error::Engine`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct Status {
    code: Code,
    message: String,
}

impl Status {
    pub fn new(code: Code, msg: impl Into<String>) -> Self {
        Status {
            code,
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Status::new(Code::NotFound, msg)
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        Status::new(Code::Corruption, msg)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Status::new(Code::InvalidArgument, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Status::new(Code::IOError, msg)
    }

    pub fn shutdown_in_progress(msg: impl Into<String>) -> Self {
        Status::new(Code::ShutdownInProgress, msg)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == Code::NotFound
    }

    pub fn is_corruption(&self) -> bool {
        self.code == Code::Corruption
    }

    pub fn is_io_error(&self) -> bool {
        self.code == Code::IOError
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for Status {
    fn from(err: std::io::Error) -> Self {
        Status::io_error(err.to_string())
    }
}

impl From<serde_json::Error> for Status {
    fn from(err: serde_json::Error) -> Self {
        Status::invalid_argument(err.to_string())
    }
}

pub type EngineResult<T> = std::result::Result<T, Status>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert!(Status::io_error("disk full").is_io_error());
        assert!(Status::corruption("bad block").is_corruption());
        assert!(Status::not_found("key").is_not_found());
        assert_eq!(
            Status::shutdown_in_progress("closed").code(),
            Code::ShutdownInProgress
        );
    }

    #[test]
    fn test_status_display() {
        let status = Status::io_error("disk full");
        assert_eq!(status.to_string(), "IOError: disk full");
        assert_eq!(status.message(), "disk full");
    }

    #[test]
    fn test_status_from_json_error() {
        let err = serde_json::from_str::<u64>("not json").unwrap_err();
        let status = Status::from(err);
        assert_eq!(status.code(), Code::InvalidArgument);
    }
}
