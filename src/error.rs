use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the metadata model, codec and file engines.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid metadata key: {0:?}")]
    InvalidKey(String),

    #[error("invalid format descriptor: {0:?}")]
    InvalidFormat(String),

    #[error("incompatible formats: {src} -> {dst}")]
    IncompatibleFormat { src: String, dst: String },

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("metadata parse error at byte {position}: {message}")]
    ParseError { position: usize, message: String },

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("type mismatch for {what}: expected {expected}")]
    TypeMismatch { what: String, expected: &'static str },

    #[error("invalid capture index {index} ({len} segments)")]
    InvalidCaptureIndex { index: usize, len: usize },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Finalizing a recording failed; its samples stay in `temp`
    #[error("recording not finalized, data kept at {temp:?}: {source}")]
    Unfinalized {
        temp: PathBuf,
        #[source]
        source: Box<Error>,
    },

    #[error("I/O error on {path:?}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an I/O error with the path it happened on.
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoPath {
            path: path.into(),
            source,
        }
    }

    pub fn type_mismatch(what: impl Into<String>, expected: &'static str) -> Self {
        Self::TypeMismatch {
            what: what.into(),
            expected,
        }
    }

    /// True for filesystem failures of either flavour.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::IoPath { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_position() {
        let err = Error::ParseError {
            position: 17,
            message: "expected value".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "metadata parse error at byte 17: expected value"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(err.is_io());
        assert!(Error::io_at("/tmp/x", std::io::Error::other("x")).is_io());
    }
}
