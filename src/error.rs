use std::path::PathBuf;
use thiserror::Error;

/// Error type for the signature generation pipeline.
///
/// The variants mirror the failure classes of the pipeline: bad caller
/// input, inputs that violate a pipeline precondition, inconsistencies in
/// loaded data, and engine formatting limits.
#[derive(Debug, Error)]
pub enum SigforgeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("unimplemented: {0}")]
    Unimplemented(String),

    #[error("I/O error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, SigforgeError>;

impl SigforgeError {
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn failed_precondition<S: Into<String>>(message: S) -> Self {
        Self::FailedPrecondition(message.into())
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    pub fn out_of_range<S: Into<String>>(message: S) -> Self {
        Self::OutOfRange(message.into())
    }

    pub fn unimplemented<S: Into<String>>(message: S) -> Self {
        Self::Unimplemented(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json { path: path.into(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_failure_class() {
        let err = SigforgeError::invalid_argument("nope");
        assert_eq!(err.to_string(), "invalid argument: nope");

        let err = SigforgeError::failed_precondition("not a chain");
        assert_eq!(err.to_string(), "failed precondition: not a chain");

        let err = SigforgeError::out_of_range("too long");
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_io_error_includes_path() {
        let err = SigforgeError::io(
            "/tmp/missing.matches.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/tmp/missing.matches.json"));
    }
}
