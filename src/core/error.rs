use crate::core::model::ByteRange;
use reqwest::StatusCode;
use std::path::Path;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(thiserror::Error, Debug)]
pub enum DownloadError {
    /// Remote length or range support could not be established.
    #[error("probe failed: {0}")]
    ProbeFailed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The server answered a range request with something other than 206
    /// (or 200 for a whole-file request).
    #[error("unexpected status {status} for range {range}")]
    UnexpectedStatus { status: StatusCode, range: ByteRange },

    #[error("network error: {context}")]
    Network {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("filesystem error: {context}")]
    Filesystem {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("merge failed at chunk {index}")]
    MergeFailed {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("download cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    /// Chunk context around a failure raised while fetching one segment.
    #[error("chunk {index} (bytes {range}) failed")]
    Segment {
        index: usize,
        range: ByteRange,
        #[source]
        source: Box<DownloadError>,
    },
}

impl DownloadError {
    pub fn network(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Network { context: context.into(), source: source.into() }
    }

    pub fn fs(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Filesystem { context: context.into(), source }
    }

    pub fn fs_path(op: &str, path: &Path, source: std::io::Error) -> Self {
        Self::fs(format!("{} {}", op, path.display()), source)
    }

    pub fn in_segment(self, index: usize, range: ByteRange) -> Self {
        match self {
            // already tagged by a nested call
            e @ Self::Segment { .. } => e,
            e => Self::Segment { index, range, source: Box::new(e) },
        }
    }

    /// The underlying error with any chunk context removed.
    pub fn cause(&self) -> &DownloadError {
        match self {
            Self::Segment { source, .. } => source.cause(),
            e => e,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.cause(), Self::Cancelled)
    }

    /// Transport failures and transient statuses are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self.cause() {
            Self::Network { .. } => true,
            Self::UnexpectedStatus { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || status.is_server_error()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_peels_segment_context() {
        let range = ByteRange::new(0, 9);
        let err = DownloadError::UnexpectedStatus { status: StatusCode::OK, range }.in_segment(3, range);
        assert!(matches!(err, DownloadError::Segment { index: 3, .. }));
        assert!(matches!(err.cause(), DownloadError::UnexpectedStatus { status, .. } if *status == StatusCode::OK));
        assert_eq!(err.to_string(), "chunk 3 (bytes 0-9) failed");
    }

    #[test]
    fn segment_context_is_not_nested_twice() {
        let range = ByteRange::new(0, 9);
        let err = DownloadError::Cancelled.in_segment(1, range).in_segment(2, range);
        assert!(matches!(err, DownloadError::Segment { index: 1, .. }));
        assert!(err.is_cancelled());
    }

    #[test]
    fn retryable_classification() {
        let range = ByteRange::new(0, 9);
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(DownloadError::network("read body", io).is_retryable());
        assert!(DownloadError::UnexpectedStatus { status: StatusCode::SERVICE_UNAVAILABLE, range }.is_retryable());
        assert!(!DownloadError::UnexpectedStatus { status: StatusCode::OK, range }.is_retryable());
        assert!(!DownloadError::UnexpectedStatus { status: StatusCode::NOT_FOUND, range }.is_retryable());
        assert!(!DownloadError::Cancelled.is_retryable());
    }
}
