use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the client operations.
///
/// None of these are retried. The CLI reports them as a single `error:` line;
/// library callers can match on the kind.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not a Google Sheets link: {0}")]
    InvalidLinkFormat(String),

    #[error("unsupported file type {content_type} (only text/csv files can be imported)")]
    UnsupportedFileType { content_type: String },

    #[error("user not authenticated; log in first")]
    NoSessionFound,

    #[error("stored session data is malformed: {0}")]
    MalformedSessionData(String),

    #[error("{0}")]
    NetworkFailure(String),

    #[error("{0} is required")]
    ValidationRequired(String),

    #[error("provide a spreadsheet link or a CSV file to import")]
    ImportSourceMissing,

    #[error("provide either a spreadsheet link or a CSV file, not both")]
    ImportSourceConflict,

    #[error("failed to read {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ClientError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkFailure(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedSessionData(message.into())
    }

    /// True for the two session failures that mean "log in again".
    pub fn is_session_error(&self) -> bool {
        matches!(
            self,
            ClientError::NoSessionFound | ClientError::MalformedSessionData(_)
        )
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
