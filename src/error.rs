//! Domain error taxonomy shared by the repository, the evaluators and the
//! finder. Every variant carries a short user-facing message; storage details
//! stay in the logs.

use thiserror::Error;

/// Extended SQLite result code for a failed NOT NULL constraint.
const SQLITE_CONSTRAINT_NOTNULL: i32 = 1299;

/// Status used for a valid search with zero results.
pub const STATUS_NO_MATCHES: u16 = 440;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("{0}")]
    Validation(String),

    #[error("No such file: {0}")]
    NotFound(String),

    #[error("{0}")]
    PreconditionFailed(&'static str),

    #[error("No matching files")]
    NoMatches,

    #[error("storage failure: {0}")]
    Storage(rusqlite::Error),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, FileError>;

impl FileError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// HTTP status for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::PreconditionFailed(_) => 412,
            Self::NoMatches => STATUS_NO_MATCHES,
            Self::Storage(_) | Self::Internal(_) => 500,
        }
    }

    /// Message safe to hand back to a client.
    pub fn public_message(&self) -> String {
        match self {
            Self::Storage(_) | Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<rusqlite::Error> for FileError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.extended_code == SQLITE_CONSTRAINT_NOTNULL =>
            {
                Self::Validation("Missing required data".to_string())
            }
            other => Self::Storage(other),
        }
    }
}
