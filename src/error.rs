use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarvestError>;

/// Per-key outcome of a profile lookup. Never fatal to a generation.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("remote answered with status {0}")]
    NonSuccess(StatusCode),

    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Transport(format!("invalid json payload: {err}"))
    }
}

/// Per-word outcome of a translate call. Logged and skipped by the caller.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("translate service answered with status {0}")]
    NonSuccess(StatusCode),

    #[error("translate transport failure: {0}")]
    Transport(String),

    #[error("unexpected translate payload: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for TranslateError {
    fn from(err: reqwest::Error) -> Self {
        TranslateError::Transport(err.to_string())
    }
}

/// Errors that halt a run. Recovery happens on the next run through
/// `RecordStore::load_keys`.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("dataset {path} is corrupt: {detail}")]
    DataCorruption { path: PathBuf, detail: String },

    #[error("failed to append to {path}: {source}")]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("batch {0} was already retired")]
    BatchAlreadyRetired(PathBuf),

    #[error("batch {path} is unusable: {detail}")]
    InvalidBatch { path: PathBuf, detail: String },

    #[error("fetch task failed: {0}")]
    TaskFailed(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl HarvestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarvestError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        HarvestError::DataCorruption {
            path: path.into(),
            detail: detail.into(),
        }
    }
}
