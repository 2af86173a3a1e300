use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure to bring an engine session up. The engine must not be used afterwards.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Engine binary not usable: {0}")]
    EngineNotFound(String),

    #[error("Engine failed to load: {0}")]
    Load(String),

    #[error("Engine rejected the low-shelf filter configuration: {0}")]
    FilterRejected(String),
}

/// Anything that went wrong while installing a language pack.
/// The installer folds all of these into a single failed outcome.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Archive entry escapes the destination root: {0}")]
    UnsafeEntry(String),

    #[error("Failed to install {}: {source}", .path.display())]
    Entry {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl InstallError {
    pub(crate) fn entry(path: &Path, source: std::io::Error) -> Self {
        InstallError::Entry {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine was already shut down")]
    Released,

    #[error("Language not supported: {0}")]
    UnsupportedLanguage(String),

    #[error("Engine failure: {0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
