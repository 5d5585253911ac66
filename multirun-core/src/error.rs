//! Error types.

use std::io;
use std::path::PathBuf;

pub type Result<T> = core::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

/// Crate-wide error type.
///
/// These are the errors that stop a run as a whole. Failures of individual
/// jobs are not errors, they're recorded as [`FailureKind`] on the job's
/// record instead.
///
/// [`FailureKind`]: ../summary/enum.FailureKind.html
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),
    #[error("duplicate job name: {0} (every table row needs a unique filename)")]
    DuplicateNameError(String),

    #[error("failed reading parameter table: {0}")]
    TableError(#[from] csv::Error),
    #[error("toml deserialization error: {0}")]
    TomlDeserError(#[from] toml::de::Error),
    #[cfg(feature = "yaml")]
    #[error("yaml deserialization error: {0}")]
    YamlDeserError(#[from] serde_yaml::Error),
    #[error("unsupported config file format: {0}")]
    UnsupportedConfigFormat(PathBuf),

    #[error("failed creating combined output file {0}: {1}")]
    CombineError(PathBuf, String),
    #[error("failed preparing relocation directory {0}: {1}")]
    RelocateError(PathBuf, String),

    #[error("other error: {0}")]
    Other(String),
}

impl Error {
    pub(crate) fn config<S: Into<String>>(msg: S) -> Self {
        Error::ConfigurationError(msg.into())
    }
}
