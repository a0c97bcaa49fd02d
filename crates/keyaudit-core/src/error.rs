//! Error types for all keyaudit operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for keyaudit operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("cannot start scan worker for segment {segment}: {source}")]
    WorkerSpawn { segment: u32, source: io::Error },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("malformed config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required option: {0}")]
    Missing(&'static str),

    #[error("invalid value for {option}: {reason}")]
    InvalidValue {
        option: &'static str,
        reason: String,
    },

    #[error("conflicting options: {0}")]
    Conflict(String),

    #[error(
        "computed rate {rate} from capacity {capacity}, {percent}% and {workers} worker(s) must be greater than 0"
    )]
    RateTooLow {
        capacity: f64,
        percent: u32,
        workers: u32,
        rate: f64,
    },

    #[error("candidate key '{0}' is also a key attribute of the table")]
    KeyNameClash(String),
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("request rejected: {0}")]
    Validation(String),

    #[error("backend service error: {0}")]
    Service(String),
}

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("empty value is not allowed here")]
    Empty,

    #[error("invalid number: '{0}'")]
    InvalidNumber(String),

    #[error("invalid base64 binary value: '{0}'")]
    InvalidBase64(String),

    #[error("value of kind {0} has no plain text form")]
    NotScalar(String),

    #[error("malformed typed value: {0}")]
    MalformedTyped(String),

    #[error("invalid type tag: {0}")]
    InvalidTypeTag(String),
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("missing required column: {0}")]
    MissingColumn(&'static str),

    #[error("column '{0}' belongs to a key that is not configured")]
    UnexpectedColumn(&'static str),

    #[error("invalid delete flag '{0}', expected Y, N or blank")]
    InvalidDeleteFlag(String),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("table key '{name}' holds unsupported value kind {tag}")]
    UnsupportedKeyKind { name: String, tag: String },

    #[error("item is missing table key attribute '{0}'")]
    MissingTableKey(String),
}

pub type Result<T> = std::result::Result<T, Error>;
