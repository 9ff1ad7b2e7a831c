use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EdfError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Malformed annotation data: {0}")]
    MalformedAnnotation(String),

    #[error("Short read: requested {requested} bytes, got {got}")]
    ShortRead { requested: usize, got: usize },

    #[error("Range [{start}, {end}] outside recording bounds [0, {max}]")]
    OutOfRange { start: f64, end: f64, max: f64 },

    #[error("Signal index {0} out of range")]
    InvalidSignalIndex(usize),

    #[error("Reader is not initialised")]
    NotInitialised,

    #[error("Reader is already initialised")]
    AlreadyInitialised,

    #[error("Corrupted record: start timestamp {found} overlaps expected {expected}")]
    CorruptedRecord { expected: f64, found: f64 },

    #[error("Recording too large for cache budget: {needed} > {budget} bytes")]
    CacheTooSmall { needed: usize, budget: usize },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Cache engine is no longer running")]
    EngineGone,
}

pub type Result<T> = std::result::Result<T, EdfError>;
