use thiserror::Error;

/// Errors surfaced by index builds, queries and the stores behind them.
#[derive(Error, Debug)]
pub enum Error {
    /// A document or index store could not be read or written.
    #[error("store unavailable: {0}")]
    Store(String),

    /// The text normalizer rejected its input.
    #[error("normalization failed: {0}")]
    Normalization(String),

    #[error("index build cancelled")]
    Cancelled,

    #[error("index build deadline exceeded")]
    DeadlineExceeded,

    /// A bulk data file could not be read.
    #[error("ingest error: {0}")]
    Ingest(String),
}

impl Error {
    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }

    /// Store failures may clear up on their own; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Store(_))
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Store(format!("codec: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Store(format!("meta codec: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
