//! Error types for maildew-core.

use thiserror::Error;

/// Result type alias using maildew-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for maildew-core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Path discovery error.
    #[error("path error: {0}")]
    Path(String),

    /// Storage engine error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Column bytes were not valid UTF-8.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Key lookup found nothing.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// A write was attempted inside `Store::view`.
    #[error("cannot write inside a read-only transaction")]
    ReadOnlyTransaction,

    /// Another thread panicked while holding the store.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// A stored key does not follow the `table.column.owner.row` layout.
    #[error("malformed key: {0}")]
    MalformedKey(String),

    /// No field of the destination record matches an entry's column.
    #[error("no matching field for column: {0}")]
    NoMatchingField(String),

    /// Entry bytes could not be decoded into the destination field.
    #[error("unable to decode column {column}: {reason}")]
    Decode { column: String, reason: String },

    /// Sequence requested with a zero-width lease.
    #[error("sequence bandwidth must be greater than zero")]
    ZeroBandwidth,

    /// Sequence counter cannot be advanced further.
    #[error("sequence exhausted: {0}")]
    SequenceExhausted(String),

    /// Persisted lease boundary is not an eight byte counter.
    #[error("corrupt sequence counter: {0}")]
    CorruptSequence(String),

    /// Allocated number does not fit a row identifier.
    #[error("row identifier {0} out of range")]
    RowIdOverflow(u64),

    /// No server address could be derived from the username.
    #[error("unable to resolve server address for {0}")]
    UnresolvableAddress(String),

    /// Connecting to the remote endpoint failed.
    #[error("failed to dial to address {addr}: {reason}")]
    Dial { addr: String, reason: String },

    /// Authenticating against the remote endpoint failed.
    #[error("failed to login to account at {addr}: {reason}")]
    Login { addr: String, reason: String },

    /// Listing, selecting or fetching failed on the remote side.
    #[error("{0}")]
    Remote(String),

    /// Operation needs a remote connection but none has been established.
    #[error("not connected")]
    NotConnected,
}

impl From<imap::Error> for Error {
    fn from(err: imap::Error) -> Self {
        Error::Remote(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
