//! Error type shared by the storage backends, the network capability and the
//! interceptor.

/// Errors raised by cache storage, network and response handling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A named cache store could not be opened or created.
    #[error("failed to open cache store '{name}': {reason}")]
    StoreOpen { name: String, reason: String },

    /// A named cache store could not be deleted.
    #[error("failed to delete cache store '{name}': {reason}")]
    StoreDelete { name: String, reason: String },

    /// The request never settled into a response (connectivity, DNS, TLS, blocked).
    #[error("network request failed: {0}")]
    Network(String),

    /// The response body was already consumed.
    #[error("response body already used")]
    BodyUsed,

    /// A request URL could not be parsed or resolved.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Filesystem failure in the disk backend.
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry metadata could not be encoded or decoded.
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored entry is unreadable or inconsistent.
    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, Error>;
