use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The connection to the store could not be established or re-established.
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Store operation timed out after {0}ms")]
    Timeout(u64),

    /// The backend refused the command (used by the in-memory store when taken offline).
    #[error("Store unavailable")]
    Unavailable,

    #[error("Operation against a key holding the wrong kind of value: {0}")]
    WrongType(String),

    #[error("Value is not an integer or out of range: {0}")]
    NotInteger(String),

    /// The expiry is too far in the future for the store to represent.
    #[error("Expiry out of range: {0:?}")]
    InvalidTtl(std::time::Duration),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Whether a retry of the same command could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CacheError::Timeout(_) | CacheError::Unavailable => true,
            #[cfg(feature = "redis")]
            CacheError::Redis(e) => {
                e.is_io_error() || e.is_timeout() || e.is_connection_dropped()
            }
            _ => false,
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, CacheError::Connection(_))
    }

    /// Whether the established connection is no longer usable and must be reopened.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            #[cfg(feature = "redis")]
            CacheError::Redis(e) => {
                e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error()
            }
            _ => false,
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
