mod client;
mod codec;
mod documents;
mod error;
mod keys;
mod memory;
mod queue;
mod rate_limit;
#[cfg(feature = "redis")]
mod redis;
mod retry;
mod session;
mod traits;
mod value;

// Public API exports
pub use client::{ClientOptions, ConnectionState, StoreClient};
pub use codec::Codec;
pub use documents::{DocumentStatus, ProcessingState};
pub use error::{CacheError, CacheResult};
pub use keys::CacheKeys;
pub use memory::{MemoryConnector, MemoryStore};
pub use rate_limit::RateLimitDecision;
#[cfg(feature = "redis")]
pub use self::redis::{RedisConnector, RedisStore};
pub use retry::Idempotency;
pub use session::SessionRecord;
pub use traits::{Connector, KeyTtl, ListEnd, ServerInfo, SetMode, SetOptions, Store};
pub use value::{Map, Value};
