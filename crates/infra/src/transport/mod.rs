//! Message transports: Redis Streams, and a log-only fallback.

pub mod logging;
#[cfg(feature = "redis")]
pub mod redis_streams;

pub use logging::LoggingTransport;
#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsTransport;
