//! Redis Streams transport (one stream per queue, XADD per event).
//!
//! - **Stream keys**: `{prefix}:{queue}`, e.g. `censudx:inventory_updates`
//! - **Fields**: `event_type`, `product_id`, `sequence_number`, `payload` (JSON)
//! - **Trimming**: approximate `MAXLEN` so streams stay bounded
//!
//! Consumers read with consumer groups and deduplicate on
//! `(product_id, sequence_number)`; retries from the outbox may re-add an
//! entry that was already written.
//!
//! One connection is kept open and reused. Connect, read and write are all
//! bounded by [`IO_TIMEOUT`]; any error drops the connection so the next send
//! reconnects.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, instrument};

use censudx_events::{Event, EventEnvelope, Queue, Transport, TransportError};

/// Default stream key prefix.
const DEFAULT_STREAM_PREFIX: &str = "censudx";

/// Default approximate stream length cap.
const DEFAULT_MAX_LEN: usize = 100_000;

/// Bound on connecting and on each command round trip.
pub const IO_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RedisStreamsTransport {
    client: Arc<redis::Client>,
    connection: Mutex<Option<redis::Connection>>,
    stream_prefix: String,
    max_len: usize,
}

impl std::fmt::Debug for RedisStreamsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamsTransport")
            .field("stream_prefix", &self.stream_prefix)
            .field("max_len", &self.max_len)
            .finish_non_exhaustive()
    }
}

impl RedisStreamsTransport {
    /// Create a transport for `redis_url` (e.g. "redis://localhost:6379").
    ///
    /// Only validates the URL; the connection is opened on first use.
    pub fn new(redis_url: impl AsRef<str>, stream_prefix: Option<String>) -> Result<Self, TransportError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| TransportError::Unavailable(format!("invalid redis url: {e}")))?;

        Ok(Self {
            client: Arc::new(client),
            connection: Mutex::new(None),
            stream_prefix: stream_prefix.unwrap_or_else(|| DEFAULT_STREAM_PREFIX.to_string()),
            max_len: DEFAULT_MAX_LEN,
        })
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn stream_key(&self, queue: Queue) -> String {
        format!("{}:{}", self.stream_prefix, queue.as_str())
    }

    fn connect(&self) -> redis::RedisResult<redis::Connection> {
        let conn = self.client.get_connection_with_timeout(IO_TIMEOUT)?;
        conn.set_read_timeout(Some(IO_TIMEOUT))?;
        conn.set_write_timeout(Some(IO_TIMEOUT))?;
        debug!(stream_prefix = %self.stream_prefix, "redis connection opened");
        Ok(conn)
    }

    /// Run `f` on the shared connection, opening it if needed. The connection
    /// is discarded when `f` fails.
    fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<R>,
    ) -> redis::RedisResult<R> {
        let mut slot = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => self.connect()?,
        };
        let result = f(&mut conn);
        if result.is_ok() {
            *slot = Some(conn);
        }
        result
    }
}

impl Transport for RedisStreamsTransport {
    #[instrument(
        skip(self, envelope),
        fields(
            queue = %queue,
            product_id = %envelope.payload().product_id(),
            sequence_number = envelope.sequence_number()
        ),
        err
    )]
    fn send(&self, queue: Queue, envelope: &EventEnvelope) -> Result<(), TransportError> {
        let payload = envelope
            .to_json()
            .map_err(|e| TransportError::Serialization(e.to_string()))?;

        let key = self.stream_key(queue);
        let event_type = envelope.payload().event_type();
        let product_id = envelope.payload().product_id().as_str();

        self.with_connection(|conn| {
            redis::cmd("XADD")
                .arg(&key)
                .arg("MAXLEN")
                .arg("~")
                .arg(self.max_len)
                .arg("*")
                .arg("event_type")
                .arg(event_type)
                .arg("product_id")
                .arg(product_id)
                .arg("sequence_number")
                .arg(envelope.sequence_number())
                .arg("payload")
                .arg(&payload)
                .query::<String>(conn)
        })
        .map_err(map_redis_error)?;

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.with_connection(|conn| redis::cmd("PING").query::<String>(conn))
            .is_ok()
    }
}

fn map_redis_error(err: redis::RedisError) -> TransportError {
    if err.is_io_error() || err.is_connection_refusal() || err.is_timeout() {
        TransportError::Unavailable(err.to_string())
    } else {
        TransportError::Rejected(err.to_string())
    }
}
