//! One-directional broadcast queue from a producer to a consumer.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use crate::config::ChannelConfig;
use crate::error::{Error, Result};
use crate::ipc::Connection;
use crate::serialize::Serializer;
use crate::value::Value;

/// Broadcast queue over one channel pair.
///
/// The producer half lives in the process that emits events (usually the
/// worker), the consumer half in the process that reacts to them. Either
/// half may be wired later with [`set_producer`](Self::set_producer) and
/// [`set_consumer`](Self::set_consumer). Items are delivered in the order
/// they were broadcast; items still in flight when the channel closes are
/// lost.
pub struct BroadcastQueue {
    serializer: Arc<dyn Serializer>,
    producer: RwLock<Option<Arc<Connection>>>,
    consumer: RwLock<Option<Arc<Connection>>>,
    /// Serializes producers within this process.
    producer_lock: Mutex<()>,
}

impl BroadcastQueue {
    /// Create a queue with neither half wired.
    pub fn new(serializer: Arc<dyn Serializer>) -> Self {
        Self {
            serializer,
            producer: RwLock::new(None),
            consumer: RwLock::new(None),
            producer_lock: Mutex::new(()),
        }
    }

    /// Create an unwired queue from a configuration.
    pub fn with_config(config: &ChannelConfig) -> Self {
        Self::new(config.build_serializer())
    }

    /// Create a queue whose producer and consumer halves are the two ends
    /// of one fresh pair.
    pub fn linked(serializer: Arc<dyn Serializer>) -> Result<Self> {
        let (producer, consumer) = Connection::pair()?;
        let queue = Self::new(serializer);
        queue.set_producer(producer);
        queue.set_consumer(consumer);
        Ok(queue)
    }

    /// Wire the producer half.
    pub fn set_producer(&self, conn: Connection) {
        *self.producer.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(conn));
    }

    /// Wire the consumer half.
    pub fn set_consumer(&self, conn: Connection) {
        *self.consumer.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(conn));
    }

    pub fn has_producer(&self) -> bool {
        self.producer_conn().is_some()
    }

    pub fn has_consumer(&self) -> bool {
        self.consumer_conn().is_some()
    }

    /// Unwire and shut down the producer half. The consumer sees end-of-stream.
    pub fn close_producer(&self) {
        let conn = self.producer.write().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(conn) = conn {
            if let Err(e) = conn.close() {
                tracing::debug!("Failed to close broadcast producer: {}", e);
            }
        }
    }

    /// Unwire and shut down the consumer half.
    pub fn close_consumer(&self) {
        let conn = self.consumer.write().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(conn) = conn {
            if let Err(e) = conn.close() {
                tracing::debug!("Failed to close broadcast consumer: {}", e);
            }
        }
    }

    /// Send one item to the consumer.
    pub fn broadcast(&self, item: impl Into<Value>) -> Result<()> {
        let producer = self.producer_conn().ok_or_else(|| {
            Error::Connection(
                "broadcast producer not initialized; call set_producer() in the emitting process"
                    .to_string(),
            )
        })?;

        let _guard = self.producer_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let payload = self.serializer.dumps(&item.into())?;
        producer.send(&payload)
    }

    /// Block until the next item arrives.
    ///
    /// Returns [`Error::Closed`] once the producer side is gone.
    pub fn get(&self) -> Result<Value> {
        let consumer = self.require_consumer()?;
        self.read_item(&consumer)
    }

    /// Whether an item is ready within `timeout`, without consuming it.
    ///
    /// Returns `false` straight away when no consumer is wired. A closed
    /// channel reports `true`; the following [`get`](Self::get) returns
    /// [`Error::Closed`].
    pub fn poll(&self, timeout: Duration) -> bool {
        let Some(consumer) = self.consumer_conn() else {
            return false;
        };

        consumer.poll(timeout).unwrap_or_else(|e| {
            tracing::debug!("Broadcast poll failed: {}", e);
            false
        })
    }

    /// Consume items on the calling thread until the channel closes.
    ///
    /// Meant for a dedicated thread. Extra arguments are captured by the
    /// callback closure. A callback that fails or panics is logged and the
    /// loop moves on to the next item.
    pub fn setup_listener<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(Value) -> anyhow::Result<()>,
    {
        let consumer = self.require_consumer()?;
        tracing::info!("Broadcast listener started");

        loop {
            match self.read_item(&consumer) {
                Ok(item) => {
                    match panic::catch_unwind(AssertUnwindSafe(|| callback(item))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::error!("Error in broadcast listener: {:?}", e),
                        Err(_) => tracing::error!("Broadcast listener callback panicked"),
                    }
                }
                Err(Error::Closed) => {
                    tracing::info!("Broadcast channel closed. Stopping listener.");
                    return Ok(());
                }
                Err(e @ Error::Serialization(_)) => {
                    // The frame was consumed whole, so the stream is still in sync.
                    tracing::error!("Dropping undecodable broadcast item: {}", e);
                }
                Err(e) => {
                    tracing::error!("Broadcast listener stopped: {}", e);
                    return Err(e);
                }
            }
        }
    }

    pub(crate) fn read_item(&self, conn: &Connection) -> Result<Value> {
        let bytes = conn.recv()?;
        self.serializer.loads(&bytes)
    }

    pub(crate) fn require_consumer(&self) -> Result<Arc<Connection>> {
        self.consumer_conn().ok_or_else(|| {
            Error::Connection(
                "broadcast consumer not initialized; call set_consumer() in the receiving process"
                    .to_string(),
            )
        })
    }

    fn producer_conn(&self) -> Option<Arc<Connection>> {
        self.producer.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn consumer_conn(&self) -> Option<Arc<Connection>> {
        self.consumer.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
