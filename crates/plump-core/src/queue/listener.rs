//! Event-loop integrated consumer for [`BroadcastQueue`].
//!
//! The consumer endpoint's fd is registered with the tokio reactor. Each
//! readiness notification drains every item currently available, not just
//! one, so a burst that arrives behind a single edge is never stranded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::ipc::Connection;
use crate::value::Value;

use super::broadcast::BroadcastQueue;

type TaskFn = dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;
type BlockingFn = dyn Fn(Value) -> anyhow::Result<()> + Send + Sync;

/// Callback for the async listener.
#[derive(Clone)]
pub enum ItemHandler {
    /// Async callback; each item is spawned as its own task.
    Task(Arc<TaskFn>),
    /// Synchronous callback; each item runs on the blocking pool so a slow
    /// callback never stalls the runtime.
    Blocking(Arc<BlockingFn>),
}

impl ItemHandler {
    /// Wrap an async callback.
    pub fn task<F, Fut>(callback: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        ItemHandler::Task(Arc::new(move |item| callback(item).boxed()))
    }

    /// Wrap a synchronous callback.
    pub fn blocking<F>(callback: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        ItemHandler::Blocking(Arc::new(callback))
    }

    /// Hand one item off. Fire-and-forget: no ordering between items.
    fn dispatch(&self, item: Value) {
        match self {
            ItemHandler::Task(callback) => {
                let fut = callback(item);
                tokio::spawn(async move {
                    if let Err(e) = fut.await {
                        tracing::error!("Async listener callback failed: {:?}", e);
                    }
                });
            }
            ItemHandler::Blocking(callback) => {
                let callback = Arc::clone(callback);
                tokio::task::spawn_blocking(move || {
                    if let Err(e) = callback(item) {
                        tracing::error!("Async listener callback failed: {:?}", e);
                    }
                });
            }
        }
    }
}

/// Handle to a running async listener.
///
/// Dropping the handle leaves the listener running.
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stop watching the channel.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the listener exits (channel closed or aborted).
    pub async fn join(self) -> Result<()> {
        match self.task.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(Error::Task(format!("async listener failed: {}", e))),
        }
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Drain {
    /// Nothing more to read right now.
    Pending,
    /// The producer side is gone.
    Closed,
}

impl BroadcastQueue {
    /// Watch the consumer half from the current tokio runtime.
    ///
    /// Must be called from within a runtime. Returns immediately; items are
    /// handed to `handler` as they arrive. The listener stops and
    /// deregisters itself when the producer side closes.
    pub fn setup_async_listener(self: &Arc<Self>, handler: ItemHandler) -> Result<ListenerHandle> {
        let consumer = self.require_consumer()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            Error::InvalidOperation("async listener requires a running tokio runtime".to_string())
        })?;

        let readiness = AsyncFd::with_interest(consumer, Interest::READABLE)?;
        let queue = Arc::clone(self);
        let task = runtime.spawn(async move { queue.watch(readiness, handler).await });

        Ok(ListenerHandle { task })
    }

    async fn watch(self: Arc<Self>, readiness: AsyncFd<Arc<Connection>>, handler: ItemHandler) {
        tracing::info!("Async broadcast listener started");

        loop {
            let mut guard = match readiness.readable().await {
                Ok(guard) => guard,
                Err(e) => {
                    tracing::error!("Async listener lost readiness registration: {}", e);
                    break;
                }
            };

            match self.drain(readiness.get_ref(), |item| handler.dispatch(item)) {
                Drain::Pending => guard.clear_ready(),
                Drain::Closed => {
                    tracing::info!("Async listener: channel closed.");
                    break;
                }
            }
        }
        // Dropping `readiness` removes the fd from the reactor.
    }

    /// Read every item available right now from `conn`.
    pub(crate) fn drain(&self, conn: &Connection, mut sink: impl FnMut(Value)) -> Drain {
        loop {
            match conn.poll(Duration::ZERO) {
                Ok(true) => {}
                Ok(false) => return Drain::Pending,
                Err(e) => {
                    tracing::error!("Async listener poll failed: {}", e);
                    return Drain::Pending;
                }
            }

            match self.read_item(conn) {
                Ok(item) => sink(item),
                Err(Error::Closed) => return Drain::Closed,
                Err(e @ Error::Serialization(_)) => {
                    tracing::error!("Async listener error: {}", e);
                }
                Err(e) => {
                    tracing::error!("Async listener error: {}", e);
                    return Drain::Pending;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::BinarySerializer;

    #[test]
    fn test_drain_takes_whole_burst_in_order() {
        let queue = BroadcastQueue::linked(Arc::new(BinarySerializer)).unwrap();
        for i in 0..5 {
            queue.broadcast(i).unwrap();
        }

        let conn = queue.require_consumer().unwrap();
        let mut items = Vec::new();
        assert_eq!(queue.drain(&conn, |item| items.push(item)), Drain::Pending);
        assert_eq!(items, (0..5).map(Value::from).collect::<Vec<_>>());

        // Nothing left for the next pass.
        assert_eq!(queue.drain(&conn, |item| items.push(item)), Drain::Pending);
        assert_eq!(items.len(), 5);
    }

    #[test]
    fn test_drain_reports_close_after_items() {
        let queue = BroadcastQueue::linked(Arc::new(BinarySerializer)).unwrap();
        queue.broadcast("last").unwrap();
        queue.close_producer();

        let conn = queue.require_consumer().unwrap();
        let mut items = Vec::new();
        assert_eq!(queue.drain(&conn, |item| items.push(item)), Drain::Closed);
        assert_eq!(items, vec![Value::from("last")]);
    }

    #[test]
    fn test_requires_runtime() {
        let queue = Arc::new(BroadcastQueue::linked(Arc::new(BinarySerializer)).unwrap());
        let err = queue
            .setup_async_listener(ItemHandler::blocking(|_| Ok(())))
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_requires_consumer() {
        let queue = Arc::new(BroadcastQueue::new(Arc::new(BinarySerializer)));
        let err = queue
            .setup_async_listener(ItemHandler::blocking(|_| Ok(())))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Connection(_)));
    }
}
