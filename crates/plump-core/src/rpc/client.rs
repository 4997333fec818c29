//! Caller-side RPC handle.

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::ipc::{CallEnvelope, Connection, Response};
use crate::serialize::Serializer;
use crate::value::{Kwargs, Value};

/// Parent half of an RPC channel.
///
/// Cloning shares the endpoint. Calls made through any clone are serialized:
/// one request is in flight per channel pair at any time, and a second caller
/// waits for the first response before sending.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    conn: Connection,
    serializer: Arc<dyn Serializer>,
    /// Held from send until the matching response is read.
    call_lock: Mutex<()>,
}

impl RpcClient {
    /// Create a client over its endpoint.
    pub fn new(conn: Connection, serializer: Arc<dyn Serializer>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                conn,
                serializer,
                call_lock: Mutex::new(()),
            }),
        }
    }

    /// Call `method` and block until the worker replies.
    ///
    /// A failure inside the worker surfaces as [`Error::Worker`]; a worker
    /// that is gone surfaces as [`Error::Closed`].
    pub fn call(&self, method: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value> {
        self.invoke(CallEnvelope {
            method: method.to_string(),
            args,
            kwargs,
        })
    }

    /// Send a prepared envelope and block until the worker replies.
    pub fn invoke(&self, call: CallEnvelope) -> Result<Value> {
        if call.is_shutdown() {
            return Err(Error::InvalidOperation(
                "the shutdown signal has no reply; use stop_worker()".to_string(),
            ));
        }

        let payload = call.encode(self.inner.serializer.as_ref())?;

        let guard = self
            .inner
            .call_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.conn.send(&payload)?;
        let reply = self.inner.conn.recv()?;
        drop(guard);

        Response::decode(self.inner.serializer.as_ref(), &reply)?.into_result()
    }

    /// Async variant of [`call`](Self::call).
    ///
    /// The blocking call runs on tokio's blocking pool. Dropping the returned
    /// future does not cancel it: the worker still completes the call and the
    /// reply is read and discarded before the next call can proceed.
    pub async fn acall(&self, method: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value> {
        self.ainvoke(CallEnvelope {
            method: method.to_string(),
            args,
            kwargs,
        })
        .await
    }

    /// Async variant of [`invoke`](Self::invoke).
    pub async fn ainvoke(&self, call: CallEnvelope) -> Result<Value> {
        let client = self.clone();
        tokio::task::spawn_blocking(move || client.invoke(call))
            .await
            .map_err(|e| Error::Task(format!("offloaded call failed: {}", e)))?
    }

    /// Ask the worker to stop. Best effort: errors are logged and ignored,
    /// so this is safe to call after the worker has already exited.
    pub fn stop_worker(&self) {
        let sent = CallEnvelope::shutdown()
            .encode(self.inner.serializer.as_ref())
            .and_then(|payload| self.inner.conn.send(&payload));

        match sent {
            Ok(()) => tracing::debug!("Shutdown signal sent"),
            Err(e) => tracing::debug!("Shutdown signal not delivered: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::BinarySerializer;

    #[test]
    fn test_invoke_rejects_shutdown() {
        let (parent, _child) = Connection::pair().unwrap();
        let client = RpcClient::new(parent, Arc::new(BinarySerializer));
        assert!(matches!(
            client.invoke(CallEnvelope::shutdown()),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_stop_worker_is_idempotent_after_close() {
        let (parent, child) = Connection::pair().unwrap();
        let client = RpcClient::new(parent, Arc::new(BinarySerializer));
        drop(child);

        client.stop_worker();
        client.stop_worker();
    }

    #[test]
    fn test_call_without_worker_fails_closed() {
        let (parent, child) = Connection::pair().unwrap();
        let client = RpcClient::new(parent, Arc::new(BinarySerializer));
        drop(child);

        let err = client.call("anything", vec![], Kwargs::new()).unwrap_err();
        assert!(err.is_disconnect(), "{:?}", err);
    }

    #[test]
    fn test_call_reads_matching_reply() {
        let (parent, child) = Connection::pair().unwrap();
        let client = RpcClient::new(parent, Arc::new(BinarySerializer));

        // Hand-rolled worker: check the envelope, answer once.
        let responder = std::thread::spawn(move || {
            let call = CallEnvelope::decode(&BinarySerializer, &child.recv().unwrap()).unwrap();
            assert_eq!(call.method, "ping");
            let reply = Response::Ok(Value::from("pong")).encode(&BinarySerializer).unwrap();
            child.send(&reply).unwrap();
        });

        let out = client.call("ping", vec![], Kwargs::new()).unwrap();
        assert_eq!(out, Value::from("pong"));
        responder.join().unwrap();
    }
}
