//! Worker-side dispatch loop.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ipc::{CallEnvelope, Connection, Response};
use crate::serialize::Serializer;
use crate::value::{Kwargs, Value};

use super::registry::CommandRegistry;
use super::trace;

/// Dispatch loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Not started yet.
    Idle,
    /// Waiting for the next call.
    Listening,
    /// Running a handler.
    Dispatching,
    /// Sending the response.
    Responding,
    /// Loop exited; the endpoint is closed.
    Stopped,
}

/// Why the dispatch loop exited normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The parent sent the shutdown signal.
    Shutdown,
    /// The parent closed its endpoint.
    PeerClosed,
}

/// Worker half of an RPC channel: the registry, the context and the loop.
pub struct RpcWorker<C = ()> {
    conn: Connection,
    serializer: Arc<dyn Serializer>,
    registry: CommandRegistry<C>,
    context: Option<Arc<C>>,
    state: WorkerState,
}

impl<C> RpcWorker<C> {
    /// Create a worker over its endpoint.
    ///
    /// The serializer must match the one used by the parent.
    pub fn new(conn: Connection, serializer: Arc<dyn Serializer>) -> Self {
        Self {
            conn,
            serializer,
            registry: CommandRegistry::new(),
            context: None,
            state: WorkerState::Idle,
        }
    }

    /// Register a command. Must happen before [`run`](Self::run).
    pub fn command<F>(&mut self, name: impl Into<String>, handler: F) -> Result<&mut Self>
    where
        F: Fn(Option<&C>, &[Value], &Kwargs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.registry.register(name, handler)?;
        Ok(self)
    }

    /// Register a function item under its own name.
    pub fn command_fn<F>(&mut self, handler: F) -> Result<&mut Self>
    where
        F: Fn(Option<&C>, &[Value], &Kwargs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.registry.register_fn(handler)?;
        Ok(self)
    }

    /// Install the context passed to every handler.
    ///
    /// Like registration, this must happen before [`run`](Self::run): the
    /// loop holds the worker for its whole run.
    pub fn set_context(&mut self, context: C) -> &mut Self {
        self.context = Some(Arc::new(context));
        self
    }

    /// Install a context that is also held elsewhere. Must happen before
    /// [`run`](Self::run).
    pub fn set_shared_context(&mut self, context: Arc<C>) -> &mut Self {
        self.context = Some(context);
        self
    }

    pub fn registry(&self) -> &CommandRegistry<C> {
        &self.registry
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Run the dispatch loop until shutdown, peer closure, or a fatal error.
    ///
    /// Handler failures are reported to the caller and never stop the loop.
    /// Undecodable input is fatal. On exit the endpoint is closed, so the
    /// parent sees [`Error::Closed`] instead of waiting forever.
    pub fn run(&mut self) -> Result<StopReason> {
        tracing::info!(
            "RPC worker started ({} commands, {} serializer)",
            self.registry.len(),
            self.serializer.name()
        );

        let outcome = self.serve();
        self.state = WorkerState::Stopped;

        if let Err(e) = self.conn.close() {
            tracing::debug!("Failed to close worker endpoint: {}", e);
        }

        match &outcome {
            Ok(StopReason::Shutdown) => tracing::info!("RPC worker stopped by shutdown signal"),
            Ok(StopReason::PeerClosed) => tracing::info!("RPC worker stopped: channel closed"),
            Err(e) => tracing::error!("Critical worker error: {}", e),
        }
        outcome
    }

    fn serve(&mut self) -> Result<StopReason> {
        loop {
            self.state = WorkerState::Listening;
            let bytes = match self.conn.recv() {
                Ok(bytes) => bytes,
                Err(Error::Closed) => return Ok(StopReason::PeerClosed),
                Err(e) => return Err(e),
            };

            let call = CallEnvelope::decode(self.serializer.as_ref(), &bytes)?;
            if call.is_shutdown() {
                tracing::debug!("Shutdown signal received");
                return Ok(StopReason::Shutdown);
            }

            self.state = WorkerState::Dispatching;
            let method = call.method.clone();
            let response = self.dispatch(call);

            self.state = WorkerState::Responding;
            let payload = self.encode_response(&method, response)?;
            match self.conn.send(&payload) {
                Ok(()) => {}
                Err(Error::Closed) => return Ok(StopReason::PeerClosed),
                Err(e) => return Err(e),
            }
        }
    }

    /// Run one call through the registry, collapsing every failure into an
    /// error response.
    fn dispatch(&self, call: CallEnvelope) -> Response {
        let Some(handler) = self.registry.get(&call.method) else {
            tracing::debug!("Unknown method '{}'", call.method);
            return Response::Error(format!("Method {} not found", call.method));
        };

        let context = self.context.as_deref();
        let outcome = trace::catch_panic(|| handler(context, &call.args, &call.kwargs));

        match outcome {
            Ok(Ok(data)) => Response::Ok(data),
            Ok(Err(e)) => {
                tracing::debug!("Command '{}' failed: {}", call.method, e);
                Response::Error(format!(
                    "Command '{}' failed: {}",
                    call.method,
                    trace::render_error(&e)
                ))
            }
            Err(report) => {
                tracing::warn!(
                    "Command '{}' panicked at {}: {}",
                    call.method,
                    report.location,
                    report.message
                );
                Response::Error(format!(
                    "Command '{}' panicked at {}: {}\n\nStack backtrace:\n{}",
                    call.method, report.location, report.message, report.trace
                ))
            }
        }
    }

    /// Encode a response. A result the serializer cannot represent is
    /// replaced by an error response so the caller still gets a reply.
    fn encode_response(&self, method: &str, response: Response) -> Result<Vec<u8>> {
        match response.encode(self.serializer.as_ref()) {
            Ok(payload) => Ok(payload),
            Err(Error::Serialization(message)) => {
                tracing::warn!("Result of '{}' is not serializable: {}", method, message);
                Response::Error(format!(
                    "Result of '{}' could not be serialized: {}",
                    method, message
                ))
                .encode(self.serializer.as_ref())
            }
            Err(e) => Err(e),
        }
    }
}
