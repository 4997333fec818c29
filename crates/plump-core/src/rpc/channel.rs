//! RPC channel: both endpoints plus the worker's registry, before the split.

use std::sync::Arc;

use crate::config::ChannelConfig;
use crate::error::Result;
use crate::ipc::Connection;
use crate::serialize::Serializer;
use crate::value::{Kwargs, Value};

use super::client::RpcClient;
use super::worker::RpcWorker;

/// A freshly created RPC channel.
///
/// Owns a linked endpoint pair. Commands and the context are set up here,
/// then [`split`](Self::split) hands the client to the parent role and the
/// worker to the process (or thread) that runs the dispatch loop.
///
/// # Example
///
/// ```
/// use plump_core::{Kwargs, RpcChannel, Value};
///
/// let mut channel: RpcChannel = RpcChannel::new().unwrap();
/// channel
///     .command("add", |_, args, _| {
///         let a = args[0].as_i64().unwrap_or(0);
///         let b = args[1].as_i64().unwrap_or(0);
///         Ok(Value::from(a + b))
///     })
///     .unwrap();
///
/// let (client, mut worker) = channel.split();
/// let handle = std::thread::spawn(move || worker.run());
///
/// let sum = client.call("add", vec![2.into(), 3.into()], Kwargs::new()).unwrap();
/// assert_eq!(sum, Value::from(5));
///
/// client.stop_worker();
/// handle.join().unwrap().unwrap();
/// ```
pub struct RpcChannel<C = ()> {
    client: RpcClient,
    worker: RpcWorker<C>,
}

impl<C> RpcChannel<C> {
    /// Create a channel with the default configuration (binary serializer).
    pub fn new() -> Result<Self> {
        Self::with_config(&ChannelConfig::default())
    }

    /// Create a channel from a configuration.
    pub fn with_config(config: &ChannelConfig) -> Result<Self> {
        let (parent, child) = Connection::pair()?;
        Ok(Self::from_parts(
            parent.with_max_frame_len(config.max_frame_len),
            child.with_max_frame_len(config.max_frame_len),
            config.build_serializer(),
        ))
    }

    /// Create a channel with a specific serializer.
    pub fn with_serializer(serializer: Arc<dyn Serializer>) -> Result<Self> {
        let (parent, child) = Connection::pair()?;
        Ok(Self::from_parts(parent, child, serializer))
    }

    fn from_parts(parent: Connection, child: Connection, serializer: Arc<dyn Serializer>) -> Self {
        Self {
            client: RpcClient::new(parent, serializer.clone()),
            worker: RpcWorker::new(child, serializer),
        }
    }

    /// Register a worker command.
    ///
    /// Register everything before the worker starts its loop.
    pub fn command<F>(&mut self, name: impl Into<String>, handler: F) -> Result<&mut Self>
    where
        F: Fn(Option<&C>, &[Value], &Kwargs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.worker.command(name, handler)?;
        Ok(self)
    }

    /// Register a function item under its own name.
    pub fn command_fn<F>(&mut self, handler: F) -> Result<&mut Self>
    where
        F: Fn(Option<&C>, &[Value], &Kwargs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.worker.command_fn(handler)?;
        Ok(self)
    }

    /// Install the context passed first to every command.
    pub fn set_context(&mut self, context: C) -> &mut Self {
        self.worker.set_context(context);
        self
    }

    /// The parent-side handle.
    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    /// Separate the parent and worker roles.
    pub fn split(self) -> (RpcClient, RpcWorker<C>) {
        (self.client, self.worker)
    }
}
