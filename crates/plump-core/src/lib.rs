//! Parent/worker IPC primitives.
//!
//! This crate provides:
//! - Length-prefixed duplex endpoints over Unix domain sockets
//! - Pluggable value serializers (binary via bincode, textual via JSON)
//! - Request/response RPC with a worker-side command registry
//! - A broadcast queue with blocking, polling and async consumers
//!
//! Channels and queues are plain values: the owning process constructs them
//! and passes them where they are needed. There are no global instances.

pub mod config;
pub mod error;
pub mod ipc;
pub mod queue;
pub mod rpc;
pub mod serialize;
pub mod value;

pub use config::ChannelConfig;
pub use error::{Error, Result};
pub use ipc::{CallEnvelope, Connection, Response, SHUTDOWN_METHOD};
pub use queue::{BroadcastQueue, ItemHandler, ListenerHandle};
pub use rpc::{CommandRegistry, Handler, RpcChannel, RpcClient, RpcWorker, StopReason, WorkerState};
pub use serialize::{BinarySerializer, JsonSerializer, Serializer, SerializerKind};
pub use value::{Kwargs, Value};
