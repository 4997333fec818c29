//! Request/response RPC between a parent and a worker.
//!
//! The worker owns a [`CommandRegistry`] and runs the dispatch loop in
//! [`RpcWorker::run`]; the parent issues calls through an [`RpcClient`].
//! Exactly one call is in flight per channel pair.

mod channel;
mod client;
mod registry;
mod trace;
mod worker;

pub use channel::RpcChannel;
pub use client::RpcClient;
pub use registry::{CommandRegistry, Handler};
pub use worker::{RpcWorker, StopReason, WorkerState};
