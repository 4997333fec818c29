//! Channel endpoints and the RPC wire protocol.
//!
//! This module provides the duplex endpoint both primitives are built on and
//! the envelopes exchanged between parent and worker processes.

pub mod connection;
pub mod protocol;

pub use connection::Connection;
pub use protocol::{CallEnvelope, Response, SHUTDOWN_METHOD};
