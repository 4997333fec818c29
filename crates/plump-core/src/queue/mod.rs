//! Broadcast queue: unsolicited events from worker to parent.
//!
//! Three ways to consume: blocking [`BroadcastQueue::get`] (with
//! [`BroadcastQueue::poll`] to check first), a blocking listener loop for a
//! dedicated thread, and an async listener driven by the tokio reactor.

mod broadcast;
mod listener;

pub use broadcast::BroadcastQueue;
pub use listener::{ItemHandler, ListenerHandle};
