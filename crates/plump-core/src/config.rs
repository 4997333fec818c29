//! Channel configuration.

use std::sync::Arc;

use crate::serialize::{Serializer, SerializerKind};

/// Default upper bound on a single frame (100MB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

/// Settings shared by RPC channels and broadcast queues.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Serialization strategy for envelopes and broadcast items.
    pub serializer: SerializerKind,
    /// Frames announcing a larger payload are rejected.
    pub max_frame_len: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            serializer: SerializerKind::Binary,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ChannelConfig {
    /// Default configuration with the given serializer.
    pub fn with_serializer(serializer: SerializerKind) -> Self {
        Self {
            serializer,
            ..Self::default()
        }
    }

    pub(crate) fn build_serializer(&self) -> Arc<dyn Serializer> {
        self.serializer.build()
    }
}
