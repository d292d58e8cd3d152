//! Event codecs for the spill tier
//!
//! The spill store only deals in bytes. An [`EventCodec`] turns a
//! [`LogMinerEvent`] into an opaque value and back. The encoding is internal
//! to a single process lifetime and carries no cross-version guarantee.
//!
//! - [`PostcardCodec`] (default): compact, fast
//! - [`JsonCodec`]: human readable, useful when inspecting a spill file

use crate::error::Result;
use crate::event::LogMinerEvent;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Serializes events to and from spill store values.
pub trait EventCodec: Send + Sync {
    /// Codec name for logging
    fn name(&self) -> &'static str;

    /// Encode one event
    fn encode(&self, event: &LogMinerEvent) -> Result<Vec<u8>>;

    /// Decode one event
    fn decode(&self, bytes: &[u8]) -> Result<LogMinerEvent>;
}

/// postcard-based codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostcardCodec;

impl EventCodec for PostcardCodec {
    fn name(&self) -> &'static str {
        "postcard"
    }

    fn encode(&self, event: &LogMinerEvent) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(event)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<LogMinerEvent> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl EventCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, event: &LogMinerEvent) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(event)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<LogMinerEvent> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Codec selection in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    #[default]
    Postcard,
    Json,
}

impl CodecKind {
    /// Instantiate the selected codec
    pub fn build(self) -> Arc<dyn EventCodec> {
        match self {
            CodecKind::Postcard => Arc::new(PostcardCodec),
            CodecKind::Json => Arc::new(JsonCodec),
        }
    }
}
