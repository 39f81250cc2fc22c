//! Broadcast messages on the `{market}:{account}:O_channel` topic.

use serde_json::{Map, Value};

use crate::store::{SIGNAL_CLEAR, SIGNAL_ONLINE};
use crate::types::error::{SyncError, SyncResult};

/// Field-wise order update keyed by exchange id.
pub type OrderPatch = Map<String, Value>;

/// Parsed order channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorMessage {
    /// Drop the market's mirror and mark it not ready.
    Clear,
    /// Bootstrap the market's mirror unless already ready.
    Online,
    /// Incremental merge of `{id: order}` patches.
    Merge(Vec<(String, OrderPatch)>),
}

impl MirrorMessage {
    /// Parses a raw broadcast payload.
    ///
    /// Order values may be JSON objects or strings holding serialized JSON
    /// objects.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Serialization` for anything that is neither a
    /// control signal nor a JSON object of order objects.
    pub fn parse(raw: &str) -> SyncResult<Self> {
        match raw.trim() {
            SIGNAL_CLEAR => return Ok(MirrorMessage::Clear),
            SIGNAL_ONLINE => return Ok(MirrorMessage::Online),
            _ => {}
        }

        let root: Map<String, Value> = serde_json::from_str(raw)?;
        let mut patches = Vec::with_capacity(root.len());
        for (id, value) in root {
            let patch = match value {
                Value::Object(map) => map,
                Value::String(text) => serde_json::from_str::<Map<String, Value>>(&text)?,
                other => {
                    return Err(SyncError::Serialization(format!(
                        "order {} is not an object: {}",
                        id, other
                    )));
                }
            };
            patches.push((id, patch));
        }
        Ok(MirrorMessage::Merge(patches))
    }
}
