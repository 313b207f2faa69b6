use crate::core::MetaValue;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Out-of-band requests accepted by the sink.
///
/// On the wire these are JSON objects tagged by `"command"`, e.g.
/// `{"command": "open", "filename": "/data/rec"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SinkCommand {
    Open {
        filename: String,
    },
    Close,
    SetGlobalMeta {
        key: String,
        val: Value,
    },
    SetCaptureMeta {
        index: usize,
        key: String,
        val: Value,
    },
    SetAnnotationMeta {
        sample_start: u64,
        sample_count: u64,
        key: String,
        val: Value,
    },
}

/// Out-of-band requests accepted by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SourceCommand {
    SetBeginTag { tag: Option<String> },
}

impl SinkCommand {
    pub fn from_message(msg: &Value) -> Result<Self> {
        serde_json::from_value(msg.clone()).map_err(|e| Error::InvalidCommand(e.to_string()))
    }
}

impl SourceCommand {
    pub fn from_message(msg: &Value) -> Result<Self> {
        serde_json::from_value(msg.clone()).map_err(|e| Error::InvalidCommand(e.to_string()))
    }
}

/// Convert a command payload; `null` is not a metadata value.
pub(crate) fn command_value(val: &Value) -> Result<MetaValue> {
    MetaValue::from_json(val).ok_or_else(|| Error::InvalidCommand("null metadata value".to_string()))
}
