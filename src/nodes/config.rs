use crate::core::TimeMode;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn from_json_value<T: DeserializeOwned>(config: Value) -> Result<T> {
    serde_json::from_value(config).map_err(|e| Error::InvalidConfig(e.to_string()))
}

fn default_channels() -> usize {
    1
}

/// Sink construction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Dataset format, e.g. `cf32`; the host endianness suffix is added
    pub datatype: String,

    /// Initial output target; empty starts the sink idle
    #[serde(default)]
    pub filename: String,

    #[serde(default)]
    pub time_mode: TimeMode,

    #[serde(default = "default_channels")]
    pub num_channels: usize,

    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub hw: Option<String>,
}

impl SinkConfig {
    pub fn new(datatype: impl Into<String>) -> Self {
        Self {
            datatype: datatype.into(),
            filename: String::new(),
            time_mode: TimeMode::default(),
            num_channels: 1,
            author: None,
            description: None,
            license: None,
            hw: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn with_time_mode(mut self, time_mode: TimeMode) -> Self {
        self.time_mode = time_mode;
        self
    }

    pub fn with_channels(mut self, num_channels: usize) -> Self {
        self.num_channels = num_channels;
        self
    }

    pub fn from_json(config: Value) -> Result<Self> {
        from_json_value(config)
    }
}

/// Source construction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Data or metadata path of the recording
    pub filename: String,

    /// Runtime sample format; defaults to the file's own datatype
    #[serde(default)]
    pub datatype: Option<String>,

    #[serde(default)]
    pub repeat: bool,

    /// Tag key emitted at the start of every pass over the file
    #[serde(default)]
    pub begin_tag: Option<String>,
}

impl SourceConfig {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            datatype: None,
            repeat: false,
            begin_tag: None,
        }
    }

    pub fn with_datatype(mut self, datatype: impl Into<String>) -> Self {
        self.datatype = Some(datatype.into());
        self
    }

    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_begin_tag(mut self, key: impl Into<String>) -> Self {
        self.begin_tag = Some(key.into());
        self
    }

    pub fn from_json(config: Value) -> Result<Self> {
        from_json_value(config)
    }
}
