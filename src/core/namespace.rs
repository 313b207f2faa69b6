use super::value::MetaValue;
use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::io::Write;

pub const DATATYPE_KEY: &str = "core:datatype";
pub const VERSION_KEY: &str = "core:version";
pub const SAMPLE_RATE_KEY: &str = "core:sample_rate";
pub const SAMPLE_START_KEY: &str = "core:sample_start";
pub const SAMPLE_COUNT_KEY: &str = "core:sample_count";
pub const FREQUENCY_KEY: &str = "core:frequency";
pub const DATETIME_KEY: &str = "core:datetime";
pub const NUM_CHANNELS_KEY: &str = "core:num_channels";

/// SigMF version stamped into newly built global objects.
pub const SIGMF_VERSION: &str = "1.0.0";

/// Ordered key/value document backing one global, capture or annotation object.
///
/// Keys keep insertion order; overwriting a key keeps its original position so
/// repeated writes of the same content serialize identically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaNamespace {
    entries: Vec<(String, MetaValue)>,
}

impl MetaNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Global object seeded with datatype and version.
    pub fn global(datatype: &str, version: &str) -> Self {
        let mut ns = Self::new();
        ns.insert_raw(DATATYPE_KEY, datatype.into());
        ns.insert_raw(VERSION_KEY, version.into());
        ns
    }

    /// Capture segment starting at `sample_start`.
    pub fn capture(sample_start: u64) -> Self {
        let mut ns = Self::new();
        ns.insert_raw(SAMPLE_START_KEY, sample_start.into());
        ns
    }

    /// Annotation segment covering `[sample_start, sample_start + sample_count)`.
    pub fn annotation(sample_start: u64, sample_count: u64) -> Self {
        let mut ns = Self::new();
        ns.insert_raw(SAMPLE_START_KEY, sample_start.into());
        ns.insert_raw(SAMPLE_COUNT_KEY, sample_count.into());
        ns
    }

    /// Check a key against the `namespace:name` grammar, where both parts are
    /// non-empty runs of ASCII letters, digits or underscores.
    pub fn validate_key(key: &str) -> bool {
        fn is_word(part: &str) -> bool {
            !part.is_empty() && part.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
        }

        match key.split_once(':') {
            Some((ns, name)) => is_word(ns) && is_word(name),
            None => false,
        }
    }

    /// Set a field, rejecting keys outside the `namespace:name` grammar.
    pub fn set(&mut self, key: &str, value: impl Into<MetaValue>) -> Result<()> {
        if !Self::validate_key(key) {
            return Err(Error::InvalidKey(key.to_string()));
        }
        self.insert_raw(key, value.into());
        Ok(())
    }

    /// Insert without key validation. Used for documents read from disk, whose
    /// nested objects (GeoJSON and the like) carry free-form keys.
    pub(crate) fn insert_raw(&mut self, key: &str, value: MetaValue) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_or(&self, key: &str, default: MetaValue) -> MetaValue {
        self.get(key).cloned().unwrap_or(default)
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove a field, returning its previous value.
    pub fn delete(&mut self, key: &str) -> Option<MetaValue> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy every field of `other` into this namespace, overwriting on conflict.
    pub fn merge(&mut self, other: &MetaNamespace) {
        for (key, value) in other.iter() {
            self.insert_raw(key, value.clone());
        }
    }

    /// Required unsigned field.
    pub fn get_u64(&self, key: &str) -> Result<u64> {
        self.get(key)
            .ok_or_else(|| Error::MissingField(key.to_string()))?
            .as_u64()
            .map_err(|_| Error::type_mismatch(key, "uint64"))
    }

    /// Required string field.
    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| Error::MissingField(key.to_string()))?
            .as_str()
            .map_err(|_| Error::type_mismatch(key, "string"))
    }

    /// Optional numeric field widened to f64.
    pub fn get_number(&self, key: &str) -> Result<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_number()
                .map(Some)
                .map_err(|_| Error::type_mismatch(key, "number")),
        }
    }

    pub fn sample_start(&self) -> Result<u64> {
        self.get_u64(SAMPLE_START_KEY)
    }

    pub fn sample_count(&self) -> Result<u64> {
        self.get_u64(SAMPLE_COUNT_KEY)
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::with_capacity(self.entries.len());
        for (key, value) in &self.entries {
            map.insert(key.clone(), value.to_json());
        }
        Value::Object(map)
    }

    /// Build from a JSON value, which must be an object.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_json_map(map)),
            _ => Err(Error::type_mismatch("metadata namespace", "object")),
        }
    }

    /// `core:sample_rate` is coerced to float because some producers write it
    /// as an integer; any other type is dropped with a warning. `null` fields
    /// are dropped.
    pub(crate) fn from_json_map(map: &Map<String, Value>) -> Self {
        let mut ns = Self::new();
        for (key, raw) in map {
            let value = if key == SAMPLE_RATE_KEY {
                raw.as_f64().map(MetaValue::Float64)
            } else {
                MetaValue::from_json(raw)
            };
            match value {
                Some(value) => ns.insert_raw(key, value),
                None if raw.is_null() => tracing::debug!(key = %key, "dropping null metadata field"),
                None => tracing::warn!(key = %key, found = %raw, "dropping non-numeric sample rate"),
            }
        }
        ns
    }

    /// Write the namespace as a pretty-printed JSON object.
    pub fn serialize<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, &self.to_json()).map_err(|e| {
            Error::Io(e.into())
        })
    }
}
