use super::value::MetaValue;
use std::fmt;

/// Tag keys, classified once when a tag enters the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TagKey {
    /// `rx_time`: device timestamp as `[secs, frac]`
    Time,
    /// `rx_rate`: sample rate
    Rate,
    /// `rx_freq`: center frequency
    Freq,
    /// `packet_len`: sample count of the annotation it rides on
    PacketLen,
    Other(String),
}

impl TagKey {
    pub fn parse(key: &str) -> Self {
        match key {
            "rx_time" => TagKey::Time,
            "rx_rate" => TagKey::Rate,
            "rx_freq" => TagKey::Freq,
            "packet_len" => TagKey::PacketLen,
            other => TagKey::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TagKey::Time => "rx_time",
            TagKey::Rate => "rx_rate",
            TagKey::Freq => "rx_freq",
            TagKey::PacketLen => "packet_len",
            TagKey::Other(key) => key,
        }
    }

    /// Time, rate and frequency tags shape capture segments (or the global
    /// object); everything else lands in annotations.
    pub fn affects_capture(&self) -> bool {
        matches!(self, TagKey::Time | TagKey::Rate | TagKey::Freq)
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for TagKey {
    fn from(key: &str) -> Self {
        TagKey::parse(key)
    }
}

/// A sample-indexed side-channel event.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Absolute item offset in the stream
    pub offset: u64,
    pub key: TagKey,
    pub value: MetaValue,
}

impl Tag {
    pub fn new(offset: u64, key: impl Into<TagKey>, value: impl Into<MetaValue>) -> Self {
        Self {
            offset,
            key: key.into(),
            value: value.into(),
        }
    }
}
