use crate::codec::FormatDescriptor;
use crate::core::namespace::{DATATYPE_KEY, SAMPLE_RATE_KEY};
use crate::core::SampleSource;
use crate::engine::flowgraph::{Flowgraph, FlowgraphStats};
use crate::nodes::{SigmfSink, SigmfSource, SinkConfig, SourceConfig};
use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;
use tracing::{info, warn};

/// Global fields that are not copied into a cropped recording
const SKIPPED_GLOBAL_KEYS: [&str; 3] = ["core:sha512", DATATYPE_KEY, "core:offset"];

/// A crop position: a plain sample count or a duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CropPoint {
    Samples(u64),
    Seconds(f64),
}

impl CropPoint {
    /// Parse `"1000"`, `"1.5s"`, `"2m"` or `"1h"`. A fraction needs a unit.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || anyhow!("invalid crop position: {text:?}");

        let (number, multiplier) = match text.chars().last() {
            Some('s') => (&text[..text.len() - 1], 1.0),
            Some('m') => (&text[..text.len() - 1], 60.0),
            Some('h') => (&text[..text.len() - 1], 3600.0),
            _ => {
                if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                return text.parse().map(CropPoint::Samples).map_err(|_| invalid());
            }
        };

        let (whole, frac) = match number.split_once('.') {
            Some((whole, frac)) => (whole, Some(frac)),
            None => (number, None),
        };
        let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if !digits(whole) || frac.is_some_and(|f| !digits(f)) {
            return Err(invalid());
        }
        let value: f64 = number.parse().map_err(|_| invalid())?;
        Ok(CropPoint::Seconds(value * multiplier))
    }

    /// Resolve to samples, rounding durations up.
    pub fn to_samples(&self, sample_rate: Option<f64>) -> Result<u64> {
        match *self {
            CropPoint::Samples(n) => Ok(n),
            CropPoint::Seconds(seconds) => {
                let rate = sample_rate
                    .ok_or_else(|| anyhow!("no sample rate in source file, can't convert a duration"))?;
                Ok((seconds * rate).ceil() as u64)
            }
        }
    }
}

/// Any two of start, end and length
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CropRange {
    pub start: Option<String>,
    pub end: Option<String>,
    pub length: Option<String>,
}

impl CropRange {
    pub fn start_length(start: impl Into<String>, length: impl Into<String>) -> Self {
        Self {
            start: Some(start.into()),
            end: None,
            length: Some(length.into()),
        }
    }

    pub fn start_end(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
            length: None,
        }
    }

    /// `(start, length)` in samples.
    pub fn resolve(&self, sample_rate: Option<f64>) -> Result<(u64, u64)> {
        let parse = |field: &Option<String>, name: &str| -> Result<Option<u64>> {
            field
                .as_deref()
                .map(|text| {
                    CropPoint::parse(text)
                        .and_then(|p| p.to_samples(sample_rate))
                        .with_context(|| format!("failed to parse crop {name}"))
                })
                .transpose()
        };
        let start = parse(&self.start, "start")?;
        let end = parse(&self.end, "end")?;
        let length = parse(&self.length, "length")?;

        let (start, length) = match (start, end, length) {
            (Some(start), Some(end), None) => {
                if end <= start {
                    bail!("end is before start");
                }
                (start, end - start)
            }
            (Some(start), None, Some(length)) => (start, length),
            (None, Some(end), Some(length)) => {
                let start = end
                    .checked_sub(length)
                    .ok_or_else(|| anyhow!("length reaches before the start of the file"))?;
                (start, length)
            }
            (Some(_), Some(_), Some(_)) => bail!("too many arguments supplied for crop"),
            _ => bail!("not enough arguments supplied for crop"),
        };
        if length == 0 {
            bail!("crop length must be greater than 0");
        }
        Ok((start, length))
    }
}

/// Copy a section of `input` into a new recording at `output`.
///
/// Captures and annotations inside the section follow through the tag
/// stream; global fields are copied except the hash, datatype and offset.
pub async fn crop(input: impl AsRef<Path>, output: impl AsRef<Path>, range: &CropRange) -> Result<FlowgraphStats> {
    let input = input.as_ref();
    let output = output.as_ref();

    let header = SigmfSource::new(SourceConfig::new(input.to_string_lossy()))
        .with_context(|| format!("failed to open {}", input.display()))?;
    let sample_rate = header
        .global_meta()
        .get(SAMPLE_RATE_KEY)
        .and_then(|v| v.as_number().ok());
    let (start, length) = range.resolve(sample_rate)?;

    let available = header.playable_len();
    if start >= available {
        bail!("crop start {start} is outside file ({available} samples)");
    }
    if length > available - start {
        warn!(start, length, available, "specified limits go beyond the extent of the file");
    }

    // The copy runs in the host byte order; the sink writes that suffix
    let format = FormatDescriptor {
        endianness: None,
        ..*header.output_format()
    };
    let datatype = format.to_string();
    let num_channels = header.num_outputs();
    let global = header.global_meta().clone();
    drop(header);

    let source = SigmfSource::new(SourceConfig::new(input.to_string_lossy()).with_datatype(datatype.clone()))?;
    let sink = SigmfSink::new(
        SinkConfig::new(datatype)
            .with_channels(num_channels)
            .with_filename(output.to_string_lossy()),
    )
    .context("failed to create output recording")?;

    let handle = sink.handle();
    for (key, value) in global.iter() {
        if SKIPPED_GLOBAL_KEYS.contains(&key) {
            continue;
        }
        handle
            .set_global_meta(key, value.clone())
            .with_context(|| format!("failed to copy global field {key}"))?;
    }

    info!(input = ?input, output = ?output, start, length, "cropping recording");
    Flowgraph::new(source, sink)
        .with_skip(start)
        .with_limit(Some(length))
        .run()
        .await
}
