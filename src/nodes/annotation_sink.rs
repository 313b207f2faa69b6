use crate::core::namespace::{DATETIME_KEY, SAMPLE_COUNT_KEY, SAMPLE_START_KEY};
use crate::core::{MetaNamespace, MetaValue, TimeMode, TimeSpec};
use crate::error::{Error, Result};
use crate::meta::{meta_path_from_data, to_data_path, MetadataFile};
use crate::observability::BlockMetrics;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, error, info};

const TIME_KEY: &str = "time";
const DURATION_KEY: &str = "duration";

/// What to do with annotation fields already in the recording.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "filter", rename_all = "snake_case")]
pub enum AnnotationMode {
    #[default]
    Keep,
    /// Remove fields whose key matches the glob (`*`, `?`); empty matches all
    Clear(String),
}

/// Shell-style match of `text` against `pattern`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

/// Adds annotations to an existing recording's metadata.
///
/// Annotation messages are JSON objects keyed either by
/// `core:sample_start`/`core:sample_count` or by `time`/`duration`
/// (`[secs, frac]` pairs). A message matching an existing annotation's start
/// and count is merged into it. The metadata file is rewritten on `stop`.
pub struct AnnotationSink {
    meta_path: PathBuf,
    meta: MetadataFile,
    time_mode: TimeMode,
    sample_rate: Option<f64>,
    /// Datetime of the first capture, the zero point in absolute mode
    start_time: Option<TimeSpec>,
    metrics: Arc<BlockMetrics>,
}

impl AnnotationSink {
    pub fn new(filename: impl AsRef<Path>, mode: AnnotationMode, time_mode: TimeMode) -> Result<Self> {
        let meta_path = meta_path_from_data(to_data_path(filename));
        let mut meta = MetadataFile::load_path(&meta_path)?;

        if let AnnotationMode::Clear(filter) = &mode {
            for annotation in &mut meta.annotations {
                let doomed: Vec<String> = annotation
                    .keys()
                    .filter(|key| *key != SAMPLE_START_KEY && *key != SAMPLE_COUNT_KEY)
                    .filter(|key| glob_match(filter, key))
                    .map(str::to_string)
                    .collect();
                for key in doomed {
                    annotation.delete(&key);
                }
            }
        }

        let sample_rate = meta.sample_rate();
        let start_time = match time_mode {
            TimeMode::Relative => None,
            TimeMode::Absolute => {
                let datetime = meta
                    .captures
                    .first()
                    .ok_or_else(|| Error::MissingField("captures".to_string()))?
                    .get_str(DATETIME_KEY)?;
                Some(TimeSpec::parse_iso8601(datetime)?)
            }
        };

        info!(path = ?meta_path, annotations = meta.annotations.len(), "annotation sink opened");
        Ok(Self {
            meta_path,
            meta,
            time_mode,
            sample_rate,
            start_time,
            metrics: Arc::new(BlockMetrics::new("annotation_sink")),
        })
    }

    pub fn meta_path(&self) -> &Path {
        &self.meta_path
    }

    pub fn global_meta(&self) -> &MetaNamespace {
        &self.meta.global
    }

    pub fn capture_segments(&self) -> &[MetaNamespace] {
        &self.meta.captures
    }

    pub fn annotations(&self) -> &[MetaNamespace] {
        &self.meta.annotations
    }

    pub fn metrics(&self) -> Arc<BlockMetrics> {
        self.metrics.clone()
    }

    fn seconds_to_samples(&self, seconds: f64) -> Result<u64> {
        let rate = self
            .sample_rate
            .filter(|rate| *rate > 0.0)
            .ok_or_else(|| Error::MissingField("core:sample_rate".to_string()))?;
        if seconds < 0.0 {
            return Err(Error::type_mismatch(TIME_KEY, "time after the recording start"));
        }
        Ok((seconds * rate).round() as u64)
    }

    /// Resolve `time`/`duration` into a sample range.
    fn time_range(&self, time: &MetaValue, duration: &MetaValue) -> Result<(u64, u64)> {
        let time = TimeSpec::from_value(time)?;
        let duration = TimeSpec::from_value(duration)?;
        let offset = match (self.time_mode, &self.start_time) {
            (TimeMode::Absolute, Some(start)) => time.seconds_since(start),
            _ => time.as_secs_f64(),
        };
        Ok((
            self.seconds_to_samples(offset)?,
            self.seconds_to_samples(duration.as_secs_f64())?,
        ))
    }

    /// Add or merge one annotation message.
    pub fn add_annotation(&mut self, msg: &Value) -> Result<()> {
        let Value::Object(map) = msg else {
            return Err(Error::InvalidCommand("annotation message is not an object".to_string()));
        };
        let fields = MetaNamespace::from_json_map(map);

        let (start, count) = match (fields.get(TIME_KEY), fields.get(DURATION_KEY)) {
            (Some(time), Some(duration)) => self.time_range(time, duration)?,
            _ => (fields.sample_start()?, fields.sample_count()?),
        };

        let mut annotation = MetaNamespace::annotation(start, count);
        for (key, value) in fields.iter() {
            if matches!(key, TIME_KEY | DURATION_KEY | SAMPLE_START_KEY | SAMPLE_COUNT_KEY) {
                continue;
            }
            annotation.set(key, value.clone())?;
        }

        let existing = self.meta.annotations.iter_mut().find(|a| {
            a.sample_start().ok() == Some(start) && a.sample_count().ok() == Some(count)
        });
        match existing {
            Some(existing) => existing.merge(&annotation),
            None => self.meta.annotations.push(annotation),
        }
        debug!(sample_start = start, sample_count = count, "annotation added");
        Ok(())
    }

    /// Apply an annotation message; failures are logged and dropped.
    pub fn handle_message(&mut self, msg: &Value) {
        if let Err(e) = self.add_annotation(msg) {
            error!(message = %msg, error = %e, "dropping annotation");
            self.metrics.record_command_dropped();
        } else {
            self.metrics.record_tags(1);
        }
    }

    /// Rewrite the metadata file in place.
    pub fn stop(&mut self) -> Result<()> {
        let dir = match self.meta_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let temp = NamedTempFile::new_in(dir).map_err(|e| Error::io_at(dir, e))?;
        let mut writer = BufWriter::new(temp);
        self.meta.save(&mut writer)?;
        let temp = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        temp.persist(&self.meta_path)
            .map_err(|e| Error::io_at(&self.meta_path, e.error))?;

        info!(path = ?self.meta_path, annotations = self.meta.annotations.len(), "annotations written");
        Ok(())
    }
}
