use crate::buffers::{Deinterleaver, ScratchBuffer};
use crate::codec::{parse_format, Converter, FormatDescriptor};
use crate::core::namespace::{DATETIME_KEY, FREQUENCY_KEY, SAMPLE_START_KEY};
use crate::core::{MetaNamespace, MetaValue, SampleSource, Tag, TagKey, TimeSpec, WorkStatus};
use crate::error::{Error, Result};
use crate::meta::{meta_path_from_data, to_data_path, MetadataFile};
use crate::nodes::command::SourceCommand;
use crate::nodes::config::SourceConfig;
use crate::observability::BlockMetrics;
use memmap2::Mmap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const UNKNOWN_PREFIX: &str = "unknown:";
const METADATA_ONLY_KEYS: [&str; 2] = ["core:metadata_only", "metadata_only"];

/// Read-only view of the data file. Empty files cannot be mapped.
enum DataView {
    Mapped(Mmap),
    Empty,
}

impl DataView {
    fn bytes(&self) -> &[u8] {
        match self {
            DataView::Mapped(map) => &map[..],
            DataView::Empty => &[],
        }
    }
}

/// Tag to re-emit for one metadata field, or `None` when the field carries no
/// stream event.
fn field_to_tag(key: &str, value: &MetaValue) -> Option<(TagKey, MetaValue)> {
    match key {
        SAMPLE_START_KEY => None,
        FREQUENCY_KEY => Some((TagKey::Freq, value.clone())),
        DATETIME_KEY => {
            let parsed = value
                .as_str()
                .and_then(TimeSpec::parse_iso8601)
                .map_err(|e| warn!(key, error = %e, "skipping unparseable capture datetime"))
                .ok()?;
            Some((TagKey::Time, parsed.to_value()))
        }
        other => {
            let stripped = other.strip_prefix(UNKNOWN_PREFIX).unwrap_or(other);
            Some((TagKey::parse(stripped), value.clone()))
        }
    }
}

/// Replays a SigMF recording as a sample stream with tags.
///
/// Capture and annotation fields become tags at their sample offsets, shifted
/// so the first capture segment starts the stream. With `repeat` the file
/// loops forever and every pass re-emits the timeline.
pub struct SigmfSource {
    data_path: PathBuf,
    meta: MetadataFile,
    data: DataView,
    converter: Converter,
    num_channels: usize,
    /// Samples in the file, counted in the on-disk format
    num_samples: u64,
    /// Whole frames (one sample per channel) in the file
    num_frames: u64,
    /// First capture segment's start, where every pass begins
    start_frame: u64,
    timeline: BTreeMap<u64, Vec<(TagKey, MetaValue)>>,
    repeat: bool,
    begin_tag: Option<TagKey>,
    repeat_count: u64,
    file_begin: bool,
    position: u64,
    nitems_written: u64,
    scratch: ScratchBuffer,
    splitter: Deinterleaver,
    metrics: Arc<BlockMetrics>,
}

impl SigmfSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let data_path = to_data_path(&config.filename);
        let meta_path = meta_path_from_data(&data_path);

        let meta = MetadataFile::load_path(&meta_path).map_err(|e| {
            error!(path = ?meta_path, error = %e, "failed to load metadata");
            e
        })?;
        if METADATA_ONLY_KEYS.iter().any(|key| meta.global.has(key)) {
            return Err(Error::InvalidFormat(format!(
                "{} is a metadata only dataset, nothing to stream",
                meta_path.display()
            )));
        }

        let input = meta.datatype()?;
        let output = match &config.datatype {
            Some(datatype) => parse_format(datatype)?,
            None => input,
        };
        let converter = Converter::new(input, output)?;
        let num_channels = meta.num_channels()?;

        let file = File::open(&data_path).map_err(|e| Error::io_at(&data_path, e))?;
        let len = file
            .metadata()
            .map_err(|e| Error::io_at(&data_path, e))?
            .len();
        let data = if len == 0 {
            DataView::Empty
        } else {
            // Safety: the mapping is read-only; the recording is not modified while replayed.
            let map = unsafe { Mmap::map(&file) }.map_err(|e| Error::io_at(&data_path, e))?;
            DataView::Mapped(map)
        };

        let num_samples = len / input.sample_size() as u64;
        let num_frames = num_samples / num_channels as u64;
        if num_samples % num_channels as u64 != 0 {
            warn!(
                path = ?data_path,
                num_samples,
                num_channels,
                "trailing partial frame ignored"
            );
        }

        let first_start = match meta.captures.first() {
            Some(capture) => capture.sample_start()?,
            None => 0,
        };
        let start_frame = first_start.min(num_frames);
        let timeline = build_timeline(&meta, first_start);

        info!(
            path = ?data_path,
            datatype = %input,
            output = %converter.dst(),
            num_samples,
            num_channels,
            "recording opened"
        );

        let splitter = Deinterleaver::new(num_channels, output.sample_size());
        Ok(Self {
            data_path,
            meta,
            data,
            converter,
            num_channels,
            num_samples,
            num_frames,
            start_frame,
            timeline,
            repeat: config.repeat,
            begin_tag: config.begin_tag.as_deref().map(TagKey::parse),
            repeat_count: 0,
            file_begin: true,
            position: start_frame,
            nitems_written: 0,
            scratch: ScratchBuffer::with_capacity(0xFFFF)?,
            splitter,
            metrics: Arc::new(BlockMetrics::new("sigmf_source")),
        })
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
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

    /// Samples in the data file, counted with the file's own sample size.
    pub fn num_samples(&self) -> u64 {
        self.num_samples
    }

    /// Items per channel produced by one pass over the file.
    pub fn playable_len(&self) -> u64 {
        self.num_frames - self.start_frame
    }

    pub fn output_format(&self) -> &FormatDescriptor {
        self.converter.dst()
    }

    /// Completed passes over the file
    pub fn repeat_count(&self) -> u64 {
        self.repeat_count
    }

    pub fn metrics(&self) -> Arc<BlockMetrics> {
        self.metrics.clone()
    }

    /// Emit `key` at the start of every pass, or stop emitting with `None`.
    pub fn set_begin_tag(&mut self, key: Option<&str>) {
        self.begin_tag = key.map(TagKey::parse);
    }

    pub fn apply(&mut self, command: SourceCommand) {
        match command {
            SourceCommand::SetBeginTag { tag } => self.set_begin_tag(tag.as_deref()),
        }
    }

    /// Apply a JSON command message; malformed ones are logged and dropped.
    pub fn handle_message(&mut self, msg: &Value) {
        match SourceCommand::from_message(msg) {
            Ok(command) => self.apply(command),
            Err(e) => {
                error!(message = %msg, error = %e, "dropping source command");
                self.metrics.record_command_dropped();
            }
        }
    }

    /// Push timeline tags for the absolute window `[start, start + len)`,
    /// splitting it at every pass boundary.
    fn emit_tags(&self, start: u64, len: u64, tags: &mut Vec<Tag>) {
        let pass_len = self.playable_len();
        if pass_len == 0 {
            return;
        }
        let mut start = start;
        let mut remaining = len;
        while remaining > 0 {
            let in_pass = start % pass_len;
            let pass_base = start - in_pass;
            let chunk = remaining.min(pass_len - in_pass);
            for (offset, entries) in self.timeline.range(in_pass..in_pass + chunk) {
                for (key, value) in entries {
                    tags.push(Tag::new(pass_base + offset, key.clone(), value.clone()));
                }
            }
            remaining -= chunk;
            start += chunk;
        }
    }

    /// Convert frames `[position, position + frames)` into the outputs at item
    /// index `at`.
    fn read_frames(&mut self, outputs: &mut [&mut [u8]], at: usize, frames: usize) -> Result<()> {
        let in_frame = self.converter.src().sample_size() * self.num_channels;
        let out_size = self.converter.dst().sample_size();
        let begin = self.position as usize * in_frame;
        let input = &self.data.bytes()[begin..begin + frames * in_frame];

        if self.num_channels == 1 {
            let out = &mut outputs[0][at * out_size..(at + frames) * out_size];
            self.converter.convert_into(input, out);
            return Ok(());
        }

        let converted = self.scratch.prepare(frames * self.num_channels * out_size)?;
        self.converter.convert_into(input, converted);
        let mut written = vec![at * out_size; self.num_channels];
        self.splitter
            .push(self.scratch.as_slice(), outputs, &mut written);
        Ok(())
    }
}

/// Offset-sorted tags from the global rate and every capture and annotation
/// field, with `shift` subtracted from each sample start.
fn build_timeline(meta: &MetadataFile, shift: u64) -> BTreeMap<u64, Vec<(TagKey, MetaValue)>> {
    let mut timeline: BTreeMap<u64, Vec<(TagKey, MetaValue)>> = BTreeMap::new();

    if let Some(rate) = meta.sample_rate() {
        timeline
            .entry(0)
            .or_default()
            .push((TagKey::Rate, MetaValue::Float64(rate)));
    }

    for segment in meta.captures.iter().chain(meta.annotations.iter()) {
        let Ok(start) = segment.sample_start() else {
            continue;
        };
        let Some(offset) = start.checked_sub(shift) else {
            warn!(sample_start = start, shift, "segment starts before the first capture");
            continue;
        };
        for (key, value) in segment.iter() {
            if let Some(entry) = field_to_tag(key, value) {
                timeline.entry(offset).or_default().push(entry);
            }
        }
    }

    debug!(offsets = timeline.len(), "tag timeline built");
    timeline
}

impl SampleSource for SigmfSource {
    fn item_size(&self) -> usize {
        self.converter.dst().sample_size()
    }

    fn num_outputs(&self) -> usize {
        self.num_channels
    }

    fn work(&mut self, outputs: &mut [&mut [u8]], nitems: usize, tags: &mut Vec<Tag>) -> Result<WorkStatus> {
        let out_size = self.item_size();
        if outputs.len() < self.num_channels
            || outputs.iter().any(|out| out.len() < nitems * out_size)
        {
            return Err(Error::type_mismatch(
                "output buffers",
                "one buffer per channel holding nitems samples",
            ));
        }

        let window_start = self.nitems_written;
        let first_tag = tags.len();
        let mut produced = 0usize;

        while produced < nitems {
            if self.file_begin {
                if let (Some(key), true) = (&self.begin_tag, self.playable_len() > 0) {
                    tags.push(Tag::new(
                        window_start + produced as u64,
                        key.clone(),
                        MetaValue::Int64(self.repeat_count as i64),
                    ));
                }
                self.position = self.start_frame;
                self.file_begin = false;
            }

            let available = self.num_frames - self.position;
            if available == 0 {
                if !self.repeat || self.playable_len() == 0 {
                    break;
                }
                self.repeat_count += 1;
                self.file_begin = true;
                debug!(path = ?self.data_path, repeat_count = self.repeat_count, "repeating recording");
                continue;
            }

            let frames = available.min((nitems - produced) as u64) as usize;
            self.read_frames(outputs, produced, frames)?;
            self.position += frames as u64;
            produced += frames;
        }

        self.emit_tags(window_start, produced as u64, tags);
        tags[first_tag..].sort_by_key(|tag| tag.offset);
        self.nitems_written += produced as u64;

        self.metrics.record_items(produced as u64);
        self.metrics.record_tags((tags.len() - first_tag) as u64);

        if produced == 0 {
            debug!(path = ?self.data_path, "end of recording");
            return Ok(WorkStatus::Done);
        }
        Ok(WorkStatus::Produced(produced))
    }
}
