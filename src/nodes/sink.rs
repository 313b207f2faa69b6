use crate::buffers::ScratchBuffer;
use crate::codec::{parse_format, Endianness, FormatDescriptor};
use crate::core::namespace::{
    DATETIME_KEY, FREQUENCY_KEY, NUM_CHANNELS_KEY, SAMPLE_COUNT_KEY, SAMPLE_RATE_KEY,
    SIGMF_VERSION,
};
use crate::core::{MetaNamespace, MetaValue, SampleSink, Tag, TagKey, TimeMode, TimeSpec};
use crate::engine::state::SinkState;
use crate::error::{Error, Result};
use crate::hal::GpsFix;
use crate::meta::MetadataFile;
use crate::nodes::command::{command_value, SinkCommand};
use crate::nodes::config::SinkConfig;
use crate::observability::BlockMetrics;
use crate::storage::{self, TempHandle};
use crossbeam_channel::Receiver;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Global fields that survive a rotation into a new file
const CARRIED_GLOBAL_KEYS: [&str; 6] = [
    SAMPLE_RATE_KEY,
    "core:description",
    "core:author",
    "core:license",
    "core:hw",
    NUM_CHANNELS_KEY,
];

const GPS_GENERATOR: &str = "USRP GPS Message";

/// The file currently receiving samples
#[derive(Debug)]
struct ActiveFile {
    handle: TempHandle,
}

/// A request staged by a command, applied on the next work call
#[derive(Debug)]
enum PendingFile {
    Open(TempHandle),
    Close,
}

/// Key of metadata collected while no file is installed
#[derive(Debug, Clone, PartialEq)]
enum PendingKey {
    Tag(TagKey),
    Field(String),
}

#[derive(Debug, Clone)]
struct PendingEntry {
    key: PendingKey,
    value: MetaValue,
    /// Stream offset at which the value was received
    offset: u64,
}

/// Host/device time pair captured at the first work call in relative mode
#[derive(Debug, Clone, Copy)]
struct RelativeClock {
    host_start: TimeSpec,
    device_start: TimeSpec,
}

struct SinkInner {
    datatype: String,
    item_size: usize,
    num_channels: usize,
    time_mode: TimeMode,
    state: SinkState,
    active: Option<ActiveFile>,
    pending: Option<PendingFile>,
    global: MetaNamespace,
    captures: Vec<MetaNamespace>,
    annotations: Vec<MetaNamespace>,
    pre_capture: Vec<PendingEntry>,
    nitems_read: u64,
    recording_start_offset: u64,
    relative_clock: Option<RelativeClock>,
    first_work_done: bool,
    meta_written: bool,
    last_finalized: Option<(PathBuf, PathBuf)>,
    scratch: ScratchBuffer,
    metrics: Arc<BlockMetrics>,
}

/// Writes a sample stream and its tags to SigMF recordings.
///
/// Commands arrive through [`SinkHandle`]s from any thread. They only stage
/// requests under the shared mutex; file swaps happen at the start of the
/// next `work` call.
pub struct SigmfSink {
    inner: Arc<Mutex<SinkInner>>,
    gps_rx: Option<Receiver<GpsFix>>,
    metrics: Arc<BlockMetrics>,
}

/// Cloneable command and inspection handle for a [`SigmfSink`].
#[derive(Clone)]
pub struct SinkHandle {
    inner: Arc<Mutex<SinkInner>>,
    metrics: Arc<BlockMetrics>,
}

/// Datatype string with the host endianness appended. A suffix naming the
/// other byte order is rejected.
fn with_native_endianness(datatype: &str) -> Result<(FormatDescriptor, String)> {
    let format = parse_format(datatype)?;
    match format.endianness {
        Some(e) if e != Endianness::native() => Err(Error::InvalidFormat(format!(
            "{datatype}: endianness does not match host"
        ))),
        _ => {
            let resolved = format.resolved();
            Ok((resolved, resolved.to_string()))
        }
    }
}

fn lock(inner: &Mutex<SinkInner>) -> MutexGuard<'_, SinkInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SigmfSink {
    pub fn new(config: SinkConfig) -> Result<Self> {
        let (format, datatype) = with_native_endianness(&config.datatype)?;
        if config.num_channels == 0 {
            return Err(Error::type_mismatch("num_channels", "positive integer"));
        }

        let mut global = MetaNamespace::global(&datatype, SIGMF_VERSION);
        if config.num_channels > 1 {
            global.set(NUM_CHANNELS_KEY, config.num_channels)?;
        }
        for (key, value) in [
            ("core:author", &config.author),
            ("core:description", &config.description),
            ("core:license", &config.license),
            ("core:hw", &config.hw),
        ] {
            if let Some(value) = value {
                global.set(key, value.as_str())?;
            }
        }

        let metrics = Arc::new(BlockMetrics::new("sigmf_sink"));
        let inner = SinkInner {
            datatype,
            item_size: format.sample_size(),
            num_channels: config.num_channels,
            time_mode: config.time_mode,
            state: SinkState::Idle,
            active: None,
            pending: None,
            global,
            captures: vec![MetaNamespace::capture(0)],
            annotations: Vec::new(),
            pre_capture: Vec::new(),
            nitems_read: 0,
            recording_start_offset: 0,
            relative_clock: None,
            first_work_done: false,
            meta_written: true,
            last_finalized: None,
            scratch: ScratchBuffer::with_capacity(0xFFFF)?,
            metrics: metrics.clone(),
        };

        let sink = Self {
            inner: Arc::new(Mutex::new(inner)),
            gps_rx: None,
            metrics,
        };
        if !config.filename.is_empty() {
            sink.handle().open(&config.filename)?;
        }
        Ok(sink)
    }

    /// Fold position fixes from `rx` into annotations.
    pub fn with_gps(mut self, rx: Receiver<GpsFix>) -> Self {
        self.gps_rx = Some(rx);
        self
    }

    pub fn handle(&self) -> SinkHandle {
        SinkHandle {
            inner: self.inner.clone(),
            metrics: self.metrics.clone(),
        }
    }

    pub fn metrics(&self) -> Arc<BlockMetrics> {
        self.metrics.clone()
    }
}

impl SampleSink for SigmfSink {
    fn item_size(&self) -> usize {
        lock(&self.inner).item_size
    }

    fn num_inputs(&self) -> usize {
        lock(&self.inner).num_channels
    }

    fn work(&mut self, inputs: &[&[u8]], nitems: usize, tags: &[Tag]) -> Result<usize> {
        let fixes: Vec<GpsFix> = match &self.gps_rx {
            Some(rx) => rx.try_iter().collect(),
            None => Vec::new(),
        };
        let mut inner = lock(&self.inner);
        inner.work(inputs, nitems, tags, &fixes)
    }

    fn stop(&mut self) -> Result<()> {
        lock(&self.inner).stop()
    }
}

impl Drop for SigmfSink {
    fn drop(&mut self) {
        if let Err(e) = lock(&self.inner).stop() {
            error!(error = %e, "failed to finalize recording on drop");
        }
    }
}

impl SinkHandle {
    /// Stage a new output file. The temp file is created right away; it
    /// replaces the current file on the next work call. On failure the sink
    /// keeps its current state.
    pub fn open(&self, filename: impl AsRef<Path>) -> Result<()> {
        let filename = filename.as_ref();
        if filename.as_os_str().is_empty() {
            return Ok(());
        }
        let handle = storage::open(filename).map_err(|e| {
            error!(path = ?filename, error = %e, "failed to open output file");
            e
        })?;
        let mut inner = lock(&self.inner);
        inner.stage(PendingFile::Open(handle));
        Ok(())
    }

    /// Stage closing the current file.
    pub fn close(&self) {
        lock(&self.inner).stage(PendingFile::Close);
    }

    pub fn set_global_meta(&self, key: &str, value: impl Into<MetaValue>) -> Result<()> {
        lock(&self.inner).global.set(key, value)
    }

    /// Set a field on capture segment `index`. While no file is installed the
    /// field is held back and lands on the next file's first segment.
    pub fn set_capture_meta(&self, index: usize, key: &str, value: impl Into<MetaValue>) -> Result<()> {
        if !MetaNamespace::validate_key(key) {
            return Err(Error::InvalidKey(key.to_string()));
        }
        let mut inner = lock(&self.inner);
        inner.set_capture_meta(index, key, value.into())
    }

    /// Set a field on the annotation covering exactly `[start, start + count)`,
    /// creating it if needed.
    pub fn set_annotation_meta(
        &self,
        sample_start: u64,
        sample_count: u64,
        key: &str,
        value: impl Into<MetaValue>,
    ) -> Result<()> {
        lock(&self.inner).set_annotation_meta(sample_start, sample_count, key, value.into())
    }

    /// Apply a JSON command message. Malformed or failing commands are logged
    /// and dropped; the sample stream is never affected.
    pub fn handle_message(&self, msg: &Value) {
        let result = SinkCommand::from_message(msg).and_then(|cmd| self.apply(cmd));
        if let Err(e) = result {
            error!(message = %msg, error = %e, "dropping sink command");
            self.metrics.record_command_dropped();
        }
    }

    pub fn apply(&self, command: SinkCommand) -> Result<()> {
        match command {
            SinkCommand::Open { filename } => self.open(filename),
            SinkCommand::Close => {
                self.close();
                Ok(())
            }
            SinkCommand::SetGlobalMeta { key, val } => self.set_global_meta(&key, command_value(&val)?),
            SinkCommand::SetCaptureMeta { index, key, val } => {
                self.set_capture_meta(index, &key, command_value(&val)?)
            }
            SinkCommand::SetAnnotationMeta {
                sample_start,
                sample_count,
                key,
                val,
            } => self.set_annotation_meta(sample_start, sample_count, &key, command_value(&val)?),
        }
    }

    pub fn state(&self) -> SinkState {
        lock(&self.inner).state
    }

    pub fn global_meta(&self) -> MetaNamespace {
        lock(&self.inner).global.clone()
    }

    pub fn capture_segments(&self) -> Vec<MetaNamespace> {
        lock(&self.inner).captures.clone()
    }

    pub fn annotations(&self) -> Vec<MetaNamespace> {
        lock(&self.inner).annotations.clone()
    }

    /// Final data path of the installed file, else of the staged one.
    pub fn data_path(&self) -> Option<PathBuf> {
        let inner = lock(&self.inner);
        inner.current_handle().map(|h| h.data_path().to_path_buf())
    }

    pub fn meta_path(&self) -> Option<PathBuf> {
        let inner = lock(&self.inner);
        inner.current_handle().map(|h| h.meta_path().to_path_buf())
    }

    /// Data and metadata paths of the most recently finalized recording.
    pub fn last_finalized(&self) -> Option<(PathBuf, PathBuf)> {
        lock(&self.inner).last_finalized.clone()
    }

    /// True once the installed file's metadata has been written (or when
    /// nothing is installed).
    pub fn metadata_written(&self) -> bool {
        lock(&self.inner).meta_written
    }

    /// Total items consumed over the sink's lifetime.
    pub fn nitems_read(&self) -> u64 {
        lock(&self.inner).nitems_read
    }

    pub fn stop(&self) -> Result<()> {
        lock(&self.inner).stop()
    }
}

impl SinkInner {
    fn transition(&mut self, next: SinkState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(&next) {
            warn!(from = self.state.name(), to = next.name(), "unexpected sink transition");
        }
        debug!(from = self.state.name(), to = next.name(), "sink state");
        self.state = next;
    }

    fn current_handle(&self) -> Option<&TempHandle> {
        match (&self.active, &self.pending) {
            (Some(active), _) => Some(&active.handle),
            (None, Some(PendingFile::Open(handle))) => Some(handle),
            _ => None,
        }
    }

    fn stage(&mut self, request: PendingFile) {
        let next = match (&request, self.active.is_some()) {
            (PendingFile::Open(_), false) => SinkState::Opening,
            (PendingFile::Open(_), true) => SinkState::Rotating,
            (PendingFile::Close, true) => SinkState::Active,
            (PendingFile::Close, false) => SinkState::Idle,
        };
        // A replaced staged open drops its temp file
        self.pending = match (request, self.active.is_some()) {
            (PendingFile::Close, false) => None,
            (request, _) => Some(request),
        };
        self.transition(next);
    }

    /// Install whatever was staged: finalize the old file, then start the new one.
    fn apply_pending(&mut self) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };

        if let Some(active) = self.active.take() {
            let finalized = self.finalize(active);
            self.reset_meta();
            if let Err(e) = finalized {
                // The staged request survives and is installed on the next call
                let next = match &pending {
                    PendingFile::Open(_) => SinkState::Opening,
                    PendingFile::Close => SinkState::Idle,
                };
                self.pending = Some(pending);
                self.transition(next);
                return Err(e);
            }
        }

        self.recording_start_offset = self.nitems_read;

        match pending {
            PendingFile::Open(handle) => {
                info!(path = ?handle.data_path(), offset = self.nitems_read, "recording started");
                self.active = Some(ActiveFile { handle });
                self.meta_written = false;
                self.start_first_capture();
                self.transition(SinkState::Active);
            }
            PendingFile::Close => {
                self.meta_written = true;
                self.transition(SinkState::Idle);
            }
        }
        Ok(())
    }

    fn finalize(&mut self, active: ActiveFile) -> Result<()> {
        let meta = MetadataFile {
            global: self.global.clone(),
            captures: self.captures.clone(),
            annotations: self.annotations.clone(),
        };
        let paths = storage::finalize(active.handle, &meta)?;
        self.meta_written = true;
        self.last_finalized = Some(paths);
        self.metrics.record_file_finalized();
        Ok(())
    }

    /// Rebuild global metadata for a new file, keeping dataset-wide fields.
    fn reset_meta(&mut self) {
        let mut global = MetaNamespace::global(&self.datatype, SIGMF_VERSION);
        for key in CARRIED_GLOBAL_KEYS {
            if let Some(value) = self.global.get(key) {
                global.insert_raw(key, value.clone());
            }
        }
        self.global = global;
        self.annotations.clear();
    }

    /// Seed the new file's first capture segment from metadata collected
    /// while no file was installed.
    fn start_first_capture(&mut self) {
        let mut first = MetaNamespace::capture(0);
        let entries = std::mem::take(&mut self.pre_capture);

        let pending_rate = entries.iter().find_map(|e| match e.key {
            PendingKey::Tag(TagKey::Rate) => e.value.as_number().ok(),
            _ => None,
        });
        let sample_rate = pending_rate.or_else(|| {
            self.global
                .get(SAMPLE_RATE_KEY)
                .and_then(|v| v.as_number().ok())
        });

        for entry in entries {
            match entry.key {
                PendingKey::Tag(TagKey::Time) => {
                    let Some(rate) = sample_rate.filter(|r| *r > 0.0) else {
                        warn!("dropping buffered rx_time: no sample rate known");
                        continue;
                    };
                    let time = match TimeSpec::from_value(&entry.value) {
                        Ok(t) => t,
                        Err(e) => {
                            warn!(error = %e, "dropping malformed buffered rx_time");
                            continue;
                        }
                    };
                    let elapsed = self.nitems_read.saturating_sub(entry.offset) as f64 / rate;
                    let at_open = self.device_to_host(time).offset_by(elapsed);
                    first.insert_raw(DATETIME_KEY, at_open.to_iso8601().into());
                }
                PendingKey::Tag(TagKey::Freq) => first.insert_raw(FREQUENCY_KEY, entry.value),
                PendingKey::Tag(TagKey::Rate) => match entry.value.as_number() {
                    Ok(rate) => self.global.insert_raw(SAMPLE_RATE_KEY, MetaValue::Float64(rate)),
                    Err(e) => warn!(error = %e, "dropping malformed buffered rx_rate"),
                },
                PendingKey::Tag(other) => {
                    debug!(key = %other, "ignoring buffered non-capture tag");
                }
                PendingKey::Field(key) => first.insert_raw(&key, entry.value),
            }
        }

        if !first.has(DATETIME_KEY) {
            info!("No core:datetime found, using host ts instead");
            first.insert_raw(DATETIME_KEY, TimeSpec::now().to_iso8601().into());
        }
        self.captures = vec![first];
    }

    /// Map a device timestamp to the stored timeline for the current mode.
    fn device_to_host(&self, time: TimeSpec) -> TimeSpec {
        match self.time_mode {
            TimeMode::Absolute => time,
            TimeMode::Relative => {
                let clock = self.relative_clock.unwrap_or(RelativeClock {
                    host_start: TimeSpec::now(),
                    device_start: TimeSpec::default(),
                });
                // Earlier-than-start device times yield an earlier host time
                clock.host_start.offset_by(time.seconds_since(&clock.device_start))
            }
        }
    }

    fn buffer_pending(&mut self, key: PendingKey, value: MetaValue, offset: u64) {
        match self.pre_capture.iter_mut().find(|e| e.key == key) {
            Some(entry) => {
                entry.value = value;
                entry.offset = offset;
            }
            None => self.pre_capture.push(PendingEntry { key, value, offset }),
        }
    }

    fn set_capture_meta(&mut self, index: usize, key: &str, value: MetaValue) -> Result<()> {
        if self.active.is_none() {
            self.buffer_pending(PendingKey::Field(key.to_string()), value, self.nitems_read);
            return Ok(());
        }
        let len = self.captures.len();
        match self.captures.get_mut(index) {
            Some(capture) => capture.set(key, value),
            None => {
                error!(index, len, "Invalid capture index");
                Err(Error::InvalidCaptureIndex { index, len })
            }
        }
    }

    fn set_annotation_meta(
        &mut self,
        sample_start: u64,
        sample_count: u64,
        key: &str,
        value: MetaValue,
    ) -> Result<()> {
        let existing = self.annotations.iter_mut().find(|a| {
            a.sample_start().ok() == Some(sample_start) && a.sample_count().ok() == Some(sample_count)
        });
        match existing {
            Some(annotation) => annotation.set(key, value),
            None => {
                let mut annotation = MetaNamespace::annotation(sample_start, sample_count);
                annotation.set(key, value)?;
                self.annotations.push(annotation);
                Ok(())
            }
        }
    }

    fn handle_gps(&mut self, fixes: &[GpsFix]) {
        if fixes.is_empty() {
            return;
        }
        if self.active.is_none() {
            debug!(count = fixes.len(), "dropping GPS fixes while idle");
            return;
        }
        let start = self.nitems_read.saturating_sub(self.recording_start_offset);
        for fix in fixes {
            let fields = [
                ("core:latitude", MetaValue::Float64(fix.latitude)),
                ("core:longitude", MetaValue::Float64(fix.longitude)),
                ("core:generator", MetaValue::from(GPS_GENERATOR)),
            ];
            for (key, value) in fields {
                if let Err(e) = self.set_annotation_meta(start, 0, key, value) {
                    warn!(error = %e, "failed to record GPS fix");
                }
            }
        }
    }

    /// Remember reserved tags until a file is installed.
    fn handle_tags_idle(&mut self, tags: &[Tag]) {
        for tag in tags.iter().filter(|t| t.key.affects_capture()) {
            self.buffer_pending(PendingKey::Tag(tag.key.clone()), tag.value.clone(), tag.offset);
        }
    }

    /// Fold one batch of tags into capture segments and annotations.
    fn handle_tags(&mut self, tags: &[Tag]) {
        let mut by_offset: BTreeMap<u64, Vec<&Tag>> = BTreeMap::new();
        for tag in tags {
            by_offset.entry(tag.offset).or_default().push(tag);
        }

        for (offset, group) in by_offset {
            let adjusted = offset.saturating_sub(self.recording_start_offset);
            let (capture_tags, annotation_tags): (Vec<&Tag>, Vec<&Tag>) =
                group.into_iter().partition(|t| t.key.affects_capture());

            if !capture_tags.is_empty() {
                self.fold_capture_tags(adjusted, &capture_tags);
            }
            if !annotation_tags.is_empty() {
                self.fold_annotation_tags(adjusted, &annotation_tags);
            }
        }
    }

    fn fold_capture_tags(&mut self, start: u64, tags: &[&Tag]) {
        let last_start = self.captures.last().and_then(|c| c.sample_start().ok());
        if last_start != Some(start) {
            self.captures.push(MetaNamespace::capture(start));
        }

        for tag in tags {
            match tag.key {
                TagKey::Time => match TimeSpec::from_value(&tag.value) {
                    Ok(time) => {
                        let stored = self.device_to_host(time).to_iso8601();
                        if let Some(capture) = self.captures.last_mut() {
                            capture.insert_raw(DATETIME_KEY, stored.into());
                        }
                    }
                    Err(e) => warn!(offset = tag.offset, error = %e, "dropping malformed rx_time"),
                },
                TagKey::Freq => {
                    if let Some(capture) = self.captures.last_mut() {
                        capture.insert_raw(FREQUENCY_KEY, tag.value.clone());
                    }
                }
                TagKey::Rate => match tag.value.as_number() {
                    Ok(rate) => self.global.insert_raw(SAMPLE_RATE_KEY, MetaValue::Float64(rate)),
                    Err(e) => warn!(offset = tag.offset, error = %e, "dropping malformed rx_rate"),
                },
                _ => {}
            }
        }
    }

    fn fold_annotation_tags(&mut self, start: u64, tags: &[&Tag]) {
        let mut annotation = MetaNamespace::annotation(start, 0);
        for tag in tags {
            match &tag.key {
                TagKey::PacketLen => match tag.value.as_u64() {
                    Ok(count) => annotation.insert_raw(SAMPLE_COUNT_KEY, count.into()),
                    Err(e) => warn!(offset = tag.offset, error = %e, "ignoring malformed packet_len"),
                },
                TagKey::Other(key) => {
                    let key = if MetaNamespace::validate_key(key) {
                        key.clone()
                    } else {
                        format!("unknown:{key}")
                    };
                    if let Err(e) = annotation.set(&key, tag.value.clone()) {
                        warn!(offset = tag.offset, error = %e, "dropping tag with unusable key");
                    }
                }
                _ => {}
            }
        }
        self.annotations.push(annotation);
    }

    fn work(&mut self, inputs: &[&[u8]], nitems: usize, tags: &[Tag], fixes: &[GpsFix]) -> Result<usize> {
        let bytes = nitems * self.item_size;
        if inputs.len() < self.num_channels || inputs.iter().any(|i| i.len() < bytes) {
            return Err(Error::type_mismatch(
                "input buffers",
                "one buffer per channel holding nitems samples",
            ));
        }

        self.apply_pending()?;

        if self.time_mode == TimeMode::Relative && !self.first_work_done {
            let device_start = tags
                .iter()
                .find(|t| t.offset == 0 && t.key == TagKey::Time)
                .and_then(|t| TimeSpec::from_value(&t.value).ok())
                .unwrap_or_default();
            self.relative_clock = Some(RelativeClock {
                host_start: TimeSpec::now(),
                device_start,
            });
        }
        self.first_work_done = true;
        self.metrics.record_tags(tags.len() as u64);

        self.handle_gps(fixes);

        if self.active.is_none() {
            self.handle_tags_idle(tags);
            self.nitems_read += nitems as u64;
            self.metrics.record_items(nitems as u64);
            return Ok(nitems);
        }

        if !tags.is_empty() {
            self.handle_tags(tags);
        }

        let SinkInner {
            active,
            scratch,
            num_channels,
            item_size,
            ..
        } = self;
        if let Some(active) = active.as_mut() {
            if *num_channels > 1 {
                let interleaved = scratch.interleave(&inputs[..*num_channels], *item_size, nitems)?;
                active.handle.write_all(interleaved)?;
            } else {
                active.handle.write_all(&inputs[0][..bytes])?;
            }
        }

        self.nitems_read += nitems as u64;
        self.metrics.record_items(nitems as u64);
        Ok(nitems)
    }

    /// Finalize the installed file, if any, and drop any staged request.
    /// The sink ends up Idle even when finalizing fails.
    fn stop(&mut self) -> Result<()> {
        self.pending = None;
        let finalized = match self.active.take() {
            Some(active) => self.finalize(active),
            None => Ok(()),
        };
        self.transition(SinkState::Idle);
        finalized
    }
}
