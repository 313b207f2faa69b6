use crate::core::{SampleChunk, SampleSink, SampleSource, WorkStatus};
use crate::nodes::{SigmfSink, SigmfSource, SinkConfig, SinkHandle, SourceConfig};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info};

fn default_chunk_size() -> usize {
    4096
}

fn default_channel_capacity() -> usize {
    16
}

/// Source-to-sink copy job description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowgraphConfig {
    pub source: SourceConfig,
    pub sink: SinkConfig,

    /// Items requested from the source per work call
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Items dropped from the head of the stream
    #[serde(default)]
    pub skip: u64,

    /// Items passed to the sink after the skip; `None` runs to the end
    #[serde(default)]
    pub limit: Option<u64>,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl FlowgraphConfig {
    pub fn from_json(config: Value) -> Result<Self> {
        serde_json::from_value(config).context("invalid flowgraph config")
    }
}

/// Totals of one flowgraph run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowgraphStats {
    /// Items pulled from the source, including skipped ones
    pub items_read: u64,
    /// Items handed to the sink
    pub items_written: u64,
    pub chunks: u64,
    pub tags: u64,
}

/// One source feeding one sink through a bounded channel of sample chunks.
///
/// Both blocks run on blocking threads. Tags keep their offsets relative to
/// the sink's stream: the skipped head is subtracted and tags inside it are
/// dropped.
pub struct Flowgraph {
    source: Box<dyn SampleSource>,
    sink: Box<dyn SampleSink>,
    chunk_size: usize,
    skip: u64,
    limit: Option<u64>,
    channel_capacity: usize,
}

impl Flowgraph {
    pub fn new(source: impl SampleSource + 'static, sink: impl SampleSink + 'static) -> Self {
        Self {
            source: Box::new(source),
            sink: Box::new(sink),
            chunk_size: default_chunk_size(),
            skip: 0,
            limit: None,
            channel_capacity: default_channel_capacity(),
        }
    }

    /// Build the SigMF copy job, returning the sink's command handle too.
    pub fn from_config(config: &FlowgraphConfig) -> Result<(Self, SinkHandle)> {
        let source = SigmfSource::new(config.source.clone())
            .with_context(|| format!("failed to open source {}", config.source.filename))?;
        let sink = SigmfSink::new(config.sink.clone()).context("failed to create sink")?;
        let handle = sink.handle();

        let graph = Self::new(source, sink)
            .with_chunk_size(config.chunk_size)
            .with_skip(config.skip)
            .with_limit(config.limit)
            .with_channel_capacity(config.channel_capacity);
        Ok((graph, handle))
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Run until the source is exhausted or the limit is reached, then stop
    /// both blocks.
    pub async fn run(self) -> Result<FlowgraphStats> {
        let Self {
            mut source,
            mut sink,
            chunk_size,
            skip,
            limit,
            channel_capacity,
        } = self;

        if source.num_outputs() != sink.num_inputs() {
            return Err(anyhow!(
                "channel count mismatch: source has {}, sink takes {}",
                source.num_outputs(),
                sink.num_inputs()
            ));
        }
        if source.item_size() != sink.item_size() {
            return Err(anyhow!(
                "item size mismatch: source produces {} bytes, sink takes {}",
                source.item_size(),
                sink.item_size()
            ));
        }

        let started = Instant::now();
        let (tx, mut rx) = mpsc::channel::<SampleChunk>(channel_capacity);

        let producer = tokio::task::spawn_blocking(move || -> Result<u64> {
            let result = produce(source.as_mut(), &tx, chunk_size, skip, limit);
            source.stop().context("failed to stop source")?;
            result
        });

        let consumer = tokio::task::spawn_blocking(move || -> Result<FlowgraphStats> {
            let mut stats = FlowgraphStats::default();
            let result = (|| -> Result<()> {
                while let Some(chunk) = rx.blocking_recv() {
                    consume(sink.as_mut(), &chunk)?;
                    stats.items_written += chunk.nitems as u64;
                    stats.tags += chunk.tags.len() as u64;
                    stats.chunks += 1;
                }
                Ok(())
            })();
            // Dropping the receiver unblocks a producer waiting on a full channel
            drop(rx);
            sink.stop().context("failed to stop sink")?;
            result.map(|_| stats)
        });

        let consumed = consumer.await.context("sink task panicked")?;
        let produced = producer.await.context("source task panicked")?;
        let mut stats = consumed?;
        stats.items_read = produced?;

        info!(
            items_read = stats.items_read,
            items_written = stats.items_written,
            tags = stats.tags,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "flowgraph finished"
        );
        Ok(stats)
    }
}

/// Pull chunks from `source` until it is done, the limit is reached or the
/// consumer goes away. Returns the number of items read.
fn produce(
    source: &mut dyn SampleSource,
    tx: &mpsc::Sender<SampleChunk>,
    chunk_size: usize,
    skip: u64,
    limit: Option<u64>,
) -> Result<u64> {
    let item_size = source.item_size();
    let num_channels = source.num_outputs();
    let end = limit.map(|limit| skip.saturating_add(limit));
    let mut read: u64 = 0;
    let mut buffers = vec![vec![0u8; chunk_size * item_size]; num_channels];

    loop {
        let want = match end {
            Some(end) => (end.saturating_sub(read)).min(chunk_size as u64) as usize,
            None => chunk_size,
        };
        if want == 0 {
            break;
        }

        let mut tags = Vec::new();
        let status = {
            let mut outputs: Vec<&mut [u8]> = buffers.iter_mut().map(|b| b.as_mut_slice()).collect();
            source
                .work(&mut outputs, want, &mut tags)
                .context("source work failed")?
        };
        let n = match status {
            WorkStatus::Done => break,
            WorkStatus::Produced(n) => n,
        };

        let window_end = read + n as u64;
        let drop_head = skip.saturating_sub(read).min(n as u64) as usize;
        if drop_head < n {
            let first = read + drop_head as u64;
            let mut chunk = SampleChunk::new(first - skip, num_channels);
            chunk.nitems = n - drop_head;
            for (dst, src) in chunk.channels.iter_mut().zip(&buffers) {
                dst.extend_from_slice(&src[drop_head * item_size..n * item_size]);
            }
            chunk.tags = tags
                .into_iter()
                .filter(|tag| tag.offset >= first && tag.offset < window_end)
                .map(|mut tag| {
                    tag.offset -= skip;
                    tag
                })
                .collect();

            if tx.blocking_send(chunk).is_err() {
                debug!("sink went away, stopping source");
                read = window_end;
                break;
            }
        }
        read = window_end;
    }
    Ok(read)
}

/// Feed one chunk to `sink`, calling `work` until every item is consumed.
fn consume(sink: &mut dyn SampleSink, chunk: &SampleChunk) -> Result<()> {
    let item_size = sink.item_size();
    let mut done = 0usize;
    while done < chunk.nitems {
        let inputs: Vec<&[u8]> = chunk
            .channels
            .iter()
            .map(|c| &c[done * item_size..chunk.nitems * item_size])
            .collect();
        let tags = if done == 0 { chunk.tags.as_slice() } else { &[] };
        let consumed = sink
            .work(&inputs, chunk.nitems - done, tags)
            .context("sink work failed")?;
        if consumed == 0 {
            return Err(anyhow!("sink consumed nothing at offset {}", chunk.offset + done as u64));
        }
        done += consumed;
    }
    Ok(())
}
