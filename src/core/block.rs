use super::tag::Tag;
use crate::error::Result;

/// Outcome of one source work call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    /// Items written to every output buffer; may be short of the request at EOF
    Produced(usize),
    /// Nothing left to produce
    Done,
}

/// A block that produces items into caller-provided buffers.
///
/// The scheduler calls `work` from one thread with one byte buffer per output
/// channel, each at least `nitems * item_size()` long.
pub trait SampleSource: Send {
    /// Bytes per item on each output channel
    fn item_size(&self) -> usize;

    fn num_outputs(&self) -> usize {
        1
    }

    /// Fill up to `nitems` items per output and push the tags falling in the
    /// produced window onto `tags` (absolute offsets, channel 0).
    fn work(
        &mut self,
        outputs: &mut [&mut [u8]],
        nitems: usize,
        tags: &mut Vec<Tag>,
    ) -> Result<WorkStatus>;

    /// Release resources. Safe to call more than once.
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A block that consumes items plus the tags attached to them.
pub trait SampleSink: Send {
    fn item_size(&self) -> usize;

    fn num_inputs(&self) -> usize {
        1
    }

    /// Consume `nitems` items from each input. `tags` carry absolute offsets
    /// within the window being consumed. Returns the number of items consumed.
    fn work(&mut self, inputs: &[&[u8]], nitems: usize, tags: &[Tag]) -> Result<usize>;

    /// Finalize whatever is open. Safe to call more than once.
    fn stop(&mut self) -> Result<()>;
}
