use super::tag::Tag;

/// Unit of work passed between flowgraph tasks
#[derive(Debug, Clone, Default)]
pub struct SampleChunk {
    /// Absolute offset of the first item in this chunk
    pub offset: u64,

    /// Items per channel
    pub nitems: usize,

    /// One byte buffer per channel
    pub channels: Vec<Vec<u8>>,

    /// Tags whose offsets fall inside `[offset, offset + nitems)`
    pub tags: Vec<Tag>,
}

impl SampleChunk {
    pub fn new(offset: u64, num_channels: usize) -> Self {
        Self {
            offset,
            nitems: 0,
            channels: vec![Vec::new(); num_channels],
            tags: Vec::new(),
        }
    }

    /// Offset one past the last item
    pub fn end(&self) -> u64 {
        self.offset + self.nitems as u64
    }
}
