use crate::error::{Error, Result};

/// Reusable byte buffer for interleaving and format conversion.
///
/// Growth is fallible; an allocation failure surfaces as an error instead of
/// aborting the process.
#[derive(Debug, Default)]
pub struct ScratchBuffer {
    buffer: Vec<u8>,
}

impl ScratchBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut scratch = Self::new();
        scratch.ensure_capacity(capacity)?;
        Ok(scratch)
    }

    /// Make room for at least `bytes` bytes without reallocating later.
    pub fn ensure_capacity(&mut self, bytes: usize) -> Result<()> {
        let additional = bytes.saturating_sub(self.buffer.len());
        self.buffer.try_reserve(additional).map_err(|e| {
            Error::Io(std::io::Error::new(std::io::ErrorKind::OutOfMemory, e.to_string()))
        })
    }

    /// Resize to exactly `len` bytes and hand out the whole slice.
    pub fn prepare(&mut self, len: usize) -> Result<&mut [u8]> {
        self.ensure_capacity(len)?;
        self.buffer.resize(len, 0);
        Ok(&mut self.buffer)
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Interleave `nitems` items of `item_size` bytes from each input, round
    /// robin, into this buffer.
    pub fn interleave(&mut self, inputs: &[&[u8]], item_size: usize, nitems: usize) -> Result<&[u8]> {
        let channels = inputs.len();
        let out = self.prepare(channels * item_size * nitems)?;
        for (ch, input) in inputs.iter().enumerate() {
            for i in 0..nitems {
                let dst = (i * channels + ch) * item_size;
                out[dst..dst + item_size].copy_from_slice(&input[i * item_size..(i + 1) * item_size]);
            }
        }
        Ok(self.as_slice())
    }
}
