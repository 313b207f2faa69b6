/// Round-robin splitter from one interleaved stream into per-channel buffers.
///
/// The channel the next sample belongs to is carried across calls, so a
/// call may hand over any number of samples.
#[derive(Debug, Clone)]
pub struct Deinterleaver {
    num_channels: usize,
    sample_size: usize,
    phase: usize,
}

impl Deinterleaver {
    pub fn new(num_channels: usize, sample_size: usize) -> Self {
        Self {
            num_channels: num_channels.max(1),
            sample_size,
            phase: 0,
        }
    }

    /// Channel that receives the next sample
    pub fn phase(&self) -> usize {
        self.phase
    }

    /// Distribute whole samples of `input` over `outputs`. `written[ch]` is the
    /// byte position in `outputs[ch]` and is advanced as samples land.
    /// Returns the number of samples consumed; it stops early when the next
    /// channel's buffer is full.
    pub fn push(&mut self, input: &[u8], outputs: &mut [&mut [u8]], written: &mut [usize]) -> usize {
        let mut consumed = 0;
        for sample in input.chunks_exact(self.sample_size) {
            let ch = self.phase;
            let (Some(out), Some(pos)) = (outputs.get_mut(ch), written.get_mut(ch)) else {
                break;
            };
            let Some(dst) = out.get_mut(*pos..*pos + self.sample_size) else {
                break;
            };
            dst.copy_from_slice(sample);
            *pos += self.sample_size;
            consumed += 1;
            self.phase = (self.phase + 1) % self.num_channels;
        }
        consumed
    }
}
