pub mod deinterleave;
pub mod scratch;

pub use deinterleave::Deinterleaver;
pub use scratch::ScratchBuffer;
