pub mod block;
pub mod chunk;
pub mod namespace;
pub mod tag;
pub mod time;
pub mod value;

pub use block::{SampleSink, SampleSource, WorkStatus};
pub use chunk::SampleChunk;
pub use namespace::MetaNamespace;
pub use tag::{Tag, TagKey};
pub use time::{TimeMode, TimeSpec};
pub use value::MetaValue;
