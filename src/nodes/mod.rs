pub mod annotation_sink;
pub mod command;
pub mod config;
pub mod sink;
pub mod source;

pub use annotation_sink::{AnnotationMode, AnnotationSink};
pub use command::{SinkCommand, SourceCommand};
pub use config::{SinkConfig, SourceConfig};
pub use sink::{SigmfSink, SinkHandle};
pub use source::SigmfSource;
