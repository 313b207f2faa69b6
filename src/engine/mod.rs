pub mod crop;
pub mod flowgraph;
pub mod state;

pub use crop::{crop, CropPoint, CropRange};
pub use flowgraph::{Flowgraph, FlowgraphConfig, FlowgraphStats};
pub use state::SinkState;
