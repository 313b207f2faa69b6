pub mod file;
pub mod paths;

pub use file::{load, save, MetadataFile};
pub use paths::{meta_path_from_data, to_data_path};
