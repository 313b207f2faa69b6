use std::path::{Path, PathBuf};

pub const DATA_EXTENSION: &str = "sigmf-data";
pub const META_EXTENSION: &str = "sigmf-meta";

/// Data file path for any recording filename, by extension replacement.
pub fn to_data_path(filename: impl AsRef<Path>) -> PathBuf {
    filename.as_ref().with_extension(DATA_EXTENSION)
}

/// Metadata sidecar path for a data (or any) filename.
pub fn meta_path_from_data(data_path: impl AsRef<Path>) -> PathBuf {
    data_path.as_ref().with_extension(META_EXTENSION)
}
