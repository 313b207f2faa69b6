pub mod rotation;

pub use rotation::{finalize, open, orphaned_temp_files, TempHandle};
