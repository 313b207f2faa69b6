pub mod buffers;
pub mod codec;
pub mod core;
pub mod engine;
pub mod error;
pub mod hal;
pub mod meta;
pub mod nodes;
pub mod observability;
pub mod storage;

pub use error::{Error, Result};
