pub mod convert;
pub mod format;

pub use convert::{convert, Converter};
pub use format::{parse_format, BaseKind, Endianness, FormatDescriptor};
