use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Numeric kind of one sample component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseKind {
    Float,
    Signed,
    Unsigned,
}

impl BaseKind {
    fn letter(&self) -> char {
        match self {
            BaseKind::Float => 'f',
            BaseKind::Signed => 'i',
            BaseKind::Unsigned => 'u',
        }
    }
}

/// Byte order of one sample component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Endianness::Little => "_le",
            Endianness::Big => "_be",
        }
    }
}

/// Parsed `{r|c}{f|i|u}{8|16|32|64}[_le|_be]` dataset format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatDescriptor {
    pub is_complex: bool,
    pub base: BaseKind,
    /// 8, 16, 32 or 64
    pub bit_width: u8,
    /// `None` when the string carried no suffix
    pub endianness: Option<Endianness>,
}

/// Parse a dataset format string.
pub fn parse_format(text: &str) -> Result<FormatDescriptor> {
    let invalid = || Error::InvalidFormat(text.to_string());

    let (body, endianness) = if let Some(body) = text.strip_suffix("_le") {
        (body, Some(Endianness::Little))
    } else if let Some(body) = text.strip_suffix("_be") {
        (body, Some(Endianness::Big))
    } else {
        (text, None)
    };

    let mut chars = body.chars();
    let is_complex = match chars.next() {
        Some('r') => false,
        Some('c') => true,
        _ => return Err(invalid()),
    };
    let base = match chars.next() {
        Some('f') => BaseKind::Float,
        Some('i') => BaseKind::Signed,
        Some('u') => BaseKind::Unsigned,
        _ => return Err(invalid()),
    };
    let bit_width = match chars.as_str() {
        "8" => 8,
        "16" => 16,
        "32" => 32,
        "64" => 64,
        _ => return Err(invalid()),
    };

    Ok(FormatDescriptor {
        is_complex,
        base,
        bit_width,
        endianness,
    })
}

impl FormatDescriptor {
    pub fn new(is_complex: bool, base: BaseKind, bit_width: u8) -> Self {
        Self {
            is_complex,
            base,
            bit_width,
            endianness: None,
        }
    }

    /// Bytes per real component
    pub fn component_size(&self) -> usize {
        self.bit_width as usize / 8
    }

    /// Bytes per sample (both components for complex)
    pub fn sample_size(&self) -> usize {
        self.component_size() * if self.is_complex { 2 } else { 1 }
    }

    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = Some(endianness);
        self
    }

    /// Concrete byte order, defaulting to the host's when unspecified.
    pub fn resolved_endianness(&self) -> Endianness {
        self.endianness.unwrap_or_else(Endianness::native)
    }

    /// Copy with the endianness pinned down, for writing a concrete type string.
    pub fn resolved(&self) -> Self {
        self.with_endianness(self.resolved_endianness())
    }

    /// Same layout ignoring byte order.
    pub fn same_layout(&self, other: &FormatDescriptor) -> bool {
        self.is_complex == other.is_complex
            && self.base == other.base
            && self.bit_width == other.bit_width
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.is_complex { 'c' } else { 'r' },
            self.base.letter(),
            self.bit_width
        )?;
        if let Some(endianness) = self.endianness {
            f.write_str(endianness.suffix())?;
        }
        Ok(())
    }
}

impl FromStr for FormatDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_format(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_complex_float() {
        let fmt = parse_format("cf32_le").unwrap();
        assert!(fmt.is_complex);
        assert_eq!(fmt.base, BaseKind::Float);
        assert_eq!(fmt.bit_width, 32);
        assert_eq!(fmt.endianness, Some(Endianness::Little));
        assert_eq!(fmt.sample_size(), 8);
    }

    #[test]
    fn test_canonical_for_every_valid_string() {
        for kind in ["r", "c"] {
            for base in ["f", "i", "u"] {
                for width in ["8", "16", "32", "64"] {
                    for suffix in ["", "_le", "_be"] {
                        let text = format!("{kind}{base}{width}{suffix}");
                        let parsed = parse_format(&text).unwrap();
                        assert_eq!(parsed.to_string(), text);
                    }
                }
            }
        }
    }

    #[test]
    fn test_invalid_strings() {
        for bad in ["x32", "cf7", "c32", "", "cf32_xx", "cf32le", "rf128", "CF32"] {
            assert!(
                matches!(parse_format(bad), Err(Error::InvalidFormat(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_resolved_defaults_to_native() {
        let fmt = parse_format("ri16").unwrap();
        assert_eq!(fmt.resolved().endianness, Some(Endianness::native()));
        assert_eq!(fmt.sample_size(), 2);
    }
}
