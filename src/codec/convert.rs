use super::format::{BaseKind, Endianness, FormatDescriptor};
use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// One decoded sample component
#[derive(Debug, Clone, Copy, PartialEq)]
enum Scalar {
    Float(f64),
    Int(i64),
}

type DecodeFn = fn(&[u8]) -> Scalar;
type EncodeFn = fn(Scalar, &mut [u8]);

#[derive(Clone, Copy)]
enum Plan {
    /// Same layout and byte order
    Copy,
    /// Same layout, opposite byte order
    Swap { component: usize },
    Numeric {
        decode: DecodeFn,
        encode: EncodeFn,
        /// Symmetric full scale of the source integer type, used for int -> float
        src_full_scale: f64,
        /// Symmetric limit of the destination integer type
        dst_limit: i64,
    },
}

/// Converts buffers of samples between two dataset formats.
///
/// Float to integer rounds half to even and saturates at the symmetric range
/// `[-(2^(w-1) - 1), 2^(w-1) - 1]` without scaling. Integer to float divides by
/// that same full scale. Integer narrowing saturates.
#[derive(Clone, Copy)]
pub struct Converter {
    src: FormatDescriptor,
    dst: FormatDescriptor,
    plan: Plan,
}

fn symmetric_limit(bit_width: u8) -> i64 {
    (1i64 << (bit_width - 1)) - 1
}

fn decoder<B: ByteOrder>(base: BaseKind, width: u8) -> Result<DecodeFn> {
    let f: DecodeFn = match (base, width) {
        (BaseKind::Float, 32) => |b| Scalar::Float(B::read_f32(b) as f64),
        (BaseKind::Float, 64) => |b| Scalar::Float(B::read_f64(b)),
        (BaseKind::Signed, 8) => |b| Scalar::Int(b[0] as i8 as i64),
        (BaseKind::Signed, 16) => |b| Scalar::Int(B::read_i16(b) as i64),
        (BaseKind::Signed, 32) => |b| Scalar::Int(B::read_i32(b) as i64),
        (BaseKind::Signed, 64) => |b| Scalar::Int(B::read_i64(b)),
        (BaseKind::Unsigned, _) => return Err(unsigned_not_implemented()),
        (BaseKind::Float, w) => {
            return Err(Error::NotImplemented(format!("{w}-bit float conversions")))
        }
        (BaseKind::Signed, w) => return Err(Error::InvalidFormat(format!("i{w}"))),
    };
    Ok(f)
}

fn encoder<B: ByteOrder>(base: BaseKind, width: u8) -> Result<EncodeFn> {
    let f: EncodeFn = match (base, width) {
        (BaseKind::Float, 32) => |s, b| B::write_f32(b, scalar_f64(s) as f32),
        (BaseKind::Float, 64) => |s, b| B::write_f64(b, scalar_f64(s)),
        (BaseKind::Signed, 8) => |s, b| b[0] = scalar_i64(s) as i8 as u8,
        (BaseKind::Signed, 16) => |s, b| B::write_i16(b, scalar_i64(s) as i16),
        (BaseKind::Signed, 32) => |s, b| B::write_i32(b, scalar_i64(s) as i32),
        (BaseKind::Signed, 64) => |s, b| B::write_i64(b, scalar_i64(s)),
        (BaseKind::Unsigned, _) => return Err(unsigned_not_implemented()),
        (BaseKind::Float, w) => {
            return Err(Error::NotImplemented(format!("{w}-bit float conversions")))
        }
        (BaseKind::Signed, w) => return Err(Error::InvalidFormat(format!("i{w}"))),
    };
    Ok(f)
}

fn scalar_f64(s: Scalar) -> f64 {
    match s {
        Scalar::Float(f) => f,
        Scalar::Int(i) => i as f64,
    }
}

fn scalar_i64(s: Scalar) -> i64 {
    match s {
        Scalar::Int(i) => i,
        Scalar::Float(f) => f as i64,
    }
}

fn unsigned_not_implemented() -> Error {
    Error::NotImplemented("Unsigned integer type conversions not yet implemented".to_string())
}

impl Converter {
    /// Build a converter. Fails with `IncompatibleFormat` on a real/complex
    /// mismatch and `NotImplemented` for unsigned numeric paths.
    pub fn new(src: FormatDescriptor, dst: FormatDescriptor) -> Result<Self> {
        let src = src.resolved();
        let dst = dst.resolved();

        if src.is_complex != dst.is_complex {
            return Err(Error::IncompatibleFormat {
                src: src.to_string(),
                dst: dst.to_string(),
            });
        }

        let plan = if src.same_layout(&dst) {
            if src.endianness == dst.endianness || src.component_size() == 1 {
                Plan::Copy
            } else {
                Plan::Swap {
                    component: src.component_size(),
                }
            }
        } else {
            let decode = match src.resolved_endianness() {
                Endianness::Little => decoder::<LittleEndian>(src.base, src.bit_width)?,
                Endianness::Big => decoder::<BigEndian>(src.base, src.bit_width)?,
            };
            let encode = match dst.resolved_endianness() {
                Endianness::Little => encoder::<LittleEndian>(dst.base, dst.bit_width)?,
                Endianness::Big => encoder::<BigEndian>(dst.base, dst.bit_width)?,
            };
            Plan::Numeric {
                decode,
                encode,
                src_full_scale: symmetric_limit(src.bit_width) as f64,
                dst_limit: symmetric_limit(dst.bit_width),
            }
        };

        Ok(Self { src, dst, plan })
    }

    pub fn src(&self) -> &FormatDescriptor {
        &self.src
    }

    pub fn dst(&self) -> &FormatDescriptor {
        &self.dst
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self.plan, Plan::Copy)
    }

    /// Convert whole samples from `input` into `output`, returning the number
    /// of samples converted. Trailing partial samples in `input` are ignored and
    /// conversion stops when `output` is full.
    pub fn convert_into(&self, input: &[u8], output: &mut [u8]) -> usize {
        let src_size = self.src.sample_size();
        let dst_size = self.dst.sample_size();
        let samples = (input.len() / src_size).min(output.len() / dst_size);
        let input = &input[..samples * src_size];
        let output = &mut output[..samples * dst_size];

        match self.plan {
            Plan::Copy => output.copy_from_slice(input),
            Plan::Swap { component } => {
                output.copy_from_slice(input);
                for chunk in output.chunks_exact_mut(component) {
                    chunk.reverse();
                }
            }
            Plan::Numeric {
                decode,
                encode,
                src_full_scale,
                dst_limit,
            } => {
                let src_comp = self.src.component_size();
                let dst_comp = self.dst.component_size();
                let dst_is_float = self.dst.base == BaseKind::Float;
                for (inp, out) in input
                    .chunks_exact(src_comp)
                    .zip(output.chunks_exact_mut(dst_comp))
                {
                    let value = match (decode(inp), dst_is_float) {
                        (Scalar::Float(f), true) => Scalar::Float(f),
                        (Scalar::Int(i), true) => Scalar::Float(i as f64 / src_full_scale),
                        (Scalar::Float(f), false) => Scalar::Int(saturate_float(f, dst_limit)),
                        (Scalar::Int(i), false) => Scalar::Int(i.clamp(-dst_limit, dst_limit)),
                    };
                    encode(value, out);
                }
            }
        }

        samples
    }

    /// Convert a whole buffer into a freshly allocated one.
    pub fn convert(&self, input: &[u8]) -> Vec<u8> {
        let samples = input.len() / self.src.sample_size();
        let mut output = vec![0u8; samples * self.dst.sample_size()];
        self.convert_into(input, &mut output);
        output
    }
}

fn saturate_float(value: f64, limit: i64) -> i64 {
    if value.is_nan() {
        return 0;
    }
    let rounded = value.round_ties_even();
    rounded.clamp(-(limit as f64), limit as f64) as i64
}

/// One-shot conversion of `bytes` from `src` to `dst`.
pub fn convert(src: FormatDescriptor, dst: FormatDescriptor, bytes: &[u8]) -> Result<Vec<u8>> {
    Ok(Converter::new(src, dst)?.convert(bytes))
}
