//! Minimal formatted-output engine.
//!
//! Directives: `%d`/`%i` (signed decimal), `%f` (fixed 4-digit fraction),
//! `%s` (NUL-terminated bytes), `%p` (`0x` + lowercase hex), `%%`.
//! Anything else after `%` passes through as the two literal bytes, and a
//! directive with no usable argument does the same. No widths, flags or
//! precision.
//!
//! Output goes byte by byte through an [`Emit`] sink; the return value of
//! [`format_to`] counts every byte handed to the sink.

use super::buffer::Descriptor;

const DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Conversions that consume an argument.
const CONVERSIONS: &[u8] = b"difsp";

/// Fixed fractional digits of `%f`.
const FRACTION_DIGITS: usize = 4;

const FRACTION_SCALE: f64 = 10_000.0;

/// 2^64: whole parts at or above this do not fit the digit buffer path.
const WHOLE_LIMIT: f64 = 18_446_744_073_709_551_616.0;

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// One formatting argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrintArg<'a> {
    Int(i64),
    Float(f64),
    /// Bytes up to the first NUL (or the end of the slice) are printed.
    Str(&'a [u8]),
    Ptr(usize),
}

impl From<i64> for PrintArg<'_> {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for PrintArg<'_> {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for PrintArg<'_> {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for PrintArg<'_> {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl<'a> From<&'a [u8]> for PrintArg<'a> {
    fn from(v: &'a [u8]) -> Self {
        Self::Str(v)
    }
}

impl<'a> From<&'a str> for PrintArg<'a> {
    fn from(v: &'a str) -> Self {
        Self::Str(v.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Byte sink for formatted output.
pub trait Emit {
    fn emit(&mut self, byte: u8);
}

impl Emit for Vec<u8> {
    fn emit(&mut self, byte: u8) {
        self.push(byte);
    }
}

/// Stream output goes through the character-write path; failures stay
/// visible through the stream's error latch.
impl Emit for Descriptor {
    fn emit(&mut self, byte: u8) {
        let _ = self.putc(byte);
    }
}

// ---------------------------------------------------------------------------
// Format string segments
// ---------------------------------------------------------------------------

/// A piece of a format string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a [u8]),
    /// `%%`.
    Percent,
    /// `%` followed by the given conversion byte.
    Directive(u8),
}

/// Split a format string into segments, stopping at the first NUL.
///
/// A trailing lone `%` becomes a literal.
pub fn parse_format(fmt: &[u8]) -> Vec<Segment<'_>> {
    let fmt = until_nul(fmt);
    let mut segments = Vec::new();
    let mut pos = 0;

    while pos < fmt.len() {
        let start = pos;
        while pos < fmt.len() && fmt[pos] != b'%' {
            pos += 1;
        }
        if pos > start {
            segments.push(Segment::Literal(&fmt[start..pos]));
        }
        if pos >= fmt.len() {
            break;
        }
        pos += 1;
        match fmt.get(pos).copied() {
            None => segments.push(Segment::Literal(b"%")),
            Some(b'%') => segments.push(Segment::Percent),
            Some(conv) => segments.push(Segment::Directive(conv)),
        }
        pos += 1;
    }
    segments
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render `fmt` with `args` into `out`. Returns the number of bytes emitted.
pub fn format_to<E: Emit + ?Sized>(out: &mut E, fmt: &[u8], args: &[PrintArg<'_>]) -> usize {
    let mut args = args.iter().copied();
    let mut total = 0;

    for segment in parse_format(fmt) {
        total += match segment {
            Segment::Literal(bytes) => emit_bytes(out, bytes),
            Segment::Percent => emit_bytes(out, b"%"),
            // Unknown conversions leave the argument list untouched.
            Segment::Directive(conv) if !CONVERSIONS.contains(&conv) => {
                emit_bytes(out, &[b'%', conv])
            }
            Segment::Directive(conv) => match render_directive(out, conv, args.next()) {
                Some(n) => n,
                None => emit_bytes(out, &[b'%', conv]),
            },
        };
    }
    total
}

/// Render `fmt` with `args` into a fresh byte vector.
#[must_use]
pub fn format_bytes(fmt: &[u8], args: &[PrintArg<'_>]) -> Vec<u8> {
    let mut out = Vec::new();
    format_to(&mut out, fmt, args);
    out
}

/// `None` means the directive is unknown or its argument is unusable, so
/// the caller passes it through verbatim.
fn render_directive<E: Emit + ?Sized>(
    out: &mut E,
    conv: u8,
    arg: Option<PrintArg<'_>>,
) -> Option<usize> {
    let n = match (conv, arg?) {
        (b'd' | b'i', PrintArg::Int(v)) => emit_signed(out, v),
        (b'd' | b'i', PrintArg::Float(v)) => emit_signed(out, v as i64),
        (b'f', PrintArg::Float(v)) => emit_float(out, v),
        (b'f', PrintArg::Int(v)) => emit_float(out, v as f64),
        (b's', PrintArg::Str(s)) => emit_bytes(out, until_nul(s)),
        (b'p', PrintArg::Ptr(addr)) => emit_pointer(out, addr as u64),
        (b'p', PrintArg::Int(v)) => emit_pointer(out, v as u64),
        _ => return None,
    };
    Some(n)
}

fn until_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}

fn emit_bytes<E: Emit + ?Sized>(out: &mut E, bytes: &[u8]) -> usize {
    for &b in bytes {
        out.emit(b);
    }
    bytes.len()
}

/// Emit `value` in `base`. Digits are produced least significant first
/// into the tail of a fixed buffer, then emitted front to back.
fn emit_magnitude<E: Emit + ?Sized>(out: &mut E, mut value: u64, base: u64) -> usize {
    let mut digits = [0u8; 64];
    let mut pos = digits.len();
    loop {
        pos -= 1;
        digits[pos] = DIGITS[(value % base) as usize];
        value /= base;
        if value == 0 {
            break;
        }
    }
    emit_bytes(out, &digits[pos..])
}

fn emit_signed<E: Emit + ?Sized>(out: &mut E, value: i64) -> usize {
    let sign = if value < 0 { emit_bytes(out, b"-") } else { 0 };
    sign + emit_magnitude(out, value.unsigned_abs(), 10)
}

fn emit_pointer<E: Emit + ?Sized>(out: &mut E, addr: u64) -> usize {
    emit_bytes(out, b"0x") + emit_magnitude(out, addr, 16)
}

/// Number of base-`base` digits in `value` (at least one).
fn digit_count(mut value: u64, base: u64) -> usize {
    let mut count = 1;
    while value >= base {
        value /= base;
        count += 1;
    }
    count
}

fn emit_float<E: Emit + ?Sized>(out: &mut E, value: f64) -> usize {
    if value.is_nan() {
        return emit_bytes(out, b"nan");
    }
    if value.is_infinite() {
        let text: &[u8] = if value < 0.0 { b"-inf" } else { b"inf" };
        return emit_bytes(out, text);
    }

    let magnitude = value.abs();
    let mut whole = magnitude.trunc();
    let mut fraction = ((magnitude - whole) * FRACTION_SCALE).round() as u64;
    if fraction >= FRACTION_SCALE as u64 {
        whole += 1.0;
        fraction -= FRACTION_SCALE as u64;
    }

    let mut n = 0;
    if value.is_sign_negative() && (whole > 0.0 || fraction > 0) {
        n += emit_bytes(out, b"-");
    }
    n += if whole < WHOLE_LIMIT {
        emit_magnitude(out, whole as u64, 10)
    } else {
        emit_bytes(out, format!("{whole:.0}").as_bytes())
    };
    n += emit_bytes(out, b".");

    if fraction == 0 {
        n += emit_bytes(out, b"0000");
    } else {
        for _ in digit_count(fraction, 10)..FRACTION_DIGITS {
            n += emit_bytes(out, b"0");
        }
        n += emit_magnitude(out, fraction, 10);
    }
    n
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
