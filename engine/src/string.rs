//! String engine (spec §4.7): the long-string heap representation, its
//! lazily-built code-point offset map, and the free functions ToNumber,
//! slice and concatenation operate on, independent of short-string inline
//! storage (which lives in the `small_string` crate and is spliced in by
//! `value.rs`).
//!
//! Backing storage is [`wtf8::Wtf8Buf`] rather than `std::String`: a JS
//! string is a sequence of UTF-16 code units, not Unicode scalar values, so
//! lone surrogates from `\uD800`-class escapes must be representable. This
//! mirrors the teacher's own choice of the `wtf8` crate for exactly this
//! reason.

use wtf8::{CodePoint, Wtf8Buf};

/// Code points per offset-map entry (spec §3.1's `STRING_MAP_STRIDE`).
pub const STRING_MAP_STRIDE: u32 = 32;

/// Retain-count sentinel meaning "never freed, shared across VMs" (spec
/// §3.1, §3.6).
pub const RETAIN_PERMANENT: u16 = 0xffff;

/// A heap-allocated ("long") string: byte size > 14 (spec §3.1).
#[derive(Debug, Clone)]
pub struct HeapStringData {
    bytes: Wtf8Buf,
    /// Cached code-point (UTF-16-code-unit, approximated here as Unicode
    /// scalar value count — see module docs) count. `None` until first
    /// requested.
    length: Option<u32>,
    /// `offset_map[i]` is the byte offset of code point
    /// `i * STRING_MAP_STRIDE`. Built lazily on first random-access need.
    offset_map: Option<Vec<u32>>,
    retain: u16,
}

impl HeapStringData {
    pub fn new(s: impl Into<Wtf8Buf>) -> Self {
        let bytes: Wtf8Buf = s.into();
        Self {
            bytes,
            length: None,
            offset_map: None,
            retain: 1,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_pure_ascii(&self) -> bool {
        self.bytes.as_bytes().is_ascii()
    }

    /// Code-point count, computed and cached on first call.
    pub fn code_point_len(&mut self) -> u32 {
        if let Some(len) = self.length {
            return len;
        }
        let len = self.bytes.code_points().count() as u32;
        self.length = Some(len);
        len
    }

    /// Builds the offset map if it does not exist yet and the string is
    /// not pure ASCII (ASCII strings need no map: byte offset == code
    /// point index).
    fn ensure_offset_map(&mut self) {
        if self.offset_map.is_some() || self.is_pure_ascii() {
            return;
        }
        let mut map = Vec::new();
        let mut byte_offset = 0u32;
        for (i, cp) in self.bytes.code_points().enumerate() {
            if i as u32 % STRING_MAP_STRIDE == 0 {
                map.push(byte_offset);
            }
            byte_offset += cp.to_char().map(|c| c.len_utf8()).unwrap_or(3) as u32;
        }
        self.offset_map = Some(map);
    }

    /// Code point at `index`, or `None` if out of range.
    pub fn code_point_at(&mut self, index: u32) -> Option<CodePoint> {
        if self.is_pure_ascii() {
            return self.bytes.as_bytes().get(index as usize).map(|b| CodePoint::from_u32(*b as u32).unwrap());
        }
        self.ensure_offset_map();
        let map = self.offset_map.as_ref().unwrap();
        let stride_idx = (index / STRING_MAP_STRIDE) as usize;
        let mut byte_offset = *map.get(stride_idx)? as usize;
        let mut cp_idx = stride_idx as u32 * STRING_MAP_STRIDE;
        let slice = &self.bytes.as_bytes()[byte_offset..];
        for cp in Wtf8Buf::from_wtf8(slice).unwrap_or_default().code_points() {
            if cp_idx == index {
                return Some(cp);
            }
            cp_idx += 1;
            byte_offset += cp.to_char().map(|c| c.len_utf8()).unwrap_or(3);
        }
        None
    }

    /// Byte slice `[start, end)` measured in code points, as a fresh
    /// `Wtf8Buf` (spec §4.7 Slice).
    pub fn slice(&mut self, start: u32, end: u32) -> Wtf8Buf {
        if self.is_pure_ascii() {
            let s = start as usize;
            let e = (end as usize).min(self.bytes.len());
            return Wtf8Buf::from_wtf8(&self.bytes.as_bytes()[s..e]).unwrap().to_owned();
        }
        self.ensure_offset_map();
        let mut out = Wtf8Buf::new();
        for (i, cp) in self.bytes.code_points().enumerate() {
            let i = i as u32;
            if i >= start && i < end {
                out.push(cp);
            }
            if i >= end {
                break;
            }
        }
        out
    }

    pub fn retain(&self) -> u16 {
        self.retain
    }

    pub fn mark_permanent(&mut self) {
        self.retain = RETAIN_PERMANENT;
    }

    pub fn inc_retain(&mut self) {
        if self.retain != RETAIN_PERMANENT {
            self.retain = self.retain.saturating_add(1);
        }
    }

    pub fn as_wtf8(&self) -> &wtf8::Wtf8 {
        &self.bytes
    }

    /// Lossy conversion to a Rust `&str`/`String` for host-facing display
    /// and for operations (`ToNumber`, atom interning) that only need
    /// valid Unicode text. Lone surrogates become U+FFFD.
    pub fn to_string_lossy(&self) -> String {
        self.bytes.to_string_lossy().into_owned()
    }
}

/// ECMAScript-subset `ToNumber` on strings (spec §4.7): trims ASCII
/// whitespace, recognizes `0x`/`0o`/`0b` integer literals, `Infinity`
/// (with optional sign), ordinary decimals; empty/whitespace-only parses
/// as `0.0`; anything else is `NaN`.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim_matches(|c: char| c.is_ascii_whitespace());
    if trimmed.is_empty() {
        return 0.0;
    }
    let (sign, rest) = match trimmed.as_bytes()[0] {
        b'+' => (1.0, &trimmed[1..]),
        b'-' => (-1.0, &trimmed[1..]),
        _ => (1.0, trimmed),
    };
    if rest == "Infinity" {
        return sign * f64::INFINITY;
    }
    if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).map(|v| sign * v as f64).unwrap_or(f64::NAN);
    }
    if let Some(oct) = rest.strip_prefix("0o").or_else(|| rest.strip_prefix("0O")) {
        return i64::from_str_radix(oct, 8).map(|v| sign * v as f64).unwrap_or(f64::NAN);
    }
    if let Some(bin) = rest.strip_prefix("0b").or_else(|| rest.strip_prefix("0B")) {
        return i64::from_str_radix(bin, 2).map(|v| sign * v as f64).unwrap_or(f64::NAN);
    }
    match fast_float::parse::<f64, _>(rest) {
        Ok(v) => sign * v,
        Err(_) => f64::NAN,
    }
}

/// Concatenates two strings, keeping the combined code-point length valid
/// only when both inputs' lengths were already known (spec §4.7).
pub fn concat(a: &wtf8::Wtf8, a_len: Option<u32>, b: &wtf8::Wtf8, b_len: Option<u32>) -> (Wtf8Buf, Option<u32>) {
    let mut out = Wtf8Buf::new();
    out.push_wtf8(a);
    out.push_wtf8(b);
    let len = match (a_len, b_len) {
        (Some(x), Some(y)) => Some(x + y),
        _ => None,
    };
    (out, len)
}

/// ToString(Number) (spec §4.7, `Number::toString`): integers print without
/// a decimal point, NaN/Infinity print their literal names, everything else
/// goes through `ryu_js` for the shortest round-tripping decimal form —
/// mirrors the teacher's own `Number::to_string_radix_10`.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() };
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e21 {
        return format!("{n}");
    }
    let mut buffer = ryu_js::Buffer::new();
    buffer.format(n).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_number_basics() {
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("   "), 0.0);
        assert_eq!(string_to_number("42"), 42.0);
        assert_eq!(string_to_number("  42  "), 42.0);
        assert_eq!(string_to_number("-3.5"), -3.5);
        assert_eq!(string_to_number("0x1F"), 31.0);
        assert_eq!(string_to_number("0b101"), 5.0);
        assert_eq!(string_to_number("Infinity"), f64::INFINITY);
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
        assert!(string_to_number("not a number").is_nan());
    }

    #[test]
    fn ascii_length_equals_size() {
        let mut s = HeapStringData::new("hello world");
        assert_eq!(s.code_point_len(), 11);
    }

    #[test]
    fn slice_on_multibyte() {
        let mut s = HeapStringData::new("héllo wörld");
        let sliced = s.slice(1, 5);
        assert_eq!(sliced.to_string_lossy(), "éllo");
    }

    #[test]
    fn concat_keeps_length_when_known() {
        let mut a = HeapStringData::new("foo");
        let mut b = HeapStringData::new("bar");
        let (bytes, len) = concat(a.as_wtf8(), Some(a.code_point_len()), b.as_wtf8(), Some(b.code_point_len()));
        assert_eq!(bytes.to_string_lossy(), "foobar");
        assert_eq!(len, Some(6));
    }
}
