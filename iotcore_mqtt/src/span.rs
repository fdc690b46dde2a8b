// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A non-owning, bounds-checked view over a caller-owned byte buffer.
//!
//! [`Span`] is a read cursor over borrowed bytes; [`SpanWriter`] is a write
//! cursor over a borrowed `&mut [u8]` that tracks how much of the buffer has
//! been written. Both are value types — copying one copies only the view,
//! never the underlying bytes.

use std::fmt;

/// A read-only, bounds-checked cursor over a borrowed byte slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span<'a> {
    bytes: &'a [u8],
}

/// Error returned by [`Span`]/[`SpanWriter`] operations that would read or
/// write past the end of the underlying buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SpanError {
    /// A write would overflow the destination buffer's remaining capacity.
    #[error("not enough space in destination buffer")]
    NotEnoughSpace,
    /// A read or slice offset fell outside the span's bounds.
    #[error("offset out of bounds")]
    OutOfBounds,
}

impl<'a> Span<'a> {
    /// Wrap a borrowed byte slice as a [`Span`].
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// The number of bytes visible through this view.
    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Borrow the underlying bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// A narrower view over `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> Result<Span<'a>, SpanError> {
        if start > end || end > self.bytes.len() {
            return Err(SpanError::OutOfBounds);
        }
        Ok(Span::new(&self.bytes[start..end]))
    }

    /// A narrower view over `[start, len)`.
    pub fn slice_to_end(&self, start: usize) -> Result<Span<'a>, SpanError> {
        self.slice(start, self.bytes.len())
    }

    /// Find the first occurrence of `needle`, returning its offset.
    #[must_use]
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() {
            return Some(0);
        }
        self.bytes
            .windows(needle.len())
            .position(|window| window == needle)
    }

    /// Split on the first occurrence of `sep`, returning the token before it
    /// and leaving `self` positioned after the separator.
    ///
    /// Returns `None`, leaving the span untouched, if `sep` does not occur.
    pub fn token(&mut self, sep: u8) -> Option<Span<'a>> {
        let pos = self.bytes.iter().position(|&b| b == sep)?;
        let head = &self.bytes[..pos];
        self.bytes = &self.bytes[pos + 1..];
        Some(Span::new(head))
    }

    /// Case-insensitive ASCII equality.
    #[must_use]
    pub fn is_equal_ignoring_case(&self, other: &Span<'_>) -> bool {
        self.bytes.eq_ignore_ascii_case(other.bytes)
    }

    /// Parse the view as a decimal, unsigned 64-bit integer.
    pub fn to_uint64(&self) -> Result<u64, SpanError> {
        std::str::from_utf8(self.bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(SpanError::OutOfBounds)
    }

    /// Parse the view as a decimal, signed 64-bit integer.
    pub fn to_int64(&self) -> Result<i64, SpanError> {
        std::str::from_utf8(self.bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(SpanError::OutOfBounds)
    }

    /// Parse the view as a floating-point number.
    pub fn to_double(&self) -> Result<f64, SpanError> {
        std::str::from_utf8(self.bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(SpanError::OutOfBounds)
    }
}

impl fmt::Display for Span<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(self.bytes) {
            Ok(s) => f.write_str(s),
            Err(_) => write!(f, "{:?}", self.bytes),
        }
    }
}

/// A bounds-checked write cursor over a caller-owned `&mut [u8]` buffer.
///
/// Tracks `written`, the number of bytes appended so far; `buffer` always
/// outlives every [`Span`] handed back from [`SpanWriter::committed`].
pub struct SpanWriter<'a> {
    buffer: &'a mut [u8],
    written: usize,
}

impl<'a> SpanWriter<'a> {
    /// Wrap a caller-owned buffer for writing.
    #[must_use]
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, written: 0 }
    }

    /// Bytes written into the buffer so far.
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }

    /// The remaining free capacity.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.written
    }

    /// Append raw bytes, failing if they would not fit.
    pub fn copy(&mut self, src: &[u8]) -> Result<(), SpanError> {
        if src.len() > self.remaining() {
            return Err(SpanError::NotEnoughSpace);
        }
        let start = self.written;
        self.buffer[start..start + src.len()].copy_from_slice(src);
        self.written += src.len();
        Ok(())
    }

    /// Append a single byte.
    pub fn append_u8(&mut self, byte: u8) -> Result<(), SpanError> {
        self.copy(&[byte])
    }

    /// Append the decimal ASCII representation of `value`.
    pub fn append_i32_decimal(&mut self, value: i32) -> Result<(), SpanError> {
        let formatted = value.to_string();
        self.copy(formatted.as_bytes())
    }

    /// Percent-encode `src` per RFC 3986 `unreserved` characters and append it.
    ///
    /// Returns the number of bytes written for this call.
    pub fn url_encode(&mut self, src: &[u8]) -> Result<usize, SpanError> {
        let start = self.written;
        for &byte in src {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
                self.append_u8(byte)?;
            } else {
                self.copy(format!("%{byte:02X}").as_bytes())?;
            }
        }
        Ok(self.written - start)
    }

    /// A [`Span`] over everything written so far.
    #[must_use]
    pub fn committed(&self) -> Span<'_> {
        Span::new(&self.buffer[..self.written])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_out_of_bounds_is_rejected() {
        let span = Span::new(b"hello");
        assert_eq!(span.slice(2, 10), Err(SpanError::OutOfBounds));
        assert!(span.slice(1, 4).is_ok());
    }

    #[test]
    fn token_splits_and_advances() {
        let mut span = Span::new(b"a/b/c");
        let first = span.token(b'/').unwrap();
        assert_eq!(first.as_bytes(), b"a");
        let second = span.token(b'/').unwrap();
        assert_eq!(second.as_bytes(), b"b");
        assert_eq!(span.as_bytes(), b"c");
    }

    #[test]
    fn writer_rejects_overflow() {
        let mut buf = [0u8; 4];
        let mut writer = SpanWriter::new(&mut buf);
        assert!(writer.copy(b"abcd").is_ok());
        assert_eq!(writer.copy(b"e"), Err(SpanError::NotEnoughSpace));
    }

    #[test]
    fn url_encode_preserves_unreserved_and_escapes_rest() {
        let mut buf = [0u8; 32];
        let mut writer = SpanWriter::new(&mut buf);
        writer.url_encode(b"a b+c").unwrap();
        assert_eq!(writer.committed().as_bytes(), b"a%20b%2Bc");
    }

    #[test]
    fn numeric_parsing_round_trips() {
        assert_eq!(Span::new(b"42").to_uint64().unwrap(), 42);
        assert_eq!(Span::new(b"-7").to_int64().unwrap(), -7);
        assert!((Span::new(b"1.5").to_double().unwrap() - 1.5).abs() < f64::EPSILON);
    }
}
