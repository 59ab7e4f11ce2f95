//! Cursor-based reads over a contiguous byte region.
//!
//! Every read is bounds-checked and reports [`DecodeError::Truncated`] when
//! fewer bytes remain than required; nothing in this module can panic on
//! attacker-controlled input. Raw slices are returned as borrowed views of
//! the underlying buffer, so decoding a body performs no allocation beyond
//! the strings the caller keeps.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes remain than the read requires.
    #[error("truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// A negative or implausibly large length prefix.
    #[error("malformed length: {0}")]
    MalformedLength(i64),
}

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Cursor over a byte slice with the primitive reads the Kafka protocol is
/// built from.
pub struct ByteDecoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_i8(&mut self) -> Result<i8> {
        Ok(self.get_u8()? as i8)
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn get_i16(&mut self) -> Result<i16> {
        Ok(self.get_u16()? as i16)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        Ok(self.get_u32()? as i32)
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(self.get_u64()? as i64)
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    /// Non-null string with an i16 length prefix. A null marker (-1) is
    /// malformed here; use [`get_nullable_string`](Self::get_nullable_string)
    /// where the protocol permits null.
    ///
    /// Invalid UTF-8 is replaced rather than rejected: client ids and topic
    /// names on the wire are occasionally garbage and a lossy label is more
    /// useful than a dropped request.
    pub fn get_string(&mut self) -> Result<String> {
        let len = self.get_i16()?;
        if len < 0 {
            return Err(DecodeError::MalformedLength(len as i64));
        }
        let raw = self.take(len as usize)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    /// Nullable string with an i16 length prefix; -1 decodes to `None`.
    pub fn get_nullable_string(&mut self) -> Result<Option<String>> {
        let len = self.get_i16()?;
        if len == -1 {
            return Ok(None);
        }
        if len < 0 {
            return Err(DecodeError::MalformedLength(len as i64));
        }
        let raw = self.take(len as usize)?;
        Ok(Some(String::from_utf8_lossy(raw).into_owned()))
    }

    /// Non-null byte region with an i32 length prefix, borrowed.
    pub fn get_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.get_i32()?;
        if len < 0 {
            return Err(DecodeError::MalformedLength(len as i64));
        }
        self.take(len as usize)
    }

    /// Nullable byte region with an i32 length prefix; -1 decodes to `None`.
    pub fn get_nullable_bytes(&mut self) -> Result<Option<&'a [u8]>> {
        let len = self.get_i32()?;
        if len == -1 {
            return Ok(None);
        }
        if len < 0 {
            return Err(DecodeError::MalformedLength(len as i64));
        }
        Ok(Some(self.take(len as usize)?))
    }

    /// Array length prefix. Negative lengths are malformed.
    pub fn get_array_length(&mut self) -> Result<usize> {
        let len = self.get_i32()?;
        if len < 0 {
            return Err(DecodeError::MalformedLength(len as i64));
        }
        Ok(len as usize)
    }

    /// Borrowed view of the next `n` bytes.
    pub fn get_raw_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Advance past `n` bytes without looking at them.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_reads() {
        let buf = [
            0x01, // u8
            0xff, 0xfe, // i16 = -2
            0x00, 0x00, 0x00, 0x2a, // i32 = 42
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe, // i64 = -2
            0x01, // bool
        ];
        let mut dec = ByteDecoder::new(&buf);
        assert_eq!(dec.get_u8().unwrap(), 1);
        assert_eq!(dec.get_i16().unwrap(), -2);
        assert_eq!(dec.get_i32().unwrap(), 42);
        assert_eq!(dec.get_i64().unwrap(), -2);
        assert!(dec.get_bool().unwrap());
        assert_eq!(dec.remaining(), 0);
    }

    #[test]
    fn string_reads() {
        let buf = [0x00, 0x05, b'h', b'e', b'l', b'l', b'o'];
        let mut dec = ByteDecoder::new(&buf);
        assert_eq!(dec.get_string().unwrap(), "hello");
    }

    #[test]
    fn nullable_string_null_marker() {
        let buf = [0xff, 0xff];
        let mut dec = ByteDecoder::new(&buf);
        assert_eq!(dec.get_nullable_string().unwrap(), None);
    }

    #[test]
    fn empty_string_is_valid() {
        let buf = [0x00, 0x00];
        let mut dec = ByteDecoder::new(&buf);
        assert_eq!(dec.get_string().unwrap(), "");
    }

    #[test]
    fn truncated_string_reports_needed_bytes() {
        let buf = [0x00, 0x09, b'x'];
        let mut dec = ByteDecoder::new(&buf);
        assert_eq!(
            dec.get_string(),
            Err(DecodeError::Truncated {
                needed: 9,
                available: 1
            })
        );
    }

    #[test]
    fn negative_array_length_is_malformed() {
        let buf = [0xff, 0xff, 0xff, 0xfb];
        let mut dec = ByteDecoder::new(&buf);
        assert_eq!(dec.get_array_length(), Err(DecodeError::MalformedLength(-5)));
    }

    #[test]
    fn zero_array_length_is_valid() {
        let buf = [0x00, 0x00, 0x00, 0x00];
        let mut dec = ByteDecoder::new(&buf);
        assert_eq!(dec.get_array_length().unwrap(), 0);
    }

    #[test]
    fn nullable_bytes() {
        let buf = [
            0xff, 0xff, 0xff, 0xff, // null
            0x00, 0x00, 0x00, 0x02, 0xaa, 0xbb, // two bytes
        ];
        let mut dec = ByteDecoder::new(&buf);
        assert_eq!(dec.get_nullable_bytes().unwrap(), None);
        assert_eq!(dec.get_nullable_bytes().unwrap(), Some(&[0xaa, 0xbb][..]));
    }

    #[test]
    fn raw_bytes_are_borrowed_and_skip_advances() {
        let buf = [1u8, 2, 3, 4, 5];
        let mut dec = ByteDecoder::new(&buf);
        let head = dec.get_raw_bytes(2).unwrap();
        assert_eq!(head, &[1, 2]);
        dec.skip(2).unwrap();
        assert_eq!(dec.remaining(), 1);
        assert!(dec.skip(2).is_err());
    }

    #[test]
    fn lossy_utf8_does_not_fail() {
        let buf = [0x00, 0x02, 0xff, 0xfe];
        let mut dec = ByteDecoder::new(&buf);
        let s = dec.get_string().unwrap();
        assert_eq!(s.chars().count(), 2);
    }
}
