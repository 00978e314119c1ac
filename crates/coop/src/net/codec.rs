use bytes::{Buf, BufMut, Bytes, BytesMut};
use glam::Vec3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty message")]
    Empty,
    #[error("unknown message type {0}")]
    UnknownType(u8),
    #[error("message truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("invalid length prefix")]
    InvalidLength,
    #[error("text is not valid utf-8")]
    InvalidText,
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

pub struct WireWriter {
    buf: BytesMut,
}

impl Default for WireWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl WireWriter {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(value as u8);
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    pub fn put_f32(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    pub fn put_vec3(&mut self, value: Vec3) {
        self.put_f32(value.x);
        self.put_f32(value.y);
        self.put_f32(value.z);
    }

    /// Byte length as a 7-bit varint, then the UTF-8 bytes.
    pub fn put_str(&mut self, value: &str) {
        let mut len = value.len() as u32;
        while len >= 0x80 {
            self.buf.put_u8((len as u8) | 0x80);
            len >>= 7;
        }
        self.buf.put_u8(len as u8);
        self.buf.put_slice(value.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, need: usize) -> Result<(), DecodeError> {
        let have = self.buf.remaining();
        if have < need {
            return Err(DecodeError::Truncated { need, have });
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn get_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_i32(&mut self) -> Result<i32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn get_u32(&mut self) -> Result<u32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn get_i64(&mut self) -> Result<i64, DecodeError> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn get_f32(&mut self) -> Result<f32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn get_vec3(&mut self) -> Result<Vec3, DecodeError> {
        self.need(12)?;
        Ok(Vec3::new(
            self.buf.get_f32_le(),
            self.buf.get_f32_le(),
            self.buf.get_f32_le(),
        ))
    }

    pub fn get_string(&mut self) -> Result<String, DecodeError> {
        let len = self.get_length_prefix()? as usize;
        self.need(len)?;
        let text = std::str::from_utf8(&self.buf[..len])
            .map_err(|_| DecodeError::InvalidText)?
            .to_owned();
        self.buf.advance(len);
        Ok(text)
    }

    fn get_length_prefix(&mut self) -> Result<u32, DecodeError> {
        let mut value = 0u32;
        for shift in (0..35).step_by(7) {
            let byte = self.get_u8()?;
            if shift == 28 && byte > 0x0F {
                return Err(DecodeError::InvalidLength);
            }
            value |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DecodeError::InvalidLength)
    }

    pub fn finish(self) -> Result<(), DecodeError> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_layout() {
        let mut writer = WireWriter::new();
        writer.put_i32(1);
        writer.put_f32(1.0);
        let bytes = writer.finish();

        assert_eq!(&bytes[..4], &[1, 0, 0, 0]);
        assert_eq!(&bytes[4..], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_short_string_prefix() {
        let mut writer = WireWriter::new();
        writer.put_str("Bob");
        let bytes = writer.finish();

        assert_eq!(&bytes[..], &[3, b'B', b'o', b'b']);
    }

    #[test]
    fn test_long_string_prefix() {
        let text = "x".repeat(300);
        let mut writer = WireWriter::new();
        writer.put_str(&text);
        let bytes = writer.finish();

        // 300 = 0b10_0101100
        assert_eq!(&bytes[..2], &[0xAC, 0x02]);

        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.get_string().unwrap(), text);
        reader.finish().unwrap();
    }

    #[test]
    fn test_string_length_past_end() {
        let mut reader = WireReader::new(&[10, b'a', b'b']);
        assert_eq!(
            reader.get_string(),
            Err(DecodeError::Truncated { need: 10, have: 2 })
        );
    }

    #[test]
    fn test_runaway_length_prefix() {
        let mut reader = WireReader::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert_eq!(reader.get_string(), Err(DecodeError::InvalidLength));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut reader = WireReader::new(&[2, 0xC3, 0x28]);
        assert_eq!(reader.get_string(), Err(DecodeError::InvalidText));
    }

    #[test]
    fn test_bool_reads_any_nonzero() {
        let mut reader = WireReader::new(&[0, 1, 7]);
        assert!(!reader.get_bool().unwrap());
        assert!(reader.get_bool().unwrap());
        assert!(reader.get_bool().unwrap());
    }

    #[test]
    fn test_trailing_bytes() {
        let mut reader = WireReader::new(&[1, 0, 0, 0, 9]);
        reader.get_i32().unwrap();
        assert_eq!(reader.finish(), Err(DecodeError::TrailingBytes(1)));
    }
}
