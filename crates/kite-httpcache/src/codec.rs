//! Binary Record Codec
//!
//! Bounds-checked cursor reader/writer for the fixed-layout FAT record
//! encoding: little-endian fixed-width fields followed by length-prefixed
//! strings, each string section padded to the serialization alignment.

/// Alignment unit of the record encoding. Every string section and every
/// whole record occupies a multiple of this many bytes.
pub const SERIAL_ALIGN: usize = 4;

/// Round `x` up to the next multiple of `unit`.
pub fn round_up(x: usize, unit: usize) -> usize {
    x.div_ceil(unit) * unit
}

/// Round a content length up to the next multiple of `unit`.
pub fn round_up_i64(x: i64, unit: i64) -> i64 {
    (x + unit - 1) / unit * unit
}

/// Codec failure. Only reachable on a buffer-sizing bug or a corrupt blob
/// that slipped past the digest check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("out of bounds: need {need} bytes, {have} remaining")]
    OutOfBounds { need: usize, have: usize },

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,
}

/// Cursor writer over a preallocated buffer.
pub struct ByteWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if bytes.len() > self.remaining() {
            return Err(CodecError::OutOfBounds {
                need: bytes.len(),
                have: self.remaining(),
            });
        }
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<(), CodecError> {
        self.put(&v.to_le_bytes())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<(), CodecError> {
        self.put(&v.to_le_bytes())
    }

    pub fn write_i64(&mut self, v: i64) -> Result<(), CodecError> {
        self.put(&v.to_le_bytes())
    }

    pub fn write_f64(&mut self, v: f64) -> Result<(), CodecError> {
        self.put(&v.to_le_bytes())
    }

    pub fn write_bool(&mut self, v: bool) -> Result<(), CodecError> {
        self.write_i32(if v { 1 } else { 0 })
    }

    /// Length prefix, UTF-8 bytes, zero padding up to the alignment unit.
    pub fn write_string(&mut self, s: &str) -> Result<(), CodecError> {
        let bytes = s.as_bytes();
        let padded = round_up(bytes.len(), SERIAL_ALIGN);
        if 4 + padded > self.remaining() {
            return Err(CodecError::OutOfBounds {
                need: 4 + padded,
                have: self.remaining(),
            });
        }
        self.write_u32(bytes.len() as u32)?;
        self.put(bytes)?;
        for _ in bytes.len()..padded {
            self.buf[self.pos] = 0;
            self.pos += 1;
        }
        Ok(())
    }
}

/// Cursor reader over a serialized blob.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if n > self.remaining() {
            return Err(CodecError::OutOfBounds {
                need: n,
                have: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(i64::from_le_bytes(a))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(f64::from_le_bytes(a))
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_i32()? != 0)
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_u32()? as usize;
        let padded = round_up(len, SERIAL_ALIGN);
        let bytes = self.take(padded)?;
        String::from_utf8(bytes[..len].to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 4), 0);
        assert_eq!(round_up(1, 4), 4);
        assert_eq!(round_up(4, 4), 4);
        assert_eq!(round_up(5, 4), 8);
        assert_eq!(round_up_i64(10_000, 16 * 1024), 16 * 1024);
        assert_eq!(round_up_i64(16 * 1024, 16 * 1024), 16 * 1024);
        assert_eq!(round_up_i64(0, 16 * 1024), 0);
    }

    #[test]
    fn test_scalar_round_trip() {
        let mut buf = vec![0u8; 64];
        let mut w = ByteWriter::new(&mut buf);
        w.write_i64(-42).unwrap();
        w.write_i32(301).unwrap();
        w.write_bool(true).unwrap();
        w.write_f64(3600.5).unwrap();
        w.write_f64(f64::NAN).unwrap();
        let written = w.position();

        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_i64().unwrap(), -42);
        assert_eq!(r.read_i32().unwrap(), 301);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_f64().unwrap(), 3600.5);
        assert!(r.read_f64().unwrap().is_nan());
        assert_eq!(r.position(), written);
    }

    #[test]
    fn test_string_padding() {
        let mut buf = vec![0xAAu8; 32];
        let mut w = ByteWriter::new(&mut buf);
        w.write_string("abcde").unwrap();
        // 4-byte prefix + 5 bytes rounded to 8
        assert_eq!(w.position(), 12);
        assert_eq!(&buf[9..12], &[0, 0, 0], "padding must be zeroed");

        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_string().unwrap(), "abcde");
        assert_eq!(r.position(), 12);
    }

    #[test]
    fn test_empty_string() {
        let mut buf = vec![0u8; 8];
        let mut w = ByteWriter::new(&mut buf);
        w.write_string("").unwrap();
        assert_eq!(w.position(), 4);

        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_string().unwrap(), "");
    }

    #[test]
    fn test_writer_bounds() {
        let mut buf = vec![0u8; 6];
        let mut w = ByteWriter::new(&mut buf);
        assert!(w.write_i32(1).is_ok());
        assert!(matches!(
            w.write_i32(2),
            Err(CodecError::OutOfBounds { need: 4, have: 2 })
        ));
    }

    #[test]
    fn test_reader_rejects_oversized_length_prefix() {
        // Length prefix claims far more bytes than the buffer holds.
        let mut buf = vec![0u8; 8];
        buf[..4].copy_from_slice(&u32::MAX.to_le_bytes());
        let mut r = ByteReader::new(&buf);
        assert!(matches!(
            r.read_string(),
            Err(CodecError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_reader_rejects_invalid_utf8() {
        let mut buf = vec![0u8; 8];
        buf[..4].copy_from_slice(&3u32.to_le_bytes());
        buf[4] = 0xFF;
        buf[5] = 0xFE;
        buf[6] = 0xFD;
        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_string(), Err(CodecError::InvalidUtf8));
    }
}
