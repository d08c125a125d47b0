//! Little-endian byte cursor used by the body, signature and stream parsers.
//!
//! The host hands the engine raw in-memory slices (method bodies, signature
//! blobs), so all parsing in this crate is layered on [`Parser`], a
//! bounds-checked cursor with support for the ECMA-335 compressed integer
//! encoding (II.23.2).

use crate::{Error::OutOfBounds, Result};

/// Primitive types that can be read from a little-endian byte stream.
pub trait LeIo: Sized {
    /// Width of the value in bytes.
    const SIZE: usize;

    /// Decode one value from the start of `data`. The caller guarantees that
    /// at least [`Self::SIZE`] bytes are present.
    fn from_le(data: &[u8]) -> Self;
}

macro_rules! impl_le_io {
    ($($t:ty),*) => {
        $(impl LeIo for $t {
            const SIZE: usize = std::mem::size_of::<$t>();

            fn from_le(data: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&data[..std::mem::size_of::<$t>()]);
                <$t>::from_le_bytes(raw)
            }
        })*
    };
}

impl_le_io!(u8, u16, u32, u64, i8, i16, i32, i64);

/// Read one little-endian value from the start of a slice.
///
/// # Errors
/// Returns [`OutOfBounds`] if the slice is shorter than the value.
pub fn read_le<T: LeIo>(data: &[u8]) -> Result<T> {
    if data.len() < T::SIZE {
        return Err(OutOfBounds);
    }

    Ok(T::from_le(data))
}

/// Read one little-endian value at `*pos`, advancing `*pos` past it.
///
/// # Errors
/// Returns [`OutOfBounds`] if fewer than `T::SIZE` bytes remain at `*pos`.
pub fn read_le_at<T: LeIo>(data: &[u8], pos: &mut usize) -> Result<T> {
    let Some(remaining) = data.len().checked_sub(*pos) else {
        return Err(OutOfBounds);
    };
    if remaining < T::SIZE {
        return Err(OutOfBounds);
    }

    let value = T::from_le(&data[*pos..]);
    *pos += T::SIZE;
    Ok(value)
}

/// A sequential reader over a byte slice.
///
/// Keeps an explicit position, never reads past the end of its input, and
/// decodes both fixed-width little-endian values and ECMA-335 compressed
/// integers.
pub struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    /// Create a new `Parser` over `data`, positioned at the start.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, pos: 0 }
    }

    /// Total length of the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// `true` if the underlying data is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `true` while at least one byte remains to be read.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.pos < self.data.len()
    }

    /// Current read position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Number of bytes between the current position and the end.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Move the read position to `pos`.
    ///
    /// # Errors
    /// Returns [`OutOfBounds`] if `pos` is past the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(OutOfBounds);
        }

        self.pos = pos;
        Ok(())
    }

    /// Advance the read position by `step` bytes.
    ///
    /// # Errors
    /// Returns [`OutOfBounds`] if fewer than `step` bytes remain.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let Some(target) = self.pos.checked_add(step) else {
            return Err(OutOfBounds);
        };
        self.seek(target)
    }

    /// Read the next byte without advancing.
    ///
    /// # Errors
    /// Returns [`OutOfBounds`] at the end of the data.
    pub fn peek_byte(&self) -> Result<u8> {
        match self.data.get(self.pos) {
            Some(byte) => Ok(*byte),
            None => Err(OutOfBounds),
        }
    }

    /// Read one little-endian value and advance past it.
    ///
    /// # Errors
    /// Returns [`OutOfBounds`] if not enough bytes remain.
    pub fn read_le<T: LeIo>(&mut self) -> Result<T> {
        read_le_at(self.data, &mut self.pos)
    }

    /// Read `length` raw bytes and advance past them.
    ///
    /// # Errors
    /// Returns [`OutOfBounds`] if fewer than `length` bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        if self.remaining() < length {
            return Err(OutOfBounds);
        }

        let slice = &self.data[self.pos..self.pos + length];
        self.pos += length;
        Ok(slice)
    }

    /// Read an ECMA-335 compressed unsigned integer (II.23.2).
    ///
    /// One, two or four bytes depending on the two leading bits of the first
    /// byte.
    ///
    /// # Errors
    /// Returns [`OutOfBounds`] on truncated input, or `Malformed` for the
    /// reserved `111`-prefixed form.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first = self.read_le::<u8>()?;
        if first & 0x80 == 0 {
            return Ok(u32::from(first));
        }

        if first & 0xC0 == 0x80 {
            let second = self.read_le::<u8>()?;
            return Ok((u32::from(first & 0x3F) << 8) | u32::from(second));
        }

        if first & 0xE0 == 0xC0 {
            let b2 = self.read_le::<u8>()?;
            let b3 = self.read_le::<u8>()?;
            let b4 = self.read_le::<u8>()?;
            return Ok((u32::from(first & 0x1F) << 24)
                | (u32::from(b2) << 16)
                | (u32::from(b3) << 8)
                | u32::from(b4));
        }

        Err(malformed_error!(
            "Invalid compressed integer prefix - {:02X}",
            first
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_le_primitives() {
        let data = [0x01, 0x02, 0x03, 0x04];
        assert_eq!(read_le::<u8>(&data).unwrap(), 0x01);
        assert_eq!(read_le::<u16>(&data).unwrap(), 0x0201);
        assert_eq!(read_le::<u32>(&data).unwrap(), 0x0403_0201);
        assert!(read_le::<u64>(&data).is_err());
    }

    #[test]
    fn read_le_at_advances() {
        let data = [0xAA, 0xBB, 0xCC];
        let mut pos = 0;
        assert_eq!(read_le_at::<u8>(&data, &mut pos).unwrap(), 0xAA);
        assert_eq!(read_le_at::<u16>(&data, &mut pos).unwrap(), 0xCCBB);
        assert_eq!(pos, 3);
        assert!(read_le_at::<u8>(&data, &mut pos).is_err());
    }

    #[test]
    fn parser_bounds() {
        let data = [0x2A];
        let mut parser = Parser::new(&data);
        assert!(parser.has_more_data());
        assert_eq!(parser.read_le::<u8>().unwrap(), 0x2A);
        assert!(!parser.has_more_data());
        assert!(parser.read_le::<u8>().is_err());
        assert!(parser.seek(2).is_err());
        assert!(parser.seek(1).is_ok());
    }

    #[test]
    fn compressed_uint_forms() {
        // 0x03 -> 3
        assert_eq!(Parser::new(&[0x03]).read_compressed_uint().unwrap(), 3);
        // 0x8080 -> 0x80
        assert_eq!(
            Parser::new(&[0x80, 0x80]).read_compressed_uint().unwrap(),
            0x80
        );
        // 0xC000_4000 -> 0x4000
        assert_eq!(
            Parser::new(&[0xC0, 0x00, 0x40, 0x00])
                .read_compressed_uint()
                .unwrap(),
            0x4000
        );
        // Reserved prefix
        assert!(Parser::new(&[0xE0]).read_compressed_uint().is_err());
        // Truncated
        assert!(Parser::new(&[0x80]).read_compressed_uint().is_err());
    }

    #[test]
    fn read_bytes_slice() {
        let data = [1, 2, 3, 4, 5];
        let mut parser = Parser::new(&data);
        parser.advance_by(1).unwrap();
        assert_eq!(parser.read_bytes(3).unwrap(), &[2, 3, 4]);
        assert_eq!(parser.remaining(), 1);
        assert!(parser.read_bytes(2).is_err());
    }
}
