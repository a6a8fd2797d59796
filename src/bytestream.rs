// Copyright (c) the rawdec Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{IoError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// A positional cursor over a byte region.
///
/// Every read either advances and returns a value or fails with a typed
/// [`IoError`]; there is no partial state. Endianness is a stream property
/// applied to all fixed-width integer reads.
///
/// ```
/// # use rawdec::bytestream::{ByteStream, Endianness};
/// let mut bs = ByteStream::new(&[0x12, 0x34, 0x56, 0x78], Endianness::Big);
/// assert_eq!(bs.get_u16()?, 0x1234);
/// assert_eq!(bs.peek_u16()?, 0x5678);
/// assert_eq!(bs.remaining(), 2);
/// # Ok::<(), rawdec::Error>(())
/// ```
#[derive(Clone)]
pub struct ByteStream<'a> {
    data: &'a [u8],
    pos: usize,
    endian: Endianness,
}

impl<'a> ByteStream<'a> {
    pub fn new(data: &'a [u8], endian: Endianness) -> ByteStream<'a> {
        ByteStream {
            data,
            pos: 0,
            endian,
        }
    }

    /// A stream over a whole [`Buffer`](crate::buffer::Buffer).
    pub fn from_buffer<'b>(
        buffer: &'a crate::buffer::Buffer<'b>,
        endian: Endianness,
    ) -> ByteStream<'a> {
        ByteStream::new(buffer, endian)
    }

    pub fn endianness(&self) -> Endianness {
        self.endian
    }

    /// Switches the byte order applied to subsequent integer reads. JPEG
    /// segments embedded in little-endian TIFF streams need this.
    pub fn set_endianness(&mut self, endian: Endianness) {
        self.endian = endian;
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// The unread tail, without advancing.
    pub fn remaining_slice(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn check(&self, wanted: usize) -> Result<()> {
        if wanted > self.remaining() {
            return Err(IoError::Overflow {
                wanted,
                left: self.remaining(),
            }
            .into());
        }
        Ok(())
    }

    pub fn set_position(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(IoError::Overflow {
                wanted: pos,
                left: self.data.len(),
            }
            .into());
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.check(n)?;
        self.pos += n;
        Ok(())
    }

    /// Returns the next `n` bytes and advances.
    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.check(n)?;
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Returns a sub-stream over the next `n` bytes and advances past them.
    pub fn get_stream(&mut self, n: usize) -> Result<ByteStream<'a>> {
        Ok(ByteStream::new(self.get_bytes(n)?, self.endian))
    }

    /// A sub-stream of exactly `count * stride` bytes, without advancing.
    pub fn peek_stream(&self, count: usize, stride: usize) -> Result<ByteStream<'a>> {
        let n = count
            .checked_mul(stride)
            .ok_or(IoError::Overflow {
                wanted: usize::MAX,
                left: self.remaining(),
            })?;
        self.check(n)?;
        Ok(ByteStream::new(
            &self.data[self.pos..self.pos + n],
            self.endian,
        ))
    }

    /// A borrowed view over `[offset, offset + count)` of the whole stream,
    /// independent of the cursor.
    pub fn get_sub_view(&self, offset: usize, count: usize) -> Result<&'a [u8]> {
        if offset.checked_add(count).map_or(true, |end| end > self.data.len()) {
            return Err(IoError::OutOfBounds {
                offset,
                count,
                size: self.data.len(),
            }
            .into());
        }
        Ok(&self.data[offset..offset + count])
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.check(1)?;
        Ok(self.data[self.pos])
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        let v = self.peek_u8()?;
        self.pos += 1;
        Ok(v)
    }

    pub fn peek_u16(&self) -> Result<u16> {
        self.check(2)?;
        let s = &self.data[self.pos..];
        Ok(match self.endian {
            Endianness::Little => LittleEndian::read_u16(s),
            Endianness::Big => BigEndian::read_u16(s),
        })
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        let v = self.peek_u16()?;
        self.pos += 2;
        Ok(v)
    }

    pub fn peek_u32(&self) -> Result<u32> {
        self.check(4)?;
        let s = &self.data[self.pos..];
        Ok(match self.endian {
            Endianness::Little => LittleEndian::read_u32(s),
            Endianness::Big => BigEndian::read_u32(s),
        })
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        let v = self.peek_u32()?;
        self.pos += 4;
        Ok(v)
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.check(8)?;
        let s = &self.data[self.pos..];
        let v = match self.endian {
            Endianness::Little => LittleEndian::read_u64(s),
            Endianness::Big => BigEndian::read_u64(s),
        };
        self.pos += 8;
        Ok(v)
    }
}

impl std::fmt::Debug for ByteStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ByteStream{{pos {}/{}, {:?}}}",
            self.pos,
            self.data.len(),
            self.endian
        )
    }
}
