// Copyright (c) the rawdec Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Pull-model bit readers over a byte region.
//!
//! All pumps share the same shape: a 64-bit cache refilled in 4-byte MCUs.
//! They differ in byte order within the MCU, in bit order within the cache,
//! and in whether the refill applies JPEG marker escaping. Reads past the
//! end of input produce zero bits for a bounded distance (vendor streams
//! rely on a small tail overread), then fail with [`IoError::EndOfStream`].

use crate::bytestream::ByteStream;
use crate::error::{IoError, Result};

/// Refill granularity, in bytes.
pub const MCU_SIZE: usize = 4;

/// How many zero bytes a pump may fabricate past the end of its input
/// before refilling becomes an error.
const MAX_OVERSHOOT: usize = 64;

/// The common pump interface. `n` is capped at 32 bits per call.
pub trait BitPump {
    /// Ensures at least `nbits` bits are cached. No-op when they already are.
    fn fill(&mut self, nbits: u32) -> Result<()>;

    /// Returns the next `nbits` without consuming them.
    fn peek_bits(&mut self, nbits: u32) -> Result<u32>;

    /// Consumes and returns the next `nbits`.
    fn get_bits(&mut self, nbits: u32) -> Result<u32>;

    /// Discards the next `nbits`.
    fn skip_bits(&mut self, nbits: u32) -> Result<()> {
        self.get_bits(nbits).map(|_| ())
    }

    /// Byte offset into the underlying input.
    fn get_buffer_position(&self) -> usize;
}

/// MSB-first cache: bits enter at the right, leave at the left
/// (the top `fill_level` bits of the low `fill_level` positions are next).
#[derive(Clone, Copy, Default, Debug)]
struct CacheMsb {
    cache: u64,
    fill_level: u32,
}

impl CacheMsb {
    fn push(&mut self, bits: u64, count: u32) {
        debug_assert!(self.fill_level + count <= 64);
        self.cache = (self.cache << count) | bits;
        self.fill_level += count;
    }

    fn peek(&self, count: u32) -> u32 {
        debug_assert!(count <= self.fill_level);
        if count == 0 {
            return 0;
        }
        ((self.cache >> (self.fill_level - count)) & ((1u64 << count) - 1)) as u32
    }

    fn skip(&mut self, count: u32) {
        debug_assert!(count <= self.fill_level);
        self.fill_level -= count;
    }

    /// Discards everything after the currently valid bits and pins the
    /// level at 64, so further reads drain the valid bits then yield zeros.
    fn pad_to_full(&mut self) {
        if self.fill_level == 0 {
            self.cache = 0;
        } else {
            self.cache <<= 64 - self.fill_level;
        }
        self.fill_level = 64;
    }
}

/// LSB-first cache: bits enter at the left, leave at the right.
#[derive(Clone, Copy, Default, Debug)]
struct CacheLsb {
    cache: u64,
    fill_level: u32,
}

impl CacheLsb {
    fn push(&mut self, bits: u64, count: u32) {
        debug_assert!(self.fill_level + count <= 64);
        self.cache |= bits << self.fill_level;
        self.fill_level += count;
    }

    fn peek(&self, count: u32) -> u32 {
        debug_assert!(count <= self.fill_level);
        if count == 0 {
            return 0;
        }
        (self.cache & ((1u64 << count) - 1)) as u32
    }

    fn skip(&mut self, count: u32) {
        debug_assert!(count <= self.fill_level);
        self.cache >>= count;
        self.fill_level -= count;
    }
}

/// Pulls the next MCU, zero-padding once the input runs dry.
fn next_mcu(data: &[u8], pos: &mut usize, overshoot: &mut usize) -> Result<[u8; MCU_SIZE]> {
    let mut mcu = [0u8; MCU_SIZE];
    let avail = data.len().saturating_sub(*pos).min(MCU_SIZE);
    if avail != MCU_SIZE {
        *overshoot += MCU_SIZE - avail;
        if *overshoot > MAX_OVERSHOOT {
            return Err(IoError::EndOfStream.into());
        }
    }
    mcu[..avail].copy_from_slice(&data[*pos..*pos + avail]);
    *pos += avail;
    Ok(mcu)
}

macro_rules! msb_pump_common {
    () => {
        fn fill(&mut self, nbits: u32) -> Result<()> {
            debug_assert!(nbits <= 32);
            while self.cache.fill_level < nbits {
                self.fill_cache()?;
            }
            Ok(())
        }

        fn peek_bits(&mut self, nbits: u32) -> Result<u32> {
            self.fill(nbits)?;
            Ok(self.cache.peek(nbits))
        }

        fn get_bits(&mut self, nbits: u32) -> Result<u32> {
            let bits = self.peek_bits(nbits)?;
            self.cache.skip(nbits);
            Ok(bits)
        }
    };
}

/// Plain big-endian pump: bytes are pushed in stream order, bits leave
/// MSB-first. This is the Nikon pump, and — run over a byte-reversed block
/// buffer — the Panasonic V6 pump.
pub struct BitPumpMsb<'a> {
    data: &'a [u8],
    pos: usize,
    overshoot: usize,
    cache: CacheMsb,
}

impl<'a> BitPumpMsb<'a> {
    pub fn new(data: &'a [u8]) -> BitPumpMsb<'a> {
        BitPumpMsb {
            data,
            pos: 0,
            overshoot: 0,
            cache: CacheMsb::default(),
        }
    }

    pub fn from_stream(stream: &ByteStream<'a>) -> BitPumpMsb<'a> {
        Self::new(stream.remaining_slice())
    }

    fn fill_cache(&mut self) -> Result<()> {
        let mcu = next_mcu(self.data, &mut self.pos, &mut self.overshoot)?;
        self.cache.push(u64::from(u32::from_be_bytes(mcu)), 32);
        Ok(())
    }
}

impl BitPump for BitPumpMsb<'_> {
    msb_pump_common!();

    fn get_buffer_position(&self) -> usize {
        self.pos - (self.cache.fill_level as usize / 8).min(self.pos)
    }
}

/// 32-bit swapped pump: each MCU is read as a little-endian word, then
/// consumed MSB-first. Samsung packs its entropy data this way.
pub struct BitPumpMsb32<'a> {
    data: &'a [u8],
    pos: usize,
    overshoot: usize,
    cache: CacheMsb,
}

impl<'a> BitPumpMsb32<'a> {
    pub fn new(data: &'a [u8]) -> BitPumpMsb32<'a> {
        BitPumpMsb32 {
            data,
            pos: 0,
            overshoot: 0,
            cache: CacheMsb::default(),
        }
    }

    pub fn from_stream(stream: &ByteStream<'a>) -> BitPumpMsb32<'a> {
        Self::new(stream.remaining_slice())
    }

    fn fill_cache(&mut self) -> Result<()> {
        let mcu = next_mcu(self.data, &mut self.pos, &mut self.overshoot)?;
        self.cache.push(u64::from(u32::from_le_bytes(mcu)), 32);
        Ok(())
    }
}

impl BitPump for BitPumpMsb32<'_> {
    msb_pump_common!();

    fn get_buffer_position(&self) -> usize {
        self.pos - (self.cache.fill_level as usize / 8).min(self.pos)
    }
}

/// Little-endian pump: bytes are pushed in stream order into an LSB-first
/// cache, so bit 0 of byte 0 comes out first.
pub struct BitPumpLsb<'a> {
    data: &'a [u8],
    pos: usize,
    overshoot: usize,
    cache: CacheLsb,
}

impl<'a> BitPumpLsb<'a> {
    pub fn new(data: &'a [u8]) -> BitPumpLsb<'a> {
        BitPumpLsb {
            data,
            pos: 0,
            overshoot: 0,
            cache: CacheLsb::default(),
        }
    }

    pub fn from_stream(stream: &ByteStream<'a>) -> BitPumpLsb<'a> {
        Self::new(stream.remaining_slice())
    }

    fn fill_cache(&mut self) -> Result<()> {
        let mcu = next_mcu(self.data, &mut self.pos, &mut self.overshoot)?;
        self.cache.push(u64::from(u32::from_le_bytes(mcu)), 32);
        Ok(())
    }
}

impl BitPump for BitPumpLsb<'_> {
    fn fill(&mut self, nbits: u32) -> Result<()> {
        debug_assert!(nbits <= 32);
        while self.cache.fill_level < nbits {
            self.fill_cache()?;
        }
        Ok(())
    }

    fn peek_bits(&mut self, nbits: u32) -> Result<u32> {
        self.fill(nbits)?;
        Ok(self.cache.peek(nbits))
    }

    fn get_bits(&mut self, nbits: u32) -> Result<u32> {
        let bits = self.peek_bits(nbits)?;
        self.cache.skip(nbits);
        Ok(bits)
    }

    fn get_buffer_position(&self) -> usize {
        self.pos - (self.cache.fill_level as usize / 8).min(self.pos)
    }
}

/// JPEG entropy-segment pump: big-endian bit order with `FF 00` byte
/// stuffing. A bare `FF xx` marker terminates bit-level input: the `FF` is
/// not emitted, the cache is zero-padded to a full level, and
/// [`BitPump::get_buffer_position`] stays pinned at the marker's offset so
/// the caller can realign the outer stream on the marker.
pub struct BitPumpJpeg<'a> {
    data: &'a [u8],
    pos: usize,
    overshoot: usize,
    cache: CacheMsb,
    marker: Option<usize>,
}

impl<'a> BitPumpJpeg<'a> {
    pub fn new(data: &'a [u8]) -> BitPumpJpeg<'a> {
        BitPumpJpeg {
            data,
            pos: 0,
            overshoot: 0,
            cache: CacheMsb::default(),
            marker: None,
        }
    }

    pub fn from_stream(stream: &ByteStream<'a>) -> BitPumpJpeg<'a> {
        Self::new(stream.remaining_slice())
    }

    /// True once a marker has terminated the entropy-coded segment.
    pub fn at_marker(&self) -> bool {
        self.marker.is_some()
    }

    fn fill_cache(&mut self) -> Result<()> {
        if self.marker.is_some() {
            // Terminated; the segment emits nothing but zero bits now.
            self.overshoot += MCU_SIZE;
            if self.overshoot > MAX_OVERSHOOT {
                return Err(IoError::EndOfStream.into());
            }
            self.cache.push(0, 32);
            return Ok(());
        }
        // Common case: the next four bytes are plain data.
        if let Some(window) = self.data.get(self.pos..self.pos + MCU_SIZE) {
            if window.iter().all(|&b| b != 0xFF) {
                self.cache
                    .push(u64::from(u32::from_be_bytes(window.try_into().unwrap())), 32);
                self.pos += MCU_SIZE;
                return Ok(());
            }
        }
        for _ in 0..MCU_SIZE {
            let Some(&c0) = self.data.get(self.pos) else {
                self.overshoot += 1;
                if self.overshoot > MAX_OVERSHOOT {
                    return Err(IoError::EndOfStream.into());
                }
                self.cache.push(0, 8);
                continue;
            };
            if c0 == 0xFF {
                // A stuffed 00 yields a data byte FF; anything else is a
                // marker. Truncated input after FF counts as a marker too.
                if self.data.get(self.pos + 1) == Some(&0x00) {
                    self.cache.push(0xFF, 8);
                    self.pos += 2;
                } else {
                    self.marker = Some(self.pos);
                    self.cache.pad_to_full();
                    return Ok(());
                }
            } else {
                self.cache.push(u64::from(c0), 8);
                self.pos += 1;
            }
        }
        Ok(())
    }
}

impl BitPump for BitPumpJpeg<'_> {
    msb_pump_common!();

    fn get_buffer_position(&self) -> usize {
        self.marker.unwrap_or(self.pos)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn bits_msb(data: &[u8]) -> Vec<u32> {
        data.iter()
            .flat_map(|&b| (0..8).rev().map(move |i| u32::from(b >> i) & 1))
            .collect()
    }

    fn bits_lsb(data: &[u8]) -> Vec<u32> {
        data.iter()
            .flat_map(|&b| (0..8).map(move |i| u32::from(b >> i) & 1))
            .collect()
    }

    #[test]
    fn msb_round_trip() {
        arbtest::arbtest(|u| {
            let data: Vec<u8> = u.arbitrary()?;
            let mut pump = BitPumpMsb::new(&data);
            let got: Vec<u32> = (0..data.len() * 8)
                .map(|_| pump.get_bits(1).unwrap())
                .collect();
            assert_eq!(got, bits_msb(&data));
            Ok(())
        });
    }

    #[test]
    fn lsb_round_trip() {
        arbtest::arbtest(|u| {
            let data: Vec<u8> = u.arbitrary()?;
            let mut pump = BitPumpLsb::new(&data);
            let got: Vec<u32> = (0..data.len() * 8)
                .map(|_| pump.get_bits(1).unwrap())
                .collect();
            assert_eq!(got, bits_lsb(&data));
            Ok(())
        });
    }

    #[test]
    fn msb32_round_trip() {
        arbtest::arbtest(|u| {
            let mut data: Vec<u8> = u.arbitrary()?;
            data.truncate(data.len() / 4 * 4);
            // Per 4-byte MCU the bytes come out swapped, each MSB-first.
            let expected: Vec<u32> = data
                .chunks_exact(4)
                .flat_map(|w| bits_msb(&[w[3], w[2], w[1], w[0]]))
                .collect();
            let mut pump = BitPumpMsb32::new(&data);
            let got: Vec<u32> = (0..data.len() * 8)
                .map(|_| pump.get_bits(1).unwrap())
                .collect();
            assert_eq!(got, expected);
            Ok(())
        });
    }

    #[test]
    fn jpeg_round_trip_without_markers() {
        arbtest::arbtest(|u| {
            let mut data: Vec<u8> = u.arbitrary()?;
            data.retain(|&b| b != 0xFF);
            let mut pump = BitPumpJpeg::new(&data);
            let got: Vec<u32> = (0..data.len() * 8)
                .map(|_| pump.get_bits(1).unwrap())
                .collect();
            assert_eq!(got, bits_msb(&data));
            Ok(())
        });
    }

    #[test]
    fn wide_reads_match_single_bit_reads() {
        let data = [0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x23, 0x45, 0x67];
        let mut pump = BitPumpMsb::new(&data);
        assert_eq!(pump.peek_bits(16).unwrap(), 0xDEAD);
        assert_eq!(pump.peek_bits(16).unwrap(), 0xDEAD);
        assert_eq!(pump.get_bits(4).unwrap(), 0xD);
        assert_eq!(pump.get_bits(12).unwrap(), 0xEAD);
        assert_eq!(pump.get_bits(32).unwrap(), 0xBEEF0123);
        assert_eq!(pump.get_bits(0).unwrap(), 0);
        assert_eq!(pump.get_bits(16).unwrap(), 0x4567);
    }

    #[test]
    fn zero_fill_past_end_then_error() {
        let mut pump = BitPumpMsb::new(&[0xAB]);
        assert_eq!(pump.get_bits(8).unwrap(), 0xAB);
        // A bounded run of fabricated zeros first...
        assert_eq!(pump.get_bits(24).unwrap(), 0);
        for _ in 0..15 {
            assert_eq!(pump.get_bits(32).unwrap(), 0);
        }
        // ...then the fuse trips.
        assert!(pump.get_bits(32).is_err());
    }

    #[test]
    fn jpeg_ff00_is_a_data_byte() {
        let data = [0xFF, 0x00, 0xAB];
        let mut pump = BitPumpJpeg::new(&data);
        assert_eq!(pump.get_bits(8).unwrap(), 0xFF);
        assert_eq!(pump.get_bits(8).unwrap(), 0xAB);
        assert!(!pump.at_marker());
    }

    #[test]
    fn jpeg_marker_terminates_and_pins_position() {
        let data = [0xFF, 0x00, 0xAB, 0xFF, 0xD9];
        let mut pump = BitPumpJpeg::new(&data);
        assert_eq!(pump.get_bits(16).unwrap(), 0xFFAB);
        // Everything after the marker reads as zero bits.
        assert_eq!(pump.get_bits(32).unwrap(), 0);
        assert!(pump.at_marker());
        assert_eq!(pump.get_buffer_position(), 3);
    }

    #[test]
    fn jpeg_marker_mid_refill_keeps_prior_bits() {
        // One data byte, then a marker inside the same refill window.
        let data = [0x5A, 0xFF, 0xD9, 0x00, 0x00];
        let mut pump = BitPumpJpeg::new(&data);
        assert_eq!(pump.get_bits(8).unwrap(), 0x5A);
        assert_eq!(pump.get_bits(8).unwrap(), 0);
        assert_eq!(pump.get_buffer_position(), 1);
    }

    #[test]
    fn buffer_position_tracks_consumed_bytes() {
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut pump = BitPumpMsb::new(&data);
        assert_eq!(pump.get_buffer_position(), 0);
        pump.get_bits(8).unwrap();
        // One MCU pulled, three bytes still cached.
        assert_eq!(pump.get_buffer_position(), 1);
        pump.get_bits(24).unwrap();
        assert_eq!(pump.get_buffer_position(), 4);
    }
}
