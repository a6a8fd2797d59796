// Copyright (c) the rawdec Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Panasonic RW2 V6 block codec.
//!
//! Sixteen pixels come out of every sixteen input bytes. A block is fully
//! self-contained: its bytes are reversed, read MSB-first (the V6 pump),
//! and run through an even/odd scale-and-offset state machine. Rows
//! therefore decode independently and fan out over the rayon pool; pixel
//! order inside a row is strict.

use rayon::prelude::*;

use crate::bitpump::{BitPump, BitPumpMsb};
use crate::bytestream::ByteStream;
use crate::error::{IoError, RawDecoderError, Result};
use crate::image::RawImage;
use crate::util::tracing_wrappers::*;

pub const BYTES_PER_BLOCK: usize = 16;
pub const PIXELS_PER_BLOCK: usize = 16;

pub struct PanasonicDecompressorV6;

impl PanasonicDecompressorV6 {
    pub fn decompress(raw: &mut RawImage, input: &ByteStream<'_>) -> Result<()> {
        if raw.cpp() != 1 {
            return Err(RawDecoderError::ComponentMismatch {
                frame: 1,
                image: raw.cpp(),
            }
            .into());
        }
        let dim = raw.dim();
        if !dim.has_positive_area() || dim.x % PIXELS_PER_BLOCK != 0 {
            return Err(RawDecoderError::InvalidDimensions(dim.x, dim.y).into());
        }
        let blocks_per_row = dim.x / PIXELS_PER_BLOCK;
        let bytes_per_row = blocks_per_row * BYTES_PER_BLOCK;
        let src = input.remaining_slice();
        // One byte per pixel overall: sixteen bytes per sixteen-pixel block.
        let wanted = dim.area();
        if src.len() < wanted {
            return Err(IoError::Overflow {
                wanted,
                left: src.len(),
            }
            .into());
        }

        debug!("{blocks_per_row} blocks per row, {} rows", dim.y);
        let pitch = raw.pitch_in_pixels();
        let width = dim.x;
        raw.as_mut_slice()
            .par_chunks_mut(pitch)
            .take(dim.y)
            .zip(src.par_chunks(bytes_per_row))
            .try_for_each(|(out_row, in_row)| {
                for (out, block) in out_row[..width]
                    .chunks_mut(PIXELS_PER_BLOCK)
                    .zip(in_row.chunks(BYTES_PER_BLOCK))
                {
                    Self::decompress_block(out, block)?;
                }
                Ok(())
            })
    }

    fn decompress_block(out: &mut [u16], block: &[u8]) -> Result<()> {
        // The pump wants the block bytes tail-first.
        let mut reversed = [0u8; BYTES_PER_BLOCK];
        for (r, &b) in reversed.iter_mut().zip(block.iter().rev()) {
            *r = b;
        }
        let mut pump = BitPumpMsb::new(&reversed);

        let mut oddeven = [0u32; 2];
        let mut nonzero = [0u32; 2];
        let mut pmul = 0u32;
        let mut pixel_base = 0u32;
        for (pix, out) in out.iter_mut().enumerate() {
            if pix % 3 == 2 {
                let mut base = pump.get_bits(2)?;
                if base == 3 {
                    base = 4;
                }
                pixel_base = 0x200 << base;
                pmul = 1 << base;
            }
            let mut epixel = pump.get_bits(if pix < 2 { 14 } else { 10 })?;
            if oddeven[pix % 2] != 0 {
                epixel = epixel.wrapping_mul(pmul);
                if pixel_base < 0x2000 && nonzero[pix % 2] > pixel_base {
                    epixel = epixel.wrapping_add(nonzero[pix % 2] - pixel_base);
                }
                nonzero[pix % 2] = epixel;
            } else {
                oddeven[pix % 2] = epixel;
                if epixel != 0 {
                    nonzero[pix % 2] = epixel;
                } else {
                    epixel = nonzero[pix % 2];
                }
            }
            // 15 is the black-level bias. Small underflows truncate into
            // u16; true overflows clip to 0x3FFF.
            let spix = epixel.wrapping_sub(15);
            *out = if spix as i32 <= 0xFFFF {
                spix as u16
            } else {
                (((epixel.wrapping_add(0x7FFF_FFF1) as i32) >> 31) & 0x3FFF) as u16
            };
        }
        Ok(())
    }
}
