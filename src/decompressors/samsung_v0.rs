// Copyright (c) the rawdec Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Samsung SRW V0 stripe codec.
//!
//! Every image row is its own compressed stripe, located through an offset
//! table. Within a row the data comes in 16-pixel blocks: a direction bit,
//! four 2-bit opcodes mutating the four difference lengths, then sixteen
//! two's-complement differences stored even-pixels-first. Upward prediction
//! reads the two rows above, so rows decode in file order.

use crate::bitpump::{BitPump, BitPumpMsb32};
use crate::bytestream::ByteStream;
use crate::error::{RawDecoderError, Result};
use crate::image::RawImage;
use crate::util::sign_extend;

pub struct SamsungV0Decompressor;

impl SamsungV0Decompressor {
    /// `bso` holds one 32-bit offset per row into `bsr`, the compressed
    /// bytes; the end of `bsr` is the implied final offset.
    pub fn decompress(
        raw: &mut RawImage,
        bso: &ByteStream<'_>,
        bsr: &ByteStream<'_>,
    ) -> Result<()> {
        if raw.cpp() != 1 {
            return Err(RawDecoderError::ComponentMismatch {
                frame: 1,
                image: raw.cpp(),
            }
            .into());
        }
        let dim = raw.dim();
        let (width, height) = (dim.x, dim.y);
        if width < 16 || width % 2 != 0 || width > 5546 || height == 0 || height > 3714 {
            return Err(RawDecoderError::InvalidDimensions(width, height).into());
        }

        let stripes = Self::compute_stripes(bso, bsr, height)?;
        for (row, stripe) in stripes.iter().enumerate() {
            Self::decompress_strip(raw, row, stripe)?;
        }

        // Swap the red and blue diagonal to restore the Bayer pattern.
        for row in (0..height.saturating_sub(1)).step_by(2) {
            for col in (0..width.saturating_sub(1)).step_by(2) {
                let a = raw.pixel(row, col + 1);
                let b = raw.pixel(row + 1, col);
                raw.set_pixel(row, col + 1, b);
                raw.set_pixel(row + 1, col, a);
            }
        }
        Ok(())
    }

    fn compute_stripes<'a>(
        bso: &ByteStream<'a>,
        bsr: &ByteStream<'a>,
        height: usize,
    ) -> Result<Vec<&'a [u8]>> {
        let mut offsets = bso.peek_stream(height, 4)?;
        let mut table = Vec::with_capacity(height + 1);
        for _ in 0..height {
            table.push(offsets.get_u32()? as usize);
        }
        table.push(bsr.size());

        let mut stripes = Vec::with_capacity(height);
        for pair in table.windows(2) {
            if pair[0] >= pair[1] {
                return Err(RawDecoderError::MalformedStripe.into());
            }
            stripes.push(bsr.get_sub_view(pair[0], pair[1] - pair[0])?);
        }
        Ok(stripes)
    }

    fn decompress_strip(raw: &mut RawImage, row: usize, stripe: &[u8]) -> Result<()> {
        let width = raw.dim().x;
        let mut pump = BitPumpMsb32::new(stripe);
        let mut len = [if row < 2 { 7i32 } else { 4i32 }; 4];
        let mut col = 0;
        while col < width {
            Self::process_block(raw, &mut pump, &mut len, row, col)?;
            col += 16;
        }
        Ok(())
    }

    fn process_block(
        raw: &mut RawImage,
        pump: &mut BitPumpMsb32<'_>,
        len: &mut [i32; 4],
        row: usize,
        col: usize,
    ) -> Result<()> {
        let width = raw.dim().x;
        let dir = pump.get_bits(1)? != 0;

        let mut op = [0u32; 4];
        for o in &mut op {
            *o = pump.get_bits(2)?;
        }
        for (i, &o) in op.iter().enumerate() {
            match o {
                3 => len[i] = pump.get_bits(4)? as i32,
                2 => len[i] -= 1,
                1 => len[i] += 1,
                _ => {}
            }
            if !(0..=16).contains(&len[i]) {
                return Err(RawDecoderError::MalformedStripe.into());
            }
        }

        // Differences arrive even pixels first, then odd, as plain
        // two's-complement values.
        let mut diffs = [0i32; 16];
        for (i, d) in diffs.iter_mut().enumerate() {
            let l = len[i >> 2] as u32;
            *d = sign_extend(pump.get_bits(l)?, l);
        }
        let mut shuffled = [0i32; 16];
        let mut out_idx = 0;
        for &d in &diffs {
            shuffled[out_idx] = d;
            out_idx += 2;
            if out_idx == 16 {
                out_idx = 1;
            }
        }

        if dir {
            // Upward: baseline one row above for even columns, two rows
            // above for odd ones.
            if row < 2 || col + 16 >= width {
                return Err(RawDecoderError::InvalidPrediction.into());
            }
            for (c, &d) in shuffled.iter().enumerate() {
                let base = raw.pixel(row - 1 - (c & 1), col + c);
                raw.set_pixel(row, col + c, (d + i32::from(base)) as u16);
            }
        } else {
            // Left to right: baseline is the last pixel pair of the
            // previous block, or a flat 128 at the row start.
            let baseline = if col == 0 {
                [128u16, 128]
            } else {
                [raw.pixel(row, col - 2), raw.pixel(row, col - 1)]
            };
            let cols_to_fill = (width - col).min(16);
            debug_assert!(cols_to_fill % 2 == 0);
            for (c, &d) in shuffled.iter().enumerate().take(cols_to_fill) {
                raw.set_pixel(row, col + c, (d + i32::from(baseline[c & 1])) as u16);
            }
        }
        Ok(())
    }
}
