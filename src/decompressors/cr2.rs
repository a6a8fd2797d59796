// Copyright (c) the rawdec Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Canon CR2 sliced lossless JPEG.
//!
//! The scan is decoded in four phases: (1) sequential entropy decode into a
//! scratch plane of raw differences, (2) a serial pass predicting the first
//! column down all rows, (3) per-row prediction, which is where the work
//! fans out over the rayon pool, and (4) unslicing the vertical strips into
//! raster order. Reordering (2) and (3) per row changes nothing; pulling
//! prediction into the entropy loop would, since the Huffman stream is
//! stateful across the whole plane.
//!
//! All widths below are in samples. The frame header counts pixels per
//! component line, so a row of the scratch plane holds `width * cps`
//! samples, and that is also the predictor reset period.

use rayon::prelude::*;

use crate::bitpump::{BitPump, BitPumpJpeg};
use crate::bytestream::ByteStream;
use crate::error::{RawDecoderError, Result};
use crate::huffman::HuffmanTable;
use crate::image::{Dim2D, RawImage};
use crate::ljpeg::LJpegParser;
use crate::util::round_up;
use crate::util::tracing_wrappers::*;

pub struct Cr2Decompressor<'a, 'b> {
    input: ByteStream<'a>,
    parser: LJpegParser,
    raw: &'b mut RawImage,
}

impl<'a, 'b> Cr2Decompressor<'a, 'b> {
    /// Parses the JPEG header; the stream must start at SOI.
    pub fn new(
        mut input: ByteStream<'a>,
        raw: &'b mut RawImage,
    ) -> Result<Cr2Decompressor<'a, 'b>> {
        let parser = LJpegParser::parse(&mut input, false)?;
        Ok(Cr2Decompressor { input, parser, raw })
    }

    /// The input cursor; after [`Self::decode`] it sits on the end-of-scan
    /// marker.
    pub fn input(&self) -> &ByteStream<'a> {
        &self.input
    }

    /// Decodes the scan. `slice_widths` comes from the Canon slicing tag,
    /// in samples per strip; an empty list means a single full-width slice.
    pub fn decode(&mut self, slice_widths: Vec<usize>) -> Result<()> {
        if self.parser.predictor != 1 {
            return Err(RawDecoderError::UnsupportedPredictor(self.parser.predictor).into());
        }
        let frame = &self.parser.frame;
        let slices = if slice_widths.is_empty() {
            vec![frame.width * frame.cps]
        } else {
            slice_widths
        };

        if frame.is_subsampled() {
            if self.raw.cpp() != frame.cps {
                return Err(RawDecoderError::ComponentMismatch {
                    frame: frame.cps,
                    image: self.raw.cpp(),
                }
                .into());
            }
            let c = &frame.components;
            let supported = frame.cps == 3
                && c[0].super_h == 2
                && (c[0].super_v == 1 || c[0].super_v == 2)
                && c[1].super_h == 1
                && c[1].super_v == 1
                && c[2].super_h == 1
                && c[2].super_v == 1;
            if !supported {
                return Err(RawDecoderError::UnsupportedSubsampling.into());
            }
            if c[0].super_v == 2 {
                // sRaw1 / mRaw
                self.decode_n_x_y::<3, 2, 2>(slices)
            } else {
                // sRaw2 / sRaw
                self.decode_n_x_y::<3, 2, 1>(slices)
            }
        } else {
            match frame.cps {
                2 => self.decode_n_x_y::<2, 1, 1>(slices),
                4 => self.decode_n_x_y::<4, 1, 1>(slices),
                n => Err(RawDecoderError::ComponentMismatch {
                    frame: n,
                    image: self.raw.cpp(),
                }
                .into()),
            }
        }
    }

    fn decode_n_x_y<const N: usize, const X: usize, const Y: usize>(
        &mut self,
        mut slices: Vec<usize>,
    ) -> Result<()> {
        let frame = &self.parser.frame;
        // Samples per scratch row; also the predictor reset period.
        let frame_w = frame.width * frame.cps;
        let mut frame_h = frame.height;

        // Canon double-height quirk (5Ds et al.): the frame header doubles
        // the width and halves the height. The predictor reset period must
        // stay at the header's width.
        if frame.cps != 3 && frame_w > 2 * frame_h {
            frame_h *= 2;
        }

        if X == 2 && Y == 1 {
            // sRaw slice widths are off by 3/2 in the slicing tag: four
            // decoded samples occupy six slots of a row.
            for s in &mut slices {
                *s = *s * 3 / 2;
            }
        }

        let full_width: usize = slices.iter().sum();
        if full_width == 0 || frame_h == 0 || frame_w == 0 {
            return Err(RawDecoderError::InvalidDimensions(full_width, frame_h).into());
        }
        let full_area = full_width * frame_h;
        let adjusted_height = round_up(full_area, frame_w) / frame_w;
        debug!(
            "{} slices, full width {full_width}, adjusted height {adjusted_height}",
            slices.len()
        );

        // Scratch plane of `frame_w`-sample rows, rounded up so the
        // sub-sampled inner loop can always touch its second row.
        let scratch_dim = Dim2D::new(frame_w, round_up(adjusted_height, Y));
        let mut scratch = RawImage::create(scratch_dim, 1)?;
        let in_pitch = scratch.pitch_in_pixels();

        let mut tables: [&HuffmanTable; N] = [self.parser.table(frame.components[0].dc_table)?; N];
        for (i, t) in tables.iter_mut().enumerate() {
            *t = self.parser.table(frame.components[i].dc_table)?;
        }
        let init = self.parser.initial_predictor() as u16;

        // Phase one: sequential entropy decode of raw differences.
        let mut pump = BitPumpJpeg::from_stream(&self.input);
        {
            let data = scratch.as_mut_slice();
            let mut processed = 0usize;
            let mut y = 0;
            while y < adjusted_height {
                let row = y * in_pitch;
                let mut x = 0;
                while x + N * X <= frame_w && processed < full_area {
                    let src = row + x;
                    if X == 1 {
                        for (i, table) in tables.iter().enumerate() {
                            data[src + i] = table.decode_next(&mut pump)? as u16;
                        }
                    } else {
                        for i in 0..Y {
                            data[src + i * in_pitch] = tables[0].decode_next(&mut pump)? as u16;
                            data[src + 3 + i * in_pitch] =
                                tables[0].decode_next(&mut pump)? as u16;
                        }
                        data[src + 1] = tables[1].decode_next(&mut pump)? as u16;
                        data[src + 2] = tables[2].decode_next(&mut pump)? as u16;
                    }
                    x += N * X;
                    processed += N * X;
                }
                y += Y;
            }
        }
        // Leave the outer cursor on the end-of-scan marker.
        self.input.skip(pump.get_buffer_position())?;

        // Phase two: predict the first column serially down the plane.
        {
            let data = scratch.as_mut_slice();
            let mut pred = [init; N];
            let mut y = 0;
            while y < adjusted_height {
                let src = y * in_pitch;
                if X == 1 {
                    for (i, p) in pred.iter_mut().enumerate() {
                        *p = p.wrapping_add(data[src + i]);
                        data[src + i] = *p;
                    }
                } else {
                    for i in 0..Y {
                        pred[0] = pred[0].wrapping_add(data[src + i * in_pitch]);
                        data[src + i * in_pitch] = pred[0];
                        pred[0] = pred[0].wrapping_add(data[src + 3 + i * in_pitch]);
                        data[src + 3 + i * in_pitch] = pred[0];
                    }
                    pred[1] = pred[1].wrapping_add(data[src + 1]);
                    data[src + 1] = pred[1];
                    pred[2] = pred[2].wrapping_add(data[src + 2]);
                    data[src + 2] = pred[2];
                }
                y += Y;
            }
        }

        // Phase three: per-row prediction; row groups are independent.
        {
            let group = in_pitch * Y;
            let groups = adjusted_height.div_ceil(Y);
            scratch
                .as_mut_slice()
                .par_chunks_mut(group)
                .take(groups)
                .for_each(|rows| {
                    let mut pred = [0u16; N];
                    pred.copy_from_slice(&rows[..N]);
                    let mut x = N * X;
                    while x + N * X <= frame_w {
                        if X == 1 {
                            for (i, p) in pred.iter_mut().enumerate() {
                                *p = p.wrapping_add(rows[x + i]);
                                rows[x + i] = *p;
                            }
                        } else {
                            for i in 0..Y {
                                pred[0] = pred[0].wrapping_add(rows[x + i * in_pitch]);
                                rows[x + i * in_pitch] = pred[0];
                                pred[0] = pred[0].wrapping_add(rows[x + 3 + i * in_pitch]);
                                rows[x + 3 + i * in_pitch] = pred[0];
                            }
                            pred[1] = pred[1].wrapping_add(rows[x + 1]);
                            rows[x + 1] = pred[1];
                            pred[2] = pred[2].wrapping_add(rows[x + 2]);
                            rows[x + 2] = pred[2];
                        }
                        x += N * X;
                    }
                });
        }

        // Phase four: unslice the strips into raster order. Strip offsets
        // step by the first slice's width; Canon keeps all strips but the
        // last one equal.
        let out_dim = self.raw.dim();
        let out_row_samples = out_dim.x * self.raw.cpp();
        let out_pitch = self.raw.pitch_in_pixels();
        let out = self.raw.as_mut_slice();
        let src_data = scratch.as_slice();
        let mut line_slices = 0usize;
        'slices: for &slice_width in &slices {
            let mut y = 0;
            while y < adjusted_height {
                let src_off = line_slices / frame_h * slices[0];
                if src_off >= frame_w {
                    break;
                }
                let dest_y = line_slices % out_dim.y;
                let dest_off = line_slices / out_dim.y * slices[0];
                // Canon mRaw frames wrap: the sliced area can exceed the
                // image, so stop as soon as the destination runs out.
                if dest_off >= out_row_samples || dest_y + (Y - 1) >= out_dim.y {
                    break 'slices;
                }
                let src_base = y * in_pitch + src_off;
                let dest_base = dest_y * out_pitch + dest_off;
                // Never read or write past either row.
                let n = slice_width
                    .min(frame_w - src_off)
                    .min(out_row_samples - dest_off);
                let mut x = 0;
                while x + N * X <= n {
                    if X == 1 {
                        for i in 0..N {
                            out[dest_base + x + i] = src_data[src_base + x + i];
                        }
                    } else {
                        for i in 0..Y {
                            out[dest_base + x + i * out_pitch] =
                                src_data[src_base + x + i * in_pitch];
                            out[dest_base + x + 3 + i * out_pitch] =
                                src_data[src_base + x + 3 + i * in_pitch];
                        }
                        out[dest_base + x + 1] = src_data[src_base + x + 1];
                        out[dest_base + x + 2] = src_data[src_base + x + 2];
                    }
                    x += N * X;
                }
                y += Y;
                line_slices += Y;
            }
        }
        Ok(())
    }
}
