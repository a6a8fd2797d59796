// Copyright (c) the rawdec Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Plain (unsliced, unsampled) lossless JPEG predictor decode, the generic
//! payload codec inside CR3 containers.

use crate::bitpump::BitPumpJpeg;
use crate::bytestream::ByteStream;
use crate::error::{RawDecoderError, Result};
use crate::huffman::HuffmanTable;
use crate::image::RawImage;
use crate::ljpeg::LJpegParser;

pub struct LJpegDecompressor<'a, 'b> {
    input: ByteStream<'a>,
    raw: &'b mut RawImage,
}

impl<'a, 'b> LJpegDecompressor<'a, 'b> {
    pub fn new(input: ByteStream<'a>, raw: &'b mut RawImage) -> LJpegDecompressor<'a, 'b> {
        LJpegDecompressor { input, raw }
    }

    /// Decodes the scan into the full image. The frame may be wider than
    /// the image; trailing columns are decoded and dropped.
    pub fn decode(mut self, fix_dng_bug16: bool) -> Result<()> {
        let parser = LJpegParser::parse(&mut self.input, fix_dng_bug16)?;
        if parser.predictor != 1 {
            return Err(RawDecoderError::UnsupportedPredictor(parser.predictor).into());
        }
        if parser.frame.is_subsampled() {
            return Err(RawDecoderError::UnsupportedSubsampling.into());
        }
        match parser.frame.cps {
            1 => self.decode_n::<1>(&parser),
            2 => self.decode_n::<2>(&parser),
            3 => self.decode_n::<3>(&parser),
            4 => self.decode_n::<4>(&parser),
            n => Err(RawDecoderError::ComponentMismatch {
                frame: n,
                image: self.raw.cpp(),
            }
            .into()),
        }
    }

    fn decode_n<const N: usize>(&mut self, parser: &LJpegParser) -> Result<()> {
        let frame = &parser.frame;
        // Samples the caller wants per output row vs. samples the frame
        // actually encodes per line.
        let required = self.raw.dim().x * self.raw.cpp();
        let decoded = frame.width * N;
        if decoded < required || frame.height < self.raw.dim().y {
            return Err(RawDecoderError::InvalidDimensions(frame.width, frame.height).into());
        }
        let mut tables: [&HuffmanTable; N] = [parser.table(frame.components[0].dc_table)?; N];
        for (i, t) in tables.iter_mut().enumerate() {
            *t = parser.table(frame.components[i].dc_table)?;
        }
        let mut pump = BitPumpJpeg::from_stream(&self.input);
        let init = parser.initial_predictor() as u16;
        // Each row starts from the first pixel of the row above.
        let mut row_seed = [init; N];
        for row in 0..self.raw.dim().y {
            let mut pred = row_seed;
            let out_row = self.raw.row_mut(row);
            for block in 0..frame.width {
                for (c, table) in tables.iter().enumerate() {
                    let diff = table.decode_next(&mut pump)?;
                    pred[c] = pred[c].wrapping_add(diff as u16);
                    let idx = block * N + c;
                    if idx < required {
                        out_row[idx] = pred[c];
                    }
                }
                if block == 0 {
                    row_seed = pred;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bytestream::Endianness;
    use crate::image::{Dim2D, RawImage};
    use crate::ljpeg::testutil::{build_ljpeg, counts16};

    /// Encodes `rows` of 12-bit samples as a single-component scan. The
    /// table assigns a 4-bit code to every magnitude length 0..=8, with the
    /// canonical codes coming out equal to the lengths themselves.
    fn encode_scan(rows: &[Vec<u16>], init: i32) -> Vec<u8> {
        let mut bits = BitWriter::default();
        let mut prev_row_first = init;
        for row in rows {
            let mut pred = prev_row_first;
            for (c, &v) in row.iter().enumerate() {
                let diff = i32::from(v) - pred;
                let ssss = 32 - diff.unsigned_abs().leading_zeros();
                assert!(ssss <= 8, "diff too wide for the test");
                bits.push(ssss, 4);
                if ssss > 0 {
                    let mag = if diff > 0 {
                        diff as u32
                    } else {
                        (diff + ((1i32 << ssss) - 1)) as u32
                    };
                    bits.push(mag, ssss);
                }
                pred = i32::from(v);
                if c == 0 {
                    prev_row_first = pred;
                }
            }
        }
        bits.finish()
    }

    #[derive(Default)]
    struct BitWriter {
        bytes: Vec<u8>,
        acc: u32,
        n: u32,
    }

    impl BitWriter {
        fn push(&mut self, value: u32, bits: u32) {
            for i in (0..bits).rev() {
                self.acc = (self.acc << 1) | ((value >> i) & 1);
                self.n += 1;
                if self.n == 8 {
                    let b = self.acc as u8;
                    self.bytes.push(b);
                    if b == 0xFF {
                        self.bytes.push(0x00); // byte stuffing
                    }
                    self.acc = 0;
                    self.n = 0;
                }
            }
        }

        fn finish(mut self) -> Vec<u8> {
            while self.n != 0 {
                self.push(1, 1);
            }
            self.bytes.extend_from_slice(&[0xFF, 0xD9]);
            self.bytes
        }
    }

    #[test]
    fn single_component_predictor_round_trip() {
        let rows = vec![
            vec![2048u16, 2050, 2049, 2060],
            vec![2040, 2041, 2043, 2042],
            vec![2045, 2044, 2046, 2047],
        ];
        let scan = encode_scan(&rows, 1 << 11);
        let counts = counts16(&[0, 0, 0, 9]);
        let values: Vec<u8> = (0..9).collect();
        let data = build_ljpeg(12, 4, 3, &[(0, 1, 1, 0)], &[(0, &counts, &values)], 1, 0, &scan);
        let mut raw = RawImage::create(Dim2D::new(4, 3), 1).unwrap();
        let input = ByteStream::new(&data, Endianness::Little);
        LJpegDecompressor::new(input, &mut raw).decode(false).unwrap();
        for (r, row) in rows.iter().enumerate() {
            assert_eq!(&raw.row(r)[..4], &row[..]);
        }
    }

    #[test]
    fn frame_must_cover_the_image() {
        let counts = counts16(&[1]);
        let values = [8u8];
        let data = build_ljpeg(12, 2, 2, &[(0, 1, 1, 0)], &[(0, &counts, &values)], 1, 0, &[]);
        let mut raw = RawImage::create(Dim2D::new(4, 2), 1).unwrap();
        let input = ByteStream::new(&data, Endianness::Little);
        assert!(LJpegDecompressor::new(input, &mut raw).decode(false).is_err());
    }

    #[test]
    fn predictor_two_is_rejected() {
        let counts = counts16(&[1]);
        let values = [8u8];
        let data = build_ljpeg(12, 2, 2, &[(0, 1, 1, 0)], &[(0, &counts, &values)], 2, 0, &[]);
        let mut raw = RawImage::create(Dim2D::new(2, 2), 1).unwrap();
        let input = ByteStream::new(&data, Endianness::Little);
        match LJpegDecompressor::new(input, &mut raw).decode(false) {
            Err(crate::Error::Decoder(RawDecoderError::UnsupportedPredictor(2))) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
}
