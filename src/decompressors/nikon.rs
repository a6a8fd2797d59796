// Copyright (c) the rawdec Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Nikon NEF codec: Huffman-coded differentials behind a linearisation
//! curve, with two-pixel horizontal and two-row vertical predictor lanes.
//!
//! The maker-note metadata blob selects one of six fixed code trees, seeds
//! the four corner predictors, and optionally carries the curve as a
//! stepped spline plus the row at which the "after split" tree takes over.

use crate::bitpump::{BitPump, BitPumpMsb};
use crate::bytestream::ByteStream;
use crate::error::{RawDecoderError, Result};
use crate::huffman::HuffmanTable;
use crate::image::{RawImage, TableLookUp};
use crate::util::clamp_bits;
use crate::util::tracing_wrappers::*;

/// The six fixed trees: 12/14-bit, lossy, lossy-after-split, lossless.
/// Values above 0x0F fold a left shift into the high nibble.
#[rustfmt::skip]
const NIKON_TREE: [([u8; 16], &[u8]); 6] = [
    // 12-bit lossy
    ([0, 1, 5, 1, 1, 1, 1, 1, 1, 2, 0, 0, 0, 0, 0, 0],
     &[5, 4, 3, 6, 2, 7, 1, 0, 8, 9, 11, 10, 12, 0]),
    // 12-bit lossy after split
    ([0, 1, 5, 1, 1, 1, 1, 1, 1, 2, 0, 0, 0, 0, 0, 0],
     &[0x39, 0x5A, 0x38, 0x27, 0x16, 5, 4, 3, 2, 1, 0, 11, 12, 12]),
    // 12-bit lossless
    ([0, 1, 4, 2, 3, 1, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0],
     &[5, 4, 6, 3, 7, 2, 8, 1, 9, 0, 10, 11, 12]),
    // 14-bit lossy
    ([0, 1, 4, 3, 1, 1, 1, 1, 1, 2, 0, 0, 0, 0, 0, 0],
     &[5, 6, 4, 7, 8, 3, 9, 2, 1, 0, 10, 11, 12, 13, 14]),
    // 14-bit lossy after split
    ([0, 1, 5, 1, 1, 1, 1, 1, 1, 1, 1, 2, 0, 0, 0, 0],
     &[8, 0x5C, 0x4B, 0x3A, 0x29, 7, 6, 5, 4, 3, 2, 1, 0, 13, 14, 0]),
    // 14-bit lossless
    ([0, 1, 4, 2, 2, 3, 1, 2, 0, 0, 0, 0, 0, 0, 0, 0],
     &[7, 6, 8, 5, 9, 4, 10, 3, 11, 12, 2, 0, 1, 13, 14]),
];

fn create_huffman_table(select: usize) -> Result<HuffmanTable> {
    let (counts, values) = NIKON_TREE
        .get(select)
        .ok_or(RawDecoderError::InvalidHuffmanTable("tree selector out of range"))?;
    let mut ht = HuffmanTable::new();
    let count = ht.set_n_codes_per_length(counts)?;
    debug_assert_eq!(count, values.len());
    ht.set_code_values(values)?;
    ht.setup(true, false)?;
    Ok(ht)
}

pub struct NikonDecompressor;

impl NikonDecompressor {
    /// Decodes `data` into the full image. `metadata` is the maker-note
    /// blob holding versions, predictors, curve and the tree-split row.
    /// With `uncorrected_raw_values` the curve is recorded on the image but
    /// not applied.
    pub fn decompress(
        raw: &mut RawImage,
        data: ByteStream<'_>,
        mut metadata: ByteStream<'_>,
        bits_per_sample: u32,
        uncorrected_raw_values: bool,
    ) -> Result<()> {
        if raw.cpp() != 1 {
            return Err(RawDecoderError::ComponentMismatch {
                frame: 1,
                image: raw.cpp(),
            }
            .into());
        }
        if bits_per_sample != 12 && bits_per_sample != 14 {
            return Err(RawDecoderError::Unsupported("bits per sample must be 12 or 14").into());
        }

        let v0 = metadata.get_u8()?;
        let v1 = metadata.get_u8()?;
        let mut huff_select = 0usize;
        if v0 == 0x49 || v1 == 0x58 {
            metadata.skip(2110)?;
        }
        if v0 == 0x46 {
            huff_select = 2;
        }
        if bits_per_sample == 14 {
            huff_select += 3;
        }

        let mut vpred = [[0u16; 2]; 2];
        for row in &mut vpred {
            for p in row.iter_mut() {
                *p = metadata.get_u16()?;
            }
        }

        // Identity curve, then whatever the metadata overrides.
        let mut curve: Vec<u16> = (0..=u16::MAX).collect();
        let mut max = (1usize << bits_per_sample) & 0x7FFF;
        let mut split = 0usize;
        let csize = usize::from(metadata.get_u16()?);
        let mut step = 0usize;
        if csize > 1 {
            step = max / (csize - 1);
        }
        if v0 == 0x44 && v1 == 0x20 && step > 0 {
            // Stepped spline: csize control points, linearly interpolated.
            for i in 0..csize {
                curve[i * step] = metadata.get_u16()?;
            }
            for i in 0..max {
                let lo = usize::from(curve[i - i % step]);
                let hi = usize::from(curve[i - i % step + step]);
                curve[i] = ((lo * (step - i % step) + hi * (i % step)) / step) as u16;
            }
            // The split row lives at a fixed offset in this layout.
            metadata.set_position(562)?;
            split = usize::from(metadata.get_u16()?);
        } else if v0 != 0x46 && csize <= 0x4001 {
            for c in curve.iter_mut().take(csize) {
                *c = metadata.get_u16()?;
            }
            max = csize;
        }
        // Drop duplicated tail entries so dithering sees the true range.
        while max > 2 && curve[max - 2] == curve[max - 1] {
            max -= 1;
        }
        let table = TableLookUp::new(&curve[..max], !uncorrected_raw_values);

        debug!("tree {huff_select}, split row {split}, curve of {max}");
        let mut ht = create_huffman_table(huff_select)?;
        let mut pump = BitPumpMsb::from_stream(&data);
        let dim = raw.dim();
        for row in 0..dim.y {
            if split != 0 && row == split {
                ht = create_huffman_table(huff_select + 1)?;
            }
            let mut random = pump.peek_bits(24)?;
            let mut hpred = [0u16; 2];
            let out = raw.row_mut(row);
            for col in 0..dim.x {
                let diff = ht.decode_next(&mut pump)?;
                if col < 2 {
                    vpred[row & 1][col] = vpred[row & 1][col].wrapping_add(diff as u16);
                    hpred[col] = vpred[row & 1][col];
                } else {
                    hpred[col & 1] = hpred[col & 1].wrapping_add(diff as u16);
                }
                let value = clamp_bits(i32::from(hpred[col & 1]), 15);
                out[col] = if uncorrected_raw_values {
                    value
                } else {
                    table.apply(value, &mut random)
                };
            }
        }
        raw.set_table(if uncorrected_raw_values { None } else { Some(table) });
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bytestream::Endianness;
    use crate::image::Dim2D;

    /// MSB-first writer for the entropy stream.
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
                    self.bytes.push(self.acc as u8);
                    self.acc = 0;
                    self.n = 0;
                }
            }
        }

        fn finish(mut self) -> Vec<u8> {
            while self.n != 0 {
                self.push(0, 1);
            }
            self.bytes
        }
    }

    /// The 12-bit lossless tree (selector 2), code for magnitude length
    /// `ssss`. Canonical codes in declaration order.
    fn lossless12_code(ssss: u32) -> (u32, u32) {
        // counts [0,1,4,2,3,1,2]: len2: one code; len3: four; len4: two;
        // len5: three; len6: one; len7: two.
        let order = [5u32, 4, 6, 3, 7, 2, 8, 1, 9, 0, 10, 11, 12];
        let lens = [2u32, 3, 3, 3, 3, 4, 4, 5, 5, 5, 6, 7, 7];
        let mut code = 0u32;
        let mut prev_len = 1;
        for (i, &v) in order.iter().enumerate() {
            let len = lens[i];
            code <<= len - prev_len;
            prev_len = len;
            if v == ssss {
                return (code, len);
            }
            code += 1;
        }
        panic!("no code for ssss {ssss}");
    }

    fn push_diff(bits: &mut BitWriter, diff: i32) {
        let ssss = 32 - diff.unsigned_abs().leading_zeros();
        let (code, len) = lossless12_code(ssss);
        bits.push(code, len);
        if ssss > 0 {
            let mag = if diff > 0 {
                diff as u32
            } else {
                (diff + ((1i32 << ssss) - 1)) as u32
            };
            bits.push(mag, ssss);
        }
    }

    /// Metadata blob: version 0x46 0x30 (lossless), vpred corners, empty
    /// curve table.
    fn metadata_blob(vpred: [[u16; 2]; 2]) -> Vec<u8> {
        let mut m = vec![0x46, 0x30];
        for row in vpred {
            for p in row {
                m.extend_from_slice(&p.to_le_bytes());
            }
        }
        m.extend_from_slice(&0u16.to_le_bytes()); // curve size 0
        m
    }

    #[test]
    fn lossless_12bit_round_trip() {
        let pixels: [[u16; 4]; 2] = [
            [600, 610, 605, 612],
            [598, 601, 603, 600],
        ];
        let vpred = [[600u16, 610], [598, 601]];
        let mut bits = BitWriter::default();
        // Row 0: first two pixels differ 0 from vpred; the rest chain
        // horizontally two apart.
        for (r, row) in pixels.iter().enumerate() {
            let mut hpred = [row[0], row[1]];
            for (c, &v) in row.iter().enumerate() {
                let diff = if c < 2 {
                    i32::from(v) - i32::from(vpred[r & 1][c])
                } else {
                    let d = i32::from(v) - i32::from(hpred[c & 1]);
                    hpred[c & 1] = v;
                    d
                };
                push_diff(&mut bits, diff);
            }
        }
        let stream = bits.finish();
        let meta = metadata_blob(vpred);
        let mut raw = RawImage::create(Dim2D::new(4, 2), 1).unwrap();
        NikonDecompressor::decompress(
            &mut raw,
            ByteStream::new(&stream, Endianness::Little),
            ByteStream::new(&meta, Endianness::Little),
            12,
            true,
        )
        .unwrap();
        for (r, row) in pixels.iter().enumerate() {
            assert_eq!(&raw.row(r)[..4], &row[..], "row {r}");
        }
        // Uncorrected decode records no curve on the image.
        assert!(raw.table().is_none());
    }

    #[test]
    fn curve_is_applied_when_corrected() {
        // Constant image at value 3 through a doubling curve. Version 0x44
        // selects the 12-bit lossy tree, where the zero-length code is the
        // five-bit 0b11110.
        let vpred = [[3u16, 3], [3, 3]];
        let mut bits = BitWriter::default();
        for _ in 0..8 {
            bits.push(0b11110, 5);
        }
        let stream = bits.finish();
        let mut meta = vec![0x44, 0x30]; // plain versions, direct curve
        for row in vpred {
            for p in row {
                meta.extend_from_slice(&p.to_le_bytes());
            }
        }
        let curve: Vec<u16> = (0..16u16).map(|i| i * 2).collect();
        meta.extend_from_slice(&(curve.len() as u16).to_le_bytes());
        for c in &curve {
            meta.extend_from_slice(&c.to_le_bytes());
        }
        let mut raw = RawImage::create(Dim2D::new(4, 2), 1).unwrap();
        NikonDecompressor::decompress(
            &mut raw,
            ByteStream::new(&stream, Endianness::Little),
            ByteStream::new(&meta, Endianness::Little),
            12,
            false,
        )
        .unwrap();
        // A constant input value 3 maps through the curve (6) with a
        // one-bit dither, so every output sits on 5 or 6.
        for r in 0..2 {
            for c in 0..4 {
                let v = raw.pixel(r, c);
                assert!((5..=6).contains(&v), "({r}, {c}) -> {v}");
            }
        }
        assert!(raw.table().is_some());
    }

    #[test]
    fn all_six_trees_build() {
        for select in 0..6 {
            assert!(create_huffman_table(select).is_ok(), "tree {select}");
        }
    }

    #[test]
    fn odd_bit_depth_is_rejected() {
        let mut raw = RawImage::create(Dim2D::new(2, 2), 1).unwrap();
        let err = NikonDecompressor::decompress(
            &mut raw,
            ByteStream::new(&[0; 8], Endianness::Little),
            ByteStream::new(&[0; 16], Endianness::Little),
            10,
            true,
        );
        assert!(err.is_err());
    }
}
