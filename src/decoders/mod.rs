// Copyright (c) the rawdec Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! The per-format drivers: thin glue that takes pre-located payloads plus
//! the collaborator-supplied geometry (camera databases and TIFF traversal
//! live outside this crate), allocates the output plane, and invokes the
//! right decompressor. Dispatch is a tagged enum, not a class hierarchy.

use crate::bytestream::{ByteStream, Endianness};
use crate::container::IsoMRootBox;
use crate::decompressors::cr2::Cr2Decompressor;
use crate::decompressors::ljpeg::LJpegDecompressor;
use crate::decompressors::nikon::NikonDecompressor;
use crate::decompressors::panasonic_v6::PanasonicDecompressorV6;
use crate::decompressors::samsung_v0::SamsungV0Decompressor;
use crate::error::{IsoMError, Result};
use crate::image::{Dim2D, RawImage};

/// What a byte region smells like. Dispatch is by content, never by file
/// name.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ContainerFormat {
    /// Plain TIFF (CR2, NEF and SRW all ride on it).
    Tiff(Endianness),
    /// Panasonic's TIFF offshoot with the `U` magic.
    Rw2,
    /// ISO base media; the brand decides further.
    IsoM,
    Unknown,
}

pub fn sniff(data: &[u8]) -> ContainerFormat {
    match data {
        [0x49, 0x49, 0x2A, 0x00, ..] => ContainerFormat::Tiff(Endianness::Little),
        [0x4D, 0x4D, 0x00, 0x2A, ..] => ContainerFormat::Tiff(Endianness::Big),
        [0x49, 0x49, 0x55, 0x00, ..] => ContainerFormat::Rw2,
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => ContainerFormat::IsoM,
        _ => ContainerFormat::Unknown,
    }
}

/// Canon CR2: a sliced lossless JPEG strip located via the TIFF IFD.
pub struct Cr2Decoder<'a> {
    pub input: ByteStream<'a>,
    pub dim: Dim2D,
    pub cpp: usize,
    /// Strip widths from the Canon slicing tag, in samples.
    pub slices: Vec<usize>,
}

/// Canon CR3: the raw payload is the biggest mdat chunk. Sensor dimensions
/// come from camera metadata, not from the container.
pub struct Cr3Decoder<'a> {
    pub root: IsoMRootBox<'a>,
    pub dim: Dim2D,
}

impl<'a> Cr3Decoder<'a> {
    pub fn new(file: &ByteStream<'a>, dim: Dim2D) -> Result<Cr3Decoder<'a>> {
        Ok(Cr3Decoder {
            root: IsoMRootBox::parse(file)?,
            dim,
        })
    }
}

/// Panasonic RW2 with the V6 block codec.
pub struct Rw2Decoder<'a> {
    pub input: ByteStream<'a>,
    pub dim: Dim2D,
}

/// Samsung SRW V0: offset table plus compressed rows.
pub struct SrwDecoder<'a> {
    pub bso: ByteStream<'a>,
    pub bsr: ByteStream<'a>,
    pub dim: Dim2D,
}

/// Nikon NEF: entropy data plus the maker-note metadata blob.
pub struct NefDecoder<'a> {
    pub data: ByteStream<'a>,
    pub metadata: ByteStream<'a>,
    pub dim: Dim2D,
    pub bits_per_sample: u32,
    pub uncorrected_raw_values: bool,
}

pub enum RawDecoder<'a> {
    Cr2(Cr2Decoder<'a>),
    Cr3(Cr3Decoder<'a>),
    Rw2(Rw2Decoder<'a>),
    Srw(SrwDecoder<'a>),
    Nef(NefDecoder<'a>),
}

impl RawDecoder<'_> {
    /// Allocates the output plane, runs the format's decompressor, and
    /// returns the image. On error the partial plane is dropped.
    pub fn decode_raw(&self) -> Result<RawImage> {
        match self {
            RawDecoder::Cr2(d) => {
                let mut raw = RawImage::create(d.dim, d.cpp)?;
                Cr2Decompressor::new(d.input.clone(), &mut raw)?.decode(d.slices.clone())?;
                Ok(raw)
            }
            RawDecoder::Cr3(d) => {
                let chunk = d
                    .root
                    .biggest_chunk()
                    .ok_or(IsoMError::Malformed("no media chunks"))?;
                let mut raw = RawImage::create(d.dim, 1)?;
                LJpegDecompressor::new(chunk.clone(), &mut raw).decode(false)?;
                Ok(raw)
            }
            RawDecoder::Rw2(d) => {
                let mut raw = RawImage::create(d.dim, 1)?;
                PanasonicDecompressorV6::decompress(&mut raw, &d.input)?;
                Ok(raw)
            }
            RawDecoder::Srw(d) => {
                let mut raw = RawImage::create(d.dim, 1)?;
                SamsungV0Decompressor::decompress(&mut raw, &d.bso, &d.bsr)?;
                Ok(raw)
            }
            RawDecoder::Nef(d) => {
                let mut raw = RawImage::create(d.dim, 1)?;
                NikonDecompressor::decompress(
                    &mut raw,
                    d.data.clone(),
                    d.metadata.clone(),
                    d.bits_per_sample,
                    d.uncorrected_raw_values,
                )?;
                Ok(raw)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::container::testutil::single_chunk_file;
    use crate::ljpeg::testutil::{build_ljpeg, counts16};

    #[test]
    fn sniffing_by_magic() {
        assert_eq!(
            sniff(&[0x49, 0x49, 0x2A, 0x00, 1, 2]),
            ContainerFormat::Tiff(Endianness::Little)
        );
        assert_eq!(
            sniff(&[0x4D, 0x4D, 0x00, 0x2A]),
            ContainerFormat::Tiff(Endianness::Big)
        );
        assert_eq!(sniff(&[0x49, 0x49, 0x55, 0x00]), ContainerFormat::Rw2);
        assert_eq!(
            sniff(&[0, 0, 0, 20, b'f', b't', b'y', b'p', b'c', b'r', b'x', b' ']),
            ContainerFormat::IsoM
        );
        assert_eq!(sniff(&[0x00, 0x01]), ContainerFormat::Unknown);
        assert_eq!(sniff(&[]), ContainerFormat::Unknown);
    }

    /// MSB-first bit writer with JPEG byte stuffing.
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
                        self.bytes.push(0x00);
                    }
                    self.acc = 0;
                    self.n = 0;
                }
            }
        }

        fn diff(&mut self, diff: i32) {
            let ssss = 32 - diff.unsigned_abs().leading_zeros();
            self.push(ssss, 4);
            if ssss > 0 {
                let mag = if diff > 0 {
                    diff as u32
                } else {
                    (diff + ((1i32 << ssss) - 1)) as u32
                };
                self.push(mag, ssss);
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
    fn cr3_flow_decodes_the_biggest_chunk() {
        // A 4x2 single-component scan inside a one-track container.
        let rows: [[u16; 4]; 2] = [[2048, 2050, 2049, 2060], [2040, 2041, 2043, 2042]];
        let mut bits = BitWriter::default();
        let mut prev_first = 1i32 << 11;
        for row in rows {
            let mut pred = prev_first;
            for (c, &v) in row.iter().enumerate() {
                bits.diff(i32::from(v) - pred);
                pred = i32::from(v);
                if c == 0 {
                    prev_first = pred;
                }
            }
        }
        let counts = counts16(&[0, 0, 0, 9]);
        let values: Vec<u8> = (0..9).collect();
        let payload = build_ljpeg(
            12,
            4,
            2,
            &[(0, 1, 1, 0)],
            &[(0, &counts, &values)],
            1,
            0,
            &bits.finish(),
        );
        let file = single_chunk_file(b"crx ", &payload);
        // Through the front door: aligned owned buffer, stream, container.
        let buffer = crate::buffer::Buffer::create(&file).unwrap();
        let stream = ByteStream::from_buffer(&buffer, Endianness::Big);
        assert_eq!(sniff(&buffer), ContainerFormat::IsoM);
        let decoder = RawDecoder::Cr3(Cr3Decoder::new(&stream, Dim2D::new(4, 2)).unwrap());
        let raw = decoder.decode_raw().unwrap();
        for (r, row) in rows.iter().enumerate() {
            assert_eq!(&raw.row(r)[..4], &row[..], "row {r}");
        }
    }

    #[test]
    fn rw2_and_srw_drivers_run_their_decompressors() {
        // A zeroed V6 block yields the bias-only pixels.
        let src = [0u8; 16];
        let decoder = RawDecoder::Rw2(Rw2Decoder {
            input: ByteStream::new(&src, Endianness::Little),
            dim: Dim2D::new(16, 1),
        });
        let raw = decoder.decode_raw().unwrap();
        assert_eq!(&raw.row(0)[..16], &[0xFFF1u16; 16]);

        // A zeroed Samsung stripe is the flat 128 cold start.
        let bso = 0u32.to_le_bytes();
        let bsr = [0u8; 16];
        let decoder = RawDecoder::Srw(SrwDecoder {
            bso: ByteStream::new(&bso, Endianness::Little),
            bsr: ByteStream::new(&bsr, Endianness::Little),
            dim: Dim2D::new(16, 1),
        });
        let raw = decoder.decode_raw().unwrap();
        assert_eq!(&raw.row(0)[..16], &[128u16; 16]);
    }

    #[test]
    fn cr3_dimensions_come_from_the_caller() {
        // The container itself never dictates the plane size; a mismatch
        // between caller geometry and frame is a decode error, not a guess.
        let file = single_chunk_file(b"crx ", &[0xFF, 0xD8, 0xFF, 0xD9]);
        let stream = ByteStream::new(&file, Endianness::Big);
        let decoder = RawDecoder::Cr3(Cr3Decoder::new(&stream, Dim2D::new(128, 128)).unwrap());
        assert!(decoder.decode_raw().is_err());
    }
}
