// Copyright (c) the rawdec Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Lossless JPEG (ITU T.81 process 14) header parsing.
//!
//! Only the markers the raw formats actually emit are handled: SOI, DHT,
//! SOF3 and SOS. Parsing stops right after SOS, leaving the stream at the
//! first byte of entropy-coded data.

use crate::bytestream::{ByteStream, Endianness};
use crate::error::{RawDecoderError, Result};
use crate::huffman::HuffmanTable;
use crate::image::MAX_COMPONENTS;

pub const M_SOI: u8 = 0xD8;
pub const M_SOF3: u8 = 0xC3;
pub const M_DHT: u8 = 0xC4;
pub const M_SOS: u8 = 0xDA;
pub const M_EOI: u8 = 0xD9;
pub const M_DQT: u8 = 0xDB;

#[derive(Clone, Copy, Debug, Default)]
pub struct ComponentInfo {
    pub id: u8,
    pub super_h: usize,
    pub super_v: usize,
    /// DC Huffman table slot selected by the scan header.
    pub dc_table: usize,
}

#[derive(Clone, Debug, Default)]
pub struct LJpegFrame {
    pub width: usize,
    pub height: usize,
    pub precision: u32,
    pub cps: usize,
    pub components: [ComponentInfo; MAX_COMPONENTS],
}

impl LJpegFrame {
    pub fn is_subsampled(&self) -> bool {
        self.components[..self.cps]
            .iter()
            .any(|c| c.super_h != 1 || c.super_v != 1)
    }
}

/// The parsed scan: frame descriptor, Huffman tables, predictor selection.
pub struct LJpegParser {
    pub frame: LJpegFrame,
    pub predictor: u8,
    pub point_transform: u32,
    tables: [Option<HuffmanTable>; MAX_COMPONENTS],
}

impl LJpegParser {
    /// Parses SOI through SOS and leaves `input` at the entropy-coded
    /// segment. `fix_dng_bug16` is forwarded to the Huffman tables.
    pub fn parse(input: &mut ByteStream<'_>, fix_dng_bug16: bool) -> Result<LJpegParser> {
        input.set_endianness(Endianness::Big);
        let mut parser = LJpegParser {
            frame: LJpegFrame::default(),
            predictor: 0,
            point_transform: 0,
            tables: [None, None, None, None],
        };
        if next_marker(input, false)? != M_SOI {
            return Err(RawDecoderError::MalformedJpeg("image does not start with SOI").into());
        }
        loop {
            match next_marker(input, true)? {
                M_SOF3 => parser.parse_sof(input)?,
                M_DHT => parser.parse_dht(input, fix_dng_bug16)?,
                M_SOS => {
                    parser.parse_sos(input)?;
                    return Ok(parser);
                }
                M_DQT => {
                    return Err(RawDecoderError::InvalidHuffmanTable(
                        "quantization table in a lossless scan",
                    )
                    .into())
                }
                M_EOI => {
                    return Err(RawDecoderError::MalformedJpeg("EOI before any scan").into())
                }
                _ => {
                    // Unknown segment: skip its payload.
                    let len = usize::from(input.get_u16()?);
                    input.skip(len.saturating_sub(2))?;
                }
            }
        }
    }

    pub fn table(&self, slot: usize) -> Result<&HuffmanTable> {
        self.tables[slot]
            .as_ref()
            .ok_or_else(|| RawDecoderError::MissingTable(slot).into())
    }

    /// Initial predictor value shared by every component.
    pub fn initial_predictor(&self) -> i32 {
        1 << (self.frame.precision - 1 - self.point_transform)
    }

    fn parse_sof(&mut self, input: &mut ByteStream<'_>) -> Result<()> {
        if self.frame.cps != 0 {
            return Err(RawDecoderError::MalformedJpeg("more than one frame header").into());
        }
        let _len = input.get_u16()?;
        let precision = u32::from(input.get_u8()?);
        let height = usize::from(input.get_u16()?);
        let width = usize::from(input.get_u16()?);
        let cps = usize::from(input.get_u8()?);
        if !(2..=16).contains(&precision) {
            return Err(RawDecoderError::InvalidDimensions(width, height).into());
        }
        if width == 0 || height == 0 {
            return Err(RawDecoderError::InvalidDimensions(width, height).into());
        }
        if !(1..=MAX_COMPONENTS).contains(&cps) {
            return Err(RawDecoderError::ComponentMismatch {
                frame: cps,
                image: MAX_COMPONENTS,
            }
            .into());
        }
        self.frame.precision = precision;
        self.frame.width = width;
        self.frame.height = height;
        self.frame.cps = cps;
        for i in 0..cps {
            let id = input.get_u8()?;
            let hv = input.get_u8()?;
            let _quant = input.get_u8()?;
            let (super_h, super_v) = (usize::from(hv >> 4), usize::from(hv & 0xF));
            if !(1..=2).contains(&super_h) || !(1..=2).contains(&super_v) {
                return Err(RawDecoderError::UnsupportedSubsampling.into());
            }
            self.frame.components[i] = ComponentInfo {
                id,
                super_h,
                super_v,
                dc_table: 0,
            };
        }
        Ok(())
    }

    fn parse_dht(&mut self, input: &mut ByteStream<'_>, fix_dng_bug16: bool) -> Result<()> {
        let len = usize::from(input.get_u16()?);
        let mut left = len
            .checked_sub(2)
            .ok_or(RawDecoderError::InvalidHuffmanTable("short DHT segment"))?;
        while left > 0 {
            let header = input.get_u8()?;
            let (class, slot) = (header >> 4, usize::from(header & 0xF));
            if class != 0 {
                return Err(
                    RawDecoderError::InvalidHuffmanTable("AC table in a lossless scan").into(),
                );
            }
            if slot >= MAX_COMPONENTS {
                return Err(RawDecoderError::InvalidHuffmanTable("table slot above 3").into());
            }
            if self.tables[slot].is_some() {
                return Err(RawDecoderError::InvalidHuffmanTable("duplicate definition").into());
            }
            let mut table = HuffmanTable::new();
            let count = table.set_n_codes_per_length(input.get_bytes(16)?)?;
            table.set_code_values(input.get_bytes(count)?)?;
            table.setup(true, fix_dng_bug16)?;
            self.tables[slot] = Some(table);
            left = left
                .checked_sub(1 + 16 + count)
                .ok_or(RawDecoderError::InvalidHuffmanTable("DHT length mismatch"))?;
        }
        Ok(())
    }

    fn parse_sos(&mut self, input: &mut ByteStream<'_>) -> Result<()> {
        if self.frame.cps == 0 {
            return Err(RawDecoderError::MalformedJpeg("SOS before SOF").into());
        }
        let _len = input.get_u16()?;
        let soscps = usize::from(input.get_u8()?);
        if soscps != self.frame.cps {
            return Err(RawDecoderError::ComponentMismatch {
                frame: self.frame.cps,
                image: soscps,
            }
            .into());
        }
        let cps = self.frame.cps;
        for _ in 0..soscps {
            let cs = input.get_u8()?;
            let component = self
                .frame
                .components[..cps]
                .iter_mut()
                .find(|c| c.id == cs)
                .ok_or(RawDecoderError::ComponentMismatch {
                    frame: usize::from(cs),
                    image: 0,
                })?;
            let tables = input.get_u8()?;
            let dc = usize::from(tables >> 4);
            if dc >= MAX_COMPONENTS {
                return Err(RawDecoderError::InvalidHuffmanTable("table slot above 3").into());
            }
            component.dc_table = dc;
        }
        self.predictor = input.get_u8()?;
        let _se = input.get_u8()?;
        self.point_transform = u32::from(input.get_u8()?) & 0xF;
        Ok(())
    }
}

fn next_marker(input: &mut ByteStream<'_>, allow_skip: bool) -> Result<u8> {
    if allow_skip {
        // Tolerate garbage between segments: scan for the next FF xx.
        loop {
            if input.get_u8()? != 0xFF {
                continue;
            }
            // Fill bytes: any number of FFs may precede the marker code.
            let mut code = input.get_u8()?;
            while code == 0xFF {
                code = input.get_u8()?;
            }
            if code != 0x00 {
                return Ok(code);
            }
        }
    } else {
        if input.get_u8()? != 0xFF {
            return Err(RawDecoderError::MalformedJpeg("expected a marker").into());
        }
        let code = input.get_u8()?;
        if code == 0x00 || code == 0xFF {
            return Err(RawDecoderError::MalformedJpeg("expected a marker").into());
        }
        Ok(code)
    }
}
