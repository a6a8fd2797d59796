// Copyright (c) the rawdec Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! ISO Base Media File Format box tree, the subset CR3 containers need.
//!
//! Containers lex their children when constructed; leaf boxes parse their
//! payload eagerly. The root requires `ftyp`, `moov` and `mdat` in that
//! order, a recognised brand, and a fully populated
//! `moov → trak → mdia → minf → stbl` chain before the media data is
//! sliced into per-chunk streams.

use crate::bytestream::{ByteStream, Endianness};
use crate::error::{IsoMError, Result};
use crate::util::tracing_wrappers::*;

/// A four-character box type.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const FTYP: FourCC = FourCC(*b"ftyp");
    pub const MOOV: FourCC = FourCC(*b"moov");
    pub const MDAT: FourCC = FourCC(*b"mdat");
    pub const TRAK: FourCC = FourCC(*b"trak");
    pub const MDIA: FourCC = FourCC(*b"mdia");
    pub const MINF: FourCC = FourCC(*b"minf");
    pub const STBL: FourCC = FourCC(*b"stbl");
    pub const STSD: FourCC = FourCC(*b"stsd");
    pub const STSC: FourCC = FourCC(*b"stsc");
    pub const STSZ: FourCC = FourCC(*b"stsz");
    pub const CO64: FourCC = FourCC(*b"co64");
    pub const UUID: FourCC = FourCC(*b"uuid");
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

/// Brands this library knows how to interpret.
pub const SUPPORTED_BRANDS: [FourCC; 1] = [FourCC(*b"crx ")];

/// Upper bound on declared sample counts; raw containers hold a handful.
const MAX_SAMPLES: usize = 1 << 20;

/// One lexed box: type, optional uuid user type, payload, and the payload's
/// absolute offset within the file.
#[derive(Debug, Clone)]
pub struct RawBox<'a> {
    pub box_type: FourCC,
    pub user_type: Option<[u8; 16]>,
    pub data: ByteStream<'a>,
    pub file_offset: usize,
}

/// Lexes one box. `base_offset` is the absolute file offset of the
/// stream's origin, carried so chunk offsets can be resolved later.
fn lex_box<'a>(stream: &mut ByteStream<'a>, base_offset: usize) -> Result<RawBox<'a>> {
    let box_start = stream.position();
    let short_size = stream.get_u32()? as u64;
    let mut ty = [0u8; 4];
    ty.copy_from_slice(stream.get_bytes(4)?);
    let box_type = FourCC(ty);
    let size = match short_size {
        0 => {
            // Box extends to the end of the enclosing stream.
            (stream.size() - box_start) as u64
        }
        1 => stream.get_u64()?,
        n => n,
    };
    let user_type = if box_type == FourCC::UUID {
        let mut ut = [0u8; 16];
        ut.copy_from_slice(stream.get_bytes(16)?);
        Some(ut)
    } else {
        None
    };
    let header_len = (stream.position() - box_start) as u64;
    let payload_len = size
        .checked_sub(header_len)
        .ok_or(IsoMError::Malformed("box smaller than its header"))?;
    let payload_len =
        usize::try_from(payload_len).map_err(|_| IsoMError::Malformed("box size overflow"))?;
    let file_offset = base_offset + stream.position();
    let data = stream
        .get_stream(payload_len)
        .map_err(|_| IsoMError::Malformed("box extends past its container"))?;
    trace!("box {box_type} at {file_offset}");
    Ok(RawBox {
        box_type,
        user_type,
        data,
        file_offset,
    })
}

fn lex_children<'a>(parent: &RawBox<'a>) -> Result<Vec<RawBox<'a>>> {
    let mut stream = parent.data.clone();
    let mut children = Vec::new();
    while stream.remaining() > 0 {
        children.push(lex_box(&mut stream, parent.file_offset)?);
    }
    Ok(children)
}

/// Reads a full-box header, requiring version zero.
fn full_box_header(data: &mut ByteStream<'_>) -> Result<u32> {
    let vf = data.get_u32()?;
    if vf >> 24 != 0 {
        return Err(IsoMError::Malformed("unexpected box version").into());
    }
    Ok(vf & 0x00FF_FFFF)
}

#[derive(Debug)]
pub struct IsoMFileTypeBox {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: Vec<FourCC>,
}

impl IsoMFileTypeBox {
    fn parse(b: &RawBox<'_>) -> Result<IsoMFileTypeBox> {
        let mut data = b.data.clone();
        let mut brand = [0u8; 4];
        brand.copy_from_slice(data.get_bytes(4)?);
        let major_brand = FourCC(brand);
        let minor_version = data.get_u32()?;
        let mut compatible_brands = Vec::new();
        while data.remaining() >= 4 {
            let mut cb = [0u8; 4];
            cb.copy_from_slice(data.get_bytes(4)?);
            compatible_brands.push(FourCC(cb));
        }
        if !SUPPORTED_BRANDS.contains(&major_brand) {
            return Err(IsoMError::UnexpectedBrand(major_brand).into());
        }
        Ok(IsoMFileTypeBox {
            major_brand,
            minor_version,
            compatible_brands,
        })
    }
}

/// A sample description entry; only the shape is retained.
#[derive(Debug)]
pub struct SampleEntry {
    pub format: FourCC,
    pub data_reference_index: u16,
}

#[derive(Debug)]
pub struct IsoMSampleDescriptionBox {
    pub dscs: Vec<SampleEntry>,
}

impl IsoMSampleDescriptionBox {
    fn parse(b: &RawBox<'_>) -> Result<IsoMSampleDescriptionBox> {
        let mut data = b.data.clone();
        full_box_header(&mut data)?;
        let count = data.get_u32()? as usize;
        // Every entry costs at least a box header.
        if count > data.remaining() / 8 {
            return Err(IsoMError::Malformed("sample description table").into());
        }
        let mut dscs = Vec::with_capacity(count);
        for _ in 0..count {
            let entry = lex_box(&mut data, b.file_offset)?;
            let mut payload = entry.data.clone();
            payload.skip(6)?; // reserved
            let data_reference_index = payload.get_u16()?;
            dscs.push(SampleEntry {
                format: entry.box_type,
                data_reference_index,
            });
        }
        Ok(IsoMSampleDescriptionBox { dscs })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SampleToChunk {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

#[derive(Debug)]
pub struct IsoMSampleToChunkBox {
    pub dscs: Vec<SampleToChunk>,
}

impl IsoMSampleToChunkBox {
    fn parse(b: &RawBox<'_>) -> Result<IsoMSampleToChunkBox> {
        let mut data = b.data.clone();
        full_box_header(&mut data)?;
        let count = data.get_u32()? as usize;
        if count > data.remaining() / 12 {
            return Err(IsoMError::Malformed("sample-to-chunk table").into());
        }
        let mut dscs = Vec::with_capacity(count);
        for _ in 0..count {
            dscs.push(SampleToChunk {
                first_chunk: data.get_u32()?,
                samples_per_chunk: data.get_u32()?,
                sample_description_index: data.get_u32()?,
            });
        }
        if dscs.is_empty() || dscs[0].first_chunk != 1 {
            return Err(IsoMError::Malformed("sample-to-chunk table").into());
        }
        if dscs.windows(2).any(|w| w[0].first_chunk >= w[1].first_chunk) {
            return Err(IsoMError::Malformed("sample-to-chunk table").into());
        }
        Ok(IsoMSampleToChunkBox { dscs })
    }

    /// Samples in 1-based chunk number `chunk`.
    fn samples_in_chunk(&self, chunk: u32) -> u32 {
        let mut samples = 0;
        for d in &self.dscs {
            if d.first_chunk > chunk {
                break;
            }
            samples = d.samples_per_chunk;
        }
        samples
    }
}

#[derive(Debug)]
pub struct IsoMSampleSizeBox {
    pub sample_sizes: Vec<usize>,
}

impl IsoMSampleSizeBox {
    fn parse(b: &RawBox<'_>) -> Result<IsoMSampleSizeBox> {
        let mut data = b.data.clone();
        full_box_header(&mut data)?;
        let sample_size = data.get_u32()? as usize;
        let count = data.get_u32()? as usize;
        if count > MAX_SAMPLES || (sample_size == 0 && count > data.remaining() / 4) {
            return Err(IsoMError::Malformed("sample size table").into());
        }
        let sample_sizes = if sample_size != 0 {
            vec![sample_size; count]
        } else {
            let mut v = Vec::with_capacity(count);
            for _ in 0..count {
                v.push(data.get_u32()? as usize);
            }
            v
        };
        Ok(IsoMSampleSizeBox { sample_sizes })
    }
}

#[derive(Debug)]
pub struct IsoMChunkLargeOffsetBox {
    pub chunk_offsets: Vec<u64>,
}

impl IsoMChunkLargeOffsetBox {
    fn parse(b: &RawBox<'_>) -> Result<IsoMChunkLargeOffsetBox> {
        let mut data = b.data.clone();
        full_box_header(&mut data)?;
        let count = data.get_u32()? as usize;
        if count > data.remaining() / 8 {
            return Err(IsoMError::Malformed("chunk offset table").into());
        }
        let mut chunk_offsets = Vec::with_capacity(count);
        for _ in 0..count {
            chunk_offsets.push(data.get_u64()?);
        }
        Ok(IsoMChunkLargeOffsetBox { chunk_offsets })
    }
}

#[derive(Debug)]
pub struct IsoMSampleTableBox<'a> {
    pub stsd: IsoMSampleDescriptionBox,
    pub stsc: IsoMSampleToChunkBox,
    pub stsz: IsoMSampleSizeBox,
    pub co64: IsoMChunkLargeOffsetBox,
    /// Filled once the media data box is parsed.
    pub chunks: Vec<ByteStream<'a>>,
}

impl<'a> IsoMSampleTableBox<'a> {
    fn parse(b: &RawBox<'a>) -> Result<IsoMSampleTableBox<'a>> {
        let mut stsd = None;
        let mut stsc = None;
        let mut stsz = None;
        let mut co64 = None;
        for child in lex_children(b)? {
            match child.box_type {
                FourCC::STSD => stsd = Some(IsoMSampleDescriptionBox::parse(&child)?),
                FourCC::STSC => stsc = Some(IsoMSampleToChunkBox::parse(&child)?),
                FourCC::STSZ => stsz = Some(IsoMSampleSizeBox::parse(&child)?),
                FourCC::CO64 => co64 = Some(IsoMChunkLargeOffsetBox::parse(&child)?),
                _ => {}
            }
        }
        Ok(IsoMSampleTableBox {
            stsd: stsd.ok_or(IsoMError::Missing("stsd"))?,
            stsc: stsc.ok_or(IsoMError::Missing("stsc"))?,
            stsz: stsz.ok_or(IsoMError::Missing("stsz"))?,
            co64: co64.ok_or(IsoMError::Missing("co64"))?,
            chunks: Vec::new(),
        })
    }
}

#[derive(Debug)]
pub struct IsoMTrackBox<'a> {
    pub stbl: IsoMSampleTableBox<'a>,
}

impl<'a> IsoMTrackBox<'a> {
    fn parse(b: &RawBox<'a>) -> Result<IsoMTrackBox<'a>> {
        let mdia = find_child(b, FourCC::MDIA)?.ok_or(IsoMError::Missing("mdia"))?;
        let minf = find_child(&mdia, FourCC::MINF)?.ok_or(IsoMError::Missing("minf"))?;
        let stbl = find_child(&minf, FourCC::STBL)?.ok_or(IsoMError::Missing("stbl"))?;
        Ok(IsoMTrackBox {
            stbl: IsoMSampleTableBox::parse(&stbl)?,
        })
    }
}

fn find_child<'a>(parent: &RawBox<'a>, ty: FourCC) -> Result<Option<RawBox<'a>>> {
    Ok(lex_children(parent)?.into_iter().find(|c| c.box_type == ty))
}

#[derive(Debug)]
pub struct IsoMMovieBox<'a> {
    pub tracks: Vec<IsoMTrackBox<'a>>,
}

impl<'a> IsoMMovieBox<'a> {
    fn parse(b: &RawBox<'a>) -> Result<IsoMMovieBox<'a>> {
        let mut tracks = Vec::new();
        for child in lex_children(b)? {
            if child.box_type == FourCC::TRAK {
                tracks.push(IsoMTrackBox::parse(&child)?);
            }
        }
        if tracks.is_empty() {
            return Err(IsoMError::Missing("trak").into());
        }
        Ok(IsoMMovieBox { tracks })
    }
}

#[derive(Debug)]
pub struct IsoMMediaDataBox<'a> {
    pub data: ByteStream<'a>,
    pub file_offset: usize,
}

impl<'a> IsoMMediaDataBox<'a> {
    /// Slices the media data into per-chunk streams for every track,
    /// walking the sample tables. Offsets are absolute file offsets and
    /// must land inside this box.
    fn materialise_chunks(&self, moov: &mut IsoMMovieBox<'a>) -> Result<()> {
        let end = self.file_offset + self.data.size();
        for track in &mut moov.tracks {
            let stbl = &mut track.stbl;
            let mut sample = 0usize;
            let mut chunks = Vec::with_capacity(stbl.co64.chunk_offsets.len());
            for (i, &offset) in stbl.co64.chunk_offsets.iter().enumerate() {
                let samples = stbl.stsc.samples_in_chunk(i as u32 + 1) as usize;
                if samples == 0 || sample + samples > stbl.stsz.sample_sizes.len() {
                    return Err(IsoMError::Malformed("chunk offset table").into());
                }
                let size: usize = stbl.stsz.sample_sizes[sample..sample + samples].iter().sum();
                sample += samples;
                let offset =
                    usize::try_from(offset).map_err(|_| IsoMError::Malformed("chunk offset table"))?;
                if offset < self.file_offset || offset + size > end {
                    return Err(IsoMError::Malformed("chunk offset table").into());
                }
                let local = offset - self.file_offset;
                let bytes = self
                    .data
                    .get_sub_view(local, size)
                    .map_err(|_| IsoMError::Malformed("chunk offset table"))?;
                chunks.push(ByteStream::new(bytes, Endianness::Big));
            }
            stbl.chunks = chunks;
        }
        Ok(())
    }
}

/// The parsed file: brand, movie tree with materialised chunks, media data.
#[derive(Debug)]
pub struct IsoMRootBox<'a> {
    pub ftyp: IsoMFileTypeBox,
    pub moov: IsoMMovieBox<'a>,
    pub mdat: IsoMMediaDataBox<'a>,
}

impl<'a> IsoMRootBox<'a> {
    /// Parses a whole file. The stream must cover the file from offset
    /// zero; box offsets are resolved against it.
    pub fn parse(file: &ByteStream<'a>) -> Result<IsoMRootBox<'a>> {
        let mut stream = file.clone();
        stream.set_endianness(Endianness::Big);
        let mut ftyp = None;
        let mut moov = None;
        let mut mdat = None;
        while stream.remaining() > 0 {
            let b = lex_box(&mut stream, 0)?;
            match b.box_type {
                FourCC::FTYP => {
                    if ftyp.is_some() || moov.is_some() || mdat.is_some() {
                        return Err(IsoMError::Malformed("ftyp is not the first box").into());
                    }
                    ftyp = Some(IsoMFileTypeBox::parse(&b)?);
                }
                FourCC::MOOV => {
                    if ftyp.is_none() || mdat.is_some() {
                        return Err(IsoMError::Malformed("moov out of order").into());
                    }
                    moov = Some(IsoMMovieBox::parse(&b)?);
                }
                FourCC::MDAT => {
                    if moov.is_none() {
                        return Err(IsoMError::Malformed("mdat before moov").into());
                    }
                    mdat = Some(IsoMMediaDataBox {
                        data: b.data.clone(),
                        file_offset: b.file_offset,
                    });
                }
                _ => {}
            }
        }
        let ftyp = ftyp.ok_or(IsoMError::Missing("ftyp"))?;
        let mut moov = moov.ok_or(IsoMError::Missing("moov"))?;
        let mdat = mdat.ok_or(IsoMError::Missing("mdat"))?;
        mdat.materialise_chunks(&mut moov)?;
        Ok(IsoMRootBox { ftyp, moov, mdat })
    }

    /// The biggest chunk across all tracks; for CR3 that is the raw image.
    pub fn biggest_chunk(&self) -> Option<&ByteStream<'a>> {
        self.moov
            .tracks
            .iter()
            .flat_map(|t| t.stbl.chunks.iter())
            .max_by_key(|c| c.size())
    }
}
