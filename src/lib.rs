// Copyright (c) the rawdec Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Bit-accurate decompression core for camera RAW formats.
//!
//! The crate turns vendor-compressed byte streams (Canon CR2/CR3 lossless
//! JPEG, Nikon NEF, Panasonic RW2 V6, Samsung SRW V0) into a planar 16-bit
//! pixel plane. Camera identification, TIFF/EXIF traversal, color handling
//! and file I/O are the caller's business: decoders consume pre-located
//! [`bytestream::ByteStream`] payloads and produce an [`image::RawImage`].

pub mod alloc;
pub mod bitpump;
pub mod bst;
pub mod buffer;
pub mod bytestream;
pub mod container;
pub mod decoders;
pub mod decompressors;
pub mod error;
pub mod huffman;
pub mod image;
pub mod ljpeg;
mod util;

pub use error::{Error, Result};
