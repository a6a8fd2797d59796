// Copyright (c) the rawdec Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Vendor decompressors. Each one is a leaf: it consumes pre-located
//! [`crate::bytestream::ByteStream`] payloads and fills a
//! [`crate::image::RawImage`], with no knowledge of the surrounding file.

pub mod cr2;
pub mod ljpeg;
pub mod nikon;
pub mod panasonic_v6;
pub mod samsung_v0;
