// Copyright (c) the rawdec Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use thiserror::Error;

use crate::container::FourCC;

/// Errors raised by the byte- and bit-level readers on truncated input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IoError {
    #[error("Read out of bounds: [{offset}, {offset}+{count}) in a buffer of {size} bytes")]
    OutOfBounds {
        offset: usize,
        count: usize,
        size: usize,
    },
    #[error("End of stream while refilling bit cache")]
    EndOfStream,
    #[error("Requested {wanted} bytes, only {left} remain")]
    Overflow { wanted: usize, left: usize },
}

/// Errors raised by the format decoders.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RawDecoderError {
    #[error("Unsupported predictor mode: {0}")]
    UnsupportedPredictor(u8),
    #[error("Unsupported subsampling")]
    UnsupportedSubsampling,
    #[error("Component count does not match image: frame has {frame}, image has {image}")]
    ComponentMismatch { frame: usize, image: usize },
    #[error("Unexpected image dimensions: ({0}, {1})")]
    InvalidDimensions(usize, usize),
    #[error("Malformed JPEG stream: {0}")]
    MalformedJpeg(&'static str),
    #[error("No Huffman table defined in slot {0}")]
    MissingTable(usize),
    #[error("Invalid Huffman table: {0}")]
    InvalidHuffmanTable(&'static str),
    #[error("Prediction references pixels outside the image")]
    InvalidPrediction,
    #[error("Stripe offsets are out of sequence or a stripe is empty")]
    MalformedStripe,
    #[error("Unsupported stream: {0}")]
    Unsupported(&'static str),
}

/// Errors raised by the ISO base-media container parser.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IsoMError {
    #[error("Unexpected major brand {0}")]
    UnexpectedBrand(FourCC),
    #[error("Required box {0} is missing")]
    Missing(&'static str),
    #[error("Malformed container: {0}")]
    Malformed(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Decoder(#[from] RawDecoderError),
    #[error(transparent)]
    IsoM(#[from] IsoMError),
}

pub type Result<T> = std::result::Result<T, Error>;
