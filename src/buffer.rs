// Copyright (c) the rawdec Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::ops::Deref;

use crate::alloc::AlignedVec;
use crate::error::{IoError, Result};
use crate::util::round_up;

/// Tail slack kept behind every owned buffer so that 4- and 8-byte reads
/// issued near the logical end stay inside the allocation.
pub const BUFFER_PADDING: usize = 16;

enum Storage<'a> {
    Owned(AlignedVec<u8>),
    Borrowed(&'a [u8]),
}

/// An immutable byte region, either owned (aligned, padded) or borrowed.
///
/// Owned storage is allocated once and never resized; borrowed buffers wrap
/// any slice, typically a sub-view of an owning `Buffer`. The logical size
/// never includes the padding tail.
pub struct Buffer<'a> {
    storage: Storage<'a>,
    size: usize,
}

impl Buffer<'static> {
    /// Copies `data` into owned, 16-byte aligned storage with a padding
    /// tail. Zero-sized buffers are rejected.
    pub fn create(data: &[u8]) -> Result<Buffer<'static>> {
        if data.is_empty() {
            return Err(IoError::Overflow { wanted: 1, left: 0 }.into());
        }
        let capacity = round_up(data.len() + BUFFER_PADDING, 16);
        Ok(Buffer {
            storage: Storage::Owned(AlignedVec::from_slice_padded(data, capacity)),
            size: data.len(),
        })
    }
}

impl<'a> Buffer<'a> {
    /// Wraps a foreign byte region without copying.
    pub fn borrowed(data: &'a [u8]) -> Buffer<'a> {
        Buffer {
            storage: Storage::Borrowed(data),
            size: data.len(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_owner(&self) -> bool {
        matches!(self.storage, Storage::Owned(_))
    }

    /// A borrowed buffer over `[offset, offset + count)`.
    pub fn get_sub_view(&self, offset: usize, count: usize) -> Result<Buffer<'_>> {
        if offset.checked_add(count).map_or(true, |end| end > self.size) {
            return Err(IoError::OutOfBounds {
                offset,
                count,
                size: self.size,
            }
            .into());
        }
        Ok(Buffer::borrowed(&self[offset..offset + count]))
    }
}

impl Deref for Buffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.storage {
            Storage::Owned(v) => &v[..self.size],
            Storage::Borrowed(s) => s,
        }
    }
}

impl std::fmt::Debug for Buffer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Buffer{{{} bytes, {}}}",
            self.size,
            if self.is_owner() { "owned" } else { "borrowed" }
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn owned_is_aligned_and_padded() {
        let b = Buffer::create(&[1, 2, 3]).unwrap();
        assert!(b.is_owner());
        assert_eq!(b.size(), 3);
        assert_eq!(&b[..], &[1, 2, 3]);
        assert_eq!(b.as_ptr() as usize % 16, 0);
    }

    #[test]
    fn empty_creation_fails() {
        assert!(Buffer::create(&[]).is_err());
    }

    #[test]
    fn sub_view_borrows_prefix() {
        let b = Buffer::create(&[0, 1, 2, 3, 4]).unwrap();
        let v = b.get_sub_view(1, 3).unwrap();
        assert!(!v.is_owner());
        assert_eq!(&v[..], &[1, 2, 3]);
        assert!(b.get_sub_view(3, 3).is_err());
        assert!(b.get_sub_view(usize::MAX, 2).is_err());
    }
}
