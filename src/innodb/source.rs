//! Byte sources for tablespace files (spec.md §6). `MmapPageSource` is the
//! only implementation shipped: an `.ibd` file is mapped once and every
//! page handed out is a zero-copy slice into that mapping, sliced on
//! `physical_page_size` boundaries and, where transparent compression is
//! configured, run through the compressed-page shim into a private
//! logical-sized buffer.

use std::fs::File;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

use super::page::{decompress_page, FIL_PAGE_SIZE};
use super::{ErrorKind, IbdError, ParseOptions, PhysicalPageSize};

/// A source of logical, decompressed 16 KiB pages, indexed by physical
/// page number within the file.
pub trait PageSource {
    /// Number of physical pages backing this source.
    fn page_count(&self) -> usize;

    /// Returns the logical (always 16 KiB, decompressed if needed) bytes
    /// for physical page `index`.
    fn read_page(&self, index: usize) -> Result<Box<[u8; FIL_PAGE_SIZE]>, IbdError>;
}

pub struct MmapPageSource {
    mmap: Mmap,
    physical_page_size: usize,
    decompress: bool,
}

impl MmapPageSource {
    pub fn open(path: &Path, options: &ParseOptions) -> Result<MmapPageSource, IbdError> {
        let file = File::open(path).map_err(|_| {
            IbdError::new(ErrorKind::OutOfBounds { offset: 0, len: 0 })
        })?;
        let mmap = unsafe { MmapOptions::new().map(&file) }.map_err(|_| {
            IbdError::new(ErrorKind::OutOfBounds { offset: 0, len: 0 })
        })?;

        let physical_page_size = match options.physical_page_size {
            PhysicalPageSize::Auto => detect_physical_page_size(&mmap)?,
            other => other.bytes().expect("non-Auto variant always has a byte size"),
        };

        Ok(MmapPageSource {
            mmap,
            physical_page_size,
            decompress: options.enable_decompression,
        })
    }
}

/// Per spec.md §9, autodetection is advisory only: it inspects the first
/// page's own recorded size hint where present and otherwise assumes an
/// uncompressed 16 KiB tablespace. Callers that need certainty should
/// pass an explicit `PhysicalPageSize`.
fn detect_physical_page_size(mmap: &Mmap) -> Result<usize, IbdError> {
    if mmap.len() >= FIL_PAGE_SIZE {
        Ok(FIL_PAGE_SIZE)
    } else if !mmap.is_empty() {
        Ok(mmap.len())
    } else {
        Err(IbdError::new(ErrorKind::InvalidPhysicalSize(0)))
    }
}

impl PageSource for MmapPageSource {
    fn page_count(&self) -> usize {
        if self.physical_page_size == 0 {
            0
        } else {
            self.mmap.len() / self.physical_page_size
        }
    }

    fn read_page(&self, index: usize) -> Result<Box<[u8; FIL_PAGE_SIZE]>, IbdError> {
        let start = index * self.physical_page_size;
        let end = start + self.physical_page_size;
        let physical = self.mmap.get(start..end).ok_or_else(|| {
            IbdError::new(ErrorKind::OutOfBounds {
                offset: start,
                len: self.mmap.len(),
            })
        })?;

        if self.physical_page_size == FIL_PAGE_SIZE {
            let mut out = Box::new([0u8; FIL_PAGE_SIZE]);
            out.copy_from_slice(physical);
            return Ok(out);
        }

        if !self.decompress {
            return Err(IbdError::new(ErrorKind::InvalidLogicalSize(physical.len())));
        }

        decompress_page(physical)
    }
}
