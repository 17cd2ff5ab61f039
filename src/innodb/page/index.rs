//! The 36-byte INDEX page header, the 20-byte FSEG header, the page
//! directory, and `IndexPage`, which ties the three together with the
//! record chain into a single validated view over one page's worth of
//! B-tree data (spec.md §4.3).

use super::super::bytes::{read_u16_be, read_u64_be};
use super::super::{ErrorKind, IbdError};
use super::record::{RecordWalker, INFIMUM_ORIGIN, PAGE_DATA, RECORD_HEADER_SIZE, SUPREMUM_ORIGIN};
use super::{FilHeader, FilTrailer, Page, PageType};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexFormat {
    Redundant,
    Compact,
}

pub const INDEX_HEADER_SIZE: usize = 36;
pub const FSEG_HEADER_SIZE: usize = 20;
const PAGE_DIRECTORY_SLOT_SIZE: usize = 2;
const FIL_TRAILER_SIZE: usize = 8;
const INFIMUM_LITERAL: &[u8; 8] = b"infimum\0";
const SUPREMUM_LITERAL: &[u8; 8] = b"supremum";

/*
 Actual Layout
 +----------------------------------------------+----------------------------------------------+
 |        Number of Directory Slots (2)         |            Heap Top Position (2)             |
 +-----------+----------------------------------+----------------------------------------------+
 |Format Flag|      Number of Heap Records      |         First Garbage Record Offset          |
 +-----------+----------------------------------+----------------------------------------------+
 |                Garbage Space                 |             Last Insert Position             |
 +----------------------------------------------+----------------------------------------------+
 |                Page Direction                |     Number of Inserts in Page Direction      |
 +----------------------------------------------+----------------------------------------------+
 |              Number of Records               |          Maximum Transaction ID (8)          |
 +----------------------------------------------+----------------------------------------------+
 |                               Maximum Transaction ID (cont.)                                |
 +----------------------------------------------+----------------------------------------------+
 |        Maximum Transaction ID (cont.)        |                  Page Level                  |
 +----------------------------------------------+----------------------------------------------+
 |                                        Index ID (8)                                         |
 +---------------------------------------------------------------------------------------------+
 |                                      Index ID (cont.)                                       |
 +---------------------------------------------------------------------------------------------+
*/
#[derive(Debug, Clone)]
pub struct IndexHeader {
    pub number_of_directory_slots: u16,
    pub heap_top_position: u16,
    pub format: IndexFormat, // highest bit of the next field.
    pub number_of_heap_records: u16, // lower 15 bits
    pub first_garbage_record_offset: u16,
    pub garbage_space: u16,
    pub last_insert_position: u16,
    pub page_direction: u16,
    pub number_of_inserts_in_page_direction: u16,
    pub number_of_records: u16,
    pub maximum_transaction_id: u64,
    pub page_level: u16,
    pub index_id: u64,
}

impl IndexHeader {
    pub fn from_bytes(data: &[u8]) -> Result<Self, IbdError> {
        if data.len() < INDEX_HEADER_SIZE {
            return Err(IbdError::new(ErrorKind::OutOfBounds {
                offset: data.len(),
                len: INDEX_HEADER_SIZE,
            }));
        }

        let format_and_num_heap_records_raw = read_u16_be(data, 4)?;

        Ok(IndexHeader {
            number_of_directory_slots: read_u16_be(data, 0)?,
            heap_top_position: read_u16_be(data, 2)?,
            format: if (format_and_num_heap_records_raw & 0x8000) == 0 {
                IndexFormat::Redundant
            } else {
                IndexFormat::Compact
            },
            number_of_heap_records: format_and_num_heap_records_raw & 0x7FFF,
            first_garbage_record_offset: read_u16_be(data, 6)?,
            garbage_space: read_u16_be(data, 8)?,
            last_insert_position: read_u16_be(data, 10)?,
            page_direction: read_u16_be(data, 12)?,
            number_of_inserts_in_page_direction: read_u16_be(data, 14)?,
            number_of_records: read_u16_be(data, 16)?,
            maximum_transaction_id: read_u64_be(data, 18)?,
            page_level: read_u16_be(data, 26)?,
            index_id: read_u64_be(data, 28)?,
        })
    }
}

/// The pair of 10-byte FSEG (file segment) headers reserved for the
/// leaf and non-leaf segment of this index tree. Their contents are
/// opaque to this crate: we record them only so the header block can be
/// accounted for byte-for-byte.
#[derive(Debug, Clone)]
pub struct FsegHeader {
    pub leaf_inode: [u8; 10],
    pub nonleaf_inode: [u8; 10],
}

impl FsegHeader {
    pub fn from_bytes(data: &[u8]) -> Result<Self, IbdError> {
        if data.len() < FSEG_HEADER_SIZE {
            return Err(IbdError::new(ErrorKind::OutOfBounds {
                offset: data.len(),
                len: FSEG_HEADER_SIZE,
            }));
        }
        let mut leaf_inode = [0u8; 10];
        let mut nonleaf_inode = [0u8; 10];
        leaf_inode.copy_from_slice(&data[0..10]);
        nonleaf_inode.copy_from_slice(&data[10..20]);
        Ok(FsegHeader {
            leaf_inode,
            nonleaf_inode,
        })
    }
}

/// A one-line summary of an INDEX page's position in its B-tree, used by
/// the CLI's `summary` output format (spec.md §1/§6: "text / JSON /
/// summary" output).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSummary {
    pub page_no: u32,
    pub page_type: PageType,
    pub level: u16,
    pub index_id: u64,
    pub is_leaf: bool,
    pub record_count: u16,
}

/// A validated INDEX-type page: envelope plus index header, FSEG header,
/// page directory and the two system records, all checked at
/// construction so downstream record decoding can assume they hold.
pub struct IndexPage<'a> {
    pub fil_header: FilHeader,
    pub fil_trailer: FilTrailer,
    pub index_header: IndexHeader,
    pub fseg_header: FsegHeader,
    /// Record origins in page-directory order: `directory_slots[0]` is
    /// the infimum's origin, the last entry the supremum's.
    pub directory_slots: Vec<usize>,
    raw: &'a [u8],
}

impl<'a> IndexPage<'a> {
    pub fn from_page(page: &Page<'a>) -> Result<IndexPage<'a>, IbdError> {
        if page.header.page_type != PageType::Index {
            return Err(IbdError::new(ErrorKind::NotIndexPage {
                has: page.header.page_type,
            })
            .with_page(page.header.page_no));
        }

        let raw = page.raw_data;
        let index_header = IndexHeader::from_bytes(&raw[38..38 + INDEX_HEADER_SIZE])
            .map_err(|e| e.with_page(page.header.page_no))?;

        if index_header.format == IndexFormat::Redundant {
            return Err(
                IbdError::new(ErrorKind::UnsupportedRedundantFormat).with_page(page.header.page_no)
            );
        }

        let fseg_header = FsegHeader::from_bytes(
            &raw[38 + INDEX_HEADER_SIZE..38 + INDEX_HEADER_SIZE + FSEG_HEADER_SIZE],
        )
        .map_err(|e| e.with_page(page.header.page_no))?;

        verify_system_record(raw, INFIMUM_ORIGIN, INFIMUM_LITERAL, page.header.page_no)?;
        verify_system_record(raw, SUPREMUM_ORIGIN, SUPREMUM_LITERAL, page.header.page_no)?;

        let directory_slots = read_directory(raw, index_header.number_of_directory_slots)
            .map_err(|e| e.with_page(page.header.page_no))?;

        Ok(IndexPage {
            fil_header: page.header.clone(),
            fil_trailer: page.trailer.clone(),
            index_header,
            fseg_header,
            directory_slots,
            raw,
        })
    }

    pub fn is_leaf(&self) -> bool {
        self.index_header.page_level == 0
    }

    pub fn is_root(&self) -> bool {
        self.fil_header.prev.is_none() && self.fil_header.next.is_none()
    }

    /// Bytes consumed by the record heap, from `PAGE_DATA` to the heap
    /// top position recorded in the index header.
    pub fn used_bytes(&self) -> usize {
        (self.index_header.heap_top_position as usize).saturating_sub(PAGE_DATA)
    }

    pub fn walk_records(&self, max_steps: usize, skip_system: bool) -> RecordWalker<'a> {
        RecordWalker::new(self.raw, max_steps, skip_system)
    }

    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    /// A one-line-summarizable snapshot of this page's B-tree position,
    /// for the CLI's `summary` output format.
    pub fn summary(&self, page_no: u32) -> PageSummary {
        PageSummary {
            page_no,
            page_type: self.fil_header.page_type,
            level: self.index_header.page_level,
            index_id: self.index_header.index_id,
            is_leaf: self.is_leaf(),
            record_count: self.index_header.number_of_records,
        }
    }
}

fn verify_system_record(
    raw: &[u8],
    origin: usize,
    literal: &[u8; 8],
    page_no: u32,
) -> Result<(), IbdError> {
    let data_start = origin;
    let data_end = origin + literal.len();
    let actual = raw.get(data_start..data_end).ok_or_else(|| {
        IbdError::new(ErrorKind::OutOfBounds {
            offset: data_start,
            len: raw.len(),
        })
        .with_page(page_no)
    })?;
    if actual != literal {
        return Err(IbdError::new(ErrorKind::CorruptSystemRecord {
            expected: std::str::from_utf8(literal).unwrap_or("<system record>"),
        })
        .with_page(page_no)
        .with_offset(data_start - RECORD_HEADER_SIZE)
        .with_hex_context(raw, data_start));
    }
    Ok(())
}

fn read_directory(raw: &[u8], num_slots: u16) -> Result<Vec<usize>, IbdError> {
    let num_slots = num_slots as usize;
    let bytes_len = num_slots * PAGE_DIRECTORY_SLOT_SIZE;
    let start = raw
        .len()
        .checked_sub(FIL_TRAILER_SIZE + bytes_len)
        .ok_or_else(|| {
            IbdError::new(ErrorKind::OutOfBounds {
                offset: raw.len(),
                len: bytes_len + FIL_TRAILER_SIZE,
            })
        })?;

    // Physically, slot 0 (infimum) sits nearest the FIL trailer and
    // slot n-1 (supremum) nearest the heap, i.e. the reverse of the
    // address order read here; reverse while reading so slots[0] is
    // infimum and slots[n-1] is supremum (spec.md §4.3 step 5).
    let mut slots = Vec::with_capacity(num_slots);
    for i in 0..num_slots {
        slots.push(read_u16_be(raw, start + i * PAGE_DIRECTORY_SLOT_SIZE)? as usize);
    }
    slots.reverse();
    Ok(slots)
}
