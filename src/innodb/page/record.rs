//! The 5-byte compact record header and the singly-linked record walker
//! (spec.md §4.4). The walker is an iterator over offsets into the page
//! buffer: no record is ever materialized as an owned node, which is
//! what keeps a malformed (cyclic) chain from being a memory hazard —
//! only a logical one, caught by the step cap.

use num_enum::TryFromPrimitive;

use super::super::bytes::read_u16_be;
use super::super::{ErrorKind, IbdError};

/// Where the page's heap data begins: FIL header (38) + index header (36)
/// + FSEG header (20).
pub const PAGE_DATA: usize = 94;
/// Real InnoDB magic numbers (Jeremy Cole's "InnoDB Page Structure":
/// `PAGE_NEW_INFIMUM = PAGE_DATA + 5`, `PAGE_NEW_SUPREMUM = PAGE_NEW_INFIMUM
/// + 8 + 5`). spec.md §4.4 states `102` for the infimum origin; that is
/// inconsistent with its own §4.3 step 4 (header starting at offset 94)
/// and with the canonical format, so this crate follows the canonical
/// values — see DESIGN.md.
pub const INFIMUM_ORIGIN: usize = PAGE_DATA + RECORD_HEADER_SIZE;
pub const SUPREMUM_ORIGIN: usize = INFIMUM_ORIGIN + 8 + RECORD_HEADER_SIZE;

pub const RECORD_HEADER_SIZE: usize = 5;

const USABLE_RANGE_END: usize = 16384 - 8; // FIL trailer starts here

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum RecordType {
    Conventional = 0,
    NodePointer = 1,
    Infimum = 2,
    Supremum = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoFlags {
    pub min_rec: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub info_flags: InfoFlags,
    pub num_owned: u8,
    pub heap_number: u16,
    pub record_type: RecordType,
    /// `None` for SUPREMUM, whose relative offset is the `0` sentinel.
    pub next_origin: Option<usize>,
}

impl RecordHeader {
    /// Parses the 5-byte header immediately preceding `origin`.
    pub fn from_origin(page: &[u8], origin: usize) -> Result<RecordHeader, IbdError> {
        let header_start = origin.checked_sub(RECORD_HEADER_SIZE).ok_or_else(|| {
            IbdError::new(ErrorKind::OffsetOutOfPage {
                next_origin: origin as i64 - RECORD_HEADER_SIZE as i64,
            })
        })?;

        let info_and_owned = *page.get(header_start).ok_or_else(|| {
            IbdError::new(ErrorKind::OutOfBounds {
                offset: header_start,
                len: page.len(),
            })
        })?;
        let type_and_heap = read_u16_be(page, header_start + 1)?;
        let raw_rel_offset = read_u16_be(page, header_start + 3)? as i16;

        let record_type_raw = (type_and_heap & 0x7) as u8;
        let record_type = RecordType::try_from_primitive(record_type_raw).map_err(|_| {
            IbdError::new(ErrorKind::CorruptSystemRecord {
                expected: "record type in {0,1,2,3}",
            })
            .with_offset(header_start)
        })?;

        let next_origin = if raw_rel_offset == 0 {
            None
        } else {
            let next = origin as i64 + raw_rel_offset as i64;
            Some(next as usize)
        };

        Ok(RecordHeader {
            info_flags: InfoFlags {
                min_rec: (info_and_owned & 0x10) != 0,
                deleted: (info_and_owned & 0x20) != 0,
            },
            num_owned: info_and_owned & 0x0F,
            heap_number: type_and_heap >> 3,
            record_type,
            next_origin,
        })
    }
}

/// A lazy, finite, non-restartable traversal of a record chain from
/// INFIMUM to SUPREMUM.
pub struct RecordWalker<'a> {
    page: &'a [u8],
    cur_origin: Option<usize>,
    steps: usize,
    max_steps: usize,
    skip_system: bool,
    done: bool,
}

/// One step of the walk: a record's origin plus its parsed header.
#[derive(Debug, Clone, Copy)]
pub struct RecordCursor {
    pub origin: usize,
    pub header: RecordHeader,
}

impl<'a> RecordWalker<'a> {
    pub fn new(page: &'a [u8], max_steps: usize, skip_system: bool) -> RecordWalker<'a> {
        RecordWalker {
            page,
            cur_origin: Some(INFIMUM_ORIGIN),
            steps: 0,
            max_steps,
            skip_system,
            done: false,
        }
    }

    fn step(&mut self) -> Option<Result<RecordCursor, IbdError>> {
        let origin = self.cur_origin?;

        if origin < PAGE_DATA || origin >= USABLE_RANGE_END {
            self.done = true;
            return Some(Err(IbdError::new(ErrorKind::OffsetOutOfPage {
                next_origin: origin as i64,
            })
            .with_offset(origin)));
        }

        if self.steps >= self.max_steps {
            self.done = true;
            return Some(Err(IbdError::new(ErrorKind::WalkTooLong {
                max_steps: self.max_steps,
            })));
        }
        self.steps += 1;

        let header = match RecordHeader::from_origin(self.page, origin) {
            Ok(h) => h,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        self.cur_origin = header.next_origin;
        if header.next_origin.is_none() {
            self.done = true;
        }

        Some(Ok(RecordCursor { origin, header }))
    }
}

impl<'a> Iterator for RecordWalker<'a> {
    type Item = Result<RecordCursor, IbdError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done && self.cur_origin.is_none() {
                return None;
            }
            let item = self.step()?;
            if self.skip_system {
                if let Ok(cursor) = &item {
                    if matches!(
                        cursor.header.record_type,
                        RecordType::Infimum | RecordType::Supremum
                    ) {
                        if cursor.header.next_origin.is_none() {
                            return None;
                        }
                        continue;
                    }
                }
            }
            return Some(item);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn synthetic_page_with_three_records() -> Vec<u8> {
        // INFIMUM(origin 99) -> rec A(origin 120) -> SUPREMUM(origin 112)
        let mut page = vec![0u8; 16384];
        write_header(&mut page, INFIMUM_ORIGIN, RecordType::Infimum, 0, 120 - INFIMUM_ORIGIN as i64);
        write_header(&mut page, 120, RecordType::Conventional, 2, SUPREMUM_ORIGIN as i64 - 120);
        write_header(&mut page, SUPREMUM_ORIGIN, RecordType::Supremum, 0, 0);
        page
    }

    fn write_header(page: &mut [u8], origin: usize, rt: RecordType, heap_no: u16, rel: i64) {
        let h = origin - RECORD_HEADER_SIZE;
        page[h] = 0;
        let type_and_heap = (heap_no << 3) | rt as u16;
        page[h + 1..h + 3].copy_from_slice(&type_and_heap.to_be_bytes());
        page[h + 3..h + 5].copy_from_slice(&(rel as i16).to_be_bytes());
    }

    #[test]
    fn walk_terminates_at_supremum() {
        let page = synthetic_page_with_three_records();
        let walker = RecordWalker::new(&page, 100, false);
        let records: Vec<_> = walker.map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].header.record_type, RecordType::Infimum);
        assert_eq!(records[1].header.record_type, RecordType::Conventional);
        assert_eq!(records[2].header.record_type, RecordType::Supremum);
        assert_eq!(records[2].header.next_origin, None);
    }

    #[test]
    fn skip_system_hides_sentinels() {
        let page = synthetic_page_with_three_records();
        let walker = RecordWalker::new(&page, 100, true);
        let records: Vec<_> = walker.map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].header.record_type, RecordType::Conventional);
    }

    #[test]
    fn walk_too_long_is_caught() {
        let mut page = vec![0u8; 16384];
        // A record whose relative offset points one byte forward of its
        // own origin, forming a chain that never reaches a zero sentinel
        // within the step budget.
        write_header(&mut page, INFIMUM_ORIGIN, RecordType::Conventional, 0, 1);
        write_header(&mut page, INFIMUM_ORIGIN + 1, RecordType::Conventional, 0, 1);
        write_header(&mut page, INFIMUM_ORIGIN + 2, RecordType::Conventional, 0, 1);
        write_header(&mut page, INFIMUM_ORIGIN + 3, RecordType::Conventional, 0, 1);

        let walker = RecordWalker::new(&page, 3, false);
        let results: Vec<_> = walker.collect();
        assert!(results.iter().any(|r| r.is_err()));
        assert!(matches!(
            results.last().unwrap().as_ref().unwrap_err().kind,
            ErrorKind::WalkTooLong { max_steps: 3 }
        ));
    }
}
