pub mod index;
pub mod record;

use std::fmt::Debug;

use flate2::{Decompress, FlushDecompress};
use num_enum::TryFromPrimitive;
use tracing::{debug, warn};

use super::bytes::{read_u16_be, read_u32_be, read_u64_be};
use super::{ErrorKind, IbdError};

pub const FIL_PAGE_SIZE: usize = 16384;
const FIL_TRAILER_SIZE: usize = 8;
const FIL_HEADER_SIZE: usize = 38;

const INDEX_PAGE_TYPE: u16 = 0x45BF; // 17855

#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive, Default)]
#[repr(u16)]
pub enum PageType {
    #[default]
    Allocated = 0,
    UndoLog = 2,
    Inode = 3,
    IbufFreeList = 4,
    IbufBitmap = 5,
    Sys = 6,
    TrxSys = 7,
    FspHdr = 8,
    Xdes = 9,
    Blob = 10,
    Zblob = 11,
    Zblob2 = 12,
    Unknown = 13,
    Compressed = 14,
    Encrypted = 15,
    CompressedAndEncrypted = 16,
    EncryptedRtree = 17,
    SdiBlob = 18,
    SdiZblob = 19,
    LegacyDblwr = 20,
    RsegArray = 21,
    LobIndex = 22,
    LobData = 23,
    LobFirst = 24,
    ZlobFirst = 25,
    ZlobData = 26,
    ZlobIndex = 27,
    ZlobFrag = 28,
    ZlobFragEntry = 29,
    SDI = 17853,
    RTree = 17854,
    Index = INDEX_PAGE_TYPE,
}

#[derive(Default, Debug, Clone, PartialEq)]
pub struct FilHeader {
    pub checksum: u32,
    pub page_no: u32,
    /// `None` when the raw field is `0xFFFF_FFFF` ("no neighbor").
    pub prev: Option<u32>,
    pub next: Option<u32>,
    pub last_mod_lsn: u64,
    pub page_type: PageType,
    pub flush_lsn: u64,
    pub space_id: u32,
}

fn present(raw: u32) -> Option<u32> {
    if raw == 0xFFFF_FFFF {
        None
    } else {
        Some(raw)
    }
}

impl FilHeader {
    pub fn from_bytes(buf: &[u8]) -> Result<FilHeader, IbdError> {
        let checksum = read_u32_be(buf, 0)?;
        let page_no = read_u32_be(buf, 4)?;
        let prev = present(read_u32_be(buf, 8)?);
        let next = present(read_u32_be(buf, 12)?);
        let last_mod_lsn = read_u64_be(buf, 16)?;
        let page_type_raw = read_u16_be(buf, 24)?;
        let page_type = PageType::try_from_primitive(page_type_raw).unwrap_or_else(|_| {
            debug!("unrecognized FIL page type {:#06x}", page_type_raw);
            PageType::Unknown
        });
        let flush_lsn = read_u64_be(buf, 26)?;
        let space_id = read_u32_be(buf, 34)?;

        Ok(FilHeader {
            checksum,
            page_no,
            prev,
            next,
            last_mod_lsn,
            page_type,
            flush_lsn,
            space_id,
        })
    }
}

#[derive(Default, Debug, Clone, PartialEq)]
pub struct FilTrailer {
    pub old_checksum: u32,
    pub low32_lsn: u32,
}

impl FilTrailer {
    pub fn from_bytes(buf: &[u8]) -> Result<FilTrailer, IbdError> {
        Ok(FilTrailer {
            old_checksum: read_u32_be(buf, 0)?,
            low32_lsn: read_u32_be(buf, 4)?,
        })
    }
}

/// A validated, read-only 16 KiB logical page. Construction parses and
/// bounds-checks the FIL header/trailer; everything else is computed
/// lazily from `raw_data`.
#[derive(Clone, PartialEq)]
pub struct Page<'a> {
    pub header: FilHeader,
    pub trailer: FilTrailer,
    pub raw_data: &'a [u8],
}

impl<'a> Debug for Page<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("header", &self.header)
            .field("trailer", &self.trailer)
            .finish()
    }
}

impl<'a> Page<'a> {
    pub fn from_bytes(buf: &'a [u8]) -> Result<Page<'a>, IbdError> {
        if buf.len() != FIL_PAGE_SIZE {
            return Err(IbdError::new(ErrorKind::ShortPage { len: buf.len() }));
        }

        let header = FilHeader::from_bytes(&buf[0..FIL_HEADER_SIZE])?;
        let trailer = FilTrailer::from_bytes(&buf[(FIL_PAGE_SIZE - FIL_TRAILER_SIZE)..])?;

        Ok(Page {
            header,
            trailer,
            raw_data: buf,
        })
    }

    /// spec.md §4.2: low-32 LSN in the trailer must match the header's.
    pub fn validate_envelope(&self) -> Result<(), IbdError> {
        let header_low32 = self.header.last_mod_lsn as u32;
        if header_low32 != self.trailer.low32_lsn {
            return Err(IbdError::new(ErrorKind::LsnMismatch {
                header_low32,
                trailer_low32: self.trailer.low32_lsn,
            })
            .with_page(self.header.page_no));
        }
        Ok(())
    }

    pub fn body(&self) -> &[u8] {
        &self.raw_data[FIL_HEADER_SIZE..FIL_PAGE_SIZE - FIL_TRAILER_SIZE]
    }

    pub fn is_index(&self) -> bool {
        self.header.page_type == PageType::Index
    }
}

/// `ssize` per spec.md §4.7 / §9: `physical == 1 << (10 + ssize)`.
fn ssize_for(physical_len: usize) -> Result<u8, IbdError> {
    match physical_len {
        1024 => Ok(0),
        2048 => Ok(1),
        4096 => Ok(2),
        8192 => Ok(3),
        16384 => Ok(4),
        other => Err(IbdError::new(ErrorKind::InvalidPhysicalSize(other))),
    }
}

/// The compressed-page shim (spec.md §4.7). Given a physical buffer of
/// 1/2/4/8/16 KiB, returns an owned 16 KiB logical buffer. The core never
/// introspects the decompression algorithm itself: this function is the
/// single, narrow boundary through which that foreign concern is
/// reached, per the "Compressed-page shim" design note.
pub fn decompress_page(physical: &[u8]) -> Result<Box<[u8; FIL_PAGE_SIZE]>, IbdError> {
    let _ssize = ssize_for(physical.len())?;

    if physical.len() == FIL_PAGE_SIZE {
        let mut out = Box::new([0u8; FIL_PAGE_SIZE]);
        out.copy_from_slice(physical);
        return Ok(out);
    }

    let page_type_raw = read_u16_be(physical, 24)?;
    let mut out = Box::new([0u8; FIL_PAGE_SIZE]);

    if page_type_raw != INDEX_PAGE_TYPE {
        out[..physical.len()].copy_from_slice(physical);
        return Ok(out);
    }

    // The FIL header is kept uncompressed ahead of the compressed body
    // (which is how its page-type field above could be read without
    // decompressing first); only the body is the zlib stream.
    out[..FIL_HEADER_SIZE].copy_from_slice(&physical[..FIL_HEADER_SIZE]);

    // InnoDB page compression is zlib-wrapped deflate (RFC1950), not raw
    // deflate: the zlib header must be consumed, not treated as payload.
    let mut decompressor = Decompress::new(true);
    match decompressor.decompress(
        &physical[FIL_HEADER_SIZE..],
        &mut out[FIL_HEADER_SIZE..],
        FlushDecompress::Finish,
    ) {
        Ok(_) => Ok(out),
        Err(e) => {
            warn!("block decompression failed: {e}");
            Err(IbdError::new(ErrorKind::DecompressionFailed))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fil_header_bytes(lsn: u64, page_type: u16) -> [u8; FIL_HEADER_SIZE] {
        let mut buf = [0u8; FIL_HEADER_SIZE];
        buf[8..12].copy_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
        buf[12..16].copy_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
        buf[16..24].copy_from_slice(&lsn.to_be_bytes());
        buf[24..26].copy_from_slice(&page_type.to_be_bytes());
        buf
    }

    fn make_page(lsn: u64, trailer_low32: u32, page_type: u16) -> Vec<u8> {
        let mut page = vec![0u8; FIL_PAGE_SIZE];
        page[0..FIL_HEADER_SIZE].copy_from_slice(&fil_header_bytes(lsn, page_type));
        page[FIL_PAGE_SIZE - FIL_TRAILER_SIZE..FIL_PAGE_SIZE - FIL_TRAILER_SIZE + 4]
            .copy_from_slice(&0u32.to_be_bytes());
        page[FIL_PAGE_SIZE - 4..].copy_from_slice(&trailer_low32.to_be_bytes());
        page
    }

    #[test]
    fn prev_next_ffffffff_is_absent() {
        let buf = make_page(1, 1, 0);
        let header = FilHeader::from_bytes(&buf[0..FIL_HEADER_SIZE]).unwrap();
        assert_eq!(header.prev, None);
        assert_eq!(header.next, None);
    }

    #[test]
    fn lsn_mismatch_is_rejected() {
        // S1: last_mod_lsn low32 = 0xDEADBEEF, trailer low32 = 0xDEADBEEE.
        let buf = make_page(0x0000_0001_DEAD_BEEF, 0xDEAD_BEEE, 0);
        let page = Page::from_bytes(&buf).unwrap();
        let err = page.validate_envelope().unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::LsnMismatch {
                header_low32: 0xDEAD_BEEF,
                trailer_low32: 0xDEAD_BEEE
            }
        );
    }

    #[test]
    fn lsn_match_validates() {
        let buf = make_page(0x0000_0001_DEAD_BEEF, 0xDEAD_BEEF, 0);
        let page = Page::from_bytes(&buf).unwrap();
        assert!(page.validate_envelope().is_ok());
    }

    #[test]
    fn short_page_is_rejected() {
        let buf = vec![0u8; 100];
        assert!(matches!(
            Page::from_bytes(&buf).unwrap_err().kind,
            ErrorKind::ShortPage { len: 100 }
        ));
    }

    #[test]
    fn full_size_shim_is_identity() {
        let buf = make_page(1, 1, INDEX_PAGE_TYPE);
        let out = decompress_page(&buf).unwrap();
        assert_eq!(&out[..], &buf[..]);
    }

    #[test]
    fn non_index_small_physical_page_copies_through() {
        let mut physical = vec![0u8; 8192];
        physical[24..26].copy_from_slice(&(PageType::Inode as u16).to_be_bytes());
        physical[100] = 0xAB;
        let out = decompress_page(&physical).unwrap();
        assert_eq!(&out[..8192], &physical[..]);
        assert!(out[8192..].iter().all(|&b| b == 0));
    }

    #[test]
    fn invalid_physical_size_is_rejected() {
        let buf = vec![0u8; 3000];
        assert!(matches!(
            decompress_page(&buf).unwrap_err().kind,
            ErrorKind::InvalidPhysicalSize(3000)
        ));
    }

    #[test]
    fn zlib_compressed_index_page_decompresses_to_the_logical_page() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        // A logical page whose body (everything past the FIL header) is
        // recognizable after decompression.
        let mut logical = make_page(1, 1, INDEX_PAGE_TYPE);
        logical[100..110].copy_from_slice(b"helloworld");

        // Only the body is compressed; the FIL header travels
        // uncompressed ahead of it, which is how its page-type field can
        // be read (at physical offset 24) without inflating first.
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&logical[FIL_HEADER_SIZE..]).unwrap();
        let zlib_compressed = encoder.finish().unwrap();
        assert!(
            zlib_compressed.len() <= 8192 - FIL_HEADER_SIZE,
            "fixture compressed too large for the test"
        );

        let mut physical = vec![0u8; 8192];
        physical[..FIL_HEADER_SIZE].copy_from_slice(&logical[..FIL_HEADER_SIZE]);
        physical[FIL_HEADER_SIZE..FIL_HEADER_SIZE + zlib_compressed.len()]
            .copy_from_slice(&zlib_compressed);

        let out = decompress_page(&physical).unwrap();
        assert_eq!(&out[100..110], b"helloworld");
        assert_eq!(&out[24..26], &INDEX_PAGE_TYPE.to_be_bytes());
    }
}
