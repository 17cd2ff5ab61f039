//! Big-endian byte primitives shared by the envelope, index-header and
//! record decoders. Every read is bounds-checked; nothing here panics.

use byteorder::{BigEndian, ByteOrder};

use super::{ErrorKind, IbdError};

fn check(buf: &[u8], offset: usize, width: usize) -> Result<(), IbdError> {
    if offset.checked_add(width).map(|end| end > buf.len()).unwrap_or(true) {
        return Err(IbdError::new(ErrorKind::OutOfBounds {
            offset,
            len: buf.len(),
        }));
    }
    Ok(())
}

pub fn read_u16_be(buf: &[u8], offset: usize) -> Result<u16, IbdError> {
    check(buf, offset, 2)?;
    Ok(BigEndian::read_u16(&buf[offset..offset + 2]))
}

pub fn read_u32_be(buf: &[u8], offset: usize) -> Result<u32, IbdError> {
    check(buf, offset, 4)?;
    Ok(BigEndian::read_u32(&buf[offset..offset + 4]))
}

pub fn read_u64_be(buf: &[u8], offset: usize) -> Result<u64, IbdError> {
    check(buf, offset, 8)?;
    Ok(BigEndian::read_u64(&buf[offset..offset + 8]))
}

/// Reads `width` bytes (1..=8) as a big-endian unsigned integer, for the
/// odd widths (3, 5, 6, 7) InnoDB's packed columns use that `byteorder`
/// has no named helper for.
pub fn read_uint_be(buf: &[u8], offset: usize, width: usize) -> Result<u64, IbdError> {
    debug_assert!(width >= 1 && width <= 8);
    check(buf, offset, width)?;
    Ok(BigEndian::read_uint(&buf[offset..offset + width], width))
}
