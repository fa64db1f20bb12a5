use crate::error::ContainerResult;
use crate::stream::{ReadSeek, read_exact_into};
use std::io::SeekFrom;

pub mod certificate;
pub mod signature;
pub mod ticket;
pub mod title_metadata;

/// Reads the next big-endian u32 without consuming it.
pub(crate) fn peek_u32_be(rs: &mut impl ReadSeek) -> ContainerResult<u32> {
    let mut buf = [0u8; 4];
    read_exact_into(rs, &mut buf)?;
    rs.seek(SeekFrom::Current(-4))?;
    Ok(u32::from_be_bytes(buf))
}
