use crate::error::{ContainerError, ContainerResult};
use std::io::{ErrorKind, Read, Seek, SeekFrom};

/// The capability set every parser in this crate consumes.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// A read-only window over a byte range of a parent stream.
///
/// All offsets handed to [`Seek`] are relative to the window; seeks clamp to
/// the window length and reads past the end come back short.
pub struct SubView<'a> {
    parent: &'a mut dyn ReadSeek,
    base: u64,
    length: u64,
    pos: u64,
}

impl<'a> SubView<'a> {
    pub fn new(parent: &'a mut dyn ReadSeek, base: u64, length: u64) -> Self {
        Self {
            parent,
            base,
            length,
            pos: 0,
        }
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl Read for SubView<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.length.saturating_sub(self.pos);
        if remaining == 0 {
            return Ok(0);
        }

        let n = buf.len().min(remaining as usize);
        self.parent.seek(SeekFrom::Start(self.base + self.pos))?;
        let read = self.parent.read(&mut buf[..n])?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl Seek for SubView<'_> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => self.length as i64 + delta,
        };

        self.pos = target.clamp(0, self.length as i64) as u64;
        Ok(self.pos)
    }
}

/// Reads exactly `buf.len()` bytes from the current position.
pub fn read_exact_into(rs: &mut impl Read, buf: &mut [u8]) -> ContainerResult<()> {
    rs.read_exact(buf).map_err(|err| {
        if err.kind() == ErrorKind::UnexpectedEof {
            ContainerError::TooSmall(buf.len())
        } else {
            err.into()
        }
    })
}

/// Seeks to `offset` and reads exactly `buf.len()` bytes.
pub fn read_exact_at(
    rs: &mut (impl Read + Seek),
    offset: u64,
    buf: &mut [u8],
) -> ContainerResult<()> {
    rs.seek(SeekFrom::Start(offset))?;
    read_exact_into(rs, buf)
}

/// Total length of a stream, restoring the current position afterwards.
pub fn stream_len(rs: &mut impl Seek) -> std::io::Result<u64> {
    let pos = rs.stream_position()?;
    let len = rs.seek(SeekFrom::End(0))?;
    rs.seek(SeekFrom::Start(pos))?;
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn subview_translates_offsets() {
        let mut parent = Cursor::new((0u8..32).collect::<Vec<u8>>());
        let mut view = SubView::new(&mut parent, 8, 16);

        assert_eq!(view.len(), 16);

        let mut buf = [0u8; 4];
        view.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [8, 9, 10, 11]);
        assert_eq!(view.stream_position().unwrap(), 4);

        view.seek(SeekFrom::Start(12)).unwrap();
        view.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [20, 21, 22, 23]);
    }

    #[test]
    fn subview_reads_past_end_come_back_short() {
        let mut parent = Cursor::new(vec![0xAAu8; 32]);
        let mut view = SubView::new(&mut parent, 0, 10);

        view.seek(SeekFrom::Start(8)).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(view.read(&mut buf).unwrap(), 2);
        assert_eq!(view.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn subview_seek_clamps_to_length() {
        let mut parent = Cursor::new(vec![0u8; 32]);
        let mut view = SubView::new(&mut parent, 0, 10);

        assert_eq!(view.seek(SeekFrom::Start(100)).unwrap(), 10);
        assert_eq!(view.seek(SeekFrom::Current(-25)).unwrap(), 0);
        assert_eq!(view.seek(SeekFrom::End(-3)).unwrap(), 7);
    }

    #[test]
    fn read_exact_into_reports_too_small() {
        let mut rs = Cursor::new(vec![0u8; 3]);
        let mut buf = [0u8; 8];
        match read_exact_into(&mut rs, &mut buf) {
            Err(ContainerError::TooSmall(8)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn stream_len_restores_position() {
        let mut rs = Cursor::new(vec![0u8; 20]);
        rs.seek(SeekFrom::Start(5)).unwrap();
        assert_eq!(stream_len(&mut rs).unwrap(), 20);
        assert_eq!(rs.stream_position().unwrap(), 5);
    }
}
