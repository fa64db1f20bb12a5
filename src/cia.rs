use crate::crypto::{CbcReader, Keyset, content_iv};
use crate::error::{ContainerError, ContainerResult};
use crate::models::ticket::Ticket;
use crate::models::title_metadata::{ContentChunkRecord, TitleMetadata};
use crate::stream::{ReadSeek, SubView};
use crate::util::align_64;
use binrw::{BinRead, BinWrite};
use log::debug;
use std::io::{Read, Seek, SeekFrom};

pub const CIA_HEADER_SIZE: u32 = 0x2020;

/// The fixed-size CIA header. All scalars are little-endian; the content
/// index is a bitmap of the content indices present in the file.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct CiaHeader {
    pub header_size: u32,
    pub cia_type: u16,
    pub version: u16,
    pub cert_chain_size: u32,
    pub ticket_size: u32,
    pub tmd_size: u32,
    pub meta_size: u32,
    pub content_size: u64,
    #[br(count = 0x2000)]
    pub content_index: Vec<u8>,
}

impl CiaHeader {
    /// Reads and sanity-checks the header at the start of `rs`.
    pub fn read_validated(rs: &mut impl ReadSeek) -> ContainerResult<Self> {
        rs.seek(SeekFrom::Start(0))?;
        let header = Self::read_le(rs)?;
        if header.header_size != CIA_HEADER_SIZE {
            return Err(ContainerError::Corrupt("unexpected CIA header size"));
        }

        Ok(header)
    }

    /// Tests whether the content bitmap has `index` set.
    pub fn has_content(&self, index: u16) -> bool {
        let byte = index as usize / 8;
        let bit = 7 - (index % 8);
        self.content_index[byte] & (1 << bit) != 0
    }

    /// Sets `index` in the content bitmap.
    pub fn set_content(&mut self, index: u16) {
        let byte = index as usize / 8;
        let bit = 7 - (index % 8);
        self.content_index[byte] |= 1 << bit;
    }

    /// All content indices present in the bitmap, ascending. Within a byte
    /// the most significant bit is the lowest index.
    pub fn content_indices(&self) -> impl Iterator<Item = u16> + '_ {
        self.content_index
            .iter()
            .enumerate()
            .flat_map(|(byte, &bits)| {
                (0u16..8).filter_map(move |bit| {
                    if bits & (0x80 >> bit) != 0 {
                        Some(byte as u16 * 8 + bit)
                    } else {
                        None
                    }
                })
            })
    }

    /// Sections follow the header in a fixed order, each aligned to 64
    /// bytes: certificate chain, ticket, TMD, content, meta.
    pub fn cert_chain_offset(&self) -> u64 {
        align_64(self.header_size as u64)
    }

    pub fn ticket_offset(&self) -> u64 {
        self.cert_chain_offset() + align_64(self.cert_chain_size as u64)
    }

    pub fn tmd_offset(&self) -> u64 {
        self.ticket_offset() + align_64(self.ticket_size as u64)
    }

    pub fn content_offset(&self) -> u64 {
        self.tmd_offset() + align_64(self.tmd_size as u64)
    }

    pub fn meta_offset(&self) -> u64 {
        self.content_offset() + align_64(self.content_size)
    }

    pub fn open_cert_chain<'a>(&self, rs: &'a mut dyn ReadSeek) -> SubView<'a> {
        SubView::new(rs, self.cert_chain_offset(), self.cert_chain_size as u64)
    }

    pub fn open_ticket<'a>(&self, rs: &'a mut dyn ReadSeek) -> SubView<'a> {
        SubView::new(rs, self.ticket_offset(), self.ticket_size as u64)
    }

    pub fn open_tmd<'a>(&self, rs: &'a mut dyn ReadSeek) -> SubView<'a> {
        SubView::new(rs, self.tmd_offset(), self.tmd_size as u64)
    }

    /// The meta section is optional.
    pub fn open_meta<'a>(&self, rs: &'a mut dyn ReadSeek) -> ContainerResult<SubView<'a>> {
        if self.meta_size == 0 {
            return Err(ContainerError::NotFound);
        }

        Ok(SubView::new(rs, self.meta_offset(), self.meta_size as u64))
    }
}

/// Reads contents out of a CIA, transparently decrypting them with the
/// title key recovered from the ticket.
///
/// The header and backing stream must outlive the reader.
pub struct CiaContentReader<'a> {
    rs: &'a mut dyn ReadSeek,
    cia: &'a CiaHeader,
    chunks: Vec<ContentChunkRecord>,
    title_key: [u8; 16],
}

impl<'a> CiaContentReader<'a> {
    pub fn new(
        cia: &'a CiaHeader,
        rs: &'a mut dyn ReadSeek,
        keyset: &Keyset,
    ) -> ContainerResult<Self> {
        let tmd = {
            let mut sv = cia.open_tmd(&mut *rs);
            TitleMetadata::read_validated(&mut sv)?
        };
        let ticket = {
            let mut sv = cia.open_ticket(&mut *rs);
            Ticket::read_validated(&mut sv)?
        };

        let title_key = ticket.decrypt_title_key(keyset)?;
        debug!(
            "opened content reader for title {:016X} with {} content(s)",
            ticket.data.title_id,
            tmd.content_chunk_records.len()
        );

        Ok(Self {
            rs,
            cia,
            chunks: tmd.content_chunk_records,
            title_key,
        })
    }

    pub fn chunks(&self) -> &[ContentChunkRecord] {
        &self.chunks
    }

    /// Opens the content with the given content index. Encrypted contents
    /// come back as a decrypting stream, plain contents as a bare subview.
    pub fn open_content(
        &mut self,
        index: u16,
    ) -> ContainerResult<(CiaContentStream<'_>, &ContentChunkRecord)> {
        let pos = self
            .chunks
            .iter()
            .position(|chunk| chunk.content_index == index)
            .ok_or(ContainerError::NotFound)?;

        let offset = self.cia.content_offset()
            + self.chunks[..pos]
                .iter()
                .map(|chunk| chunk.content_size)
                .sum::<u64>();
        let size = self.chunks[pos].content_size;
        let encrypted = self.chunks[pos].content_type.is_encrypted();
        let iv = content_iv(self.chunks[pos].content_index);

        let sv = SubView::new(&mut *self.rs, offset, size);
        let stream = if encrypted {
            CiaContentStream::Encrypted(CbcReader::new(sv, self.title_key, iv)?)
        } else {
            CiaContentStream::Plain(sv)
        };

        Ok((stream, &self.chunks[pos]))
    }
}

/// A content of a CIA, readable like any other stream regardless of whether
/// it is stored encrypted.
pub enum CiaContentStream<'a> {
    Encrypted(CbcReader<SubView<'a>>),
    Plain(SubView<'a>),
}

impl CiaContentStream<'_> {
    pub fn len(&self) -> u64 {
        match self {
            Self::Encrypted(inner) => inner.len(),
            Self::Plain(inner) => inner.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Read for CiaContentStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Encrypted(inner) => inner.read(buf),
            Self::Plain(inner) => inner.read(buf),
        }
    }
}

impl Seek for CiaContentStream<'_> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match self {
            Self::Encrypted(inner) => inner.seek(pos),
            Self::Plain(inner) => inner.seek(pos),
        }
    }
}
