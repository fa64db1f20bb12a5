use crate::error::{ContainerError, ContainerResult};
use crate::models::peek_u32_be;
use crate::models::signature::{Signature, SignatureType};
use crate::stream::ReadSeek;
use binrw::{BinRead, BinWrite};

/// Title metadata describes a title and all of its installed contents,
/// including which contents it consists of and their SHA-256 hashes.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct TitleMetadata {
    /// The signature hash is calculated over the header.
    pub signature: Signature,

    pub header: TitleMetadataHeader,

    /// There are always 64 of these records, usually only the first is used.
    #[br(count = 64)]
    pub content_info_records: Vec<ContentInfoRecord>,

    /// One record per content, as counted by the header.
    #[br(count = header.content_count)]
    pub content_chunk_records: Vec<ContentChunkRecord>,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct TitleMetadataHeader {
    /// Version
    pub version: u8,

    /// CaCrlVersion
    pub ca_crl_version: u8,

    /// SignerCrlVersion
    pub signer_crl_version: u8,

    /// Reserved
    pub reserved1: u8,

    /// System Version
    pub system_version: u64,

    /// Title ID
    pub title_id: u64,

    /// Title Type
    pub title_type: u32,

    /// Group ID
    pub group_id: u16,

    /// Save Data Size in bytes, little-endian
    #[brw(little)]
    pub save_data_size: u32,

    /// SRL Private Save Data Size in bytes, little-endian
    #[brw(little)]
    pub srl_private_save_data_size: u32,

    /// Reserved
    pub reserved2: u32,

    /// SRL Flag
    pub srl_flag: u8,

    /// Reserved
    #[br(count = 0x31)]
    pub reserved3: Vec<u8>,

    /// Access Rights
    pub access_rights: u32,

    /// Title Version
    pub title_version: u16,

    /// Content Count
    pub content_count: u16,

    /// Boot Content
    pub boot_content: u16,

    /// Padding
    pub padding: u16,

    /// SHA-256 hash over the content info records
    #[br(count = 0x20)]
    pub content_info_records_hash: Vec<u8>,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct ContentInfoRecord {
    /// Content index offset
    pub content_index_offset: u16,

    /// Number of chunk records this record hashes
    pub content_command_count: u16,

    /// SHA-256 hash of those chunk records
    #[br(count = 0x20)]
    pub hash: Vec<u8>,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct ContentChunkRecord {
    /// Content id
    pub content_id: u32,

    /// Content index
    pub content_index: u16,

    /// Content type
    pub content_type: ContentType,

    /// Content size
    pub content_size: u64,

    /// SHA-256 hash
    #[br(count = 0x20)]
    pub hash: Vec<u8>,
}

/// Flags for a content chunk.
#[derive(Debug, Clone, Copy, BinRead, BinWrite)]
#[brw(big)]
pub struct ContentType(pub u16);

impl ContentType {
    pub const ENCRYPTED: u16 = 0x0001;
    pub const DISC: u16 = 0x0002;
    pub const CFM: u16 = 0x0004;
    pub const OPTIONAL: u16 = 0x4000;
    pub const SHARED: u16 = 0x8000;

    pub fn is_encrypted(&self) -> bool {
        self.0 & Self::ENCRYPTED != 0
    }

    pub fn is_disc(&self) -> bool {
        self.0 & Self::DISC != 0
    }

    pub fn is_optional(&self) -> bool {
        self.0 & Self::OPTIONAL != 0
    }

    pub fn is_shared(&self) -> bool {
        self.0 & Self::SHARED != 0
    }

    pub fn set_encrypted(&mut self, encrypted: bool) {
        if encrypted {
            self.0 |= Self::ENCRYPTED;
        } else {
            self.0 &= !Self::ENCRYPTED;
        }
    }
}

impl TitleMetadata {
    /// Reads a TMD, rejecting unknown signature type words up front.
    pub fn read_validated(rs: &mut impl ReadSeek) -> ContainerResult<Self> {
        let tag = peek_u32_be(rs)?;
        if SignatureType::from_tag(tag).is_none() {
            return Err(ContainerError::InvalidSignature);
        }

        Ok(Self::read(rs)?)
    }

    /// Looks up the chunk record for a content index.
    pub fn chunk_record(&self, content_index: u16) -> Option<&ContentChunkRecord> {
        self.content_chunk_records
            .iter()
            .find(|chunk| chunk.content_index == content_index)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    pub(crate) fn sample_tmd(chunks: Vec<ContentChunkRecord>) -> TitleMetadata {
        let mut issuer = b"Root-CA00000003-CP0000000b".to_vec();
        issuer.resize(0x40, 0);
        TitleMetadata {
            signature: Signature {
                signature_type: SignatureType::Rsa2048Sha256,
                signature: vec![0xCC; 0x100],
                padding: vec![0x00; 0x3C],
                issuer,
            },
            header: TitleMetadataHeader {
                version: 1,
                ca_crl_version: 0,
                signer_crl_version: 0,
                reserved1: 0,
                system_version: 0,
                title_id: 0x0004000000030000,
                title_type: 0x00040010,
                group_id: 0,
                save_data_size: 0x00080000,
                srl_private_save_data_size: 0,
                reserved2: 0,
                srl_flag: 0,
                reserved3: vec![0x00; 0x31],
                access_rights: 0,
                title_version: 0x0100,
                content_count: chunks.len() as u16,
                boot_content: 0,
                padding: 0,
                content_info_records_hash: vec![0x00; 0x20],
            },
            content_info_records: vec![
                ContentInfoRecord {
                    content_index_offset: 0,
                    content_command_count: chunks.len() as u16,
                    hash: vec![0x00; 0x20],
                };
                64
            ],
            content_chunk_records: chunks,
        }
    }

    #[test]
    fn content_type_flags() {
        let mut ty = ContentType(0x0001);
        assert!(ty.is_encrypted());
        assert!(!ty.is_disc());
        assert!(!ty.is_optional());
        assert!(!ty.is_shared());

        ty.set_encrypted(false);
        assert_eq!(ty.0, 0);

        let ty = ContentType(ContentType::SHARED | ContentType::OPTIONAL);
        assert!(ty.is_shared());
        assert!(ty.is_optional());
    }

    #[test]
    fn tmd_round_trips() {
        let tmd = sample_tmd(vec![
            ContentChunkRecord {
                content_id: 0,
                content_index: 0,
                content_type: ContentType(0x0001),
                content_size: 0x00400000,
                hash: vec![0xAB; 0x20],
            },
            ContentChunkRecord {
                content_id: 1,
                content_index: 1,
                content_type: ContentType(0x0000),
                content_size: 0x00080000,
                hash: vec![0xCD; 0x20],
            },
        ]);

        let mut buf = Vec::new();
        tmd.write(&mut Cursor::new(&mut buf)).unwrap();

        let read = TitleMetadata::read_validated(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(read.header.content_count, 2);
        assert_eq!(read.content_chunk_records.len(), 2);
        assert_eq!(read.content_info_records.len(), 64);
        assert_eq!(read.signature.issuer_str(), "Root-CA00000003-CP0000000b");
        assert!(read.content_chunk_records[0].content_type.is_encrypted());
        assert!(!read.content_chunk_records[1].content_type.is_encrypted());
    }

    #[test]
    fn chunk_record_lookup_is_by_content_index() {
        let tmd = sample_tmd(vec![ContentChunkRecord {
            content_id: 0xDEAD,
            content_index: 3,
            content_type: ContentType(0),
            content_size: 16,
            hash: vec![0x00; 0x20],
        }]);

        assert_eq!(tmd.chunk_record(3).unwrap().content_id, 0xDEAD);
        assert!(tmd.chunk_record(0).is_none());
    }
}
