use crate::crypto::{Keyset, cbc_decrypt, title_key_iv};
use crate::error::{ContainerError, ContainerResult};
use crate::models::peek_u32_be;
use crate::models::signature::{Signature, SignatureType};
use crate::stream::ReadSeek;
use binrw::{BinRead, BinWrite};

/// A ticket stores the title key, encrypted with 128-bit AES-CBC under one
/// of the common keys. This is the v1 layout.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct Ticket {
    /// The signature hash is calculated over the ticket data.
    pub signature: Signature,

    pub data: TicketData,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct TicketData {
    /// ECC PublicKey
    #[br(count = 0x3C)]
    pub ecc_public_key: Vec<u8>,

    /// Version (always 1 for this ticket format)
    pub version: u8,

    /// CaCrlVersion
    pub ca_crl_version: u8,

    /// SignerCrlVersion
    pub signer_crl_version: u8,

    /// TitleKey, encrypted using one of the common keys
    #[br(count = 0x10)]
    pub title_key: Vec<u8>,

    /// Reserved
    pub reserved1: u8,

    /// TicketID
    pub ticket_id: u64,

    /// ConsoleID
    pub console_id: u32,

    /// TitleID
    pub title_id: u64,

    /// Reserved
    pub reserved2: u16,

    /// Ticket title version
    pub ticket_title_version: u16,

    /// Reserved
    pub reserved3: u64,

    /// License Type
    pub license_type: u8,

    /// Index of the common key used to encrypt the title key, usually 1 for
    /// retail system titles
    pub common_key_index: u8,

    /// Reserved
    #[br(count = 0x2A)]
    pub reserved4: Vec<u8>,

    /// eShop Account ID?
    pub eshop_account_id: u32,

    /// Reserved
    pub reserved5: u8,

    /// Audit
    pub audit: u8,

    /// Reserved
    #[br(count = 0x42)]
    pub reserved6: Vec<u8>,

    /// Limits
    #[br(count = 0x40)]
    pub limits: Vec<u8>,

    /// Content Index
    pub content_index: TicketContentIndex,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct TicketContentIndex {
    pub header_word: u32,

    /// Total size of this block, including the leading words
    pub total_size: u32,

    #[br(count = total_size.saturating_sub(8) as usize)]
    pub data: Vec<u8>,
}

impl Ticket {
    /// Reads a ticket, rejecting unknown signature type words up front.
    pub fn read_validated(rs: &mut impl ReadSeek) -> ContainerResult<Self> {
        let tag = peek_u32_be(rs)?;
        if SignatureType::from_tag(tag).is_none() {
            return Err(ContainerError::InvalidSignature);
        }

        Ok(Self::read(rs)?)
    }

    /// Decrypts the title key under the common key selected by the ticket,
    /// with the big-endian title ID as IV.
    pub fn decrypt_title_key(&self, keyset: &Keyset) -> ContainerResult<[u8; 16]> {
        let common_key = keyset.common_key(self.data.common_key_index)?;
        let iv = title_key_iv(self.data.title_id);

        let mut title_key = [0u8; 16];
        title_key.copy_from_slice(&self.data.title_key);
        cbc_decrypt(common_key, &iv, &mut title_key)?;

        Ok(title_key)
    }
}
