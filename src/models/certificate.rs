use crate::error::{ContainerError, ContainerResult};
use crate::models::peek_u32_be;
use crate::models::signature::{Signature, SignatureType};
use crate::stream::ReadSeek;
use binrw::{BinRead, BinWrite};
use std::io::SeekFrom;

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u32)]
pub enum KeyType {
    /// 4096-bit RSA public key (modulus and public exponent).
    Rsa4096 = 0x0,
    /// 2048-bit RSA public key (modulus and public exponent).
    Rsa2048 = 0x1,
    /// ECC public key.
    EllipticCurve = 0x2,
}

/// A certificate carries the public key used to verify signatures issued
/// under its name. Certificates are themselves signed, chaining up to the
/// Root key burned into firmware.
#[derive(Debug, Clone, BinRead, BinWrite)]
pub struct Certificate {
    pub signature: Signature,

    #[brw(big)]
    pub key_type: KeyType,

    /// Name, null-padded.
    #[br(count = 0x40)]
    pub name: Vec<u8>,

    /// Expiration time as a UNIX timestamp. Little-endian, unlike the
    /// surrounding fields.
    #[brw(little)]
    pub expiration_time: u32,

    #[br(args(key_type))]
    pub public_key: PublicKey,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[br(import(key_type: KeyType))]
pub enum PublicKey {
    #[br(pre_assert(key_type == KeyType::Rsa4096))]
    Rsa4096 {
        #[br(count = 0x200)]
        modulus: Vec<u8>,
        #[brw(big)]
        public_exponent: u32,
        #[br(count = 0x34)]
        padding: Vec<u8>,
    },
    #[br(pre_assert(key_type == KeyType::Rsa2048))]
    Rsa2048 {
        #[br(count = 0x100)]
        modulus: Vec<u8>,
        #[brw(big)]
        public_exponent: u32,
        #[br(count = 0x34)]
        padding: Vec<u8>,
    },
    #[br(pre_assert(key_type == KeyType::EllipticCurve))]
    EllipticCurve {
        #[br(count = 0x3C)]
        public_key: Vec<u8>,
        #[br(count = 0x3C)]
        padding: Vec<u8>,
    },
}

impl Certificate {
    /// Reads a certificate, validating the signature type word and the key
    /// type field before committing to the full parse.
    pub fn read_validated(rs: &mut impl ReadSeek) -> ContainerResult<Self> {
        let tag = peek_u32_be(rs)?;
        let sig_type = SignatureType::from_tag(tag).ok_or(ContainerError::InvalidSignature)?;

        // the key type sits right after the signature block and the issuer
        let key_type_off = (sig_type.block_size() + 0x40) as i64;
        rs.seek(SeekFrom::Current(key_type_off))?;
        let key_tag = peek_u32_be(rs)?;
        rs.seek(SeekFrom::Current(-key_type_off))?;
        if key_tag > 2 {
            return Err(ContainerError::InvalidCertificate);
        }

        Ok(Self::read_be(rs)?)
    }

    pub fn name_str(&self) -> String {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }
}
