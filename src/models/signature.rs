use crate::error::{ContainerError, ContainerResult};
use crate::models::peek_u32_be;
use crate::stream::ReadSeek;
use binrw::{BinRead, BinWrite};

/// The signature method is determined by the leading signature type word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u32)]
pub enum SignatureType {
    /// RSA_4096 SHA1 (unused on this platform)
    Rsa4096Sha1 = 0x010000,

    /// RSA_2048 SHA1 (unused on this platform)
    Rsa2048Sha1 = 0x010001,

    /// Elliptic Curve with SHA1 (unused on this platform)
    EllipticCurveSha1 = 0x010002,

    /// RSA_4096 SHA256
    Rsa4096Sha256 = 0x010003,

    /// RSA_2048 SHA256
    Rsa2048Sha256 = 0x010004,

    /// ECDSA with SHA256
    EcdsaSha256 = 0x010005,
}

impl SignatureType {
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0x010000 => Some(Self::Rsa4096Sha1),
            0x010001 => Some(Self::Rsa2048Sha1),
            0x010002 => Some(Self::EllipticCurveSha1),
            0x010003 => Some(Self::Rsa4096Sha256),
            0x010004 => Some(Self::Rsa2048Sha256),
            0x010005 => Some(Self::EcdsaSha256),
            _ => None,
        }
    }

    pub fn signature_size(&self) -> usize {
        match self {
            Self::Rsa4096Sha1 | Self::Rsa4096Sha256 => 0x200,
            Self::Rsa2048Sha1 | Self::Rsa2048Sha256 => 0x100,
            Self::EllipticCurveSha1 | Self::EcdsaSha256 => 0x3C,
        }
    }

    pub fn padding_size(&self) -> usize {
        // RSA signatures carry 0x3C padding, ECC signatures 0x40
        match self {
            Self::Rsa4096Sha1 | Self::Rsa4096Sha256 => 0x3C,
            Self::Rsa2048Sha1 | Self::Rsa2048Sha256 => 0x3C,
            Self::EllipticCurveSha1 | Self::EcdsaSha256 => 0x40,
        }
    }

    /// Size of the whole signature block: tag, signature data and padding.
    pub fn block_size(&self) -> usize {
        4 + self.signature_size() + self.padding_size()
    }

    pub fn is_sha256(&self) -> bool {
        matches!(
            self,
            Self::Rsa4096Sha256 | Self::Rsa2048Sha256 | Self::EcdsaSha256
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Rsa4096Sha1 => "RSA 4096 - SHA1",
            Self::Rsa2048Sha1 => "RSA 2048 - SHA1",
            Self::EllipticCurveSha1 => "Elliptic Curve - SHA1",
            Self::Rsa4096Sha256 => "RSA 4096 - SHA256",
            Self::Rsa2048Sha256 => "RSA 2048 - SHA256",
            Self::EcdsaSha256 => "Elliptic Curve - SHA256",
        }
    }
}

/// A signature block followed by the 64-byte issuer that names the
/// certificate chain entry able to verify it.
#[derive(Debug, Clone, BinRead, BinWrite)]
pub struct Signature {
    #[brw(big)]
    pub signature_type: SignatureType,

    #[br(count = signature_type.signature_size())]
    pub signature: Vec<u8>,

    #[br(count = signature_type.padding_size())]
    pub padding: Vec<u8>,

    /// Issuer, null-padded.
    #[br(count = 0x40)]
    pub issuer: Vec<u8>,
}

impl Signature {
    /// Reads a signature, rejecting unknown signature type words up front.
    pub fn read_validated(rs: &mut impl ReadSeek) -> ContainerResult<Self> {
        let tag = peek_u32_be(rs)?;
        if SignatureType::from_tag(tag).is_none() {
            return Err(ContainerError::InvalidSignature);
        }

        Ok(Self::read_be(rs)?)
    }

    pub fn issuer_str(&self) -> String {
        let end = self
            .issuer
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.issuer.len());
        String::from_utf8_lossy(&self.issuer[..end]).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample(sig_type: SignatureType, issuer: &[u8]) -> Signature {
        let mut issuer_buf = issuer.to_vec();
        issuer_buf.resize(0x40, 0);
        Signature {
            signature_type: sig_type,
            signature: vec![0xAA; sig_type.signature_size()],
            padding: vec![0x00; sig_type.padding_size()],
            issuer: issuer_buf,
        }
    }

    #[test]
    fn signature_sizes() {
        assert_eq!(SignatureType::Rsa4096Sha256.signature_size(), 0x200);
        assert_eq!(SignatureType::Rsa2048Sha256.signature_size(), 0x100);
        assert_eq!(SignatureType::EcdsaSha256.signature_size(), 0x3C);
        assert_eq!(SignatureType::Rsa2048Sha256.block_size(), 4 + 0x100 + 0x3C);
        assert_eq!(SignatureType::EcdsaSha256.block_size(), 4 + 0x3C + 0x40);
    }

    #[test]
    fn round_trips_every_algorithm() {
        for sig_type in [
            SignatureType::Rsa4096Sha1,
            SignatureType::Rsa2048Sha1,
            SignatureType::EllipticCurveSha1,
            SignatureType::Rsa4096Sha256,
            SignatureType::Rsa2048Sha256,
            SignatureType::EcdsaSha256,
        ] {
            let sig = sample(sig_type, b"Root-CA00000003");

            let mut buf = Vec::new();
            sig.write_be(&mut Cursor::new(&mut buf)).unwrap();
            assert_eq!(buf.len(), sig_type.block_size() + 0x40);

            let read = Signature::read_validated(&mut Cursor::new(&buf)).unwrap();
            assert_eq!(read.signature_type, sig_type);
            assert_eq!(read.signature, sig.signature);
            assert_eq!(read.issuer_str(), "Root-CA00000003");
        }
    }

    #[test]
    fn rejects_unknown_tag() {
        let sig = sample(SignatureType::Rsa2048Sha256, b"Root");
        let mut buf = Vec::new();
        sig.write_be(&mut Cursor::new(&mut buf)).unwrap();
        buf[3] = 0x06;

        match Signature::read_validated(&mut Cursor::new(&buf)) {
            Err(ContainerError::InvalidSignature) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn descriptions_name_the_algorithm() {
        assert_eq!(
            SignatureType::Rsa2048Sha256.description(),
            "RSA 2048 - SHA256"
        );
        assert_eq!(
            SignatureType::EllipticCurveSha1.description(),
            "Elliptic Curve - SHA1"
        );
    }
}
