use crate::constants::CERT_SUPPORT_FILES;
use crate::error::{ContainerError, ContainerResult};
use crate::models::certificate::{Certificate, PublicKey};
use crate::models::signature::{Signature, SignatureType};
use crate::stream::{ReadSeek, read_exact_into, stream_len};
use log::debug;
use rsa::{BigUint, Pkcs1v15Sign, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, SeekFrom};
use std::path::{Path, PathBuf};

/// An ordered collection of certificates, searched by name when a
/// signature's issuer has to be resolved.
#[derive(Debug, Clone, Default)]
pub struct CertificateChain {
    certs: Vec<Certificate>,
}

impl CertificateChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a stream consisting entirely of concatenated certificates.
    pub fn read(rs: &mut impl ReadSeek) -> ContainerResult<Self> {
        let mut chain = Self::new();
        chain.extend_from(rs)?;
        Ok(chain)
    }

    /// Parses certificates from the whole of `rs` and appends them to the
    /// chain. On error the chain rolls back to its previous length.
    pub fn extend_from(&mut self, rs: &mut impl ReadSeek) -> ContainerResult<()> {
        let original_len = self.certs.len();
        let size = stream_len(rs)?;
        rs.seek(SeekFrom::Start(0))?;

        let result: ContainerResult<()> = (|| {
            while rs.stream_position()? < size {
                self.certs.push(Certificate::read_validated(rs)?);
            }
            Ok(())
        })();

        if result.is_err() {
            self.certs.truncate(original_len);
        }
        result
    }

    /// Replaces the chain with whatever can be loaded from the well-known
    /// support files in the platform data directory. Missing or unreadable
    /// files are skipped.
    pub fn scan(&mut self) {
        self.certs.clear();
        if let Some(dir) = support_dir() {
            self.scan_dir(&dir);
        }
    }

    /// Chain-extends from the well-known support files under `dir`.
    pub fn scan_dir(&mut self, dir: &Path) {
        for name in CERT_SUPPORT_FILES {
            let path = dir.join(name);
            let Ok(mut file) = File::open(&path) else {
                continue;
            };
            match self.extend_from(&mut file) {
                Ok(()) => debug!("loaded certificates from {}", path.display()),
                Err(err) => debug!("skipping {}: {err}", path.display()),
            }
        }
    }

    pub fn certs(&self) -> &[Certificate] {
        &self.certs
    }

    pub fn push(&mut self, cert: Certificate) {
        self.certs.push(cert);
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Resolves the certificate able to verify `sig`.
    ///
    /// Issuers are (usually) of the form `issuer-parent-name`; the search
    /// key is the part after the last `-`, or the whole issuer if there is
    /// none. The certificate's key must fit the signature algorithm, so an
    /// ECDSA certificate never resolves here.
    pub fn find_certificate(&self, sig: &Signature) -> ContainerResult<&Certificate> {
        let issuer = sig.issuer_str();
        let name = issuer.rsplit('-').next().unwrap_or(issuer.as_str());

        for cert in &self.certs {
            if cert.name_str() != name {
                continue;
            }
            let compatible = matches!(
                (&cert.public_key, sig.signature_type),
                (
                    PublicKey::Rsa2048 { .. },
                    SignatureType::Rsa2048Sha1 | SignatureType::Rsa2048Sha256
                ) | (
                    PublicKey::Rsa4096 { .. },
                    SignatureType::Rsa4096Sha1 | SignatureType::Rsa4096Sha256
                )
            );
            if compatible {
                return Ok(cert);
            }
        }

        Err(ContainerError::CertificateNotFound(name.to_owned()))
    }

    /// Verifies `hash` against `sig` with the public key of the chain
    /// certificate the signature's issuer resolves to.
    pub fn verify(&self, sig: &Signature, hash: &[u8]) -> ContainerResult<()> {
        let cert = self.find_certificate(sig)?;

        let (modulus, exponent) = match &cert.public_key {
            PublicKey::Rsa2048 {
                modulus,
                public_exponent,
                ..
            } => (modulus, *public_exponent),
            PublicKey::Rsa4096 {
                modulus,
                public_exponent,
                ..
            } => (modulus, *public_exponent),
            PublicKey::EllipticCurve { .. } => {
                return Err(ContainerError::CertificateNotFound(cert.name_str()));
            }
        };

        let key = RsaPublicKey::new(BigUint::from_bytes_be(modulus), BigUint::from(exponent))?;
        let scheme = if sig.signature_type.is_sha256() {
            Pkcs1v15Sign::new::<Sha256>()
        } else {
            Pkcs1v15Sign::new::<Sha1>()
        };

        debug!(
            "verifying {} signature against certificate {} (digest {})",
            sig.signature_type.description(),
            cert.name_str(),
            hex::encode(hash)
        );

        key.verify(scheme, hash, &sig.signature)
            .map_err(|_| ContainerError::BadSignature)
    }
}

fn support_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("ctr-container"))
}

/// Hashes the next `size` bytes of `rs` with the digest the signature type
/// calls for.
pub fn signature_hash(
    rs: &mut impl Read,
    sig_type: SignatureType,
    size: u64,
) -> ContainerResult<Vec<u8>> {
    if sig_type.is_sha256() {
        hash_stream::<Sha256>(rs, size)
    } else {
        hash_stream::<Sha1>(rs, size)
    }
}

fn hash_stream<D: Digest>(rs: &mut impl Read, size: u64) -> ContainerResult<Vec<u8>> {
    let mut hasher = D::new();
    let mut remaining = size;
    let mut buf = [0u8; 0x4000];

    while remaining > 0 {
        let n = buf.len().min(remaining as usize);
        read_exact_into(rs, &mut buf[..n])?;
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }

    Ok(hasher.finalize().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::certificate::KeyType;
    use binrw::BinWrite;
    use rsa::RsaPrivateKey;
    use rsa::traits::PublicKeyParts;
    use std::io::Cursor;

    fn padded(text: &[u8], len: usize) -> Vec<u8> {
        let mut buf = text.to_vec();
        buf.resize(len, 0);
        buf
    }

    fn rsa2048_cert(name: &[u8], modulus: Vec<u8>, exponent: u32) -> Certificate {
        Certificate {
            signature: Signature {
                signature_type: SignatureType::Rsa2048Sha256,
                signature: vec![0xAA; 0x100],
                padding: vec![0x00; 0x3C],
                issuer: padded(b"Root-CA00000003", 0x40),
            },
            key_type: KeyType::Rsa2048,
            name: padded(name, 0x40),
            expiration_time: 0x5F5E0F00,
            public_key: PublicKey::Rsa2048 {
                modulus,
                public_exponent: exponent,
                padding: vec![0x00; 0x34],
            },
        }
    }

    fn sig_by(issuer: &[u8], sig_type: SignatureType, signature: Vec<u8>) -> Signature {
        Signature {
            signature_type: sig_type,
            signature,
            padding: vec![0x00; sig_type.padding_size()],
            issuer: padded(issuer, 0x40),
        }
    }

    fn chain_bytes(certs: &[Certificate]) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut cur = Cursor::new(&mut buf);
        for cert in certs {
            cert.write_be(&mut cur).unwrap();
        }
        buf
    }

    #[test]
    fn reads_a_chain_of_certificates() {
        let certs = [
            rsa2048_cert(b"CA00000003", vec![0xFF; 0x100], 65537),
            rsa2048_cert(b"CP0000000b", vec![0xEE; 0x100], 65537),
            rsa2048_cert(b"XS0000000c", vec![0xDD; 0x100], 65537),
        ];
        let buf = chain_bytes(&certs);

        let chain = CertificateChain::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.certs()[1].name_str(), "CP0000000b");
    }

    #[test]
    fn extend_rolls_back_on_truncated_input() {
        let certs = [
            rsa2048_cert(b"CA00000003", vec![0xFF; 0x100], 65537),
            rsa2048_cert(b"CP0000000b", vec![0xEE; 0x100], 65537),
        ];
        let mut buf = chain_bytes(&certs);
        buf.truncate(buf.len() - 7);

        let mut chain = CertificateChain::new();
        chain.push(rsa2048_cert(b"XS0000000c", vec![0xDD; 0x100], 65537));

        assert!(chain.extend_from(&mut Cursor::new(&buf)).is_err());
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.certs()[0].name_str(), "XS0000000c");
    }

    #[test]
    fn resolves_issuer_to_certificate_name_and_key_kind() {
        let mut chain = CertificateChain::new();
        chain.push(rsa2048_cert(b"CP0000000b", vec![0xEE; 0x100], 65537));

        let sig = sig_by(
            b"Root-CA00000003-CP0000000b",
            SignatureType::Rsa2048Sha256,
            vec![0xAA; 0x100],
        );
        assert_eq!(
            chain.find_certificate(&sig).unwrap().name_str(),
            "CP0000000b"
        );

        // a signature needing a 4096-bit key cannot resolve to this cert
        let sig = sig_by(
            b"Root-CA00000003-CP0000000b",
            SignatureType::Rsa4096Sha256,
            vec![0xAA; 0x200],
        );
        assert!(matches!(
            chain.find_certificate(&sig),
            Err(ContainerError::CertificateNotFound(name)) if name == "CP0000000b"
        ));

        let sig = sig_by(b"Root-CA00000003-XS0000000c", SignatureType::Rsa2048Sha256, vec![0xAA; 0x100]);
        assert!(chain.find_certificate(&sig).is_err());

        // issuer without any '-' falls back to the whole string
        let sig = sig_by(b"CP0000000b", SignatureType::Rsa2048Sha256, vec![0xAA; 0x100]);
        assert!(chain.find_certificate(&sig).is_ok());
    }

    #[test]
    fn ecdsa_signatures_never_resolve() {
        let mut chain = CertificateChain::new();
        chain.push(Certificate {
            signature: Signature {
                signature_type: SignatureType::Rsa2048Sha256,
                signature: vec![0xAA; 0x100],
                padding: vec![0x00; 0x3C],
                issuer: padded(b"Root-CA00000003", 0x40),
            },
            key_type: KeyType::EllipticCurve,
            name: padded(b"CT00000000", 0x40),
            expiration_time: 0,
            public_key: PublicKey::EllipticCurve {
                public_key: vec![0xCC; 0x3C],
                padding: vec![0x00; 0x3C],
            },
        });

        let sig = sig_by(
            b"Root-CA00000003-CT00000000",
            SignatureType::EcdsaSha256,
            vec![0xAA; 0x3C],
        );
        assert!(matches!(
            chain.verify(&sig, &[0u8; 32]),
            Err(ContainerError::CertificateNotFound(_))
        ));
    }

    #[test]
    fn verifies_a_real_rsa_signature_and_rejects_a_corrupted_one() {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();

        let modulus = {
            let raw = private_key.n().to_bytes_be();
            let mut buf = vec![0u8; 0x100 - raw.len()];
            buf.extend(raw);
            buf
        };

        let mut chain = CertificateChain::new();
        chain.push(rsa2048_cert(b"CP0000000b", modulus, 65537));

        let digest = Sha256::digest(b"tmd header bytes").to_vec();
        let sig_bytes = private_key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .unwrap();

        let sig = sig_by(
            b"Root-CA00000003-CP0000000b",
            SignatureType::Rsa2048Sha256,
            sig_bytes,
        );
        chain.verify(&sig, &digest).unwrap();

        let mut bad = sig.clone();
        bad.signature[10] ^= 1;
        assert!(matches!(
            chain.verify(&bad, &digest),
            Err(ContainerError::BadSignature)
        ));
    }

    #[test]
    fn scan_dir_loads_known_files_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();

        let tmd_certs = chain_bytes(&[rsa2048_cert(b"CP0000000b", vec![0xEE; 0x100], 65537)]);
        std::fs::write(dir.path().join("CA00000003-CP0000000b.bin"), &tmd_certs).unwrap();

        let tik_certs = chain_bytes(&[rsa2048_cert(b"XS0000000c", vec![0xDD; 0x100], 65537)]);
        std::fs::write(dir.path().join("CA00000003-XS0000000c.bin"), &tik_certs).unwrap();

        std::fs::write(dir.path().join("cert_bundle.bin"), b"not a certificate").unwrap();

        let mut chain = CertificateChain::new();
        chain.scan_dir(dir.path());

        assert_eq!(chain.len(), 2);
        assert_eq!(chain.certs()[0].name_str(), "CP0000000b");
        assert_eq!(chain.certs()[1].name_str(), "XS0000000c");
    }

    #[test]
    fn signature_hash_covers_exactly_the_requested_prefix() {
        let data = (0u8..200).collect::<Vec<u8>>();

        let digest =
            signature_hash(&mut Cursor::new(&data), SignatureType::Rsa2048Sha256, 100).unwrap();
        assert_eq!(digest, Sha256::digest(&data[..100]).to_vec());

        let digest =
            signature_hash(&mut Cursor::new(&data), SignatureType::Rsa2048Sha1, 100).unwrap();
        assert_eq!(digest, Sha1::digest(&data[..100]).to_vec());

        assert!(matches!(
            signature_hash(&mut Cursor::new(&data), SignatureType::Rsa2048Sha256, 500),
            Err(ContainerError::TooSmall(_))
        ));
    }
}
