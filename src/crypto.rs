use crate::constants::COMMON_KEYS;
use crate::error::{ContainerError, ContainerResult};
use crate::stream::stream_len;
use crate::util::align;
use aes::{
    Aes128,
    cipher::{BlockDecryptMut, KeyIvInit},
};
use block_padding::NoPadding;
use byteorder::{BigEndian, ByteOrder};
use std::io::{ErrorKind, Read, Seek, SeekFrom};

pub type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Decrypts `data` in place with AES-128-CBC. `data` must be block aligned.
pub fn cbc_decrypt(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) -> ContainerResult<()> {
    Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|err| ContainerError::Cipher(err.to_string()))?
        .decrypt_padded_mut::<NoPadding>(data)
        .map_err(|err| ContainerError::Cipher(err.to_string()))?;

    Ok(())
}

/// IV for a CIA content: the big-endian content index zero-padded to a block.
pub fn content_iv(content_index: u16) -> [u8; 16] {
    let mut iv = [0u8; 16];
    BigEndian::write_u16(&mut iv[0..2], content_index);

    iv
}

/// IV for the encrypted title key: the big-endian title ID zero-padded to a block.
pub fn title_key_iv(title_id: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    BigEndian::write_u64(&mut iv[0..8], title_id);

    iv
}

/// Key material supplied by the host, looked up by the ticket's common key index.
#[derive(Debug, Clone)]
pub struct Keyset {
    common_keys: [[u8; 16]; 6],
}

impl Default for Keyset {
    fn default() -> Self {
        Self {
            common_keys: COMMON_KEYS,
        }
    }
}

impl Keyset {
    pub fn from_common_keys(common_keys: [[u8; 16]; 6]) -> Self {
        Self { common_keys }
    }

    pub fn common_key(&self, index: u8) -> ContainerResult<&[u8; 16]> {
        self.common_keys
            .get(index as usize)
            .ok_or(ContainerError::MissingKey(index))
    }
}

/// Random-access AES-128-CBC decrypting view over a block-aligned ciphertext
/// stream.
///
/// The IV for any interior block is the preceding ciphertext block, so a read
/// at offset `o` only needs the ciphertext from `o - 16` onwards; the declared
/// IV is used at offset 0.
pub struct CbcReader<R> {
    inner: R,
    length: u64,
    key: [u8; 16],
    iv: [u8; 16],
}

impl<R: Read + Seek> CbcReader<R> {
    pub fn new(mut inner: R, key: [u8; 16], iv: [u8; 16]) -> ContainerResult<Self> {
        let length = stream_len(&mut inner)?;
        if length % 16 != 0 {
            return Err(ContainerError::Corrupt("ciphertext is not block aligned"));
        }
        inner.seek(SeekFrom::Start(0))?;

        Ok(Self {
            inner,
            length,
            key,
            iv,
        })
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl<R: Read + Seek> Read for CbcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let pos = self.inner.stream_position()?;
        if pos >= self.length || buf.is_empty() {
            return Ok(0);
        }
        let n = (buf.len() as u64).min(self.length - pos) as usize;

        let start = pos & !15;
        let end = align(pos + n as u64, 16).min(self.length);

        let mut iv = self.iv;
        if start != 0 {
            self.inner.seek(SeekFrom::Start(start - 16))?;
            self.inner.read_exact(&mut iv)?;
        } else {
            self.inner.seek(SeekFrom::Start(0))?;
        }

        let mut blocks = vec![0u8; (end - start) as usize];
        self.inner.read_exact(&mut blocks)?;
        cbc_decrypt(&self.key, &iv, &mut blocks)
            .map_err(|err| std::io::Error::new(ErrorKind::InvalidData, err.to_string()))?;

        let skip = (pos - start) as usize;
        buf[..n].copy_from_slice(&blocks[skip..skip + n]);
        self.inner.seek(SeekFrom::Start(pos + n as u64))?;

        Ok(n)
    }
}

impl<R: Read + Seek> Seek for CbcReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}
