use crate::error::ContainerResult;
use crate::util::align;
use binrw::BinWrite;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};

pub const IVFC_MAGIC: &[u8; 4] = b"IVFC";
pub const IVFC_VERSION: u32 = 0x10000;
/// Block size used for every hash level, as log2.
pub const IVFC_BLOCK_LOG2: u32 = 12;
pub const IVFC_BLOCK_SIZE: usize = 1 << IVFC_BLOCK_LOG2;
const HASH_SIZE: usize = 0x20;

#[derive(Debug, Clone, BinWrite)]
#[bw(little)]
struct IvfcHeader {
    magic: [u8; 4],
    version: u32,
    master_hash_size: u32,
    level1: LevelDescriptor,
    level2: LevelDescriptor,
    level3: LevelDescriptor,
    descriptor_size: u32,
    reserved: u32,
}

#[derive(Debug, Clone, BinWrite)]
#[bw(little)]
struct LevelDescriptor {
    logical_offset: u64,
    size: u64,
    block_log2: u32,
    reserved: u32,
}

/// Writes an IVFC container around a Level-3 payload.
///
/// The payload is buffered; `finish` computes the hash levels bottom-up and
/// emits the container. Dropping the writer without calling `finish` writes
/// nothing, so a failed build leaves no partial output behind.
pub struct IvfcWriter<W: Write> {
    out: W,
    payload: Vec<u8>,
}

impl<W: Write> IvfcWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            payload: Vec::new(),
        }
    }

    pub fn payload_len(&self) -> u64 {
        self.payload.len() as u64
    }

    pub fn finish(mut self) -> ContainerResult<()> {
        let level2 = hash_level(&self.payload);
        let level1 = hash_level(&level2);
        let master = hash_level(&level1);

        let level1_offset = 0u64;
        let level2_offset = align(level1.len() as u64, IVFC_BLOCK_SIZE as u64);
        let level3_offset = align(level2_offset + level2.len() as u64, IVFC_BLOCK_SIZE as u64);

        let header = IvfcHeader {
            magic: *IVFC_MAGIC,
            version: IVFC_VERSION,
            master_hash_size: master.len() as u32,
            level1: LevelDescriptor {
                logical_offset: level1_offset,
                size: level1.len() as u64,
                block_log2: IVFC_BLOCK_LOG2,
                reserved: 0,
            },
            level2: LevelDescriptor {
                logical_offset: level2_offset,
                size: level2.len() as u64,
                block_log2: IVFC_BLOCK_LOG2,
                reserved: 0,
            },
            level3: LevelDescriptor {
                logical_offset: level3_offset,
                size: self.payload.len() as u64,
                block_log2: IVFC_BLOCK_LOG2,
                reserved: 0,
            },
            descriptor_size: 0x5C,
            reserved: 0,
        };

        let mut header_buf = Vec::new();
        header.write(&mut Cursor::new(&mut header_buf))?;
        // the 0x5C-byte header is padded to 0x60 before the master hash
        header_buf.resize(0x60, 0);

        self.out.write_all(&header_buf)?;
        self.out.write_all(&master)?;

        let payload_start = align(0x60 + master.len() as u64, IVFC_BLOCK_SIZE as u64);
        write_padding(&mut self.out, payload_start - 0x60 - master.len() as u64)?;

        self.out.write_all(&self.payload)?;
        let payload_end = align(self.payload.len() as u64, IVFC_BLOCK_SIZE as u64);
        write_padding(&mut self.out, payload_end - self.payload.len() as u64)?;

        // hash levels trail the payload
        self.out.write_all(&level1)?;
        self.out.write_all(&level2)?;
        self.out.flush()?;

        Ok(())
    }
}

impl<W: Write> Write for IvfcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.payload.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// SHA-256 of every block, each zero-padded to the block size.
fn hash_level(data: &[u8]) -> Vec<u8> {
    let block_count = data.len().div_ceil(IVFC_BLOCK_SIZE);
    let mut hashes = Vec::with_capacity(block_count * HASH_SIZE);

    for chunk in data.chunks(IVFC_BLOCK_SIZE) {
        let mut hasher = Sha256::new();
        hasher.update(chunk);
        if chunk.len() < IVFC_BLOCK_SIZE {
            hasher.update(vec![0u8; IVFC_BLOCK_SIZE - chunk.len()]);
        }
        hashes.extend_from_slice(&hasher.finalize());
    }

    hashes
}

fn write_padding(out: &mut impl Write, count: u64) -> std::io::Result<()> {
    out.write_all(&vec![0u8; count as usize])
}
