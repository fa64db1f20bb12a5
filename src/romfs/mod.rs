use crate::error::{ContainerError, ContainerResult};
use crate::stream::{ReadSeek, SubView, read_exact_at};
use crate::util::align;
use binrw::{BinRead, BinWrite};
use byteorder::{ByteOrder, LittleEndian};
use std::io::{Cursor, Seek, SeekFrom};

pub mod vfs;
mod writer;

pub use writer::write_romfs;

/// The "none" sentinel for every intra-arena reference.
pub const INVALID_OFFSET: u32 = u32::MAX;

/// Longest path component the lookup path accepts, in UTF-16 code units.
pub(crate) const MAX_NAME_UNITS: usize = 1024;

// field offsets inside the serialized metadata records, used when patching
// chains in place
pub(crate) const DIR_SIBLING: usize = 0x04;
pub(crate) const DIR_DIR_CHILD: usize = 0x08;
pub(crate) const DIR_FILE_CHILD: usize = 0x0C;
pub(crate) const DIR_NEXT_BUCKET: usize = 0x10;
pub(crate) const FILE_SIBLING: usize = 0x04;
pub(crate) const FILE_NEXT_BUCKET: usize = 0x18;

/// The 0x28-byte header at the start of the Level-3 payload. All offsets are
/// relative to the payload.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub(crate) struct Level3Header {
    pub header_size: u32,
    pub dir_hash_offset: u32,
    pub dir_hash_size: u32,
    pub dir_meta_offset: u32,
    pub dir_meta_size: u32,
    pub file_hash_offset: u32,
    pub file_hash_size: u32,
    pub file_meta_offset: u32,
    pub file_meta_size: u32,
    pub data_offset: u32,
}

/// A directory record in the directory metadata arena. All references are
/// arena offsets; names are UTF-16LE.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub(crate) struct DirectoryMetadata {
    pub parent: u32,
    pub sibling: u32,
    pub first_dir_child: u32,
    pub first_file_child: u32,
    pub next_in_bucket: u32,
    pub name_length: u32,
    #[br(count = name_length)]
    pub name: Vec<u8>,
}

/// A file record in the file metadata arena. `data_offset` is relative to
/// the image's file data region.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub(crate) struct FileMetadata {
    pub parent: u32,
    pub sibling: u32,
    pub data_offset: u64,
    pub data_size: u64,
    pub next_in_bucket: u32,
    pub name_length: u32,
    #[br(count = name_length)]
    pub name: Vec<u8>,
}

/// The rotate-and-XOR mixer both hash-bucket tables are keyed with.
pub(crate) fn bucket_hash(name: &[u16], parent_offset: u32) -> u32 {
    let mut hash = parent_offset ^ 123456789;
    for &unit in name {
        hash = hash.rotate_right(5);
        hash ^= unit as u32;
    }
    hash
}

pub(crate) fn utf16_units(name: &str) -> Vec<u16> {
    name.encode_utf16().collect()
}

pub(crate) fn utf16_bytes(units: &[u16]) -> Vec<u8> {
    units.iter().flat_map(|unit| unit.to_le_bytes()).collect()
}

fn decode_name(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

#[derive(Debug, Clone)]
pub struct DirectoryInfo {
    pub parent: u32,
    pub sibling: u32,
    pub first_dir_child: u32,
    pub first_file_child: u32,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct FileInfo {
    pub parent: u32,
    pub sibling: u32,
    /// Relative to the image's file data region.
    pub data_offset: u64,
    pub data_size: u64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub enum Entry {
    Directory(DirectoryInfo),
    File(FileInfo),
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Self::Directory(dir) => &dir.name,
            Self::File(file) => &file.name,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

/// A parsed RomFS image. The four lookup tables are held in memory; file
/// contents are served straight from the backing stream.
pub struct Romfs<R: ReadSeek> {
    rs: R,
    dir_hash_tab: Vec<u32>,
    dir_meta: Vec<u8>,
    file_hash_tab: Vec<u32>,
    file_meta: Vec<u8>,
    data_offset: u64,
}

impl<R: ReadSeek> Romfs<R> {
    pub fn new(mut rs: R) -> ContainerResult<Self> {
        let mut ivfc = [0u8; 0x60];
        read_exact_at(&mut rs, 0, &mut ivfc)?;
        if &ivfc[0..8] != b"IVFC\x00\x00\x01\x00" {
            return Err(ContainerError::Corrupt("bad IVFC magic"));
        }

        let master_hash_size = LittleEndian::read_u32(&ivfc[0x08..]);
        let block_log2 = LittleEndian::read_u32(&ivfc[0x4C..]);
        if block_log2 >= 32 {
            return Err(ContainerError::Corrupt("bad IVFC block size"));
        }
        let block_size = 1u64 << block_log2;
        let level3_offset = align(0x60 + master_hash_size as u64, block_size);

        rs.seek(SeekFrom::Start(level3_offset))?;
        let header = Level3Header::read(&mut rs)?;
        if header.header_size != 0x28 {
            return Err(ContainerError::Corrupt("bad RomFS header size"));
        }

        let dir_hash_raw = read_table(
            &mut rs,
            level3_offset + header.dir_hash_offset as u64,
            header.dir_hash_size,
        )?;
        let dir_meta = read_table(
            &mut rs,
            level3_offset + header.dir_meta_offset as u64,
            header.dir_meta_size,
        )?;
        let file_hash_raw = read_table(
            &mut rs,
            level3_offset + header.file_hash_offset as u64,
            header.file_hash_size,
        )?;
        let file_meta = read_table(
            &mut rs,
            level3_offset + header.file_meta_offset as u64,
            header.file_meta_size,
        )?;

        Ok(Self {
            rs,
            dir_hash_tab: decode_hash_table(&dir_hash_raw),
            dir_meta,
            file_hash_tab: decode_hash_table(&file_hash_raw),
            file_meta,
            data_offset: level3_offset + header.data_offset as u64,
        })
    }

    /// Resolves a path to its directory or file entry.
    ///
    /// Leading slashes are stripped, runs of slashes collapse, and a
    /// trailing slash makes the last component resolve as a directory. The
    /// empty path is the root directory.
    pub fn get_info(&self, path: &str) -> ContainerResult<Entry> {
        let trimmed = path.trim_start_matches('/');
        let want_directory = trimmed.ends_with('/');
        let components: Vec<&str> = trimmed.split('/').filter(|c| !c.is_empty()).collect();

        let Some((last, parents)) = components.split_last() else {
            return Ok(Entry::Directory(self.directory_info(0)?));
        };

        let mut parent_offset = 0u32;
        for component in parents {
            parent_offset = self
                .dir_lookup(component, parent_offset)
                .ok_or(ContainerError::NotFound)?;
        }

        // a file is the more likely ask
        if !want_directory {
            if let Some(offset) = self.file_lookup(last, parent_offset) {
                return Ok(Entry::File(self.file_info(offset)?));
            }
        }
        if let Some(offset) = self.dir_lookup(last, parent_offset) {
            return Ok(Entry::Directory(self.directory_info(offset)?));
        }

        Err(ContainerError::NotFound)
    }

    pub fn root(&self) -> ContainerResult<DirectoryInfo> {
        self.directory_info(0)
    }

    /// Iterates a directory: directory children in sibling order first,
    /// then file children in sibling order.
    pub fn entries(&self, dir: &DirectoryInfo) -> RomfsIterator<'_, R> {
        let (next, in_dir_phase) = if dir.first_dir_child == INVALID_OFFSET {
            (dir.first_file_child, false)
        } else {
            (dir.first_dir_child, true)
        };

        RomfsIterator {
            ctx: self,
            file_phase_start: dir.first_file_child,
            next,
            in_dir_phase,
        }
    }

    /// Opens a file entry as a subview over the backing stream.
    pub fn open(&mut self, entry: &Entry) -> ContainerResult<SubView<'_>> {
        match entry {
            Entry::File(file) => Ok(SubView::new(
                &mut self.rs,
                self.data_offset + file.data_offset,
                file.data_size,
            )),
            Entry::Directory(_) => Err(ContainerError::NotAFile),
        }
    }

    fn dir_lookup(&self, name: &str, parent_offset: u32) -> Option<u32> {
        let units = utf16_units(name);
        if units.len() >= MAX_NAME_UNITS || self.dir_hash_tab.is_empty() {
            return None;
        }

        let bucket = bucket_hash(&units, parent_offset) % self.dir_hash_tab.len() as u32;
        let name_bytes = utf16_bytes(&units);

        let mut offset = self.dir_hash_tab[bucket as usize];
        while offset != INVALID_OFFSET {
            let record = self.dir_record(offset).ok()?;
            if record.name_length as usize == name_bytes.len() && record.name == name_bytes {
                return Some(offset);
            }
            offset = record.next_in_bucket;
        }

        None
    }

    fn file_lookup(&self, name: &str, parent_offset: u32) -> Option<u32> {
        let units = utf16_units(name);
        if units.len() >= MAX_NAME_UNITS || self.file_hash_tab.is_empty() {
            return None;
        }

        let bucket = bucket_hash(&units, parent_offset) % self.file_hash_tab.len() as u32;
        let name_bytes = utf16_bytes(&units);

        let mut offset = self.file_hash_tab[bucket as usize];
        while offset != INVALID_OFFSET {
            let record = self.file_record(offset).ok()?;
            if record.name_length as usize == name_bytes.len() && record.name == name_bytes {
                return Some(offset);
            }
            offset = record.next_in_bucket;
        }

        None
    }

    fn dir_record(&self, offset: u32) -> ContainerResult<DirectoryMetadata> {
        let mut cursor = Cursor::new(&self.dir_meta);
        cursor.seek(SeekFrom::Start(offset as u64))?;
        Ok(DirectoryMetadata::read(&mut cursor)?)
    }

    fn file_record(&self, offset: u32) -> ContainerResult<FileMetadata> {
        let mut cursor = Cursor::new(&self.file_meta);
        cursor.seek(SeekFrom::Start(offset as u64))?;
        Ok(FileMetadata::read(&mut cursor)?)
    }

    fn directory_info(&self, offset: u32) -> ContainerResult<DirectoryInfo> {
        let record = self.dir_record(offset)?;
        Ok(DirectoryInfo {
            parent: record.parent,
            sibling: record.sibling,
            first_dir_child: record.first_dir_child,
            first_file_child: record.first_file_child,
            name: decode_name(&record.name),
        })
    }

    fn file_info(&self, offset: u32) -> ContainerResult<FileInfo> {
        let record = self.file_record(offset)?;
        Ok(FileInfo {
            parent: record.parent,
            sibling: record.sibling,
            data_offset: record.data_offset,
            data_size: record.data_size,
            name: decode_name(&record.name),
        })
    }
}

fn read_table(rs: &mut impl ReadSeek, offset: u64, size: u32) -> ContainerResult<Vec<u8>> {
    let mut buf = vec![0u8; size as usize];
    read_exact_at(rs, offset, &mut buf)?;
    Ok(buf)
}

fn decode_hash_table(raw: &[u8]) -> Vec<u32> {
    raw.chunks_exact(4).map(LittleEndian::read_u32).collect()
}

pub struct RomfsIterator<'a, R: ReadSeek> {
    ctx: &'a Romfs<R>,
    file_phase_start: u32,
    next: u32,
    in_dir_phase: bool,
}

impl<R: ReadSeek> Iterator for RomfsIterator<'_, R> {
    type Item = ContainerResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == INVALID_OFFSET {
            return None;
        }

        if self.in_dir_phase {
            let info = match self.ctx.directory_info(self.next) {
                Ok(info) => info,
                Err(err) => {
                    self.next = INVALID_OFFSET;
                    return Some(Err(err));
                }
            };
            self.next = info.sibling;
            if self.next == INVALID_OFFSET {
                self.next = self.file_phase_start;
                self.in_dir_phase = false;
            }
            Some(Ok(Entry::Directory(info)))
        } else {
            let info = match self.ctx.file_info(self.next) {
                Ok(info) => info,
                Err(err) => {
                    self.next = INVALID_OFFSET;
                    return Some(Err(err));
                }
            };
            self.next = info.sibling;
            Some(Ok(Entry::File(info)))
        }
    }
}
