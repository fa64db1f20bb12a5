use super::vfs::{Directory, Vfs};
use super::{
    DIR_DIR_CHILD, DIR_FILE_CHILD, DIR_NEXT_BUCKET, DIR_SIBLING, DirectoryMetadata, FILE_NEXT_BUCKET,
    FILE_SIBLING, FileMetadata, INVALID_OFFSET, Level3Header, bucket_hash, utf16_bytes, utf16_units,
};
use crate::error::ContainerResult;
use crate::ivfc::IvfcWriter;
use crate::util::align;
use binrw::BinWrite;
use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use std::io::{Cursor, Write};

/// Serializes a VFS tree into an IVFC-wrapped RomFS image.
///
/// Two passes over the tree: the first lays out both metadata arenas and
/// hash-bucket tables, the second streams the file contents. If anything
/// fails the IVFC writer is dropped unfinished and `out` stays untouched.
pub fn write_romfs<W: Write>(vfs: &Vfs, out: W) -> ContainerResult<()> {
    let mut builder = MetaBuilder::new(vfs.total_directories(), vfs.total_files());
    debug!(
        "building RomFS metadata: {} directory bucket(s), {} file bucket(s)",
        builder.dir_hash.len(),
        builder.file_hash.len()
    );

    let root_offset = builder.write_directory(None, 0)?;
    builder.write_tree(&vfs.root, root_offset)?;

    let dir_hash_size = (builder.dir_hash.len() * 4) as u32;
    let file_hash_size = (builder.file_hash.len() * 4) as u32;
    let header = Level3Header {
        header_size: 0x28,
        dir_hash_offset: 0x28,
        dir_hash_size,
        dir_meta_offset: 0x28 + dir_hash_size,
        dir_meta_size: builder.dir_meta.len() as u32,
        file_hash_offset: 0x28 + dir_hash_size + builder.dir_meta.len() as u32,
        file_hash_size,
        file_meta_offset: 0x28
            + dir_hash_size
            + builder.dir_meta.len() as u32
            + file_hash_size,
        file_meta_size: builder.file_meta.len() as u32,
        data_offset: 0x28
            + dir_hash_size
            + builder.dir_meta.len() as u32
            + file_hash_size
            + builder.file_meta.len() as u32,
    };

    let mut writer = IvfcWriter::new(out);

    let mut header_buf = Vec::new();
    header.write(&mut Cursor::new(&mut header_buf))?;
    writer.write_all(&header_buf)?;

    for &head in &builder.dir_hash {
        writer.write_all(&head.to_le_bytes())?;
    }
    writer.write_all(&builder.dir_meta)?;
    for &head in &builder.file_hash {
        writer.write_all(&head.to_le_bytes())?;
    }
    writer.write_all(&builder.file_meta)?;

    write_file_data(&mut writer, &vfs.root)?;

    writer.finish()
}

/// Bucket count for a hash table with `entries` records. Small counts get a
/// fixed or odd length; larger ones the next integer with no divisor in
/// {2, 3, 5, 7, 11, 13, 17}. Not always prime, but it is what the reference
/// tooling emits.
fn table_length(entries: u32) -> u32 {
    if entries <= 3 {
        3
    } else if entries <= 19 {
        entries | 1
    } else {
        let mut len = entries;
        while has_small_divisor(len) {
            len += 1;
        }
        len
    }
}

fn has_small_divisor(x: u32) -> bool {
    [2u32, 3, 5, 7, 11, 13, 17].iter().any(|&d| x % d == 0)
}

struct MetaBuilder {
    dir_hash: Vec<u32>,
    file_hash: Vec<u32>,
    dir_meta: Vec<u8>,
    file_meta: Vec<u8>,
    current_file_data_offset: u64,
}

impl MetaBuilder {
    fn new(total_directories: u32, total_files: u32) -> Self {
        Self {
            dir_hash: vec![INVALID_OFFSET; table_length(total_directories) as usize],
            file_hash: vec![INVALID_OFFSET; table_length(total_files) as usize],
            dir_meta: Vec::new(),
            file_meta: Vec::new(),
            current_file_data_offset: 0,
        }
    }

    /// Pass 1: all file records of a directory, then each subdirectory
    /// record followed by its own subtree.
    fn write_tree(&mut self, dir: &Directory, parent_offset: u32) -> ContainerResult<()> {
        for file in dir.files() {
            self.write_file_meta(file, parent_offset)?;
        }
        for subdir in dir.directories() {
            let child_offset = self.write_directory(Some(subdir.name()), parent_offset)?;
            self.write_tree(subdir, child_offset)?;
        }
        Ok(())
    }

    /// `None` writes the root record, which self-references its parent and
    /// joins no sibling chain.
    fn write_directory(
        &mut self,
        name: Option<&str>,
        parent_offset: u32,
    ) -> ContainerResult<u32> {
        let units = utf16_units(name.unwrap_or(""));
        let meta_offset = self.dir_meta.len() as u32;

        insert_into_bucket(
            &mut self.dir_hash,
            &mut self.dir_meta,
            DIR_NEXT_BUCKET,
            &units,
            parent_offset,
            meta_offset,
        );

        let record = DirectoryMetadata {
            parent: parent_offset,
            sibling: INVALID_OFFSET,
            first_dir_child: INVALID_OFFSET,
            first_file_child: INVALID_OFFSET,
            next_in_bucket: INVALID_OFFSET,
            name_length: (units.len() * 2) as u32,
            name: utf16_bytes(&units),
        };
        push_record(&mut self.dir_meta, |cur| record.write(cur))?;

        if name.is_some() {
            self.append_dir_child(parent_offset, meta_offset);
        }

        Ok(meta_offset)
    }

    fn write_file_meta(
        &mut self,
        file: &super::vfs::File,
        parent_offset: u32,
    ) -> ContainerResult<()> {
        let units = utf16_units(file.name());
        let meta_offset = self.file_meta.len() as u32;

        insert_into_bucket(
            &mut self.file_hash,
            &mut self.file_meta,
            FILE_NEXT_BUCKET,
            &units,
            parent_offset,
            meta_offset,
        );

        let size = file.size()?;
        let record = FileMetadata {
            parent: parent_offset,
            sibling: INVALID_OFFSET,
            data_offset: self.current_file_data_offset,
            data_size: size,
            next_in_bucket: INVALID_OFFSET,
            name_length: (units.len() * 2) as u32,
            name: utf16_bytes(&units),
        };
        push_record(&mut self.file_meta, |cur| record.write(cur))?;

        self.append_file_child(parent_offset, meta_offset);

        self.current_file_data_offset = align(self.current_file_data_offset + size, 16);

        Ok(())
    }

    fn append_dir_child(&mut self, parent_offset: u32, offset: u32) {
        let field = parent_offset as usize + DIR_DIR_CHILD;
        let head = LittleEndian::read_u32(&self.dir_meta[field..]);
        if head == INVALID_OFFSET {
            LittleEndian::write_u32(&mut self.dir_meta[field..field + 4], offset);
            return;
        }

        let tail = chain_tail(&self.dir_meta, head, DIR_SIBLING);
        let field = tail as usize + DIR_SIBLING;
        LittleEndian::write_u32(&mut self.dir_meta[field..field + 4], offset);
    }

    fn append_file_child(&mut self, parent_offset: u32, offset: u32) {
        let field = parent_offset as usize + DIR_FILE_CHILD;
        let head = LittleEndian::read_u32(&self.dir_meta[field..]);
        if head == INVALID_OFFSET {
            LittleEndian::write_u32(&mut self.dir_meta[field..field + 4], offset);
            return;
        }

        let tail = chain_tail(&self.file_meta, head, FILE_SIBLING);
        let field = tail as usize + FILE_SIBLING;
        LittleEndian::write_u32(&mut self.file_meta[field..field + 4], offset);
    }
}

/// Walks a linked chain of records and returns the offset of its last
/// record.
fn chain_tail(meta: &[u8], head: u32, link_field: usize) -> u32 {
    let mut current = head;
    loop {
        let next = LittleEndian::read_u32(&meta[current as usize + link_field..]);
        if next == INVALID_OFFSET {
            return current;
        }
        current = next;
    }
}

/// Appends `offset` to the bucket chain for `(name, parent)`: the bucket
/// head if the bucket is empty, otherwise patched into the last record's
/// next-in-bucket field.
fn insert_into_bucket(
    hash_tab: &mut [u32],
    meta: &mut [u8],
    link_field: usize,
    units: &[u16],
    parent_offset: u32,
    offset: u32,
) {
    let bucket = (bucket_hash(units, parent_offset) % hash_tab.len() as u32) as usize;
    if hash_tab[bucket] == INVALID_OFFSET {
        hash_tab[bucket] = offset;
        return;
    }

    let tail = chain_tail(meta, hash_tab[bucket], link_field);
    let field = tail as usize + link_field;
    LittleEndian::write_u32(&mut meta[field..field + 4], offset);
}

/// Appends a serialized record and pads the arena to a 4-byte boundary.
fn push_record(
    meta: &mut Vec<u8>,
    write: impl FnOnce(&mut Cursor<Vec<u8>>) -> binrw::BinResult<()>,
) -> ContainerResult<()> {
    let mut cursor = Cursor::new(Vec::new());
    write(&mut cursor)?;
    meta.extend_from_slice(&cursor.into_inner());
    meta.resize(align(meta.len() as u64, 4) as usize, 0);
    Ok(())
}

/// Pass 2: file contents in pass-1 order, each padded to 16 bytes.
fn write_file_data<W: Write>(ws: &mut W, dir: &Directory) -> ContainerResult<()> {
    for file in dir.files() {
        let mut stream = file.open()?;
        let copied = std::io::copy(&mut *stream, ws)?;
        let padding = align(copied, 16) - copied;
        ws.write_all(&vec![0u8; padding as usize])?;
    }
    for subdir in dir.directories() {
        write_file_data(ws, subdir)?;
    }
    Ok(())
}
