use crate::stream::ReadSeek;
use std::io::Cursor;
use std::path::PathBuf;

/// An in-memory directory tree the RomFS writer serializes. File contents
/// stay behind until the data pass asks for them.
#[derive(Debug, Default)]
pub struct Vfs {
    pub root: Directory,
}

impl Vfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of directories in the tree, the root included.
    pub fn total_directories(&self) -> u32 {
        count_directories(&self.root)
    }

    pub fn total_files(&self) -> u32 {
        count_files(&self.root)
    }
}

fn count_directories(dir: &Directory) -> u32 {
    1 + dir
        .directories
        .iter()
        .map(count_directories)
        .sum::<u32>()
}

fn count_files(dir: &Directory) -> u32 {
    dir.files.len() as u32 + dir.directories.iter().map(count_files).sum::<u32>()
}

#[derive(Debug, Default)]
pub struct Directory {
    name: String,
    directories: Vec<Directory>,
    files: Vec<File>,
}

impl Directory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            directories: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_directory(&mut self, dir: Directory) {
        self.directories.push(dir);
    }

    pub fn add_file(&mut self, file: File) {
        self.files.push(file);
    }

    pub fn directories(&self) -> &[Directory] {
        &self.directories
    }

    pub fn files(&self) -> &[File] {
        &self.files
    }
}

#[derive(Debug)]
pub struct File {
    name: String,
    source: FileSource,
}

#[derive(Debug)]
enum FileSource {
    Memory(Vec<u8>),
    Path(PathBuf),
}

impl File {
    pub fn from_memory(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            source: FileSource::Memory(bytes),
        }
    }

    pub fn from_path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: FileSource::Path(path.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> std::io::Result<u64> {
        match &self.source {
            FileSource::Memory(bytes) => Ok(bytes.len() as u64),
            FileSource::Path(path) => Ok(std::fs::metadata(path)?.len()),
        }
    }

    pub fn open(&self) -> std::io::Result<Box<dyn ReadSeek + '_>> {
        match &self.source {
            FileSource::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.as_slice()))),
            FileSource::Path(path) => Ok(Box::new(std::fs::File::open(path)?)),
        }
    }
}
