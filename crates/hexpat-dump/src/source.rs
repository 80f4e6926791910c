//! Byte source for the file being described
//!
//! Small files are read into memory; anything above the threshold is
//! memory-mapped so large images don't have to be copied up front.

use std::fs::File;
use std::path::Path;

use hexpat::error::EvalError;
use hexpat::eval::data_source::out_of_bounds;
use hexpat::DataSource;
use memmap2::Mmap;

/// Files larger than this are memory-mapped
pub const MMAP_THRESHOLD: u64 = 10 * 1024 * 1024; // 10MB

enum Backend {
    InMemory(Vec<u8>),
    MemoryMapped(Mmap),
}

pub struct FileSource {
    backend: Backend,
}

impl FileSource {
    /// Open a file, choosing the backend based on its size
    pub fn open(path: &Path, mmap_threshold: u64) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        let backend = if file_size > mmap_threshold {
            // The mapping is read-only and the file is not modified while we hold it
            let mmap = unsafe { Mmap::map(&file)? };
            Backend::MemoryMapped(mmap)
        } else {
            Backend::InMemory(std::fs::read(path)?)
        };
        Ok(Self { backend })
    }

    fn bytes(&self) -> &[u8] {
        match &self.backend {
            Backend::InMemory(data) => data,
            Backend::MemoryMapped(mmap) => mmap,
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.backend, Backend::MemoryMapped(_))
    }
}

impl DataSource for FileSource {
    fn read_bytes(&self, offset: u64, size: u64) -> Result<Vec<u8>, EvalError> {
        let bytes = self.bytes();
        let len = bytes.len() as u64;
        match offset.checked_add(size) {
            Some(end) if end <= len => Ok(bytes[offset as usize..end as usize].to_vec()),
            _ => Err(out_of_bounds(offset, size, len)),
        }
    }

    fn size(&self) -> u64 {
        self.bytes().len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file(contents: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_small_file_in_memory() {
        let file = temp_file(&[1, 2, 3, 4]);
        let source = FileSource::open(file.path(), MMAP_THRESHOLD).unwrap();
        assert!(!source.is_mapped());
        assert_eq!(source.size(), 4);
        assert_eq!(source.read_bytes(1, 2).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_large_file_mapped() {
        let file = temp_file(&[0xAA; 64]);
        let source = FileSource::open(file.path(), 16).unwrap();
        assert!(source.is_mapped());
        assert_eq!(source.read_bytes(60, 4).unwrap(), vec![0xAA; 4]);
    }

    #[test]
    fn test_read_past_end() {
        let file = temp_file(&[0; 8]);
        let source = FileSource::open(file.path(), MMAP_THRESHOLD).unwrap();
        let err = source.read_bytes(6, 4).unwrap_err();
        assert!(err.message.starts_with("read out of bounds"));
    }
}
