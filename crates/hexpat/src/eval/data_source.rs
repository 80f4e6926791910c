// DataSource trait: abstraction over binary data access

use crate::error::EvalError;

/// Random-access byte source the evaluator reads from.
/// Reads are by absolute offset; nothing is cached across passes.
pub trait DataSource {
    /// Read exactly `size` bytes at `offset`
    fn read_bytes(&self, offset: u64, size: u64) -> Result<Vec<u8>, EvalError>;

    /// Get the total size of the data
    fn size(&self) -> u64;
}

/// Error for a read that does not fit inside a source of `len` bytes
pub fn out_of_bounds(offset: u64, size: u64, len: u64) -> EvalError {
    EvalError::new(format!(
        "read out of bounds: offset=0x{:X}, size={}, data size={}",
        offset, size, len
    ))
}

/// DataSource backed by a byte slice (useful for testing)
pub struct SliceDataSource<'a> {
    data: &'a [u8],
}

impl<'a> SliceDataSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> DataSource for SliceDataSource<'a> {
    fn read_bytes(&self, offset: u64, size: u64) -> Result<Vec<u8>, EvalError> {
        let len = self.data.len() as u64;
        match offset.checked_add(size) {
            Some(end) if end <= len => Ok(self.data[offset as usize..end as usize].to_vec()),
            _ => Err(out_of_bounds(offset, size, len)),
        }
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}
