//! ## Pager
//!
//! The only component that touches the file. It reads fixed 512-byte pages and variable,
//! 64-byte-aligned block ranges at an absolute file offset; it never interprets the bytes it
//! returns.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::ndb::page::PAGE_SIZE;

/// Round `value` up to the next multiple of 64.
pub fn round_up_to_64(value: u32) -> u32 {
    value.div_ceil(64) * 64
}

pub struct Pager {
    // A single file handle is the sole mutable shared resource (see the crate's concurrency
    // model); positional reads go through a `RefCell` so `&self` methods can still seek.
    file: RefCell<File>,
}

impl Pager {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            file: RefCell::new(file),
        })
    }

    pub fn read_page(&self, offset: u64) -> io::Result<[u8; PAGE_SIZE]> {
        let mut buffer = [0_u8; PAGE_SIZE];
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    pub fn read_block_range(&self, offset: u64, total_aligned_size: u32) -> io::Result<Vec<u8>> {
        let mut buffer = vec![0_u8; total_aligned_size as usize];
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up_to_64() {
        assert_eq!(round_up_to_64(0), 0);
        assert_eq!(round_up_to_64(1), 64);
        assert_eq!(round_up_to_64(64), 64);
        assert_eq!(round_up_to_64(65), 128);
        assert_eq!(round_up_to_64(8176 + 16), 8192);
    }
}
