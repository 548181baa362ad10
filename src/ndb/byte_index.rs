//! ## [File offset](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/9421c4bc-46dc-4128-b113-2c4a6a8b1f94)
//!
//! The Unicode format stores every absolute file offset as a 64-bit little-endian integer (`IB`).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// `IB`: an absolute byte offset into the PST file.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct ByteIndex(u64);

impl ByteIndex {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn read(f: &mut dyn Read) -> io::Result<Self> {
        Ok(Self(f.read_u64::<LittleEndian>()?))
    }

    pub fn write(&self, f: &mut dyn Write) -> io::Result<()> {
        f.write_u64::<LittleEndian>(self.0)
    }
}

impl From<u64> for ByteIndex {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<ByteIndex> for u64 {
    fn from(value: ByteIndex) -> Self {
        value.0
    }
}
