//! Crate-level error type unifying the NDB and LTP layers' per-layer error enums.

use thiserror::Error;

use crate::ltp::LtpError;
use crate::ndb::NdbError;

/// The coarse, five-way classification a caller can match on without enumerating every
/// wire-format violation. See each [`PstError`] variant's [`PstError::kind`] mapping.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    /// Magic/version/CRC/signature mismatch, duplicate well-known NID, level/key violation.
    CorruptFile,
    /// ANSI format, a recognized-but-unsupported crypt method, a multi-level BTH.
    Unsupported,
    /// Unknown NID/BID/propId/row.
    NotFound,
    /// Internal precondition failure: a bug, not a malformed file.
    Invariant,
    /// File read failure or truncated block.
    Io,
}

/// Everything that can go wrong opening or reading a PST file, unifying [`NdbError`] and
/// [`LtpError`] for callers who don't need to match on 60+ individual variants.
#[derive(Error, Debug)]
pub enum PstError {
    #[error(transparent)]
    Ndb(#[from] NdbError),
    #[error(transparent)]
    Ltp(#[from] LtpError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PstError {
    /// Map this error onto the five-way taxonomy every caller can handle without knowing the
    /// full per-layer variant set.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Ndb(e) => ndb_error_kind(e),
            Self::Ltp(e) => ltp_error_kind(e),
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

fn ndb_error_kind(error: &NdbError) -> ErrorKind {
    match error {
        NdbError::UnsupportedCryptMethod(_) => ErrorKind::Unsupported,
        NdbError::NodeNotFound(_) | NdbError::BlockNotFound(_) => ErrorKind::NotFound,
        NdbError::DuplicateWellKnownNid(_) | NdbError::MissingWellKnownNid(_) => {
            ErrorKind::CorruptFile
        }
        _ => ErrorKind::CorruptFile,
    }
}

fn ltp_error_kind(error: &LtpError) -> ErrorKind {
    match error {
        LtpError::Ndb(e) => ndb_error_kind(e),
        LtpError::Io(_) => ErrorKind::Io,
        LtpError::UnsupportedHeapTreeLevels(_) => ErrorKind::Unsupported,
        LtpError::HeapAllocIndexNotFound(_)
        | LtpError::HeapBlockIndexNotFound(_)
        | LtpError::PropertyNotFound(_)
        | LtpError::TableRowNotFound(_)
        | LtpError::TableColumnNotFound(_) => ErrorKind::NotFound,
        LtpError::InvalidHeapIndex(_) => ErrorKind::Invariant,
        _ => ErrorKind::CorruptFile,
    }
}
