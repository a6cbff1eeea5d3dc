// sav-arrow - a reader for SPSS system files.
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <http://www.gnu.org/licenses/>.

//! Errors returned by [`crate::reader`].
//!
//! Any [`Error`] poisons the reader: no variant is recoverable internally,
//! every one propagates up to the caller.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::Error as IoError;
use std::path::PathBuf;

use thiserror::Error as ThisError;

/// Where a [`Corrupt`](ErrorDetails::Corrupt) error was detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CorruptStage {
    /// The zsav block stream (a block's decoded size didn't match its
    /// descriptor, or the sum of block sizes didn't match the declared body
    /// length).
    Stream,
    /// The dictionary (header or typed records).
    Dictionary,
    /// A data row (the compression VM or row decoder found an inconsistent
    /// cell sequence that isn't simply truncation).
    Row,
}

impl Display for CorruptStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let s = match self {
            CorruptStage::Stream => "stream",
            CorruptStage::Dictionary => "dictionary",
            CorruptStage::Row => "row",
        };
        f.write_str(s)
    }
}

/// A terminal error encountered while reading a system file.
#[derive(ThisError, Debug)]
pub enum Error {
    /// The input path does not exist.
    #[error("{0}: no such file")]
    NotFound(PathBuf),

    /// An I/O error occurred reading the file or an inflate stream.
    #[error("I/O error: {0}")]
    Io(String),

    /// The first 4 bytes were neither `$FL2` nor `$FL3`.
    #[error("invalid magic number {0:?}")]
    BadMagic([u8; 4]),

    /// The header's layout code was not 2 or 3 (big-endian files are
    /// unsupported).
    #[error("unsupported layout code {0}")]
    UnsupportedLayout(u32),

    /// The header's compression code was not 0 (none), 1 (byte-code), or 2
    /// (zsav/zlib).
    #[error("unsupported compression code {0}")]
    UnsupportedCompression(u32),

    /// The file's declared character encoding is not recognized.
    #[error("unknown encoding {0:?}")]
    UnknownEncoding(String),

    /// A structural inconsistency was found that is not simple truncation.
    #[error("corrupt {stage}: {detail}")]
    Corrupt {
        /// Which stage of reading detected the corruption.
        stage: CorruptStage,
        /// Human-readable detail.
        detail: String,
    },

    /// End of file was reached partway through a row.
    #[error("truncated at row {row}, column {column}")]
    Truncated {
        /// 0-based row index.
        row: u64,
        /// 0-based logical column index.
        column: usize,
    },

    /// [`crate::reader::BatchReader::select`] was given a name that is not a
    /// logical variable in the dictionary.
    #[error("{0:?} is not a variable in this file")]
    InvalidSelection(String),

    /// A string cell's bytes did not decode as valid UTF-8 under strict
    /// [`Utf8Policy`](crate::reader::Utf8Policy).
    #[error("invalid UTF-8 in variable {variable:?}, row {row}")]
    InvalidUtf8 {
        /// The logical variable name.
        variable: String,
        /// 0-based row index.
        row: u64,
    },
}

/// Whether a malformed byte sequence under the file's resolved character
/// encoding is replaced lossily or reported as [`Error::InvalidUtf8`],
/// `spec.md` §7. Passed alongside the `warn` closure to
/// [`read_sav`](crate::reader::read_sav),
/// [`read_sav_metadata`](crate::reader::read_sav_metadata), and
/// [`open_batch_reader`](crate::reader::open_batch_reader).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Utf8Policy {
    #[default]
    Lossy,
    Strict,
}

impl From<IoError> for Error {
    fn from(value: IoError) -> Self {
        Error::Io(value.to_string())
    }
}

impl Error {
    pub(crate) fn corrupt(stage: CorruptStage, detail: impl Into<String>) -> Self {
        Error::Corrupt {
            stage,
            detail: detail.into(),
        }
    }
}

/// A non-fatal condition encountered while reading a system file's
/// dictionary or rows.
///
/// Delivered to the `warn` callback passed to
/// [`read_sav`](crate::reader::read_sav),
/// [`read_sav_metadata`](crate::reader::read_sav_metadata), and
/// [`open_batch_reader`](crate::reader::open_batch_reader). `sav-arrow`
/// never logs on its own behalf; see `SPEC_FULL.md` §6.
#[derive(ThisError, Clone, Debug, PartialEq, Eq)]
pub enum Warning {
    /// A type-7 extension record carried a subtype not recognized by this
    /// reader; its `size * count` bytes were skipped.
    #[error("skipping unrecognized extension record subtype {0}")]
    UnknownExtensionSubtype(u32),

    /// A variable's short name collided with another and was renamed.
    #[error("renaming variable {duplicate:?} to {renamed:?} to avoid a duplicate name")]
    DuplicateVariableName {
        /// The name as read from the file.
        duplicate: String,
        /// The name it was renamed to.
        renamed: String,
    },

    /// A print or write format was invalid for its variable's width; the
    /// variable's default format for its width was substituted.
    #[error("substituting {substituted:?} for invalid format {invalid:?} on variable {variable:?}")]
    InvalidFormat {
        /// The variable name.
        variable: String,
        /// The format as read from the file.
        invalid: String,
        /// The format actually used.
        substituted: String,
    },

    /// A value-label application record referenced a physical variable
    /// index that either doesn't exist or names a continuation segment.
    #[error("ignoring value labels that apply to invalid variable index {0}")]
    InvalidValueLabelTarget(usize),

    /// The file did not declare its own character encoding; falling back to
    /// `windows-1252`.
    #[error("file does not declare its own encoding, assuming windows-1252")]
    NoDeclaredEncoding,

    /// A subtype-4 float info record claimed a system-missing sentinel other
    /// than the well-known `-f64::MAX`; rows are still decoded against
    /// `-f64::MAX`.
    #[error("file claims system-missing value {claimed}, expected {expected}")]
    UnexpectedSysmisSentinel {
        /// The value the file's float info record declared, formatted.
        claimed: String,
        /// The value `sav-arrow` actually decodes against, formatted.
        expected: String,
    },
}
