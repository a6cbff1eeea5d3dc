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

//! A reader for SPSS `.sav`/`.zsav` system files, producing dictionary
//! metadata and Arrow record batches.
//!
//! The three entry points are [`read_sav`], [`read_sav_metadata`], and
//! [`open_batch_reader`]; see `reader` for the pull-based [`BatchReader`]
//! the last of these returns. `sys` is the on-disk byte format and is not
//! part of the public API.

mod arrow_build;
pub mod calendar;
pub mod encoding;
pub mod endian;
pub mod error;
pub mod format;
pub mod metadata;
pub mod reader;
mod sys;
pub mod variable;

pub use crate::error::{Error, Utf8Policy, Warning};
pub use crate::metadata::{FileFormat, MultiResponseSet, SpssMetadata, ValueLabelSet};
pub use crate::reader::{open_batch_reader, read_sav, read_sav_metadata, BatchReader};
pub use crate::variable::{Alignment, LogicalVariable, Measure, MissingRule, MissingValue, VarWidth};
