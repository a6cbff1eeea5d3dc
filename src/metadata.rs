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

//! [`SpssMetadata`], the surfaced dictionary artifact described in
//! `spec.md` §3 and §6. Field names here are the external interface and
//! must not drift: the original Python binding's test suite
//! (`original_source/tests/test_metadata.py`) diffs these directly against
//! `pyreadstat`'s equivalent fields.

use indexmap::IndexMap;

use crate::variable::{Alignment, Measure, MissingRule};

/// A mapping from either numeric or string values to labels, shared by one
/// or more logical variables. `spec.md` §3's `ValueLabelSet`.
#[derive(Clone, Debug, Default)]
pub struct ValueLabelSet {
    /// Numeric value -> label, keyed by the bit pattern of the `f64` value
    /// (`to_bits()`) so the map can derive `Eq`/`Hash` without
    /// `ordered-float`. Empty for a string-keyed set.
    pub numeric_labels: IndexMap<u64, String>,
    /// String value -> label. Empty for a numeric-keyed set.
    pub string_labels: IndexMap<String, String>,
    /// Logical variable names sharing this set.
    pub variables: Vec<String>,
}

/// `spec.md` §3's `MultiResponseSet`.
#[derive(Clone, Debug)]
pub struct MultiResponseSet {
    pub name: String,
    pub label: String,
    pub is_dichotomy: bool,
    /// The counted value for a dichotomy set (e.g. `"1"`); unused for a
    /// category set.
    pub counted_value: Option<String>,
    pub variables: Vec<String>,
}

/// The complete dictionary artifact produced by reading a system file's
/// header and typed records, independent of whether any row data is ever
/// read.
#[derive(Clone, Debug)]
pub struct SpssMetadata {
    pub variable_names: Vec<String>,
    pub variable_labels: IndexMap<String, String>,
    pub variable_value_labels: IndexMap<String, ValueLabelSet>,
    /// Format string such as `F8.2`, `A255`, `DATE10`.
    pub spss_variable_types: IndexMap<String, String>,
    pub variable_measure: IndexMap<String, Measure>,
    pub variable_alignment: IndexMap<String, Alignment>,
    pub variable_storage_width: IndexMap<String, usize>,
    pub variable_display_width: IndexMap<String, u32>,
    pub variable_missing: IndexMap<String, MissingRule>,
    pub mr_sets: IndexMap<String, MultiResponseSet>,
    /// Free-form document lines (type-6 record), concatenated in file
    /// order.
    pub notes: Vec<String>,
    pub file_label: String,
    /// IANA name, e.g. `"UTF-8"` or `"windows-1252"`.
    pub file_encoding: String,
    pub number_rows: u64,
    pub number_columns: usize,
    pub file_format: FileFormat,
    /// Data-file and variable attributes (subtypes 17/18), additive beyond
    /// `spec.md`'s minimum field list (see `SPEC_FULL.md` §4.4).
    pub file_attributes: IndexMap<String, Vec<String>>,
    pub variable_attributes: IndexMap<String, IndexMap<String, Vec<String>>>,
}

/// `spec.md` §6's `file_format` enumeration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Sav,
    Zsav,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Sav => "sav",
            FileFormat::Zsav => "zsav",
        }
    }
}
