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

//! The on-disk system file format: header, typed records, the compression
//! VM, the `.zsav` block stream, the variable assembler, and the row
//! decoder. Everything above `sys` operates on the decoded
//! [`crate::metadata::SpssMetadata`] and Arrow arrays; everything in `sys`
//! speaks bytes.

pub mod compression;
pub mod dictionary;
pub mod header;
pub mod records;
pub mod rows;
pub mod zsav;
