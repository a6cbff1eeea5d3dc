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

//! Character encoding resolution for system files.
//!
//! A system file either declares its own encoding (a type-7/subtype-20
//! extension record holding an IANA name) or leaves the reader to guess from
//! the legacy subtype-3 "character code" integer. `sav-arrow` doesn't guess
//! from locale the way the teacher's `sys::encoding::default_encoding` does
//! (there is no "current locale" concept in a library call) — per
//! `spec.md` §9, it falls back to `windows-1252`.

use encoding_rs::{Encoding, WINDOWS_1252};

/// Resolves the character encoding to use for a system file's strings.
///
/// `declared` comes from the subtype-20 encoding record, if present.
/// `character_code` comes from the subtype-3 integer info record's
/// `character_code` field, if present and `declared` is absent. Returns the
/// resolved encoding and whether a [`Warning::NoDeclaredEncoding`] should be
/// reported for the fallback case.
///
/// [`Warning::NoDeclaredEncoding`]: crate::error::Warning::NoDeclaredEncoding
pub fn resolve_encoding(
    declared: Option<&str>,
    character_code: Option<i32>,
) -> (&'static Encoding, bool) {
    if let Some(name) = declared {
        if let Some(encoding) = Encoding::for_label(name.as_bytes()) {
            return (encoding, false);
        }
    }
    if let Some(codepage) = character_code {
        if let Some(name) = codepage_name(codepage) {
            if let Some(encoding) = Encoding::for_label(name.as_bytes()) {
                return (encoding, false);
            }
        }
    }
    (WINDOWS_1252, true)
}

/// A small table of legacy Windows/DOS code page numbers to IANA names,
/// covering the code pages that actually appear in the wild in system
/// files' subtype-3 `character_code` field. Grounded on the teacher's
/// `sys::encoding::CODEPAGE_NUMBER_TO_NAME` (there generated at build time
/// from a larger table; trimmed here to the common cases since `sav-arrow`
/// has no build script).
fn codepage_name(codepage: i32) -> Option<&'static str> {
    let name = match codepage {
        874 => "windows-874",
        932 => "shift_jis",
        936 => "gbk",
        949 => "euc-kr",
        950 => "big5",
        1250 => "windows-1250",
        1251 => "windows-1251",
        1252 => "windows-1252",
        1253 => "windows-1253",
        1254 => "windows-1254",
        1255 => "windows-1255",
        1256 => "windows-1256",
        1257 => "windows-1257",
        1258 => "windows-1258",
        65001 => "utf-8",
        _ => return None,
    };
    Some(name)
}
