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

//! Print/write format codes.
//!
//! A system file variable record stores its print and write formats as a
//! `(type code, width, decimals)` triple. [`Type`] is that code, decoded;
//! [`Format`] is the full triple together with a `Display` impl that
//! reproduces the textual form (e.g. `F8.2`, `A255`, `DATE10`) that
//! [`crate::metadata::SpssMetadata::spss_variable_types`] surfaces.

use std::fmt::{Display, Formatter, Result as FmtResult};

/// The semantic category a [`Type`] falls into, which is all the row decoder
/// and Arrow builder need to know to pick an Arrow type (`spec.md` §3,
/// "Arrow logical types produced").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    /// Plain numeric display (`F`, `COMMA`, `DOT`, `DOLLAR`, `PCT`, and
    /// other numeric formats not listed below); Arrow `Float64`.
    Numeric,
    /// A calendar date; Arrow `Date32`.
    Date,
    /// A calendar date and time; Arrow `Timestamp(Microsecond)`.
    Datetime,
    /// An elapsed duration; Arrow `Duration(Microsecond)`.
    Duration,
    /// A string; Arrow `Utf8`.
    String,
}

/// A print or write format type code, as stored in a variable record.
///
/// The numeric values match the SPSS/PSPP on-disk format codes, recorded in
/// [`Type::from_raw_code`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Type {
    A,
    AHex,
    Comma,
    Dollar,
    F,
    IB,
    PIBHex,
    P,
    PIB,
    PK,
    RB,
    RBHex,
    Z,
    N,
    E,
    Date,
    Time,
    DateTime,
    ADate,
    JDate,
    DTime,
    WkDay,
    Month,
    MoYr,
    QYr,
    WkYr,
    Pct,
    Dot,
    EDate,
    SDate,
    CC,
    /// A format code this reader doesn't recognize. Carries the raw code so
    /// it can still be displayed and round-tripped into
    /// `spss_variable_types`.
    Other(u16),
}

impl Type {
    /// Decodes a raw on-disk format type code.
    ///
    /// Grounded on the teacher's `impl From<Type> for u16` table in
    /// `format.rs`, inverted.
    pub fn from_raw_code(code: u16) -> Type {
        match code {
            1 => Type::A,
            2 => Type::AHex,
            3 => Type::Comma,
            4 => Type::Dollar,
            5 => Type::F,
            6 => Type::IB,
            7 => Type::PIBHex,
            8 => Type::P,
            9 => Type::PIB,
            10 => Type::PK,
            11 => Type::RB,
            12 => Type::RBHex,
            15 => Type::Z,
            16 => Type::N,
            17 => Type::E,
            20 => Type::Date,
            21 => Type::Time,
            22 => Type::DateTime,
            23 => Type::ADate,
            24 => Type::JDate,
            25 => Type::DTime,
            26 => Type::WkDay,
            27 => Type::Month,
            28 => Type::MoYr,
            29 => Type::QYr,
            30 => Type::WkYr,
            31 => Type::Pct,
            32 => Type::Dot,
            38 => Type::EDate,
            39 => Type::SDate,
            33..=36 => Type::CC,
            other => Type::Other(other),
        }
    }

    /// The name used in the textual form (`F`, `A`, `DATE`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            Type::A => "A",
            Type::AHex => "AHEX",
            Type::Comma => "COMMA",
            Type::Dollar => "DOLLAR",
            Type::F => "F",
            Type::IB => "IB",
            Type::PIBHex => "PIBHEX",
            Type::P => "P",
            Type::PIB => "PIB",
            Type::PK => "PK",
            Type::RB => "RB",
            Type::RBHex => "RBHEX",
            Type::Z => "Z",
            Type::N => "N",
            Type::E => "E",
            Type::Date => "DATE",
            Type::Time => "TIME",
            Type::DateTime => "DATETIME",
            Type::ADate => "ADATE",
            Type::JDate => "JDATE",
            Type::DTime => "DTIME",
            Type::WkDay => "WKDAY",
            Type::Month => "MONTH",
            Type::MoYr => "MOYR",
            Type::QYr => "QYR",
            Type::WkYr => "WKYR",
            Type::Pct => "PCT",
            Type::Dot => "DOT",
            Type::EDate => "EDATE",
            Type::SDate => "SDATE",
            Type::CC => "CC",
            Type::Other(_) => "UNKNOWN",
        }
    }

    /// The Arrow-relevant category of this format. Width and decimals never
    /// affect this (`spec.md` §3: "The mapping is determined solely by the
    /// print format code").
    pub fn category(&self) -> Category {
        match self {
            Type::A | Type::AHex => Category::String,
            Type::Date
            | Type::ADate
            | Type::EDate
            | Type::JDate
            | Type::SDate
            | Type::MoYr
            | Type::QYr
            | Type::WkYr
            | Type::Month => Category::Date,
            Type::DateTime => Category::Datetime,
            Type::DTime | Type::Time => Category::Duration,
            _ => Category::Numeric,
        }
    }

    fn takes_decimals(&self) -> bool {
        !matches!(
            self,
            Type::A
                | Type::AHex
                | Type::Date
                | Type::ADate
                | Type::EDate
                | Type::JDate
                | Type::SDate
                | Type::WkDay
                | Type::Month
                | Type::MoYr
                | Type::QYr
                | Type::WkYr
        )
    }
}

/// A decoded `(type, width, decimals)` print or write format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Format {
    pub type_: Type,
    pub width: u16,
    pub decimals: u8,
}

impl Format {
    /// Builds a [`Format`] from the raw fields stored in a variable record.
    pub fn from_raw(type_code: u16, width: u8, decimals: u8) -> Format {
        Format {
            type_: Type::from_raw_code(type_code),
            width: width as u16,
            decimals,
        }
    }

    pub fn category(&self) -> Category {
        self.type_.category()
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}{}", self.type_.name(), self.width)?;
        if self.type_.takes_decimals() && self.decimals > 0 {
            write!(f, ".{}", self.decimals)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_format_displays_with_decimals() {
        let format = Format::from_raw(5, 8, 2);
        assert_eq!(format.to_string(), "F8.2");
        assert_eq!(format.category(), Category::Numeric);
    }

    #[test]
    fn string_format_displays_without_decimals() {
        let format = Format::from_raw(1, 255, 0);
        assert_eq!(format.to_string(), "A255");
        assert_eq!(format.category(), Category::String);
    }

    #[test]
    fn date_formats_map_to_the_date_category() {
        for code in [20u16, 23, 38, 24, 39, 28, 29, 30] {
            assert_eq!(Format::from_raw(code, 10, 0).category(), Category::Date);
        }
    }

    #[test]
    fn datetime_and_duration_formats() {
        assert_eq!(Format::from_raw(22, 20, 0).category(), Category::Datetime);
        assert_eq!(Format::from_raw(25, 10, 0).category(), Category::Duration);
        assert_eq!(Format::from_raw(21, 10, 0).category(), Category::Duration);
    }

    #[test]
    fn unrecognized_code_is_preserved_for_display() {
        let format = Format::from_raw(9999, 8, 0);
        assert_eq!(format.to_string(), "UNKNOWN8");
        assert_eq!(format.category(), Category::Numeric);
    }
}
