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

//! The 176-byte fixed file header, and the buffered primitive reads shared
//! by every other `sys` submodule.

use std::io::{ErrorKind, Read};

use binrw::Endian;

use crate::endian::FromBytes;
use crate::error::Error;

/// The outcome of reading a fixed-size chunk from a stream that may end at
/// any byte offset: a full read, a clean stop at the chunk boundary, or a
/// stop partway through.
pub(crate) enum ReadOutcome<const N: usize> {
    Full([u8; N]),
    Eof,
    Partial,
}

/// Reads exactly `N` bytes, distinguishing a clean end-of-file at the chunk
/// boundary from one that lands partway through. Used by the row decoder and
/// the compression VM, which treat the two very differently: a clean EOF
/// between cells can be a valid stopping point, a partial one is always a
/// truncated row (`spec.md` §4.6).
pub(crate) fn try_read_bytes_raw<R: Read, const N: usize>(
    r: &mut R,
) -> Result<ReadOutcome<N>, Error> {
    let mut buf = [0u8; N];
    let mut filled = 0;
    while filled < N {
        match r.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(ReadOutcome::Eof),
            Ok(0) => return Ok(ReadOutcome::Partial),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(ReadOutcome::Full(buf))
}

/// Reads exactly `N` bytes, reporting a clean end-of-file as `Ok(None)`.
/// A partial read is always an error here: there is no row/column context at
/// this level to report a [`Error::Truncated`], so it surfaces as a generic
/// dictionary-stage corruption. Callers that do have row/column context (the
/// row decoder, the compression VM) use [`try_read_bytes_raw`] instead.
pub(crate) fn try_read_bytes<R: Read, const N: usize>(
    r: &mut R,
) -> Result<Option<[u8; N]>, Error> {
    match try_read_bytes_raw(r)? {
        ReadOutcome::Full(buf) => Ok(Some(buf)),
        ReadOutcome::Eof => Ok(None),
        ReadOutcome::Partial => Err(Error::corrupt(
            crate::error::CorruptStage::Dictionary,
            "unexpected end of file partway through a read",
        )),
    }
}

/// Reads exactly `N` bytes, treating any end-of-file as an error. Used
/// everywhere a value is mandatory, such as the fixed header or the body of
/// a typed record.
pub(crate) fn read_bytes<R: Read, const N: usize>(r: &mut R) -> Result<[u8; N], Error> {
    try_read_bytes(r)?.ok_or_else(|| {
        Error::corrupt(
            crate::error::CorruptStage::Dictionary,
            "unexpected end of file",
        )
    })
}

pub(crate) fn read_u32<R: Read>(r: &mut R, endian: Endian) -> Result<u32, Error> {
    Ok(endian.parse(read_bytes::<_, 4>(r)?))
}

pub(crate) fn read_i32<R: Read>(r: &mut R, endian: Endian) -> Result<i32, Error> {
    Ok(endian.parse(read_bytes::<_, 4>(r)?))
}

pub(crate) fn read_u64<R: Read>(r: &mut R, endian: Endian) -> Result<u64, Error> {
    Ok(endian.parse(read_bytes::<_, 8>(r)?))
}

pub(crate) fn read_f64<R: Read>(r: &mut R, endian: Endian) -> Result<f64, Error> {
    Ok(endian.parse(read_bytes::<_, 8>(r)?))
}

/// Parses an already-in-hand byte array as a big- or little-endian
/// primitive. `FromBytes::parse` has no generics of its own (`T`/`N` belong
/// to the trait), so these give every caller a concrete, turbofish-free spot
/// to hang the type at instead of writing `endian.parse::<u32, 4>(...)`,
/// which doesn't type-check.
pub(crate) fn parse_u32(endian: Endian, bytes: [u8; 4]) -> u32 {
    endian.parse(bytes)
}

pub(crate) fn parse_i32(endian: Endian, bytes: [u8; 4]) -> i32 {
    endian.parse(bytes)
}

pub(crate) fn parse_u64(endian: Endian, bytes: [u8; 8]) -> u64 {
    endian.parse(bytes)
}

pub(crate) fn parse_f64(endian: Endian, bytes: [u8; 8]) -> f64 {
    endian.parse(bytes)
}

pub(crate) fn read_vec<R: Read>(r: &mut R, len: usize) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            Error::corrupt(crate::error::CorruptStage::Dictionary, "unexpected end of file")
        } else {
            Error::from(e)
        }
    })?;
    Ok(buf)
}

/// The compression scheme declared by the file header's `compression_code`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    None,
    ByteCode,
    Zlib,
}

impl Compression {
    pub fn from_code(code: u32) -> Result<Compression, Error> {
        match code {
            0 => Ok(Compression::None),
            1 => Ok(Compression::ByteCode),
            2 => Ok(Compression::Zlib),
            other => Err(Error::UnsupportedCompression(other)),
        }
    }
}

/// The fixed 176-byte header every system file begins with. String fields
/// are kept raw: the file's character encoding isn't known until the
/// dictionary's extension records have been read, so decoding them is
/// deferred to [`super::dictionary`].
pub struct RawFileHeader {
    pub magic: [u8; 4],
    pub product_name: [u8; 60],
    pub layout_code: u32,
    /// The header's claimed count of 8-byte physical variable positions.
    /// Called `nominal_case_size` in PSPP because it isn't always accurate
    /// for files with Very Long Strings; `sys::dictionary` trusts the
    /// number of type-2 records actually read instead.
    pub nominal_case_size: u32,
    pub compression: Compression,
    pub weight_index: u32,
    /// `None` if the header declares the case count unknown (`u32::MAX`).
    pub n_cases: Option<u32>,
    pub bias: f64,
    pub creation_date: [u8; 9],
    pub creation_time: [u8; 8],
    pub file_label: [u8; 64],
    pub endian: Endian,
}

impl RawFileHeader {
    pub const SIZE: usize = 176;

    pub fn read<R: Read>(r: &mut R) -> Result<RawFileHeader, Error> {
        let bytes = read_vec(r, Self::SIZE)?;
        let magic: [u8; 4] = bytes[0..4].try_into().unwrap();
        if &magic != b"$FL2" && &magic != b"$FL3" {
            return Err(Error::BadMagic(magic));
        }
        let product_name: [u8; 60] = bytes[4..64].try_into().unwrap();

        // The layout code is the endianness marker: read first as
        // little-endian, and if that doesn't look like a plausible layout
        // code (2 or 3), try big-endian before giving up.
        let raw_layout = &bytes[64..68];
        let (endian, layout_code) = {
            let little = u32::from_le_bytes(raw_layout.try_into().unwrap());
            if little == 2 || little == 3 {
                (Endian::Little, little)
            } else {
                let big = u32::from_be_bytes(raw_layout.try_into().unwrap());
                (Endian::Big, big)
            }
        };
        if endian != Endian::Little {
            return Err(Error::UnsupportedLayout(layout_code));
        }

        let nominal_case_size = parse_u32(endian, bytes[68..72].try_into().unwrap());
        let compression_code = parse_u32(endian, bytes[72..76].try_into().unwrap());
        let compression = Compression::from_code(compression_code)?;
        let weight_index = parse_u32(endian, bytes[76..80].try_into().unwrap());
        let n_cases_raw = parse_u32(endian, bytes[80..84].try_into().unwrap());
        let n_cases = (n_cases_raw != u32::MAX).then_some(n_cases_raw);
        let bias = parse_f64(endian, bytes[84..92].try_into().unwrap());
        let creation_date: [u8; 9] = bytes[92..101].try_into().unwrap();
        let creation_time: [u8; 8] = bytes[101..109].try_into().unwrap();
        let file_label: [u8; 64] = bytes[109..173].try_into().unwrap();
        // 3 bytes of padding follow, already consumed by `Self::SIZE`.

        Ok(RawFileHeader {
            magic,
            product_name,
            layout_code,
            nominal_case_size,
            compression,
            weight_index,
            n_cases,
            bias,
            creation_date,
            creation_time,
            file_label,
            endian,
        })
    }
}
