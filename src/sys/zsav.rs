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

//! The `.zsav` block index and the lazy Deflate stream it feeds.
//!
//! Grounded on the teacher's `ZHeader`/`RawZTrailer`/`ZBlock` (validation
//! logic kept close to identical) and `ZlibDecodeMultiple` (the forward
//! `Read` adapter), simplified from a `Read + Seek` writer-compatible
//! stream to a forward-only reader since `sav-arrow` never writes.

use std::io::{Read, Seek, SeekFrom};

use binrw::Endian;
use flate2::bufread::ZlibDecoder;

use crate::error::{CorruptStage, Error};
use crate::sys::header::{read_u32, read_u64, read_vec};

/// The 24-byte block index header, itself the body of a type-7/subtype-7
/// (zheader) extension record in spirit, but actually a bare trailer to
/// the dictionary with no record tag of its own.
#[derive(Clone, Copy, Debug)]
pub struct ZHeader {
    pub zheader_offset: u64,
    pub ztrailer_offset: u64,
    pub ztrailer_len: u64,
}

impl ZHeader {
    pub fn read<R: Read + Seek>(r: &mut R, endian: Endian) -> Result<ZHeader, Error> {
        let offset = r.stream_position()?;
        let zheader_offset = read_u64(r, endian)?;
        let ztrailer_offset = read_u64(r, endian)?;
        let ztrailer_len = read_u64(r, endian)?;
        if zheader_offset != offset {
            return Err(Error::corrupt(
                CorruptStage::Stream,
                format!(
                    "zlib header offset is {zheader_offset:#x} instead of expected {offset:#x}"
                ),
            ));
        }
        if ztrailer_offset < offset {
            return Err(Error::corrupt(
                CorruptStage::Stream,
                format!("impossible zlib trailer offset {ztrailer_offset:#x}"),
            ));
        }
        if ztrailer_len < 24 || ztrailer_len % 24 != 0 {
            return Err(Error::corrupt(
                CorruptStage::Stream,
                format!("invalid zlib trailer length {ztrailer_len}"),
            ));
        }
        Ok(ZHeader {
            zheader_offset,
            ztrailer_offset,
            ztrailer_len,
        })
    }
}

/// One block descriptor from the ztrailer.
#[derive(Clone, Copy, Debug)]
pub struct ZBlock {
    pub uncompressed_ofs: u64,
    pub compressed_ofs: u64,
    pub uncompressed_size: u32,
    pub compressed_size: u32,
}

impl ZBlock {
    /// Zlib's documented worst-case expansion is 13.5% plus 11 bytes; a
    /// block claiming more than that is corrupt rather than merely
    /// unlucky.
    fn has_plausible_sizes(&self) -> bool {
        self.uncompressed_size
            .checked_add(self.uncompressed_size / 7 + 11)
            .is_some_and(|max| self.compressed_size <= max)
    }
}

/// The parsed ztrailer: compression bias (again, for cross-checking against
/// the file header) and the block descriptor table.
pub struct ZTrailer {
    pub blocks: Vec<ZBlock>,
}

impl ZTrailer {
    pub fn read<R: Read + Seek>(
        r: &mut R,
        endian: Endian,
        header: &ZHeader,
        expected_bias: f64,
    ) -> Result<ZTrailer, Error> {
        r.seek(SeekFrom::Start(header.ztrailer_offset))?;
        let int_bias = read_f64_as_signed_int(r, endian)?;
        if int_bias != -expected_bias {
            return Err(Error::corrupt(
                CorruptStage::Stream,
                format!("zlib trailer bias {int_bias} does not match file header bias {expected_bias}"),
            ));
        }
        let zero = read_u64(r, endian)?;
        if zero != 0 {
            return Err(Error::corrupt(
                CorruptStage::Stream,
                format!("zlib trailer's reserved field is {zero}, expected zero"),
            ));
        }
        let _block_size = read_u32(r, endian)?;
        let n_blocks = read_u32(r, endian)?;
        let expected_n_blocks = (header.ztrailer_len - 24) / 24;
        if n_blocks as u64 != expected_n_blocks {
            return Err(Error::corrupt(
                CorruptStage::Stream,
                format!(
                    "zlib trailer declares {n_blocks} blocks but its length implies {expected_n_blocks}"
                ),
            ));
        }
        let mut blocks = Vec::with_capacity(n_blocks as usize);
        // Each block's offsets must pick up exactly where the previous one
        // left off; the body begins at the zheader's own offset and its
        // compressed region must end exactly where the ztrailer begins —
        // that end point is the body length the dictionary declares.
        let mut expected_uncompressed_ofs = header.zheader_offset;
        let mut expected_compressed_ofs = header.zheader_offset + 24;
        for (index, _) in (0..n_blocks).enumerate() {
            let uncompressed_ofs = read_u64(r, endian)?;
            let compressed_ofs = read_u64(r, endian)?;
            let uncompressed_size = read_u32(r, endian)?;
            let compressed_size = read_u32(r, endian)?;
            let block = ZBlock {
                uncompressed_ofs,
                compressed_ofs,
                uncompressed_size,
                compressed_size,
            };
            if block.uncompressed_ofs != expected_uncompressed_ofs {
                return Err(Error::corrupt(
                    CorruptStage::Stream,
                    format!(
                        "block {index} claims uncompressed offset {:#x}, expected {expected_uncompressed_ofs:#x}",
                        block.uncompressed_ofs
                    ),
                ));
            }
            if block.compressed_ofs != expected_compressed_ofs {
                return Err(Error::corrupt(
                    CorruptStage::Stream,
                    format!(
                        "block {index} claims compressed offset {:#x}, expected {expected_compressed_ofs:#x}",
                        block.compressed_ofs
                    ),
                ));
            }
            if !block.has_plausible_sizes() {
                return Err(Error::corrupt(
                    CorruptStage::Stream,
                    format!(
                        "block claims {} compressed bytes expanding to {} bytes, which zlib cannot produce",
                        block.compressed_size, block.uncompressed_size
                    ),
                ));
            }
            expected_uncompressed_ofs += block.uncompressed_size as u64;
            expected_compressed_ofs += block.compressed_size as u64;
            blocks.push(block);
        }
        if expected_compressed_ofs != header.ztrailer_offset {
            return Err(Error::corrupt(
                CorruptStage::Stream,
                format!(
                    "zlib blocks end at {expected_compressed_ofs:#x} but the ztrailer begins at {:#x}",
                    header.ztrailer_offset
                ),
            ));
        }
        Ok(ZTrailer { blocks })
    }
}

fn read_f64_as_signed_int<R: Read>(r: &mut R, endian: Endian) -> Result<f64, Error> {
    let raw = read_u64(r, endian)? as i64;
    Ok(raw as f64)
}

/// A forward-only `Read` over the decoded bytes of a `.zsav` body,
/// materializing one block's worth of decompressed bytes at a time. At
/// most one fully-decoded block plus the in-flight `ZlibDecoder` state for
/// the block being read is held at once, comfortably inside the "at most
/// two decoded blocks" budget in `spec.md` §4.2.
pub struct ZsavBlockStream<R> {
    reader: R,
    blocks: std::vec::IntoIter<ZBlock>,
    current: std::io::Cursor<Vec<u8>>,
}

impl<R: Read + Seek> ZsavBlockStream<R> {
    pub fn new(reader: R, blocks: Vec<ZBlock>) -> ZsavBlockStream<R> {
        ZsavBlockStream {
            reader,
            blocks: blocks.into_iter(),
            current: std::io::Cursor::new(Vec::new()),
        }
    }

    fn advance(&mut self) -> Result<bool, Error> {
        let Some(block) = self.blocks.next() else {
            return Ok(false);
        };
        self.reader.seek(SeekFrom::Start(block.compressed_ofs))?;
        let compressed = read_vec(&mut self.reader, block.compressed_size as usize)?;
        let mut decoder = ZlibDecoder::new(compressed.as_slice());
        let mut decoded = Vec::with_capacity(block.uncompressed_size as usize);
        decoder.read_to_end(&mut decoded)?;
        if decoded.len() as u32 != block.uncompressed_size {
            return Err(Error::corrupt(
                CorruptStage::Stream,
                format!(
                    "block decoded to {} bytes, expected {}",
                    decoded.len(),
                    block.uncompressed_size
                ),
            ));
        }
        self.current = std::io::Cursor::new(decoded);
        Ok(true)
    }
}

impl<R: Read + Seek> Read for ZsavBlockStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let n = self.current.read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            match self.advance() {
                Ok(true) => continue,
                Ok(false) => return Ok(0),
                Err(error) => return Err(std::io::Error::other(error.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_with_reasonable_expansion_is_plausible() {
        let block = ZBlock {
            uncompressed_ofs: 0,
            compressed_ofs: 0,
            uncompressed_size: 1000,
            compressed_size: 1100,
        };
        assert!(block.has_plausible_sizes());
    }

    #[test]
    fn block_claiming_impossible_expansion_is_not_plausible() {
        let block = ZBlock {
            uncompressed_ofs: 0,
            compressed_ofs: 0,
            uncompressed_size: 10,
            compressed_size: 1000,
        };
        assert!(!block.has_plausible_sizes());
    }
}
