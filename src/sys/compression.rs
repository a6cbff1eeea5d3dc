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

//! SPSS compression type 1: a byte-code virtual machine that expands a
//! stream of 8-byte command words, each holding eight opcodes, into a
//! stream of 8-byte data cells.

use std::collections::VecDeque;
use std::io::Read;

use binrw::Endian;

use crate::error::Error;
use crate::sys::header::{try_read_bytes_raw, ReadOutcome};

/// One decoded cell from the compression VM.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Cell {
    /// Raw bytes: either opcode `253`'s verbatim cell, or a small integer
    /// `opcode - bias` already encoded as an 8-byte `f64` (opcodes
    /// `1..=251`). A string-typed caller ignores the bytes of the latter
    /// and substitutes [`Cell::Blank`] padding instead — see `spec.md`
    /// §4.3.
    Data([u8; 8]),
    /// Opcode `255`: the system-missing sentinel.
    SysMiss,
    /// Opcode `254`: eight space bytes.
    Blank,
    /// Opcode `252`: the stream is sealed. Every later call returns this
    /// again without reading further.
    End,
}

/// A pull-based decoder for compression type 1, grounded on the teacher's
/// `Datum::read_compressed_chunk`.
///
/// Holds the opcodes of the current command word not yet consumed. A
/// command word is itself read lazily, only once its opcodes run out.
pub struct CompressionVm {
    pending: VecDeque<u8>,
    bias: f64,
    sealed: bool,
}

impl CompressionVm {
    pub fn new(bias: f64) -> CompressionVm {
        CompressionVm {
            pending: VecDeque::with_capacity(8),
            bias,
            sealed: false,
        }
    }

    /// Produces the next cell, reading more of `reader` as needed. `row` and
    /// `column` are only used to report [`Error::Truncated`] if the stream
    /// ends partway through a command word or a verbatim cell.
    pub fn next_cell<R: Read>(
        &mut self,
        reader: &mut R,
        endian: Endian,
        row: u64,
        column: usize,
    ) -> Result<Cell, Error> {
        if self.sealed {
            return Ok(Cell::End);
        }
        loop {
            let Some(opcode) = self.pending.pop_front() else {
                match try_read_bytes_raw::<_, 8>(reader)? {
                    ReadOutcome::Full(word) => {
                        self.pending.extend(word);
                        continue;
                    }
                    ReadOutcome::Eof => {
                        self.sealed = true;
                        return Ok(Cell::End);
                    }
                    ReadOutcome::Partial => return Err(Error::Truncated { row, column }),
                }
            };
            match opcode {
                0 => continue,
                252 => {
                    self.sealed = true;
                    return Ok(Cell::End);
                }
                253 => {
                    // Having read the opcode commits the stream to one more
                    // raw word; even a clean EOF here is a truncated row.
                    match try_read_bytes_raw::<_, 8>(reader)? {
                        ReadOutcome::Full(raw) => return Ok(Cell::Data(raw)),
                        ReadOutcome::Eof | ReadOutcome::Partial => {
                            return Err(Error::Truncated { row, column });
                        }
                    }
                }
                254 => return Ok(Cell::Blank),
                255 => return Ok(Cell::SysMiss),
                code => {
                    let value = code as f64 - self.bias;
                    let bytes: [u8; 8] = match endian {
                        Endian::Big => value.to_be_bytes(),
                        Endian::Little => value.to_le_bytes(),
                    };
                    return Ok(Cell::Data(bytes));
                }
            }
        }
    }
}
