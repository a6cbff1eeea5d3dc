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

//! The row decoder (`spec.md` §4.6): drives the cell stream (raw or through
//! [`CompressionVm`]) and assembles each logical variable's value from the
//! cells belonging to it.
//!
//! For a `.zsav` body, the caller is expected to have already wrapped the
//! file in a [`super::zsav::ZsavBlockStream`] before handing it to
//! [`RowDecoder::new`] — by the time a row decoder sees the stream, the
//! deflate layer is gone and only the byte-code compression (if any)
//! remains, exactly as for an uncompressed `.sav`'s body.

use std::io::Read;

use binrw::Endian;
use encoding_rs::Encoding;

use crate::error::{CorruptStage, Error, Utf8Policy};
use crate::sys::compression::{Cell, CompressionVm};
use crate::sys::header::{parse_f64, try_read_bytes_raw, ReadOutcome};
use crate::variable::{LogicalVariable, VarWidth};

/// One decoded cell value, not yet typed into an Arrow column (that mapping
/// depends on the variable's print format, done by [`crate::arrow_build`]).
#[derive(Clone, Debug, PartialEq)]
pub enum RowValue {
    /// `None` is the system-missing value.
    Number(Option<f64>),
    Str(String),
}

/// Whether the body stream is further compressed by the byte-code VM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellCompression {
    None,
    ByteCode,
}

/// Reads successive rows from a case-data body stream.
pub struct RowDecoder<R> {
    reader: R,
    vm: Option<CompressionVm>,
    endian: Endian,
    utf8_policy: Utf8Policy,
    /// A cell read ahead of time to detect whether another row exists at
    /// all, without yet knowing which variable will consume it.
    buffered: Option<Cell>,
}

impl<R: Read> RowDecoder<R> {
    pub fn new(
        reader: R,
        compression: CellCompression,
        bias: f64,
        endian: Endian,
        utf8_policy: Utf8Policy,
    ) -> RowDecoder<R> {
        let vm = match compression {
            CellCompression::ByteCode => Some(CompressionVm::new(bias)),
            CellCompression::None => None,
        };
        RowDecoder {
            reader,
            vm,
            endian,
            utf8_policy,
            buffered: None,
        }
    }

    /// Reads the next cell, distinguishing a clean end of stream (`Ok(None)`)
    /// from a stream that ends partway through a cell — the latter is always
    /// a truncated row at `(row, column)`, never a clean stop.
    fn try_next_cell(&mut self, row: u64, column: usize) -> Result<Option<Cell>, Error> {
        match &mut self.vm {
            Some(vm) => {
                let cell = vm.next_cell(&mut self.reader, self.endian, row, column)?;
                Ok((cell != Cell::End).then_some(cell))
            }
            None => match try_read_bytes_raw::<_, 8>(&mut self.reader)? {
                ReadOutcome::Full(bytes) => Ok(Some(Cell::Data(bytes))),
                ReadOutcome::Eof => Ok(None),
                ReadOutcome::Partial => Err(Error::Truncated { row, column }),
            },
        }
    }

    /// A cell that must exist: used for every read after the first cell of
    /// a row, where a clean end of stream is truncation, not "no more
    /// rows".
    fn next_cell(&mut self, row: u64, column: usize) -> Result<Cell, Error> {
        if let Some(cell) = self.buffered.take() {
            return Ok(cell);
        }
        self.try_next_cell(row, column)?
            .ok_or(Error::Truncated { row, column })
    }

    /// Decodes the next row, or returns `Ok(None)` if the stream ends
    /// cleanly at a row boundary (no cells read at all for this call).
    pub fn next_row(
        &mut self,
        logical: &[LogicalVariable],
        encoding: &'static Encoding,
        row_index: u64,
    ) -> Result<Option<Vec<RowValue>>, Error> {
        let Some(first) = self.try_next_cell(row_index, 0)? else {
            return Ok(None);
        };
        self.buffered = Some(first);

        let mut values = Vec::with_capacity(logical.len());
        for (column, var) in logical.iter().enumerate() {
            values.push(self.read_variable(var, encoding, row_index, column)?);
        }
        Ok(Some(values))
    }

    fn read_variable(
        &mut self,
        var: &LogicalVariable,
        encoding: &'static Encoding,
        row: u64,
        column: usize,
    ) -> Result<RowValue, Error> {
        match var.width {
            VarWidth::Numeric => {
                let cell = self.next_cell(row, column)?;
                Ok(RowValue::Number(cell_to_number(cell, self.endian, row, column)?))
            }
            VarWidth::String(width) if var.is_vls => {
                let _ = width;
                self.read_vls(var, encoding, row, column)
            }
            VarWidth::String(width) => {
                let n_cells = (width as usize).div_ceil(8);
                let mut bytes = Vec::with_capacity(n_cells * 8);
                for _ in 0..n_cells {
                    let cell = self.next_cell(row, column)?;
                    append_cell_bytes(cell, &mut bytes, row, column)?;
                }
                decode_trim(encoding, &bytes, self.utf8_policy, &var.name, row).map(RowValue::Str)
            }
        }
    }

    /// Reads a Very Long String variable: one `[4-byte length][data]`
    /// chunk per entry in `vls_chunk_widths`, skipping the unused cells at
    /// the tail of each chunk's fixed physical allocation (`spec.md` §4.6
    /// point 3).
    fn read_vls(
        &mut self,
        var: &LogicalVariable,
        encoding: &'static Encoding,
        row: u64,
        column: usize,
    ) -> Result<RowValue, Error> {
        let mut text = Vec::with_capacity(var.storage_width);
        for &chunk_width in &var.vls_chunk_widths {
            let total_cells = (chunk_width as usize).div_ceil(8);
            let mut chunk_bytes = Vec::with_capacity(total_cells * 8);
            let first = self.next_cell(row, column)?;
            append_cell_bytes(first, &mut chunk_bytes, row, column)?;

            let length = u32::from_le_bytes(chunk_bytes[0..4].try_into().unwrap()) as usize;
            let data_cells = (length + 4).div_ceil(8).max(1);
            for _ in 1..data_cells {
                let cell = self.next_cell(row, column)?;
                append_cell_bytes(cell, &mut chunk_bytes, row, column)?;
            }
            if chunk_bytes.len() < 4 + length {
                return Err(Error::corrupt(
                    CorruptStage::Row,
                    format!(
                        "very long string chunk claims {length} bytes but only {} were read",
                        chunk_bytes.len() - 4
                    ),
                ));
            }
            text.extend_from_slice(&chunk_bytes[4..4 + length]);

            for _ in data_cells..total_cells {
                let cell = self.next_cell(row, column)?;
                let _ = cell;
            }
        }
        decode_trim(encoding, &text, self.utf8_policy, &var.name, row).map(RowValue::Str)
    }
}

fn cell_to_number(cell: Cell, endian: Endian, row: u64, column: usize) -> Result<Option<f64>, Error> {
    match cell {
        Cell::Data(bytes) => {
            let raw = parse_f64(endian, bytes);
            Ok((raw != -f64::MAX).then_some(raw))
        }
        Cell::SysMiss => Ok(None),
        Cell::Blank | Cell::End => Err(Error::corrupt(
            CorruptStage::Row,
            format!("unexpected non-numeric cell in numeric column {column}, row {row}"),
        )),
    }
}

fn append_cell_bytes(cell: Cell, buf: &mut Vec<u8>, row: u64, column: usize) -> Result<(), Error> {
    match cell {
        Cell::Data(bytes) => buf.extend_from_slice(&bytes),
        Cell::Blank => buf.extend_from_slice(&[b' '; 8]),
        Cell::SysMiss | Cell::End => {
            return Err(Error::corrupt(
                CorruptStage::Row,
                format!("unexpected non-string cell in string column {column}, row {row}"),
            ));
        }
    }
    Ok(())
}

fn decode_trim(
    encoding: &'static Encoding,
    bytes: &[u8],
    policy: Utf8Policy,
    variable: &str,
    row: u64,
) -> Result<String, Error> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors && policy == Utf8Policy::Strict {
        return Err(Error::InvalidUtf8 {
            variable: variable.to_string(),
            row,
        });
    }
    Ok(text.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::format::Format;
    use crate::variable::{Alignment, Measure, MissingRule};

    fn numeric_var(name: &str) -> LogicalVariable {
        LogicalVariable {
            name: name.to_string(),
            width: VarWidth::Numeric,
            print_format: Format::from_raw(5, 8, 2),
            write_format: Format::from_raw(5, 8, 2),
            label: None,
            missing: MissingRule::default(),
            segments: vec![0],
            display_width: 8,
            alignment: Alignment::Right,
            measure: Measure::Unknown,
            storage_width: 8,
            is_vls: false,
            vls_chunk_widths: Vec::new(),
        }
    }

    fn string_var(name: &str, width: u16) -> LogicalVariable {
        LogicalVariable {
            name: name.to_string(),
            width: VarWidth::String(width),
            print_format: Format::from_raw(1, width as u8, 0),
            write_format: Format::from_raw(1, width as u8, 0),
            label: None,
            missing: MissingRule::default(),
            segments: (0..(width as usize).div_ceil(8)).collect(),
            display_width: width.min(32) as u32,
            alignment: Alignment::Left,
            measure: Measure::Unknown,
            storage_width: width as usize,
            is_vls: false,
            vls_chunk_widths: Vec::new(),
        }
    }

    #[test]
    fn decodes_one_uncompressed_numeric_row_and_then_ends_cleanly() {
        let mut data = 42.5f64.to_le_bytes().to_vec();
        let reader = Cursor::new(data.split_off(0));
        let mut decoder = RowDecoder::new(reader, CellCompression::None, 0.0, Endian::Little, Utf8Policy::Lossy);
        let vars = vec![numeric_var("x")];
        let row = decoder
            .next_row(&vars, encoding_rs::UTF_8, 0)
            .unwrap()
            .unwrap();
        assert_eq!(row, vec![RowValue::Number(Some(42.5))]);
        assert!(decoder.next_row(&vars, encoding_rs::UTF_8, 1).unwrap().is_none());
    }

    #[test]
    fn short_string_is_trimmed_of_trailing_padding() {
        let mut data = Vec::new();
        data.extend_from_slice(b"hi      "); // 8 bytes, "hi" + padding
        let reader = Cursor::new(data);
        let mut decoder = RowDecoder::new(reader, CellCompression::None, 0.0, Endian::Little, Utf8Policy::Lossy);
        let vars = vec![string_var("s", 5)];
        let row = decoder
            .next_row(&vars, encoding_rs::UTF_8, 0)
            .unwrap()
            .unwrap();
        assert_eq!(row, vec![RowValue::Str("hi".to_string())]);
    }

    #[test]
    fn truncated_row_is_an_error_not_a_clean_end() {
        let data = 1.0f64.to_le_bytes()[0..4].to_vec();
        let reader = Cursor::new(data);
        let mut decoder = RowDecoder::new(reader, CellCompression::None, 0.0, Endian::Little, Utf8Policy::Lossy);
        let vars = vec![numeric_var("x")];
        let err = decoder.next_row(&vars, encoding_rs::UTF_8, 0).unwrap_err();
        assert!(matches!(err, Error::Truncated { row: 0, column: 0 }));
    }

    #[test]
    fn compressed_sysmis_decodes_to_none() {
        let word = [255u8, 0, 0, 0, 0, 0, 0, 0];
        let reader = Cursor::new(word.to_vec());
        let mut decoder = RowDecoder::new(reader, CellCompression::ByteCode, 100.0, Endian::Little, Utf8Policy::Lossy);
        let vars = vec![numeric_var("x")];
        let row = decoder
            .next_row(&vars, encoding_rs::UTF_8, 0)
            .unwrap()
            .unwrap();
        assert_eq!(row, vec![RowValue::Number(None)]);
    }

    #[test]
    fn very_long_string_reassembles_across_chunk_boundary() {
        // One chunk, declared width 16 (2 cells), actual length 3 ("abc").
        let mut word = Vec::new();
        word.extend_from_slice(&3u32.to_le_bytes());
        word.extend_from_slice(b"abc\0"); // first cell: 4-byte length + 3 data bytes + 1 pad
        word.extend_from_slice(&[0u8; 8]); // second cell: unused tail, skipped
        let reader = Cursor::new(word);
        let mut decoder = RowDecoder::new(reader, CellCompression::None, 0.0, Endian::Little, Utf8Policy::Lossy);
        let mut var = string_var("v", 16);
        var.is_vls = true;
        var.vls_chunk_widths = vec![16];
        let vars = vec![var];
        let row = decoder
            .next_row(&vars, encoding_rs::UTF_8, 0)
            .unwrap()
            .unwrap();
        assert_eq!(row, vec![RowValue::Str("abc".to_string())]);
    }
}
