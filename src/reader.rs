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

//! The public API (`spec.md` §4.8 and §6): `read_sav`, `read_sav_metadata`,
//! `open_batch_reader`, and the [`BatchReader`] handle the last of these
//! returns.
//!
//! Modeled as an explicit [`ReaderState`] the way the teacher's
//! `sys::raw::Reader` models its own state enum driving a pull-style
//! iterator: header and dictionary records are consumed eagerly up through
//! `DictionaryRead` (the point metadata becomes observable), row batches
//! are then pulled on demand in `Streaming`.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;

pub use crate::error::Utf8Policy;
use crate::arrow_build::BatchBuilder;
use crate::error::{Error, Warning};
use crate::metadata::SpssMetadata;
use crate::sys::dictionary::{read_dictionary, Dictionary};
use crate::sys::header::{Compression, RawFileHeader};
use crate::sys::rows::{CellCompression, RowDecoder};
use crate::sys::zsav::{ZHeader, ZTrailer, ZsavBlockStream};
use crate::variable::LogicalVariable;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReaderState {
    DictionaryRead,
    Streaming,
    Done,
    Failed,
}

/// Opens `path` and reads its header and dictionary, stopping at the
/// `DictionaryRead` commit point without reading any row data.
pub fn read_sav_metadata(
    path: impl AsRef<Path>,
    warn: &mut dyn FnMut(Warning),
) -> Result<SpssMetadata, Error> {
    let opened = open_and_read_dictionary(path.as_ref(), warn)?;
    Ok(opened.dictionary.metadata)
}

/// Reads the full file in one call: every row, materialized into Arrow
/// `RecordBatch`es of `batch_size` rows each, plus the dictionary metadata.
pub fn read_sav(
    path: impl AsRef<Path>,
    batch_size: usize,
    utf8_policy: Utf8Policy,
    warn: &mut dyn FnMut(Warning),
) -> Result<(Vec<RecordBatch>, SpssMetadata), Error> {
    let mut reader = open_batch_reader(path, batch_size, utf8_policy, warn)?;
    let metadata = reader.metadata().clone();
    let mut batches = Vec::new();
    while let Some(batch) = reader.next_batch()? {
        batches.push(batch);
    }
    Ok((batches, metadata))
}

/// Opens `path` for row-at-a-time batch pulls, stopping at `DictionaryRead`
/// until the caller starts requesting batches via [`BatchReader::next_batch`].
pub fn open_batch_reader(
    path: impl AsRef<Path>,
    batch_size: usize,
    utf8_policy: Utf8Policy,
    warn: &mut dyn FnMut(Warning),
) -> Result<BatchReader, Error> {
    let opened = open_and_read_dictionary(path.as_ref(), warn)?;
    let Dictionary {
        header,
        logical,
        metadata,
        encoding,
        ..
    } = opened.dictionary;

    let (body, compression) = open_body_reader(opened.reader, &header)?;
    let decoder = RowDecoder::new(body, compression, header.bias, header.endian, utf8_policy);

    let selected: Vec<usize> = (0..logical.len()).collect();
    let builder = BatchBuilder::new(project(&logical, &selected), batch_size);

    Ok(BatchReader {
        metadata,
        logical,
        selected,
        encoding,
        decoder,
        builder,
        batch_size,
        row_limit: None,
        rows_emitted: 0,
        next_row_index: 0,
        state: ReaderState::DictionaryRead,
    })
}

struct OpenedFile {
    reader: BufReader<File>,
    dictionary: Dictionary,
}

fn open_and_read_dictionary(path: &Path, warn: &mut dyn FnMut(Warning)) -> Result<OpenedFile, Error> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            Error::NotFound(path.to_path_buf())
        } else {
            Error::from(e)
        }
    })?;
    let mut reader = BufReader::new(file);
    let dictionary = read_dictionary(&mut reader, warn)?;
    Ok(OpenedFile { reader, dictionary })
}

/// Builds the body stream that the row decoder reads cells from: the raw
/// file for an uncompressed or byte-code-compressed `.sav`, or a
/// [`ZsavBlockStream`] for a `.zsav`, whose decoded output still carries the
/// inner byte-code compression.
fn open_body_reader(
    mut reader: BufReader<File>,
    header: &RawFileHeader,
) -> Result<(Box<dyn Read + Send>, CellCompression), Error> {
    match header.compression {
        Compression::None => Ok((Box::new(reader), CellCompression::None)),
        Compression::ByteCode => Ok((Box::new(reader), CellCompression::ByteCode)),
        Compression::Zlib => {
            let zheader = ZHeader::read(&mut reader, header.endian)?;
            let trailer = ZTrailer::read(&mut reader, header.endian, &zheader, header.bias)?;
            let stream = ZsavBlockStream::new(reader, trailer.blocks);
            Ok((Box::new(stream), CellCompression::ByteCode))
        }
    }
}

fn project(logical: &[LogicalVariable], indices: &[usize]) -> Vec<LogicalVariable> {
    indices.iter().map(|&i| logical[i].clone()).collect()
}

/// A pull-based handle over a single system file's row data, produced by
/// [`open_batch_reader`].
pub struct BatchReader {
    metadata: SpssMetadata,
    /// Every logical variable, in on-disk order; the row decoder always
    /// reads all of them (`spec.md` §4.7: segments are positionally
    /// encoded and cannot be skipped).
    logical: Vec<LogicalVariable>,
    /// Indices into `logical`, in the order batches are emitted in. Reset
    /// by [`Self::select`].
    selected: Vec<usize>,
    encoding: &'static encoding_rs::Encoding,
    decoder: RowDecoder<Box<dyn Read + Send>>,
    builder: BatchBuilder,
    batch_size: usize,
    row_limit: Option<u64>,
    rows_emitted: u64,
    next_row_index: u64,
    state: ReaderState,
}

impl BatchReader {
    pub fn metadata(&self) -> &SpssMetadata {
        &self.metadata
    }

    pub fn schema(&self) -> SchemaRef {
        self.builder.schema()
    }

    /// Restricts and reorders the columns future batches carry. Must be
    /// called before the first [`Self::next_batch`] (any batch already
    /// produced keeps its original schema).
    pub fn select(&mut self, names: &[&str]) -> Result<(), Error> {
        let mut indices = Vec::with_capacity(names.len());
        for &name in names {
            let index = self
                .logical
                .iter()
                .position(|v| v.name == name)
                .ok_or_else(|| Error::InvalidSelection(name.to_string()))?;
            indices.push(index);
        }
        self.selected = indices;
        self.builder = BatchBuilder::new(project(&self.logical, &self.selected), self.batch_size);
        Ok(())
    }

    /// Stops production after `n` rows total, flushing a partial final
    /// batch rather than discarding it.
    pub fn limit(&mut self, n: u64) {
        self.row_limit = Some(n);
    }

    /// Pulls the next batch, or `None` once the source (or the configured
    /// limit) is exhausted. Reading zero rows before the stream's natural
    /// end returns `None` without an empty [`RecordBatch`].
    pub fn next_batch(&mut self) -> Result<Option<RecordBatch>, Error> {
        if self.state == ReaderState::Done {
            return Ok(None);
        }
        self.state = ReaderState::Streaming;

        while !self.builder.is_full() {
            if self.row_limit.is_some_and(|limit| self.rows_emitted >= limit) {
                break;
            }
            let row = match self.decoder.next_row(&self.logical, self.encoding, self.next_row_index) {
                Ok(row) => row,
                Err(error) => {
                    self.state = ReaderState::Failed;
                    return Err(error);
                }
            };
            let Some(row) = row else {
                self.state = ReaderState::Done;
                break;
            };
            self.next_row_index += 1;
            self.rows_emitted += 1;

            let projected: Vec<_> = self.selected.iter().map(|&i| row[i].clone()).collect();
            self.builder.append_row(&projected);
        }

        if self.builder.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.builder.take_batch()))
        }
    }
}
