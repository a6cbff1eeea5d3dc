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

//! A byte-level `.sav`/`.zsav` file builder for integration tests, grounded
//! on the teacher's `sys::sack` "SAv Construction Kit" but written as a
//! plain Rust builder instead of a parsed mini-language.
//!
//! Covers the three body encodings (`build_uncompressed`, `build_compressed`,
//! `build_zsav`), numeric and string variables, and Very Long String
//! variables chained across 255-wide chunks.

#![allow(dead_code)]

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

/// A single cell value. One [`Value`] per declared variable, per row.
#[derive(Clone)]
pub enum Value {
    Num(Option<f64>),
    Str(String),
}

impl Value {
    pub fn num(v: f64) -> Value {
        Value::Num(Some(v))
    }

    pub fn sysmis() -> Value {
        Value::Num(None)
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }
}

enum VarKind {
    Numeric,
    /// Width <= 255, a single head-plus-continuation string segment.
    Str(u16),
    /// Width > 255, chained across 255-wide chunks.
    Vls(u16),
}

struct VarDef {
    /// On-disk name (<=8 bytes). Auto-generated when the requested name
    /// doesn't fit.
    short: String,
    /// Present when `short` is a stand-in, carried via a subtype-13 record.
    long: Option<String>,
    kind: VarKind,
    print: (u16, u8, u8),
}

/// Bytes used for writing case data: numeric cells carry their system-missing
/// state through so the compressed encoder can pick opcode 255 instead of a
/// verbatim cell.
enum CellSpec {
    Num(Option<f64>),
    Raw([u8; 8]),
}

/// A bias value baked into both the file header and (for `.zsav`) the zlib
/// trailer. Never exercised by `1..=251`-opcode encoding since this builder
/// only ever emits verbatim (253) and system-missing (255) opcodes, but the
/// two copies must still agree for `ZTrailer::read`'s cross-check.
const BIAS: f64 = 100.0;

/// Each full Very Long String chunk is declared at width 255 (32 cells, 256
/// bytes), of which the first 4 bytes are the chunk's own length prefix —
/// 252 bytes of actual content fit in a full chunk.
const VLS_CHUNK_CAPACITY: usize = 252;

pub struct SavBuilder {
    vars: Vec<VarDef>,
    rows: Vec<Vec<Value>>,
}

impl SavBuilder {
    pub fn new() -> SavBuilder {
        SavBuilder {
            vars: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn numeric_var(&mut self, name: &str, print: (u16, u8, u8)) -> &mut Self {
        self.push_var(name, VarKind::Numeric, print)
    }

    pub fn string_var(&mut self, name: &str, width: u16, print: (u16, u8, u8)) -> &mut Self {
        assert!(width <= 255, "use vls_var for widths over 255");
        self.push_var(name, VarKind::Str(width), print)
    }

    pub fn vls_var(&mut self, name: &str, total_width: u16, print: (u16, u8, u8)) -> &mut Self {
        assert!(total_width > 255, "use string_var for widths up to 255");
        self.push_var(name, VarKind::Vls(total_width), print)
    }

    fn push_var(&mut self, name: &str, kind: VarKind, print: (u16, u8, u8)) -> &mut Self {
        let (short, long) = make_short_name(self.vars.len(), name);
        self.vars.push(VarDef {
            short,
            long,
            kind,
            print,
        });
        self
    }

    pub fn row(&mut self, values: Vec<Value>) -> &mut Self {
        assert_eq!(values.len(), self.vars.len(), "row arity must match declared variables");
        self.rows.push(values);
        self
    }

    pub fn build_uncompressed(&self) -> Vec<u8> {
        let mut out = self.dictionary_bytes(0);
        for row in &self.rows {
            for cell in flatten_row(&self.vars, row) {
                write_uncompressed_cell(&mut out, &cell);
            }
        }
        out
    }

    pub fn build_compressed(&self) -> Vec<u8> {
        let mut out = self.dictionary_bytes(1);
        for row in &self.rows {
            for cell in flatten_row(&self.vars, row) {
                write_compressed_cell(&mut out, &cell);
            }
        }
        out
    }

    /// A `.zsav`: the dictionary, then a single zlib block wrapping the same
    /// byte-code-compressed row stream `build_compressed` would append
    /// (`.zsav` always carries inner byte-code compression regardless of
    /// whether the source file did, `sys::reader::open_body_reader`).
    pub fn build_zsav(&self) -> Vec<u8> {
        let mut out = self.dictionary_bytes(2);
        let mut inner = Vec::new();
        for row in &self.rows {
            for cell in flatten_row(&self.vars, row) {
                write_compressed_cell(&mut inner, &cell);
            }
        }

        let zheader_offset = out.len() as u64;
        let compressed = deflate(&inner);
        let compressed_ofs = zheader_offset + 24;
        let ztrailer_offset = compressed_ofs + compressed.len() as u64;
        let n_blocks: u32 = 1;
        let ztrailer_len: u64 = 24 + 24 * n_blocks as u64;

        out.extend_from_slice(&zheader_offset.to_le_bytes());
        out.extend_from_slice(&ztrailer_offset.to_le_bytes());
        out.extend_from_slice(&ztrailer_len.to_le_bytes());
        out.extend_from_slice(&compressed);

        let int_bias = (-BIAS) as i64;
        out.extend_from_slice(&int_bias.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&(inner.len() as u32).to_le_bytes()); // block_size, informational
        out.extend_from_slice(&n_blocks.to_le_bytes());
        out.extend_from_slice(&zheader_offset.to_le_bytes()); // uncompressed_ofs
        out.extend_from_slice(&compressed_ofs.to_le_bytes());
        out.extend_from_slice(&(inner.len() as u32).to_le_bytes());
        out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        out
    }

    fn dictionary_bytes(&self, compression_code: u32) -> Vec<u8> {
        let mut out = Vec::new();
        let nominal_case_size: u32 = self
            .vars
            .iter()
            .map(|v| physical_count(&v.kind) as u32)
            .sum();
        let n_cases = self.rows.len() as u32;
        write_header(&mut out, nominal_case_size, compression_code, n_cases);

        let mut placeholder_counter = 0u32;
        for def in &self.vars {
            write_var_records(&mut out, def, &mut placeholder_counter);
        }

        write_text_extension(&mut out, 20, "UTF-8");

        let long_names: Vec<(&str, &str)> = self
            .vars
            .iter()
            .filter_map(|v| v.long.as_deref().map(|l| (v.short.as_str(), l)))
            .collect();
        if !long_names.is_empty() {
            let text = long_names
                .iter()
                .map(|(short, long)| format!("{short}={long}"))
                .collect::<Vec<_>>()
                .join("\t");
            write_text_extension(&mut out, 13, &text);
        }

        let vls_decls: Vec<(&str, u16)> = self
            .vars
            .iter()
            .filter_map(|v| match v.kind {
                VarKind::Vls(width) => Some((v.short.as_str(), width)),
                _ => None,
            })
            .collect();
        if !vls_decls.is_empty() {
            let text: String = vls_decls
                .iter()
                .map(|(short, width)| format!("{short}={width}\0"))
                .collect();
            write_text_extension(&mut out, 14, &text);
        }

        out.extend_from_slice(&999u32.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        out
    }
}

fn make_short_name(index: usize, name: &str) -> (String, Option<String>) {
    if name.len() <= 8 && name.is_ascii() {
        (name.to_string(), None)
    } else {
        (format!("V{index:07}"), Some(name.to_string()))
    }
}

fn physical_count(kind: &VarKind) -> usize {
    match *kind {
        VarKind::Numeric => 1,
        VarKind::Str(width) => (width as usize).div_ceil(8),
        VarKind::Vls(total_width) => (total_width as usize).div_ceil(VLS_CHUNK_CAPACITY) * 32,
    }
}

fn pad_bytes(s: &str, len: usize) -> Vec<u8> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.truncate(len);
    bytes.resize(len, b' ');
    bytes
}

fn write_header(out: &mut Vec<u8>, nominal_case_size: u32, compression_code: u32, n_cases: u32) {
    out.extend_from_slice(b"$FL2");
    out.extend_from_slice(&pad_bytes("sav-arrow test fixture", 60));
    out.extend_from_slice(&2u32.to_le_bytes()); // layout_code: little-endian
    out.extend_from_slice(&nominal_case_size.to_le_bytes());
    out.extend_from_slice(&compression_code.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // weight_index
    out.extend_from_slice(&n_cases.to_le_bytes());
    out.extend_from_slice(&BIAS.to_le_bytes());
    out.extend_from_slice(&pad_bytes("01 Jan 26", 9));
    out.extend_from_slice(&pad_bytes("00:00:00", 8));
    out.extend_from_slice(&pad_bytes("", 64));
    out.extend_from_slice(&[0u8; 3]); // trailing padding to 176 bytes
}

fn write_format(out: &mut Vec<u8>, (type_code, width, decimals): (u16, u8, u8)) {
    let packed = ((type_code as u32) << 16) | ((width as u32) << 8) | decimals as u32;
    out.extend_from_slice(&packed.to_le_bytes());
}

fn write_var_head(out: &mut Vec<u8>, width: i32, name: &str, print: (u16, u8, u8)) {
    out.extend_from_slice(&2u32.to_le_bytes()); // record type
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // has_label
    out.extend_from_slice(&0i32.to_le_bytes()); // missing_code
    write_format(out, print);
    write_format(out, print);
    out.extend_from_slice(&pad_bytes(name, 8));
}

fn write_var_continuation(out: &mut Vec<u8>) {
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(-1i32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    write_format(out, (0, 0, 0));
    write_format(out, (0, 0, 0));
    out.extend_from_slice(&[b' '; 8]);
}

fn write_var_records(out: &mut Vec<u8>, def: &VarDef, placeholder_counter: &mut u32) {
    match def.kind {
        VarKind::Numeric => write_var_head(out, 0, &def.short, def.print),
        VarKind::Str(width) => {
            write_var_head(out, width as i32, &def.short, def.print);
            for _ in 1..(width as usize).div_ceil(8) {
                write_var_continuation(out);
            }
        }
        VarKind::Vls(total_width) => {
            let n_chunks = (total_width as usize).div_ceil(VLS_CHUNK_CAPACITY);
            for i in 0..n_chunks {
                let chunk_name = if i == 0 {
                    def.short.clone()
                } else {
                    *placeholder_counter += 1;
                    format!("Z{:07}", *placeholder_counter)
                };
                write_var_head(out, 255, &chunk_name, def.print);
                for _ in 1..32 {
                    write_var_continuation(out);
                }
            }
        }
    }
}

fn write_text_extension(out: &mut Vec<u8>, subtype: u32, text: &str) {
    let bytes = text.as_bytes();
    out.extend_from_slice(&7u32.to_le_bytes()); // record type
    out.extend_from_slice(&subtype.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes()); // item size: one byte
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

/// Expands one row into its physical cell sequence, in declaration order.
fn flatten_row(vars: &[VarDef], row: &[Value]) -> Vec<CellSpec> {
    let mut cells = Vec::new();
    for (def, value) in vars.iter().zip(row) {
        match (&def.kind, value) {
            (VarKind::Numeric, Value::Num(n)) => cells.push(CellSpec::Num(*n)),
            (VarKind::Str(width), Value::Str(s)) => {
                let total = (*width as usize).div_ceil(8) * 8;
                let mut bytes = s.as_bytes().to_vec();
                bytes.truncate(total);
                bytes.resize(total, b' ');
                for chunk in bytes.chunks_exact(8) {
                    cells.push(CellSpec::Raw(chunk.try_into().unwrap()));
                }
            }
            (VarKind::Vls(total_width), Value::Str(s)) => {
                let n_chunks = (*total_width as usize).div_ceil(VLS_CHUNK_CAPACITY);
                let value_bytes = s.as_bytes();
                for i in 0..n_chunks {
                    let start = (i * VLS_CHUNK_CAPACITY).min(value_bytes.len());
                    let end = ((i + 1) * VLS_CHUNK_CAPACITY).min(value_bytes.len());
                    let content = &value_bytes[start..end];
                    let mut buf = Vec::with_capacity(256);
                    buf.extend_from_slice(&(content.len() as u32).to_le_bytes());
                    buf.extend_from_slice(content);
                    buf.resize(256, 0);
                    for chunk in buf.chunks_exact(8) {
                        cells.push(CellSpec::Raw(chunk.try_into().unwrap()));
                    }
                }
            }
            _ => panic!("row value does not match declared variable kind"),
        }
    }
    cells
}

fn write_uncompressed_cell(out: &mut Vec<u8>, cell: &CellSpec) {
    match cell {
        CellSpec::Num(n) => out.extend_from_slice(&n.unwrap_or(-f64::MAX).to_le_bytes()),
        CellSpec::Raw(bytes) => out.extend_from_slice(bytes),
    }
}

/// Every compressed cell is a single-opcode command word (opcode 253 or 255,
/// followed by seven no-ops), rather than packing 8 opcodes per word — the
/// compression VM processes one opcode at a time regardless, and this keeps
/// the builder's cell-to-bytes mapping one-to-one.
fn write_compressed_cell(out: &mut Vec<u8>, cell: &CellSpec) {
    match cell {
        CellSpec::Num(None) => out.extend_from_slice(&[255, 0, 0, 0, 0, 0, 0, 0]),
        CellSpec::Num(Some(v)) => {
            out.extend_from_slice(&[253, 0, 0, 0, 0, 0, 0, 0]);
            out.extend_from_slice(&v.to_le_bytes());
        }
        CellSpec::Raw(bytes) => {
            out.extend_from_slice(&[253, 0, 0, 0, 0, 0, 0, 0]);
            out.extend_from_slice(bytes);
        }
    }
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("zlib encode into an in-memory buffer cannot fail");
    encoder.finish().expect("zlib finish into an in-memory buffer cannot fail")
}

/// Writes `bytes` to a new temporary file and returns the handle (keep it
/// alive for as long as the path is read).
pub fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    file.write_all(bytes).expect("write temp file");
    file
}
