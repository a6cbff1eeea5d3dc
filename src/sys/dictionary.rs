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

//! The dictionary parser and variable assembler (`spec.md` §4.4 and §4.5).
//!
//! [`read_dictionary`] walks the header and every typed record once,
//! collecting raw bytes, then resolves the file's character encoding and
//! decodes everything, then runs the variable assembler (segment grouping,
//! long names, VLS resolution) to produce the final logical schema and
//! [`SpssMetadata`].

use std::io::{Read, Seek};

use binrw::Endian;
use encoding_rs::Encoding;
use indexmap::IndexMap;

use crate::encoding::resolve_encoding;
use crate::endian::FromBytes;
use crate::error::{CorruptStage, Error, Warning};
use crate::format::Format;
use crate::metadata::{FileFormat, MultiResponseSet, SpssMetadata, ValueLabelSet};
use crate::sys::header::{parse_u64, read_u32, read_vec, Compression, RawFileHeader};
use crate::sys::records::{
    parse_attributes, parse_long_names, parse_long_string_value_labels, parse_mr_sets,
    parse_variable_attributes, parse_var_display, parse_very_long_strings, read_document_record,
    ExtensionHeader, FloatInfoRecord, IntegerInfoRecord, RawValueLabelRecord, RawVariableRecord,
};
use crate::variable::{
    Alignment, LogicalVariable, Measure, MissingRule, MissingValue, PhysicalVariable, VarWidth,
};

/// Everything needed to start decoding rows, plus the metadata surfaced to
/// callers.
pub struct Dictionary {
    pub header: RawFileHeader,
    pub physical: Vec<PhysicalVariable>,
    pub logical: Vec<LogicalVariable>,
    pub metadata: SpssMetadata,
    pub encoding: &'static Encoding,
}

struct RawVarEntry {
    record: RawVariableRecord,
}

#[derive(Default)]
struct RawExtensions {
    character_code: Option<i32>,
    encoding_name: Option<String>,
    long_names: Option<Vec<u8>>,
    very_long_strings: Option<Vec<u8>>,
    display: Option<(Vec<u8>, u32)>,
    file_attributes: Option<Vec<u8>>,
    variable_attributes: Option<Vec<u8>>,
    long_string_value_labels: Option<Vec<u8>>,
    mr_sets: Option<Vec<u8>>,
    extended_case_count: Option<u64>,
}

/// Reads the full dictionary: fixed header plus every typed record, up to
/// and including the `999` end-of-dictionary marker.
pub fn read_dictionary<R: Read + Seek>(
    r: &mut R,
    warn: &mut dyn FnMut(Warning),
) -> Result<Dictionary, Error> {
    let header = RawFileHeader::read(r)?;
    let endian = header.endian;

    let mut raw_vars = Vec::new();
    let mut raw_value_labels = Vec::new();
    let mut document_lines = Vec::new();
    let mut ext = RawExtensions::default();

    loop {
        let rec_type = read_u32(r, endian)?;
        match rec_type {
            2 => raw_vars.push(RawVarEntry {
                record: RawVariableRecord::read(r, endian)?,
            }),
            3 => raw_value_labels.push(RawValueLabelRecord::read(r, endian)?),
            6 => document_lines.extend(read_document_record(r, endian)?),
            7 => read_extension_record(r, endian, &mut ext, warn)?,
            999 => {
                let _padding = read_vec(r, 4)?;
                break;
            }
            other => {
                return Err(Error::corrupt(
                    CorruptStage::Dictionary,
                    format!("unrecognized record type {other}"),
                ));
            }
        }
    }

    if raw_vars.len() != header.nominal_case_size as usize {
        return Err(Error::corrupt(
            CorruptStage::Dictionary,
            format!(
                "header declares {} physical variables but {} variable records were read",
                header.nominal_case_size,
                raw_vars.len()
            ),
        ));
    }

    let (encoding, used_fallback) = resolve_encoding(ext.encoding_name.as_deref(), ext.character_code);
    if used_fallback {
        warn(Warning::NoDeclaredEncoding);
    }
    let decode = |bytes: &[u8]| -> String { encoding.decode(bytes).0.trim_end().to_string() };

    // Physical table: one entry per type-2 record, in file order.
    let physical: Vec<PhysicalVariable> = raw_vars
        .iter()
        .enumerate()
        .map(|(index, entry)| PhysicalVariable {
            index,
            raw_width: entry.record.width,
            short_name: decode(&entry.record.name),
            logical_index: None,
        })
        .collect();

    let (mut logical, mut physical) = assemble_segments(physical, &raw_vars, &decode, warn)?;

    // Missing-value rules are positional against the as-assembled (pre-VLS,
    // pre-rename) logical list: one entry per head record, same order.
    apply_missing_rules(&mut logical, &raw_vars, endian);

    // VLS merge must run before long-name rename: the very-long-string
    // declaration and the long-name map are both keyed by the head chunk's
    // original short name, and merging preserves that name on the combined
    // variable (see `apply_vls`) for the rename below to still find it.
    if let Some(bytes) = &ext.very_long_strings {
        let text = decode(bytes);
        apply_vls(&mut logical, &parse_very_long_strings(&text))?;
    }

    if let Some(bytes) = &ext.long_names {
        let text = decode(bytes);
        apply_long_names(&mut logical, &parse_long_names(&text));
    }

    dedup_names(&mut logical, warn);

    // `physical[i].logical_index` was set by `assemble_segments` against
    // the pre-VLS logical list; VLS merging above can have shrunk and
    // reordered that list, so refresh the mapping before anything below
    // (value labels, the returned `Dictionary::physical`) relies on it.
    reindex_physical(&mut physical, &logical);

    if let Some((bytes, count)) = &ext.display {
        let entries = parse_var_display(bytes, logical.len(), *count, endian)?;
        apply_display(&mut logical, &entries);
    }

    let mut variable_value_labels: IndexMap<String, ValueLabelSet> = IndexMap::new();
    for raw in &raw_value_labels {
        apply_value_label_set(
            raw,
            &physical,
            &mut logical,
            &decode,
            endian,
            &mut variable_value_labels,
            warn,
        );
    }

    if let Some(bytes) = &ext.long_string_value_labels {
        for set in parse_long_string_value_labels(bytes, endian)? {
            let var_name = decode(&set.var_name);
            let entry = variable_value_labels.entry(var_name.clone()).or_default();
            entry.variables.push(var_name);
            for (value, label) in set.labels {
                entry.string_labels.insert(decode(&value), decode(&label));
            }
        }
    }

    let notes: Vec<String> = document_lines.iter().map(|line| decode(line)).collect();

    let file_attributes = ext
        .file_attributes
        .as_ref()
        .map(|bytes| parse_attributes(&decode(bytes)).into_iter().collect())
        .unwrap_or_default();

    let variable_attributes: IndexMap<String, IndexMap<String, Vec<String>>> = ext
        .variable_attributes
        .as_ref()
        .map(|bytes| {
            parse_variable_attributes(&decode(bytes))
                .into_iter()
                .map(|(name, attrs)| (name, attrs.into_iter().collect()))
                .collect()
        })
        .unwrap_or_default();

    let mut mr_sets: IndexMap<String, MultiResponseSet> = IndexMap::new();
    if let Some(bytes) = &ext.mr_sets {
        for raw in parse_mr_sets(&decode(bytes), warn) {
            mr_sets.insert(
                raw.name.clone(),
                MultiResponseSet {
                    name: raw.name,
                    label: raw.label,
                    is_dichotomy: raw.is_dichotomy,
                    counted_value: raw.counted_value,
                    variables: raw.variables,
                },
            );
        }
    }

    let number_rows = ext
        .extended_case_count
        .or(header.n_cases.map(u64::from))
        .unwrap_or(0);

    let variable_names: Vec<String> = logical.iter().map(|v| v.name.clone()).collect();
    let mut variable_labels = IndexMap::new();
    let mut spss_variable_types = IndexMap::new();
    let mut variable_measure = IndexMap::new();
    let mut variable_alignment = IndexMap::new();
    let mut variable_storage_width = IndexMap::new();
    let mut variable_display_width = IndexMap::new();
    let mut variable_missing = IndexMap::new();
    for v in &logical {
        if let Some(label) = &v.label {
            variable_labels.insert(v.name.clone(), label.clone());
        }
        spss_variable_types.insert(v.name.clone(), v.print_format.to_string());
        variable_measure.insert(v.name.clone(), v.measure);
        variable_alignment.insert(v.name.clone(), v.alignment);
        variable_storage_width.insert(v.name.clone(), v.storage_width);
        variable_display_width.insert(v.name.clone(), v.display_width);
        variable_missing.insert(v.name.clone(), v.missing.clone());
    }

    let metadata = SpssMetadata {
        number_columns: logical.len(),
        variable_names,
        variable_labels,
        variable_value_labels,
        spss_variable_types,
        variable_measure,
        variable_alignment,
        variable_storage_width,
        variable_display_width,
        variable_missing,
        mr_sets,
        notes,
        file_label: decode(&header.file_label),
        file_encoding: encoding.name().to_string(),
        number_rows,
        file_format: match header.compression {
            Compression::Zlib => FileFormat::Zsav,
            _ => FileFormat::Sav,
        },
        file_attributes,
        variable_attributes,
    };

    Ok(Dictionary {
        header,
        physical,
        logical,
        metadata,
        encoding,
    })
}

fn read_extension_record<R: Read>(
    r: &mut R,
    endian: Endian,
    ext: &mut RawExtensions,
    warn: &mut dyn FnMut(Warning),
) -> Result<(), Error> {
    let head = ExtensionHeader::read(r, endian)?;
    let len = head.byte_len()?;
    let data = read_vec(r, len)?;
    match head.subtype {
        3 => ext.character_code = Some(IntegerInfoRecord::parse(&data, endian)?.character_code),
        4 => {
            let float_info = FloatInfoRecord::parse(&data, endian)?;
            if float_info.sysmis != -f64::MAX {
                warn(Warning::UnexpectedSysmisSentinel {
                    claimed: float_info.sysmis.to_string(),
                    expected: (-f64::MAX).to_string(),
                });
            }
        }
        5 => (), // variable sets: not surfaced
        11 => ext.display = Some((data, head.count)),
        13 => ext.long_names = Some(data),
        14 => ext.very_long_strings = Some(data),
        16 => {
            if data.len() >= 8 {
                ext.extended_case_count = Some(parse_u64(endian, data[0..8].try_into().unwrap()));
            }
        }
        17 => ext.file_attributes = Some(data),
        18 => ext.variable_attributes = Some(data),
        20 => ext.encoding_name = Some(String::from_utf8_lossy(&data).trim().to_string()),
        21 => ext.long_string_value_labels = Some(data),
        22 => (), // long-string missing values: not yet surfaced
        7 => ext.mr_sets = Some(data),
        other => warn(Warning::UnknownExtensionSubtype(other)),
    }
    Ok(())
}

/// Segment grouping (`spec.md` §4.5 point 1).
fn assemble_segments(
    mut physical: Vec<PhysicalVariable>,
    raw_vars: &[RawVarEntry],
    decode: &dyn Fn(&[u8]) -> String,
    warn: &mut dyn FnMut(Warning),
) -> Result<(Vec<LogicalVariable>, Vec<PhysicalVariable>), Error> {
    let mut logical = Vec::new();
    let mut i = 0;
    while i < physical.len() {
        let entry = &raw_vars[i].record;
        if entry.width == -1 {
            return Err(Error::corrupt(
                CorruptStage::Dictionary,
                format!("physical variable {i} is a continuation with no preceding head"),
            ));
        }
        let width = if entry.width == 0 {
            VarWidth::Numeric
        } else {
            VarWidth::String(entry.width as u16)
        };
        let n_segments = width.n_dict_indexes();
        if i + n_segments > physical.len() {
            return Err(Error::corrupt(
                CorruptStage::Dictionary,
                format!("variable {i} declares more segments than remain in the physical table"),
            ));
        }
        for (offset, seg) in physical[i + 1..i + n_segments].iter().enumerate() {
            if seg.raw_width != -1 {
                return Err(Error::corrupt(
                    CorruptStage::Dictionary,
                    format!(
                        "expected a continuation segment at physical index {}",
                        i + 1 + offset
                    ),
                ));
            }
        }

        let segments: Vec<usize> = (i..i + n_segments).collect();
        for &seg in &segments {
            physical[seg].logical_index = Some(logical.len());
        }

        let name = decode(&entry.name);
        let print_format = Format::from_raw(entry.print_format.0, entry.print_format.1, entry.print_format.2);
        let write_format = Format::from_raw(entry.write_format.0, entry.write_format.1, entry.write_format.2);
        let storage_width = match width {
            VarWidth::Numeric => 8,
            VarWidth::String(w) => w as usize,
        };

        logical.push(LogicalVariable {
            name,
            width,
            print_format,
            write_format,
            label: entry.label.as_deref().map(decode),
            missing: MissingRule::default(),
            segments,
            display_width: width.default_display_width(),
            alignment: Alignment::default_for_width(width),
            measure: Measure::Unknown,
            storage_width,
            is_vls: false,
            vls_chunk_widths: Vec::new(),
        });

        i += n_segments;
    }
    let _ = warn; // reserved: segment grouping itself currently never warns.
    Ok((logical, physical))
}

/// Long variable names (`spec.md` §4.5 point 2).
fn apply_long_names(logical: &mut [LogicalVariable], names: &[(String, String)]) {
    for (short, long) in names {
        if let Some(var) = logical.iter_mut().find(|v| &v.name == short) {
            var.name = long.clone();
        }
    }
}

/// VLS resolution (`spec.md` §4.5 point 3): merges the chain of chunk
/// variables that a VLS declaration names into one logical column, removing
/// the ghost chunks so they never reach the caller.
///
/// Chunks are declared at width 255 (32 cells), but each chunk's first 4
/// content bytes are the segment's own length prefix (`sys::rows::read_vls`),
/// leaving 252 usable bytes per full chunk. `n_chunks` must be computed
/// against that 252-byte capacity, not the 255-byte declared width, or a
/// declaration landing exactly on a chunk boundary comes up one chunk short.
fn apply_vls(logical: &mut Vec<LogicalVariable>, declarations: &[(String, u16)]) -> Result<(), Error> {
    const CHUNK_CAPACITY: usize = 252;
    for (name, total_width) in declarations {
        let Some(start) = logical.iter().position(|v| &v.name == name) else {
            return Err(Error::corrupt(
                CorruptStage::Dictionary,
                format!("very long string declaration for {name:?} has no matching variable"),
            ));
        };
        let n_chunks = (*total_width as usize).div_ceil(CHUNK_CAPACITY);
        if start + n_chunks > logical.len() {
            return Err(Error::corrupt(
                CorruptStage::Dictionary,
                format!("very long string {name:?} declares more chunks than remain"),
            ));
        }

        let mut segments = Vec::new();
        let mut chunk_widths = Vec::new();
        for chunk in &logical[start..start + n_chunks] {
            if !chunk.var_type_is_string() {
                return Err(Error::corrupt(
                    CorruptStage::Dictionary,
                    format!("very long string {name:?} chunk is not a string variable"),
                ));
            }
            chunk_widths.push(chunk.storage_width as u16);
            segments.extend(chunk.segments.iter().copied());
        }

        let head = logical[start].clone();
        let merged = LogicalVariable {
            name: head.name,
            width: VarWidth::String(*total_width),
            print_format: head.print_format,
            write_format: head.write_format,
            label: head.label,
            missing: head.missing,
            segments,
            display_width: head.display_width,
            alignment: head.alignment,
            measure: head.measure,
            storage_width: *total_width as usize,
            is_vls: true,
            vls_chunk_widths: chunk_widths,
        };
        logical.splice(start..start + n_chunks, std::iter::once(merged));
    }
    Ok(())
}

/// Renames any logical variable whose name collides with an earlier one
/// (long names and VLS resolution can both introduce collisions), appending
/// a numeric suffix until the name is unique.
fn dedup_names(logical: &mut [LogicalVariable], warn: &mut dyn FnMut(Warning)) {
    let mut seen = std::collections::HashSet::new();
    for var in logical.iter_mut() {
        if seen.insert(var.name.clone()) {
            continue;
        }
        let mut suffix = 1u32;
        let renamed = loop {
            let candidate = format!("{}_{suffix}", var.name);
            if seen.insert(candidate.clone()) {
                break candidate;
            }
            suffix += 1;
        };
        warn(Warning::DuplicateVariableName {
            duplicate: var.name.clone(),
            renamed: renamed.clone(),
        });
        var.name = renamed;
    }
}

/// Display parameters (`spec.md` §4.4 subtype 11): measure, display width,
/// alignment, applied positionally in final logical-variable order.
fn apply_display(logical: &mut [LogicalVariable], entries: &[crate::sys::records::VarDisplayEntry]) {
    for (var, entry) in logical.iter_mut().zip(entries) {
        var.measure = Measure::from_raw_code(entry.measure);
        if let Some(width) = entry.width {
            var.display_width = width;
        }
        if let Some(alignment) = Alignment::from_raw_code(entry.alignment) {
            var.alignment = alignment;
        }
    }
}

fn apply_missing_rules(logical: &mut [LogicalVariable], raw_vars: &[RawVarEntry], endian: Endian) {
    // Missing values are declared per physical head record, in the same
    // order logical variables were assembled from heads.
    let heads: Vec<&RawVariableRecord> = raw_vars
        .iter()
        .map(|e| &e.record)
        .filter(|r| r.width != -1)
        .collect();
    for (var, raw) in logical.iter_mut().zip(heads) {
        if raw.missing_values.is_empty() && raw.missing_range.is_none() {
            continue;
        }
        let mut discrete = Vec::new();
        for bytes in &raw.missing_values {
            let value = match var.width {
                VarWidth::Numeric => MissingValue::Number(endian.parse(*bytes)),
                VarWidth::String(_) => {
                    let text = String::from_utf8_lossy(bytes).trim_end().to_string();
                    MissingValue::Str(text)
                }
            };
            discrete.push(value);
        }
        var.missing = MissingRule {
            discrete,
            range: raw.missing_range,
        };
    }
}

fn apply_value_label_set(
    raw: &RawValueLabelRecord,
    physical: &[PhysicalVariable],
    logical: &mut [LogicalVariable],
    decode: &dyn Fn(&[u8]) -> String,
    endian: Endian,
    out: &mut IndexMap<String, ValueLabelSet>,
    warn: &mut dyn FnMut(Warning),
) {
    let mut target_names = Vec::new();
    for &dict_index in &raw.dict_indexes {
        if dict_index == 0 {
            warn(Warning::InvalidValueLabelTarget(0));
            continue;
        }
        let Some(phys) = physical.get(dict_index as usize - 1) else {
            warn(Warning::InvalidValueLabelTarget(dict_index as usize));
            continue;
        };
        if phys.is_continuation() {
            warn(Warning::InvalidValueLabelTarget(dict_index as usize));
            continue;
        }
        let Some(logical_index) = phys.logical_index else {
            continue;
        };
        if let Some(var) = logical.get(logical_index) {
            target_names.push(var.name.clone());
        }
    }
    if target_names.is_empty() {
        return;
    }

    let is_numeric = logical
        .iter()
        .find(|v| v.name == target_names[0])
        .map(|v| matches!(v.width, VarWidth::Numeric))
        .unwrap_or(true);

    let mut set = ValueLabelSet::default();
    for (value, label) in &raw.labels {
        if is_numeric {
            let number: f64 = endian.parse(*value);
            set.numeric_labels.insert(number.to_bits(), decode(label));
        } else {
            let text = String::from_utf8_lossy(value).trim_end().to_string();
            set.string_labels.insert(text, decode(label));
        }
    }
    set.variables = target_names.clone();

    for name in target_names {
        out.insert(name, set.clone());
    }
}

fn reindex_physical(physical: &mut [PhysicalVariable], logical: &[LogicalVariable]) {
    for (logical_index, var) in logical.iter().enumerate() {
        for &seg in &var.segments {
            if let Some(p) = physical.get_mut(seg) {
                p.logical_index = Some(logical_index);
            }
        }
    }
}
