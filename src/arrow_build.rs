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

//! Typed Arrow column builders and the batch-closing logic described in
//! `spec.md` §3 ("Arrow logical types produced") and §5 (batch size,
//! column projection, row limits).
//!
//! Enriched from `curtisalexander-readstat-rs`'s `rs_data.rs`: one builder
//! per column, selected from the variable's print format category, filled
//! row-by-row and swapped out for a fresh set whenever a batch closes.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, Date32Builder, DurationMicrosecondBuilder, Float64Builder, RecordBatch,
    StringBuilder, TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};

use crate::calendar::{seconds_to_duration_micros, seconds_to_unix_days, seconds_to_unix_micros};
use crate::format::Category;
use crate::sys::rows::RowValue;
use crate::variable::LogicalVariable;

enum ColumnBuilder {
    Numeric(Float64Builder),
    Date(Date32Builder),
    Datetime(TimestampMicrosecondBuilder),
    Duration(DurationMicrosecondBuilder),
    Str(StringBuilder),
}

impl ColumnBuilder {
    fn for_variable(var: &LogicalVariable) -> ColumnBuilder {
        if var.var_type_is_string() {
            return ColumnBuilder::Str(StringBuilder::new());
        }
        match var.print_format.category() {
            Category::Date => ColumnBuilder::Date(Date32Builder::new()),
            Category::Datetime => ColumnBuilder::Datetime(TimestampMicrosecondBuilder::new()),
            Category::Duration => ColumnBuilder::Duration(DurationMicrosecondBuilder::new()),
            Category::Numeric | Category::String => ColumnBuilder::Numeric(Float64Builder::new()),
        }
    }

    fn data_type(&self) -> DataType {
        match self {
            ColumnBuilder::Numeric(_) => DataType::Float64,
            ColumnBuilder::Date(_) => DataType::Date32,
            ColumnBuilder::Datetime(_) => DataType::Timestamp(TimeUnit::Microsecond, None),
            ColumnBuilder::Duration(_) => DataType::Duration(TimeUnit::Microsecond),
            ColumnBuilder::Str(_) => DataType::Utf8,
        }
    }

    fn append(&mut self, value: &RowValue) {
        match (self, value) {
            (ColumnBuilder::Numeric(b), RowValue::Number(n)) => b.append_option(*n),
            (ColumnBuilder::Date(b), RowValue::Number(n)) => {
                b.append_option(n.and_then(|v| seconds_to_unix_days(v)))
            }
            (ColumnBuilder::Datetime(b), RowValue::Number(n)) => {
                b.append_option(n.and_then(|v| seconds_to_unix_micros(v)))
            }
            (ColumnBuilder::Duration(b), RowValue::Number(n)) => {
                b.append_option(n.and_then(|v| seconds_to_duration_micros(v)))
            }
            (ColumnBuilder::Str(b), RowValue::Str(s)) => b.append_value(s),
            _ => unreachable!("row decoder value/variable width mismatch"),
        }
    }

    fn finish(self) -> ArrayRef {
        match self {
            ColumnBuilder::Numeric(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Date(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Datetime(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Duration(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Str(mut b) => Arc::new(b.finish()),
        }
    }
}

/// Accumulates decoded rows for a fixed, already-projected set of columns
/// and closes them into [`RecordBatch`]es of up to `batch_size` rows.
pub struct BatchBuilder {
    schema: SchemaRef,
    variables: Vec<LogicalVariable>,
    builders: Vec<ColumnBuilder>,
    batch_size: usize,
    rows_in_batch: usize,
}

impl BatchBuilder {
    pub fn new(variables: Vec<LogicalVariable>, batch_size: usize) -> BatchBuilder {
        let builders: Vec<ColumnBuilder> = variables.iter().map(ColumnBuilder::for_variable).collect();
        let fields: Vec<Field> = variables
            .iter()
            .zip(&builders)
            .map(|(var, b)| Field::new(&var.name, b.data_type(), true))
            .collect();
        let schema = Arc::new(Schema::new(fields));
        BatchBuilder {
            schema,
            variables,
            builders,
            batch_size,
            rows_in_batch: 0,
        }
    }

    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    pub fn is_full(&self) -> bool {
        self.rows_in_batch >= self.batch_size
    }

    pub fn is_empty(&self) -> bool {
        self.rows_in_batch == 0
    }

    /// Appends one decoded row. `row` must have one value per column in the
    /// same order the builder was constructed with.
    pub fn append_row(&mut self, row: &[RowValue]) {
        debug_assert_eq!(row.len(), self.builders.len());
        for (builder, value) in self.builders.iter_mut().zip(row) {
            builder.append(value);
        }
        self.rows_in_batch += 1;
    }

    /// Closes the current batch and resets the builder to accept the next
    /// one, preserving schema and projection.
    pub fn take_batch(&mut self) -> RecordBatch {
        let fresh = self.variables.iter().map(ColumnBuilder::for_variable).collect();
        let finished = std::mem::replace(&mut self.builders, fresh);
        self.rows_in_batch = 0;
        let columns: Vec<ArrayRef> = finished.into_iter().map(ColumnBuilder::finish).collect();
        RecordBatch::try_new(self.schema(), columns)
            .expect("column builders always match the schema they were built from")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Format;
    use crate::variable::{Alignment, Measure, MissingRule, VarWidth};

    fn var(name: &str, width: VarWidth, format: Format) -> LogicalVariable {
        LogicalVariable {
            name: name.to_string(),
            width,
            print_format: format,
            write_format: format,
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

    #[test]
    fn numeric_column_carries_nulls_for_system_missing() {
        let vars = vec![var("x", VarWidth::Numeric, Format::from_raw(5, 8, 2))];
        let mut builder = BatchBuilder::new(vars, 10);
        builder.append_row(&[RowValue::Number(Some(1.0))]);
        builder.append_row(&[RowValue::Number(None)]);
        let batch = builder.take_batch();
        assert_eq!(batch.num_rows(), 2);
        let column = batch
            .column(0)
            .as_any()
            .downcast_ref::<arrow::array::Float64Array>()
            .unwrap();
        assert_eq!(column.value(0), 1.0);
        assert!(column.is_null(1));
    }

    #[test]
    fn batch_closes_and_resets_row_count() {
        let vars = vec![var("x", VarWidth::Numeric, Format::from_raw(5, 8, 2))];
        let mut builder = BatchBuilder::new(vars, 2);
        builder.append_row(&[RowValue::Number(Some(1.0))]);
        assert!(!builder.is_full());
        builder.append_row(&[RowValue::Number(Some(2.0))]);
        assert!(builder.is_full());
        let batch = builder.take_batch();
        assert_eq!(batch.num_rows(), 2);
        assert!(builder.is_empty());
    }

    #[test]
    fn date_column_converts_seconds_since_spss_epoch() {
        let vars = vec![var("d", VarWidth::Numeric, Format::from_raw(20, 10, 0))];
        let mut builder = BatchBuilder::new(vars, 10);
        builder.append_row(&[RowValue::Number(Some(13_693_017_600.0))]);
        let batch = builder.take_batch();
        let column = batch
            .column(0)
            .as_any()
            .downcast_ref::<arrow::array::Date32Array>()
            .unwrap();
        assert_eq!(batch.schema().field(0).data_type(), &DataType::Date32);
        assert!(!column.is_null(0));
    }

    #[test]
    fn string_column_builds_utf8() {
        let vars = vec![var("s", VarWidth::String(5), Format::from_raw(1, 5, 0))];
        let mut builder = BatchBuilder::new(vars, 10);
        builder.append_row(&[RowValue::Str("hi".to_string())]);
        let batch = builder.take_batch();
        assert_eq!(batch.schema().field(0).data_type(), &DataType::Utf8);
        let column = batch
            .column(0)
            .as_any()
            .downcast_ref::<arrow::array::StringArray>()
            .unwrap();
        assert_eq!(column.value(0), "hi");
    }
}
