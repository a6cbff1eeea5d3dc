//! Sweeps Very Long String widths across the 255/252 chunk boundary.
//!
//! Grounded on `original_source/tests/test_long_strings.py`'s
//! `test_single_long_string` parametrization: a single long-string variable
//! must always surface as exactly one column, regardless of how many
//! on-disk chunks its width spans.

mod common;

use arrow::array::StringArray;
use sav_arrow::{read_sav, Utf8Policy};

use common::{write_temp, SavBuilder, Value};

fn no_warnings(_: sav_arrow::Warning) {
    panic!("unexpected warning");
}

fn check(width: u16) {
    let mut builder = SavBuilder::new();
    if width <= 255 {
        builder.string_var("s", width, (1, width as u8, 0));
    } else {
        builder.vls_var("s", width, (1, 255, 0));
    }
    let value = "x".repeat(width as usize);
    builder.row(vec![Value::string(value.clone())]);
    let bytes = builder.build_compressed();
    let file = write_temp(&bytes);

    let (batches, metadata) = read_sav(file.path(), 1024, Utf8Policy::Lossy, &mut no_warnings).unwrap();
    assert_eq!(metadata.number_columns, 1, "width {width}");

    let batch = &batches[0];
    assert_eq!(batch.num_columns(), 1, "width {width}");
    let column = batch.column(0).as_any().downcast_ref::<StringArray>().unwrap();
    assert_eq!(column.value(0).len(), width as usize, "width {width}");
    assert_eq!(column.value(0), value, "width {width}");
}

#[test]
fn widths_around_the_chunk_boundary_stay_one_column() {
    for width in [1u16, 254, 255, 256, 504, 505, 506, 1000] {
        check(width);
    }
}
