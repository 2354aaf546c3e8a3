//! Integration tests for tabular loading, preparation and splitting

use mlforge::tabular::{prepare, NumericFill, TabularLoader, TabularPreparer};
use mlforge::training::{split, Splitter, TestFraction};
use mlforge::MlError;
use ndarray::{Array1, Array2};
use polars::prelude::*;
use rust_xlsxwriter::Workbook;
use std::collections::BTreeSet;
use std::io::Write;
use tempfile::NamedTempFile;

fn csv_file(contents: &[u8]) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    file.write_all(contents).unwrap();
    file.flush().unwrap();
    file
}

// ============================================================================
// Loader
// ============================================================================

#[test]
fn test_unsupported_extension() {
    let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
    writeln!(file, "a,b").unwrap();
    let err = TabularLoader::new().load(file.path()).unwrap_err();
    assert!(matches!(err, MlError::UnsupportedFormat(_)));
}

#[test]
fn test_windows_1252_fallback() {
    // 0x93/0x94 are curly quotes in Windows-1252 and C1 controls in Latin-1
    let file = csv_file(b"quote,n\n\x93hi\x94,1\n");
    let df = TabularLoader::new().load(file.path()).unwrap();
    let quote = df.column("quote").unwrap().str().unwrap().get(0);
    assert_eq!(quote, Some("\u{201C}hi\u{201D}"));
}

#[test]
fn test_cleaning_is_idempotent_through_loader() {
    let file = csv_file(b"x,y\n1,a\n,b\n3,\n");
    let loader = TabularLoader::new().with_numeric_fill(NumericFill::Zero);
    let once = loader.load(file.path()).unwrap();
    let twice = mlforge::tabular::clean(&once, NumericFill::Zero).unwrap();
    assert!(once.equals_missing(&twice));
}

#[test]
fn test_date_gaps_stay_missing() {
    let file = csv_file(b"day,n\n2024-01-01,1\n,2\n2024-01-03,3\n");
    let df = TabularLoader::new()
        .with_numeric_fill(NumericFill::Zero)
        .load(file.path())
        .unwrap();
    let day = df.column("day").unwrap();
    assert!(matches!(day.dtype(), DataType::Date | DataType::Datetime(_, _)));
    assert_eq!(day.null_count(), 1);
    assert_eq!(df.column("n").unwrap().null_count(), 0);
}

#[test]
fn test_spreadsheet_first_sheet() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("sizes.xlsx");
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, name) in ["size", "color", "size", "flag"].into_iter().enumerate() {
        sheet.write_string(0, col as u16, name).unwrap();
    }
    // row 2 has no size, row 3 no color; column 4 has data but no header
    let rows: [(Option<f64>, Option<&str>, f64, bool, &str); 3] = [
        (Some(1.5), Some("red"), 10.0, true, "x"),
        (None, Some("blue"), 20.0, false, "y"),
        (Some(3.5), None, 30.0, true, "z"),
    ];
    for (i, (size, color, count, flag, note)) in rows.into_iter().enumerate() {
        let row = i as u32 + 1;
        if let Some(size) = size {
            sheet.write_number(row, 0, size).unwrap();
        }
        if let Some(color) = color {
            sheet.write_string(row, 1, color).unwrap();
        }
        sheet.write_number(row, 2, count).unwrap();
        sheet.write_boolean(row, 3, flag).unwrap();
        sheet.write_string(row, 4, note).unwrap();
    }
    workbook.add_worksheet().write_string(0, 0, "ignored").unwrap();
    workbook.save(&path).unwrap();

    let df = TabularLoader::new()
        .with_numeric_fill(NumericFill::Median)
        .load(&path)
        .unwrap();
    let names: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();
    assert_eq!(names, vec!["size", "color", "size_1", "flag", "column_4"]);
    assert_eq!(df.height(), 3);

    let size: Vec<Option<f64>> = df.column("size").unwrap().f64().unwrap().into_iter().collect();
    assert_eq!(size, vec![Some(1.5), Some(2.5), Some(3.5)]);
    let color: Vec<Option<&str>> = df.column("color").unwrap().str().unwrap().into_iter().collect();
    assert_eq!(color, vec![Some("red"), Some("blue"), Some("")]);
    let counts = df.column("size_1").unwrap().cast(&DataType::Float64).unwrap();
    assert_eq!(counts.f64().unwrap().get(2), Some(30.0));
    assert_eq!(df.column("flag").unwrap().dtype(), &DataType::Boolean);
    assert_eq!(df.column("column_4").unwrap().str().unwrap().get(0), Some("x"));
}

// ============================================================================
// Preparer
// ============================================================================

#[test]
fn test_missing_target_column() {
    let df = df!("a" => [1.0, 2.0], "b" => [3.0, 4.0]).unwrap();
    let err = prepare(&df, "price", None, None).unwrap_err();
    match err {
        MlError::MissingColumn { columns } => assert_eq!(columns, vec!["price"]),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_numeric_gaps_become_median() {
    let file = csv_file(b"a,b,target\n1,10,0\n,20,1\n5,,0\n9,40,1\n");
    let df = TabularLoader::new()
        .with_numeric_fill(NumericFill::Keep)
        .load(file.path())
        .unwrap();
    let prepared = TabularPreparer::new("target").prepare(&df).unwrap();

    assert!(prepared.x.iter().all(|v| v.is_finite()));
    // median of 1, 5, 9
    assert_eq!(prepared.x[[1, 0]], 5.0);
    // median of 10, 20, 40
    assert_eq!(prepared.x[[2, 1]], 20.0);
    assert_eq!(prepared.feature_columns, vec!["a", "b"]);
}

#[test]
fn test_categorical_roundtrip() {
    let df = df!(
        "color" => ["red", "green", "blue", "green", "red"],
        "size" => [1.0, 2.0, 3.0, 4.0, 5.0],
        "label" => [0, 1, 0, 1, 0]
    )
    .unwrap();
    let prepared = TabularPreparer::new("label")
        .with_categorical_columns(vec!["color".to_string(), "not_a_column".to_string()])
        .prepare(&df)
        .unwrap();

    let encoding = &prepared.encodings["color"];
    let original: BTreeSet<&str> = ["red", "green", "blue"].into_iter().collect();
    let decoded: BTreeSet<&str> = prepared
        .x
        .column(0)
        .iter()
        .map(|&code| encoding.decode("color", code as usize).unwrap())
        .collect();
    assert_eq!(decoded, original);

    // row by row the codes point back at the original value
    let colors = df.column("color").unwrap().str().unwrap();
    for (row, value) in colors.into_iter().enumerate() {
        let code = prepared.x[[row, 0]] as usize;
        assert_eq!(encoding.value_of(code), value);
    }
    assert!(!prepared.encodings.contains_key("not_a_column"));
}

#[test]
fn test_encoding_serializes_code_to_value() {
    let df = df!("c" => ["b", "a"], "t" => [1.0, 2.0]).unwrap();
    let prepared = prepare(&df, "t", None, Some(&["c".to_string()])).unwrap();
    let json = serde_json::to_value(&prepared.encodings).unwrap();
    assert_eq!(json, serde_json::json!({"c": {"0": "a", "1": "b"}}));
}

#[test]
fn test_all_missing_text_column_uses_placeholder() {
    let df = df!(
        "c" => [None::<&str>, None, None],
        "t" => [1.0, 2.0, 3.0]
    )
    .unwrap();
    let prepared = prepare(&df, "t", None, Some(&["c".to_string()])).unwrap();
    assert_eq!(prepared.encodings["c"].categories(), &["unknown"]);
    assert!(prepared.x.iter().all(|&v| v == 0.0));
}

// ============================================================================
// Splitter
// ============================================================================

#[test]
fn test_split_quarter_of_hundred() {
    let x = Array2::from_shape_fn((100, 3), |(r, c)| (r * 10 + c) as f64);
    let y = Array1::from_shape_fn(100, |r| r as f64);
    let (x_train, x_test, y_train, y_test) = split(&x, &y, TestFraction::new(0.25).unwrap(), Some(7)).unwrap();

    assert_eq!(x_test.nrows(), 25);
    assert_eq!(x_train.nrows(), 75);
    assert_eq!(y_test.len(), 25);
    assert_eq!(y_train.len(), 75);
    for (row, &target) in x_test.rows().into_iter().zip(y_test.iter()) {
        assert_eq!(row[0], target * 10.0);
    }
    for (row, &target) in x_train.rows().into_iter().zip(y_train.iter()) {
        assert_eq!(row[0], target * 10.0);
    }
}

#[test]
fn test_split_seed_is_reproducible() {
    let fraction = TestFraction::new(0.3).unwrap();
    let a = Splitter::new(fraction).with_random_state(11).indices(50).unwrap();
    let b = Splitter::new(fraction).with_random_state(11).indices(50).unwrap();
    assert_eq!(a, b);

    let mut all: Vec<usize> = a.train.iter().chain(a.test.iter()).copied().collect();
    all.sort_unstable();
    assert_eq!(all, (0..50).collect::<Vec<_>>());
}

#[test]
fn test_fraction_bounds() {
    for bad in [0.0, 1.0, -0.1, 1.5, f64::NAN] {
        assert!(matches!(TestFraction::new(bad), Err(MlError::ValidationError(_))));
    }
}
