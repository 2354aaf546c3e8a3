//! CSV and spreadsheet loading

use calamine::{open_workbook_auto, Data, Reader};
use polars::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info};

use super::cleaning::{clean, NumericFill};
use crate::error::{MlError, Result};

/// Recognized tabular file families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabularFormat {
    Csv,
    Spreadsheet,
}

impl TabularFormat {
    /// Dispatch on the file extension, ignoring case
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(TabularFormat::Csv),
            "xlsx" | "xls" | "xlsm" | "xlsb" | "ods" => Ok(TabularFormat::Spreadsheet),
            _ => Err(MlError::UnsupportedFormat(format!(
                "'{}' is not a CSV or spreadsheet file",
                path.display()
            ))),
        }
    }
}

/// Text encodings tried, in order, for CSV input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
    Windows1252,
}

/// Decode raw CSV bytes, trying UTF-8, then Latin-1, then Windows-1252.
///
/// Latin-1 is rejected when the input contains bytes in 0x80..=0x9F: those
/// are C1 control codes in Latin-1 but printable characters (curly quotes,
/// the euro sign) in Windows-1252, so their presence means the file was
/// not written as Latin-1.
pub fn decode_text(bytes: &[u8]) -> Option<(String, TextEncoding)> {
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(body) {
        return Some((text.to_string(), TextEncoding::Utf8));
    }
    if !bytes.iter().any(|b| (0x80..=0x9F).contains(b)) {
        let text: String = bytes.iter().map(|&b| b as char).collect();
        return Some((text, TextEncoding::Latin1));
    }
    encoding_rs::WINDOWS_1252
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| (text.into_owned(), TextEncoding::Windows1252))
}

/// Loads and cleans tabular files
#[derive(Debug, Clone)]
pub struct TabularLoader {
    numeric_fill: NumericFill,
    infer_schema_length: Option<usize>,
}

impl Default for TabularLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl TabularLoader {
    pub fn new() -> Self {
        Self {
            numeric_fill: NumericFill::Zero,
            infer_schema_length: Some(100),
        }
    }

    /// Set how missing numeric cells are filled during cleaning
    pub fn with_numeric_fill(mut self, fill: NumericFill) -> Self {
        self.numeric_fill = fill;
        self
    }

    /// Number of rows polars inspects to infer CSV column types
    pub fn with_infer_schema_length(mut self, rows: Option<usize>) -> Self {
        self.infer_schema_length = rows;
        self
    }

    /// Load and clean `path`.
    ///
    /// Unknown extensions fail with `UnsupportedFormat`; anything that goes
    /// wrong while reading fails with `Parse` naming the path.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<DataFrame> {
        let path = path.as_ref();
        let format = TabularFormat::from_path(path)?;

        let raw = match format {
            TabularFormat::Csv => self.read_csv(path),
            TabularFormat::Spreadsheet => self.read_spreadsheet(path),
        }
        .map_err(|e| match e {
            MlError::Parse { .. } => e,
            other => MlError::Parse {
                path: path.to_path_buf(),
                cause: other.to_string(),
            },
        })?;

        let cleaned = clean(&raw, self.numeric_fill)?;
        info!(
            path = %path.display(),
            rows = cleaned.height(),
            columns = cleaned.width(),
            "Loaded tabular file"
        );
        Ok(cleaned)
    }

    fn read_csv(&self, path: &Path) -> Result<DataFrame> {
        let bytes = fs::read(path)?;
        let (text, encoding) = decode_text(&bytes).ok_or_else(|| MlError::Parse {
            path: path.to_path_buf(),
            cause: "could not decode as UTF-8, Latin-1 or Windows-1252".to_string(),
        })?;
        debug!(path = %path.display(), ?encoding, "Decoded CSV text");

        let parse_opts = CsvParseOptions::default().with_try_parse_dates(true);
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(self.infer_schema_length)
            .with_parse_options(parse_opts)
            .into_reader_with_file_handle(Cursor::new(text.into_bytes()))
            .finish()?;
        Ok(df)
    }

    fn read_spreadsheet(&self, path: &Path) -> Result<DataFrame> {
        let mut workbook = open_workbook_auto(path)
            .map_err(|e| MlError::DataError(e.to_string()))?;
        let sheet = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| MlError::DataError("workbook has no sheets".to_string()))?;
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| MlError::DataError(e.to_string()))?;

        let mut rows = range.rows();
        let header = match rows.next() {
            Some(header) => header,
            None => return Ok(DataFrame::empty()),
        };
        let names = header_names(header);
        let body: Vec<&[Data]> = rows.collect();

        let columns = names
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let cells: Vec<&Data> = body
                    .iter()
                    .map(|row| row.get(idx).unwrap_or(&Data::Empty))
                    .collect();
                spreadsheet_column(name, &cells).map(Column::from)
            })
            .collect::<Result<Vec<Column>>>()?;

        Ok(DataFrame::new(columns)?)
    }
}

/// Header cells as unique, non-empty column names
fn header_names(header: &[Data]) -> Vec<String> {
    let mut seen = HashSet::new();
    header
        .iter()
        .enumerate()
        .map(|(idx, cell)| {
            let base = match cell {
                Data::Empty => format!("column_{}", idx),
                other => other.to_string().trim().to_string(),
            };
            let base = if base.is_empty() { format!("column_{}", idx) } else { base };
            let mut name = base.clone();
            let mut suffix = 1;
            while !seen.insert(name.clone()) {
                name = format!("{}_{}", base, suffix);
                suffix += 1;
            }
            name
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Empty,
    Int,
    Float,
    Bool,
    DateTime,
    Text,
}

fn cell_kind(cell: &Data) -> CellKind {
    match cell {
        Data::Empty | Data::Error(_) => CellKind::Empty,
        Data::Int(_) => CellKind::Int,
        Data::Float(_) => CellKind::Float,
        Data::Bool(_) => CellKind::Bool,
        Data::DateTime(_) | Data::DateTimeIso(_) => CellKind::DateTime,
        Data::String(s) if s.trim().is_empty() => CellKind::Empty,
        _ => CellKind::Text,
    }
}

/// Widen the kinds seen in a column to one polars dtype
fn column_kind(cells: &[&Data]) -> CellKind {
    cells
        .iter()
        .map(|c| cell_kind(c))
        .fold(CellKind::Empty, |acc, kind| match (acc, kind) {
            (a, CellKind::Empty) => a,
            (CellKind::Empty, k) => k,
            (a, k) if a == k => a,
            (CellKind::Int, CellKind::Float) | (CellKind::Float, CellKind::Int) => CellKind::Float,
            _ => CellKind::Text,
        })
}

fn spreadsheet_column(name: &str, cells: &[&Data]) -> Result<Series> {
    let name: PlSmallStr = name.into();
    let series = match column_kind(cells) {
        CellKind::Int => {
            let values: Vec<Option<i64>> = cells
                .iter()
                .map(|c| match c {
                    Data::Int(v) => Some(*v),
                    _ => None,
                })
                .collect();
            Series::new(name, values)
        }
        CellKind::Float => {
            let values: Vec<Option<f64>> = cells
                .iter()
                .map(|c| match c {
                    Data::Int(v) => Some(*v as f64),
                    Data::Float(v) => Some(*v),
                    _ => None,
                })
                .collect();
            Series::new(name, values)
        }
        CellKind::Bool => {
            let values: Vec<Option<bool>> = cells
                .iter()
                .map(|c| match c {
                    Data::Bool(v) => Some(*v),
                    _ => None,
                })
                .collect();
            Series::new(name, values)
        }
        CellKind::DateTime => {
            let millis: Vec<Option<i64>> = cells
                .iter()
                .map(|c| match c {
                    Data::DateTime(dt) => dt.as_datetime().map(|d| d.and_utc().timestamp_millis()),
                    Data::DateTimeIso(s) => chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                        .ok()
                        .map(|d| d.and_utc().timestamp_millis()),
                    _ => None,
                })
                .collect();
            Series::new(name, millis).cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
        }
        CellKind::Text | CellKind::Empty => {
            let values: Vec<Option<String>> = cells
                .iter()
                .map(|c| match cell_kind(c) {
                    CellKind::Empty => None,
                    _ => Some(c.to_string()),
                })
                .collect();
            Series::new(name, values)
        }
    };
    Ok(series)
}
