//! Turning a cleaned table into numeric training tensors

use ndarray::{Array1, Array2};
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::encoding::{canonical_f64, ColumnEncoding, EncodingMap};
use super::imputer::{FillValue, Imputer};
use super::{is_numeric_dtype, is_text_dtype};
use crate::error::{MlError, Result};

/// Output of [`TabularPreparer::prepare`]
#[derive(Debug, Clone)]
pub struct PreparedTable {
    /// Feature matrix, one row per input row
    pub x: Array2<f64>,
    /// Target vector; categorical targets hold their codes
    pub y: Array1<f64>,
    /// Feature columns in the order of `x`'s columns
    pub feature_columns: Vec<String>,
    pub target_column: String,
    /// Encodings for every column that was replaced by codes
    pub encodings: EncodingMap,
    /// Value each column's gaps were filled with
    pub fill_values: BTreeMap<String, FillValue>,
}

impl PreparedTable {
    pub fn n_samples(&self) -> usize {
        self.x.nrows()
    }

    /// Encodings for feature columns only
    pub fn feature_encodings(&self) -> EncodingMap {
        self.encodings
            .iter()
            .filter(|(name, _)| **name != self.target_column)
            .map(|(name, enc)| (name.clone(), enc.clone()))
            .collect()
    }

    pub fn target_encoding(&self) -> Option<&ColumnEncoding> {
        self.encodings.get(&self.target_column)
    }
}

/// Selects, imputes and encodes the columns of a table
#[derive(Debug, Clone)]
pub struct TabularPreparer {
    target_column: String,
    feature_columns: Option<Vec<String>>,
    categorical_columns: Vec<String>,
    encode_target: bool,
}

impl TabularPreparer {
    pub fn new(target_column: impl Into<String>) -> Self {
        Self {
            target_column: target_column.into(),
            feature_columns: None,
            categorical_columns: Vec::new(),
            encode_target: false,
        }
    }

    /// Always replace the target by class codes, numeric targets included.
    /// Text targets are encoded either way.
    pub fn with_encoded_target(mut self, encode: bool) -> Self {
        self.encode_target = encode;
        self
    }

    /// Restrict features to these columns, in this order
    pub fn with_feature_columns(mut self, columns: Vec<String>) -> Self {
        self.feature_columns = Some(columns);
        self
    }

    /// Columns to replace by integer codes
    pub fn with_categorical_columns(mut self, columns: Vec<String>) -> Self {
        self.categorical_columns = columns;
        self
    }

    /// Build `(X, y)` from `df` without modifying it.
    pub fn prepare(&self, df: &DataFrame) -> Result<PreparedTable> {
        let present: BTreeSet<String> = df
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        if !present.contains(&self.target_column) {
            return Err(MlError::missing_column(&self.target_column));
        }

        let feature_columns: Vec<String> = match &self.feature_columns {
            Some(requested) => {
                let missing: Vec<String> = requested
                    .iter()
                    .filter(|c| !present.contains(*c))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    return Err(MlError::MissingColumn { columns: missing });
                }
                requested.clone()
            }
            None => df
                .get_column_names()
                .iter()
                .map(|name| name.to_string())
                .filter(|name| *name != self.target_column)
                .collect(),
        };

        if feature_columns.is_empty() {
            return Err(MlError::ValidationError("No feature columns to train on".to_string()));
        }
        if feature_columns.contains(&self.target_column) {
            return Err(MlError::ValidationError(format!(
                "Target column '{}' cannot also be a feature",
                self.target_column
            )));
        }

        let categorical: BTreeSet<&str> = self
            .categorical_columns
            .iter()
            .map(String::as_str)
            .filter(|c| present.contains(*c))
            .collect();

        let mut imputer = Imputer::new();
        let mut encodings = EncodingMap::new();

        let mut feature_data: Vec<Vec<f64>> = Vec::with_capacity(feature_columns.len());
        for name in &feature_columns {
            let series = df.column(name)?.as_materialized_series();
            let values = if categorical.contains(name.as_str()) {
                let (codes, encoding) = encode_column(name, series, &mut imputer)?;
                encodings.insert(name.clone(), encoding);
                codes
            } else if is_text_dtype(series.dtype()) {
                return Err(MlError::ValidationError(format!(
                    "Column '{}' holds text; list it as categorical to use it as a feature",
                    name
                )));
            } else {
                numeric_column(name, series, &mut imputer)?
            };
            feature_data.push(values);
        }

        let target_series = df.column(&self.target_column)?.as_materialized_series();
        let target_is_categorical = self.encode_target
            || categorical.contains(self.target_column.as_str())
            || is_text_dtype(target_series.dtype());
        let y_values = if target_is_categorical {
            let (codes, encoding) = encode_column(&self.target_column, target_series, &mut imputer)?;
            encodings.insert(self.target_column.clone(), encoding);
            codes
        } else {
            numeric_column(&self.target_column, target_series, &mut imputer)?
        };

        let n_rows = df.height();
        let x = Array2::from_shape_fn((n_rows, feature_columns.len()), |(r, c)| feature_data[c][r]);
        let y = Array1::from_vec(y_values);

        debug!(
            rows = n_rows,
            features = feature_columns.len(),
            encoded = encodings.len(),
            "Prepared tabular data"
        );

        Ok(PreparedTable {
            x,
            y,
            feature_columns,
            target_column: self.target_column.clone(),
            encodings,
            fill_values: imputer.into_fill_values(),
        })
    }
}

/// Functional form of [`TabularPreparer`]
pub fn prepare(
    df: &DataFrame,
    target_column: &str,
    feature_columns: Option<&[String]>,
    categorical_columns: Option<&[String]>,
) -> Result<PreparedTable> {
    let mut preparer = TabularPreparer::new(target_column);
    if let Some(features) = feature_columns {
        preparer = preparer.with_feature_columns(features.to_vec());
    }
    if let Some(categorical) = categorical_columns {
        preparer = preparer.with_categorical_columns(categorical.to_vec());
    }
    preparer.prepare(df)
}

/// Numeric view of a column with gaps filled by the median. Booleans become
/// 0/1 and temporal values their physical integer representation.
fn numeric_column(name: &str, series: &Series, imputer: &mut Imputer) -> Result<Vec<f64>> {
    let mut values = numeric_values(series)?;
    imputer.impute_numeric(name, &mut values);
    Ok(values.into_iter().map(|v| v.unwrap_or(0.0)).collect())
}

fn numeric_values(series: &Series) -> Result<Vec<Option<f64>>> {
    let physical = series.to_physical_repr();
    let as_f64 = physical.cast(&DataType::Float64)?;
    Ok(as_f64
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect())
}

/// Mode-impute then replace values by their sorted-order codes
fn encode_column(
    name: &str,
    series: &Series,
    imputer: &mut Imputer,
) -> Result<(Vec<f64>, ColumnEncoding)> {
    if is_numeric_dtype(series.dtype()) {
        // Numeric categories keep numeric ordering of their codes.
        let numbers = numeric_values(series)?;
        let mut text: Vec<Option<String>> =
            numbers.iter().map(|v| v.map(canonical_f64)).collect();
        imputer.impute_text(name, &mut text);
        let encoding = ColumnEncoding::from_numbers(
            numbers.iter().flatten().copied(),
        );
        let encoding = if text.iter().flatten().all(|v| encoding.code_of(v).is_some()) {
            encoding
        } else {
            // All-missing column: only the placeholder remains.
            ColumnEncoding::from_text(text.iter().flatten().map(String::as_str))
        };
        let codes = text
            .iter()
            .flatten()
            .map(|v| encoding.encode(name, v).map(|c| c as f64))
            .collect::<Result<Vec<f64>>>()?;
        return Ok((codes, encoding));
    }

    let as_text = series.cast(&DataType::String)?;
    let mut text: Vec<Option<String>> = as_text
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect();
    imputer.impute_text(name, &mut text);
    let encoding = ColumnEncoding::from_text(text.iter().flatten().map(String::as_str));
    let codes = text
        .iter()
        .flatten()
        .map(|v| encoding.encode(name, v).map(|c| c as f64))
        .collect::<Result<Vec<f64>>>()?;
    Ok((codes, encoding))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> DataFrame {
        df!(
            "size" => [Some(1.0), None, Some(3.0), Some(5.0)],
            "color" => [Some("red"), Some("blue"), None, Some("red")],
            "label" => ["yes", "no", "yes", "no"]
        )
        .unwrap()
    }

    #[test]
    fn test_default_features_exclude_target() {
        let prepared = TabularPreparer::new("label")
            .with_categorical_columns(vec!["color".to_string()])
            .prepare(&frame())
            .unwrap();
        assert_eq!(prepared.feature_columns, vec!["size", "color"]);
        assert_eq!(prepared.x.shape(), &[4, 2]);
    }

    #[test]
    fn test_median_and_mode_imputation() {
        let prepared = TabularPreparer::new("label")
            .with_categorical_columns(vec!["color".to_string()])
            .prepare(&frame())
            .unwrap();
        // median of 1, 3, 5
        assert_eq!(prepared.x[[1, 0]], 3.0);
        // mode of color is red, code 1 after blue
        assert_eq!(prepared.x[[2, 1]], 1.0);
        assert_eq!(prepared.encodings["color"].categories(), &["blue", "red"]);
    }

    #[test]
    fn test_text_target_is_encoded() {
        let prepared = TabularPreparer::new("label")
            .with_categorical_columns(vec!["color".to_string()])
            .prepare(&frame())
            .unwrap();
        assert_eq!(prepared.y.to_vec(), vec![1.0, 0.0, 1.0, 0.0]);
        assert_eq!(prepared.target_encoding().unwrap().value_of(1), Some("yes"));
        assert!(!prepared.feature_encodings().contains_key("label"));
    }

    #[test]
    fn test_signed_numeric_target_encoded_on_request() {
        let df = df!("x" => [1.0, 2.0, 3.0, 4.0], "label" => [1i64, -1, 1, -1]).unwrap();
        let raw = TabularPreparer::new("label").prepare(&df).unwrap();
        assert_eq!(raw.y.to_vec(), vec![1.0, -1.0, 1.0, -1.0]);
        assert!(raw.target_encoding().is_none());

        let encoded = TabularPreparer::new("label")
            .with_encoded_target(true)
            .prepare(&df)
            .unwrap();
        assert_eq!(encoded.y.to_vec(), vec![1.0, 0.0, 1.0, 0.0]);
        assert_eq!(encoded.target_encoding().unwrap().categories(), &["-1", "1"]);
    }

    #[test]
    fn test_all_missing_features_reported() {
        let features = vec!["size".to_string(), "weight".to_string(), "height".to_string()];
        let err = prepare(&frame(), "label", Some(&features), None).unwrap_err();
        match err {
            MlError::MissingColumn { columns } => assert_eq!(columns, vec!["weight", "height"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_uncategorized_text_feature_rejected() {
        let err = TabularPreparer::new("label").prepare(&frame()).unwrap_err();
        assert!(matches!(err, MlError::ValidationError(msg) if msg.contains("color")));
    }

    #[test]
    fn test_caller_frame_untouched() {
        let df = frame();
        let _ = TabularPreparer::new("label")
            .with_categorical_columns(vec!["color".to_string()])
            .prepare(&df)
            .unwrap();
        assert_eq!(df.column("size").unwrap().null_count(), 1);
        assert_eq!(df.column("color").unwrap().null_count(), 1);
    }

    #[test]
    fn test_numeric_categorical_codes() {
        let df = df!("grade" => [3i64, 1, 10, 1], "y" => [0.5, 1.5, 2.5, 3.5]).unwrap();
        let prepared = TabularPreparer::new("y")
            .with_categorical_columns(vec!["grade".to_string(), "absent".to_string()])
            .prepare(&df)
            .unwrap();
        assert_eq!(prepared.encodings["grade"].categories(), &["1", "3", "10"]);
        assert_eq!(prepared.x.column(0).to_vec(), vec![1.0, 0.0, 2.0, 0.0]);
    }
}
