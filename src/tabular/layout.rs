//! Re-applying a trained model's feature layout to new rows

use ndarray::Array2;
use polars::prelude::*;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::encoding::{canonical_f64, EncodingMap};
use super::imputer::FillValue;
use super::{is_numeric_dtype, is_text_dtype};
use crate::error::{MlError, Result};

/// Feature order and categorical encodings recorded at training time.
///
/// Categorical values must appear in the stored encoding; anything unseen is
/// rejected with [`MlError::UnknownCategory`]. Gaps take the column's
/// training fill value; numeric columns without one fall back to 0.
#[derive(Debug, Clone)]
pub struct FeatureLayout {
    columns: Vec<String>,
    encodings: EncodingMap,
    fill_values: BTreeMap<String, FillValue>,
}

impl FeatureLayout {
    pub fn new(columns: Vec<String>, encodings: EncodingMap) -> Self {
        Self {
            columns,
            encodings,
            fill_values: BTreeMap::new(),
        }
    }

    pub fn with_fill_values(mut self, fill_values: BTreeMap<String, FillValue>) -> Self {
        self.fill_values = fill_values;
        self
    }

    fn numeric_fill(&self, column: &str) -> f64 {
        match self.fill_values.get(column) {
            Some(FillValue::Numeric(v)) => *v,
            _ => 0.0,
        }
    }

    fn text_fill(&self, column: &str) -> String {
        match self.fill_values.get(column) {
            Some(FillValue::Text(s)) => s.clone(),
            Some(FillValue::Numeric(v)) => canonical_f64(*v),
            None => String::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    /// Feature matrix for every row of `df`
    pub fn frame_matrix(&self, df: &DataFrame) -> Result<Array2<f64>> {
        let present: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        let missing: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !present.contains(*c))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(MlError::MissingColumn { columns: missing });
        }

        let mut data: Vec<Vec<f64>> = Vec::with_capacity(self.columns.len());
        for name in &self.columns {
            let series = df.column(name)?.as_materialized_series();
            let values = match self.encodings.get(name) {
                Some(encoding) => category_text(series)?
                    .into_iter()
                    .map(|v| {
                        let v = v.unwrap_or_else(|| self.text_fill(name));
                        encoding.encode(name, &v).map(|c| c as f64)
                    })
                    .collect::<Result<Vec<f64>>>()?,
                None if is_text_dtype(series.dtype()) => {
                    return Err(MlError::ValidationError(format!(
                        "Column '{}' holds text but the model expects numbers",
                        name
                    )));
                }
                None => {
                    let fill = self.numeric_fill(name);
                    let as_f64 = series.to_physical_repr().cast(&DataType::Float64)?;
                    as_f64
                        .f64()?
                        .into_iter()
                        .map(|v| v.filter(|x| x.is_finite()).unwrap_or(fill))
                        .collect()
                }
            };
            data.push(values);
        }

        Ok(Array2::from_shape_fn((df.height(), self.columns.len()), |(r, c)| data[c][r]))
    }

    /// Feature matrix for JSON records keyed by column name
    pub fn records_matrix(&self, records: &[Map<String, Value>]) -> Result<Array2<f64>> {
        if records.is_empty() {
            return Err(MlError::ValidationError("No records to predict".to_string()));
        }
        let mut x = Array2::zeros((records.len(), self.columns.len()));
        for (r, record) in records.iter().enumerate() {
            let missing: Vec<String> = self
                .columns
                .iter()
                .filter(|c| !record.contains_key(*c))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(MlError::MissingColumn { columns: missing });
            }
            for (c, name) in self.columns.iter().enumerate() {
                x[[r, c]] = self.record_value(name, &record[name])?;
            }
        }
        Ok(x)
    }

    fn record_value(&self, column: &str, value: &Value) -> Result<f64> {
        if let Some(encoding) = self.encodings.get(column) {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.as_f64().map(canonical_f64).unwrap_or_else(|| n.to_string()),
                Value::Bool(b) => b.to_string(),
                Value::Null => self.text_fill(column),
                other => other.to_string(),
            };
            return encoding.encode(column, &text).map(|c| c as f64);
        }
        match value {
            Value::Number(n) => n.as_f64(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            Value::Null => Some(self.numeric_fill(column)),
            _ => None,
        }
        .ok_or_else(|| {
            MlError::ValidationError(format!("Value {} for column '{}' is not numeric", value, column))
        })
    }
}

/// Values of a categorical column in the text form used by its encoding
fn category_text(series: &Series) -> Result<Vec<Option<String>>> {
    if is_numeric_dtype(series.dtype()) {
        let as_f64 = series.cast(&DataType::Float64)?;
        return Ok(as_f64
            .f64()?
            .into_iter()
            .map(|v| v.filter(|x| !x.is_nan()).map(canonical_f64))
            .collect());
    }
    let as_text = series.cast(&DataType::String)?;
    Ok(as_text
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}
