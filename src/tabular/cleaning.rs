//! Post-load value cleaning

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use super::imputer::median;
use super::{is_float_dtype, is_numeric_dtype, is_text_dtype};
use crate::error::Result;

/// How missing numeric cells are filled after loading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericFill {
    /// Replace with 0
    #[default]
    Zero,
    /// Replace with the column median over finite values
    Median,
    /// Leave as missing so a later imputation step can decide
    Keep,
}

/// Clean a freshly loaded table.
///
/// Infinite floats become missing, then numeric gaps are filled according to
/// `fill`, text gaps become `""`, and temporal gaps stay missing. Running the
/// pass twice yields the same table.
pub fn clean(df: &DataFrame, fill: NumericFill) -> Result<DataFrame> {
    let mut columns: Vec<Column> = Vec::with_capacity(df.width());
    for column in df.get_columns() {
        let series = column.as_materialized_series();
        let dtype = series.dtype();
        let cleaned = if is_float_dtype(dtype) {
            clean_float(series, fill)?
        } else if is_numeric_dtype(dtype) {
            clean_integer(series, fill)?
        } else if is_text_dtype(dtype) {
            clean_text(series)?
        } else {
            series.clone()
        };
        columns.push(cleaned.into());
    }
    Ok(DataFrame::new(columns)?)
}

fn clean_float(series: &Series, fill: NumericFill) -> Result<Series> {
    let values: Vec<Option<f64>> = series
        .cast(&DataType::Float64)?
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect();

    let replacement = match fill {
        NumericFill::Zero => Some(0.0),
        NumericFill::Median => Some(median(&values).unwrap_or(0.0)),
        NumericFill::Keep => None,
    };
    let filled: Vec<Option<f64>> = values
        .into_iter()
        .map(|v| v.or(replacement))
        .collect();
    Ok(Series::new(series.name().clone(), filled))
}

fn clean_integer(series: &Series, fill: NumericFill) -> Result<Series> {
    if series.null_count() == 0 {
        return Ok(series.clone());
    }
    match fill {
        NumericFill::Zero => Ok(series.fill_null(FillNullStrategy::Zero)?),
        NumericFill::Median => clean_float(series, fill),
        NumericFill::Keep => Ok(series.clone()),
    }
}

fn clean_text(series: &Series) -> Result<Series> {
    if series.null_count() == 0 {
        return Ok(series.clone());
    }
    let as_text = series.cast(&DataType::String)?;
    let filled: Vec<&str> = as_text.str()?.into_iter().map(|v| v.unwrap_or("")).collect();
    Ok(Series::new(series.name().clone(), filled))
}
