//! Reversible categorical encodings

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{MlError, Result};

/// Encodings keyed by column name
pub type EncodingMap = BTreeMap<String, ColumnEncoding>;

/// Integer codes for one categorical column.
///
/// Code `i` stands for `categories[i]`. On disk the encoding is the
/// code-to-value object `{"0": "blue", "1": "red"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "BTreeMap<usize, String>", try_from = "BTreeMap<usize, String>")]
pub struct ColumnEncoding {
    categories: Vec<String>,
    lookup: HashMap<String, usize>,
}

impl ColumnEncoding {
    /// Build from text values; codes follow lexicographic order.
    pub fn from_text<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let distinct: BTreeSet<&str> = values.into_iter().collect();
        Self::from_ordered(distinct.into_iter().map(str::to_string).collect())
    }

    /// Build from numeric values; codes follow numeric order and the stored
    /// values use [`canonical_f64`] text.
    pub fn from_numbers(values: impl IntoIterator<Item = f64>) -> Self {
        let mut distinct: Vec<f64> = values.into_iter().filter(|v| !v.is_nan()).collect();
        distinct.sort_by(|a, b| a.total_cmp(b));
        distinct.dedup();
        Self::from_ordered(distinct.into_iter().map(canonical_f64).collect())
    }

    fn from_ordered(categories: Vec<String>) -> Self {
        let lookup = categories
            .iter()
            .enumerate()
            .map(|(code, value)| (value.clone(), code))
            .collect();
        Self { categories, lookup }
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn code_of(&self, value: &str) -> Option<usize> {
        self.lookup.get(value).copied()
    }

    pub fn value_of(&self, code: usize) -> Option<&str> {
        self.categories.get(code).map(String::as_str)
    }

    /// Translate a value to its code, rejecting anything unseen during fitting
    pub fn encode(&self, column: &str, value: &str) -> Result<usize> {
        self.code_of(value).ok_or_else(|| MlError::UnknownCategory {
            column: column.to_string(),
            value: value.to_string(),
        })
    }

    /// Translate a code back to the original value
    pub fn decode(&self, column: &str, code: usize) -> Result<&str> {
        self.value_of(code).ok_or_else(|| {
            MlError::ValidationError(format!(
                "Code {} is out of range for column '{}' ({} categories)",
                code,
                column,
                self.len()
            ))
        })
    }
}

impl From<ColumnEncoding> for BTreeMap<usize, String> {
    fn from(encoding: ColumnEncoding) -> Self {
        encoding.categories.into_iter().enumerate().collect()
    }
}

impl TryFrom<BTreeMap<usize, String>> for ColumnEncoding {
    type Error = String;

    fn try_from(map: BTreeMap<usize, String>) -> std::result::Result<Self, Self::Error> {
        let mut categories = Vec::with_capacity(map.len());
        for (expected, (code, value)) in map.into_iter().enumerate() {
            if code != expected {
                return Err(format!("encoding codes must be contiguous from 0, found gap at {}", expected));
            }
            categories.push(value);
        }
        Ok(Self::from_ordered(categories))
    }
}

/// Canonical text for a numeric category: integral values drop the
/// fractional part (`3.0` becomes `"3"`).
pub fn canonical_f64(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
