//! Column-wise missing value imputation

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Placeholder used when a text column has no observed value at all
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Value substituted for missing cells of one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FillValue {
    Numeric(f64),
    Text(String),
}

/// Records the fill value chosen for each column so the same policy can be
/// replayed on prediction inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Imputer {
    fill_values: BTreeMap<String, FillValue>,
}

impl Imputer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Median imputation; falls back to 0 when the column has no finite value.
    pub fn impute_numeric(&mut self, column: &str, values: &mut [Option<f64>]) {
        let fill = median(values).unwrap_or(0.0);
        for v in values.iter_mut() {
            if !matches!(v, Some(x) if x.is_finite()) {
                *v = Some(fill);
            }
        }
        self.fill_values.insert(column.to_string(), FillValue::Numeric(fill));
    }

    /// Mode imputation; falls back to [`UNKNOWN_CATEGORY`].
    pub fn impute_text(&mut self, column: &str, values: &mut [Option<String>]) {
        let fill = mode(values).unwrap_or_else(|| UNKNOWN_CATEGORY.to_string());
        for v in values.iter_mut() {
            if v.is_none() {
                *v = Some(fill.clone());
            }
        }
        self.fill_values.insert(column.to_string(), FillValue::Text(fill));
    }

    pub fn fill_value(&self, column: &str) -> Option<&FillValue> {
        self.fill_values.get(column)
    }

    pub fn into_fill_values(self) -> BTreeMap<String, FillValue> {
        self.fill_values
    }
}

/// Median over the finite, present values
pub fn median(values: &[Option<f64>]) -> Option<f64> {
    let mut observed: Vec<f64> = values
        .iter()
        .filter_map(|v| *v)
        .filter(|x| x.is_finite())
        .collect();
    if observed.is_empty() {
        return None;
    }
    observed.sort_by(|a, b| a.total_cmp(b));
    let mid = observed.len() / 2;
    if observed.len() % 2 == 0 {
        Some((observed[mid - 1] + observed[mid]) / 2.0)
    } else {
        Some(observed[mid])
    }
}

/// Most frequent present value; ties resolve to the lexicographically
/// smallest candidate.
pub fn mode(values: &[Option<String>]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for v in values.iter().flatten() {
        *counts.entry(v.as_str()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|(a_val, a_count), (b_val, b_count)| {
            a_count.cmp(b_count).then_with(|| b_val.cmp(a_val))
        })
        .map(|(value, _)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&[Some(3.0), Some(1.0), Some(2.0)]), Some(2.0));
        assert_eq!(median(&[Some(4.0), None, Some(1.0), Some(2.0), Some(3.0)]), Some(2.5));
        assert_eq!(median(&[None, Some(f64::NAN)]), None);
    }

    #[test]
    fn test_mode_tie_breaks_lexicographically() {
        let values = vec![
            Some("b".to_string()),
            Some("a".to_string()),
            None,
            Some("b".to_string()),
            Some("a".to_string()),
        ];
        assert_eq!(mode(&values), Some("a".to_string()));
    }

    #[test]
    fn test_numeric_imputation_uses_median() {
        let mut imputer = Imputer::new();
        let mut values = vec![Some(10.0), None, Some(30.0), Some(f64::NAN), Some(20.0)];
        imputer.impute_numeric("x", &mut values);
        assert_eq!(values, vec![Some(10.0), Some(20.0), Some(30.0), Some(20.0), Some(20.0)]);
        assert_eq!(imputer.fill_value("x"), Some(&FillValue::Numeric(20.0)));
    }

    #[test]
    fn test_all_missing_fallbacks() {
        let mut imputer = Imputer::new();
        let mut numbers = vec![None, None];
        imputer.impute_numeric("n", &mut numbers);
        assert_eq!(numbers, vec![Some(0.0), Some(0.0)]);

        let mut words: Vec<Option<String>> = vec![None];
        imputer.impute_text("w", &mut words);
        assert_eq!(words, vec![Some(UNKNOWN_CATEGORY.to_string())]);
    }
}
