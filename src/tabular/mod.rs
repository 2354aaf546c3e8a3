//! Tabular datasets: loading, cleaning and tensor preparation
//!
//! Files are read into a polars [`DataFrame`](polars::prelude::DataFrame) by
//! [`TabularLoader`], cleaned into a serialization-safe shape, and turned into
//! an `(X, y)` pair by [`TabularPreparer`] which also records the reversible
//! categorical encodings a later prediction needs. [`FeatureLayout`] applies
//! those encodings to new rows.

pub mod cleaning;
pub mod encoding;
pub mod imputer;
pub mod layout;
pub mod loader;
pub mod prepare;

pub use cleaning::{clean, NumericFill};
pub use encoding::{canonical_f64, ColumnEncoding, EncodingMap};
pub use imputer::{FillValue, Imputer};
pub use layout::FeatureLayout;
pub use loader::{decode_text, TabularFormat, TabularLoader, TextEncoding};
pub use prepare::{prepare, PreparedTable, TabularPreparer};

use polars::prelude::DataType;

pub(crate) fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

pub(crate) fn is_float_dtype(dtype: &DataType) -> bool {
    matches!(dtype, DataType::Float32 | DataType::Float64)
}

pub(crate) fn is_text_dtype(dtype: &DataType) -> bool {
    matches!(dtype, DataType::String | DataType::Categorical(_, _))
}
