//! Arrow column → per-row values, with the conversions the preprocessor needs.

use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type};
use regex::Regex;
use std::sync::OnceLock;

/// First `<digits>-<digits>` bucket; the lower bound is captured.
const AGE_BUCKET_PATTERN: &str = r"([0-9]+)-[0-9]+";

fn age_bucket() -> &'static Regex {
    static AGE_BUCKET: OnceLock<Regex> = OnceLock::new();
    AGE_BUCKET.get_or_init(|| Regex::new(AGE_BUCKET_PATTERN).expect("AGE_BUCKET_PATTERN compiles"))
}

const fn is_string_type(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View | DataType::Dictionary(_, _)
    )
}

/// Column values as strings; non-string columns are stringified.
pub(crate) fn string_values(array: &ArrayRef, column: &str) -> Result<Vec<Option<String>>> {
    let utf8 = cast(array, &DataType::Utf8)
        .map_err(|e| Error::schema(column, format!("cannot read as text: {e}")))?;
    let strings = utf8.as_string::<i32>();
    Ok(strings.iter().map(|v| v.map(str::to_string)).collect())
}

/// Column values as `f64`. String columns are parsed; an unparsable,
/// non-empty value is a schema error.
pub(crate) fn numeric_values(array: &ArrayRef, column: &str) -> Result<Vec<Option<f64>>> {
    if is_string_type(array.data_type()) {
        return string_values(array, column)?
            .into_iter()
            .map(|value| match value.as_deref().map(str::trim) {
                None | Some("") => Ok(None),
                Some(text) => text.parse::<f64>().map(Some).map_err(|_| {
                    Error::schema(column, format!("non-numeric value '{text}'"))
                }),
            })
            .collect();
    }

    if !array.data_type().is_numeric() && array.data_type() != &DataType::Boolean {
        return Err(Error::schema(
            column,
            format!("unsupported column type {}", array.data_type()),
        ));
    }

    let floats = cast(array, &DataType::Float64)
        .map_err(|e| Error::schema(column, format!("cannot cast to f64: {e}")))?;
    Ok(floats.as_primitive::<Float64Type>().iter().collect())
}

/// Lower bound of an age bucket such as `"[70-80)"`.
#[must_use]
pub fn extract_age_lower_bound(value: &str) -> Option<f64> {
    age_bucket()
        .captures(value)
        .and_then(|caps| caps.get(1))
        .and_then(|lower| lower.as_str().parse::<f64>().ok())
}

/// Age values: bucket strings are reduced to their lower bound, numeric
/// columns pass through. The flag is true when the column held buckets.
pub(crate) fn age_values(array: &ArrayRef, column: &str) -> Result<(Vec<Option<f64>>, bool)> {
    if !is_string_type(array.data_type()) {
        return Ok((numeric_values(array, column)?, false));
    }

    let values = string_values(array, column)?
        .iter()
        .map(|value| value.as_deref().and_then(extract_age_lower_bound))
        .collect();
    Ok((values, true))
}

/// Median of the present values, `None` when there are none.
#[must_use]
pub fn median(values: &[Option<f64>]) -> Option<f64> {
    let mut present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        return None;
    }
    present.sort_by(f64::total_cmp);
    let mid = present.len() / 2;
    if present.len() % 2 == 0 {
        Some((present[mid - 1] + present[mid]) / 2.0)
    } else {
        Some(present[mid])
    }
}
