//! Feature preprocessing: raw patient records → feature matrix + labels
//!
//! ## Output layout
//!
//! ```text
//! FeatureMatrix row = [age, gender, race, time_in_hospital,
//!                      num_lab_procedures, num_medications, diabetesMed]
//! LabelVector       = 1 if readmitted == "<30" else 0
//! ```
//!
//! Records without a `readmitted` value are dropped before anything else is
//! computed, so category codes and the age median only see retained rows.

mod columns;
mod vocabulary;

pub use columns::{extract_age_lower_bound, median};
pub use vocabulary::{CategoricalVocabulary, MISSING_CATEGORY};

use crate::storage::StorageEngine;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// Number of model input features.
pub const N_FEATURES: usize = 7;

/// Model input columns, in matrix order.
pub const FEATURE_COLUMNS: [&str; N_FEATURES] = [
    "age",
    "gender",
    "race",
    "time_in_hospital",
    "num_lab_procedures",
    "num_medications",
    "diabetesMed",
];

/// Columns encoded through the [`CategoricalVocabulary`].
pub const CATEGORICAL_COLUMNS: [&str; 3] = ["gender", "race", "diabetesMed"];

/// Label source column.
pub const LABEL_COLUMN: &str = "readmitted";

/// `readmitted` value that marks a positive (early readmission) label.
pub const POSITIVE_LABEL: &str = "<30";

/// One model input row.
pub type FeatureRow = [f64; N_FEATURES];

/// Fixed-width numeric features, one row per retained record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    rows: Vec<FeatureRow>,
}

impl FeatureMatrix {
    /// Create a matrix from rows.
    #[must_use]
    pub fn new(rows: Vec<FeatureRow>) -> Self {
        Self { rows }
    }

    /// Column names, in order.
    #[must_use]
    pub const fn column_names() -> &'static [&'static str; N_FEATURES] {
        &FEATURE_COLUMNS
    }

    /// All rows.
    #[must_use]
    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the matrix has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of columns (always [`N_FEATURES`]).
    #[must_use]
    pub const fn num_columns(&self) -> usize {
        N_FEATURES
    }

    /// Values of one column.
    #[must_use]
    pub fn column(&self, index: usize) -> Vec<f64> {
        self.rows.iter().map(|row| row[index]).collect()
    }

    /// Rows at the given indices, in that order.
    #[must_use]
    pub fn select(&self, indices: &[usize]) -> Self {
        Self::new(indices.iter().map(|&i| self.rows[i]).collect())
    }

    /// First `n` rows (fewer if the matrix is shorter).
    #[must_use]
    pub fn head(&self, n: usize) -> Self {
        Self::new(self.rows.iter().take(n).copied().collect())
    }
}

/// Binary labels aligned with a [`FeatureMatrix`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelVector {
    labels: Vec<u8>,
}

impl LabelVector {
    /// Create a label vector. Any non-zero value counts as positive.
    #[must_use]
    pub fn new(labels: Vec<u8>) -> Self {
        Self {
            labels: labels.into_iter().map(|l| u8::from(l != 0)).collect(),
        }
    }

    /// Labels as a slice of 0/1.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.labels
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Check if there are no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of positive labels.
    #[must_use]
    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&l| l == 1).count()
    }

    /// Labels at the given indices, in that order.
    #[must_use]
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

/// Label for a `readmitted` value.
#[must_use]
pub fn label_for(readmitted: &str) -> u8 {
    u8::from(readmitted == POSITIVE_LABEL)
}

/// Output of [`Preprocessor::preprocess`].
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// Feature matrix.
    pub features: FeatureMatrix,
    /// Labels, aligned with `features`.
    pub labels: LabelVector,
    /// Vocabulary the categorical columns were encoded with.
    pub vocabulary: CategoricalVocabulary,
    /// Records dropped for a missing `readmitted` value.
    pub dropped_rows: usize,
}

/// Turns a raw table into model inputs.
///
/// A fresh preprocessor assigns category codes from scratch. One built with
/// [`with_vocabulary`](Self::with_vocabulary) keeps every known code and
/// appends unseen categories after them.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    vocabulary: CategoricalVocabulary,
}

impl Preprocessor {
    /// Preprocessor with an empty vocabulary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Preprocessor seeded with a persisted vocabulary.
    #[must_use]
    pub const fn with_vocabulary(vocabulary: CategoricalVocabulary) -> Self {
        Self { vocabulary }
    }

    /// Build the feature matrix and label vector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if the label column or any feature column is
    /// absent, or if a value cannot be interpreted.
    #[instrument(skip_all, fields(rows = table.num_rows()))]
    pub fn preprocess(&self, table: &StorageEngine) -> Result<Preprocessed> {
        if !table.has_column(LABEL_COLUMN) {
            return Err(Error::schema(LABEL_COLUMN, "required label column is missing"));
        }
        let missing: Vec<&str> = FEATURE_COLUMNS
            .iter()
            .copied()
            .filter(|column| !table.has_column(column))
            .collect();
        if !missing.is_empty() {
            return Err(Error::schema(
                missing.join(", "),
                "required feature columns are missing",
            ));
        }

        let readmitted = columns::string_values(&table.column(LABEL_COLUMN)?, LABEL_COLUMN)?;
        let retained: Vec<usize> = readmitted
            .iter()
            .enumerate()
            .filter_map(|(i, value)| value.as_ref().map(|_| i))
            .collect();
        let dropped_rows = readmitted.len() - retained.len();
        if dropped_rows > 0 {
            debug!(dropped_rows, "dropped records without a label");
        }

        let labels = LabelVector::new(
            retained
                .iter()
                .map(|&i| readmitted[i].as_deref().map_or(0, label_for))
                .collect(),
        );

        let mut vocabulary = self.vocabulary.clone();
        let mut feature_columns: Vec<Vec<Option<f64>>> = Vec::with_capacity(N_FEATURES);
        for column in FEATURE_COLUMNS {
            let array = table.column(column)?;
            let values = if column == "age" {
                age_feature(&array, &retained)?
            } else if CATEGORICAL_COLUMNS.contains(&column) {
                let strings = columns::string_values(&array, column)?;
                retained
                    .iter()
                    .map(|&i| {
                        let category = strings[i].as_deref().unwrap_or(MISSING_CATEGORY);
                        #[allow(clippy::cast_precision_loss)]
                        let code = vocabulary.encode_or_insert(column, category) as f64;
                        Some(code)
                    })
                    .collect()
            } else {
                let numbers = columns::numeric_values(&array, column)?;
                retained.iter().map(|&i| numbers[i]).collect()
            };
            feature_columns.push(values);
        }

        let mut rows = Vec::with_capacity(retained.len());
        for row_index in 0..retained.len() {
            let mut row = [0.0; N_FEATURES];
            for (col_index, values) in feature_columns.iter().enumerate() {
                let value = values[row_index].unwrap_or(0.0);
                if !value.is_finite() {
                    return Err(Error::schema(
                        FEATURE_COLUMNS[col_index],
                        format!("non-finite value {value}"),
                    ));
                }
                row[col_index] = value;
            }
            rows.push(row);
        }

        info!(
            retained = retained.len(),
            dropped = dropped_rows,
            positives = labels.positives(),
            "preprocessed records"
        );

        Ok(Preprocessed {
            features: FeatureMatrix::new(rows),
            labels,
            vocabulary,
            dropped_rows,
        })
    }
}

/// Age over retained rows; unparsed buckets take the median of parsed ones.
fn age_feature(array: &arrow::array::ArrayRef, retained: &[usize]) -> Result<Vec<Option<f64>>> {
    let (all, bucketed) = columns::age_values(array, "age")?;
    let values: Vec<Option<f64>> = retained.iter().map(|&i| all[i]).collect();
    if !bucketed {
        return Ok(values);
    }

    let unparsed = values.iter().filter(|v| v.is_none()).count();
    if unparsed == 0 {
        return Ok(values);
    }
    let fill = median(&values);
    warn!(
        unparsed,
        median = ?fill,
        "some 'age' values could not be parsed; filling with median age"
    );
    Ok(values.into_iter().map(|v| v.or(fill)).collect())
}

/// Preprocess with a fresh vocabulary, returning only features and labels.
///
/// # Errors
///
/// See [`Preprocessor::preprocess`].
pub fn preprocess(table: &StorageEngine) -> Result<(FeatureMatrix, LabelVector)> {
    let out = Preprocessor::new().preprocess(table)?;
    Ok((out.features, out.labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Int64Array, RecordBatch, StringArray};
    use std::sync::Arc;

    fn table(columns: Vec<(&str, ArrayRef)>) -> StorageEngine {
        StorageEngine::new(vec![RecordBatch::try_from_iter(columns).unwrap()])
    }

    fn strings(values: &[Option<&str>]) -> ArrayRef {
        Arc::new(StringArray::from(values.to_vec()))
    }

    fn ints(values: &[Option<i64>]) -> ArrayRef {
        Arc::new(Int64Array::from(values.to_vec()))
    }

    fn single_patient() -> StorageEngine {
        table(vec![
            ("age", strings(&[Some("[70-80)")])),
            ("gender", strings(&[Some("Male")])),
            ("race", strings(&[Some("Caucasian")])),
            ("time_in_hospital", ints(&[Some(5)])),
            ("num_lab_procedures", ints(&[Some(40)])),
            ("num_medications", ints(&[Some(15)])),
            ("diabetesMed", strings(&[Some("Yes")])),
            ("readmitted", strings(&[Some("<30")])),
        ])
    }

    #[test]
    fn test_single_patient() {
        let (features, labels) = preprocess(&single_patient()).unwrap();
        assert_eq!(features.num_columns(), 7);
        assert_eq!(features.len(), 1);
        assert_eq!(features.rows()[0], [70.0, 0.0, 0.0, 5.0, 40.0, 15.0, 0.0]);
        assert_eq!(labels.as_slice(), &[1]);
    }

    #[test]
    fn test_label_mapping() {
        assert_eq!(label_for("<30"), 1);
        assert_eq!(label_for(">30"), 0);
        assert_eq!(label_for("NO"), 0);
    }

    #[test]
    fn test_drops_unlabelled_rows_and_encodes_retained_only() {
        let storage = table(vec![
            ("age", strings(&[Some("[10-20)"), Some("[20-30)"), Some("[30-40)")])),
            ("gender", strings(&[Some("Unknown"), Some("Female"), Some("Male")])),
            ("race", strings(&[Some("Asian"), Some("Asian"), None])),
            ("time_in_hospital", ints(&[Some(1), None, Some(3)])),
            ("num_lab_procedures", ints(&[Some(1), Some(2), Some(3)])),
            ("num_medications", ints(&[Some(1), Some(2), Some(3)])),
            ("diabetesMed", strings(&[Some("No"), Some("Yes"), Some("No")])),
            ("readmitted", strings(&[None, Some("NO"), Some("<30")])),
        ]);

        let out = Preprocessor::new().preprocess(&storage).unwrap();
        assert_eq!(out.dropped_rows, 1);
        assert_eq!(out.features.len(), 2);
        assert_eq!(out.labels.as_slice(), &[0, 1]);

        // "Unknown" only appeared in the dropped row
        assert_eq!(out.vocabulary.categories("gender").unwrap(), &["Female", "Male"]);
        // missing race becomes its own category
        assert_eq!(out.vocabulary.decode("race", 1), Some(MISSING_CATEGORY));
        // missing numeric value filled with 0
        assert_eq!(out.features.rows()[0][3], 0.0);
    }

    #[test]
    fn test_missing_feature_column_is_schema_error() {
        let storage = table(vec![
            ("age", strings(&[Some("[70-80)")])),
            ("gender", strings(&[Some("Male")])),
            ("readmitted", strings(&[Some("<30")])),
        ]);

        let err = preprocess(&storage).unwrap_err();
        match err {
            Error::Schema { column, .. } => {
                assert!(column.contains("race"));
                assert!(column.contains("num_medications"));
                assert!(!column.contains("age"));
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_label_column_is_schema_error() {
        let storage = table(vec![("age", strings(&[Some("[70-80)")]))]);
        let err = preprocess(&storage).unwrap_err();
        assert!(matches!(err, Error::Schema { ref column, .. } if column == LABEL_COLUMN));
    }

    #[test]
    fn test_unparsable_age_filled_with_median() {
        let storage = table(vec![
            ("age", strings(&[Some("[40-50)"), Some("?"), Some("[60-70)")])),
            ("gender", strings(&[Some("Male"); 3])),
            ("race", strings(&[Some("Caucasian"); 3])),
            ("time_in_hospital", ints(&[Some(1); 3])),
            ("num_lab_procedures", ints(&[Some(1); 3])),
            ("num_medications", ints(&[Some(1); 3])),
            ("diabetesMed", strings(&[Some("Yes"); 3])),
            ("readmitted", strings(&[Some("NO"); 3])),
        ]);

        let (features, _) = preprocess(&storage).unwrap();
        assert_eq!(features.column(0), vec![40.0, 50.0, 60.0]);
    }

    #[test]
    fn test_seeded_vocabulary_keeps_codes() {
        let mut seed = CategoricalVocabulary::new();
        seed.encode_or_insert("gender", "Female");
        seed.encode_or_insert("gender", "Male");

        let out = Preprocessor::with_vocabulary(seed)
            .preprocess(&single_patient())
            .unwrap();
        // "Male" keeps code 1 even though it appears first in this table
        assert_eq!(out.features.rows()[0][1], 1.0);
    }

    #[test]
    fn test_select_and_head() {
        let matrix = FeatureMatrix::new(vec![[0.0; 7], [1.0; 7], [2.0; 7]]);
        assert_eq!(matrix.select(&[2, 0]).column(0), vec![2.0, 0.0]);
        assert_eq!(matrix.head(5).len(), 3);

        let labels = LabelVector::new(vec![0, 3, 1]);
        assert_eq!(labels.as_slice(), &[0, 1, 1]);
        assert_eq!(labels.select(&[1, 0]).as_slice(), &[1, 0]);
    }
}
