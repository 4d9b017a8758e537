//! Categorical vocabulary - persisted string → integer codes
//!
//! Codes are assigned in order of first appearance. Once a category has a
//! code it never changes, so a vocabulary logged next to a model can be
//! reused by later training runs and by serving without shifting codes.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Token a missing categorical value is encoded as.
pub const MISSING_CATEGORY: &str = "nan";

/// Per-column category → code mapping. The code is the position in the list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalVocabulary {
    columns: BTreeMap<String, Vec<String>>,
}

impl CategoricalVocabulary {
    /// Create an empty vocabulary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if no column has any category.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.values().all(Vec::is_empty)
    }

    /// Categories of a column, indexed by code.
    #[must_use]
    pub fn categories(&self, column: &str) -> Option<&[String]> {
        self.columns.get(column).map(Vec::as_slice)
    }

    /// Code of a known category, without extending the vocabulary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if the column or category was never seen.
    pub fn encode(&self, column: &str, value: &str) -> Result<usize> {
        self.columns
            .get(column)
            .and_then(|categories| categories.iter().position(|c| c == value))
            .ok_or_else(|| Error::schema(column, format!("unseen category '{value}'")))
    }

    /// Category for a code.
    #[must_use]
    pub fn decode(&self, column: &str, code: usize) -> Option<&str> {
        self.columns
            .get(column)
            .and_then(|categories| categories.get(code))
            .map(String::as_str)
    }

    /// Code of a category, appending it when unseen.
    pub fn encode_or_insert(&mut self, column: &str, value: &str) -> usize {
        let categories = self.columns.entry(column.to_string()).or_default();
        if let Some(code) = categories.iter().position(|c| c == value) {
            return code;
        }
        categories.push(value.to_string());
        categories.len() - 1
    }
}
