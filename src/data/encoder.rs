//! One-hot encoding for declared categorical columns
//!
//! Mirrors `get_dummies` naming: each distinct category becomes a
//! `<prefix>_<category>` indicator column, categories in sorted order.
//! Missing values and categories not seen at fit time encode as an
//! all-zero indicator row.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Fitted vocabulary of a single categorical column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalColumn {
    pub name: String,
    pub prefix: String,
    /// Sorted, deduplicated categories
    pub categories: Vec<String>,
}

impl CategoricalColumn {
    /// Learn the vocabulary of a column. Nulls are not categories.
    pub fn fit<'a>(
        name: impl Into<String>,
        prefix: impl Into<String>,
        values: impl IntoIterator<Item = Option<&'a str>>,
    ) -> Self {
        let categories: BTreeSet<String> = values
            .into_iter()
            .flatten()
            .map(|v| v.to_string())
            .collect();

        Self {
            name: name.into(),
            prefix: prefix.into(),
            categories: categories.into_iter().collect(),
        }
    }

    /// Names of the indicator columns produced by this column
    pub fn indicator_names(&self) -> Vec<String> {
        self.categories
            .iter()
            .map(|c| format!("{}_{}", self.prefix, c))
            .collect()
    }

    /// Indicator position of a value, `None` for nulls and unseen categories
    pub fn index_of(&self, value: Option<&str>) -> Option<usize> {
        let value = value?;
        self.categories
            .binary_search_by(|c| c.as_str().cmp(value))
            .ok()
    }

    pub fn width(&self) -> usize {
        self.categories.len()
    }

    /// Encode values into column-major indicator vectors
    pub fn encode<'a>(&self, values: impl IntoIterator<Item = Option<&'a str>>) -> Vec<Vec<f64>> {
        let values: Vec<Option<&str>> = values.into_iter().collect();
        let mut columns = vec![vec![0.0; values.len()]; self.width()];
        for (row, value) in values.iter().enumerate() {
            if let Some(idx) = self.index_of(*value) {
                columns[idx][row] = 1.0;
            }
        }
        columns
    }
}

/// One-hot encoder over several categorical columns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    columns: Vec<CategoricalColumn>,
}

impl OneHotEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, column: CategoricalColumn) -> Self {
        self.columns.push(column);
        self
    }

    pub fn columns(&self) -> &[CategoricalColumn] {
        &self.columns
    }

    /// Total number of indicator columns
    pub fn width(&self) -> usize {
        self.columns.iter().map(|c| c.width()).sum()
    }

    /// Indicator column names in output order
    pub fn feature_names(&self) -> Vec<String> {
        self.columns.iter().flat_map(|c| c.indicator_names()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
