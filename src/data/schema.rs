//! Feature schema shared by training, evaluation and exported-model inference

use crate::error::{PipelineError, Result};
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

use super::encoder::OneHotEncoder;
use super::loader::{category_values, numeric_values};

/// Ordered, fixed-width description of the model input.
///
/// Numeric columns come first in dataset order, followed by the one-hot
/// indicator columns. The exported graph addresses features by position, so
/// the export-safe names are simply `f0..f{n-1}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    numeric_columns: Vec<String>,
    encoder: OneHotEncoder,
    feature_names: Vec<String>,
}

impl FeatureSchema {
    pub fn new(numeric_columns: Vec<String>, encoder: OneHotEncoder) -> Self {
        let feature_names = numeric_columns
            .iter()
            .cloned()
            .chain(encoder.feature_names())
            .collect();
        Self {
            numeric_columns,
            encoder,
            feature_names,
        }
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn numeric_columns(&self) -> &[String] {
        &self.numeric_columns
    }

    pub fn encoder(&self) -> &OneHotEncoder {
        &self.encoder
    }

    /// Export-safe feature names, positionally aligned with [`Self::feature_names`]
    pub fn onnx_names(&self) -> Vec<String> {
        (0..self.n_features()).map(|i| format!("f{}", i)).collect()
    }

    /// Encode a frame into the model's input matrix.
    ///
    /// Numeric nulls become `NaN`; categorical values go through the fitted
    /// vocabulary, so unseen categories yield all-zero indicators.
    pub fn encode(&self, df: &DataFrame) -> Result<Array2<f64>> {
        let n_rows = df.height();
        let mut col_data: Vec<Vec<f64>> = Vec::with_capacity(self.n_features());

        for name in &self.numeric_columns {
            col_data.push(numeric_values(df, name)?);
        }

        for column in self.encoder.columns() {
            let values = category_values(df, &column.name)?;
            col_data.extend(column.encode(values.iter().map(|v| v.as_deref())));
        }

        if col_data.len() != self.n_features() {
            return Err(PipelineError::ShapeError {
                expected: format!("{} features", self.n_features()),
                actual: format!("{} encoded columns", col_data.len()),
            });
        }

        let col_refs: Vec<&[f64]> = col_data.iter().map(|c| c.as_slice()).collect();
        Ok(Array2::from_shape_fn((n_rows, col_refs.len()), |(r, c)| col_refs[c][r]))
    }

    /// Write the `original_name,onnx_name` mapping side file
    pub fn write_feature_map(&self, path: &Path) -> Result<()> {
        let columns: Vec<Column> = vec![
            Series::new("original_name".into(), self.feature_names.clone()).into(),
            Series::new("onnx_name".into(), self.onnx_names()).into(),
        ];
        let mut df = DataFrame::new(columns)?;

        let mut file = File::create(path).map_err(|e| {
            PipelineError::DataError(format!("cannot create {}: {}", path.display(), e))
        })?;
        CsvWriter::new(&mut file).finish(&mut df)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::encoder::CategoricalColumn;

    fn schema() -> FeatureSchema {
        let encoder = OneHotEncoder::new().with_column(CategoricalColumn::fit(
            "substrate_type",
            "substrate",
            vec![Some("manure"), Some("olive")],
        ));
        FeatureSchema::new(vec!["temperature".into(), "ph".into()], encoder)
    }

    #[test]
    fn test_feature_order() {
        let s = schema();
        assert_eq!(
            s.feature_names(),
            &["temperature", "ph", "substrate_manure", "substrate_olive"]
        );
        assert_eq!(s.onnx_names(), vec!["f0", "f1", "f2", "f3"]);
    }

    #[test]
    fn test_encode_frame() {
        let df = DataFrame::new(vec![
            Series::new("temperature".into(), vec![Some(35.0), None]).into(),
            Series::new("ph".into(), vec![7.0, 6.5]).into(),
            Series::new("substrate_type".into(), vec!["olive", "unknown"]).into(),
        ])
        .unwrap();

        let x = schema().encode(&df).unwrap();
        assert_eq!(x.dim(), (2, 4));
        assert_eq!(x[[0, 0]], 35.0);
        assert!(x[[1, 0]].is_nan());
        assert_eq!(x.row(0).to_vec()[2..], [0.0, 1.0]);
        assert_eq!(x.row(1).to_vec()[2..], [0.0, 0.0]);
    }

    #[test]
    fn test_encode_missing_column() {
        let df = DataFrame::new(vec![Series::new("temperature".into(), vec![1.0]).into()]).unwrap();
        let err = schema().encode(&df).unwrap_err();
        assert!(matches!(err, PipelineError::ColumnNotFound(ref c) if c == "ph"));
    }

    #[test]
    fn test_write_feature_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feature_mapping.csv");
        schema().write_feature_map(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("original_name,onnx_name"));
        assert_eq!(lines.next(), Some("temperature,f0"));
        assert_eq!(text.lines().count(), 5);
    }
}
