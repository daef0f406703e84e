//! CSV loading and feature/target extraction

use crate::error::{PipelineError, Result};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::encoder::{CategoricalColumn, OneHotEncoder};
use super::schema::FeatureSchema;

/// Column selection rules for one dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// CSV file with a header row
    pub path: PathBuf,
    /// Column to predict
    pub target_column: String,
    /// Identifier / label columns excluded from the features
    #[serde(default)]
    pub drop_columns: Vec<String>,
    /// Columns to one-hot encode
    #[serde(default)]
    pub categorical_columns: Vec<String>,
    /// Indicator prefix per categorical column (defaults to the column name)
    #[serde(default)]
    pub categorical_prefixes: HashMap<String, String>,
}

impl DataConfig {
    pub fn new(path: impl Into<PathBuf>, target_column: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            target_column: target_column.into(),
            drop_columns: Vec::new(),
            categorical_columns: Vec::new(),
            categorical_prefixes: HashMap::new(),
        }
    }

    pub fn with_drop_columns(mut self, columns: &[&str]) -> Self {
        self.drop_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_categorical(mut self, column: impl Into<String>, prefix: Option<&str>) -> Self {
        let column = column.into();
        if let Some(prefix) = prefix {
            self.categorical_prefixes.insert(column.clone(), prefix.to_string());
        }
        self.categorical_columns.push(column);
        self
    }
}

/// Fully numeric features plus target, with the schema that produced them
#[derive(Debug, Clone)]
pub struct Dataset {
    pub x: Array2<f64>,
    pub y: Array1<f64>,
    pub schema: FeatureSchema,
}

impl Dataset {
    pub fn n_samples(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }
}

/// CSV data loader
pub struct DataLoader {
    infer_schema_length: Option<usize>,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    pub fn new() -> Self {
        Self {
            infer_schema_length: Some(1000),
        }
    }

    /// Rows scanned for dtype inference (`None` scans the whole file)
    pub fn with_infer_schema_length(mut self, rows: Option<usize>) -> Self {
        self.infer_schema_length = rows;
        self
    }

    /// Read a CSV file with a header row
    pub fn read_csv(&self, path: &Path) -> Result<DataFrame> {
        let file = File::open(path).map_err(|e| {
            PipelineError::DataError(format!("cannot open dataset {}: {}", path.display(), e))
        })?;

        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(self.infer_schema_length)
            .into_reader_with_file_handle(file)
            .finish()?;

        debug!(path = %path.display(), rows = df.height(), cols = df.width(), "CSV loaded");
        Ok(df)
    }

    /// Read and prepare the dataset described by `config`
    pub fn load(&self, config: &DataConfig) -> Result<Dataset> {
        let df = self.read_csv(&config.path)?;
        let dataset = self.prepare(&df, config)?;
        info!(
            path = %config.path.display(),
            rows = dataset.n_samples(),
            features = dataset.n_features(),
            "Dataset prepared"
        );
        Ok(dataset)
    }

    /// Select, validate and encode the columns of an in-memory frame
    pub fn prepare(&self, df: &DataFrame, config: &DataConfig) -> Result<Dataset> {
        if df.height() == 0 {
            return Err(PipelineError::EmptyDataset(config.path.display().to_string()));
        }

        let column_names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        let has_column = |name: &str| column_names.iter().any(|c| c == name);

        if !has_column(&config.target_column) {
            return Err(PipelineError::ColumnNotFound(config.target_column.clone()));
        }
        for name in config.drop_columns.iter().chain(&config.categorical_columns) {
            if !has_column(name) {
                return Err(PipelineError::ColumnNotFound(name.clone()));
            }
        }

        let y = Array1::from_vec(target_values(df, &config.target_column)?);

        let mut numeric_columns = Vec::new();
        for name in &column_names {
            if *name == config.target_column
                || config.drop_columns.contains(name)
                || config.categorical_columns.contains(name)
            {
                continue;
            }

            let dtype = df.column(name)?.dtype().clone();
            if dtype.is_primitive_numeric() || dtype == DataType::Boolean {
                numeric_columns.push(name.clone());
            } else {
                return Err(PipelineError::UnsupportedColumnType {
                    column: name.clone(),
                    dtype: format!("{} (declare it categorical or drop it)", dtype),
                });
            }
        }

        let mut encoder = OneHotEncoder::new();
        for name in &config.categorical_columns {
            let values = category_values(df, name)?;
            let prefix = config
                .categorical_prefixes
                .get(name)
                .cloned()
                .unwrap_or_else(|| name.clone());
            encoder = encoder.with_column(CategoricalColumn::fit(
                name.clone(),
                prefix,
                values.iter().map(|v| v.as_deref()),
            ));
        }

        let schema = FeatureSchema::new(numeric_columns, encoder);
        if schema.n_features() == 0 {
            return Err(PipelineError::DataError(
                "no feature columns remain after dropping target and excluded columns".to_string(),
            ));
        }

        let x = schema.encode(df)?;
        Ok(Dataset { x, y, schema })
    }
}

/// Numeric feature values; nulls become `NaN`
pub(crate) fn numeric_values(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let series = df
        .column(name)
        .map_err(|_| PipelineError::ColumnNotFound(name.to_string()))?
        .as_materialized_series();

    let dtype = series.dtype();
    if !(dtype.is_primitive_numeric() || *dtype == DataType::Boolean) {
        return Err(PipelineError::UnsupportedColumnType {
            column: name.to_string(),
            dtype: dtype.to_string(),
        });
    }

    let as_f64 = series.cast(&DataType::Float64)?;
    Ok(as_f64
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

/// Categorical values rendered as strings; nulls stay `None`
pub(crate) fn category_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = df
        .column(name)
        .map_err(|_| PipelineError::ColumnNotFound(name.to_string()))?
        .as_materialized_series();

    let dtype = series.dtype();
    if !(dtype.is_primitive_numeric() || *dtype == DataType::Boolean || *dtype == DataType::String) {
        return Err(PipelineError::UnsupportedColumnType {
            column: name.to_string(),
            dtype: dtype.to_string(),
        });
    }

    let as_str = series.cast(&DataType::String)?;
    Ok(as_str
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.to_string()))
        .collect())
}

fn target_values(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let values = numeric_values(df, name)?;
    let missing = values.iter().filter(|v| v.is_nan()).count();
    if missing > 0 {
        return Err(PipelineError::DataError(format!(
            "target column '{}' has {} missing values",
            name, missing
        )));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn frame() -> DataFrame {
        DataFrame::new(vec![
            Series::new("timestamp".into(), vec!["t0", "t1", "t2", "t3"]).into(),
            Series::new("temperature".into(), vec![35.0, 36.5, 34.0, 37.0]).into(),
            Series::new("substrate_type".into(), vec!["olive", "manure", "olive", "food"]).into(),
            Series::new("biogas_production_output".into(), vec![40.0, 42.0, 38.0, 44.0]).into(),
        ])
        .unwrap()
    }

    fn config() -> DataConfig {
        DataConfig::new("memory.csv", "biogas_production_output")
            .with_drop_columns(&["timestamp"])
            .with_categorical("substrate_type", Some("substrate"))
    }

    #[test]
    fn test_prepare_encodes_and_orders_features() {
        let ds = DataLoader::new().prepare(&frame(), &config()).unwrap();
        assert_eq!(
            ds.schema.feature_names(),
            &["temperature", "substrate_food", "substrate_manure", "substrate_olive"]
        );
        assert_eq!(ds.x.dim(), (4, 4));
        assert_eq!(ds.y.to_vec(), vec![40.0, 42.0, 38.0, 44.0]);
        assert_eq!(ds.x.row(1).to_vec(), vec![36.5, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_missing_target_column() {
        let cfg = DataConfig::new("memory.csv", "does_not_exist");
        let err = DataLoader::new().prepare(&frame(), &cfg).unwrap_err();
        assert!(matches!(err, PipelineError::ColumnNotFound(ref c) if c == "does_not_exist"));
    }

    #[test]
    fn test_undeclared_string_column_fails() {
        let cfg = DataConfig::new("memory.csv", "biogas_production_output")
            .with_drop_columns(&["timestamp"]);
        let err = DataLoader::new().prepare(&frame(), &cfg).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedColumnType { ref column, .. } if column == "substrate_type"));
    }

    #[test]
    fn test_empty_dataset() {
        let df = frame().head(Some(0));
        let err = DataLoader::new().prepare(&df, &config()).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyDataset(_)));
    }

    #[test]
    fn test_null_target_rejected() {
        let df = DataFrame::new(vec![
            Series::new("x".into(), vec![1.0, 2.0]).into(),
            Series::new("y".into(), vec![Some(1.0), None]).into(),
        ])
        .unwrap();
        let err = DataLoader::new()
            .prepare(&df, &DataConfig::new("memory.csv", "y"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::DataError(_)));
    }

    #[test]
    fn test_load_csv_file() {
        let mut tmp = tempfile::NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(tmp, "timestamp,temperature,substrate_type,biogas_production_output").unwrap();
        writeln!(tmp, "2024-01-01,35.0,olive,40.0").unwrap();
        writeln!(tmp, "2024-01-02,36.0,manure,41.0").unwrap();
        tmp.flush().unwrap();

        let mut cfg = config();
        cfg.path = tmp.path().to_path_buf();
        let ds = DataLoader::new().load(&cfg).unwrap();
        assert_eq!(ds.n_samples(), 2);
        assert_eq!(ds.n_features(), 3);
    }

    #[test]
    fn test_missing_file() {
        let cfg = DataConfig::new("/nonexistent/dir/data.csv", "y");
        let err = DataLoader::new().load(&cfg).unwrap_err();
        assert!(matches!(err, PipelineError::DataError(_)));
    }
}
