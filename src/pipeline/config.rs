//! Pipeline configuration and the built-in presets

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::data::{DataConfig, SplitConfig};
use crate::error::{PipelineError, Result};
use crate::export::DEFAULT_TOLERANCE;
use crate::optimizer::{SamplerType, SearchSpace};
use crate::training::{LightGBMConfig, ModelSpec, TaskKind, TreeMethod, XGBoostConfig};

/// Hyperparameter search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Trial budget; 0 disables the search
    pub n_trials: usize,
    pub sampler: SamplerType,
    pub n_startup_trials: usize,
    pub seed: Option<u64>,
    /// Patience over the held-out metric, for trials and the final fit
    pub early_stopping_rounds: Option<usize>,
    /// Replaces the family's default search space
    pub space: Option<SearchSpace>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            n_trials: 0,
            sampler: SamplerType::Tpe,
            n_startup_trials: 10,
            seed: Some(42),
            early_stopping_rounds: None,
            space: None,
        }
    }
}

impl SearchConfig {
    pub fn with_n_trials(mut self, n: usize) -> Self {
        self.n_trials = n;
        self
    }

    pub fn with_early_stopping(mut self, rounds: usize) -> Self {
        self.early_stopping_rounds = Some(rounds);
        self
    }

    pub fn with_space(mut self, space: SearchSpace) -> Self {
        self.space = Some(space);
        self
    }

    pub fn enabled(&self) -> bool {
        self.n_trials > 0
    }
}

/// Artifact settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// ONNX output path; `None` skips the export
    pub model_path: Option<PathBuf>,
    /// `original_name,onnx_name` CSV
    pub feature_map_path: Option<PathBuf>,
    /// ONNX graph name
    pub model_name: String,
    /// Reload the file and compare held-out metrics
    pub verify: bool,
    pub tolerance: f64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            feature_map_path: None,
            model_name: "TreeEnsemble".to_string(),
            verify: true,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// Everything one pipeline run needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub data: DataConfig,
    #[serde(default)]
    pub split: SplitConfig,
    #[serde(default)]
    pub task: TaskKind,
    #[serde(default)]
    pub model: ModelSpec,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub export: ExportConfig,
    /// JSON run report
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn new(data: DataConfig, task: TaskKind, model: ModelSpec) -> Self {
        Self {
            data,
            split: SplitConfig::default(),
            task,
            model,
            search: SearchConfig::default(),
            export: ExportConfig::default(),
            report_path: None,
        }
    }

    pub fn with_split(mut self, split: SplitConfig) -> Self {
        self.split = split;
        self
    }

    pub fn with_search(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    pub fn with_export(mut self, export: ExportConfig) -> Self {
        self.export = export;
        self
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.export.model_path = Some(path.into());
        self
    }

    pub fn with_report(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }

    /// Stratify when asked to, or by default for classification
    pub fn stratify(&self) -> bool {
        self.split.stratify.unwrap_or(self.task == TaskKind::Classification)
    }

    /// Search space in effect for this run
    pub fn search_space(&self) -> SearchSpace {
        self.search
            .space
            .clone()
            .unwrap_or_else(|| self.model.default_search_space(self.task))
    }

    pub fn validate(&self) -> Result<()> {
        if self.data.target_column.is_empty() {
            return Err(PipelineError::ConfigError("target column is empty".to_string()));
        }
        if !(self.split.test_fraction > 0.0 && self.split.test_fraction < 1.0) {
            return Err(PipelineError::invalid_param(
                "test_fraction",
                self.split.test_fraction,
                "must be in (0, 1)",
            ));
        }
        if !(self.export.tolerance >= 0.0) {
            return Err(PipelineError::invalid_param("tolerance", self.export.tolerance, "must be non-negative"));
        }
        if self.stratify() && self.task == TaskKind::Regression {
            return Err(PipelineError::ConfigError(
                "stratified splitting needs a classification task".to_string(),
            ));
        }
        self.model.validate()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file; relative data and output paths resolve against the file's directory
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&json)?;
        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.data.path);
        if let Some(p) = self.export.model_path.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.export.feature_map_path.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.report_path.as_mut() {
            resolve(p);
        }
    }

    /// Built-in configuration for one of the plant's training jobs
    pub fn preset(preset: Preset, data_path: impl Into<PathBuf>, target: Option<&str>) -> Result<Self> {
        let data_path = data_path.into();
        let target = target.map(str::to_string);

        let config = match preset {
            Preset::Biogas => {
                let data = DataConfig::new(data_path, target.unwrap_or_else(|| "biogas_production_output".into()))
                    .with_drop_columns(&["timestamp"])
                    .with_categorical("substrate_type", Some("substrate"));
                Self::new(data, TaskKind::Regression, ModelSpec::LightGBM(preset_lightgbm()))
                    .with_export(ExportConfig {
                        model_name: "BiogasProductionPredictor".to_string(),
                        model_path: Some("biogas_production_predictor.onnx".into()),
                        ..Default::default()
                    })
            }
            Preset::OptimalParameter => {
                let target = target.unwrap_or_else(|| "optimal_temperature".into());
                // The other two optimal_* columns are targets of sibling models
                let drop: Vec<&str> = ["timestamp", "optimal_temperature", "optimal_ph", "optimal_airflow"]
                    .into_iter()
                    .filter(|c| *c != target)
                    .collect();
                let output = format!("{}_predictor.onnx", target.replace(' ', "_"));
                let data = DataConfig::new(data_path, target)
                    .with_drop_columns(&drop)
                    .with_categorical("substrate_type", Some("substrate"));
                Self::new(data, TaskKind::Regression, ModelSpec::LightGBM(preset_lightgbm())).with_export(
                    ExportConfig {
                        model_name: "OptimalParameterPredictor".to_string(),
                        model_path: Some(output.into()),
                        ..Default::default()
                    },
                )
            }
            Preset::Anomaly => {
                let data = DataConfig::new(data_path, target.unwrap_or_else(|| "anomaly_label".into()))
                    .with_drop_columns(&["timestamp", "anomaly_type"]);
                let model = ModelSpec::XGBoost(XGBoostConfig {
                    tree_method: TreeMethod::GpuHist,
                    ..Default::default()
                });
                Self::new(data, TaskKind::Classification, model)
                    .with_split(SplitConfig {
                        stratify: Some(true),
                        ..Default::default()
                    })
                    .with_search(SearchConfig::default().with_n_trials(50).with_early_stopping(10))
                    .with_export(ExportConfig {
                        model_name: "XGBoostAnomalyDetector".to_string(),
                        model_path: Some("xgboost_anomaly_detector.onnx".into()),
                        feature_map_path: Some("feature_mapping.csv".into()),
                        ..Default::default()
                    })
            }
            Preset::XGBoostRegression => {
                let target = target.ok_or_else(|| {
                    PipelineError::ConfigError("the xgboost-regression preset needs a target column".to_string())
                })?;
                let data = DataConfig::new(data_path, target);
                Self::new(data, TaskKind::Regression, ModelSpec::XGBoost(XGBoostConfig::default()))
                    .with_search(SearchConfig::default().with_n_trials(100))
                    .with_export(ExportConfig {
                        model_name: "XGBoostRegressor".to_string(),
                        model_path: Some("xgboost_regressor.onnx".into()),
                        ..Default::default()
                    })
            }
        };

        config.validate()?;
        Ok(config)
    }
}

/// Hand-chosen LightGBM parameters of the regression presets
fn preset_lightgbm() -> LightGBMConfig {
    LightGBMConfig {
        num_leaves: 31,
        learning_rate: 0.05,
        n_estimators: 1000,
        random_state: Some(42),
        ..Default::default()
    }
}

/// Built-in training jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// LightGBM regressor for biogas production output
    Biogas,
    /// LightGBM regressor for one optimal process parameter
    OptimalParameter,
    /// Tuned XGBoost classifier for anomaly labels
    Anomaly,
    /// Tuned XGBoost regressor for any numeric target
    XGBoostRegression,
}

impl Preset {
    pub const ALL: [Preset; 4] = [
        Preset::Biogas,
        Preset::OptimalParameter,
        Preset::Anomaly,
        Preset::XGBoostRegression,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Preset::Biogas => "biogas",
            Preset::OptimalParameter => "optimal-parameter",
            Preset::Anomaly => "anomaly",
            Preset::XGBoostRegression => "xgboost-regression",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Preset::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| PipelineError::ConfigError(format!("unknown preset '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_json() {
        let config = PipelineConfig::from_json(
            r#"{
                "data": {"path": "data.csv", "target_column": "y"},
                "task": "classification",
                "model": {"family": "xgboost", "params": {"max_depth": 4}}
            }"#,
        )
        .unwrap();

        assert_eq!(config.task, TaskKind::Classification);
        assert!(config.stratify());
        assert_eq!(config.split.test_fraction, 0.2);
        assert!(!config.search.enabled());
        assert!(config.export.verify);
        assert_eq!(config.search_space().len(), 7);
    }

    #[test]
    fn test_invalid_json_rejected() {
        let bad_fraction = r#"{"data": {"path": "d.csv", "target_column": "y"}, "split": {"test_fraction": 1.5}}"#;
        assert!(matches!(
            PipelineConfig::from_json(bad_fraction),
            Err(PipelineError::InvalidParameter { .. })
        ));

        let bad_model = r#"{"data": {"path": "d.csv", "target_column": "y"},
                            "model": {"family": "lightgbm", "params": {"num_leaves": 1}}}"#;
        assert!(PipelineConfig::from_json(bad_model).is_err());

        let stratified_regression = r#"{"data": {"path": "d.csv", "target_column": "y"}, "split": {"stratify": true}}"#;
        assert!(matches!(
            PipelineConfig::from_json(stratified_regression),
            Err(PipelineError::ConfigError(_))
        ));
    }

    #[test]
    fn test_presets() {
        let biogas = PipelineConfig::preset(Preset::Biogas, "prod.csv", None).unwrap();
        assert_eq!(biogas.data.target_column, "biogas_production_output");
        assert_eq!(biogas.data.categorical_prefixes["substrate_type"], "substrate");
        assert_eq!(biogas.task, TaskKind::Regression);
        assert!(!biogas.search.enabled());

        let ph = PipelineConfig::preset(Preset::OptimalParameter, "opt.csv", Some("optimal_ph")).unwrap();
        assert!(ph.data.drop_columns.contains(&"optimal_temperature".to_string()));
        assert!(!ph.data.drop_columns.contains(&"optimal_ph".to_string()));
        assert_eq!(ph.export.model_path, Some(PathBuf::from("optimal_ph_predictor.onnx")));

        let anomaly = PipelineConfig::preset(Preset::Anomaly, "anomaly.csv", None).unwrap();
        assert_eq!(anomaly.task, TaskKind::Classification);
        assert_eq!(anomaly.search.n_trials, 50);
        assert_eq!(anomaly.search.early_stopping_rounds, Some(10));
        assert!(anomaly.export.feature_map_path.is_some());

        assert!(PipelineConfig::preset(Preset::XGBoostRegression, "x.csv", None).is_err());
        let xgb = PipelineConfig::preset(Preset::XGBoostRegression, "x.csv", Some("y")).unwrap();
        assert_eq!(xgb.search.n_trials, 100);
    }

    #[test]
    fn test_preset_names_roundtrip() {
        for preset in Preset::ALL {
            assert_eq!(preset.name().parse::<Preset>().unwrap(), preset);
        }
        assert!("nope".parse::<Preset>().is_err());
    }

    #[test]
    fn test_save_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::preset(Preset::Biogas, "prod.csv", None).unwrap().with_report("report.json");
        let path = dir.path().join("pipeline.json");
        config.save(&path).unwrap();

        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded.data.path, dir.path().join("prod.csv"));
        assert_eq!(loaded.report_path, Some(dir.path().join("report.json")));
        assert_eq!(loaded.export.model_name, "BiogasProductionPredictor");
    }
}
