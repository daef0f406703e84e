//! Search space definition for hyperparameters

use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Type of parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterType {
    /// Continuous float parameter
    Float {
        low: f64,
        high: f64,
        log_scale: bool,
    },
    /// Integer parameter
    Int {
        low: i64,
        high: i64,
        log_scale: bool,
    },
    /// Categorical parameter
    Categorical {
        choices: Vec<String>,
    },
    /// Boolean parameter
    Boolean,
}

/// A single hyperparameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub param_type: ParameterType,
}

impl Parameter {
    /// Create a float parameter
    pub fn float(name: impl Into<String>, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            param_type: ParameterType::Float {
                low,
                high,
                log_scale: false,
            },
        }
    }

    /// Create a log-scale float parameter
    pub fn log_float(name: impl Into<String>, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            param_type: ParameterType::Float {
                low,
                high,
                log_scale: true,
            },
        }
    }

    /// Create an integer parameter
    pub fn int(name: impl Into<String>, low: i64, high: i64) -> Self {
        Self {
            name: name.into(),
            param_type: ParameterType::Int {
                low,
                high,
                log_scale: false,
            },
        }
    }

    /// Create a log-scale integer parameter
    pub fn log_int(name: impl Into<String>, low: i64, high: i64) -> Self {
        Self {
            name: name.into(),
            param_type: ParameterType::Int {
                low,
                high,
                log_scale: true,
            },
        }
    }

    /// Create a categorical parameter
    pub fn categorical(name: impl Into<String>, choices: Vec<&str>) -> Self {
        Self {
            name: name.into(),
            param_type: ParameterType::Categorical {
                choices: choices.into_iter().map(String::from).collect(),
            },
        }
    }

    /// Create a boolean parameter
    pub fn boolean(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: ParameterType::Boolean,
        }
    }

    /// Reject empty or inverted ranges and log ranges touching zero
    pub fn validate(&self) -> std::result::Result<(), String> {
        match &self.param_type {
            ParameterType::Float { low, high, log_scale } => {
                if !(low.is_finite() && high.is_finite()) || low > high {
                    return Err(format!("invalid range [{}, {}]", low, high));
                }
                if *log_scale && *low <= 0.0 {
                    return Err(format!("log-scale range must be positive, got low = {}", low));
                }
            }
            ParameterType::Int { low, high, log_scale } => {
                if low > high {
                    return Err(format!("invalid range [{}, {}]", low, high));
                }
                if *log_scale && *low <= 0 {
                    return Err(format!("log-scale range must be positive, got low = {}", low));
                }
            }
            ParameterType::Categorical { choices } => {
                if choices.is_empty() {
                    return Err("categorical parameter has no choices".to_string());
                }
            }
            ParameterType::Boolean => {}
        }
        Ok(())
    }

    /// Sample a random value; the result always lies inside the declared range
    pub fn sample(&self, rng: &mut impl Rng) -> ParameterValue {
        match &self.param_type {
            ParameterType::Float { low, high, log_scale } => {
                let val = if *log_scale {
                    let log_low = low.ln();
                    let log_high = high.ln();
                    (rng.gen::<f64>() * (log_high - log_low) + log_low).exp()
                } else {
                    rng.gen::<f64>() * (high - low) + low
                };
                ParameterValue::Float(val.clamp(*low, *high))
            }
            ParameterType::Int { low, high, log_scale } => {
                let val = if *log_scale {
                    let log_low = (*low as f64).ln();
                    let log_high = (*high as f64 + 1.0).ln();
                    let v = (rng.gen::<f64>() * (log_high - log_low) + log_low).exp().floor() as i64;
                    v.clamp(*low, *high)
                } else {
                    rng.gen_range(*low..=*high)
                };
                ParameterValue::Int(val)
            }
            ParameterType::Categorical { choices } => {
                let idx = rng.gen_range(0..choices.len());
                ParameterValue::String(choices[idx].clone())
            }
            ParameterType::Boolean => ParameterValue::Bool(rng.gen()),
        }
    }

    /// Whether `value` has the right kind and lies within the declared range
    pub fn contains(&self, value: &ParameterValue) -> bool {
        match (&self.param_type, value) {
            (ParameterType::Float { low, high, .. }, ParameterValue::Float(v)) => v >= low && v <= high,
            (ParameterType::Int { low, high, .. }, ParameterValue::Int(v)) => v >= low && v <= high,
            (ParameterType::Categorical { choices }, ParameterValue::String(v)) => choices.contains(v),
            (ParameterType::Boolean, ParameterValue::Bool(_)) => true,
            _ => false,
        }
    }

    /// Position of `value` in the range mapped to [0, 1] (log space for log ranges)
    pub fn normalize(&self, value: &ParameterValue) -> Option<f64> {
        let (low, high, log_scale, v) = match (&self.param_type, value) {
            (ParameterType::Float { low, high, log_scale }, v) => (*low, *high, *log_scale, v.as_float()?),
            (ParameterType::Int { low, high, log_scale }, v) => (*low as f64, *high as f64, *log_scale, v.as_float()?),
            _ => return None,
        };
        let (low, high, v) = if log_scale {
            (low.ln(), high.ln(), v.ln())
        } else {
            (low, high, v)
        };
        if high > low {
            Some(((v - low) / (high - low)).clamp(0.0, 1.0))
        } else {
            Some(0.0)
        }
    }
}

/// Sampled parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ParameterValue {
    /// Get as float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParameterValue::Float(v) => Some(*v),
            ParameterValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Get as int
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParameterValue::Int(v) => Some(*v),
            ParameterValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// Get as string
    pub fn as_string(&self) -> Option<&str> {
        match self {
            ParameterValue::String(v) => Some(v),
            _ => None,
        }
    }

    /// Get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterValue::Bool(v) => write!(f, "{}", v),
            ParameterValue::Int(v) => write!(f, "{}", v),
            ParameterValue::Float(v) => write!(f, "{:.6}", v),
            ParameterValue::String(v) => write!(f, "{}", v),
        }
    }
}

/// Search space for hyperparameter optimization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    parameters: Vec<Parameter>,
}

impl SearchSpace {
    /// Create a new empty search space
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter to the search space
    pub fn add(mut self, param: Parameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Add a float parameter
    pub fn float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(Parameter::float(name, low, high))
    }

    /// Add a log-scale float parameter
    pub fn log_float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(Parameter::log_float(name, low, high))
    }

    /// Add an integer parameter
    pub fn int(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.add(Parameter::int(name, low, high))
    }

    /// Add a log-scale integer parameter
    pub fn log_int(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.add(Parameter::log_int(name, low, high))
    }

    /// Add a categorical parameter
    pub fn categorical(self, name: impl Into<String>, choices: Vec<&str>) -> Self {
        self.add(Parameter::categorical(name, choices))
    }

    /// Add a boolean parameter
    pub fn boolean(self, name: impl Into<String>) -> Self {
        self.add(Parameter::boolean(name))
    }

    /// Get all parameters
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Sample a random configuration
    pub fn sample(&self, rng: &mut impl Rng) -> TrialParams {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.sample(rng)))
            .collect()
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Get parameter names in order
    pub fn param_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }
}

/// Sampled configuration, ordered by parameter name
pub type TrialParams = BTreeMap<String, ParameterValue>;
