//! Strategy parameters: named values read from run files and parameter grids.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use replaylab_core::StrategyError;

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            ParamValue::Int(v) => Some(v as f64),
            ParamValue::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Non-negative integers only; floats must be whole.
    pub fn as_usize(&self) -> Option<usize> {
        match *self {
            ParamValue::Int(v) => usize::try_from(v).ok(),
            ParamValue::Float(v) if v >= 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64 => {
                Some(v as usize)
            }
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            ParamValue::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

/// Named parameters of one strategy instance. Ordered, so it serializes
/// (and hashes) the same way every time.
pub type ParamSet = BTreeMap<String, ParamValue>;

/// Typed lookups with strategy-level error messages.
pub trait ParamSetExt {
    fn usize_or(&self, name: &str, default: usize) -> Result<usize, StrategyError>;
    fn f64_or(&self, name: &str, default: f64) -> Result<f64, StrategyError>;
    fn bool_or(&self, name: &str, default: bool) -> Result<bool, StrategyError>;
    /// Render as `a=1, b=2` for log lines.
    fn describe(&self) -> String;
}

impl ParamSetExt for ParamSet {
    fn usize_or(&self, name: &str, default: usize) -> Result<usize, StrategyError> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => v.as_usize().ok_or_else(|| mistyped(name, "a non-negative integer", v)),
        }
    }

    fn f64_or(&self, name: &str, default: f64) -> Result<f64, StrategyError> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => v.as_f64().ok_or_else(|| mistyped(name, "a number", v)),
        }
    }

    fn bool_or(&self, name: &str, default: bool) -> Result<bool, StrategyError> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => v.as_bool().ok_or_else(|| mistyped(name, "a boolean", v)),
        }
    }

    fn describe(&self) -> String {
        self.iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn mistyped(name: &str, expected: &str, got: &ParamValue) -> StrategyError {
    StrategyError::new(format!("parameter '{name}' must be {expected}, got {got}"))
}
