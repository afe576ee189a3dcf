//! Control values and control metadata
//!
//! Every engine control carries a scalar value: number, boolean, or string.
//! `ControlValue` is the tagged union used across the bridge; coercion from
//! client input happens in the adapter's validation layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scalar value of a control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlValue {
    /// Boolean control (mute, bypass, ...)
    Bool(bool),
    /// Numeric control (gain, level, ...)
    Number(f64),
    /// String control (input select, labels, ...)
    Text(String),
}

impl ControlValue {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ControlValue::Number(n) => Some(*n),
            ControlValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            ControlValue::Text(_) => None,
        }
    }

    /// Boolean view of the value, if it has one
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ControlValue::Bool(b) => Some(*b),
            ControlValue::Number(n) => Some(*n != 0.0),
            ControlValue::Text(_) => None,
        }
    }

    /// Display form used for event strings and tool output
    pub fn display_string(&self) -> String {
        match self {
            ControlValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            ControlValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{n}")
                }
            }
            ControlValue::Text(s) => s.clone(),
        }
    }

    /// Difference between two numeric values
    ///
    /// Defined only when both sides are numbers; booleans do not produce
    /// deltas even though they have a numeric view.
    pub fn delta_from(&self, previous: &ControlValue) -> Option<f64> {
        match (self, previous) {
            (ControlValue::Number(a), ControlValue::Number(b)) => Some(a - b),
            _ => None,
        }
    }

    /// Convert a raw JSON scalar into a control value
    ///
    /// Objects and arrays have no scalar form and are rejected by returning
    /// `None`; the validation layer turns that into an error.
    pub fn from_json(value: &Value) -> Option<ControlValue> {
        match value {
            Value::Bool(b) => Some(ControlValue::Bool(*b)),
            Value::Number(n) => n.as_f64().map(ControlValue::Number),
            Value::String(s) => Some(ControlValue::Text(s.clone())),
            _ => None,
        }
    }

    /// Raw JSON form for wire payloads
    pub fn to_json(&self) -> Value {
        match self {
            ControlValue::Bool(b) => Value::Bool(*b),
            ControlValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ControlValue::Text(s) => Value::String(s.clone()),
        }
    }
}

impl From<f64> for ControlValue {
    fn from(n: f64) -> Self {
        ControlValue::Number(n)
    }
}

impl From<bool> for ControlValue {
    fn from(b: bool) -> Self {
        ControlValue::Bool(b)
    }
}

impl From<&str> for ControlValue {
    fn from(s: &str) -> Self {
        ControlValue::Text(s.to_string())
    }
}

impl From<String> for ControlValue {
    fn from(s: String) -> Self {
        ControlValue::Text(s)
    }
}

/// Declared type of a control as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlType {
    Number,
    Integer,
    Float,
    Boolean,
    Text,
    /// Engine reported no type or an unrecognized one
    Unknown,
}

impl ControlType {
    /// Parse the engine's type string
    pub fn parse(s: &str) -> ControlType {
        match s {
            "Number" => ControlType::Number,
            "Integer" => ControlType::Integer,
            "Float" => ControlType::Float,
            "Boolean" => ControlType::Boolean,
            "String" | "Text" => ControlType::Text,
            _ => ControlType::Unknown,
        }
    }

    /// Whether values of this type are numeric
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ControlType::Number | ControlType::Integer | ControlType::Float
        )
    }
}

/// Metadata attached to a control handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMeta {
    /// Declared type
    pub control_type: ControlType,
    /// Lower bound for numeric controls
    pub min: Option<f64>,
    /// Upper bound for numeric controls
    pub max: Option<f64>,
    /// Maximum length for string controls
    pub max_length: Option<usize>,
    /// Normalized position 0..1, when the engine reports one
    pub position: Option<f64>,
}

impl ControlMeta {
    /// Metadata with nothing known about the control
    pub fn unknown() -> Self {
        Self {
            control_type: ControlType::Unknown,
            min: None,
            max: None,
            max_length: None,
            position: None,
        }
    }

    pub fn of_type(control_type: ControlType) -> Self {
        Self {
            control_type,
            min: None,
            max: None,
            max_length: None,
            position: None,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }
}
