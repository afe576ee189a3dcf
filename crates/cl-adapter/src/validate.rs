//! Write validation and coercion
//!
//! Client input arrives as loose scalars; the engine wants values matching
//! each control's declared type. The rules here are applied to every write
//! when metadata is available, unless the caller opts out per call.

use cl_core::{ControlMeta, ControlType, ControlValue, ValidationConfig};

/// Coerce a requested value against control metadata
///
/// Returns the normalized value to send to the engine, or a message naming
/// the expected form or range.
pub fn coerce_value(
    meta: &ControlMeta,
    value: &ControlValue,
    config: &ValidationConfig,
) -> Result<ControlValue, String> {
    match meta.control_type {
        ControlType::Boolean => coerce_boolean(value),
        ControlType::Number | ControlType::Integer | ControlType::Float => {
            coerce_number(meta, value)
        }
        ControlType::Text => coerce_string(meta, value, config),
        ControlType::Unknown => Ok(value.clone()),
    }
}

/// Booleans normalize to 0 or 1 on the wire
fn coerce_boolean(value: &ControlValue) -> Result<ControlValue, String> {
    match value {
        ControlValue::Bool(b) => Ok(ControlValue::Number(if *b { 1.0 } else { 0.0 })),
        ControlValue::Number(n) if *n == 0.0 || *n == 1.0 => Ok(ControlValue::Number(*n)),
        ControlValue::Number(n) => Err(format!(
            "Invalid boolean value {n}: expected true/false, 0/1, \"0\"/\"1\", or \"true\"/\"false\""
        )),
        ControlValue::Text(s) => match s.as_str() {
            "1" | "true" => Ok(ControlValue::Number(1.0)),
            "0" | "false" => Ok(ControlValue::Number(0.0)),
            other => Err(format!(
                "Invalid boolean value \"{other}\": expected true/false, 0/1, \"0\"/\"1\", or \"true\"/\"false\""
            )),
        },
    }
}

fn coerce_number(meta: &ControlMeta, value: &ControlValue) -> Result<ControlValue, String> {
    let n = match value {
        ControlValue::Number(n) => *n,
        ControlValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("Invalid numeric value \"{s}\""))?,
        ControlValue::Bool(_) => {
            return Err("Invalid numeric value: got a boolean".to_string());
        }
    };

    if !n.is_finite() {
        return Err(format!("Invalid numeric value {n}: must be finite"));
    }

    if let Some(min) = meta.min
        && n < min
    {
        return Err(format!("Value {n} below minimum {min}"));
    }
    if let Some(max) = meta.max
        && n > max
    {
        return Err(format!("Value {n} above maximum {max}"));
    }

    Ok(ControlValue::Number(n))
}

fn coerce_string(
    meta: &ControlMeta,
    value: &ControlValue,
    config: &ValidationConfig,
) -> Result<ControlValue, String> {
    let s = value.display_string();
    let max_length = meta.max_length.unwrap_or(config.string_max_length);
    if s.len() > max_length {
        return Err(format!(
            "String length {} exceeds maximum {max_length}",
            s.len()
        ));
    }
    Ok(ControlValue::Text(s))
}
