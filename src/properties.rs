//! Conversion helpers for task configuration properties.
//!
//! Graph JSON carries properly typed values while pipeline expressions carry
//! strings; task implementations funnel both through these converters so
//! that every property has exactly one coercion rule.

use serde_json::Value;

use crate::error::{Error, Result};

fn type_error(name: &str, expected: &str, value: &Value) -> Error {
    Error::Graph(format!("property `{}' expects {} but got `{}'", name, expected, value))
}

pub fn to_u32(name: &str, value: &Value) -> Result<u32> {
    match value {
        Value::Number(n) => n.as_u64().map(|x| x as u32)
            .ok_or_else(|| type_error(name, "an unsigned integer", value)),
        Value::String(s) => s.trim().parse()
            .map_err(|_| type_error(name, "an unsigned integer", value)),
        _ => Err(type_error(name, "an unsigned integer", value)),
    }
}

pub fn to_i64(name: &str, value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n.as_i64()
            .ok_or_else(|| type_error(name, "an integer", value)),
        Value::String(s) => s.trim().parse()
            .map_err(|_| type_error(name, "an integer", value)),
        _ => Err(type_error(name, "an integer", value)),
    }
}

pub fn to_f64(name: &str, value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => n.as_f64()
            .ok_or_else(|| type_error(name, "a float", value)),
        Value::String(s) => s.trim().parse()
            .map_err(|_| type_error(name, "a float", value)),
        _ => Err(type_error(name, "a float", value)),
    }
}

pub fn to_f32(name: &str, value: &Value) -> Result<f32> {
    to_f64(name, value).map(|x| x as f32)
}

pub fn to_bool(name: &str, value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(type_error(name, "a boolean", value)),
        },
        _ => Err(type_error(name, "a boolean", value)),
    }
}

pub fn to_string(name: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(type_error(name, "a string", value)),
    }
}

/// Resolves an enumeration property by value name. Comparison is
/// case-insensitive to accommodate hand-written pipeline expressions.
pub fn to_enum<'a>(name: &str, value: &Value, choices: &[&'a str]) -> Result<&'a str> {
    let s = to_string(name, value)?;
    choices.iter()
        .find(|choice| choice.eq_ignore_ascii_case(&s))
        .copied()
        .ok_or_else(|| Error::Graph(format!(
            "property `{}' has no enum value `{}' (expected one of {:?})", name, s, choices)))
}

/// Converts an array-valued property to floats. Scalar values yield a
/// one-element vector.
pub fn to_f32_list(name: &str, value: &Value) -> Result<Vec<f32>> {
    match value {
        Value::Array(items) => items.iter().map(|item| to_f32(name, item)).collect(),
        _ => Ok(vec![to_f32(name, value)?]),
    }
}

pub fn to_u32_list(name: &str, value: &Value) -> Result<Vec<u32>> {
    match value {
        Value::Array(items) => items.iter().map(|item| to_u32(name, item)).collect(),
        _ => Ok(vec![to_u32(name, value)?]),
    }
}
