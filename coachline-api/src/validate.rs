//! Field-by-field request validation. Bodies arrive as raw JSON so that the
//! first offending field, in declaration order, decides the error message.

use axum::extract::rejection::JsonRejection;
use axum::Json;
use serde_json::Value;

use crate::error::AppError;

/// Unwraps an extracted JSON body, turning malformed input into a 400.
pub fn json_body(payload: Result<Json<Value>, JsonRejection>) -> Result<Value, AppError> {
    match payload {
        Ok(Json(body)) if body.is_object() => Ok(body),
        Ok(_) => Err(AppError::Validation("request body must be a JSON object".to_string())),
        Err(rejection) => Err(AppError::Validation(rejection.body_text())),
    }
}

pub struct Fields<'a> {
    body: &'a Value,
}

impl<'a> Fields<'a> {
    pub fn new(body: &'a Value) -> Self {
        Self { body }
    }

    fn present(&self, name: &str) -> Option<&'a Value> {
        match self.body.get(name) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(v) => Some(v),
        }
    }

    /// Integer given either as a JSON number or as a numeric string.
    pub fn number(&self, name: &str) -> Result<i64, AppError> {
        let value = self
            .present(name)
            .ok_or_else(|| AppError::Validation(format!("{} is required", name)))?;
        as_integer(value).ok_or_else(|| AppError::Validation(format!("{} should be a number", name)))
    }

    pub fn optional_number(&self, name: &str) -> Result<Option<i64>, AppError> {
        match self.present(name) {
            None => Ok(None),
            Some(value) => as_integer(value)
                .map(Some)
                .ok_or_else(|| AppError::Validation(format!("{} should be a number", name))),
        }
    }

    /// Digits, kept as text.
    pub fn digits(&self, name: &str) -> Result<String, AppError> {
        let value = self
            .present(name)
            .ok_or_else(|| AppError::Validation(format!("{} is required", name)))?;
        let text = match value {
            Value::Number(n) if n.is_u64() => n.to_string(),
            Value::String(s) if s.trim().chars().all(|c| c.is_ascii_digit()) => s.trim().to_string(),
            _ => return Err(AppError::Validation(format!("{} should be a number", name))),
        };
        Ok(text)
    }

    /// Required string; `type_name` is how the type is spelled in the error.
    pub fn string(&self, name: &str, type_name: &str) -> Result<String, AppError> {
        match self.present(name) {
            None => Err(AppError::Validation(format!("{} is required", name))),
            Some(Value::String(s)) => Ok(s.trim().to_string()),
            Some(_) => Err(AppError::Validation(format!("{} should be a {}", name, type_name))),
        }
    }

    pub fn optional_string(&self, name: &str) -> Result<Option<String>, AppError> {
        match self.body.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
            Some(_) => Err(AppError::Validation(format!("{} should be a string", name))),
        }
    }

    /// Non-empty string of at most `max` characters after trimming.
    pub fn bounded(&self, name: &str, max: usize) -> Result<String, AppError> {
        let value = self
            .present(name)
            .ok_or_else(|| AppError::Validation(format!("{} cannot be empty", name)))?;
        let text = value
            .as_str()
            .ok_or_else(|| AppError::Validation(format!("{} must be a string", name)))?
            .trim();
        check_length(name, text, max)?;
        Ok(text.to_string())
    }

    pub fn optional_bounded(&self, name: &str, max: usize) -> Result<Option<String>, AppError> {
        match self.body.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => {
                let text = s.trim();
                check_length(name, text, max)?;
                Ok(Some(text.to_string()))
            }
            Some(_) => Err(AppError::Validation(format!("{} must be a string", name))),
        }
    }
}

fn check_length(name: &str, text: &str, max: usize) -> Result<(), AppError> {
    if text.chars().count() > max {
        return Err(AppError::Validation(format!(
            "{} must be less than {} characters",
            name, max
        )));
    }
    Ok(())
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Numeric path segment, e.g. `/bookings/:bookingId`.
pub fn id_param(name: &str, raw: &str) -> Result<i64, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::Validation(format!("bad request, {} should be a number", name)))
}
