//! Typed coercion for custom-field values.
//!
//! Each [`FieldKind`] has one decode rule (raw request JSON to a typed
//! value), one storage literal (string) and one display rendering. Decoding
//! is lenient about ambient format but fails when a required field resolves
//! to empty.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use models::{FieldDefinition, FieldKind};

const DATE_DISPLAY: &str = "%d.%m.%Y";
const DATETIME_DISPLAY: &str = "%d.%m.%Y %H:%M";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    #[error("поле '{0}' является обязательным")]
    Required(String),
    #[error("поле '{field}': '{value}' не входит в список вариантов")]
    InvalidChoice { field: String, value: String },
    #[error("поле '{field}': не удалось разобрать дату '{value}'")]
    InvalidDate { field: String, value: String },
    #[error("поле '{0}' не определено")]
    Unknown(String),
}

impl FieldError {
    /// Name of the offending field, for field-level error reporting.
    pub fn field(&self) -> &str {
        match self {
            FieldError::Required(name) | FieldError::Unknown(name) => name,
            FieldError::InvalidChoice { field, .. } | FieldError::InvalidDate { field, .. } => {
                field
            }
        }
    }
}

/// A decoded, validated custom-field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Text(String),
    Choice(String),
    /// De-duplicated, normalized to the definition's choice order.
    Choices(Vec<String>),
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
}

/// Decode raw request input into a typed value. `Ok(None)` means unset; a
/// required field resolving to unset is an error naming the field.
pub fn decode(
    def: &FieldDefinition,
    raw: &serde_json::Value,
    tz: FixedOffset,
) -> Result<Option<FieldValue>, FieldError> {
    if is_empty(raw) {
        if def.required {
            return Err(FieldError::Required(def.name.clone()));
        }
        return Ok(None);
    }

    let value = match def.kind {
        FieldKind::Checkbox => FieldValue::Bool(as_bool(raw)),
        FieldKind::Text | FieldKind::TextArea => FieldValue::Text(as_text(raw)),
        FieldKind::Dropdown => {
            let text = as_text(raw);
            if def.required && !def.choices.iter().any(|c| *c == text) {
                return Err(FieldError::InvalidChoice {
                    field: def.name.clone(),
                    value: text,
                });
            }
            FieldValue::Choice(text)
        }
        FieldKind::MultiChoice => {
            let picked = as_list(raw);
            for item in &picked {
                if !def.choices.iter().any(|c| c == item) {
                    return Err(FieldError::InvalidChoice {
                        field: def.name.clone(),
                        value: item.clone(),
                    });
                }
            }
            FieldValue::Choices(normalize_choices(&def.choices, &picked))
        }
        FieldKind::Date => {
            let text = as_text(raw);
            let date = parse_date(&text, tz).ok_or_else(|| FieldError::InvalidDate {
                field: def.name.clone(),
                value: text.clone(),
            })?;
            FieldValue::Date(date)
        }
        FieldKind::DateTime => {
            let text = as_text(raw);
            let moment = parse_datetime(&text, tz).ok_or_else(|| FieldError::InvalidDate {
                field: def.name.clone(),
                value: text.clone(),
            })?;
            FieldValue::DateTime(moment)
        }
    };
    Ok(Some(value))
}

/// Storage literal for a typed value.
pub fn encode(value: &FieldValue) -> String {
    match value {
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::Text(s) | FieldValue::Choice(s) => s.clone(),
        FieldValue::Choices(items) => {
            serde_json::to_string(items).unwrap_or_else(|_| "[]".to_owned())
        }
        FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        FieldValue::DateTime(dt) => dt.to_rfc3339(),
    }
}

/// Parse a storage literal back into the typed value. Inverse of [`encode`]
/// for every value `encode` can produce.
pub fn decode_stored(def: &FieldDefinition, stored: &str) -> Option<FieldValue> {
    match def.kind {
        FieldKind::Checkbox => Some(FieldValue::Bool(stored == "true")),
        FieldKind::Text | FieldKind::TextArea => Some(FieldValue::Text(stored.to_owned())),
        FieldKind::Dropdown => Some(FieldValue::Choice(stored.to_owned())),
        FieldKind::MultiChoice => serde_json::from_str::<Vec<String>>(stored)
            .ok()
            .map(FieldValue::Choices),
        FieldKind::Date => NaiveDate::parse_from_str(stored, "%Y-%m-%d")
            .ok()
            .map(FieldValue::Date),
        FieldKind::DateTime => DateTime::parse_from_rfc3339(stored)
            .ok()
            .map(FieldValue::DateTime),
    }
}

/// Human rendering of a storage literal. Falls back to the raw literal when
/// it does not parse (stored data is never a reason to fail a read).
pub fn present(def: &FieldDefinition, stored: &str) -> String {
    match decode_stored(def, stored) {
        Some(FieldValue::Bool(true)) => "Да".to_owned(),
        Some(FieldValue::Bool(false)) => "Нет".to_owned(),
        Some(FieldValue::Choices(items)) => items.join(", "),
        Some(FieldValue::Date(d)) => d.format(DATE_DISPLAY).to_string(),
        Some(FieldValue::DateTime(dt)) => dt.format(DATETIME_DISPLAY).to_string(),
        Some(FieldValue::Text(s)) | Some(FieldValue::Choice(s)) => s,
        None => stored.to_owned(),
    }
}

fn is_empty(raw: &serde_json::Value) -> bool {
    match raw {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn as_bool(raw: &serde_json::Value) -> bool {
    match raw {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => {
            matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "да")
        }
        serde_json::Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        _ => false,
    }
}

fn as_text(raw: &serde_json::Value) -> String {
    match raw {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_list(raw: &serde_json::Value) -> Vec<String> {
    match raw {
        serde_json::Value::Array(items) => items.iter().map(as_text).collect(),
        other => vec![as_text(other)],
    }
}

/// Keep the definition's choice order, drop duplicates.
fn normalize_choices(choices: &[String], picked: &[String]) -> Vec<String> {
    choices
        .iter()
        .filter(|c| picked.contains(c))
        .cloned()
        .collect()
}

fn parse_date(text: &str, tz: FixedOffset) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&tz).date_naive());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().with_timezone(&tz).date_naive());
        }
    }
    for format in ["%Y-%m-%d", "%d.%m.%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }
    None
}

fn parse_datetime(text: &str, tz: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&tz));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().with_timezone(&tz));
        }
    }
    None
}
