// ✅ Validation Layer - typed payload parsing
//
// Every write payload arrives as a JSON object. Fields are read one by one as
// required or optional; each problem is recorded under its field name and the
// whole record is rejected at once, never half-applied.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use validator::ValidateEmail;

use crate::error::{AppError, FieldErrors, Result, NON_FIELD_ERRORS};

// ============================================================================
// MESSAGES
// ============================================================================

pub const MSG_REQUIRED: &str = "Dieses Feld ist zwingend erforderlich.";
pub const MSG_NULL: &str = "Dieses Feld darf nicht null sein.";
pub const MSG_BLANK: &str = "Dieses Feld darf nicht leer sein.";
pub const MSG_NOT_STRING: &str = "Kein gültiger String.";
pub const MSG_BOOLEAN: &str = "Muss ein gültiger Wahrheitswert sein.";
pub const MSG_EMAIL: &str = "Geben Sie eine gültige E-Mail-Adresse ein.";
pub const MSG_DATE: &str =
    "Datum hat das falsche Format. Verwenden Sie stattdessen eines dieser Formate: YYYY-MM-DD.";

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn msg_max_length(max: usize) -> String {
    format!(
        "Stellen Sie sicher, dass dieses Feld nicht mehr als {} Zeichen hat.",
        max
    )
}

pub fn msg_invalid_choice(value: &Value) -> String {
    let shown = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    format!("\"{}\" ist keine gültige Option.", shown)
}

pub fn msg_missing_pk(id: i64) -> String {
    format!("Ungültiger pk \"{}\" - Objekt existiert nicht.", id)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

// ============================================================================
// FIELD READER
// ============================================================================

/// Reads fields out of a JSON object while collecting per-field errors
pub struct FieldReader<'a> {
    object: &'a Map<String, Value>,
    errors: FieldErrors,
}

impl<'a> FieldReader<'a> {
    pub fn new(value: &'a Value) -> Result<Self> {
        match value {
            Value::Object(object) => Ok(FieldReader {
                object,
                errors: FieldErrors::new(),
            }),
            other => Err(AppError::Validation(FieldErrors::single(
                NON_FIELD_ERRORS,
                format!(
                    "Ungültige Daten. Dictionary erwartet, aber {} erhalten.",
                    type_name(other)
                ),
            ))),
        }
    }

    pub fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.add(field, message);
    }

    /// Hand back the collected errors; empty means every field was accepted
    pub fn into_errors(self) -> FieldErrors {
        self.errors
    }

    fn present(&self, field: &str) -> Option<&'a Value> {
        self.object.get(field)
    }

    fn string_value(&mut self, field: &str, value: &Value, max_len: usize) -> Option<String> {
        let Some(text) = coerce_text(value) else {
            self.error(field, MSG_NOT_STRING);
            return None;
        };
        if text.chars().count() > max_len {
            self.error(field, msg_max_length(max_len));
            return None;
        }
        Some(text)
    }

    /// Non-blank string, at most `max_len` characters
    pub fn required_string(&mut self, field: &str, max_len: usize) -> Option<String> {
        match self.present(field) {
            None => {
                self.error(field, MSG_REQUIRED);
                None
            }
            Some(Value::Null) => {
                self.error(field, MSG_NULL);
                None
            }
            Some(value) => {
                let text = self.string_value(field, value, max_len)?;
                if text.is_empty() {
                    self.error(field, MSG_BLANK);
                    return None;
                }
                Some(text)
            }
        }
    }

    /// String that may be absent or blank; absent reads as ""
    pub fn blank_string(&mut self, field: &str, max_len: usize) -> String {
        match self.present(field) {
            None => String::new(),
            Some(Value::Null) => {
                self.error(field, MSG_NULL);
                String::new()
            }
            Some(value) => self.string_value(field, value, max_len).unwrap_or_default(),
        }
    }

    /// Free text that may be absent or null
    pub fn nullable_text(&mut self, field: &str) -> Option<String> {
        match self.present(field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                self.error(field, MSG_NOT_STRING);
                None
            }
        }
    }

    /// Blank or a syntactically valid email address
    pub fn email(&mut self, field: &str, max_len: usize) -> String {
        let address = self.blank_string(field, max_len);
        if !address.is_empty() && !is_valid_email(&address) {
            self.error(field, MSG_EMAIL);
        }
        address
    }

    fn date_value(&mut self, field: &str, value: &Value) -> Option<NaiveDate> {
        match value {
            Value::String(s) => match NaiveDate::parse_from_str(s.trim(), DATE_FORMAT) {
                Ok(date) => Some(date),
                Err(_) => {
                    self.error(field, MSG_DATE);
                    None
                }
            },
            _ => {
                self.error(field, MSG_DATE);
                None
            }
        }
    }

    pub fn required_date(&mut self, field: &str) -> Option<NaiveDate> {
        match self.present(field) {
            None => {
                self.error(field, MSG_REQUIRED);
                None
            }
            Some(Value::Null) => {
                self.error(field, MSG_NULL);
                None
            }
            Some(value) => self.date_value(field, value),
        }
    }

    pub fn optional_date(&mut self, field: &str) -> Option<NaiveDate> {
        match self.present(field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(value) => self.date_value(field, value),
        }
    }

    /// Boolean flag, false when absent
    pub fn flag(&mut self, field: &str) -> bool {
        match self.present(field) {
            None => false,
            Some(value) => match parse_bool(value) {
                Some(flag) => flag,
                None => {
                    self.error(field, MSG_BOOLEAN);
                    false
                }
            },
        }
    }

    /// Enumerated value, decoded through the enum's serde representation
    pub fn required_choice<T: DeserializeOwned>(&mut self, field: &str) -> Option<T> {
        match self.present(field) {
            None => {
                self.error(field, MSG_REQUIRED);
                None
            }
            Some(Value::Null) => {
                self.error(field, MSG_NULL);
                None
            }
            Some(value) => match serde_json::from_value::<T>(value.clone()) {
                Ok(choice) => Some(choice),
                Err(_) => {
                    self.error(field, msg_invalid_choice(value));
                    None
                }
            },
        }
    }

    fn id_value(&mut self, field: &str, value: &Value) -> Option<i64> {
        let id = match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        if id.is_none() {
            self.error(
                field,
                format!("Falscher Typ. Erwarte pk, erhielt {}.", type_name(value)),
            );
        }
        id
    }

    /// Foreign key that must be supplied
    pub fn required_id(&mut self, field: &str) -> Option<i64> {
        match self.present(field) {
            None => {
                self.error(field, MSG_REQUIRED);
                None
            }
            Some(Value::Null) => {
                self.error(field, MSG_NULL);
                None
            }
            Some(value) => self.id_value(field, value),
        }
    }

    /// Foreign key that may be absent or null
    pub fn optional_id(&mut self, field: &str) -> Option<i64> {
        match self.present(field) {
            None | Some(Value::Null) => None,
            Some(value) => self.id_value(field, value),
        }
    }
}

fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Text form of a scalar: strings are trimmed, numbers written out
pub fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn is_valid_email(address: &str) -> bool {
    address.validate_email()
}

// ============================================================================
// REFERENCE CHECKS
// ============================================================================

/// Record an error when `id` does not name a row of `table`
pub fn check_reference(
    conn: &Connection,
    errors: &mut FieldErrors,
    field: &str,
    table: &str,
    id: i64,
) -> Result<()> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?1", table);
    let exists = conn
        .query_row(&sql, params![id], |_| Ok(()))
        .optional()?
        .is_some();
    if !exists {
        errors.add(field, msg_missing_pk(id));
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
