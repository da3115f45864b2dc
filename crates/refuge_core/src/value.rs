use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, Time};

use crate::{RefugeError, RefugeResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Bool,
    Date,
    Time,
    #[serde(rename = "datetime")]
    DateTime,
    Select,
    MultiSelect,
    Relation,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Bool => "bool",
            FieldType::Date => "date",
            FieldType::Time => "time",
            FieldType::DateTime => "datetime",
            FieldType::Select => "select",
            FieldType::MultiSelect => "multi_select",
            FieldType::Relation => "relation",
        }
    }

    /// Atomic types live in the record payload; the rest live in link tables.
    pub fn is_atomic(self) -> bool {
        matches!(
            self,
            FieldType::Text
                | FieldType::Number
                | FieldType::Bool
                | FieldType::Date
                | FieldType::Time
                | FieldType::DateTime
        )
    }

    pub fn is_select(self) -> bool {
        matches!(self, FieldType::Select | FieldType::MultiSelect)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = RefugeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(FieldType::Text),
            "number" => Ok(FieldType::Number),
            "bool" => Ok(FieldType::Bool),
            "date" => Ok(FieldType::Date),
            "time" => Ok(FieldType::Time),
            "datetime" => Ok(FieldType::DateTime),
            "select" => Ok(FieldType::Select),
            "multi_select" => Ok(FieldType::MultiSelect),
            "relation" => Ok(FieldType::Relation),
            other => Err(RefugeError::validation(format!(
                "unknown field type '{other}'"
            ))),
        }
    }
}

/// Atomic value held in a record payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Date(String),
    Time(String),
    #[serde(rename = "datetime")]
    DateTime(String),
}

pub type RecordPayload = BTreeMap<String, FieldValue>;

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Text(_) => FieldType::Text,
            FieldValue::Number(_) => FieldType::Number,
            FieldValue::Bool(_) => FieldType::Bool,
            FieldValue::Date(_) => FieldType::Date,
            FieldValue::Time(_) => FieldType::Time,
            FieldValue::DateTime(_) => FieldType::DateTime,
        }
    }

    /// Untyped JSON rendering used in snapshot cells.
    pub fn to_plain_json(&self) -> JsonValue {
        match self {
            FieldValue::Text(value)
            | FieldValue::Date(value)
            | FieldValue::Time(value)
            | FieldValue::DateTime(value) => JsonValue::String(value.clone()),
            FieldValue::Number(value) => serde_json::Number::from_f64(*value)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            FieldValue::Bool(value) => JsonValue::Bool(*value),
        }
    }

    /// Interprets an untyped JSON value as a value of `field_type`.
    pub fn from_plain_json(field_type: FieldType, value: &JsonValue) -> RefugeResult<Self> {
        let parsed = match (field_type, value) {
            (FieldType::Text, JsonValue::String(text)) => FieldValue::Text(text.clone()),
            (FieldType::Number, JsonValue::Number(number)) => {
                let number = number
                    .as_f64()
                    .ok_or_else(|| RefugeError::validation("number out of range"))?;
                FieldValue::Number(number)
            }
            (FieldType::Bool, JsonValue::Bool(flag)) => FieldValue::Bool(*flag),
            (FieldType::Date, JsonValue::String(text)) => FieldValue::Date(text.clone()),
            (FieldType::Time, JsonValue::String(text)) => FieldValue::Time(text.clone()),
            (FieldType::DateTime, JsonValue::String(text)) => FieldValue::DateTime(text.clone()),
            (field_type, value) => {
                return Err(RefugeError::validation(format!(
                    "value {value} is not a valid {field_type}"
                )));
            }
        };
        parsed.validate_format()?;
        Ok(parsed)
    }

    pub fn validate_format(&self) -> RefugeResult<()> {
        match self {
            FieldValue::Text(_) | FieldValue::Bool(_) => Ok(()),
            FieldValue::Number(value) => {
                if value.is_finite() {
                    Ok(())
                } else {
                    Err(RefugeError::validation("number must be finite"))
                }
            }
            FieldValue::Date(value) => Date::parse(value, format_description!("[year]-[month]-[day]"))
                .map(|_| ())
                .map_err(|err| RefugeError::validation(format!("invalid date '{value}': {err}"))),
            FieldValue::Time(value) => {
                let with_seconds = format_description!("[hour]:[minute]:[second]");
                let without_seconds = format_description!("[hour]:[minute]");
                Time::parse(value, with_seconds)
                    .or_else(|_| Time::parse(value, without_seconds))
                    .map(|_| ())
                    .map_err(|err| RefugeError::validation(format!("invalid time '{value}': {err}")))
            }
            FieldValue::DateTime(value) => OffsetDateTime::parse(value, &Rfc3339)
                .map(|_| ())
                .map_err(|err| {
                    RefugeError::validation(format!("invalid datetime '{value}': {err}"))
                }),
        }
    }
}

/// True when every entry of `subset` is present with an equal value in `payload`.
pub fn payload_contains(payload: &RecordPayload, subset: &RecordPayload) -> bool {
    subset
        .iter()
        .all(|(key, value)| payload.get(key) == Some(value))
}
