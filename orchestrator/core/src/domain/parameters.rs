// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Boundary validation of untyped gateway parameters.
//!
//! Raw JSON values are converted into [`ParamValue`] according to their
//! [`ParamDecl`]. Nothing downstream of this module sees a raw value.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;
use uuid::Uuid;

use crate::domain::manifest::{ParamDecl, ParamKind};

static UUID_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[1-5][0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
        .expect("static uuid regex")
});

static DATE_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static date regex"));

/// A validated, typed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// An absent optional parameter, still typed by its declaration.
    Null(ParamKind),
    Uuid(Uuid),
    String(String),
    Number(f64),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Jsonb(Value),
}

impl ParamValue {
    /// JSON rendering used in audit records.
    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Null(_) => Value::Null,
            ParamValue::Uuid(u) => json!(u.to_string()),
            ParamValue::String(s) => json!(s),
            ParamValue::Number(n) => json!(n),
            ParamValue::Date(d) => json!(d.format("%Y-%m-%d").to_string()),
            ParamValue::Timestamp(t) => json!(t.to_rfc3339()),
            ParamValue::Jsonb(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    #[error("required parameter '{name}' is missing")]
    RequiredParameterMissing { name: String },

    #[error("parameter '{name}' {message}")]
    TypeConversion {
        name: String,
        kind: ParamKind,
        message: String,
    },
}

impl ParamError {
    pub fn param(&self) -> &str {
        match self {
            ParamError::RequiredParameterMissing { name } | ParamError::TypeConversion { name, .. } => name,
        }
    }
}

/// Validate one declared parameter. `raw` is `None` when the key is absent.
pub fn convert_param(decl: &ParamDecl, raw: Option<&Value>) -> Result<ParamValue, ParamError> {
    let raw = match raw {
        None | Some(Value::Null) if decl.required => {
            return Err(ParamError::RequiredParameterMissing {
                name: decl.name.clone(),
            })
        }
        None | Some(Value::Null) => return Ok(ParamValue::Null(decl.kind)),
        Some(v) => v,
    };

    let mismatch = |message: &str| ParamError::TypeConversion {
        name: decl.name.clone(),
        kind: decl.kind,
        message: message.to_string(),
    };

    match decl.kind {
        ParamKind::Uuid => {
            let s = raw.as_str().filter(|s| UUID_SHAPE.is_match(s));
            s.and_then(|s| Uuid::parse_str(s).ok())
                .map(ParamValue::Uuid)
                .ok_or_else(|| mismatch("must be a valid UUID"))
        }
        ParamKind::String => raw
            .as_str()
            .map(|s| ParamValue::String(s.to_string()))
            .ok_or_else(|| mismatch("must be a string")),
        ParamKind::Number => {
            let n = match raw {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            n.filter(|n| n.is_finite())
                .map(ParamValue::Number)
                .ok_or_else(|| mismatch("must be a number"))
        }
        ParamKind::Date => raw
            .as_str()
            .filter(|s| DATE_SHAPE.is_match(s))
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            .map(ParamValue::Date)
            .ok_or_else(|| mismatch("must be a date in YYYY-MM-DD format")),
        ParamKind::Timestamp => parse_instant(raw)
            .map(ParamValue::Timestamp)
            .ok_or_else(|| mismatch("must be a valid timestamp")),
        ParamKind::Jsonb => {
            let value = match raw {
                Value::Object(_) | Value::Array(_) => Some(raw.clone()),
                Value::String(s) => serde_json::from_str::<Value>(s)
                    .ok()
                    .filter(|v| v.is_object() || v.is_array()),
                _ => None,
            };
            value
                .map(ParamValue::Jsonb)
                .ok_or_else(|| mismatch("must be a JSON object or array"))
        }
    }
}

fn parse_instant(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| naive.and_utc())
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                        .map(|naive| naive.and_utc())
                })
        }
        // epoch milliseconds
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str, kind: ParamKind, required: bool) -> ParamDecl {
        ParamDecl {
            name: name.to_string(),
            kind,
            required,
        }
    }

    #[test]
    fn test_number_rejects_non_numeric() {
        let err = convert_param(&decl("total", ParamKind::Number, true), Some(&json!("not-a-number"))).unwrap_err();
        assert!(err.to_string().contains("must be a number"));
        assert!(convert_param(&decl("total", ParamKind::Number, true), Some(&json!("NaN"))).is_err());
        assert!(convert_param(&decl("total", ParamKind::Number, true), Some(&json!(true))).is_err());
    }

    #[test]
    fn test_number_accepts_numeric_strings() {
        assert_eq!(
            convert_param(&decl("total", ParamKind::Number, true), Some(&json!(" 12.5 "))).unwrap(),
            ParamValue::Number(12.5)
        );
        assert_eq!(
            convert_param(&decl("total", ParamKind::Number, true), Some(&json!(3))).unwrap(),
            ParamValue::Number(3.0)
        );
    }

    #[test]
    fn test_uuid_shape() {
        let d = decl("venue_id", ParamKind::Uuid, true);
        assert!(convert_param(&d, Some(&json!("not-a-uuid"))).is_err());
        assert!(convert_param(&d, Some(&json!("6f1c1e0a-7d3b-4c4f-9a2e-1b2c3d4e5f60"))).is_ok());
        // simple (hyphenless) form parses with the uuid crate but is not RFC-4122 shaped
        assert!(convert_param(&d, Some(&json!("6f1c1e0a7d3b4c4f9a2e1b2c3d4e5f60"))).is_err());
    }

    #[test]
    fn test_date_and_timestamp() {
        let date = decl("on", ParamKind::Date, true);
        assert!(convert_param(&date, Some(&json!("2026-03-01"))).is_ok());
        assert!(convert_param(&date, Some(&json!("2026-02-30"))).is_err());
        assert!(convert_param(&date, Some(&json!("01/03/2026"))).is_err());

        let ts = decl("at", ParamKind::Timestamp, true);
        assert!(convert_param(&ts, Some(&json!("2026-03-01T10:00:00+02:00"))).is_ok());
        assert!(convert_param(&ts, Some(&json!("2026-03-01 10:00:00"))).is_ok());
        assert!(convert_param(&ts, Some(&json!(1_767_225_600_000_i64))).is_ok());
        assert!(convert_param(&ts, Some(&json!("soon"))).is_err());
    }

    #[test]
    fn test_jsonb_accepts_object_or_encoded_object() {
        let d = decl("body", ParamKind::Jsonb, true);
        assert_eq!(
            convert_param(&d, Some(&json!("{\"a\":1}"))).unwrap(),
            ParamValue::Jsonb(json!({"a": 1}))
        );
        assert!(convert_param(&d, Some(&json!([1, 2]))).is_ok());
        assert!(convert_param(&d, Some(&json!("42"))).is_err());
        assert!(convert_param(&d, Some(&json!(42))).is_err());
    }

    #[test]
    fn test_missing_values() {
        let err = convert_param(&decl("id", ParamKind::Uuid, true), None).unwrap_err();
        assert_eq!(err, ParamError::RequiredParameterMissing { name: "id".into() });
        assert_eq!(
            convert_param(&decl("note", ParamKind::String, false), Some(&Value::Null)).unwrap(),
            ParamValue::Null(ParamKind::String)
        );
        assert_eq!(
            convert_param(&decl("venue_id", ParamKind::Uuid, false), None).unwrap(),
            ParamValue::Null(ParamKind::Uuid)
        );
        assert!(convert_param(&decl("note", ParamKind::String, false), Some(&json!(5))).is_err());
    }
}
