//! Conversion of dump literals into typed target values.
//!
//! INSERT literals arrive typed (numbers, strings, booleans, hex) while COPY
//! fields are all text, so every numeric target accepts text input too.

use crate::parser::RawValue;
use crate::target::TargetType;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;
use thiserror::Error;

static DECIMAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").unwrap());

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
const ZONED_TIMESTAMP_FORMATS: &[&str] =
    &["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%.f %#z"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("unsupported expression: {0}")]
    Unsupported(String),
    #[error("invalid {ty} value: {value}")]
    Invalid { ty: String, value: String },
    #[error("{value} out of range for {ty}")]
    OutOfRange { ty: String, value: String },
}

impl ValueError {
    fn invalid(ty: &TargetType, value: &str) -> Self {
        ValueError::Invalid {
            ty: ty.to_string(),
            value: value.to_string(),
        }
    }
}

/// A value ready to be written to the target
#[derive(Debug, Clone, PartialEq)]
pub enum TargetValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    /// Decimal text, validated
    Numeric(String),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
    Array(Vec<TargetValue>),
}

impl TargetValue {
    /// Approximate encoded size, used for batch limits
    pub fn byte_size(&self) -> usize {
        match self {
            TargetValue::Null => 1,
            TargetValue::Bool(_) => 1,
            TargetValue::Int64(_) | TargetValue::Float64(_) => 8,
            TargetValue::Float32(_) => 4,
            TargetValue::Numeric(s) | TargetValue::String(s) => s.len(),
            TargetValue::Bytes(b) => b.len(),
            TargetValue::Date(_) => 4,
            TargetValue::Timestamp(_) => 12,
            TargetValue::Json(v) => v.to_string().len(),
            TargetValue::Array(items) => items.iter().map(TargetValue::byte_size).sum(),
        }
    }
}

impl Serialize for TargetValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TargetValue::Null => serializer.serialize_none(),
            TargetValue::Bool(b) => serializer.serialize_bool(*b),
            TargetValue::Int64(n) => serializer.serialize_i64(*n),
            TargetValue::Float32(f) => serializer.serialize_f32(*f),
            TargetValue::Float64(f) => serializer.serialize_f64(*f),
            TargetValue::Numeric(s) | TargetValue::String(s) => serializer.serialize_str(s),
            TargetValue::Bytes(b) => serializer.serialize_str(&hex::encode(b)),
            TargetValue::Date(d) => serializer.collect_str(&d.format("%Y-%m-%d")),
            TargetValue::Timestamp(ts) => {
                serializer.serialize_str(&ts.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
            }
            TargetValue::Json(v) => v.serialize(serializer),
            TargetValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

/// Convert one dump literal to a value of `ty`.
///
/// `tz` is applied to timestamps written without an offset.
pub fn convert_value(
    raw: &RawValue,
    ty: &TargetType,
    tz: FixedOffset,
) -> Result<TargetValue, ValueError> {
    if let RawValue::Null = raw {
        return Ok(TargetValue::Null);
    }
    if let RawValue::Unsupported(expr) = raw {
        return Err(ValueError::Unsupported(expr.clone()));
    }

    match ty {
        TargetType::Bool => to_bool(raw, ty),
        TargetType::Int64 => to_int(raw, ty),
        TargetType::Float32 => {
            let text = scalar_text(raw, ty)?;
            text.trim()
                .parse::<f32>()
                .map(TargetValue::Float32)
                .map_err(|_| ValueError::invalid(ty, &text))
        }
        TargetType::Float64 => {
            let text = scalar_text(raw, ty)?;
            text.trim()
                .parse::<f64>()
                .map(TargetValue::Float64)
                .map_err(|_| ValueError::invalid(ty, &text))
        }
        TargetType::Numeric => {
            let text = scalar_text(raw, ty)?;
            let trimmed = text.trim();
            if DECIMAL_RE.is_match(trimmed) {
                Ok(TargetValue::Numeric(trimmed.to_string()))
            } else {
                Err(ValueError::invalid(ty, &text))
            }
        }
        TargetType::String(_) => match raw {
            RawValue::Text(s) | RawValue::Number(s) => Ok(TargetValue::String(s.clone())),
            RawValue::Bool(b) => Ok(TargetValue::String(b.to_string())),
            RawValue::Hex(h) => hex::decode(h)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .map(TargetValue::String)
                .ok_or_else(|| ValueError::invalid(ty, h)),
            RawValue::Null | RawValue::Unsupported(_) => Err(ValueError::invalid(ty, &raw.to_string())),
        },
        TargetType::Bytes(_) => to_bytes(raw, ty),
        TargetType::Date => {
            let text = text_only(raw, ty)?;
            NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
                .map(TargetValue::Date)
                .map_err(|_| ValueError::invalid(ty, text))
        }
        TargetType::Timestamp => {
            let text = text_only(raw, ty)?;
            parse_timestamp(text.trim(), tz)
                .map(TargetValue::Timestamp)
                .ok_or_else(|| ValueError::invalid(ty, text))
        }
        TargetType::Json => {
            let text = text_only(raw, ty)?;
            serde_json::from_str(text)
                .map(TargetValue::Json)
                .map_err(|_| ValueError::invalid(ty, text))
        }
        TargetType::Array(elem) => {
            let text = text_only(raw, ty)?;
            let items = if text.trim_start().starts_with('{') {
                parse_array_literal(text).ok_or_else(|| ValueError::invalid(ty, text))?
            } else if text.is_empty() {
                Vec::new()
            } else {
                // MySQL SET: comma separated members
                text.split(',').map(|m| Some(m.to_string())).collect()
            };
            items
                .into_iter()
                .map(|item| match item {
                    Some(s) => convert_value(&RawValue::Text(s), elem, tz),
                    None => Ok(TargetValue::Null),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(TargetValue::Array)
        }
    }
}

fn scalar_text(raw: &RawValue, ty: &TargetType) -> Result<String, ValueError> {
    match raw {
        RawValue::Number(s) | RawValue::Text(s) => Ok(s.clone()),
        RawValue::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        other => Err(ValueError::invalid(ty, &other.to_string())),
    }
}

fn text_only<'a>(raw: &'a RawValue, ty: &TargetType) -> Result<&'a str, ValueError> {
    match raw {
        RawValue::Text(s) => Ok(s),
        other => Err(ValueError::invalid(ty, &other.to_string())),
    }
}

fn to_bool(raw: &RawValue, ty: &TargetType) -> Result<TargetValue, ValueError> {
    match raw {
        RawValue::Bool(b) => Ok(TargetValue::Bool(*b)),
        RawValue::Number(n) => match n.parse::<f64>() {
            Ok(v) => Ok(TargetValue::Bool(v != 0.0)),
            Err(_) => Err(ValueError::invalid(ty, n)),
        },
        RawValue::Text(s) => match s.trim().to_lowercase().as_str() {
            "t" | "true" | "y" | "yes" | "on" | "1" => Ok(TargetValue::Bool(true)),
            "f" | "false" | "n" | "no" | "off" | "0" => Ok(TargetValue::Bool(false)),
            _ => Err(ValueError::invalid(ty, s)),
        },
        other => Err(ValueError::invalid(ty, &other.to_string())),
    }
}

fn to_int(raw: &RawValue, ty: &TargetType) -> Result<TargetValue, ValueError> {
    let text = match raw {
        RawValue::Hex(h) => {
            return i64::from_str_radix(h, 16)
                .map(TargetValue::Int64)
                .map_err(|_| ValueError::OutOfRange {
                    ty: ty.to_string(),
                    value: format!("0x{}", h),
                })
        }
        _ => scalar_text(raw, ty)?,
    };
    let trimmed = text.trim();
    match trimmed.parse::<i64>() {
        Ok(n) => Ok(TargetValue::Int64(n)),
        // digits that do not fit, e.g. BIGINT UNSIGNED above i64::MAX
        Err(_) if is_integer_text(trimmed) => Err(ValueError::OutOfRange {
            ty: ty.to_string(),
            value: text,
        }),
        Err(_) => Err(ValueError::invalid(ty, &text)),
    }
}

fn is_integer_text(s: &str) -> bool {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn to_bytes(raw: &RawValue, ty: &TargetType) -> Result<TargetValue, ValueError> {
    match raw {
        RawValue::Hex(h) => hex::decode(h)
            .map(TargetValue::Bytes)
            .map_err(|_| ValueError::invalid(ty, h)),
        // PostgreSQL bytea hex output
        RawValue::Text(s) if s.starts_with("\\x") => hex::decode(&s[2..])
            .map(TargetValue::Bytes)
            .map_err(|_| ValueError::invalid(ty, s)),
        RawValue::Text(s) | RawValue::Number(s) => Ok(TargetValue::Bytes(s.as_bytes().to_vec())),
        other => Err(ValueError::invalid(ty, &other.to_string())),
    }
}

/// Parse a timestamp, with or without an offset
pub fn parse_timestamp(text: &str, tz: FixedOffset) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ZONED_TIMESTAMP_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(text, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    let naive = NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    tz.from_local_datetime(&naive)
        .single()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Split a PostgreSQL array literal (`{a,"b c",NULL}`) into its elements.
/// `None` for malformed or multi-dimensional input.
pub fn parse_array_literal(text: &str) -> Option<Vec<Option<String>>> {
    let inner = text.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut items = Vec::new();
    if inner.trim().is_empty() {
        return Some(items);
    }

    let mut chars = inner.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let mut item = String::new();
        let quoted = chars.peek() == Some(&'"');
        if quoted {
            chars.next();
            loop {
                match chars.next()? {
                    '\\' => item.push(chars.next()?),
                    '"' => break,
                    c => item.push(c),
                }
            }
            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                chars.next();
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                if c == '{' || c == '"' {
                    return None;
                }
                item.push(c);
                chars.next();
            }
            item = item.trim().to_string();
        }

        if !quoted && item.eq_ignore_ascii_case("NULL") {
            items.push(None);
        } else {
            items.push(Some(item));
        }

        match chars.next() {
            Some(',') => continue,
            None => break,
            Some(_) => return None,
        }
    }
    Some(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Length;
    use chrono::Offset;

    fn utc() -> FixedOffset {
        Utc.fix()
    }

    fn text(s: &str) -> RawValue {
        RawValue::Text(s.into())
    }

    fn num(s: &str) -> RawValue {
        RawValue::Number(s.into())
    }

    #[test]
    fn test_numbers_from_literals_and_text() {
        assert_eq!(convert_value(&num("42"), &TargetType::Int64, utc()), Ok(TargetValue::Int64(42)));
        assert_eq!(convert_value(&text(" -7 "), &TargetType::Int64, utc()), Ok(TargetValue::Int64(-7)));
        assert_eq!(
            convert_value(&num("1.5"), &TargetType::Float64, utc()),
            Ok(TargetValue::Float64(1.5))
        );
        assert_eq!(
            convert_value(&text("12.340"), &TargetType::Numeric, utc()),
            Ok(TargetValue::Numeric("12.340".into()))
        );
        assert!(convert_value(&text("abc"), &TargetType::Numeric, utc()).is_err());
    }

    #[test]
    fn test_unsigned_overflow_is_out_of_range() {
        let err = convert_value(&num("18446744073709551615"), &TargetType::Int64, utc()).unwrap_err();
        assert!(matches!(err, ValueError::OutOfRange { .. }));
        let err = convert_value(&num("1.5"), &TargetType::Int64, utc()).unwrap_err();
        assert!(matches!(err, ValueError::Invalid { .. }));
    }

    #[test]
    fn test_bools() {
        assert_eq!(convert_value(&text("t"), &TargetType::Bool, utc()), Ok(TargetValue::Bool(true)));
        assert_eq!(convert_value(&num("0"), &TargetType::Bool, utc()), Ok(TargetValue::Bool(false)));
        assert!(convert_value(&text("maybe"), &TargetType::Bool, utc()).is_err());
    }

    #[test]
    fn test_null_and_unsupported() {
        assert_eq!(convert_value(&RawValue::Null, &TargetType::Date, utc()), Ok(TargetValue::Null));
        assert_eq!(
            convert_value(&RawValue::Unsupported("bad_token".into()), &TargetType::Int64, utc()),
            Err(ValueError::Unsupported("bad_token".into()))
        );
    }

    #[test]
    fn test_timestamps_use_offset_only_when_missing() {
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let naive = convert_value(&text("2024-01-01 12:00:00"), &TargetType::Timestamp, plus_two).unwrap();
        let zoned =
            convert_value(&text("2024-01-01 12:00:00+00"), &TargetType::Timestamp, plus_two).unwrap();

        let expected_naive = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let expected_zoned = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(naive, TargetValue::Timestamp(expected_naive));
        assert_eq!(zoned, TargetValue::Timestamp(expected_zoned));
        assert!(convert_value(&text("0000-00-00 00:00:00"), &TargetType::Timestamp, utc()).is_err());
    }

    #[test]
    fn test_dates_and_json() {
        assert_eq!(
            convert_value(&text("2020-02-29"), &TargetType::Date, utc()),
            Ok(TargetValue::Date(NaiveDate::from_ymd_opt(2020, 2, 29).unwrap()))
        );
        assert!(convert_value(&text(r#"{"a":1}"#), &TargetType::Json, utc()).is_ok());
        assert!(convert_value(&text("{not json"), &TargetType::Json, utc()).is_err());
    }

    #[test]
    fn test_bytes() {
        let ty = TargetType::Bytes(Length::Max);
        assert_eq!(
            convert_value(&RawValue::Hex("DEAD".into()), &ty, utc()),
            Ok(TargetValue::Bytes(vec![0xde, 0xad]))
        );
        assert_eq!(
            convert_value(&text("\\x0102"), &ty, utc()),
            Ok(TargetValue::Bytes(vec![1, 2]))
        );
    }

    #[test]
    fn test_set_and_array_values() {
        let ty = TargetType::Array(Box::new(TargetType::String(Length::Max)));
        assert_eq!(
            convert_value(&text("a,b"), &ty, utc()),
            Ok(TargetValue::Array(vec![
                TargetValue::String("a".into()),
                TargetValue::String("b".into())
            ]))
        );
        assert_eq!(convert_value(&text(""), &ty, utc()), Ok(TargetValue::Array(vec![])));

        let ints = TargetType::Array(Box::new(TargetType::Int64));
        assert_eq!(
            convert_value(&text("{1,NULL,3}"), &ints, utc()),
            Ok(TargetValue::Array(vec![
                TargetValue::Int64(1),
                TargetValue::Null,
                TargetValue::Int64(3)
            ]))
        );
    }

    #[test]
    fn test_array_literal_quoting() {
        assert_eq!(
            parse_array_literal(r#"{"a,b","say \"hi\"",NULL,"NULL"}"#),
            Some(vec![
                Some("a,b".to_string()),
                Some("say \"hi\"".to_string()),
                None,
                Some("NULL".to_string())
            ])
        );
        assert_eq!(parse_array_literal("{{1,2},{3,4}}"), None);
        assert_eq!(parse_array_literal("{}"), Some(vec![]));
    }

    #[test]
    fn test_serialization() {
        let row = vec![
            TargetValue::Int64(1),
            TargetValue::Bytes(vec![0xab]),
            TargetValue::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
            TargetValue::Timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap()),
            TargetValue::Null,
        ];
        assert_eq!(
            serde_json::to_string(&row).unwrap(),
            r#"[1,"ab","2024-03-01","2024-03-01T08:30:00Z",null]"#
        );
    }
}
