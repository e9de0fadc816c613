//! Records and typed scalar values
//!
//! A [`Record`] is one extracted row: column names in source order, each
//! mapped to a [`Value`]. Sources produce them, the normalizer reshapes them
//! and the file encoders turn batches of them into Parquet or JSONL.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Timestamp layout used for text output (JSONL, casts to string)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

const DATE_FORMAT: &str = "%Y-%m-%d";

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const OFFSET_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"];

/// Column types a declared schema can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[serde(alias = "text")]
    String,
    #[serde(alias = "int", alias = "bigint")]
    Integer,
    #[serde(alias = "double", alias = "number")]
    Float,
    #[serde(alias = "bool")]
    Boolean,
    Date,
    #[serde(alias = "datetime")]
    Timestamp,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// One declared column: `{ name: id, type: integer, required: true }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub column_type: ColumnType,

    /// Rows where this column is null are dropped
    #[serde(default)]
    pub required: bool,
}

/// A typed scalar. Timestamps are UTC wall-clock time.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The type this value carries, `None` for null
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(ColumnType::Boolean),
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Text(_) => Some(ColumnType::String),
            Value::Date(_) => Some(ColumnType::Date),
            Value::Timestamp(_) => Some(ColumnType::Timestamp),
        }
    }

    /// Calendar date of a date, timestamp or temporal text value
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(date) => Some(*date),
            Value::Timestamp(ts) => Some(ts.date()),
            Value::Text(text) => Value::parse_temporal(text).and_then(|v| v.as_date()),
            _ => None,
        }
    }

    /// Calendar day a value belongs to. Text counts by its leading
    /// `YYYY-MM-DD`, so a trailing time, offset or zone name never moves a
    /// row to another day.
    pub fn leading_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Text(text) => date_prefix(text),
            other => other.as_date(),
        }
    }

    /// Parse ISO-8601-ish text into a `Date` or a `Timestamp`.
    ///
    /// Date-only text becomes a `Date`. Timestamps may use a space or `T`
    /// separator and may carry a fractional part and a UTC offset; offsets
    /// are folded into UTC.
    pub fn parse_temporal(text: &str) -> Option<Value> {
        parse_temporal_as(text, DateTime::naive_utc)
    }

    /// Like [`Value::parse_temporal`], but an offset is dropped and the
    /// written wall-clock time kept, so the result stays on the day the text
    /// names.
    pub fn parse_temporal_wall_clock(text: &str) -> Option<Value> {
        parse_temporal_as(text, DateTime::naive_local)
    }

    /// Convert to `target` only when nothing is lost: integer to float within
    /// the exactly representable range, whole floats to integer, date to
    /// timestamp at midnight, anything to text. `None` otherwise.
    pub fn coerce_lossless(&self, target: ColumnType) -> Option<Value> {
        const EXACT_FLOAT_INT: u64 = 1 << f64::MANTISSA_DIGITS;

        if self.is_null() || self.column_type() == Some(target) {
            return Some(self.clone());
        }

        match (self, target) {
            (Value::Integer(v), ColumnType::Float) if v.unsigned_abs() <= EXACT_FLOAT_INT => {
                Some(Value::Float(*v as f64))
            },
            (Value::Float(_), ColumnType::Integer) => self.cast(ColumnType::Integer),
            (Value::Date(date), ColumnType::Timestamp) => {
                Some(Value::Timestamp(date.and_time(NaiveTime::MIN)))
            },
            (_, ColumnType::String) => Some(Value::Text(self.to_string())),
            _ => None,
        }
    }

    /// Convert to `target`, `None` when the value cannot be represented.
    /// Null casts to null for every type.
    pub fn cast(&self, target: ColumnType) -> Option<Value> {
        if self.is_null() {
            return Some(Value::Null);
        }

        match target {
            ColumnType::String => Some(match self {
                Value::Text(text) => Value::Text(text.clone()),
                other => Value::Text(other.to_string()),
            }),
            ColumnType::Integer => match self {
                Value::Integer(v) => Some(Value::Integer(*v)),
                Value::Float(v)
                    if v.fract() == 0.0 && *v >= i64::MIN as f64 && *v <= i64::MAX as f64 =>
                {
                    Some(Value::Integer(*v as i64))
                }
                Value::Text(text) => text.trim().parse().ok().map(Value::Integer),
                _ => None,
            },
            ColumnType::Float => match self {
                Value::Float(v) => Some(Value::Float(*v)),
                Value::Integer(v) => Some(Value::Float(*v as f64)),
                Value::Text(text) => text.trim().parse().ok().map(Value::Float),
                _ => None,
            },
            ColumnType::Boolean => match self {
                Value::Boolean(v) => Some(Value::Boolean(*v)),
                Value::Integer(0) => Some(Value::Boolean(false)),
                Value::Integer(1) => Some(Value::Boolean(true)),
                Value::Text(text) => parse_bool(text).map(Value::Boolean),
                _ => None,
            },
            ColumnType::Date => self.as_date().map(Value::Date),
            ColumnType::Timestamp => match self {
                Value::Timestamp(ts) => Some(Value::Timestamp(*ts)),
                Value::Date(date) => Some(Value::Timestamp(date.and_time(NaiveTime::MIN))),
                Value::Text(text) => {
                    Value::parse_temporal(text).and_then(|v| v.cast(ColumnType::Timestamp))
                }
                _ => None,
            },
        }
    }
}

/// Leading `YYYY-MM-DD` of `text`, followed by nothing, a space or `T`
pub fn date_prefix(text: &str) -> Option<NaiveDate> {
    let text = text.trim_start();
    let head = text.get(..10)?;
    match text[10..].chars().next() {
        None | Some(' ') | Some('T') => NaiveDate::parse_from_str(head, DATE_FORMAT).ok(),
        Some(_) => None,
    }
}

fn parse_temporal_as(text: &str, resolve: fn(&DateTime<FixedOffset>) -> NaiveDateTime) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(text, DATE_FORMAT) {
        return Some(Value::Date(date));
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(Value::Timestamp(resolve(&ts)));
    }

    for format in OFFSET_TIMESTAMP_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(text, format) {
            return Some(Value::Timestamp(resolve(&ts)));
        }
    }

    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(Value::Timestamp)
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
            Value::Date(v) => write!(f, "{}", v.format(DATE_FORMAT)),
            Value::Timestamp(v) => write!(f, "{}", v.format(TIMESTAMP_FORMAT)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Boolean(v) => serializer.serialize_bool(*v),
            Value::Integer(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Text(v) => serializer.serialize_str(v),
            Value::Date(_) | Value::Timestamp(_) => serializer.collect_str(self),
        }
    }
}

/// An ordered mapping of column name to value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Append a column. Callers keep names unique; use [`Record::set`] to replace.
    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    /// Replace the value of `name`, appending the column if it is absent
    pub fn set(&mut self, name: &str, value: Value) {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ts(text: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").unwrap()
    }

    #[test]
    fn test_parse_temporal_date_only() {
        assert_eq!(
            Value::parse_temporal("2024-12-01"),
            Some(Value::Date(date(2024, 12, 1)))
        );
    }

    #[test]
    fn test_parse_temporal_timestamp_separators() {
        let expected = Some(Value::Timestamp(ts("2024-12-01 10:15:30.250")));
        assert_eq!(Value::parse_temporal("2024-12-01 10:15:30.250"), expected);
        assert_eq!(Value::parse_temporal("2024-12-01T10:15:30.250"), expected);
    }

    #[test]
    fn test_parse_temporal_offset_is_folded_into_utc() {
        assert_eq!(
            Value::parse_temporal("2024-12-01T23:30:00-02:00"),
            Some(Value::Timestamp(ts("2024-12-02 01:30:00")))
        );
        assert_eq!(
            Value::parse_temporal("2024-12-01 10:00:00+00"),
            Some(Value::Timestamp(ts("2024-12-01 10:00:00")))
        );
    }

    #[test]
    fn test_wall_clock_parse_keeps_the_written_day() {
        assert_eq!(
            Value::parse_temporal_wall_clock("2024-12-01T22:00:00-05:00"),
            Some(Value::Timestamp(ts("2024-12-01 22:00:00")))
        );
        assert_eq!(
            Value::parse_temporal_wall_clock("2024-12-01 08:00:00"),
            Some(Value::Timestamp(ts("2024-12-01 08:00:00")))
        );
    }

    #[test]
    fn test_date_prefix() {
        assert_eq!(date_prefix("2024-12-01"), Some(date(2024, 12, 1)));
        assert_eq!(date_prefix("2024-12-01T22:00:00-05:00"), Some(date(2024, 12, 1)));
        assert_eq!(date_prefix("2024-12-01 08:00:00 UTC"), Some(date(2024, 12, 1)));
        assert_eq!(date_prefix("2024-12-011"), None);
        assert_eq!(date_prefix("2024-13-01 00:00"), None);
        assert_eq!(date_prefix("12/01/2024"), None);
        assert_eq!(date_prefix(""), None);
    }

    #[test]
    fn test_leading_date_of_values() {
        assert_eq!(
            Value::Text("2024-12-01T23:30:00-02:00".into()).leading_date(),
            Some(date(2024, 12, 1))
        );
        assert_eq!(
            Value::Timestamp(ts("2024-12-01 23:59:59")).leading_date(),
            Some(date(2024, 12, 1))
        );
        assert_eq!(Value::Null.leading_date(), None);
    }

    #[test]
    fn test_coerce_lossless() {
        let day = Value::Date(date(2024, 12, 1));
        let moment = Value::Timestamp(ts("2024-12-01 13:45:00"));

        assert_eq!(
            day.coerce_lossless(ColumnType::Timestamp),
            Some(Value::Timestamp(ts("2024-12-01 00:00:00")))
        );
        assert_eq!(moment.coerce_lossless(ColumnType::Date), None);
        assert_eq!(Value::Integer(3).coerce_lossless(ColumnType::Float), Some(Value::Float(3.0)));
        assert_eq!(Value::Integer(i64::MAX).coerce_lossless(ColumnType::Float), None);
        assert_eq!(Value::Float(2.0).coerce_lossless(ColumnType::Integer), Some(Value::Integer(2)));
        assert_eq!(Value::Float(2.5).coerce_lossless(ColumnType::Integer), None);
        assert_eq!(Value::Text("42".into()).coerce_lossless(ColumnType::Integer), None);
        assert_eq!(Value::Boolean(true).coerce_lossless(ColumnType::String), Some(Value::Text("true".into())));
        assert_eq!(Value::Null.coerce_lossless(ColumnType::Date), Some(Value::Null));
    }

    #[test]
    fn test_parse_temporal_rejects_garbage() {
        assert_eq!(Value::parse_temporal(""), None);
        assert_eq!(Value::parse_temporal("yesterday"), None);
        assert_eq!(Value::parse_temporal("2024-13-01"), None);
    }

    #[test]
    fn test_as_date_truncates_timestamps() {
        assert_eq!(
            Value::Text("2024-12-01 23:59:59".into()).as_date(),
            Some(date(2024, 12, 1))
        );
        assert_eq!(Value::Integer(20241201).as_date(), None);
        assert_eq!(Value::Null.as_date(), None);
    }

    #[test]
    fn test_cast_text_to_declared_types() {
        let text = |s: &str| Value::Text(s.to_string());

        assert_eq!(text(" 42 ").cast(ColumnType::Integer), Some(Value::Integer(42)));
        assert_eq!(text("4.5").cast(ColumnType::Float), Some(Value::Float(4.5)));
        assert_eq!(text("Yes").cast(ColumnType::Boolean), Some(Value::Boolean(true)));
        assert_eq!(
            text("2024-12-01 08:00:00").cast(ColumnType::Date),
            Some(Value::Date(date(2024, 12, 1)))
        );
        assert_eq!(
            text("2024-12-01").cast(ColumnType::Timestamp),
            Some(Value::Timestamp(ts("2024-12-01 00:00:00")))
        );
        assert_eq!(text("forty-two").cast(ColumnType::Integer), None);
    }

    #[test]
    fn test_cast_between_numbers() {
        assert_eq!(Value::Integer(3).cast(ColumnType::Float), Some(Value::Float(3.0)));
        assert_eq!(Value::Float(3.0).cast(ColumnType::Integer), Some(Value::Integer(3)));
        assert_eq!(Value::Float(3.5).cast(ColumnType::Integer), None);
        assert_eq!(Value::Null.cast(ColumnType::Integer), Some(Value::Null));
    }

    #[test]
    fn test_cast_to_string_uses_canonical_layouts() {
        assert_eq!(
            Value::Timestamp(ts("2024-12-01 10:00:00")).cast(ColumnType::String),
            Some(Value::Text("2024-12-01 10:00:00.000000".into()))
        );
        assert_eq!(
            Value::Date(date(2024, 12, 1)).cast(ColumnType::String),
            Some(Value::Text("2024-12-01".into()))
        );
    }

    #[test]
    fn test_record_keeps_column_order() {
        let mut record: Record = [("id", Value::Integer(1)), ("email", Value::Null)]
            .into_iter()
            .collect();
        record.set("dt", Value::Date(date(2024, 12, 1)));
        record.set("email", Value::Text("a@example.com".into()));

        assert_eq!(record.columns().collect::<Vec<_>>(), vec!["id", "email", "dt"]);
        assert_eq!(record.get("email"), Some(&Value::Text("a@example.com".into())));
        assert!(!record.contains("missing"));
    }

    #[test]
    fn test_record_serializes_in_order() {
        let record: Record = [
            ("name", Value::Text("Ann".into())),
            ("active", Value::Boolean(true)),
            ("id", Value::Integer(7)),
            ("created_at", Value::Timestamp(ts("2024-12-01 08:00:00.5"))),
            ("deleted_at", Value::Null),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"name":"Ann","active":true,"id":7,"created_at":"2024-12-01 08:00:00.500000","deleted_at":null}"#
        );
    }

    #[test]
    fn test_column_spec_from_yaml() {
        let spec: ColumnSpec =
            serde_yaml::from_str("{ name: id, type: bigint, required: true }").unwrap();
        assert_eq!(spec.column_type, ColumnType::Integer);
        assert!(spec.required);
    }
}
