//! # Value Module
//!
//! Dynamic values flowing between entities, the query builder and the driver.
//!
//! The sqlx `Any` driver only carries primitive types, so temporal and UUID
//! values travel as text on the wire and are parsed back here. Every column
//! read from the database is first coerced to its declared [`ColumnType`] and
//! then converted into the Rust field type through [`FromValue`].

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use sqlx::{Column, Row, TypeInfo, ValueRef, any::AnyRow};
use uuid::Uuid;

use crate::Error;

/// A generic row: column name -> value.
pub type Record = HashMap<String, Value>;

// ============================================================================
// Value
// ============================================================================

/// A dynamically typed SQL value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    /// A timestamp without time zone.
    DateTime(NaiveDateTime),
    /// A timestamp in UTC.
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `true` for `NULL` and empty strings, the values replaced by column defaults.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// `true` when this value cannot identify a persisted row (`NULL`, `0`, `""`).
    pub fn is_unset_key(&self) -> bool {
        match self {
            Value::Int(0) => true,
            other => other.is_blank(),
        }
    }

    /// Numeric view of the value, parsing text the way a loose numeric check would.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    /// Converts the value to the representation declared for a column.
    pub fn coerce(self, column_type: ColumnType) -> Result<Value, Error> {
        if self.is_null() {
            return Ok(Value::Null);
        }

        let coerced = match column_type {
            ColumnType::String => Value::Text(String::from_value(self)?),
            ColumnType::Integer => Value::Int(i64::from_value(self)?),
            ColumnType::Float => Value::Float(f64::from_value(self)?),
            ColumnType::Boolean => Value::Bool(bool::from_value(self)?),
            ColumnType::DateTime => Value::DateTime(NaiveDateTime::from_value(self)?),
            ColumnType::Timestamp => Value::Timestamp(DateTime::<Utc>::from_value(self)?),
            ColumnType::Date => Value::Date(NaiveDate::from_value(self)?),
            ColumnType::Time => Value::Time(NaiveTime::from_value(self)?),
            ColumnType::Uuid => Value::Uuid(Uuid::from_value(self)?),
        };
        Ok(coerced)
    }

    /// Key used to compare values loosely (`1` and `"1"` are the same key).
    pub(crate) fn key_string(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::Uuid(u) => write!(f, "{}", u.hyphenated()),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::Time(t) => write!(f, "{}", t.format(TIME_FORMAT)),
            Value::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

// ============================================================================
// Column Types
// ============================================================================

/// Storage type declared for a mapped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
    Timestamp,
    Date,
    Time,
    Uuid,
}

impl ColumnType {
    pub fn is_temporal(self) -> bool {
        matches!(self, ColumnType::DateTime | ColumnType::Timestamp | ColumnType::Date | ColumnType::Time)
    }

    /// Types the `Any` driver cannot decode natively and must be read as text.
    pub fn reads_as_text(self) -> bool {
        self.is_temporal() || self == ColumnType::Uuid
    }
}

// ============================================================================
// Rust -> Value
// ============================================================================

macro_rules! impl_from_for_value {
    ($($t:ty => $variant:ident as $cast:ty),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v as $cast)
                }
            }
        )*
    };
}

impl_from_for_value!(
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u8 => Int as i64,
    u16 => Int as i64,
    u32 => Int as i64,
    f32 => Float as f64,
    f64 => Float as f64,
);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// ============================================================================
// Value -> Rust
// ============================================================================

/// Conversion from a stored [`Value`] into a Rust field type.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, Error>;
}

fn mismatch(expected: &str, value: &Value) -> Error {
    Error::Conversion(format!("cannot convert `{}` into {}", value, expected))
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, Error> {
        Ok(value)
    }
}

/// Whole, finite floats inside the `i64` range; `as` would saturate anything else.
fn whole_float(f: f64) -> Option<i64> {
    const BOUND: f64 = 9_223_372_036_854_775_808.0; // 2^63
    (f.is_finite() && f.fract() == 0.0 && (-BOUND..BOUND).contains(&f)).then_some(f as i64)
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Int(i) => Ok(i),
            Value::Bool(b) => Ok(b as i64),
            Value::Float(f) => whole_float(f).ok_or_else(|| mismatch("an integer", &value)),
            Value::Text(ref s) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    return Ok(i);
                }
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(whole_float)
                    .ok_or_else(|| mismatch("an integer", &value))
            }
            other => Err(mismatch("an integer", &other)),
        }
    }
}

macro_rules! impl_from_value_int {
    ($($t:ty),*) => {
        $(
            impl FromValue for $t {
                fn from_value(value: Value) -> Result<Self, Error> {
                    let wide = i64::from_value(value)?;
                    <$t>::try_from(wide).map_err(|_| {
                        Error::Conversion(format!("{} is out of range for {}", wide, stringify!($t)))
                    })
                }
            }
        )*
    };
}

impl_from_value_int!(i8, i16, i32, u8, u16, u32, u64);

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            Value::Text(ref s) => s.trim().parse::<f64>().map_err(|_| mismatch("a float", &value)),
            other => Err(mismatch("a float", &other)),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, Error> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Int(i) => Ok(i != 0),
            Value::Float(f) => Ok(f != 0.0),
            Value::Text(ref s) => match s.trim().to_lowercase().as_str() {
                "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
                "" | "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
                _ => Err(mismatch("a boolean", &value)),
            },
            other => Err(mismatch("a boolean", &other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Null => Err(mismatch("a string", &Value::Null)),
            Value::Text(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Uuid(u) => Ok(u),
            Value::Text(ref s) => Uuid::parse_str(s.trim()).map_err(|_| mismatch("a uuid", &value)),
            other => Err(mismatch("a uuid", &other)),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::DateTime(dt) => Ok(dt),
            Value::Timestamp(ts) => Ok(ts.naive_utc()),
            Value::Date(d) => Ok(d.and_time(NaiveTime::MIN)),
            Value::Text(ref s) => parse_datetime(s).ok_or_else(|| mismatch("a datetime", &value)),
            other => Err(mismatch("a datetime", &other)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Timestamp(ts) => Ok(ts),
            Value::Text(ref s) => match DateTime::parse_from_rfc3339(s.trim()) {
                Ok(ts) => Ok(ts.with_timezone(&Utc)),
                Err(_) => DateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S%.f%#z")
                    .map(|ts| ts.with_timezone(&Utc))
                    .or_else(|_| parse_datetime(s).map(|dt| dt.and_utc()).ok_or(()))
                    .map_err(|_| mismatch("a timestamp", &value)),
            },
            other => NaiveDateTime::from_value(other).map(|dt| dt.and_utc()),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Date(d) => Ok(d),
            Value::DateTime(dt) => Ok(dt.date()),
            Value::Timestamp(ts) => Ok(ts.date_naive()),
            Value::Text(ref s) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
                .ok()
                .or_else(|| parse_datetime(s).map(|dt| dt.date()))
                .ok_or_else(|| mismatch("a date", &value)),
            other => Err(mismatch("a date", &other)),
        }
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Time(t) => Ok(t),
            Value::DateTime(dt) => Ok(dt.time()),
            Value::Text(ref s) => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f")
                .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M"))
                .map_err(|_| mismatch("a time", &value)),
            other => Err(mismatch("a time", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

// ============================================================================
// Temporal Parsing
// ============================================================================

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const TIME_FORMAT: &str = "%H:%M:%S%.f";
pub(crate) const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Parses the datetime spellings drivers produce when a timestamp is read as text.
pub(crate) fn parse_datetime(input: &str) -> Option<NaiveDateTime> {
    let s = input.trim();
    const FORMATS: [&str; 4] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"];

    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|ts| ts.naive_utc()))
        .or_else(|| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z").ok().map(|ts| ts.naive_utc()))
        .or_else(|| NaiveDate::parse_from_str(s, DATE_FORMAT).ok().map(|d| d.and_time(NaiveTime::MIN)))
}

// ============================================================================
// Row Decoding
// ============================================================================

/// Decodes a driver row into a [`Record`].
pub(crate) fn decode_row(row: &AnyRow) -> Result<Record, Error> {
    let mut record = Record::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_cell(row, idx).map_err(|e| Error::Conversion(format!("column `{}`: {}", column.name(), e)))?;
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

fn decode_cell(row: &AnyRow, idx: usize) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let kind = raw.type_info().name().to_string();

    let value = match kind.as_str() {
        "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(idx)?),
        "SMALLINT" | "INTEGER" | "BIGINT" => Value::Int(
            row.try_get::<i64, _>(idx)
                .or_else(|_| row.try_get::<i32, _>(idx).map(i64::from))
                .or_else(|_| row.try_get::<i16, _>(idx).map(i64::from))?,
        ),
        "REAL" | "DOUBLE" => Value::Float(
            row.try_get::<f64, _>(idx)
                .or_else(|_| row.try_get::<f32, _>(idx).map(f64::from))?,
        ),
        "BLOB" => Value::Text(String::from_utf8_lossy(&row.try_get::<Vec<u8>, _>(idx)?).into_owned()),
        _ => Value::Text(row.try_get::<String, _>(idx)?),
    };
    Ok(value)
}

// ============================================================================
// Fields
// ============================================================================

/// An ordered column -> value map used for inserts, updates and equality filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Vec<(String, Value)>);

impl Fields {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds a column, replacing any previous value for the same column.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.0.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.0.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends every column of `other`, overriding duplicates.
    pub fn extend(&mut self, other: Fields) {
        for (column, value) in other.0 {
            self.insert(column, value);
        }
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Fields {
    fn from(pairs: [(K, V); N]) -> Self {
        let mut fields = Fields::new();
        for (k, v) in pairs {
            fields.insert(k, v);
        }
        fields
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_text_into_declared_types() {
        assert_eq!(Value::from("42").coerce(ColumnType::Integer).unwrap(), Value::Int(42));
        assert_eq!(Value::Int(1).coerce(ColumnType::Boolean).unwrap(), Value::Bool(true));
        assert_eq!(Value::from("2.5").coerce(ColumnType::Float).unwrap(), Value::Float(2.5));
        assert_eq!(Value::Null.coerce(ColumnType::Integer).unwrap(), Value::Null);

        let dt = Value::from("2024-03-01 10:20:30").coerce(ColumnType::DateTime).unwrap();
        assert_eq!(
            dt,
            Value::DateTime(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(10, 20, 30).unwrap())
        );

        assert!(Value::from("abc").coerce(ColumnType::Integer).is_err());
    }

    #[test]
    fn datetime_text_round_trips_with_fraction() {
        let now = Utc::now().naive_utc();
        let text = Value::DateTime(now).to_string();
        assert_eq!(NaiveDateTime::from_value(Value::Text(text)).unwrap(), now);
    }

    #[test]
    fn option_and_range_conversions() {
        assert_eq!(Option::<i32>::from_value(Value::Null).unwrap(), None);
        assert_eq!(Option::<i32>::from_value(Value::Int(7)).unwrap(), Some(7));
        assert!(i8::from_value(Value::Int(300)).is_err());
        assert_eq!(Value::from(None::<String>), Value::Null);
    }

    #[test]
    fn floats_outside_the_integer_range_are_rejected() {
        assert_eq!(i64::from_value(Value::Float(42.0)).unwrap(), 42);
        assert_eq!(i64::from_value(Value::from("-3.0")).unwrap(), -3);

        for f in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1e19, -1e19, 2.5] {
            assert!(matches!(i64::from_value(Value::Float(f)), Err(Error::Conversion(_))), "{f}");
        }
        assert!(i64::from_value(Value::from("1e300")).is_err());
        assert!(i32::from_value(Value::Float(f64::NAN)).is_err());
    }

    #[test]
    fn fields_replace_duplicate_columns() {
        let fields = Fields::from([("name", "Ana"), ("name", "Bia")]).with("age", 30);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.get("name"), Some(&Value::from("Bia")));
    }

    #[test]
    fn unset_keys() {
        assert!(Value::Int(0).is_unset_key());
        assert!(Value::from("").is_unset_key());
        assert!(!Value::Int(3).is_unset_key());
    }
}
