//! # Validation Module
//!
//! Field validators and the error map produced by a validation pass.
//!
//! Validators are declared with `#[orm(validate(...))]` and run by
//! `Model::is_valid` / `Model::errors`. Every validator of every field runs;
//! failures are accumulated per field instead of stopping at the first one.
//!
//! ```rust,ignore
//! #[derive(Debug, Default, Entity)]
//! struct User {
//!     id: Option<i64>,
//!     #[orm(column, validate(required, min_length = 3, unique))]
//!     name: String,
//!     #[orm(column, validate(number_range(min = 1, max = 120, message = "invalid age")))]
//!     age: i32,
//! }
//! ```

use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex as CompiledRegex;
use serde::Serialize;

use crate::{Error, FromValue, Value, action::Action, metadata::Metadata};

// ============================================================================
// Core Types
// ============================================================================

/// What a validator may inspect besides the value itself.
pub struct ValidationContext<'a> {
    pub action: &'a dyn Action,
    pub metadata: &'a Metadata,
    /// Primary-key value of the entity under validation (`Null` when unsaved).
    pub primary_key: Value,
}

/// A rule applied to one field value.
#[async_trait]
pub trait Validator: Send + Sync + fmt::Debug {
    /// Returns the failure message, or `None` when the value passes.
    async fn validate(&self, field: &str, value: &Value, ctx: &ValidationContext<'_>) -> Result<Option<String>, Error>;
}

/// Failure messages keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<String>> {
        self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{}: {}", field, message)?;
                first = false;
            }
        }
        Ok(())
    }
}

macro_rules! with_message {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $ty {
                /// Replaces the default failure message.
                pub fn with_message(mut self, message: impl Into<String>) -> Self {
                    self.message = Some(message.into());
                    self
                }

                fn fail(&self, default: String) -> Option<String> {
                    Some(self.message.clone().unwrap_or(default))
                }
            }
        )*
    };
}

// ============================================================================
// Presence
// ============================================================================

/// Rejects `NULL` and whitespace-only strings.
#[derive(Debug, Clone, Default)]
pub struct Required {
    message: Option<String>,
}

impl Required {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Validator for Required {
    async fn validate(&self, field: &str, value: &Value, _: &ValidationContext<'_>) -> Result<Option<String>, Error> {
        let missing = match value {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        };
        Ok(if missing { self.fail(format!("the field '{}' is required", field)) } else { None })
    }
}

/// Rejects `NULL`, empty strings, `0`, `0.0` and `false`.
#[derive(Debug, Clone, Default)]
pub struct NotEmpty {
    message: Option<String>,
}

impl NotEmpty {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Validator for NotEmpty {
    async fn validate(&self, field: &str, value: &Value, _: &ValidationContext<'_>) -> Result<Option<String>, Error> {
        let empty = match value {
            Value::Int(0) | Value::Bool(false) => true,
            Value::Float(f) => *f == 0.0,
            other => other.is_blank(),
        };
        Ok(if empty { self.fail(format!("the field '{}' must not be empty", field)) } else { None })
    }
}

// ============================================================================
// Length and Pattern
// ============================================================================

/// Text shape of scalar values; `None` for `NULL`.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Text(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Minimum length in characters. `NULL` passes.
#[derive(Debug, Clone)]
pub struct MinLength {
    min: usize,
    message: Option<String>,
}

impl MinLength {
    pub fn new(min: usize) -> Self {
        Self { min, message: None }
    }
}

#[async_trait]
impl Validator for MinLength {
    async fn validate(&self, field: &str, value: &Value, _: &ValidationContext<'_>) -> Result<Option<String>, Error> {
        Ok(match scalar_text(value) {
            Some(text) if text.chars().count() < self.min => {
                self.fail(format!("the field '{}' must have at least {} characters", field, self.min))
            }
            _ => None,
        })
    }
}

/// Maximum length in characters. `NULL` passes.
#[derive(Debug, Clone)]
pub struct MaxLength {
    max: usize,
    message: Option<String>,
}

impl MaxLength {
    pub fn new(max: usize) -> Self {
        Self { max, message: None }
    }
}

#[async_trait]
impl Validator for MaxLength {
    async fn validate(&self, field: &str, value: &Value, _: &ValidationContext<'_>) -> Result<Option<String>, Error> {
        Ok(match scalar_text(value) {
            Some(text) if text.chars().count() > self.max => {
                self.fail(format!("the field '{}' must have at most {} characters", field, self.max))
            }
            _ => None,
        })
    }
}

/// Requires the value to match a regular expression. `NULL` passes.
///
/// The pattern is compiled once; an invalid pattern is reported when the
/// validator runs.
#[derive(Debug, Clone)]
pub struct Regex {
    pattern: Result<CompiledRegex, String>,
    message: Option<String>,
}

impl Regex {
    pub fn new(pattern: &str) -> Self {
        Self { pattern: CompiledRegex::new(pattern).map_err(|e| e.to_string()), message: None }
    }
}

#[async_trait]
impl Validator for Regex {
    async fn validate(&self, field: &str, value: &Value, _: &ValidationContext<'_>) -> Result<Option<String>, Error> {
        let pattern = self
            .pattern
            .as_ref()
            .map_err(|e| Error::InvalidArgument(format!("invalid pattern for '{}': {}", field, e)))?;

        Ok(match scalar_text(value) {
            Some(text) if !pattern.is_match(&text) => {
                self.fail(format!("the field '{}' does not match the expected format", field))
            }
            _ => None,
        })
    }
}

/// Requires a syntactically valid e-mail address.
#[derive(Debug, Clone, Default)]
pub struct Email {
    message: Option<String>,
}

impl Email {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_email(text: &str) -> bool {
    let Some((local, domain)) = text.split_once('@') else {
        return false;
    };
    if local.is_empty() || local.len() > 64 || domain.contains('@') {
        return false;
    }
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return false;
    }
    let local_ok = local.chars().all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+/=?^_`{|}~.-".contains(c));

    let labels: Vec<&str> = domain.split('.').collect();
    let domain_ok = labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        });

    local_ok && domain_ok
}

#[async_trait]
impl Validator for Email {
    async fn validate(&self, field: &str, value: &Value, _: &ValidationContext<'_>) -> Result<Option<String>, Error> {
        let valid = matches!(value, Value::Text(s) if is_email(s));
        Ok(if valid { None } else { self.fail(format!("the field '{}' must contain a valid e-mail", field)) })
    }
}

// ============================================================================
// Numbers
// ============================================================================

/// Inclusive numeric range. Non-numeric values (including `NULL`) fail.
#[derive(Debug, Clone)]
pub struct NumberRange {
    min: f64,
    max: f64,
    message: Option<String>,
}

impl NumberRange {
    pub fn new(min: impl Into<f64>, max: impl Into<f64>) -> Self {
        Self { min: min.into(), max: max.into(), message: None }
    }
}

#[async_trait]
impl Validator for NumberRange {
    async fn validate(&self, field: &str, value: &Value, _: &ValidationContext<'_>) -> Result<Option<String>, Error> {
        let Some(number) = value.as_f64() else {
            return Ok(Some(format!("the field '{}' must be numeric", field)));
        };
        Ok(if number < self.min || number > self.max {
            self.fail(format!("the field '{}' must be between {} and {}", field, self.min, self.max))
        } else {
            None
        })
    }
}

// ============================================================================
// Dates and Times
// ============================================================================

/// A parsed temporal value with the text it was parsed from.
fn parse_moment(value: &Value, format: &str) -> Option<(NaiveDateTime, String)> {
    match value {
        Value::DateTime(dt) => Some((*dt, dt.format(format).to_string())),
        Value::Timestamp(ts) => Some((ts.naive_utc(), ts.naive_utc().format(format).to_string())),
        Value::Date(d) => Some((d.and_time(NaiveTime::MIN), d.format(format).to_string())),
        Value::Text(s) => {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
                return Some((dt, dt.format(format).to_string()));
            }
            NaiveDate::parse_from_str(s, format)
                .ok()
                .map(|d| (d.and_time(NaiveTime::MIN), d.format(format).to_string()))
        }
        _ => None,
    }
}

/// `true` when `value` parses with `format` and formats back to the same text.
fn round_trips(value: &Value, format: &str) -> Option<NaiveDateTime> {
    let (moment, formatted) = parse_moment(value, format)?;
    match value {
        Value::Text(s) if *s != formatted => None,
        _ => Some(moment),
    }
}

/// Date text in the given format (default `%Y-%m-%d`).
#[derive(Debug, Clone)]
pub struct DateFormat {
    format: String,
    message: Option<String>,
}

impl Default for DateFormat {
    fn default() -> Self {
        Self { format: "%Y-%m-%d".to_string(), message: None }
    }
}

impl DateFormat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }
}

#[async_trait]
impl Validator for DateFormat {
    async fn validate(&self, field: &str, value: &Value, _: &ValidationContext<'_>) -> Result<Option<String>, Error> {
        let valid = matches!(value, Value::Date(_)) || round_trips(value, &self.format).is_some();
        Ok(if valid { None } else { self.fail(format!("the field '{}' must be a date in the format {}", field, self.format)) })
    }
}

/// Date-time text in the given format (default `%Y-%m-%d %H:%M:%S`).
#[derive(Debug, Clone)]
pub struct DateTimeFormat {
    format: String,
    message: Option<String>,
}

impl Default for DateTimeFormat {
    fn default() -> Self {
        Self { format: "%Y-%m-%d %H:%M:%S".to_string(), message: None }
    }
}

impl DateTimeFormat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }
}

#[async_trait]
impl Validator for DateTimeFormat {
    async fn validate(&self, field: &str, value: &Value, _: &ValidationContext<'_>) -> Result<Option<String>, Error> {
        let valid = match value {
            Value::DateTime(_) | Value::Timestamp(_) => true,
            Value::Text(s) => NaiveDateTime::parse_from_str(s, &self.format)
                .map(|dt| dt.format(&self.format).to_string() == *s)
                .unwrap_or(false),
            _ => false,
        };
        Ok(if valid {
            None
        } else {
            self.fail(format!("the field '{}' must be a date and time in the format {}", field, self.format))
        })
    }
}

/// Time text in the given format (default `%H:%M:%S`).
#[derive(Debug, Clone)]
pub struct TimeFormat {
    format: String,
    message: Option<String>,
}

impl Default for TimeFormat {
    fn default() -> Self {
        Self { format: "%H:%M:%S".to_string(), message: None }
    }
}

impl TimeFormat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }
}

#[async_trait]
impl Validator for TimeFormat {
    async fn validate(&self, field: &str, value: &Value, _: &ValidationContext<'_>) -> Result<Option<String>, Error> {
        let valid = match value {
            Value::Time(_) => true,
            Value::Text(s) => NaiveTime::parse_from_str(s, &self.format)
                .map(|t| t.format(&self.format).to_string() == *s)
                .unwrap_or(false),
            _ => false,
        };
        Ok(if valid { None } else { self.fail(format!("the field '{}' must be a time in the format {}", field, self.format)) })
    }
}

/// Inclusive date range; either bound may be omitted.
///
/// Bounds are written in the validator's format (default `%Y-%m-%d %H:%M:%S`).
#[derive(Debug, Clone)]
pub struct DateRange {
    start: Option<String>,
    end: Option<String>,
    format: String,
    message: Option<String>,
}

impl Default for DateRange {
    fn default() -> Self {
        Self { start: None, end: None, format: "%Y-%m-%d %H:%M:%S".to_string(), message: None }
    }
}

impl DateRange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(mut self, start: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self
    }

    pub fn end(mut self, end: impl Into<String>) -> Self {
        self.end = Some(end.into());
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    fn bound(&self, raw: &Option<String>) -> Option<NaiveDateTime> {
        raw.as_ref().and_then(|b| parse_moment(&Value::Text(b.clone()), &self.format)).map(|(m, _)| m)
    }
}

#[async_trait]
impl Validator for DateRange {
    async fn validate(&self, field: &str, value: &Value, _: &ValidationContext<'_>) -> Result<Option<String>, Error> {
        let Some(moment) = round_trips(value, &self.format) else {
            return Ok(self.fail(format!("the field '{}' is not in the expected format ({})", field, self.format)));
        };

        if let (Some(start), Some(raw)) = (self.bound(&self.start), &self.start) {
            if moment < start {
                return Ok(self.fail(format!("the field '{}' must be on or after {}", field, raw)));
            }
        }
        if let (Some(end), Some(raw)) = (self.bound(&self.end), &self.end) {
            if moment > end {
                return Ok(self.fail(format!("the field '{}' must be on or before {}", field, raw)));
            }
        }
        Ok(None)
    }
}

/// Requires a date strictly before today.
#[derive(Debug, Clone)]
pub struct IsPastDate {
    format: String,
    message: Option<String>,
}

impl Default for IsPastDate {
    fn default() -> Self {
        Self { format: "%Y-%m-%d".to_string(), message: None }
    }
}

impl IsPastDate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }
}

#[async_trait]
impl Validator for IsPastDate {
    async fn validate(&self, field: &str, value: &Value, _: &ValidationContext<'_>) -> Result<Option<String>, Error> {
        let date = match value {
            Value::Date(d) => Some(*d),
            other => parse_moment(other, &self.format).map(|(m, _)| m.date()),
        };
        let Some(date) = date else {
            return Ok(self.fail(format!("the field '{}' is not a valid date ({})", field, self.format)));
        };

        Ok(if date >= Local::now().date_naive() {
            self.fail(format!("the field '{}' must be a past date", field))
        } else {
            None
        })
    }
}

/// Requires a date-time strictly before now.
#[derive(Debug, Clone)]
pub struct IsPastDateTime {
    format: String,
    message: Option<String>,
}

impl Default for IsPastDateTime {
    fn default() -> Self {
        Self { format: "%Y-%m-%d %H:%M:%S".to_string(), message: None }
    }
}

impl IsPastDateTime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }
}

#[async_trait]
impl Validator for IsPastDateTime {
    async fn validate(&self, field: &str, value: &Value, _: &ValidationContext<'_>) -> Result<Option<String>, Error> {
        let now = match value {
            Value::Timestamp(_) => chrono::Utc::now().naive_utc(),
            _ => Local::now().naive_local(),
        };
        let Some(moment) = round_trips(value, &self.format) else {
            return Ok(self.fail(format!("the field '{}' is not in the expected format ({})", field, self.format)));
        };

        Ok(if moment >= now { self.fail(format!("the field '{}' must be a past date and time", field)) } else { None })
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Rejects a value already stored in another row.
///
/// The entity's own row is excluded when its primary key is set, so an
/// unchanged value passes on update.
#[derive(Debug, Clone, Default)]
pub struct Unique {
    table: Option<String>,
    column: Option<String>,
    message: Option<String>,
}

impl Unique {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks against another table instead of the entity's own.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Checks against another column instead of the field's own.
    pub fn field(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }
}

#[async_trait]
impl Validator for Unique {
    async fn validate(&self, field: &str, value: &Value, ctx: &ValidationContext<'_>) -> Result<Option<String>, Error> {
        if value.is_null() {
            return Ok(None);
        }

        let meta = ctx.metadata;
        let table = self.table.clone().unwrap_or_else(|| meta.table_name.clone());
        let column = match &self.column {
            Some(column) => column.clone(),
            None => meta.column_for_field(field).map(|c| c.column.clone()).unwrap_or_else(|| field.to_string()),
        };

        let mut query = ctx
            .action
            .select()
            .from(table.as_str(), ["COUNT(*) AS total"])
            .where_raw(&format!("{} = ?", ctx.action.quote_identifier(&column)), value.clone());

        if !ctx.primary_key.is_unset_key() {
            let key = ctx.action.quote_identifier(&meta.primary_key.column);
            query = query.where_raw(&format!("{} <> ?", key), ctx.primary_key.clone());
        }

        let total = match query.fetch().await?.and_then(|mut row| row.remove("total")) {
            Some(total) => i64::from_value(total)?,
            None => 0,
        };

        Ok(if total > 0 { self.fail(format!("the value of '{}' is already in use", field)) } else { None })
    }
}

// ============================================================================
// Custom
// ============================================================================

/// A plain function used as a validator (`validate(with = "path::to::check")`).
#[derive(Debug, Clone)]
pub struct Custom {
    name: &'static str,
    check: fn(&str, &Value) -> Option<String>,
    message: Option<String>,
}

impl Custom {
    pub fn new(name: &'static str, check: fn(&str, &Value) -> Option<String>) -> Self {
        Self { name, check, message: None }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[async_trait]
impl Validator for Custom {
    async fn validate(&self, field: &str, value: &Value, _: &ValidationContext<'_>) -> Result<Option<String>, Error> {
        Ok((self.check)(field, value).and_then(|default| self.fail(default)))
    }
}

with_message!(
    Required,
    NotEmpty,
    MinLength,
    MaxLength,
    Regex,
    Email,
    NumberRange,
    DateFormat,
    DateTimeFormat,
    TimeFormat,
    DateRange,
    IsPastDate,
    IsPastDateTime,
    Unique,
    Custom,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shapes() {
        assert!(is_email("ana@example.com"));
        assert!(is_email("first.last+tag@mail.example.org"));
        assert!(!is_email("ana@localhost"));
        assert!(!is_email("ana.example.com"));
        assert!(!is_email("a@b@c.com"));
        assert!(!is_email("ana@-bad.com"));
    }

    #[test]
    fn format_round_trip() {
        assert!(round_trips(&Value::from("2024-02-29"), "%Y-%m-%d").is_some());
        assert!(round_trips(&Value::from("2024-2-9"), "%Y-%m-%d").is_none());
        assert!(round_trips(&Value::from("2023-02-29"), "%Y-%m-%d").is_none());
        assert!(round_trips(&Value::from("2024-01-01 10:00:00"), "%Y-%m-%d %H:%M:%S").is_some());
    }

    #[test]
    fn errors_accumulate_per_field() {
        let mut errors = ValidationErrors::new();
        errors.add("name", "too short");
        errors.add("name", "required");
        errors.add("age", "out of range");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.get("name").unwrap().len(), 2);
        assert_eq!(errors.to_string(), "age: out of range; name: too short; name: required");
    }
}
