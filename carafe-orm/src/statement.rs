//! # Statement Module
//!
//! SQL text with named parameters (`:name`) and the values bound to them.
//!
//! Every layer above the connection speaks in named parameters. Right before
//! execution the statement is compiled for the target dialect: each `:name`
//! token becomes a positional placeholder (`$n` for PostgreSQL, `?` for MySQL
//! and SQLite) and its value is pushed into the driver arguments, once per
//! occurrence.

use std::collections::BTreeMap;

use sqlx::{Arguments, any::AnyArguments};

use crate::{Error, Value, database::Drivers};

/// Named parameters of a statement, keyed without the leading `:`.
pub type Params = BTreeMap<String, Value>;

/// A SQL string plus its named parameter set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Params,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), params: Params::new() }
    }

    /// Binds `value` to the `:name` parameter.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params.extend(params);
        self
    }

    /// Rewrites the named parameters into positional placeholders for `driver`.
    ///
    /// Quoted strings, quoted identifiers and PostgreSQL `::` casts are left
    /// untouched. A `:name` token without a bound value is an
    /// [`Error::InvalidArgument`].
    pub fn compile<'q>(&self, driver: Drivers) -> Result<(String, AnyArguments<'q>), Error> {
        let mut args = AnyArguments::default();
        if self.params.is_empty() {
            return Ok((self.sql.clone(), args));
        }

        let chars: Vec<char> = self.sql.chars().collect();
        let mut out = String::with_capacity(self.sql.len());
        let mut position = 0usize;
        let mut i = 0usize;

        while i < chars.len() {
            let c = chars[i];
            match c {
                '\'' | '"' | '`' => {
                    out.push(c);
                    i += 1;
                    while i < chars.len() {
                        let d = chars[i];
                        out.push(d);
                        i += 1;
                        if d == c {
                            // doubled quote is an escaped quote
                            if i < chars.len() && chars[i] == c {
                                out.push(c);
                                i += 1;
                                continue;
                            }
                            break;
                        }
                    }
                }
                ':' if chars.get(i + 1) == Some(&':') => {
                    out.push_str("::");
                    i += 2;
                }
                ':' if chars.get(i + 1).is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') => {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                        end += 1;
                    }
                    let name: String = chars[start..end].iter().collect();
                    let value = self
                        .params
                        .get(&name)
                        .ok_or_else(|| Error::InvalidArgument(format!("no value bound for parameter `:{}`", name)))?;

                    position += 1;
                    out.push_str(&placeholder(driver, position, value));
                    bind_value(&mut args, value)?;
                    i = end;
                }
                _ => {
                    out.push(c);
                    i += 1;
                }
            }
        }

        Ok((out, args))
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement::new(sql)
    }
}

fn placeholder(driver: Drivers, position: usize, value: &Value) -> String {
    match driver {
        Drivers::Postgres => {
            let cast = match value {
                Value::Date(_) => "::DATE",
                Value::DateTime(_) => "::TIMESTAMP",
                Value::Time(_) => "::TIME",
                Value::Timestamp(_) => "::TIMESTAMPTZ",
                Value::Uuid(_) => "::UUID",
                _ => "",
            };
            format!("${}{}", position, cast)
        }
        Drivers::MySQL | Drivers::SQLite => "?".to_string(),
    }
}

/// Pushes a value into the driver arguments using the wire types `Any` supports.
fn bind_value<'q>(args: &mut AnyArguments<'q>, value: &Value) -> Result<(), Error> {
    let pushed = match value {
        Value::Null => args.add(Option::<String>::None),
        Value::Bool(b) => args.add(*b),
        Value::Int(i) => args.add(*i),
        Value::Float(f) => args.add(*f),
        Value::Text(s) => args.add(s.clone()),
        Value::Timestamp(ts) => args.add(ts.format("%Y-%m-%d %H:%M:%S%.f+00:00").to_string()),
        other => args.add(other.to_string()),
    };
    pushed.map_err(|e| Error::Conversion(format!("cannot bind `{}`: {}", value, e)))
}
