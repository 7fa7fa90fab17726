//! # Action Module
//!
//! Dialect-specific executors. An [`Action`] turns high-level verbs (fetch,
//! insert, update, delete, count, raw SQL, transaction control) into
//! parameterized statements and runs them on its [`Connection`].
//!
//! The shared SQL shapes live in the trait's default methods; each dialect
//! overrides only what differs (PostgreSQL `RETURNING`, MySQL literal
//! `LIMIT`/`OFFSET`).
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use carafe_orm::{ActionFactory, Fields, Filter, FetchOptions};
//!
//! let action = ActionFactory::from_env().await?;
//! let rows = action
//!     .fetch_all("users", Filter::Fields(Fields::from([("name", "Ana")])), FetchOptions::new().order("id"))
//!     .await?;
//! ```

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MySqlAction;
pub use postgres::PostgresAction;
pub use sqlite::SqliteAction;

// ============================================================================
// External Crate Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;

// ============================================================================
// Internal Crate Imports
// ============================================================================

use crate::{
    Error, FromValue, Value,
    config::DatabaseConfig,
    database::{Connection, Database, Drivers},
    query_builder::QueryBuilder,
    statement::{Params, Statement},
    value::{Fields, Record},
};

// ============================================================================
// Fetch Arguments
// ============================================================================

/// Row filter accepted by the fetch verbs.
#[derive(Debug, Clone, Default)]
pub enum Filter {
    /// No `WHERE` clause.
    #[default]
    All,
    /// `column = value` pairs joined with `AND`.
    Fields(Fields),
    /// A pre-rendered select; table and options are ignored.
    Select(Statement),
}

impl From<Fields> for Filter {
    fn from(fields: Fields) -> Self {
        if fields.is_empty() { Filter::All } else { Filter::Fields(fields) }
    }
}

impl From<Statement> for Filter {
    fn from(statement: Statement) -> Self {
        Filter::Select(statement)
    }
}

/// Projection, grouping, ordering and pagination for the fetch verbs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    /// Projected expressions; empty selects `*`.
    pub columns: Vec<String>,
    pub group: Vec<String>,
    pub order: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn group(mut self, expr: impl Into<String>) -> Self {
        self.group.push(expr.into());
        self
    }

    pub fn order(mut self, expr: impl Into<String>) -> Self {
        self.order.push(expr.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

// ============================================================================
// Action Trait
// ============================================================================

/// A dialect-specific executor over one [`Connection`].
#[async_trait]
pub trait Action: Send + Sync {
    fn connection(&self) -> &Connection;

    fn driver(&self) -> Drivers {
        self.connection().driver()
    }

    /// Quotes an identifier for this dialect.
    fn quote_identifier(&self, ident: &str) -> String {
        self.driver().quote_identifier(ident)
    }

    /// Quotes a string literal for this dialect. The input is trimmed first.
    fn quote(&self, text: &str) -> String {
        self.driver().quote_literal(text.trim())
    }

    /// Renders `LIMIT`/`OFFSET` with integer-typed binds.
    fn limit_clause(&self, limit: Option<u64>, offset: Option<u64>) -> (String, Params) {
        let mut parts = Vec::new();
        let mut params = Params::new();

        match limit {
            Some(limit) => {
                parts.push("LIMIT :__limit".to_string());
                params.insert("__limit".to_string(), Value::Int(clamp(limit)));
            }
            None if offset.is_some() && self.driver() == Drivers::SQLite => parts.push("LIMIT -1".to_string()),
            None => {}
        }
        if let Some(offset) = offset {
            parts.push("OFFSET :__offset".to_string());
            params.insert("__offset".to_string(), Value::Int(clamp(offset)));
        }

        (parts.join(" "), params)
    }

    /// Fetches every row of `table` matching `filter`.
    async fn fetch_all(&self, table: &str, filter: Filter, options: FetchOptions) -> Result<Vec<Record>, Error> {
        let statement = match filter {
            Filter::Select(statement) => statement,
            filter => {
                let (where_sql, mut params) = self.where_clause(&filter);
                let (limit_sql, limit_params) = self.limit_clause(options.limit, options.offset);
                params.extend(limit_params);

                let sql = join_parts(&[
                    format!("SELECT {} FROM {}", projection(&options), self.quote_identifier(table)),
                    where_sql,
                    clause("GROUP BY", &options.group),
                    clause("ORDER BY", &options.order),
                    limit_sql,
                ]);
                Statement::new(sql).with_params(params)
            }
        };

        self.connection().fetch_all(&statement).await
    }

    /// Fetches the first row of `table` matching `filter`.
    async fn fetch_row(&self, table: &str, filter: Filter, options: FetchOptions) -> Result<Option<Record>, Error> {
        let statement = match filter {
            Filter::Select(statement) => statement,
            filter => {
                let (where_sql, params) = self.where_clause(&filter);
                let sql = join_parts(&[
                    format!("SELECT {} FROM {}", projection(&options), self.quote_identifier(table)),
                    where_sql,
                    clause("GROUP BY", &options.group),
                    clause("ORDER BY", &options.order),
                    "LIMIT 1".to_string(),
                ]);
                Statement::new(sql).with_params(params)
            }
        };

        self.connection().fetch_optional(&statement).await
    }

    /// Inserts a row and returns its key.
    ///
    /// When `returning` names a key column that `fields` already carries, that
    /// value is returned; otherwise the storage-generated identity is.
    async fn insert(&self, table: &str, fields: &Fields, returning: Option<&str>) -> Result<Option<Value>, Error> {
        let statement = self.insert_statement(table, fields);
        let result = self.connection().execute(&statement).await?;

        if let Some(given) = returning.and_then(|key| fields.get(key)).filter(|v| !v.is_unset_key()) {
            return Ok(Some(given.clone()));
        }
        Ok(result.last_insert_id().map(Value::Int))
    }

    /// Updates the rows matching `conditions`; `true` once the statement ran.
    async fn update(&self, table: &str, fields: &Fields, conditions: &Fields) -> Result<bool, Error> {
        if fields.is_empty() {
            return Ok(true);
        }

        let mut params = Params::new();
        let assignments: Vec<String> = fields
            .iter()
            .map(|(column, value)| {
                let name = bind_name(&params, "__set_", column);
                params.insert(name.clone(), value.clone());
                format!("{} = :{}", self.quote_identifier(column), name)
            })
            .collect();

        let (where_sql, where_params) = self.where_clause(&Filter::from(conditions.clone()));
        params.extend(where_params);

        let sql = join_parts(&[
            format!("UPDATE {} SET {}", self.quote_identifier(table), assignments.join(", ")),
            where_sql,
        ]);
        self.connection().execute(&Statement::new(sql).with_params(params)).await?;
        Ok(true)
    }

    /// Deletes the rows matching `conditions`; `true` when at least one row went away.
    async fn delete(&self, table: &str, conditions: &Fields) -> Result<bool, Error> {
        Ok(self.delete_rows(table, conditions).await? > 0)
    }

    /// Deletes the rows matching `conditions` and returns how many went away.
    async fn delete_rows(&self, table: &str, conditions: &Fields) -> Result<u64, Error> {
        let (where_sql, params) = self.where_clause(&Filter::from(conditions.clone()));
        let sql = join_parts(&[format!("DELETE FROM {}", self.quote_identifier(table)), where_sql]);
        let result = self.connection().execute(&Statement::new(sql).with_params(params)).await?;
        Ok(result.rows_affected())
    }

    async fn count(&self, table: &str, conditions: &Fields) -> Result<i64, Error> {
        let (where_sql, params) = self.where_clause(&Filter::from(conditions.clone()));
        let sql = join_parts(&[
            format!("SELECT COUNT(*) AS {} FROM {}", self.quote_identifier("total"), self.quote_identifier(table)),
            where_sql,
        ]);

        let row = self.connection().fetch_optional(&Statement::new(sql).with_params(params)).await?;
        match row.and_then(|mut r| r.remove("total")) {
            Some(total) => i64::from_value(total),
            None => Ok(0),
        }
    }

    /// Runs raw SQL. Callers own the injection safety of `sql`.
    async fn query_sql(&self, sql: &str, all: bool) -> Result<Vec<Record>, Error> {
        let statement = Statement::new(sql);
        if all {
            self.connection().fetch_all(&statement).await
        } else {
            Ok(self.connection().fetch_optional(&statement).await?.into_iter().collect())
        }
    }

    /// Executes raw SQL and returns the number of affected rows.
    async fn execute_sql(&self, sql: &str) -> Result<u64, Error> {
        let result = self.connection().execute(&Statement::new(sql)).await?;
        Ok(result.rows_affected())
    }

    async fn begin_transaction(&self) -> Result<(), Error> {
        self.connection().begin().await
    }

    async fn commit(&self) -> Result<(), Error> {
        self.connection().commit().await
    }

    async fn roll_back(&self) -> Result<(), Error> {
        self.connection().rollback().await
    }

    // ------------------------------------------------------------------------
    // Statement shapes
    // ------------------------------------------------------------------------

    /// `INSERT INTO t (..) VALUES (..)` with one bind per column.
    fn insert_statement(&self, table: &str, fields: &Fields) -> Statement {
        if fields.is_empty() {
            let sql = match self.driver() {
                Drivers::MySQL => format!("INSERT INTO {} () VALUES ()", self.quote_identifier(table)),
                _ => format!("INSERT INTO {} DEFAULT VALUES", self.quote_identifier(table)),
            };
            return Statement::new(sql);
        }

        let mut params = Params::new();
        let mut columns = Vec::with_capacity(fields.len());
        let mut placeholders = Vec::with_capacity(fields.len());
        for (column, value) in fields.iter() {
            let name = bind_name(&params, "", column);
            columns.push(self.quote_identifier(column));
            placeholders.push(format!(":{}", name));
            params.insert(name, value.clone());
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_identifier(table),
            columns.join(", "),
            placeholders.join(", ")
        );
        Statement::new(sql).with_params(params)
    }

    /// Renders an equality filter; bind names are prefixed with `__`.
    fn where_clause(&self, filter: &Filter) -> (String, Params) {
        let mut params = Params::new();
        let fields = match filter {
            Filter::Fields(fields) if !fields.is_empty() => fields,
            _ => return (String::new(), params),
        };

        let conditions: Vec<String> = fields
            .iter()
            .map(|(column, value)| {
                if value.is_null() {
                    return format!("{} IS NULL", self.quote_identifier(column));
                }
                let name = bind_name(&params, "__", column);
                params.insert(name.clone(), value.clone());
                format!("{} = :{}", self.quote_identifier(column), name)
            })
            .collect();

        (format!("WHERE {}", conditions.join(" AND ")), params)
    }
}

impl dyn Action + '_ {
    /// Starts a fluent select bound to this action.
    pub fn select(&self) -> QueryBuilder<'_, Record> {
        QueryBuilder::new(self)
    }
}

// ============================================================================
// Action Factory
// ============================================================================

/// Builds the [`Action`] for the configured dialect.
pub struct ActionFactory;

impl ActionFactory {
    /// Creates an action over the shared connection for `config`.
    ///
    /// The driver name is checked before any connection attempt.
    pub async fn create(config: &DatabaseConfig) -> Result<Arc<dyn Action>, Error> {
        let driver = config.drivers()?;
        log::debug!("creating {:?} action", driver);
        let database = Database::shared(config).await?;
        Ok(Self::for_database(database))
    }

    /// Creates an action from the process environment.
    pub async fn from_env() -> Result<Arc<dyn Action>, Error> {
        Self::create(DatabaseConfig::from_env()).await
    }

    /// Creates an action over an existing database handle.
    ///
    /// Every action owns its own transaction slot; the pool is shared.
    pub fn for_database(database: Database) -> Arc<dyn Action> {
        match database.driver() {
            Drivers::Postgres => Arc::new(PostgresAction::new(database)),
            Drivers::MySQL => Arc::new(MySqlAction::new(database)),
            Drivers::SQLite => Arc::new(SqliteAction::new(database)),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn clamp(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Joins the non-empty parts of a statement with single spaces.
pub(crate) fn join_parts(parts: &[String]) -> String {
    parts.iter().filter(|p| !p.is_empty()).map(String::as_str).collect::<Vec<_>>().join(" ")
}

fn clause(keyword: &str, items: &[String]) -> String {
    if items.is_empty() { String::new() } else { format!("{} {}", keyword, items.join(", ")) }
}

fn projection(options: &FetchOptions) -> String {
    if options.columns.is_empty() { "*".to_string() } else { options.columns.join(", ") }
}

/// Builds a bind name from a column: non-word runs become `_`, collisions get a suffix.
pub(crate) fn bind_name(taken: &Params, prefix: &str, column: &str) -> String {
    let mut base = String::with_capacity(prefix.len() + column.len());
    base.push_str(prefix);
    let mut last_was_sep = false;
    for c in column.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            base.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            base.push('_');
            last_was_sep = true;
        }
    }
    if base.is_empty() || base.starts_with(|c: char| c.is_ascii_digit()) {
        base.insert(0, 'c');
    }

    let mut name = base.clone();
    let mut n = 1;
    while taken.contains_key(&name) {
        name = format!("{}_{}", base, n);
        n += 1;
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_names_are_sanitized_and_unique() {
        let mut taken = Params::new();
        let first = bind_name(&taken, "__set_", "first-name");
        assert_eq!(first, "__set_first_name");
        taken.insert(first, Value::Null);
        assert_eq!(bind_name(&taken, "__set_", "first name"), "__set_first_name_1");
        assert_eq!(bind_name(&Params::new(), "", "1st"), "c1st");
    }

    #[test]
    fn joins_only_non_empty_parts() {
        let sql = join_parts(&["SELECT *".into(), String::new(), "LIMIT 1".into()]);
        assert_eq!(sql, "SELECT * LIMIT 1");
    }
}
