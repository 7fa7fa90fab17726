//! # Query Builder Module
//!
//! This module provides a fluent interface for constructing and executing SELECT queries.
//! It handles projection, joins, filtering (WHERE / OR WHERE), grouping, ordering and
//! pagination (LIMIT/OFFSET) with named parameter binding across different database drivers.
//!
//! ## Features
//!
//! - **Fluent API**: Chainable methods that consume and return the builder
//! - **Named Binding**: Every `?` in a condition becomes a generated `:pN` parameter
//! - **Multi-Driver Support**: Identifiers are quoted per dialect
//! - **Typed Results**: Builders created by `Model::select` map rows to entities
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use carafe_orm::{ActionFactory, Model};
//!
//! let action = ActionFactory::from_env().await?;
//!
//! // Untyped records
//! let rows = action
//!     .select()
//!     .from(("u", "users"), ["id", "name", "COUNT(p.id) AS posts"])
//!     .join_left(("p", "posts"), "p.user_id = u.id", ["title"])
//!     .where_raw("u.age >= ?", 18)
//!     .or_where_raw("u.name = ?", "root")
//!     .group("u.id")
//!     .order("u.name ASC")
//!     .limit(10)
//!     .fetch_all()
//!     .await?;
//!
//! // Mapped entities
//! let adults: Vec<User> = User::select(action.as_ref()).where_raw("age >= ?", 18).fetch_all().await?;
//! ```

// ============================================================================
// External Crate Imports
// ============================================================================

use std::fmt;

// ============================================================================
// Internal Crate Imports
// ============================================================================

use crate::{
    Error, Value,
    action::{Action, join_parts},
    database::Drivers,
    statement::{Params, Statement},
    value::Record,
};

// ============================================================================
// Type Aliases
// ============================================================================

/// Converts a fetched record into the builder's result type.
pub type Mapper<T> = fn(Record) -> Result<T, Error>;

// ============================================================================
// Table References
// ============================================================================

/// A table in a `FROM` or `JOIN` clause, optionally aliased.
///
/// `"users"` names the table directly; `("u", "users")` renders `"users" AS "u"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableRef {
    Plain(String),
    Aliased { alias: String, table: String },
}

impl TableRef {
    /// The name columns are qualified with.
    pub fn qualifier(&self) -> &str {
        match self {
            TableRef::Plain(table) => table,
            TableRef::Aliased { alias, .. } => alias,
        }
    }

    fn render(&self, driver: Drivers) -> String {
        match self {
            TableRef::Plain(table) => driver.quote_identifier(table),
            TableRef::Aliased { alias, table } => {
                format!("{} AS {}", driver.quote_identifier(table), driver.quote_identifier(alias))
            }
        }
    }
}

impl From<&str> for TableRef {
    fn from(table: &str) -> Self {
        TableRef::Plain(table.to_string())
    }
}

impl From<String> for TableRef {
    fn from(table: String) -> Self {
        TableRef::Plain(table)
    }
}

impl<A: Into<String>, T: Into<String>> From<(A, T)> for TableRef {
    fn from((alias, table): (A, T)) -> Self {
        TableRef::Aliased { alias: alias.into(), table: table.into() }
    }
}

// ============================================================================
// Clause Lists
// ============================================================================

/// A literal clause expression or a list of them.
pub trait IntoClause {
    fn into_clause(self) -> Vec<String>;
}

impl IntoClause for &str {
    fn into_clause(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoClause for String {
    fn into_clause(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoClause for Vec<String> {
    fn into_clause(self) -> Vec<String> {
        self
    }
}

impl IntoClause for Vec<&str> {
    fn into_clause(self) -> Vec<String> {
        self.into_iter().map(str::to_string).collect()
    }
}

impl IntoClause for &[&str] {
    fn into_clause(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl<const N: usize> IntoClause for [&str; N] {
    fn into_clause(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl IntoClause for () {
    fn into_clause(self) -> Vec<String> {
        Vec::new()
    }
}

// ============================================================================
// QueryBuilder Struct
// ============================================================================

/// A fluent SELECT builder bound to one [`Action`].
///
/// Clause methods take `self` by value and return it. [`get_query`](Self::get_query)
/// renders without executing and may be called any number of times;
/// [`fetch`](Self::fetch) and [`fetch_all`](Self::fetch_all) consume the builder.
pub struct QueryBuilder<'a, T = Record> {
    /// Executor the query runs on
    action: &'a dyn Action,

    /// Rendered `FROM` sources
    tables: Vec<String>,

    /// Rendered projection (empty means `*`)
    columns: Vec<String>,

    /// Rendered `JOIN` clauses
    joins: Vec<String>,

    /// Conditions joined with `AND`
    and_clauses: Vec<String>,

    /// Conditions joined with `OR`
    or_clauses: Vec<String>,

    groups: Vec<String>,
    orders: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,

    /// Values for the generated `:pN` parameters
    params: Params,

    /// Next generated parameter index
    counter: usize,

    mapper: Mapper<T>,
}

impl<'a> QueryBuilder<'a, Record> {
    /// Creates an empty builder returning raw records.
    pub fn new(action: &'a dyn Action) -> Self {
        Self::with_mapper(action, Ok)
    }
}

impl<'a, T> QueryBuilder<'a, T> {
    /// Creates an empty builder whose rows are converted by `mapper`.
    pub fn with_mapper(action: &'a dyn Action, mapper: Mapper<T>) -> Self {
        Self {
            action,
            tables: Vec::new(),
            columns: Vec::new(),
            joins: Vec::new(),
            and_clauses: Vec::new(),
            or_clauses: Vec::new(),
            groups: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            params: Params::new(),
            counter: 0,
            mapper,
        }
    }

    fn driver(&self) -> Drivers {
        self.action.driver()
    }

    // ========================================================================
    // Sources
    // ========================================================================

    /// Adds a `FROM` source and its projected columns.
    ///
    /// Columns are qualified with the table alias (or name) unless they are
    /// function calls such as `COUNT(*)`.
    pub fn from(mut self, table: impl Into<TableRef>, columns: impl IntoClause) -> Self {
        let table = table.into();
        self.push_columns(&table, columns.into_clause());
        self.tables.push(table.render(self.driver()));
        self
    }

    /// Adds an `INNER JOIN`.
    pub fn join(self, table: impl Into<TableRef>, on: &str, columns: impl IntoClause) -> Self {
        self.add_join("INNER", table.into(), on, columns.into_clause())
    }

    /// Adds a `LEFT JOIN`.
    pub fn join_left(self, table: impl Into<TableRef>, on: &str, columns: impl IntoClause) -> Self {
        self.add_join("LEFT", table.into(), on, columns.into_clause())
    }

    /// Adds a `RIGHT JOIN`.
    pub fn join_right(self, table: impl Into<TableRef>, on: &str, columns: impl IntoClause) -> Self {
        self.add_join("RIGHT", table.into(), on, columns.into_clause())
    }

    fn add_join(mut self, kind: &str, table: TableRef, on: &str, columns: Vec<String>) -> Self {
        self.push_columns(&table, columns);
        self.joins.push(format!("{} JOIN {} ON {}", kind, table.render(self.driver()), on));
        self
    }

    fn push_columns(&mut self, table: &TableRef, columns: Vec<String>) {
        let driver = self.driver();
        for column in columns {
            let rendered = if is_function(&column) {
                column
            } else {
                qualify(driver, table.qualifier(), &column)
            };
            self.columns.push(rendered);
        }
    }

    // ========================================================================
    // Filters
    // ========================================================================

    /// Adds an `AND` condition; each `?` in `condition` binds `value`.
    pub fn where_raw(mut self, condition: &str, value: impl Into<Value>) -> Self {
        let rendered = self.bind(condition, value.into());
        self.and_clauses.push(rendered);
        self
    }

    /// Adds an `OR` condition; each `?` in `condition` binds `value`.
    pub fn or_where_raw(mut self, condition: &str, value: impl Into<Value>) -> Self {
        let rendered = self.bind(condition, value.into());
        self.or_clauses.push(rendered);
        self
    }

    /// Adds an `AND` condition with no bound value.
    pub fn where_expr(mut self, condition: &str) -> Self {
        self.and_clauses.push(condition.to_string());
        self
    }

    /// Adds an `OR` condition with no bound value.
    pub fn or_where_expr(mut self, condition: &str) -> Self {
        self.or_clauses.push(condition.to_string());
        self
    }

    fn bind(&mut self, condition: &str, value: Value) -> String {
        let name = format!("p{}", self.counter);
        self.counter += 1;
        let rendered = condition.replace('?', &format!(":{}", name));
        self.params.insert(name, value);
        rendered
    }

    // ========================================================================
    // Grouping, Ordering, Pagination
    // ========================================================================

    /// Appends `GROUP BY` expressions.
    pub fn group(mut self, spec: impl IntoClause) -> Self {
        let items = spec.into_clause();
        if !items.is_empty() {
            self.groups.push(items.join(", "));
        }
        self
    }

    /// Appends `ORDER BY` expressions.
    pub fn order(mut self, spec: impl IntoClause) -> Self {
        let items = spec.into_clause();
        if !items.is_empty() {
            self.orders.push(items.join(", "));
        }
        self
    }

    /// Sets the row limit and resets the offset to zero.
    pub fn limit(self, limit: u64) -> Self {
        self.limit_offset(limit, 0)
    }

    pub fn limit_offset(mut self, limit: u64, offset: u64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Renders the SQL without executing it.
    pub fn get_query(&self) -> String {
        self.render().0
    }

    /// Renders the SQL together with every bound parameter.
    pub fn to_statement(&self) -> Statement {
        let (sql, limit_params) = self.render();
        let mut params = self.params.clone();
        params.extend(limit_params);
        Statement { sql, params }
    }

    /// Bound parameters of the filters, without pagination binds.
    pub fn bindings(&self) -> &Params {
        &self.params
    }

    fn render(&self) -> (String, Params) {
        let columns = if self.columns.is_empty() { "*".to_string() } else { self.columns.join(", ") };
        let groups = if self.groups.is_empty() { String::new() } else { format!("GROUP BY {}", self.groups.join(", ")) };
        let orders = if self.orders.is_empty() { String::new() } else { format!("ORDER BY {}", self.orders.join(", ")) };
        let (limit, limit_params) = self.action.limit_clause(self.limit, self.offset);

        let sql = join_parts(&[
            format!("SELECT {} FROM {}", columns, self.tables.join(", ")),
            self.joins.join(" "),
            self.where_block(),
            groups,
            orders,
            limit,
        ]);
        (sql, limit_params)
    }

    fn where_block(&self) -> String {
        let mut groups = Vec::with_capacity(2);
        if !self.and_clauses.is_empty() {
            groups.push(format!("({})", self.and_clauses.join(" AND ")));
        }
        if !self.or_clauses.is_empty() {
            groups.push(format!("({})", self.or_clauses.join(" OR ")));
        }

        if groups.is_empty() { String::new() } else { format!("WHERE {}", groups.join(" OR ")) }
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Executes the query and returns the first row.
    pub async fn fetch(self) -> Result<Option<T>, Error> {
        let statement = self.to_statement();
        let row = self.action.connection().fetch_optional(&statement).await?;
        row.map(self.mapper).transpose()
    }

    /// Executes the query and returns every row.
    pub async fn fetch_all(self) -> Result<Vec<T>, Error> {
        let statement = self.to_statement();
        let rows = self.action.connection().fetch_all(&statement).await?;
        rows.into_iter().map(self.mapper).collect()
    }
}

impl<T> fmt::Display for QueryBuilder<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.get_query())
    }
}

impl<T> fmt::Debug for QueryBuilder<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder").field("sql", &self.get_query()).field("params", &self.params).finish()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// `true` for expressions shaped like `NAME(...)`, which are never qualified.
fn is_function(expr: &str) -> bool {
    let expr = expr.trim();
    let name_len = expr.chars().take_while(|c| c.is_ascii_alphabetic() || *c == '_').count();
    name_len > 0 && expr[name_len..].trim_start().starts_with('(')
}

/// Qualifies a column with `qualifier`, keeping an optional `AS alias`.
///
/// Names that are already quoted are kept verbatim.
fn qualify(driver: Drivers, qualifier: &str, column: &str) -> String {
    let column = column.trim();
    let (name, alias) = split_alias(column);

    let qualified = if name.starts_with(['"', '`']) {
        name.to_string()
    } else if name == "*" {
        format!("{}.*", driver.quote_identifier(qualifier))
    } else if name.contains('.') {
        driver.quote_identifier(name)
    } else {
        format!("{}.{}", driver.quote_identifier(qualifier), driver.quote_identifier(name))
    };

    match alias {
        Some(alias) => format!("{} AS {}", qualified, driver.quote_identifier(alias)),
        None => qualified,
    }
}

fn split_alias(column: &str) -> (&str, Option<&str>) {
    let lower = column.to_ascii_lowercase();
    match lower.find(" as ") {
        Some(pos) => (column[..pos].trim(), Some(column[pos + 4..].trim())),
        None => (column, None),
    }
}
