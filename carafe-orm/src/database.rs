//! # Database Module
//!
//! This module provides the connection layer for Carafe ORM.
//! It handles driver detection, connection pooling, the process-wide shared
//! database handle per dialect, and statement execution with optional
//! transaction confinement across PostgreSQL, MySQL, and SQLite.

// ============================================================================
// External Crate Imports
// ============================================================================

use sqlx::{
    Any, AnyPool,
    any::{AnyPoolOptions, AnyQueryResult},
};
use tokio::sync::{Mutex, OnceCell};

// ============================================================================
// Internal Crate Imports
// ============================================================================

use crate::{
    Error,
    config::DatabaseConfig,
    statement::Statement,
    value::{Record, decode_row},
};

// ============================================================================
// Database Driver Enum
// ============================================================================

/// Supported database drivers for Carafe ORM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Drivers {
    /// PostgreSQL driver
    Postgres,
    /// MySQL driver
    MySQL,
    /// SQLite driver
    SQLite,
}

impl Drivers {
    /// Resolves a configured adapter name (`pgsql`, `postgres`, `postgresql`, `mysql`, `sqlite`).
    pub fn from_name(name: &str) -> Result<Self, Error> {
        match name.trim().to_lowercase().as_str() {
            "pgsql" | "postgres" | "postgresql" => Ok(Drivers::Postgres),
            "mysql" => Ok(Drivers::MySQL),
            "sqlite" => Ok(Drivers::SQLite),
            other => Err(Error::Configuration(format!("unsupported database adapter `{}`", other))),
        }
    }

    /// Detects the driver from a connection URL scheme.
    pub fn from_url(url: &str) -> Result<Self, Error> {
        let scheme = url.split(':').next().unwrap_or_default().to_lowercase();
        match scheme.as_str() {
            "postgres" | "postgresql" => Ok(Drivers::Postgres),
            "mysql" | "mariadb" => Ok(Drivers::MySQL),
            "sqlite" => Ok(Drivers::SQLite),
            _ => Err(Error::Configuration(format!("unsupported connection URL scheme `{}`", scheme))),
        }
    }

    /// Quotes an identifier, doubling any embedded quote character.
    ///
    /// Dotted names (`alias.column`) are quoted per segment; `*` stays bare.
    pub fn quote_identifier(self, ident: &str) -> String {
        let q = match self {
            Drivers::MySQL => '`',
            Drivers::Postgres | Drivers::SQLite => '"',
        };
        ident
            .split('.')
            .map(|part| {
                if part == "*" {
                    part.to_string()
                } else {
                    let escaped = part.replace(q, &format!("{}{}", q, q));
                    format!("{}{}{}", q, escaped, q)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Quotes a string literal, doubling single quotes (and backslashes on MySQL).
    pub fn quote_literal(self, text: &str) -> String {
        let mut escaped = text.replace('\'', "''");
        if self == Drivers::MySQL {
            escaped = escaped.replace('\\', "\\\\");
        }
        format!("'{}'", escaped)
    }
}

// ============================================================================
// Shared Handles
// ============================================================================

static POSTGRES: OnceCell<Database> = OnceCell::const_new();
static MYSQL: OnceCell<Database> = OnceCell::const_new();
static SQLITE: OnceCell<Database> = OnceCell::const_new();

// ============================================================================
// Database Struct
// ============================================================================

/// A pooled database handle bound to one driver.
///
/// `Database` is cheap to clone: clones share the same pool.
#[derive(Debug, Clone)]
pub struct Database {
    /// The underlying SQLx connection pool
    pub(crate) pool: AnyPool,
    /// The detected database driver
    pub(crate) driver: Drivers,
}

impl Database {
    /// Creates a new DatabaseBuilder for configuring the connection.
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    /// Connects to a database using the provided connection string.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        DatabaseBuilder::new().connect(url).await
    }

    /// Returns the process-wide handle for the configured dialect, connecting on first use.
    ///
    /// Concurrent first calls race on a single cell; exactly one connection is kept.
    pub async fn shared(config: &DatabaseConfig) -> Result<Database, Error> {
        let driver = config.drivers()?;
        let cell = match driver {
            Drivers::Postgres => &POSTGRES,
            Drivers::MySQL => &MYSQL,
            Drivers::SQLite => &SQLITE,
        };

        cell.get_or_try_init(|| async {
            let url = config.connection_url(driver)?;
            log::info!("opening shared {:?} connection", driver);
            DatabaseBuilder::new().max_connections(config.max_connections).open(&url, config).await
        })
        .await
        .cloned()
    }

    pub fn driver(&self) -> Drivers {
        self.driver
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

// ============================================================================
// DatabaseBuilder Struct
// ============================================================================

/// Connection options for a [`Database`].
#[derive(Debug, Clone)]
pub struct DatabaseBuilder {
    max_connections: u32,
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseBuilder {
    pub fn new() -> Self {
        Self { max_connections: 5 }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Connects to `url`; error detail follows the environment configuration.
    pub async fn connect(self, url: &str) -> Result<Database, Error> {
        self.open(url, DatabaseConfig::from_env()).await
    }

    async fn open(self, url: &str, config: &DatabaseConfig) -> Result<Database, Error> {
        let driver = Drivers::from_url(url)?;
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(url)
            .await
            .map_err(|e| {
                log::error!("database connection failed: {}", e);
                Error::connection(config, &e)
            })?;

        Ok(Database { pool, driver })
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Statement executor with an optional open transaction.
///
/// While a transaction is open every statement runs inside it; otherwise
/// statements go straight to the pool.
#[derive(Debug)]
pub struct Connection {
    database: Database,
    tx: Mutex<Option<sqlx::Transaction<'static, Any>>>,
}

impl Connection {
    pub fn new(database: Database) -> Self {
        Self { database, tx: Mutex::new(None) }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn driver(&self) -> Drivers {
        self.database.driver
    }

    /// Executes a statement that returns no rows.
    pub async fn execute(&self, statement: &Statement) -> Result<AnyQueryResult, Error> {
        let (sql, args) = statement.compile(self.driver())?;
        log::debug!("execute: {}", sql);

        let mut tx = self.tx.lock().await;
        let result = match tx.as_mut() {
            Some(tx) => sqlx::query_with(&sql, args).execute(&mut **tx).await,
            None => sqlx::query_with(&sql, args).execute(&self.database.pool).await,
        };
        result.map_err(|e| failed(&sql, e))
    }

    /// Executes a query and decodes every row.
    pub async fn fetch_all(&self, statement: &Statement) -> Result<Vec<Record>, Error> {
        let (sql, args) = statement.compile(self.driver())?;
        log::debug!("fetch_all: {}", sql);

        let mut tx = self.tx.lock().await;
        let rows = match tx.as_mut() {
            Some(tx) => sqlx::query_with(&sql, args).fetch_all(&mut **tx).await,
            None => sqlx::query_with(&sql, args).fetch_all(&self.database.pool).await,
        }
        .map_err(|e| failed(&sql, e))?;

        rows.iter().map(decode_row).collect()
    }

    /// Executes a query and decodes the first row, if any.
    pub async fn fetch_optional(&self, statement: &Statement) -> Result<Option<Record>, Error> {
        let (sql, args) = statement.compile(self.driver())?;
        log::debug!("fetch_optional: {}", sql);

        let mut tx = self.tx.lock().await;
        let row = match tx.as_mut() {
            Some(tx) => sqlx::query_with(&sql, args).fetch_optional(&mut **tx).await,
            None => sqlx::query_with(&sql, args).fetch_optional(&self.database.pool).await,
        }
        .map_err(|e| failed(&sql, e))?;

        row.as_ref().map(decode_row).transpose()
    }

    /// Opens a transaction; fails when one is already open.
    pub async fn begin(&self) -> Result<(), Error> {
        let mut slot = self.tx.lock().await;
        if slot.is_some() {
            return Err(Error::Transaction("a transaction is already open".to_string()));
        }
        let tx = self.database.pool.begin().await.map_err(|e| failed("BEGIN", e))?;
        log::debug!("transaction opened");
        *slot = Some(tx);
        Ok(())
    }

    pub async fn commit(&self) -> Result<(), Error> {
        let tx = self.tx.lock().await.take();
        match tx {
            Some(tx) => {
                tx.commit().await.map_err(|e| failed("COMMIT", e))?;
                log::debug!("transaction committed");
                Ok(())
            }
            None => Err(Error::Transaction("no open transaction to commit".to_string())),
        }
    }

    pub async fn rollback(&self) -> Result<(), Error> {
        let tx = self.tx.lock().await.take();
        match tx {
            Some(tx) => {
                tx.rollback().await.map_err(|e| failed("ROLLBACK", e))?;
                log::warn!("transaction rolled back");
                Ok(())
            }
            None => Err(Error::Transaction("no open transaction to roll back".to_string())),
        }
    }

    pub async fn in_transaction(&self) -> bool {
        self.tx.lock().await.is_some()
    }
}

fn failed(sql: &str, source: sqlx::Error) -> Error {
    log::error!("statement failed: {} ({})", source, sql);
    Error::query(sql, source)
}
