//! # Error Module
//!
//! A single error type is shared by every layer of Carafe ORM. Storage errors
//! are wrapped with the SQL that produced them and bubble up unmodified; the
//! mapper never retries.

use thiserror::Error;

use crate::config::DatabaseConfig;

/// Errors produced by Carafe ORM.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration names an unsupported driver or is otherwise unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A connection to the database could not be established.
    ///
    /// The message is gated by the application environment, see [`Error::connection`].
    #[error("{0}")]
    Connection(String),

    /// A prepared statement failed to execute.
    #[error("query execution failed: {source} (sql: {sql})")]
    QueryExecution {
        /// The SQL text sent to the driver.
        sql: String,
        /// The native driver error.
        #[source]
        source: sqlx::Error,
    },

    /// The requested relationship is not declared on the entity.
    #[error("relationship configuration error: {0}")]
    Relationship(String),

    /// The entity schema could not be resolved into metadata.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// A stored value could not be converted into the requested type.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// The entity has no mapped field with the given name.
    #[error("unknown field `{field}` on `{entity}`")]
    UnknownField {
        entity: &'static str,
        field: String,
    },

    /// A caller supplied an argument that cannot be used.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Transaction control was used out of order.
    #[error("transaction error: {0}")]
    Transaction(String),
}

impl Error {
    /// Wraps a driver error raised while executing `sql`.
    pub fn query(sql: impl Into<String>, source: sqlx::Error) -> Self {
        Error::QueryExecution { sql: sql.into(), source }
    }

    /// Builds a connection error whose detail depends on the environment.
    ///
    /// Only development environments get the driver message; everything else
    /// receives a generic text so credentials and hosts do not leak.
    pub fn connection(config: &DatabaseConfig, source: &sqlx::Error) -> Self {
        if config.is_development() {
            Error::Connection(format!("failed to connect to the database: {}", source))
        } else {
            Error::Connection("failed to connect to the database".to_string())
        }
    }

    /// Attaches a field name to a conversion error. Used by derived `set_field`.
    #[doc(hidden)]
    pub fn in_field(self, field: &str) -> Self {
        match self {
            Error::Conversion(msg) => Error::Conversion(format!("field `{}`: {}", field, msg)),
            other => other,
        }
    }
}
