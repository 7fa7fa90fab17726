//! # Carafe ORM
//!
//! An attribute-driven ORM for PostgreSQL, MySQL and SQLite built on top of
//! sqlx's `Any` driver.
//!
//! Structs opt in with `#[derive(Entity)]` and `#[orm(...)]` attributes; the
//! blanket [`Model`] implementation then provides CRUD, finders, relationship
//! traversal, many-to-many pivot management and declarative validation.
//! Ad-hoc reads go through the fluent [`QueryBuilder`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use carafe_orm::{ActionFactory, Entity, Fields, Model};
//!
//! #[derive(Debug, Default, Entity)]
//! #[orm(table = "users")]
//! struct User {
//!     id: Option<i64>,
//!     #[orm(column, validate(required, max_length = 80))]
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), carafe_orm::Error> {
//!     let action = ActionFactory::from_env().await?;
//!
//!     let mut user = User { name: "Ana".into(), ..Default::default() };
//!     if user.is_valid(action.as_ref()).await? {
//!         user.save(action.as_ref()).await?;
//!     }
//!
//!     let found = User::find_by(action.as_ref(), Fields::from([("name", "Ana")])).await?;
//!     println!("{:?}", found);
//!     Ok(())
//! }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod action;
pub mod config;
pub mod database;
pub mod error;
pub mod metadata;
pub mod model;
pub mod naming;
pub mod query_builder;
pub mod statement;
pub mod validation;
pub mod value;

mod relation;

// ============================================================================
// Re-exports
// ============================================================================

/// Derives [`Entity`](trait@model::Entity) from `#[orm(...)]` attributes.
pub use carafe_orm_macro::Entity;

/// Derives string conversions and [`Value`] mapping for unit-variant enums.
pub use carafe_orm_macro::EntityEnum;

pub use action::{
    Action, ActionFactory, FetchOptions, Filter, MySqlAction, PostgresAction, SqliteAction,
};
pub use config::DatabaseConfig;
pub use database::{Connection, Database, DatabaseBuilder, Drivers};
pub use error::Error;
pub use metadata::{
    ColumnAttr, ColumnDefault, ColumnMeta, EntitySchema, FieldSchema, Metadata, RelationDef,
    RelationKind,
};
pub use model::{Entity, Model, map_record};
pub use query_builder::{IntoClause, QueryBuilder, TableRef};
pub use statement::{Params, Statement};
pub use validation::{ValidationContext, ValidationErrors, Validator};
pub use value::{ColumnType, Fields, FromValue, Record, Value};
