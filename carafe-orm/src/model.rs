//! # Model Module
//!
//! This module defines the [`Entity`] trait implemented by `#[derive(Entity)]`
//! and the [`Model`] trait that gives every entity its persistence API:
//! CRUD, finders, relationship traversal and validation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use carafe_orm::{ActionFactory, Entity, Fields, Model};
//!
//! #[derive(Debug, Default, Entity)]
//! #[orm(table = "users", has_many(Post))]
//! struct User {
//!     id: Option<i64>,
//!     #[orm(column, validate(required))]
//!     name: String,
//!     #[orm(column(type = "datetime", default = "now()"))]
//!     created_at: Option<chrono::NaiveDateTime>,
//! }
//!
//! let action = ActionFactory::from_env().await?;
//! let mut user = User { name: "Ana".into(), ..Default::default() };
//! user.save(action.as_ref()).await?;
//!
//! let found = User::find_by(action.as_ref(), Fields::from([("name", "Ana")])).await?;
//! let posts: Vec<Post> = user.has_many(action.as_ref()).await?;
//! ```

// ============================================================================
// External Crate Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, SubsecRound, Utc};

// ============================================================================
// Internal Crate Imports
// ============================================================================

use crate::{
    Error, Value,
    action::{Action, FetchOptions, Filter},
    database::Drivers,
    metadata::{self, ColumnDefault, ColumnMeta, EntitySchema, Metadata},
    query_builder::QueryBuilder,
    relation,
    validation::{ValidationContext, ValidationErrors},
    value::{ColumnType, Fields, Record},
};

// ============================================================================
// Entity Trait
// ============================================================================

/// Field-level access to a mapped struct. Implemented by `#[derive(Entity)]`.
///
/// `get_field` / `set_field` cover every persisted field (and every field
/// carrying validators); other names yield `None` / [`Error::UnknownField`].
pub trait Entity: Default + Send + Sync + 'static {
    /// Declarative schema read from the struct attributes.
    fn schema() -> EntitySchema;

    fn get_field(&self, field: &str) -> Option<Value>;

    fn set_field(&mut self, field: &str, value: Value) -> Result<(), Error>;

    /// Resolved metadata, computed once per type.
    fn metadata() -> Result<Arc<Metadata>, Error> {
        metadata::resolve::<Self>()
    }
}

// ============================================================================
// Model Trait
// ============================================================================

/// Persistence API available on every [`Entity`].
///
/// Every operation runs on the [`Action`] passed in, so the same entity type
/// can be used inside and outside a transaction.
#[async_trait]
pub trait Model: Entity {
    /// Inserts the entity when its primary key is unset (`None`, `0`, `""`),
    /// otherwise updates its non-null columns.
    async fn save(&mut self, action: &dyn Action) -> Result<bool, Error> {
        let meta = Self::metadata()?;
        if primary_value(self, &meta).is_unset_key() {
            insert_entity(self, action, &meta, false).await
        } else {
            update_entity(self, action, &meta).await
        }
    }

    /// Always takes the insert path, keeping a caller-assigned key.
    async fn insert(&mut self, action: &dyn Action) -> Result<bool, Error> {
        let meta = Self::metadata()?;
        insert_entity(self, action, &meta, true).await
    }

    /// Removes the row with this entity's primary key. The instance is left as is.
    async fn delete(&self, action: &dyn Action) -> Result<bool, Error> {
        let meta = Self::metadata()?;
        let key = primary_value(self, &meta);
        if key.is_unset_key() {
            return Ok(false);
        }
        action.delete(&meta.table_name, &Fields::new().with(meta.primary_key.column.clone(), key)).await
    }

    async fn find<K>(action: &dyn Action, id: K) -> Result<Option<Self>, Error>
    where
        K: Into<Value> + Send,
    {
        let meta = Self::metadata()?;
        let filter = Filter::Fields(Fields::new().with(meta.primary_key.column.clone(), id.into()));
        let row = action.fetch_row(&meta.table_name, filter, read_options(&meta, action.driver())).await?;
        row.map(map_record::<Self>).transpose()
    }

    async fn find_all(action: &dyn Action, conditions: Fields, options: FetchOptions) -> Result<Vec<Self>, Error> {
        let meta = Self::metadata()?;
        let mut options = options;
        if options.columns.is_empty() {
            options.columns = projection(&meta, action.driver(), None);
        }
        let rows = action.fetch_all(&meta.table_name, Filter::from(conditions), options).await?;
        rows.into_iter().map(map_record::<Self>).collect()
    }

    async fn find_by(action: &dyn Action, conditions: Fields) -> Result<Vec<Self>, Error> {
        Self::find_all(action, conditions, FetchOptions::new()).await
    }

    async fn first_by(action: &dyn Action, conditions: Fields) -> Result<Option<Self>, Error> {
        let meta = Self::metadata()?;
        let row = action
            .fetch_row(&meta.table_name, Filter::from(conditions), read_options(&meta, action.driver()))
            .await?;
        row.map(map_record::<Self>).transpose()
    }

    async fn count(action: &dyn Action, conditions: Fields) -> Result<i64, Error> {
        let meta = Self::metadata()?;
        action.count(&meta.table_name, &conditions).await
    }

    async fn exists(action: &dyn Action, conditions: Fields) -> Result<bool, Error> {
        Ok(Self::count(action, conditions).await? > 0)
    }

    /// Updates every row matching `conditions` with `data` (column names).
    async fn update_many(action: &dyn Action, data: Fields, conditions: Fields) -> Result<bool, Error> {
        let meta = Self::metadata()?;
        action.update(&meta.table_name, &data, &conditions).await
    }

    /// A query builder over this entity's table whose rows map to `Self`.
    fn select(action: &dyn Action) -> Result<QueryBuilder<'_, Self>, Error> {
        let meta = Self::metadata()?;
        let columns = projection(&meta, action.driver(), Some(&meta.table_name));
        Ok(QueryBuilder::with_mapper(action, map_record::<Self>).from(meta.table_name.as_str(), columns))
    }

    /// Re-reads the row; `false` when the key is unset or the row is gone.
    async fn reload(&mut self, action: &dyn Action) -> Result<bool, Error> {
        let meta = Self::metadata()?;
        let key = primary_value(self, &meta);
        if key.is_unset_key() {
            return Ok(false);
        }

        let filter = Filter::Fields(Fields::new().with(meta.primary_key.column.clone(), key));
        match action.fetch_row(&meta.table_name, filter, read_options(&meta, action.driver())).await? {
            Some(record) => {
                apply_record(self, &meta, record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ------------------------------------------------------------------------
    // Relationships
    // ------------------------------------------------------------------------

    /// The owner of a `belongs_to` relation; `None` when the foreign key is null.
    async fn get_owner<R: Model>(&self, action: &dyn Action) -> Result<Option<R>, Error> {
        relation::belongs_to::<Self, R>(self, action).await
    }

    async fn has_one<R: Model>(&self, action: &dyn Action) -> Result<Option<R>, Error> {
        relation::has_one::<Self, R>(self, action).await
    }

    async fn has_many<R: Model>(&self, action: &dyn Action) -> Result<Vec<R>, Error> {
        relation::has_many::<Self, R>(self, action).await
    }

    async fn has_and_belongs_to_many<R: Model>(&self, action: &dyn Action) -> Result<Vec<R>, Error> {
        relation::many_to_many::<Self, R>(self, action).await
    }

    /// Links `ids` through the pivot table, skipping links that already exist.
    async fn attach<R: Model>(&self, action: &dyn Action, ids: Vec<Value>, extra: Fields) -> Result<bool, Error> {
        relation::attach::<Self, R>(self, action, ids, extra).await
    }

    /// Unlinks `ids`, or every link of this entity when `ids` is empty.
    async fn detach<R: Model>(&self, action: &dyn Action, ids: Vec<Value>) -> Result<u64, Error> {
        relation::detach::<Self, R>(self, action, ids).await
    }

    /// Makes `ids` the exact set of linked rows.
    async fn sync<R: Model>(&self, action: &dyn Action, ids: Vec<Value>) -> Result<bool, Error> {
        relation::sync::<Self, R>(self, action, ids).await
    }

    // ------------------------------------------------------------------------
    // Validation and Serialization
    // ------------------------------------------------------------------------

    async fn is_valid(&self, action: &dyn Action) -> Result<bool, Error> {
        Ok(self.errors(action).await?.is_empty())
    }

    /// Runs every validator and collects all failures.
    async fn errors(&self, action: &dyn Action) -> Result<ValidationErrors, Error> {
        let meta = Self::metadata()?;
        let ctx = ValidationContext { action, metadata: &meta, primary_key: primary_value(self, &meta) };

        let mut errors = ValidationErrors::new();
        for rule in &meta.validators {
            let value = self.get_field(rule.field).unwrap_or(Value::Null);
            if let Some(message) = rule.validator.validate(rule.field, &value, &ctx).await? {
                errors.add(rule.field, message);
            }
        }

        if !errors.is_empty() {
            log::debug!("`{}` failed validation: {}", meta.type_name, errors);
        }
        Ok(errors)
    }

    /// Serializes the persisted fields, leaving out hidden ones.
    fn to_json(&self) -> Result<serde_json::Value, Error> {
        let meta = Self::metadata()?;
        let mut object = serde_json::Map::new();
        for column in meta.columns.iter().filter(|c| !meta.is_hidden(c.field)) {
            let value = self.get_field(column.field).unwrap_or(Value::Null);
            let json = serde_json::to_value(&value).map_err(|e| Error::Conversion(e.to_string()))?;
            object.insert(crate::naming::clean_ident(column.field).to_string(), json);
        }
        Ok(serde_json::Value::Object(object))
    }
}

impl<T: Entity> Model for T {}

// ============================================================================
// Mapping
// ============================================================================

/// Builds an entity from a record, coercing each column to its declared type.
pub fn map_record<T: Entity>(record: Record) -> Result<T, Error> {
    let meta = T::metadata()?;
    let mut entity = T::default();
    apply_record(&mut entity, &meta, record)?;
    Ok(entity)
}

pub(crate) fn apply_record<T: Entity>(entity: &mut T, meta: &Metadata, mut record: Record) -> Result<(), Error> {
    for column in &meta.columns {
        if let Some(raw) = record.remove(&column.column) {
            let value = raw.coerce(column.column_type).map_err(|e| e.in_field(column.field))?;
            entity.set_field(column.field, value).map_err(|e| e.in_field(column.field))?;
        }
    }
    Ok(())
}

pub(crate) fn primary_value<T: Entity>(entity: &T, meta: &Metadata) -> Value {
    entity.get_field(meta.primary_key.field).unwrap_or(Value::Null)
}

/// Reads the value of the field mapped to `column`.
pub(crate) fn column_value<T: Entity>(entity: &T, meta: &Metadata, column: &str) -> Result<Value, Error> {
    let mapped = meta.field_for_column(column).ok_or_else(|| {
        Error::Relationship(format!("`{}` has no field mapped to column `{}`", meta.type_name, column))
    })?;
    Ok(entity.get_field(mapped.field).unwrap_or(Value::Null))
}

/// Column list for reads. Types the `Any` driver cannot decode are cast to text.
pub(crate) fn projection(meta: &Metadata, driver: Drivers, qualifier: Option<&str>) -> Vec<String> {
    meta.columns
        .iter()
        .map(|column| {
            let name = match qualifier {
                Some(q) => format!("{}.{}", driver.quote_identifier(q), driver.quote_identifier(&column.column)),
                None => driver.quote_identifier(&column.column),
            };
            let text_type = match driver {
                Drivers::Postgres => Some("TEXT"),
                Drivers::MySQL => Some("CHAR"),
                Drivers::SQLite => None,
            };
            match text_type {
                Some(ty) if column.column_type.reads_as_text() => {
                    format!("CAST({} AS {}) AS {}", name, ty, driver.quote_identifier(&column.column))
                }
                _ => name,
            }
        })
        .collect()
}

pub(crate) fn read_options(meta: &Metadata, driver: Drivers) -> FetchOptions {
    FetchOptions::new().columns(projection(meta, driver, None))
}

// ============================================================================
// Persistence
// ============================================================================

fn current_time(column_type: ColumnType) -> Value {
    match column_type {
        ColumnType::Timestamp => Value::Timestamp(Utc::now().trunc_subsecs(0)),
        ColumnType::Date => Value::Date(Local::now().date_naive()),
        ColumnType::Time => Value::Time(Local::now().time().trunc_subsecs(0)),
        _ => Value::DateTime(Local::now().naive_local().trunc_subsecs(0)),
    }
}

fn default_for(column: &ColumnMeta) -> Option<Value> {
    match &column.default {
        Some(ColumnDefault::Now) => Some(current_time(column.column_type)),
        Some(ColumnDefault::Value(value)) => Some(value.clone()),
        None => None,
    }
}

async fn insert_entity<T: Entity>(
    entity: &mut T,
    action: &dyn Action,
    meta: &Metadata,
    keep_key: bool,
) -> Result<bool, Error> {
    let key = &meta.primary_key;
    let mut fields = Fields::new();
    let mut applied = Vec::new();

    for column in &meta.columns {
        let mut value = entity.get_field(column.field).unwrap_or(Value::Null);
        if column.field == key.field && (!keep_key || value.is_unset_key()) {
            continue;
        }
        if value.is_blank() {
            if let Some(default) = default_for(column) {
                applied.push((column.field, default.clone()));
                value = default;
            }
        }
        // NULL columns are left to the storage default
        if !value.is_null() {
            fields.insert(column.column.clone(), value);
        }
    }

    let generated = action.insert(&meta.table_name, &fields, Some(&key.column)).await?;

    for (field, value) in applied {
        entity.set_field(field, value)?;
    }
    if let Some(id) = generated {
        let id = id.coerce(key.column_type).map_err(|e| e.in_field(key.field))?;
        entity.set_field(key.field, id)?;
    }

    log::debug!("inserted `{}` into `{}`", meta.type_name, meta.table_name);
    Ok(true)
}

async fn update_entity<T: Entity>(entity: &T, action: &dyn Action, meta: &Metadata) -> Result<bool, Error> {
    let key = &meta.primary_key;
    let fields: Fields = meta
        .columns
        .iter()
        .filter(|c| c.field != key.field)
        .filter_map(|c| entity.get_field(c.field).filter(|v| !v.is_null()).map(|v| (c.column.clone(), v)))
        .collect();

    if fields.is_empty() {
        return Ok(true);
    }

    let conditions = Fields::new().with(key.column.clone(), primary_value(entity, meta));
    action.update(&meta.table_name, &fields, &conditions).await
}
