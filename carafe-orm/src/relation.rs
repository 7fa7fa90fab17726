//! Relationship traversal.
//!
//! Keys left unset on a relation marker are derived from naming conventions:
//!
//! | Relation | Foreign key (default) | Other key (default) |
//! |---|---|---|
//! | `belongs_to(R)` | on this entity: the field's own column, else `snake(R)_<R key>` | owner key: R's primary key |
//! | `has_one(R)` / `has_many(R)` | on R: `snake(This)_<this key>` | local key: this primary key |
//! | `has_and_belongs_to_many(R)` | pivot `snake(This + R)`, `snake(This)_<this key>` | `snake(R)_<R key>` |

use std::{
    any::TypeId,
    collections::{HashMap, HashSet},
};

use crate::{
    Error, Value,
    action::{Action, FetchOptions, Filter},
    metadata::{Metadata, RelationDef, RelationKind},
    model::{Model, column_value, map_record, primary_value, projection, read_options},
    naming::{foreign_key_for, pivot_table_for},
    query_builder::QueryBuilder,
    value::Fields,
};

fn find_relation<'m, T: Model, R: Model>(meta: &'m Metadata, kind: RelationKind) -> Result<&'m RelationDef, Error> {
    meta.relation(kind, TypeId::of::<R>()).ok_or_else(|| {
        Error::Relationship(format!(
            "`{}` declares no {:?} relation to `{}`",
            meta.type_name,
            kind,
            std::any::type_name::<R>()
        ))
    })
}

pub(crate) async fn belongs_to<T: Model, R: Model>(entity: &T, action: &dyn Action) -> Result<Option<R>, Error> {
    let meta = T::metadata()?;
    let related = R::metadata()?;
    let relation = find_relation::<T, R>(&meta, RelationKind::BelongsTo)?;

    let foreign_key = match (relation.foreign_key, relation.field.and_then(|f| meta.column_for_field(f))) {
        (Some(key), _) => key.to_string(),
        (None, Some(column)) => column.column.clone(),
        (None, None) => foreign_key_for(related.type_name, &related.primary_key.column),
    };
    let owner_key = relation.owner_key.map(str::to_string).unwrap_or_else(|| related.primary_key.column.clone());

    let value = column_value(entity, &meta, &foreign_key)?;
    if value.is_null() {
        return Ok(None);
    }

    let filter = Filter::Fields(Fields::new().with(owner_key, value));
    let row = action.fetch_row(&related.table_name, filter, read_options(&related, action.driver())).await?;
    row.map(map_record::<R>).transpose()
}

/// Resolves `(foreign key on R, value of the local key)` for `has_one` / `has_many`.
fn owned_keys<T: Model, R: Model>(entity: &T, meta: &Metadata, kind: RelationKind) -> Result<(String, Value), Error> {
    let relation = find_relation::<T, R>(meta, kind)?;
    let foreign_key = match relation.foreign_key {
        Some(key) => key.to_string(),
        None => foreign_key_for(meta.type_name, &meta.primary_key.column),
    };
    let local_key = relation.local_key.map(str::to_string).unwrap_or_else(|| meta.primary_key.column.clone());
    Ok((foreign_key, column_value(entity, meta, &local_key)?))
}

pub(crate) async fn has_one<T: Model, R: Model>(entity: &T, action: &dyn Action) -> Result<Option<R>, Error> {
    let meta = T::metadata()?;
    let related = R::metadata()?;
    let (foreign_key, value) = owned_keys::<T, R>(entity, &meta, RelationKind::HasOne)?;
    if value.is_null() {
        return Ok(None);
    }

    let filter = Filter::Fields(Fields::new().with(foreign_key, value));
    let row = action.fetch_row(&related.table_name, filter, read_options(&related, action.driver())).await?;
    row.map(map_record::<R>).transpose()
}

pub(crate) async fn has_many<T: Model, R: Model>(entity: &T, action: &dyn Action) -> Result<Vec<R>, Error> {
    let meta = T::metadata()?;
    let related = R::metadata()?;
    let (foreign_key, value) = owned_keys::<T, R>(entity, &meta, RelationKind::HasMany)?;
    if value.is_null() {
        return Ok(Vec::new());
    }

    let filter = Filter::Fields(Fields::new().with(foreign_key, value));
    let rows = action.fetch_all(&related.table_name, filter, read_options(&related, action.driver())).await?;
    rows.into_iter().map(map_record::<R>).collect()
}

// ============================================================================
// Many-to-many
// ============================================================================

struct Pivot {
    table: String,
    /// Column pointing at this entity.
    foreign_key: String,
    /// Column pointing at the related entity.
    related_key: String,
}

fn pivot_for<T: Model, R: Model>(meta: &Metadata, related: &Metadata) -> Result<Pivot, Error> {
    let relation = find_relation::<T, R>(meta, RelationKind::HasAndBelongsToMany)?;
    Ok(Pivot {
        table: relation.pivot.map(str::to_string).unwrap_or_else(|| pivot_table_for(meta.type_name, related.type_name)),
        foreign_key: relation
            .foreign_pivot_key
            .map(str::to_string)
            .unwrap_or_else(|| foreign_key_for(meta.type_name, &meta.primary_key.column)),
        related_key: relation
            .related_pivot_key
            .map(str::to_string)
            .unwrap_or_else(|| foreign_key_for(related.type_name, &related.primary_key.column)),
    })
}

fn require_key<T: Model>(entity: &T, meta: &Metadata, verb: &str) -> Result<Value, Error> {
    let key = primary_value(entity, meta);
    if key.is_unset_key() {
        return Err(Error::InvalidArgument(format!(
            "`{}` must be saved before related rows can be {}",
            meta.type_name, verb
        )));
    }
    Ok(key)
}

pub(crate) async fn many_to_many<T: Model, R: Model>(entity: &T, action: &dyn Action) -> Result<Vec<R>, Error> {
    let meta = T::metadata()?;
    let related = R::metadata()?;
    let pivot = pivot_for::<T, R>(&meta, &related)?;

    let key = primary_value(entity, &meta);
    if key.is_unset_key() {
        return Ok(Vec::new());
    }

    let driver = action.driver();
    let on = format!(
        "{} = {}",
        driver.quote_identifier(&format!("p.{}", pivot.related_key)),
        driver.quote_identifier(&format!("b.{}", related.primary_key.column)),
    );
    let condition = format!("{} = ?", driver.quote_identifier(&format!("p.{}", pivot.foreign_key)));

    QueryBuilder::with_mapper(action, map_record::<R>)
        .from(("b", related.table_name.as_str()), projection(&related, driver, Some("b")))
        .join(("p", pivot.table.as_str()), &on, ())
        .where_raw(&condition, key)
        .fetch_all()
        .await
}

/// Runs `body` inside a transaction unless the action already holds one.
macro_rules! in_transaction {
    ($action:expr, $body:expr) => {{
        let owned = !$action.connection().in_transaction().await;
        if owned {
            $action.begin_transaction().await?;
        }
        match $body.await {
            Ok(value) => {
                if owned {
                    $action.commit().await?;
                }
                Ok(value)
            }
            Err(err) => {
                if owned {
                    if let Err(rollback) = $action.roll_back().await {
                        log::error!("rollback failed: {}", rollback);
                    }
                }
                Err(err)
            }
        }
    }};
}

async fn attach_rows(action: &dyn Action, pivot: &Pivot, key: &Value, ids: Vec<Value>, extra: &Fields) -> Result<bool, Error> {
    for id in ids {
        let link = Fields::new().with(pivot.foreign_key.clone(), key.clone()).with(pivot.related_key.clone(), id);
        if action.count(&pivot.table, &link).await? > 0 {
            continue;
        }

        let mut row = link;
        row.extend(extra.clone());
        action.insert(&pivot.table, &row, None).await?;
    }
    Ok(true)
}

async fn detach_rows(action: &dyn Action, pivot: &Pivot, key: &Value, ids: Vec<Value>) -> Result<u64, Error> {
    let base = Fields::new().with(pivot.foreign_key.clone(), key.clone());
    if ids.is_empty() {
        return action.delete_rows(&pivot.table, &base).await;
    }

    let mut removed = 0;
    for id in ids {
        let link = base.clone().with(pivot.related_key.clone(), id);
        removed += action.delete_rows(&pivot.table, &link).await?;
    }
    Ok(removed)
}

pub(crate) async fn attach<T: Model, R: Model>(
    entity: &T,
    action: &dyn Action,
    ids: Vec<Value>,
    extra: Fields,
) -> Result<bool, Error> {
    let meta = T::metadata()?;
    let related = R::metadata()?;
    let pivot = pivot_for::<T, R>(&meta, &related)?;
    let key = require_key(entity, &meta, "attached")?;

    in_transaction!(action, attach_rows(action, &pivot, &key, ids, &extra))
}

pub(crate) async fn detach<T: Model, R: Model>(entity: &T, action: &dyn Action, ids: Vec<Value>) -> Result<u64, Error> {
    let meta = T::metadata()?;
    let related = R::metadata()?;
    let pivot = pivot_for::<T, R>(&meta, &related)?;
    let key = require_key(entity, &meta, "detached")?;

    detach_rows(action, &pivot, &key, ids).await
}

async fn sync_rows(action: &dyn Action, pivot: &Pivot, key: &Value, ids: Vec<Value>) -> Result<bool, Error> {
    let rows = action
        .fetch_all(
            &pivot.table,
            Filter::Fields(Fields::new().with(pivot.foreign_key.clone(), key.clone())),
            FetchOptions::new().columns([action.quote_identifier(&pivot.related_key)]),
        )
        .await?;

    let existing: HashMap<String, Value> = rows
        .into_iter()
        .filter_map(|mut r| r.remove(&pivot.related_key))
        .map(|v| (v.key_string(), v))
        .collect();
    let wanted: HashSet<String> = ids.iter().map(Value::key_string).collect();

    let stale: Vec<Value> =
        existing.iter().filter(|(k, _)| !wanted.contains(*k)).map(|(_, v)| v.clone()).collect();
    let missing: Vec<Value> = ids.into_iter().filter(|id| !existing.contains_key(&id.key_string())).collect();

    if !stale.is_empty() {
        detach_rows(action, pivot, key, stale).await?;
    }
    attach_rows(action, pivot, key, missing, &Fields::new()).await
}

pub(crate) async fn sync<T: Model, R: Model>(entity: &T, action: &dyn Action, ids: Vec<Value>) -> Result<bool, Error> {
    let meta = T::metadata()?;
    let related = R::metadata()?;
    let pivot = pivot_for::<T, R>(&meta, &related)?;
    let key = require_key(entity, &meta, "synced")?;

    in_transaction!(action, sync_rows(action, &pivot, &key, ids))
}
