//! # Metadata Module
//!
//! Entity metadata: the raw [`EntitySchema`] emitted by `#[derive(Entity)]`
//! and the resolved [`Metadata`] the mapper works from.
//!
//! Resolution runs once per entity type. The result is published into a
//! process-wide cache keyed by [`TypeId`] and shared as an `Arc`; it is never
//! mutated afterwards.

// ============================================================================
// External Crate Imports
// ============================================================================

use std::{
    any::TypeId,
    collections::{HashMap, HashSet},
    sync::{Arc, OnceLock, PoisonError, RwLock},
};

// ============================================================================
// Internal Crate Imports
// ============================================================================

use crate::{
    Error, Value,
    model::Entity,
    naming::{clean_ident, snake_case, table_name_for},
    validation::Validator,
    value::ColumnType,
};

static CACHE: OnceLock<RwLock<HashMap<TypeId, Arc<Metadata>>>> = OnceLock::new();

// ============================================================================
// Raw Schema (derive output)
// ============================================================================

/// Declarative description of an entity type, as written in its attributes.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub type_name: &'static str,
    pub table: Option<&'static str>,
    pub fields: Vec<FieldSchema>,
    pub relations: Vec<RelationDef>,
    pub validators: Vec<FieldValidator>,
}

impl EntitySchema {
    pub fn new(type_name: &'static str) -> Self {
        Self { type_name, table: None, fields: Vec::new(), relations: Vec::new(), validators: Vec::new() }
    }

    pub fn table(mut self, name: &'static str) -> Self {
        self.table = Some(name);
        self
    }

    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn validator(mut self, field: &'static str, validator: impl Validator + 'static) -> Self {
        self.validators.push(FieldValidator { field, validator: Arc::new(validator) });
        self
    }
}

/// One struct field and its mapping markers.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub name: &'static str,
    /// Type inferred from the Rust field type.
    pub column_type: ColumnType,
    /// `true` when the Rust field is an `Option`.
    pub nullable: bool,
    pub column: Option<ColumnAttr>,
    pub primary_key: bool,
    pub hidden: bool,
}

impl FieldSchema {
    pub fn new(name: &'static str, column_type: ColumnType, nullable: bool) -> Self {
        Self { name, column_type, nullable, column: None, primary_key: false, hidden: false }
    }

    pub fn column(mut self, column: ColumnAttr) -> Self {
        self.column = Some(column);
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// The `column(...)` marker. Unset parts fall back to the field's inferred values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnAttr {
    pub name: Option<&'static str>,
    pub column_type: Option<ColumnType>,
    pub length: Option<u32>,
    pub nullable: Option<bool>,
    pub default: Option<&'static str>,
}

impl ColumnAttr {
    pub fn new() -> Self {
        Self { name: None, column_type: None, length: None, nullable: None, default: None }
    }

    pub fn name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    pub fn column_type(mut self, column_type: ColumnType) -> Self {
        self.column_type = Some(column_type);
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    pub fn default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }
}

/// A validator attached to a field.
#[derive(Debug, Clone)]
pub struct FieldValidator {
    pub field: &'static str,
    pub validator: Arc<dyn Validator>,
}

// ============================================================================
// Relations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
    HasAndBelongsToMany,
}

/// A relationship marker. Unset keys are derived from naming conventions when traversed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDef {
    pub kind: RelationKind,
    pub related: TypeId,
    pub related_name: &'static str,
    pub foreign_key: Option<&'static str>,
    /// Key on the owner for `BelongsTo`.
    pub owner_key: Option<&'static str>,
    /// Key on this entity for `HasOne` / `HasMany`.
    pub local_key: Option<&'static str>,
    pub pivot: Option<&'static str>,
    pub foreign_pivot_key: Option<&'static str>,
    pub related_pivot_key: Option<&'static str>,
    /// Field carrying the marker, for field-level `BelongsTo`.
    pub field: Option<&'static str>,
}

impl RelationDef {
    fn new<R: 'static>(kind: RelationKind) -> Self {
        Self {
            kind,
            related: TypeId::of::<R>(),
            related_name: std::any::type_name::<R>(),
            foreign_key: None,
            owner_key: None,
            local_key: None,
            pivot: None,
            foreign_pivot_key: None,
            related_pivot_key: None,
            field: None,
        }
    }

    pub fn belongs_to<R: 'static>() -> Self {
        Self::new::<R>(RelationKind::BelongsTo)
    }

    pub fn has_one<R: 'static>() -> Self {
        Self::new::<R>(RelationKind::HasOne)
    }

    pub fn has_many<R: 'static>() -> Self {
        Self::new::<R>(RelationKind::HasMany)
    }

    pub fn has_and_belongs_to_many<R: 'static>() -> Self {
        Self::new::<R>(RelationKind::HasAndBelongsToMany)
    }

    pub fn foreign_key(mut self, key: &'static str) -> Self {
        self.foreign_key = Some(key);
        self
    }

    pub fn owner_key(mut self, key: &'static str) -> Self {
        self.owner_key = Some(key);
        self
    }

    pub fn local_key(mut self, key: &'static str) -> Self {
        self.local_key = Some(key);
        self
    }

    pub fn pivot(mut self, table: &'static str) -> Self {
        self.pivot = Some(table);
        self
    }

    pub fn foreign_pivot_key(mut self, key: &'static str) -> Self {
        self.foreign_pivot_key = Some(key);
        self
    }

    pub fn related_pivot_key(mut self, key: &'static str) -> Self {
        self.related_pivot_key = Some(key);
        self
    }

    pub fn field(mut self, field: &'static str) -> Self {
        self.field = Some(field);
        self
    }
}

// ============================================================================
// Resolved Metadata
// ============================================================================

/// Default applied to a null or empty value on insert.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnDefault {
    /// Current time, taken when the row is saved.
    Now,
    Value(Value),
}

/// A persisted field.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub field: &'static str,
    pub column: String,
    pub column_type: ColumnType,
    pub length: Option<u32>,
    pub nullable: bool,
    pub default: Option<ColumnDefault>,
}

/// Resolved, immutable mapping information for one entity type.
#[derive(Debug)]
pub struct Metadata {
    pub type_name: &'static str,
    pub table_name: String,
    pub primary_key: ColumnMeta,
    /// Every persisted column, primary key included, in declaration order.
    pub columns: Vec<ColumnMeta>,
    /// Field names excluded from serialization.
    pub hidden: HashSet<&'static str>,
    pub relations: Vec<RelationDef>,
    pub validators: Vec<FieldValidator>,
}

impl Metadata {
    /// Resolves a raw schema.
    pub fn from_schema(schema: EntitySchema) -> Result<Self, Error> {
        let type_name = schema.type_name;
        let table_name = match schema.table {
            Some(table) => table.to_string(),
            None => table_name_for(type_name),
        };

        let explicit_keys: Vec<&FieldSchema> = schema.fields.iter().filter(|f| f.primary_key).collect();
        let primary_field = match explicit_keys.as_slice() {
            [single] => single.name,
            [] => schema
                .fields
                .iter()
                .find(|f| clean_ident(f.name) == "id")
                .map(|f| f.name)
                .ok_or_else(|| {
                    Error::Metadata(format!("`{}` has no primary key marker and no `id` field", type_name))
                })?,
            many => {
                let names: Vec<&str> = many.iter().map(|f| f.name).collect();
                return Err(Error::Metadata(format!(
                    "`{}` declares more than one primary key: {}",
                    type_name,
                    names.join(", ")
                )));
            }
        };

        let mut columns = Vec::new();
        let mut seen = HashSet::new();
        for field in &schema.fields {
            let is_primary = field.name == primary_field;
            if field.column.is_none() && !is_primary {
                continue;
            }

            let column = resolve_column(type_name, field)?;
            if !seen.insert(column.column.clone()) {
                return Err(Error::Metadata(format!(
                    "`{}` maps more than one field to column `{}`",
                    type_name, column.column
                )));
            }
            columns.push(column);
        }

        let primary_key = columns
            .iter()
            .find(|c| c.field == primary_field)
            .cloned()
            .ok_or_else(|| Error::Metadata(format!("`{}` primary key is not mapped", type_name)))?;

        let hidden = schema.fields.iter().filter(|f| f.hidden).map(|f| f.name).collect();

        log::debug!("resolved metadata for `{}` (table `{}`, {} columns)", type_name, table_name, columns.len());

        Ok(Self {
            type_name,
            table_name,
            primary_key,
            columns,
            hidden,
            relations: schema.relations,
            validators: schema.validators,
        })
    }

    pub fn column_for_field(&self, field: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.field == field)
    }

    pub fn field_for_column(&self, column: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.column == column)
    }

    /// Finds the relationship of `kind` to the type `related`.
    pub fn relation(&self, kind: RelationKind, related: TypeId) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.kind == kind && r.related == related)
    }

    pub fn is_hidden(&self, field: &str) -> bool {
        self.hidden.contains(field)
    }
}

fn resolve_column(type_name: &str, field: &FieldSchema) -> Result<ColumnMeta, Error> {
    let attr = field.column.clone().unwrap_or_default();
    let column_type = attr.column_type.unwrap_or(field.column_type);
    let column = match attr.name {
        Some(name) => name.to_string(),
        None => snake_case(field.name),
    };

    let default = match attr.default {
        None => None,
        Some(raw) if column_type.is_temporal() && raw.trim().eq_ignore_ascii_case("now()") => Some(ColumnDefault::Now),
        Some(raw) => {
            let value = Value::Text(raw.to_string()).coerce(column_type).map_err(|e| {
                Error::Metadata(format!("`{}.{}` has an invalid default `{}`: {}", type_name, field.name, raw, e))
            })?;
            Some(ColumnDefault::Value(value))
        }
    };

    Ok(ColumnMeta {
        field: field.name,
        column,
        column_type,
        length: attr.length,
        nullable: attr.nullable.unwrap_or(field.nullable),
        default,
    })
}

// ============================================================================
// Cache
// ============================================================================

/// Returns the metadata of `T`, resolving it on first use.
///
/// Concurrent first calls may each compute the metadata; the first one
/// published wins and every caller receives that instance.
pub fn resolve<T: Entity>() -> Result<Arc<Metadata>, Error> {
    let id = TypeId::of::<T>();
    let cache = CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    if let Some(found) = cache.read().unwrap_or_else(PoisonError::into_inner).get(&id) {
        return Ok(Arc::clone(found));
    }

    let computed = Arc::new(Metadata::from_schema(T::schema())?);
    let mut writer = cache.write().unwrap_or_else(PoisonError::into_inner);
    Ok(Arc::clone(writer.entry(id).or_insert(computed)))
}
