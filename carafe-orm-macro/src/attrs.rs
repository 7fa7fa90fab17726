//! Parsing of `#[orm(...)]` attributes.
//!
//! Struct level: `table = ".."` and relation markers.
//! Field level: `primary_key`, `hidden`, `column` (bare, `= "name"` or a list),
//! `belongs_to(..)` and `validate(..)`.

use syn::{
    Attribute, Expr, LitInt, LitStr, Path, Token,
    meta::ParseNestedMeta,
};

use crate::types::column_type_from_name;

// ============================================================================
// Parsed Forms
// ============================================================================

#[derive(Default)]
pub struct EntityAttrs {
    pub table: Option<LitStr>,
    pub relations: Vec<RelationAttr>,
}

pub struct RelationAttr {
    /// `RelationDef` constructor (`belongs_to`, `has_one`, ...)
    pub kind: &'static str,
    pub related: Path,
    /// Key setters as `(setter, value)`
    pub keys: Vec<(&'static str, LitStr)>,
}

#[derive(Default)]
pub struct ColumnAttrs {
    pub name: Option<LitStr>,
    /// `ColumnType` variant name
    pub column_type: Option<&'static str>,
    pub length: Option<LitInt>,
    pub nullable: Option<bool>,
    pub default: Option<LitStr>,
}

#[derive(Default)]
pub struct FieldAttrs {
    pub primary_key: bool,
    pub hidden: bool,
    pub column: Option<ColumnAttrs>,
    pub belongs_to: Option<RelationAttr>,
    pub validators: Vec<ValidatorAttr>,
}

pub struct ValidatorAttr {
    pub kind: ValidatorKind,
    pub message: Option<LitStr>,
}

pub enum ValidatorKind {
    Required,
    NotEmpty,
    MinLength(LitInt),
    MaxLength(LitInt),
    Regex(LitStr),
    Email,
    NumberRange { min: Expr, max: Expr },
    DateFormat(Option<LitStr>),
    DateTimeFormat(Option<LitStr>),
    TimeFormat(Option<LitStr>),
    DateRange { start: Option<LitStr>, end: Option<LitStr>, format: Option<LitStr> },
    IsPastDate(Option<LitStr>),
    IsPastDateTime(Option<LitStr>),
    Unique { table: Option<LitStr>, field: Option<LitStr> },
    With(Path),
}

// ============================================================================
// Struct Level
// ============================================================================

pub fn parse_entity(attrs: &[Attribute]) -> syn::Result<EntityAttrs> {
    let mut parsed = EntityAttrs::default();

    for attr in attrs.iter().filter(|a| a.path().is_ident("orm")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                parsed.table = Some(meta.value()?.parse()?);
                return Ok(());
            }

            if let Some(kind) = relation_kind(&meta.path) {
                parsed.relations.push(parse_relation(kind, &meta)?);
                return Ok(());
            }

            Err(meta.error("unsupported orm attribute on struct"))
        })?;
    }

    Ok(parsed)
}

fn relation_kind(path: &Path) -> Option<&'static str> {
    ["belongs_to", "has_one", "has_many", "has_and_belongs_to_many"]
        .into_iter()
        .find(|kind| path.is_ident(kind))
}

/// Parses `kind(Related, key = "..", ...)`.
fn parse_relation(kind: &'static str, meta: &ParseNestedMeta) -> syn::Result<RelationAttr> {
    let mut related = None;
    let mut keys = Vec::new();

    meta.parse_nested_meta(|inner| {
        if !inner.input.peek(Token![=]) {
            if related.is_some() {
                return Err(inner.error("relation names more than one related type"));
            }
            related = Some(inner.path.clone());
            return Ok(());
        }

        let setter = ["foreign_key", "owner_key", "local_key", "pivot", "foreign_pivot_key", "related_pivot_key"]
            .into_iter()
            .find(|key| inner.path.is_ident(key))
            .ok_or_else(|| inner.error("unknown relation key"))?;
        keys.push((setter, inner.value()?.parse()?));
        Ok(())
    })?;

    let related = related.ok_or_else(|| meta.error("relation must name the related type"))?;
    Ok(RelationAttr { kind, related, keys })
}

// ============================================================================
// Field Level
// ============================================================================

pub fn parse_field(attrs: &[Attribute]) -> syn::Result<FieldAttrs> {
    let mut parsed = FieldAttrs::default();

    for attr in attrs.iter().filter(|a| a.path().is_ident("orm")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("primary_key") {
                parsed.primary_key = true;
            } else if meta.path.is_ident("hidden") {
                parsed.hidden = true;
            } else if meta.path.is_ident("column") {
                parsed.column = Some(parse_column(&meta)?);
            } else if meta.path.is_ident("belongs_to") {
                parsed.belongs_to = Some(parse_relation("belongs_to", &meta)?);
            } else if meta.path.is_ident("validate") {
                meta.parse_nested_meta(|rule| {
                    parsed.validators.push(parse_validator(&rule)?);
                    Ok(())
                })?;
            } else {
                return Err(meta.error("unsupported orm attribute on field"));
            }
            Ok(())
        })?;
    }

    Ok(parsed)
}

fn parse_column(meta: &ParseNestedMeta) -> syn::Result<ColumnAttrs> {
    let mut column = ColumnAttrs::default();

    if meta.input.peek(Token![=]) {
        column.name = Some(meta.value()?.parse()?);
        return Ok(column);
    }
    if !meta.input.peek(syn::token::Paren) {
        return Ok(column);
    }

    meta.parse_nested_meta(|inner| {
        if inner.path.is_ident("name") {
            column.name = Some(inner.value()?.parse()?);
        } else if inner.path.is_ident("type") {
            let name: LitStr = inner.value()?.parse()?;
            let variant = column_type_from_name(&name.value())
                .ok_or_else(|| syn::Error::new(name.span(), "unknown column type"))?;
            column.column_type = Some(variant);
        } else if inner.path.is_ident("length") {
            column.length = Some(inner.value()?.parse()?);
        } else if inner.path.is_ident("nullable") {
            let nullable = if inner.input.peek(Token![=]) {
                inner.value()?.parse::<syn::LitBool>()?.value
            } else {
                true
            };
            column.nullable = Some(nullable);
        } else if inner.path.is_ident("default") {
            column.default = Some(inner.value()?.parse()?);
        } else {
            return Err(inner.error("unknown column option"));
        }
        Ok(())
    })?;

    Ok(column)
}

// ============================================================================
// Validators
// ============================================================================

/// Options a validator may carry in its list form, e.g. `unique(table = "..", message = "..")`.
#[derive(Default)]
struct RuleOptions {
    value: Option<Expr>,
    min: Option<Expr>,
    max: Option<Expr>,
    start: Option<LitStr>,
    end: Option<LitStr>,
    format: Option<LitStr>,
    table: Option<LitStr>,
    field: Option<LitStr>,
    message: Option<LitStr>,
}

fn parse_rule_options(rule: &ParseNestedMeta) -> syn::Result<RuleOptions> {
    let mut options = RuleOptions::default();

    if rule.input.peek(Token![=]) {
        options.value = Some(rule.value()?.parse()?);
        return Ok(options);
    }
    if !rule.input.peek(syn::token::Paren) {
        return Ok(options);
    }

    rule.parse_nested_meta(|inner| {
        let input = inner.value()?;
        match inner.path.get_ident().map(|i| i.to_string()).as_deref() {
            Some("value") => options.value = Some(input.parse()?),
            Some("min") => options.min = Some(input.parse()?),
            Some("max") => options.max = Some(input.parse()?),
            Some("start") => options.start = Some(input.parse()?),
            Some("end") => options.end = Some(input.parse()?),
            Some("format") => options.format = Some(input.parse()?),
            Some("table") => options.table = Some(input.parse()?),
            Some("field") => options.field = Some(input.parse()?),
            Some("message") => options.message = Some(input.parse()?),
            _ => return Err(inner.error("unknown validator option")),
        }
        Ok(())
    })?;

    Ok(options)
}

fn parse_validator(rule: &ParseNestedMeta) -> syn::Result<ValidatorAttr> {
    let name = rule
        .path
        .get_ident()
        .map(|i| i.to_string())
        .ok_or_else(|| rule.error("expected a validator name"))?;
    let options = parse_rule_options(rule)?;

    let kind = match name.as_str() {
        "required" => ValidatorKind::Required,
        "not_empty" => ValidatorKind::NotEmpty,
        "min_length" => ValidatorKind::MinLength(int_option(rule, options.value.clone())?),
        "max_length" => ValidatorKind::MaxLength(int_option(rule, options.value.clone())?),
        "regex" => ValidatorKind::Regex(str_option(rule, options.value.clone())?),
        "email" => ValidatorKind::Email,
        "number_range" => ValidatorKind::NumberRange {
            min: options.min.clone().ok_or_else(|| rule.error("number_range needs `min`"))?,
            max: options.max.clone().ok_or_else(|| rule.error("number_range needs `max`"))?,
        },
        "date_format" => ValidatorKind::DateFormat(format_option(rule, &options)?),
        "datetime_format" => ValidatorKind::DateTimeFormat(format_option(rule, &options)?),
        "time_format" => ValidatorKind::TimeFormat(format_option(rule, &options)?),
        "date_range" => ValidatorKind::DateRange {
            start: options.start.clone(),
            end: options.end.clone(),
            format: options.format.clone(),
        },
        "is_past_date" => ValidatorKind::IsPastDate(options.format.clone()),
        "is_past_datetime" => ValidatorKind::IsPastDateTime(options.format.clone()),
        "unique" => ValidatorKind::Unique { table: options.table.clone(), field: options.field.clone() },
        "with" => {
            let path: LitStr = str_option(rule, options.value.clone())?;
            ValidatorKind::With(path.parse()?)
        }
        _ => return Err(rule.error("unknown validator")),
    };

    Ok(ValidatorAttr { kind, message: options.message })
}

fn int_option(rule: &ParseNestedMeta, value: Option<Expr>) -> syn::Result<LitInt> {
    match value {
        Some(Expr::Lit(syn::ExprLit { lit: syn::Lit::Int(lit), .. })) => Ok(lit),
        _ => Err(rule.error("expected an integer, e.g. `min_length = 3`")),
    }
}

fn str_option(rule: &ParseNestedMeta, value: Option<Expr>) -> syn::Result<LitStr> {
    match value {
        Some(Expr::Lit(syn::ExprLit { lit: syn::Lit::Str(lit), .. })) => Ok(lit),
        _ => Err(rule.error("expected a string literal")),
    }
}

/// `date_format = ".."` or `date_format(format = "..")`.
fn format_option(rule: &ParseNestedMeta, options: &RuleOptions) -> syn::Result<Option<LitStr>> {
    match &options.value {
        Some(_) => str_option(rule, options.value.clone()).map(Some),
        None => Ok(options.format.clone()),
    }
}
