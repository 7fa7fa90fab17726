//! Naming conventions used to derive table, column and key names.

use heck::ToSnakeCase;

/// Strips the `r#` prefix that raw identifiers carry.
pub fn clean_ident(name: &str) -> &str {
    name.strip_prefix("r#").unwrap_or(name)
}

/// Converts a type or field name to snake_case.
pub fn snake_case(name: &str) -> String {
    clean_ident(name).to_snake_case()
}

/// Returns the last path segment of a type name (`app::models::User` -> `User`).
pub fn short_type_name(name: &str) -> &str {
    let base = name.split('<').next().unwrap_or(name);
    base.rsplit("::").next().unwrap_or(base)
}

/// Pluralizes the last word of a snake_case name.
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }

    let lower = word.to_ascii_lowercase();
    if let Some(stem) = word.strip_suffix('y') {
        let before = stem.chars().last();
        if !matches!(before, Some('a' | 'e' | 'i' | 'o' | 'u') | None) {
            return format!("{}ies", stem);
        }
    }

    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with('z') || lower.ends_with("ch") || lower.ends_with("sh") {
        return format!("{}es", word);
    }

    format!("{}s", word)
}

/// Default table name for an entity type: `pluralize(snake_case(TypeName))`.
pub fn table_name_for(type_name: &str) -> String {
    pluralize(&snake_case(short_type_name(type_name)))
}

/// Default pivot table for a many-to-many pair: `snake_case(TypeA + TypeB)`.
pub fn pivot_table_for(owner: &str, related: &str) -> String {
    snake_case(&format!("{}{}", short_type_name(owner), short_type_name(related)))
}

/// Default key pointing at `type_name` rows: `snake_case(TypeName) + "_" + key`.
pub fn foreign_key_for(type_name: &str, key: &str) -> String {
    format!("{}_{}", snake_case(short_type_name(type_name)), snake_case(key))
}
