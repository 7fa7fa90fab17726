use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::{GenericArgument, Ident, PathArguments, Type};

/// Maps a Rust field type to its inferred column type.
///
/// Returns a tuple containing:
/// 1. The `ColumnType` variant name (e.g. "String", "Integer").
/// 2. A boolean indicating if the type is nullable (`Option<T>`).
pub fn column_type_of(ty: &Type) -> (&'static str, bool) {
    let Type::Path(type_path) = ty else {
        return ("String", false);
    };
    let Some(segment) = type_path.path.segments.last() else {
        return ("String", false);
    };

    // Option<T> marks a nullable column of T
    if segment.ident == "Option" {
        if let PathArguments::AngleBracketed(args) = &segment.arguments {
            if let Some(GenericArgument::Type(inner_ty)) = args.args.first() {
                let (inner, _) = column_type_of(inner_ty);
                return (inner, true);
            }
        }
    }

    let variant = match segment.ident.to_string().as_str() {
        "i8" | "i16" | "i32" | "i64" | "u8" | "u16" | "u32" | "u64" => "Integer",
        "f32" | "f64" => "Float",
        "bool" => "Boolean",
        "NaiveDateTime" => "DateTime",
        "DateTime" => "Timestamp",
        "NaiveDate" => "Date",
        "NaiveTime" => "Time",
        "Uuid" => "Uuid",
        // String and enums stored as text
        _ => "String",
    };
    (variant, false)
}

/// Parses a `type = "..."` column attribute into a `ColumnType` variant name.
pub fn column_type_from_name(name: &str) -> Option<&'static str> {
    let variant = match name.trim().to_lowercase().as_str() {
        "string" | "text" | "varchar" | "char" => "String",
        "int" | "integer" | "bigint" | "smallint" => "Integer",
        "float" | "double" | "real" | "decimal" | "numeric" => "Float",
        "bool" | "boolean" => "Boolean",
        "datetime" => "DateTime",
        "timestamp" | "timestamptz" => "Timestamp",
        "date" => "Date",
        "time" => "Time",
        "uuid" => "Uuid",
        _ => return None,
    };
    Some(variant)
}

/// Renders `carafe_orm::ColumnType::<variant>`.
pub fn column_type_tokens(variant: &str) -> TokenStream {
    let ident = Ident::new(variant, Span::call_site());
    quote! { carafe_orm::ColumnType::#ident }
}
