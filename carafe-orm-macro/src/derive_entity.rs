//! # Entity Derive Macro Implementation
//!
//! Expands `#[derive(Entity)]` into an `impl carafe_orm::Entity` made of:
//! 1. `schema()`, the declarative `EntitySchema` built from the `#[orm(...)]` attributes.
//! 2. `get_field` / `set_field`, typed access by field name for every persisted
//!    or validated field.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, ext::IdentExt};

use crate::{
    attrs::{self, ColumnAttrs, RelationAttr, ValidatorAttr, ValidatorKind},
    types::{column_type_of, column_type_tokens},
};

/// Expands the `#[derive(Entity)]` macro.
pub fn expand(ast: DeriveInput) -> syn::Result<TokenStream> {
    let struct_name = &ast.ident;

    let fields = match &ast.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => return Err(syn::Error::new_spanned(struct_name, "Entity must have named fields")),
        },
        _ => return Err(syn::Error::new_spanned(struct_name, "Entity must be a struct")),
    };
    if !ast.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(&ast.generics, "Entity cannot be generic"));
    }

    let entity = attrs::parse_entity(&ast.attrs)?;

    let mut field_schemas = Vec::new();
    let mut relations: Vec<TokenStream> = entity.relations.iter().map(|r| relation_tokens(r, None)).collect();
    let mut validators = Vec::new();
    let mut get_arms = Vec::new();
    let mut set_arms = Vec::new();

    for field in fields {
        let Some(ident) = field.ident.as_ref() else { continue };
        let name = ident.unraw().to_string();
        let ty = &field.ty;
        let parsed = attrs::parse_field(&field.attrs)?;

        let (variant, nullable) = column_type_of(ty);
        let column_type = column_type_tokens(variant);
        let column = parsed.column.as_ref().map(column_tokens);
        let primary_key = parsed.primary_key.then(|| quote! { .primary_key() });
        let hidden = parsed.hidden.then(|| quote! { .hidden() });
        let column = column.map(|c| quote! { .column(#c) });

        field_schemas.push(quote! {
            carafe_orm::FieldSchema::new(#name, #column_type, #nullable) #column #primary_key #hidden
        });

        if let Some(relation) = &parsed.belongs_to {
            relations.push(relation_tokens(relation, Some(&name)));
        }
        for rule in &parsed.validators {
            let validator = validator_tokens(rule);
            validators.push(quote! { .validator(#name, #validator) });
        }

        let accessible =
            parsed.primary_key || parsed.column.is_some() || !parsed.validators.is_empty() || name == "id";
        if accessible {
            get_arms.push(get_arm(&name, ident));
            set_arms.push(quote! {
                #name => {
                    self.#ident = <#ty as carafe_orm::FromValue>::from_value(value)
                        .map_err(|e| e.in_field(#name))?;
                }
            });
        }
    }

    let table = entity.table.as_ref().map(|t| quote! { .table(#t) });

    Ok(quote! {
        impl carafe_orm::Entity for #struct_name {
            fn schema() -> carafe_orm::EntitySchema {
                carafe_orm::EntitySchema::new(::core::any::type_name::<Self>())
                    #table
                    #(.field(#field_schemas))*
                    #(.relation(#relations))*
                    #(#validators)*
            }

            fn get_field(&self, field: &str) -> ::core::option::Option<carafe_orm::Value> {
                match field {
                    #(#get_arms)*
                    _ => ::core::option::Option::None,
                }
            }

            fn set_field(
                &mut self,
                field: &str,
                value: carafe_orm::Value,
            ) -> ::core::result::Result<(), carafe_orm::Error> {
                match field {
                    #(#set_arms)*
                    _ => {
                        return ::core::result::Result::Err(carafe_orm::Error::UnknownField {
                            entity: stringify!(#struct_name),
                            field: field.to_string(),
                        });
                    }
                }
                ::core::result::Result::Ok(())
            }
        }
    })
}

fn get_arm(name: &str, ident: &Ident) -> TokenStream {
    quote! {
        #name => ::core::option::Option::Some(
            carafe_orm::Value::from(::core::clone::Clone::clone(&self.#ident))
        ),
    }
}

fn column_tokens(column: &ColumnAttrs) -> TokenStream {
    let name = column.name.as_ref().map(|n| quote! { .name(#n) });
    let column_type = column.column_type.map(|v| {
        let ty = column_type_tokens(v);
        quote! { .column_type(#ty) }
    });
    let length = column.length.as_ref().map(|l| quote! { .length(#l) });
    let nullable = column.nullable.map(|n| quote! { .nullable(#n) });
    let default = column.default.as_ref().map(|d| quote! { .default(#d) });

    quote! { carafe_orm::ColumnAttr::new() #name #column_type #length #nullable #default }
}

fn relation_tokens(relation: &RelationAttr, field: Option<&str>) -> TokenStream {
    let kind = Ident::new(relation.kind, proc_macro2::Span::call_site());
    let related = &relation.related;
    let keys = relation.keys.iter().map(|(setter, value)| {
        let setter = Ident::new(setter, value.span());
        quote! { .#setter(#value) }
    });
    let field = field.map(|f| quote! { .field(#f) });

    quote! { carafe_orm::RelationDef::#kind::<#related>() #(#keys)* #field }
}

fn validator_tokens(rule: &ValidatorAttr) -> TokenStream {
    let v = quote! { carafe_orm::validation };
    let format = |f: &Option<syn::LitStr>| f.as_ref().map(|f| quote! { .format(#f) });

    let validator = match &rule.kind {
        ValidatorKind::Required => quote! { #v::Required::new() },
        ValidatorKind::NotEmpty => quote! { #v::NotEmpty::new() },
        ValidatorKind::MinLength(n) => quote! { #v::MinLength::new(#n) },
        ValidatorKind::MaxLength(n) => quote! { #v::MaxLength::new(#n) },
        ValidatorKind::Regex(pattern) => quote! { #v::Regex::new(#pattern) },
        ValidatorKind::Email => quote! { #v::Email::new() },
        ValidatorKind::NumberRange { min, max } => {
            quote! { #v::NumberRange::new((#min) as f64, (#max) as f64) }
        }
        ValidatorKind::DateFormat(f) => {
            let f = format(f);
            quote! { #v::DateFormat::new() #f }
        }
        ValidatorKind::DateTimeFormat(f) => {
            let f = format(f);
            quote! { #v::DateTimeFormat::new() #f }
        }
        ValidatorKind::TimeFormat(f) => {
            let f = format(f);
            quote! { #v::TimeFormat::new() #f }
        }
        ValidatorKind::DateRange { start, end, format: f } => {
            let start = start.as_ref().map(|s| quote! { .start(#s) });
            let end = end.as_ref().map(|e| quote! { .end(#e) });
            let f = format(f);
            quote! { #v::DateRange::new() #start #end #f }
        }
        ValidatorKind::IsPastDate(f) => {
            let f = format(f);
            quote! { #v::IsPastDate::new() #f }
        }
        ValidatorKind::IsPastDateTime(f) => {
            let f = format(f);
            quote! { #v::IsPastDateTime::new() #f }
        }
        ValidatorKind::Unique { table, field } => {
            let table = table.as_ref().map(|t| quote! { .table(#t) });
            let field = field.as_ref().map(|f| quote! { .field(#f) });
            quote! { #v::Unique::new() #table #field }
        }
        ValidatorKind::With(path) => {
            let name = path.segments.iter().map(|s| s.ident.to_string()).collect::<Vec<_>>().join("::");
            quote! { #v::Custom::new(#name, #path) }
        }
    };

    match &rule.message {
        Some(message) => quote! { #validator.with_message(#message) },
        None => validator,
    }
}
