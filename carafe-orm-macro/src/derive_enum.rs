//! # Enum Derive Macro Implementation
//!
//! This module implements the procedural macro expansion for `#[derive(EntityEnum)]`.
//! Enums are stored as text columns holding the variant name; the expansion generates
//! `Display`, `FromStr`, `From<Enum> for Value` and `FromValue`.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields};

/// Expands the `#[derive(EntityEnum)]` macro.
pub fn expand(ast: DeriveInput) -> syn::Result<TokenStream> {
    let name = &ast.ident;

    let variants = match &ast.data {
        Data::Enum(data_enum) => &data_enum.variants,
        _ => return Err(syn::Error::new_spanned(name, "EntityEnum can only be derived for enums")),
    };
    if let Some(variant) = variants.iter().find(|v| !matches!(v.fields, Fields::Unit)) {
        return Err(syn::Error::new_spanned(variant, "EntityEnum variants cannot carry data"));
    }

    // Self::Variant => "Variant"
    let display_arms = variants.iter().map(|variant| {
        let ident = &variant.ident;
        let text = ident.to_string();
        quote! { Self::#ident => f.write_str(#text), }
    });

    // "Variant" => Ok(Self::Variant)
    let from_str_arms = variants.iter().map(|variant| {
        let ident = &variant.ident;
        let text = ident.to_string();
        quote! { #text => ::core::result::Result::Ok(Self::#ident), }
    });

    Ok(quote! {
        impl ::core::fmt::Display for #name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                match self {
                    #(#display_arms)*
                }
            }
        }

        impl ::core::str::FromStr for #name {
            type Err = String;

            fn from_str(s: &str) -> ::core::result::Result<Self, Self::Err> {
                match s {
                    #(#from_str_arms)*
                    _ => ::core::result::Result::Err(format!("Unknown variant: {}", s)),
                }
            }
        }

        impl ::core::convert::From<#name> for carafe_orm::Value {
            fn from(value: #name) -> Self {
                carafe_orm::Value::Text(value.to_string())
            }
        }

        impl carafe_orm::FromValue for #name {
            fn from_value(value: carafe_orm::Value) -> ::core::result::Result<Self, carafe_orm::Error> {
                match value {
                    carafe_orm::Value::Text(text) => text.parse().map_err(carafe_orm::Error::Conversion),
                    other => ::core::result::Result::Err(carafe_orm::Error::Conversion(format!(
                        "expected {} text, found {:?}",
                        stringify!(#name),
                        other
                    ))),
                }
            }
        }
    })
}
