//! Procedural macros for Carafe ORM.
//!
//! - `#[derive(Entity)]` reads `#[orm(...)]` attributes and implements `carafe_orm::Entity`.
//! - `#[derive(EntityEnum)]` maps unit-variant enums to text columns.

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod attrs;
mod derive_entity;
mod derive_enum;
mod types;

#[proc_macro_derive(Entity, attributes(orm))]
pub fn entity_derive(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    derive_entity::expand(ast).unwrap_or_else(syn::Error::into_compile_error).into()
}

#[proc_macro_derive(EntityEnum)]
pub fn entity_enum_derive(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    derive_enum::expand(ast).unwrap_or_else(syn::Error::into_compile_error).into()
}
