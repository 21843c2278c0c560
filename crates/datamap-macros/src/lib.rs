//! Procedural macros for the datamap ORM.
//!
//! - `#[derive(Entity)]` turns a record struct plus its `#[datamap(..)]`
//!   markers into an `EntityDescriptor` and the runtime `Entity` impl.
//! - `#[derive(IndexedEnum)]` stores an enum as its declared integer index.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;

mod infer;
mod parse;

use infer::{classify, to_snake_case, FieldKind, Scalar};
use parse::{parse_entity, validate_entity, variant_index, EntityDef, FieldDef};

/// Derive macro for the `Entity` trait.
///
/// # Attributes
///
/// Struct level:
/// - `#[datamap(table = "name", schema = "schema")]` - override table name
/// - `#[datamap(migration(version = 1, sql = "ALTER TABLE .."))]` - schema
///   migration step (repeatable; statements of one version share a
///   transaction)
///
/// Field level:
/// - `#[datamap(id)]` - primary key
/// - `#[datamap(key)]` - secondary key (keyed locator)
/// - `#[datamap(length = 32)]` - VARCHAR length
/// - `#[datamap(column = "name")]` - column name override
/// - `#[datamap(column_type(sql = "..", sqlite = ".."))]` - explicit types
/// - `#[datamap(ignore)]` - excluded from storage, defaulted on read
/// - `#[datamap(link(fk = "col"))]` - one-to-one link on `Option<Target>`
/// - `#[datamap(indexed_enum)]` - store an `IndexedEnum` as its index
/// - `#[datamap(custom)]` - store through the type's `CustomColumn` impl
///
/// Collection fields are recognized from their static type: `Vec<T>`
/// (List), `BTreeSet<T>`/`HashSet<T>` (Set), `BTreeMap<String, T>`/
/// `HashMap<String, T>` (Map). Without `#[datamap(id)]` a synthetic
/// auto-increment `id` column is injected.
#[proc_macro_derive(Entity, attributes(datamap))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);
    let def = match parse_entity(&input) {
        Ok(def) => def,
        Err(e) => return e.to_compile_error().into(),
    };
    if let Err(e) = validate_entity(&def) {
        return e.to_compile_error().into();
    }
    match generate_entity(&def) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

struct FieldPlan<'a> {
    def: &'a FieldDef,
    kind: FieldKind,
    column: String,
}

fn generate_entity(def: &EntityDef) -> syn::Result<TokenStream2> {
    let name = &def.ident;
    let entity_name = name.to_string();
    let table = def
        .table
        .clone()
        .unwrap_or_else(|| to_snake_case(&entity_name));
    let schema_tokens = match &def.schema {
        Some(s) => quote!(::core::option::Option::Some(#s)),
        None => quote!(::core::option::Option::None),
    };

    let mut plans = Vec::new();
    for field in &def.fields {
        let kind = classify(field)?;
        let column = field
            .column
            .clone()
            .unwrap_or_else(|| match (&kind, &field.link_fk) {
                (FieldKind::Link { .. }, Some(fk)) => fk.clone(),
                _ => to_snake_case(&field.ident.to_string()),
            });
        plans.push(FieldPlan {
            def: field,
            kind,
            column,
        });
    }

    let has_id = plans
        .iter()
        .any(|p| p.def.id && !matches!(p.kind, FieldKind::Ignored));
    let synthetic = !has_id;

    let mut column_tokens: Vec<TokenStream2> = Vec::new();
    if synthetic {
        column_tokens.push(quote!(datamap_core::entity::synthetic_id_column()));
    }
    let mut link_tokens: Vec<TokenStream2> = Vec::new();
    let mut collection_tokens: Vec<TokenStream2> = Vec::new();
    let mut defaulted_tokens: Vec<TokenStream2> = Vec::new();
    let mut to_row_entries: Vec<TokenStream2> = Vec::new();
    let mut from_row_fields: Vec<TokenStream2> = Vec::new();
    let mut save_link_stmts: Vec<TokenStream2> = Vec::new();
    let mut collections_entries: Vec<TokenStream2> = Vec::new();
    let mut set_collection_arms: Vec<TokenStream2> = Vec::new();
    let mut pk_value: Option<TokenStream2> = None;
    let mut locator_entries: Vec<TokenStream2> = Vec::new();

    for plan in &plans {
        let ident = &plan.def.ident;
        let field_name = ident.to_string();
        let column = plan.column.as_str();

        match &plan.kind {
            FieldKind::Ignored => {
                defaulted_tokens.push(quote!(#field_name));
                from_row_fields
                    .push(quote!(#ident: ::core::default::Default::default()));
            }

            FieldKind::Scalar { scalar, optional } => {
                let ty_tokens = column_type_tokens(plan, Some(*scalar), None);
                column_tokens.push(column_descriptor(plan, column, ty_tokens, *optional, false));
                let value_expr = quote!(datamap_core::Value::from(self.#ident.clone()));
                to_row_entries.push(quote!((#column, #value_expr)));
                from_row_fields.push(quote!(#ident: row.get_at(prefix, #column)?));
                record_keys(
                    plan,
                    column,
                    &value_expr,
                    &mut pk_value,
                    &mut locator_entries,
                );
            }

            FieldKind::Enum { inner, optional } => {
                let ty_tokens = column_type_tokens(plan, None, None);
                column_tokens.push(column_descriptor(plan, column, ty_tokens, *optional, false));
                let value_expr = if *optional {
                    quote!(match &self.#ident {
                        ::core::option::Option::Some(v) => datamap_core::codec::encode_enum(v),
                        ::core::option::Option::None => datamap_core::Value::Null,
                    })
                } else {
                    quote!(datamap_core::codec::encode_enum(&self.#ident))
                };
                to_row_entries.push(quote!((#column, #value_expr)));
                let read = if *optional {
                    quote!(#ident: {
                        let v = row.value_at(prefix, #column)?;
                        if v.is_null() {
                            ::core::option::Option::None
                        } else {
                            ::core::option::Option::Some(
                                datamap_core::codec::decode_enum::<#inner>(v.clone())?,
                            )
                        }
                    })
                } else {
                    quote!(#ident: datamap_core::codec::decode_enum::<#inner>(
                        row.value_at(prefix, #column)?.clone(),
                    )?)
                };
                from_row_fields.push(read);
                record_keys(
                    plan,
                    column,
                    &quote!(datamap_core::codec::encode_enum(&self.#ident)),
                    &mut pk_value,
                    &mut locator_entries,
                );
            }

            FieldKind::Custom { inner, optional } => {
                let ty_tokens = column_type_tokens(plan, None, Some(inner));
                column_tokens.push(column_descriptor(plan, column, ty_tokens, *optional, false));
                let value_expr = if *optional {
                    quote!(match &self.#ident {
                        ::core::option::Option::Some(v) => {
                            <#inner as datamap_core::CustomColumn>::encode(v)
                        }
                        ::core::option::Option::None => datamap_core::Value::Null,
                    })
                } else {
                    quote!(<#inner as datamap_core::CustomColumn>::encode(&self.#ident))
                };
                to_row_entries.push(quote!((#column, #value_expr)));
                let read = if *optional {
                    quote!(#ident: {
                        let v = row.value_at(prefix, #column)?;
                        if v.is_null() {
                            ::core::option::Option::None
                        } else {
                            ::core::option::Option::Some(
                                <#inner as datamap_core::CustomColumn>::decode(v.clone())?,
                            )
                        }
                    })
                } else {
                    quote!(#ident: <#inner as datamap_core::CustomColumn>::decode(
                        row.value_at(prefix, #column)?.clone(),
                    )?)
                };
                from_row_fields.push(read);
                record_keys(
                    plan,
                    column,
                    &quote!(<#inner as datamap_core::CustomColumn>::encode(&self.#ident)),
                    &mut pk_value,
                    &mut locator_entries,
                );
            }

            FieldKind::Link { target } => {
                // The foreign key stores the target's primary key; DDL
                // resolves its type from the target descriptor.
                let ty_tokens =
                    quote!(datamap_core::ColumnType::Builtin(datamap_core::SqlType::BigInt));
                column_tokens.push(column_descriptor(plan, column, ty_tokens, true, true));
                link_tokens.push(quote!(datamap_core::LinkDescriptor {
                    field_name: #field_name,
                    fk_column: #column,
                    target: <#target as datamap_core::Entity>::descriptor,
                }));
                to_row_entries.push(quote!((#column, match &self.#ident {
                    ::core::option::Option::Some(t) => {
                        datamap_core::Entity::primary_key_value(t)
                    }
                    ::core::option::Option::None => datamap_core::Value::Null,
                })));
                from_row_fields.push(quote!(#ident: {
                    let child_prefix = ::std::format!("{}__link__{}__", prefix, #column);
                    let target_desc = <#target as datamap_core::Entity>::descriptor();
                    let pk_col = target_desc
                        .primary_key()
                        .map(|c| c.column_name)
                        .unwrap_or("id");
                    match row.get_by_name(&::std::format!("{}{}", child_prefix, pk_col)) {
                        ::core::option::Option::Some(v) if !v.is_null() => {
                            ::core::option::Option::Some(
                                <#target as datamap_core::Entity>::from_row(row, &child_prefix)?,
                            )
                        }
                        _ => ::core::option::Option::None,
                    }
                }));
                save_link_stmts.push(quote!(match &self.#ident {
                    ::core::option::Option::Some(target) => {
                        out.push((#column, datamap_core::link::persist_graph(target, env, ex)?));
                    }
                    ::core::option::Option::None => {
                        out.push((#column, datamap_core::Value::Null));
                    }
                }));
            }

            FieldKind::List { elem: _, scalar } => {
                let fty = &plan.def.ty;
                collection_tokens.push(collection_descriptor(
                    plan,
                    quote!(datamap_core::CollectionKind::List),
                    *scalar,
                ));
                from_row_fields
                    .push(quote!(#ident: ::core::default::Default::default()));
                collections_entries.push(quote!((
                    #field_name,
                    datamap_core::CollectionValue::List(
                        self.#ident
                            .iter()
                            .map(|v| datamap_core::Value::from(v.clone()))
                            .collect(),
                    )
                )));
                set_collection_arms.push(quote!(#field_name => {
                    if let datamap_core::CollectionValue::List(items) = value {
                        self.#ident = items
                            .into_iter()
                            .map(|v| ::core::convert::TryFrom::try_from(v))
                            .collect::<datamap_core::Result<#fty>>()?;
                    }
                }));
            }

            FieldKind::Set { elem: _, scalar } => {
                let fty = &plan.def.ty;
                collection_tokens.push(collection_descriptor(
                    plan,
                    quote!(datamap_core::CollectionKind::Set),
                    *scalar,
                ));
                from_row_fields
                    .push(quote!(#ident: ::core::default::Default::default()));
                collections_entries.push(quote!((
                    #field_name,
                    datamap_core::CollectionValue::Set(
                        self.#ident
                            .iter()
                            .map(|v| datamap_core::Value::from(v.clone()))
                            .collect(),
                    )
                )));
                set_collection_arms.push(quote!(#field_name => {
                    if let datamap_core::CollectionValue::Set(items) = value {
                        self.#ident = items
                            .into_iter()
                            .map(|v| ::core::convert::TryFrom::try_from(v))
                            .collect::<datamap_core::Result<#fty>>()?;
                    }
                }));
            }

            FieldKind::Map { value: _, scalar } => {
                let fty = &plan.def.ty;
                collection_tokens.push(collection_descriptor(
                    plan,
                    quote!(datamap_core::CollectionKind::Map),
                    *scalar,
                ));
                from_row_fields
                    .push(quote!(#ident: ::core::default::Default::default()));
                collections_entries.push(quote!((
                    #field_name,
                    datamap_core::CollectionValue::Map(
                        self.#ident
                            .iter()
                            .map(|(k, v)| (k.clone(), datamap_core::Value::from(v.clone())))
                            .collect(),
                    )
                )));
                set_collection_arms.push(quote!(#field_name => {
                    if let datamap_core::CollectionValue::Map(pairs) = value {
                        self.#ident = pairs
                            .into_iter()
                            .map(|(k, v)| {
                                ::core::result::Result::Ok((
                                    k,
                                    ::core::convert::TryFrom::try_from(v)?,
                                ))
                            })
                            .collect::<datamap_core::Result<#fty>>()?;
                    }
                }));
            }
        }
    }

    let pk_value = pk_value.unwrap_or(quote!(datamap_core::Value::Null));
    if locator_entries.is_empty() {
        locator_entries.push(quote!(("id", datamap_core::Value::Null)));
    }

    let mut migration_tokens: Vec<TokenStream2> = Vec::new();
    let mut versions: Vec<u32> = def.migrations.iter().map(|(v, _)| *v).collect();
    versions.sort_unstable();
    versions.dedup();
    for version in versions {
        let stmts: Vec<&String> = def
            .migrations
            .iter()
            .filter(|(v, _)| *v == version)
            .map(|(_, s)| s)
            .collect();
        migration_tokens.push(quote!(datamap_core::MigrationStep::new(
            #version,
            [#(#stmts),*],
        )));
    }

    Ok(quote! {
        impl datamap_core::Entity for #name {
            fn descriptor() -> &'static datamap_core::EntityDescriptor {
                static DESCRIPTOR: ::std::sync::OnceLock<datamap_core::EntityDescriptor> =
                    ::std::sync::OnceLock::new();
                DESCRIPTOR.get_or_init(|| datamap_core::EntityDescriptor {
                    entity_name: #entity_name,
                    table_name: #table,
                    schema: #schema_tokens,
                    columns: ::std::vec![#(#column_tokens),*],
                    links: ::std::vec![#(#link_tokens),*],
                    collections: ::std::vec![#(#collection_tokens),*],
                    defaulted_fields: ::std::vec![#(#defaulted_tokens),*],
                    migrations: ::std::vec![#(#migration_tokens),*],
                    synthetic_pk: #synthetic,
                })
            }

            fn to_row(&self) -> ::std::vec::Vec<(&'static str, datamap_core::Value)> {
                ::std::vec![#(#to_row_entries),*]
            }

            #[allow(unused_variables)]
            fn from_row(
                row: &datamap_core::Row,
                prefix: &str,
            ) -> datamap_core::Result<Self> {
                ::core::result::Result::Ok(Self {
                    #(#from_row_fields,)*
                })
            }

            fn primary_key_value(&self) -> datamap_core::Value {
                #pk_value
            }

            fn locator(&self) -> ::std::vec::Vec<(&'static str, datamap_core::Value)> {
                ::std::vec![#(#locator_entries),*]
            }

            #[allow(unused_variables, unused_mut)]
            fn save_links(
                &self,
                env: &datamap_core::SqlEnv,
                ex: &mut dyn datamap_core::Executor,
            ) -> datamap_core::Result<::std::vec::Vec<(&'static str, datamap_core::Value)>> {
                let mut out = ::std::vec::Vec::new();
                #(#save_link_stmts)*
                ::core::result::Result::Ok(out)
            }

            fn collections(
                &self,
            ) -> ::std::vec::Vec<(&'static str, datamap_core::CollectionValue)> {
                ::std::vec![#(#collections_entries),*]
            }

            #[allow(unused_variables)]
            fn set_collection(
                &mut self,
                field: &str,
                value: datamap_core::CollectionValue,
            ) -> datamap_core::Result<()> {
                match field {
                    #(#set_collection_arms)*
                    _ => {}
                }
                ::core::result::Result::Ok(())
            }
        }
    })
}

fn record_keys(
    plan: &FieldPlan<'_>,
    column: &str,
    value_expr: &TokenStream2,
    pk_value: &mut Option<TokenStream2>,
    locator_entries: &mut Vec<TokenStream2>,
) {
    if plan.def.id {
        *pk_value = Some(value_expr.clone());
        locator_entries.insert(0, quote!((#column, #value_expr)));
    } else if plan.def.key {
        locator_entries.push(quote!((#column, #value_expr)));
    }
}

fn column_descriptor(
    plan: &FieldPlan<'_>,
    column: &str,
    ty_tokens: TokenStream2,
    nullable: bool,
    link_fk: bool,
) -> TokenStream2 {
    let field_name = plan.def.ident.to_string();
    let length = plan.def.length.unwrap_or(0);
    let id = plan.def.id;
    let key = plan.def.key;
    quote!(datamap_core::ColumnDescriptor::new(#field_name, #column, #ty_tokens)
        .length(#length)
        .nullable(#nullable)
        .primary_key(#id)
        .secondary_key(#key)
        .link_fk(#link_fk))
}

fn column_type_tokens(
    plan: &FieldPlan<'_>,
    scalar: Option<Scalar>,
    custom_inner: Option<&syn::Type>,
) -> TokenStream2 {
    if let Some((sql, sqlite)) = &plan.def.column_type {
        return quote!(datamap_core::ColumnType::Custom {
            sql: #sql,
            sqlite: #sqlite,
        });
    }
    if let Some(inner) = custom_inner {
        return quote!(datamap_core::ColumnType::Custom {
            sql: <#inner as datamap_core::CustomColumn>::SQL_TYPE,
            sqlite: <#inner as datamap_core::CustomColumn>::SQLITE_TYPE,
        });
    }
    match scalar {
        Some(scalar) => {
            let sql_type = scalar.sql_type_tokens();
            quote!(datamap_core::ColumnType::Builtin(#sql_type))
        }
        // Indexed enums.
        None => quote!(datamap_core::ColumnType::Builtin(
            datamap_core::SqlType::IndexedEnum
        )),
    }
}

fn collection_descriptor(
    plan: &FieldPlan<'_>,
    kind: TokenStream2,
    scalar: Scalar,
) -> TokenStream2 {
    let field_name = plan.def.ident.to_string();
    let length = plan.def.length.unwrap_or(0);
    let element = if let Some((sql, sqlite)) = &plan.def.column_type {
        quote!(datamap_core::ColumnType::Custom { sql: #sql, sqlite: #sqlite })
    } else {
        let sql_type = scalar.sql_type_tokens();
        quote!(datamap_core::ColumnType::Builtin(#sql_type))
    };
    quote!(datamap_core::CollectionDescriptor {
        field_name: #field_name,
        kind: #kind,
        element: #element,
        element_length: #length,
    })
}

/// Derive macro for the `IndexedEnum` trait.
///
/// Variants may carry `#[datamap(index = n)]`; without it, the declaration
/// position is the index. Unit variants only; the enum must be `Copy`.
#[proc_macro_derive(IndexedEnum, attributes(datamap))]
pub fn derive_indexed_enum(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);
    match generate_indexed_enum(&input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn generate_indexed_enum(input: &syn::DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let syn::Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            name,
            "#[derive(IndexedEnum)] only supports enums",
        ));
    };

    let mut variants = Vec::new();
    let mut indices = Vec::new();
    for (position, variant) in data.variants.iter().enumerate() {
        if !matches!(variant.fields, syn::Fields::Unit) {
            return Err(syn::Error::new_spanned(
                &variant.ident,
                "IndexedEnum variants must be unit variants",
            ));
        }
        let index = variant_index(&variant.attrs)?.unwrap_or(position as i64);
        variants.push(&variant.ident);
        indices.push(index);
    }

    Ok(quote! {
        impl datamap_core::IndexedEnum for #name {
            const VARIANTS: &'static [#name] = &[#(#name::#variants),*];

            fn index(&self) -> i64 {
                match self {
                    #(#name::#variants => #indices),*
                }
            }
        }
    })
}
