//! Attribute parsing for the derive macros.
//!
//! Extracts struct-level and field-level `#[datamap(..)]` attributes into
//! the definitions consumed by code generation.

use syn::{Attribute, Data, DeriveInput, Error, Fields, Ident, Result, Type};

/// Parsed struct-level configuration.
pub struct EntityDef {
    pub ident: Ident,
    pub table: Option<String>,
    pub schema: Option<String>,
    /// `(version, statement)` pairs; statements of one version merge.
    pub migrations: Vec<(u32, String)>,
    pub fields: Vec<FieldDef>,
}

/// Parsed field-level configuration.
pub struct FieldDef {
    pub ident: Ident,
    pub ty: Type,
    pub column: Option<String>,
    pub id: bool,
    pub key: bool,
    pub length: Option<u32>,
    /// `(sql, sqlite)` from `column_type(..)`.
    pub column_type: Option<(String, String)>,
    pub ignore: bool,
    /// Foreign-key column from `link(fk = ..)`.
    pub link_fk: Option<String>,
    pub indexed_enum: bool,
    pub custom: bool,
}

/// Parse a `#[derive(Entity)]` input.
pub fn parse_entity(input: &DeriveInput) -> Result<EntityDef> {
    let Data::Struct(data) = &input.data else {
        return Err(Error::new_spanned(
            &input.ident,
            "#[derive(Entity)] only supports structs",
        ));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(Error::new_spanned(
            &input.ident,
            "#[derive(Entity)] requires named fields",
        ));
    };

    let mut def = EntityDef {
        ident: input.ident.clone(),
        table: None,
        schema: None,
        migrations: Vec::new(),
        fields: Vec::new(),
    };

    for attr in &input.attrs {
        if !attr.path().is_ident("datamap") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                def.table = Some(meta.value()?.parse::<syn::LitStr>()?.value());
            } else if meta.path.is_ident("schema") {
                def.schema = Some(meta.value()?.parse::<syn::LitStr>()?.value());
            } else if meta.path.is_ident("migration") {
                let mut version: Option<u32> = None;
                let mut sql: Option<String> = None;
                meta.parse_nested_meta(|inner| {
                    if inner.path.is_ident("version") {
                        version = Some(inner.value()?.parse::<syn::LitInt>()?.base10_parse()?);
                    } else if inner.path.is_ident("sql") {
                        sql = Some(inner.value()?.parse::<syn::LitStr>()?.value());
                    } else {
                        return Err(inner.error("expected `version` or `sql`"));
                    }
                    Ok(())
                })?;
                match (version, sql) {
                    (Some(version), Some(sql)) => def.migrations.push((version, sql)),
                    _ => {
                        return Err(meta
                            .error("migration requires both `version = n` and `sql = \"..\"`"));
                    }
                }
            } else {
                return Err(meta.error("unknown datamap attribute on struct"));
            }
            Ok(())
        })?;
    }

    for field in &fields.named {
        def.fields.push(parse_field(field)?);
    }
    Ok(def)
}

fn parse_field(field: &syn::Field) -> Result<FieldDef> {
    let ident = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "unnamed field"))?;
    let mut def = FieldDef {
        ident,
        ty: field.ty.clone(),
        column: None,
        id: false,
        key: false,
        length: None,
        column_type: None,
        ignore: false,
        link_fk: None,
        indexed_enum: false,
        custom: false,
    };

    for attr in &field.attrs {
        if !attr.path().is_ident("datamap") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                def.id = true;
            } else if meta.path.is_ident("key") {
                def.key = true;
            } else if meta.path.is_ident("ignore") {
                def.ignore = true;
            } else if meta.path.is_ident("indexed_enum") {
                def.indexed_enum = true;
            } else if meta.path.is_ident("custom") {
                def.custom = true;
            } else if meta.path.is_ident("length") {
                def.length = Some(meta.value()?.parse::<syn::LitInt>()?.base10_parse()?);
            } else if meta.path.is_ident("column") {
                def.column = Some(meta.value()?.parse::<syn::LitStr>()?.value());
            } else if meta.path.is_ident("column_type") {
                let mut sql: Option<String> = None;
                let mut sqlite: Option<String> = None;
                meta.parse_nested_meta(|inner| {
                    if inner.path.is_ident("sql") {
                        sql = Some(inner.value()?.parse::<syn::LitStr>()?.value());
                    } else if inner.path.is_ident("sqlite") {
                        sqlite = Some(inner.value()?.parse::<syn::LitStr>()?.value());
                    } else {
                        return Err(inner.error("expected `sql` or `sqlite`"));
                    }
                    Ok(())
                })?;
                let sql = sql
                    .ok_or_else(|| meta.error("column_type requires `sql = \"..\"`"))?;
                // The server-side type doubles as the SQLite type unless
                // overridden.
                let sqlite = sqlite.unwrap_or_else(|| sql.clone());
                def.column_type = Some((sql, sqlite));
            } else if meta.path.is_ident("link") {
                let mut fk: Option<String> = None;
                meta.parse_nested_meta(|inner| {
                    if inner.path.is_ident("fk") {
                        fk = Some(inner.value()?.parse::<syn::LitStr>()?.value());
                    } else {
                        return Err(inner.error("expected `fk`"));
                    }
                    Ok(())
                })?;
                def.link_fk =
                    Some(fk.ok_or_else(|| meta.error("link requires `fk = \"..\"`"))?);
            } else {
                return Err(meta.error("unknown datamap attribute on field"));
            }
            Ok(())
        })?;
    }
    Ok(def)
}

/// Validate marker combinations before generation.
pub fn validate_entity(def: &EntityDef) -> Result<()> {
    let id_count = def.fields.iter().filter(|f| f.id && !f.ignore).count();
    if id_count > 1 {
        return Err(Error::new_spanned(
            &def.ident,
            "at most one field may carry #[datamap(id)]",
        ));
    }
    for field in &def.fields {
        if field.ignore
            && (field.id || field.key || field.link_fk.is_some() || field.custom)
        {
            return Err(Error::new_spanned(
                &field.ident,
                "#[datamap(ignore)] cannot combine with other markers",
            ));
        }
        if field.indexed_enum && field.custom {
            return Err(Error::new_spanned(
                &field.ident,
                "a field is either an indexed enum or a custom column, not both",
            ));
        }
        if field.link_fk.is_some() && (field.id || field.key) {
            return Err(Error::new_spanned(
                &field.ident,
                "a link field cannot be a key",
            ));
        }
    }
    Ok(())
}

/// Helper to parse attributes of enum variants for `IndexedEnum`.
pub fn variant_index(attrs: &[Attribute]) -> Result<Option<i64>> {
    let mut index = None;
    for attr in attrs {
        if !attr.path().is_ident("datamap") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("index") {
                index = Some(meta.value()?.parse::<syn::LitInt>()?.base10_parse()?);
                Ok(())
            } else {
                Err(meta.error("expected `index = n`"))
            }
        })?;
    }
    Ok(index)
}
