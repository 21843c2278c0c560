//! Field classification from static types.
//!
//! The derive reads each field's Rust type once and decides how it is
//! stored: scalar column, indexed enum, custom codec, link, or a
//! child-table collection.

use crate::parse::FieldDef;
use syn::{Error, GenericArgument, PathArguments, Result, Type};

/// Built-in scalar mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    Text,
    Int,
    BigInt,
    Double,
    Bool,
    Bytes,
}

impl Scalar {
    /// Tokens naming the matching `datamap_core::SqlType` variant.
    pub fn sql_type_tokens(self) -> proc_macro2::TokenStream {
        match self {
            Scalar::Text => quote::quote!(datamap_core::SqlType::Text),
            Scalar::Int => quote::quote!(datamap_core::SqlType::Int),
            Scalar::BigInt => quote::quote!(datamap_core::SqlType::BigInt),
            Scalar::Double => quote::quote!(datamap_core::SqlType::Double),
            Scalar::Bool => quote::quote!(datamap_core::SqlType::Bool),
            Scalar::Bytes => quote::quote!(datamap_core::SqlType::Bytes),
        }
    }
}

/// How a field is stored.
pub enum FieldKind {
    /// Ignored: never read or written, defaulted on materialization.
    Ignored,
    /// One built-in scalar column.
    Scalar { scalar: Scalar, optional: bool },
    /// Indexed-enum column.
    Enum { inner: Type, optional: bool },
    /// Custom codec column; for collections this is the flattened form.
    Custom { inner: Type, optional: bool },
    /// `Option<Target>` link through a foreign-key column.
    Link { target: Type },
    /// `Vec<T>` child table.
    List { elem: Type, scalar: Scalar },
    /// `BTreeSet<T>` / `HashSet<T>` child table.
    Set { elem: Type, scalar: Scalar },
    /// `BTreeMap<String, V>` / `HashMap<String, V>` child table.
    Map { value: Type, scalar: Scalar },
}

fn segment(ty: &Type) -> Option<&syn::PathSegment> {
    match ty {
        Type::Path(path) if path.qself.is_none() => path.path.segments.last(),
        _ => None,
    }
}

fn type_args(seg: &syn::PathSegment) -> Vec<&Type> {
    match &seg.arguments {
        PathArguments::AngleBracketed(args) => args
            .args
            .iter()
            .filter_map(|a| match a {
                GenericArgument::Type(t) => Some(t),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn scalar_of(ty: &Type) -> Option<Scalar> {
    let seg = segment(ty)?;
    let name = seg.ident.to_string();
    match name.as_str() {
        "String" => Some(Scalar::Text),
        "bool" => Some(Scalar::Bool),
        "i8" | "i16" | "i32" | "u8" | "u16" => Some(Scalar::Int),
        "i64" | "u32" | "u64" | "usize" | "isize" => Some(Scalar::BigInt),
        "f32" | "f64" => Some(Scalar::Double),
        "Vec" => {
            let args = type_args(seg);
            match args.as_slice() {
                [inner] if matches!(scalar_of(inner), Some(Scalar::Int))
                    && segment(inner).is_some_and(|s| s.ident == "u8") =>
                {
                    Some(Scalar::Bytes)
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn option_inner(ty: &Type) -> Option<&Type> {
    let seg = segment(ty)?;
    if seg.ident != "Option" {
        return None;
    }
    type_args(seg).first().copied()
}

/// Classify a field from its markers and static type.
pub fn classify(field: &FieldDef) -> Result<FieldKind> {
    if field.ignore {
        return Ok(FieldKind::Ignored);
    }

    if let Some(_fk) = &field.link_fk {
        let Some(target) = option_inner(&field.ty) else {
            return Err(Error::new_spanned(
                &field.ident,
                "link fields must be Option<Target>",
            ));
        };
        return Ok(FieldKind::Link {
            target: target.clone(),
        });
    }

    let (bare, optional) = match option_inner(&field.ty) {
        Some(inner) => (inner.clone(), true),
        None => (field.ty.clone(), false),
    };

    if field.indexed_enum {
        return Ok(FieldKind::Enum {
            inner: bare,
            optional,
        });
    }
    if field.custom {
        // A custom codec on a collection type is the flattened form; the
        // codec decides the single column's type.
        return Ok(FieldKind::Custom {
            inner: bare,
            optional,
        });
    }

    if let Some(scalar) = scalar_of(&bare) {
        return Ok(FieldKind::Scalar { scalar, optional });
    }

    if let Some(seg) = segment(&bare) {
        let name = seg.ident.to_string();
        let args = type_args(seg);
        match (name.as_str(), args.as_slice()) {
            ("Vec", [elem]) => {
                let scalar = element_scalar(&field.ident, elem)?;
                return Ok(FieldKind::List {
                    elem: (*elem).clone(),
                    scalar,
                });
            }
            ("BTreeSet" | "HashSet", [elem]) => {
                let scalar = element_scalar(&field.ident, elem)?;
                return Ok(FieldKind::Set {
                    elem: (*elem).clone(),
                    scalar,
                });
            }
            ("BTreeMap" | "HashMap", [key, value]) => {
                if segment(key).is_none_or(|s| s.ident != "String") {
                    return Err(Error::new_spanned(
                        &field.ident,
                        "map collections require String keys",
                    ));
                }
                let scalar = element_scalar(&field.ident, value)?;
                return Ok(FieldKind::Map {
                    value: (*value).clone(),
                    scalar,
                });
            }
            _ => {}
        }
    }

    Err(Error::new_spanned(
        &field.ident,
        "unsupported field type; mark it #[datamap(custom)], #[datamap(indexed_enum)], \
         #[datamap(link(fk = ..))] or #[datamap(ignore)]",
    ))
}

fn element_scalar(ident: &syn::Ident, elem: &Type) -> Result<Scalar> {
    scalar_of(elem).ok_or_else(|| {
        Error::new_spanned(
            ident,
            "collection elements must be built-in scalars; register a custom codec \
             and mark the field #[datamap(custom)] to flatten it instead",
        )
    })
}

/// Lowercase snake_case of a type or field name.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case() {
        assert_eq!(to_snake_case("PlayerHome"), "player_home");
        assert_eq!(to_snake_case("URL"), "u_r_l");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }

    fn ty(tokens: &str) -> Type {
        syn::parse_str(tokens).unwrap()
    }

    #[test]
    fn scalar_detection() {
        assert_eq!(scalar_of(&ty("String")), Some(Scalar::Text));
        assert_eq!(scalar_of(&ty("i64")), Some(Scalar::BigInt));
        assert_eq!(scalar_of(&ty("f64")), Some(Scalar::Double));
        assert_eq!(scalar_of(&ty("Vec<u8>")), Some(Scalar::Bytes));
        assert_eq!(scalar_of(&ty("Vec<String>")), None);
    }

    #[test]
    fn option_unwrapping() {
        assert!(option_inner(&ty("Option<i32>")).is_some());
        assert!(option_inner(&ty("i32")).is_none());
    }
}
