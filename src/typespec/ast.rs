//! Type-spec AST
//!
//! [`TypeExpr`] is the tagged variant the type-spec parser produces. It is a
//! tree of owned children; named types are referenced by string so the graph
//! stays acyclic even when registered types reference each other lexically.
//! `Display` re-emits the canonical definition string.

use std::fmt;

/// A declared record field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeExpr,
}

impl FieldDecl {
    /// A field is optional when its type admits nil
    pub fn is_optional(&self) -> bool {
        self.ty.admits_nil()
    }
}

/// Which sibling column a self-reference points at
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SelfKey {
    Field(String),
    /// 1-based column position
    Index(usize),
}

impl fmt::Display for SelfKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelfKey::Field(name) => write!(f, "self.{}", name),
            SelfKey::Index(i) => write!(f, "self._{}", i),
        }
    }
}

/// A parsed type-spec expression
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    /// Reference to a primitive or registered alias by name
    Named(String),
    Nil,
    /// The set-valued `true` type (map values only)
    True,
    /// Alternatives in declaration order; `nil`, if present, is last
    Union(Vec<TypeExpr>),
    Array(Box<TypeExpr>),
    Map(Box<TypeExpr>, Box<TypeExpr>),
    /// Bare `{}`
    Table,
    /// Positional elements, length >= 2
    Tuple(Vec<TypeExpr>),
    /// Declared fields in order, length >= 2
    Record(Vec<FieldDecl>),
    /// Identifier labels in order
    Enum(Vec<String>),
    /// `{extends:Parent,field:Spec,...}`
    ExtendsRecord {
        parent: String,
        fields: Vec<FieldDecl>,
    },
    /// `{extends,Parent,Spec,...}`
    ExtendsTuple {
        parent: String,
        elems: Vec<TypeExpr>,
    },
    /// `{extends,T}`: the cell must name a type extending `T`.
    /// `None` is the `{extends_}` wildcard: any registered type.
    Ancestor(Option<String>),
    /// `self.field` / `self._N`: the column's type is the value of a sibling
    SelfRef(SelfKey),
}

impl TypeExpr {
    /// Does this expression accept the empty cell (nil)?
    pub fn admits_nil(&self) -> bool {
        match self {
            TypeExpr::Nil => true,
            TypeExpr::Union(alts) => alts.iter().any(TypeExpr::admits_nil),
            _ => false,
        }
    }

    /// The non-nil alternatives of a union, or the expression itself
    pub fn without_nil(&self) -> Vec<&TypeExpr> {
        match self {
            TypeExpr::Union(alts) => alts.iter().filter(|a| !matches!(a, TypeExpr::Nil)).collect(),
            other => vec![other],
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Named(name) => write!(f, "{}", name),
            TypeExpr::Nil => write!(f, "nil"),
            TypeExpr::True => write!(f, "true"),
            TypeExpr::Union(alts) => {
                for (i, alt) in alts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{}", alt)?;
                }
                Ok(())
            }
            TypeExpr::Array(elem) => write!(f, "{{{}}}", elem),
            TypeExpr::Map(key, value) => write!(f, "{{{}:{}}}", key, value),
            TypeExpr::Table => write!(f, "{{}}"),
            TypeExpr::Tuple(elems) => {
                write!(f, "{{")?;
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", elem)?;
                }
                write!(f, "}}")
            }
            TypeExpr::Record(fields) => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}:{}", field.name, field.ty)?;
                }
                write!(f, "}}")
            }
            TypeExpr::Enum(labels) => {
                write!(f, "{{enum:")?;
                for (i, label) in labels.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{}", label)?;
                }
                write!(f, "}}")
            }
            TypeExpr::ExtendsRecord { parent, fields } => {
                write!(f, "{{extends:{}", parent)?;
                for field in fields {
                    write!(f, ",{}:{}", field.name, field.ty)?;
                }
                write!(f, "}}")
            }
            TypeExpr::ExtendsTuple { parent, elems } => {
                write!(f, "{{extends,{}", parent)?;
                for elem in elems {
                    write!(f, ",{}", elem)?;
                }
                write!(f, "}}")
            }
            TypeExpr::Ancestor(Some(name)) => write!(f, "{{extends,{}}}", name),
            TypeExpr::Ancestor(None) => write!(f, "{{extends_}}"),
            TypeExpr::SelfRef(key) => write!(f, "{}", key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trips_shape() {
        let spec = TypeExpr::Union(vec![
            TypeExpr::Named("integer".into()),
            TypeExpr::Named("string".into()),
            TypeExpr::Nil,
        ]);
        assert_eq!(spec.to_string(), "integer|string|nil");
    }

    #[test]
    fn test_admits_nil() {
        let spec = TypeExpr::Union(vec![TypeExpr::Named("integer".into()), TypeExpr::Nil]);
        assert!(spec.admits_nil());
        assert!(!TypeExpr::Named("integer".into()).admits_nil());
    }

    #[test]
    fn test_display_record() {
        let spec = TypeExpr::Record(vec![
            FieldDecl {
                name: "attack".into(),
                ty: TypeExpr::Named("integer".into()),
            },
            FieldDecl {
                name: "defense".into(),
                ty: TypeExpr::Named("integer".into()),
            },
        ]);
        assert_eq!(spec.to_string(), "{attack:integer,defense:integer}");
    }
}
