//! Introspection over the type registry
//!
//! The parser factory, the validator helpers, and the schema exporters all
//! query the registry through this surface: kind and lineage lookups,
//! field/element decomposition, subtype checks, and tag closures.

use super::{TypeKind, TypeRegistry};
use crate::typespec::{FieldDecl, TypeExpr};
use std::collections::HashSet;

impl TypeRegistry {
    /// Kind with alias chains resolved
    pub fn effective_kind(&self, name: &str) -> TypeKind {
        let mut current = name;
        let mut seen = HashSet::new();
        while let Some(meta) = self.get(current) {
            if meta.kind != TypeKind::Alias || !seen.insert(current) {
                return meta.kind;
            }
            match meta.parent.as_deref() {
                Some(parent) => current = parent,
                None => return meta.kind,
            }
        }
        TypeKind::Alias
    }

    /// The structural definition backing `name`, walking alias/parent links
    pub fn structural_expr(&self, name: &str) -> Option<&TypeExpr> {
        let mut current = name;
        let mut seen = HashSet::new();
        while let Some(meta) = self.get(current) {
            if let Some(expr) = &meta.expr {
                return Some(expr);
            }
            if !seen.insert(current) {
                return None;
            }
            current = meta.parent.as_deref()?;
        }
        None
    }

    pub fn parent_of(&self, name: &str) -> Option<&str> {
        self.get(name)?.parent.as_deref()
    }

    pub fn is_built_in(&self, name: &str) -> bool {
        self.get(name).map(|m| m.builtin).unwrap_or(false)
    }

    /// Labels of an enum type, resolving `values` narrowing and parents
    pub fn enum_labels(&self, name: &str) -> Option<Vec<String>> {
        let meta = self.get(name)?;
        if let Some(values) = &meta.constraints.values {
            return Some(values.clone());
        }
        if let Some(TypeExpr::Enum(labels)) = &meta.expr {
            return Some(labels.clone());
        }
        meta.parent.as_deref().and_then(|p| self.enum_labels(p))
    }

    /// Effective field list of a record type, with extends-merging applied.
    ///
    /// A child redeclaration replaces the parent's field type in place:
    /// `nil` marks column omission, a subtype narrows the column.
    pub fn fields_of(&self, name: &str) -> Option<Vec<FieldDecl>> {
        match self.structural_expr(name)? {
            TypeExpr::Record(fields) => Some(fields.clone()),
            TypeExpr::ExtendsRecord { parent, fields } => {
                let mut merged = self.fields_of(parent)?;
                for field in fields {
                    match merged.iter_mut().find(|f| f.name == field.name) {
                        Some(slot) => slot.ty = field.ty.clone(),
                        None => merged.push(field.clone()),
                    }
                }
                Some(merged)
            }
            _ => None,
        }
    }

    /// Element types of a tuple type, with extends-appending applied
    pub fn tuple_types(&self, name: &str) -> Option<Vec<TypeExpr>> {
        match self.structural_expr(name)? {
            TypeExpr::Tuple(elems) => Some(elems.clone()),
            TypeExpr::ExtendsTuple { parent, elems } => {
                let mut merged = self.tuple_types(parent)?;
                merged.extend(elems.iter().cloned());
                Some(merged)
            }
            _ => None,
        }
    }

    pub fn array_elem(&self, name: &str) -> Option<&TypeExpr> {
        match self.structural_expr(name)? {
            TypeExpr::Array(elem) => Some(elem),
            _ => None,
        }
    }

    pub fn map_key_value(&self, name: &str) -> Option<(&TypeExpr, &TypeExpr)> {
        match self.structural_expr(name)? {
            TypeExpr::Map(key, value) => Some((key, value)),
            _ => None,
        }
    }

    pub fn union_alternatives(&self, name: &str) -> Option<&[TypeExpr]> {
        match self.structural_expr(name)? {
            TypeExpr::Union(alts) => Some(alts),
            _ => None,
        }
    }

    /// Can a value of this type never be a table (container)?
    pub fn is_never_table(&self, name: &str) -> bool {
        match self.effective_kind(name) {
            TypeKind::Number
            | TypeKind::String
            | TypeKind::Enum
            | TypeKind::Primitive
            | TypeKind::Nil
            | TypeKind::True
            | TypeKind::Ancestor
            | TypeKind::Tag => true,
            TypeKind::Union => self
                .union_alternatives(name)
                .map(|alts| alts.iter().all(|a| self.expr_never_table(a)))
                .unwrap_or(false),
            _ => false,
        }
    }

    fn expr_never_table(&self, expr: &TypeExpr) -> bool {
        match expr {
            TypeExpr::Named(name) => self.is_never_table(name),
            TypeExpr::Nil | TypeExpr::True | TypeExpr::Enum(_) | TypeExpr::Ancestor(_) => true,
            TypeExpr::Union(alts) => alts.iter().all(|a| self.expr_never_table(a)),
            _ => false,
        }
    }

    /// Is `a` equal to `b`, or does `a`'s ancestor chain reach `b`?
    ///
    /// Unions qualify only when every alternative extends `b`; a union that
    /// admits nil never does (nil is not a subtype of anything but itself).
    pub fn extends_or_restrict_names(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        if self.effective_kind(a) == TypeKind::Union {
            if let Some(alts) = self.union_alternatives(a) {
                return alts.iter().all(|alt| self.extends_or_restrict_expr(alt, b));
            }
        }
        let mut seen = HashSet::new();
        let mut current = self.parent_of(a);
        while let Some(name) = current {
            if name == b {
                return true;
            }
            if !seen.insert(name.to_string()) {
                return false;
            }
            current = self.parent_of(name);
        }
        false
    }

    /// [`Self::extends_or_restrict_names`] lifted to anonymous type-specs
    pub fn extends_or_restrict_expr(&self, a: &TypeExpr, b: &str) -> bool {
        match a {
            TypeExpr::Named(name) => self.extends_or_restrict_names(name, b),
            TypeExpr::Nil => b == "nil",
            TypeExpr::True => b == "true",
            TypeExpr::Union(alts) => alts.iter().all(|alt| self.extends_or_restrict_expr(alt, b)),
            _ => false,
        }
    }

    /// Is `candidate` accepted by `tag`? Direct members, subtypes of
    /// members, and members of nested tags all qualify; membership is
    /// transitive but acyclic.
    pub fn is_member_of_tag(&self, tag: &str, candidate: &str) -> bool {
        let mut visited = HashSet::new();
        self.tag_accepts(tag, candidate, &mut visited)
    }

    fn tag_accepts(&self, tag: &str, candidate: &str, visited: &mut HashSet<String>) -> bool {
        if !visited.insert(tag.to_string()) {
            return false;
        }
        let Some(meta) = self.get(tag) else {
            return false;
        };
        if meta.kind != TypeKind::Tag {
            return false;
        }
        meta.members.iter().any(|member| {
            if self.get(member).map(|m| m.kind) == Some(TypeKind::Tag) {
                self.tag_accepts(member, candidate, visited)
            } else {
                self.extends_or_restrict_names(candidate, member)
            }
        })
    }

    /// Every registered type the tag accepts, in registration order
    pub fn list_members_of_tag(&self, tag: &str) -> Vec<String> {
        self.iter()
            .filter(|meta| meta.kind != TypeKind::Tag)
            .filter(|meta| self.is_member_of_tag(tag, &meta.name))
            .map(|meta| meta.name.clone())
            .collect()
    }

    /// Validate an `{extends:Parent,...}` declaration before registration
    pub(super) fn check_extends_record(
        &self,
        child: &str,
        parent: &str,
        fields: &[FieldDecl],
    ) -> crate::error::Result<()> {
        use crate::error::TabuluaError;

        if !matches!(
            self.effective_kind(parent),
            TypeKind::Record | TypeKind::ExtendsRecord
        ) {
            return Err(TabuluaError::InvalidTypeSpec(format!(
                "{}: extends parent {} is not a record",
                child, parent
            )));
        }
        let parent_fields = self.fields_of(parent).unwrap_or_default();

        for field in fields {
            if let Some(parent_field) = parent_fields.iter().find(|f| f.name == field.name) {
                let omission = matches!(field.ty, TypeExpr::Nil);
                let compatible = omission
                    || field.ty == parent_field.ty
                    || self.expr_extends_expr(&field.ty, &parent_field.ty);
                if !compatible {
                    return Err(TabuluaError::InvalidTypeSpec(format!(
                        "{}: field {} ({}) is not a subtype of the parent's {}",
                        child, field.name, field.ty, parent_field.ty
                    )));
                }
            }
        }

        // sibling subtypes must agree on same-named added fields
        for sibling in self.iter().filter(|m| {
            m.kind == TypeKind::ExtendsRecord && m.parent.as_deref() == Some(parent)
        }) {
            let Some(TypeExpr::ExtendsRecord {
                fields: sibling_fields,
                ..
            }) = &sibling.expr
            else {
                continue;
            };
            for field in fields {
                let Some(other) = sibling_fields.iter().find(|f| f.name == field.name) else {
                    continue;
                };
                if other.ty == field.ty {
                    continue;
                }
                let parent_ty = parent_fields.iter().find(|f| f.name == field.name);
                let both_narrow = parent_ty.is_some_and(|pf| {
                    self.expr_extends_expr(&field.ty, &pf.ty)
                        && self.expr_extends_expr(&other.ty, &pf.ty)
                });
                if !both_narrow {
                    return Err(TabuluaError::InvalidTypeSpec(format!(
                        "{}: field {} conflicts with sibling {} ({} vs {})",
                        child, field.name, sibling.name, field.ty, other.ty
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validate an `{extends,Parent,...}` declaration before registration
    pub(super) fn check_extends_tuple(
        &self,
        child: &str,
        parent: &str,
        elems: &[TypeExpr],
    ) -> crate::error::Result<()> {
        use crate::error::TabuluaError;

        if !matches!(
            self.effective_kind(parent),
            TypeKind::Tuple | TypeKind::ExtendsTuple
        ) {
            return Err(TabuluaError::InvalidTypeSpec(format!(
                "{}: extends parent {} is not a tuple",
                child, parent
            )));
        }
        if elems.is_empty() {
            return Err(TabuluaError::InvalidTypeSpec(format!(
                "{}: extends-tuple must add at least one element",
                child
            )));
        }
        Ok(())
    }

    /// Is `a` compatible with `b` for extends narrowing: equal, or a subtype
    /// when `b` is a named type
    fn expr_extends_expr(&self, a: &TypeExpr, b: &TypeExpr) -> bool {
        if a == b {
            return true;
        }
        match b {
            TypeExpr::Named(b_name) => self.extends_or_restrict_expr(a, b_name),
            TypeExpr::Union(b_alts) => {
                // narrowing to a subset of the union's alternatives
                a.without_nil().iter().all(|alt| {
                    b_alts.iter().any(|b_alt| {
                        alt == &b_alt
                            || matches!(b_alt, TypeExpr::Named(n)
                                if self.extends_or_restrict_expr(alt, n))
                    })
                }) && (!a.admits_nil() || b.admits_nil())
            }
            _ => false,
        }
    }
}
