//! Type registry
//!
//! Maps type names to parsers and metadata. Entries are created at setup
//! (built-ins) and at custom-type registration, and are immutable thereafter;
//! the registry is the read-only backbone every parse and validation
//! consults. References between types are by name, which keeps the graph
//! acyclic at the representation level even when types reference each other
//! lexically.

pub mod builtins;
pub mod introspect;
pub mod naming;
pub mod snapshot;

pub use snapshot::{SchemaSnapshot, TypeSummary};

use crate::error::{Result, TabuluaError};
use crate::report::ErrorSink;
use crate::typespec::{parse_type_spec, TypeExpr};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Classification of a registered type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TypeKind {
    Primitive,
    Alias,
    Number,
    String,
    Enum,
    Record,
    Tuple,
    Array,
    Map,
    Union,
    Table,
    ExtendsRecord,
    ExtendsTuple,
    Ancestor,
    Tag,
    Nil,
    True,
    Raw,
}

/// Constraint set attached to a registered type.
///
/// The groups are mutually exclusive: `{min,max}` for numerics,
/// `{min_len,max_len,pattern}` for strings, `{values}` for enum narrowing,
/// `{validate}` for expression validators, `{members}` for type tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_len: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_len: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<String>>,
}

/// Which constraint group a [`Constraints`] uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintGroup {
    None,
    Numeric,
    Text,
    Values,
    Validate,
    Members,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self.group_of().map(|g| g == ConstraintGroup::None).unwrap_or(false)
    }

    /// Determine the constraint group, rejecting mixed sets
    pub fn group_of(&self) -> std::result::Result<ConstraintGroup, String> {
        let mut groups = Vec::new();
        if self.min.is_some() || self.max.is_some() {
            groups.push(ConstraintGroup::Numeric);
        }
        if self.min_len.is_some() || self.max_len.is_some() || self.pattern.is_some() {
            groups.push(ConstraintGroup::Text);
        }
        if self.values.is_some() {
            groups.push(ConstraintGroup::Values);
        }
        if self.validate.is_some() {
            groups.push(ConstraintGroup::Validate);
        }
        if self.members.is_some() {
            groups.push(ConstraintGroup::Members);
        }
        match groups.len() {
            0 => Ok(ConstraintGroup::None),
            1 => Ok(groups[0]),
            _ => Err("constraint groups are mutually exclusive".to_string()),
        }
    }
}

/// A custom-type declaration, as read from a manifest or custom-type file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomTypeSpec {
    pub name: String,
    /// Parent type-spec string. Optional for tags, whose parent is the
    /// computed common ancestor of the members.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(flatten)]
    pub constraints: Constraints,
}

/// A registered type: kind, lineage, constraints, and structural definition
#[derive(Debug, Clone)]
pub struct TypeMeta {
    pub name: String,
    pub kind: TypeKind,
    pub parent: Option<String>,
    /// Structural definition for compound types (also aliases of compounds)
    pub expr: Option<TypeExpr>,
    /// Canonical definition string for snapshots and messages
    pub definition: String,
    pub constraints: Constraints,
    /// Transitive tag members are resolved at query time; this is the
    /// declared (direct) member list
    pub members: Vec<String>,
    pub builtin: bool,
    pub(crate) pattern: Option<Regex>,
    pub(crate) validate: Option<Arc<crate::expr::Expr>>,
}

impl TypeMeta {
    fn plain(name: &str, kind: TypeKind, parent: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            parent: parent.map(str::to_string),
            expr: None,
            definition: parent.unwrap_or(name).to_string(),
            constraints: Constraints::default(),
            members: Vec::new(),
            builtin: false,
            pattern: None,
            validate: None,
        }
    }
}

/// Name -> parser + metadata registry.
///
/// Unknown-name lookups are cached so only the first reference to a missing
/// type reports; repeats return the sentinel silently.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    entries: IndexMap<String, TypeMeta>,
    unknown: Mutex<HashSet<String>>,
}

impl TypeRegistry {
    /// A registry with all built-in types installed
    pub fn new() -> Self {
        let mut registry = Self::default();
        builtins::install(&mut registry);
        registry
    }

    pub fn get(&self, name: &str) -> Option<&TypeMeta> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeMeta> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a type, reporting the first reference to a missing name
    pub fn resolve(&self, name: &str, sink: &mut ErrorSink) -> Option<&TypeMeta> {
        if let Some(meta) = self.entries.get(name) {
            return Some(meta);
        }
        let mut unknown = self.unknown.lock().expect("unknown-type cache poisoned");
        if unknown.insert(name.to_string()) {
            sink.error_value(name, format!("unknown type: {}", name));
        }
        None
    }

    /// Walk `name` and its parents, innermost first
    pub fn ancestor_chain(&self, name: &str) -> Vec<&TypeMeta> {
        let mut chain = Vec::new();
        let mut current = self.entries.get(name);
        let mut seen = HashSet::new();
        while let Some(meta) = current {
            if !seen.insert(meta.name.clone()) {
                break; // defensive against malformed parent links
            }
            chain.push(meta);
            current = meta.parent.as_deref().and_then(|p| self.entries.get(p));
        }
        chain
    }

    /// Register a custom type.
    ///
    /// Re-registering with the same parent is idempotent; a different parent
    /// is an error. Re-registering a tag merges its members additively.
    pub fn register(&mut self, spec: &CustomTypeSpec) -> Result<()> {
        if naming::is_reserved(&spec.name) {
            return Err(TabuluaError::ReservedName(spec.name.clone()));
        }
        if !naming::is_identifier(&spec.name) {
            return Err(TabuluaError::InvalidName(spec.name.clone()));
        }
        let group = spec
            .constraints
            .group_of()
            .map_err(|reason| TabuluaError::InvalidConstraint {
                name: spec.name.clone(),
                reason,
            })?;

        if group == ConstraintGroup::Members {
            return self.register_tag(spec);
        }

        let parent_src = spec.parent.as_deref().ok_or_else(|| {
            TabuluaError::InvalidConstraint {
                name: spec.name.clone(),
                reason: "a non-tag type needs a parent".to_string(),
            }
        })?;
        let parent_expr = parse_type_spec(parent_src)
            .map_err(|e| TabuluaError::InvalidTypeSpec(format!("{}: {}", spec.name, e)))?;

        if let Some(existing) = self.entries.get(&spec.name) {
            let same = parse_type_spec(&existing.definition)
                .map(|prev| prev == parent_expr)
                .unwrap_or(existing.definition == parent_src);
            if same && existing.constraints == spec.constraints {
                return Ok(()); // idempotent re-registration
            }
            return Err(TabuluaError::ParentMismatch {
                name: spec.name.clone(),
                existing: existing.definition.clone(),
                requested: parent_src.to_string(),
            });
        }

        let meta = match &parent_expr {
            TypeExpr::Named(parent_name) => {
                self.build_named_child(spec, group, parent_name, parent_src)?
            }
            compound => self.build_structural(spec, group, compound, parent_src)?,
        };
        tracing::debug!(name = %meta.name, kind = ?meta.kind, "registered type");
        self.unknown
            .lock()
            .expect("unknown-type cache poisoned")
            .remove(&meta.name);
        self.entries.insert(meta.name.clone(), meta);
        Ok(())
    }

    /// A custom type whose parent is a registered name
    fn build_named_child(
        &self,
        spec: &CustomTypeSpec,
        group: ConstraintGroup,
        parent_name: &str,
        parent_src: &str,
    ) -> Result<TypeMeta> {
        let parent = self
            .entries
            .get(parent_name)
            .ok_or_else(|| TabuluaError::UnknownParent(parent_name.to_string()))?;
        let base_kind = self.effective_kind(parent_name);

        if base_kind == TypeKind::Union && group != ConstraintGroup::Validate
            && group != ConstraintGroup::None
        {
            return Err(TabuluaError::UnionConstraint {
                parent: parent_name.to_string(),
                constraint: constraint_label(group).to_string(),
            });
        }

        match group {
            ConstraintGroup::Numeric => {
                if !matches!(base_kind, TypeKind::Number) {
                    return Err(TabuluaError::InvalidConstraint {
                        name: spec.name.clone(),
                        reason: format!("min/max need a numeric parent, {} is not", parent_name),
                    });
                }
                if let (Some(min), Some(max)) = (spec.constraints.min, spec.constraints.max) {
                    if min > max {
                        return Err(TabuluaError::InvalidConstraint {
                            name: spec.name.clone(),
                            reason: format!("min {} exceeds max {}", min, max),
                        });
                    }
                }
            }
            ConstraintGroup::Text => {
                if !matches!(base_kind, TypeKind::String) {
                    return Err(TabuluaError::InvalidConstraint {
                        name: spec.name.clone(),
                        reason: format!(
                            "minLen/maxLen/pattern need a string parent, {} is not",
                            parent_name
                        ),
                    });
                }
            }
            ConstraintGroup::Values => {
                let labels = self.enum_labels(parent_name).ok_or_else(|| {
                    TabuluaError::InvalidConstraint {
                        name: spec.name.clone(),
                        reason: format!("values need an enum parent, {} is not", parent_name),
                    }
                })?;
                for value in spec.constraints.values.as_deref().unwrap_or_default() {
                    if !labels.contains(value) {
                        return Err(TabuluaError::InvalidConstraint {
                            name: spec.name.clone(),
                            reason: format!("{} is not a label of {}", value, parent_name),
                        });
                    }
                }
            }
            ConstraintGroup::Validate | ConstraintGroup::None => {}
            ConstraintGroup::Members => unreachable!("tags handled separately"),
        }

        let kind = match group {
            ConstraintGroup::None => TypeKind::Alias,
            ConstraintGroup::Values => TypeKind::Enum,
            _ => match base_kind {
                TypeKind::Alias => parent.kind,
                other => other,
            },
        };

        let mut meta = TypeMeta::plain(&spec.name, kind, Some(parent_name));
        meta.definition = parent_src.to_string();
        meta.constraints = spec.constraints.clone();
        meta.pattern = self.compile_pattern(spec)?;
        meta.validate = self.compile_validate(spec)?;
        Ok(meta)
    }

    /// A custom type defined by a compound type-spec
    fn build_structural(
        &self,
        spec: &CustomTypeSpec,
        group: ConstraintGroup,
        expr: &TypeExpr,
        parent_src: &str,
    ) -> Result<TypeMeta> {
        if !matches!(group, ConstraintGroup::None | ConstraintGroup::Validate) {
            return Err(TabuluaError::InvalidConstraint {
                name: spec.name.clone(),
                reason: "scalar constraints need a named scalar parent".to_string(),
            });
        }

        let (kind, parent) = match expr {
            TypeExpr::Record(_) => (TypeKind::Record, None),
            TypeExpr::Tuple(_) => (TypeKind::Tuple, None),
            TypeExpr::Array(_) => (TypeKind::Array, None),
            TypeExpr::Map(..) => (TypeKind::Map, None),
            TypeExpr::Union(_) => (TypeKind::Union, None),
            TypeExpr::Enum(_) => (TypeKind::Enum, None),
            TypeExpr::Table => (TypeKind::Table, None),
            TypeExpr::Nil => (TypeKind::Nil, None),
            TypeExpr::True => (TypeKind::True, None),
            TypeExpr::Ancestor(_) => (TypeKind::Ancestor, None),
            TypeExpr::ExtendsRecord { parent, fields } => {
                self.check_extends_record(&spec.name, parent, fields)?;
                (TypeKind::ExtendsRecord, Some(parent.clone()))
            }
            TypeExpr::ExtendsTuple { parent, elems } => {
                self.check_extends_tuple(&spec.name, parent, elems)?;
                (TypeKind::ExtendsTuple, Some(parent.clone()))
            }
            TypeExpr::SelfRef(_) => {
                return Err(TabuluaError::InvalidTypeSpec(format!(
                    "{}: a self reference cannot be registered as a type",
                    spec.name
                )));
            }
            TypeExpr::Named(_) => unreachable!("named parents handled separately"),
        };

        let mut meta = TypeMeta::plain(&spec.name, kind, parent.as_deref());
        meta.expr = Some(expr.clone());
        meta.definition = parent_src.to_string();
        meta.constraints = spec.constraints.clone();
        meta.validate = self.compile_validate(spec)?;
        Ok(meta)
    }

    /// Register or additively merge a tag
    fn register_tag(&mut self, spec: &CustomTypeSpec) -> Result<()> {
        let members = spec.constraints.members.clone().unwrap_or_default();
        if members.is_empty() {
            return Err(TabuluaError::InvalidConstraint {
                name: spec.name.clone(),
                reason: "a tag needs at least one member".to_string(),
            });
        }
        for member in &members {
            if !self.contains(member) {
                return Err(TabuluaError::UnknownParent(member.clone()));
            }
        }

        let previous_members = match self.entries.get_mut(&spec.name) {
            Some(existing) => {
                if existing.kind != TypeKind::Tag {
                    return Err(TabuluaError::ParentMismatch {
                        name: spec.name.clone(),
                        existing: existing.definition.clone(),
                        requested: "tag".to_string(),
                    });
                }
                let previous = existing.members.clone();
                for member in members {
                    if !existing.members.contains(&member) {
                        existing.members.push(member);
                    }
                }
                Some(previous)
            }
            None => {
                let mut meta = TypeMeta::plain(&spec.name, TypeKind::Tag, None);
                meta.members = members;
                meta.definition = format!("tag({})", meta.members.join("|"));
                self.entries.insert(meta.name.clone(), meta);
                None
            }
        };

        // re-check membership cycles, rolling the merge back on failure
        if self.tag_has_cycle(&spec.name) {
            match previous_members {
                Some(previous) => {
                    self.entries
                        .get_mut(&spec.name)
                        .expect("tag just merged")
                        .members = previous;
                }
                None => {
                    self.entries.shift_remove(&spec.name);
                }
            }
            return Err(TabuluaError::TagCycle(spec.name.clone()));
        }

        // the implicit parent is the members' common ancestor
        let parent = match spec.parent.as_deref() {
            Some(explicit) => Some(explicit.to_string()),
            None => {
                let members = self.entries[&spec.name].members.clone();
                self.common_ancestor(&members)
            }
        };
        self.entries
            .get_mut(&spec.name)
            .expect("tag just inserted")
            .parent = parent;
        self.unknown
            .lock()
            .expect("unknown-type cache poisoned")
            .remove(&spec.name);
        tracing::debug!(name = %spec.name, "registered tag");
        Ok(())
    }

    fn tag_has_cycle(&self, tag: &str) -> bool {
        fn visit(registry: &TypeRegistry, name: &str, visiting: &mut Vec<String>) -> bool {
            if visiting.iter().any(|v| v == name) {
                return true;
            }
            let Some(meta) = registry.get(name) else {
                return false;
            };
            if meta.kind != TypeKind::Tag {
                return false;
            }
            visiting.push(name.to_string());
            let cyclic = meta
                .members
                .iter()
                .any(|member| visit(registry, member, visiting));
            visiting.pop();
            cyclic
        }
        visit(self, tag, &mut Vec::new())
    }

    /// Deepest registered type every listed member extends
    fn common_ancestor(&self, members: &[String]) -> Option<String> {
        let first = members.first()?;
        let chain = self.ancestor_chain(first);
        for candidate in chain {
            if members
                .iter()
                .all(|m| self.extends_or_restrict_names(m, &candidate.name))
            {
                return Some(candidate.name.clone());
            }
        }
        None
    }

    fn compile_pattern(&self, spec: &CustomTypeSpec) -> Result<Option<Regex>> {
        match spec.constraints.pattern.as_deref() {
            Some(src) => Regex::new(src).map(Some).map_err(|e| {
                TabuluaError::InvalidConstraint {
                    name: spec.name.clone(),
                    reason: format!("bad pattern: {}", e),
                }
            }),
            None => Ok(None),
        }
    }

    fn compile_validate(&self, spec: &CustomTypeSpec) -> Result<Option<Arc<crate::expr::Expr>>> {
        match spec.constraints.validate.as_deref() {
            Some(src) => crate::expr::parse_expr(src)
                .map(|e| Some(Arc::new(e)))
                .map_err(|e| TabuluaError::InvalidConstraint {
                    name: spec.name.clone(),
                    reason: format!("bad validate expression: {}", e),
                }),
            None => Ok(None),
        }
    }

    /// Install a built-in (setup only)
    pub(crate) fn install_builtin(&mut self, mut meta: TypeMeta) {
        meta.builtin = true;
        self.entries.insert(meta.name.clone(), meta);
    }
}

fn constraint_label(group: ConstraintGroup) -> &'static str {
    match group {
        ConstraintGroup::None => "none",
        ConstraintGroup::Numeric => "min/max",
        ConstraintGroup::Text => "minLen/maxLen/pattern",
        ConstraintGroup::Values => "values",
        ConstraintGroup::Validate => "validate",
        ConstraintGroup::Members => "members",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(name: &str, parent: &str) -> CustomTypeSpec {
        CustomTypeSpec {
            name: name.to_string(),
            parent: Some(parent.to_string()),
            constraints: Constraints::default(),
        }
    }

    #[test]
    fn test_builtins_installed() {
        let registry = TypeRegistry::new();
        assert!(registry.contains("integer"));
        assert!(registry.contains("string"));
        assert!(registry.contains("ratio"));
    }

    #[test]
    fn test_register_range_subtype() {
        let mut registry = TypeRegistry::new();
        let mut spec = custom("Percentage", "number");
        spec.constraints.min = Some(0.0);
        spec.constraints.max = Some(100.0);
        registry.register(&spec).unwrap();
        let meta = registry.get("Percentage").unwrap();
        assert_eq!(meta.kind, TypeKind::Number);
        assert_eq!(meta.parent.as_deref(), Some("number"));
    }

    #[test]
    fn test_reregistration_same_parent_is_idempotent() {
        let mut registry = TypeRegistry::new();
        registry.register(&custom("Hp", "integer")).unwrap();
        registry.register(&custom("Hp", "integer")).unwrap();
        assert!(matches!(
            registry.register(&custom("Hp", "float")),
            Err(TabuluaError::ParentMismatch { .. })
        ));
    }

    #[test]
    fn test_reserved_and_invalid_names() {
        let mut registry = TypeRegistry::new();
        assert!(matches!(
            registry.register(&custom("self", "integer")),
            Err(TabuluaError::ReservedName(_))
        ));
        assert!(matches!(
            registry.register(&custom("Bad_", "integer")),
            Err(TabuluaError::InvalidName(_))
        ));
    }

    #[test]
    fn test_union_parent_rejects_scalar_constraints() {
        let mut registry = TypeRegistry::new();
        registry.register(&custom("IntOrStr", "integer|string")).unwrap();
        let mut spec = custom("Narrow", "IntOrStr");
        spec.constraints.min = Some(0.0);
        assert!(matches!(
            registry.register(&spec),
            Err(TabuluaError::UnionConstraint { .. })
        ));
    }

    #[test]
    fn test_union_parent_allows_validate() {
        let mut registry = TypeRegistry::new();
        registry.register(&custom("IntOrStr", "integer|string")).unwrap();
        let mut spec = custom("Checked", "IntOrStr");
        spec.constraints.validate = Some("self != nil".to_string());
        registry.register(&spec).unwrap();
    }

    #[test]
    fn test_mixed_constraint_groups_rejected() {
        let mut registry = TypeRegistry::new();
        let mut spec = custom("Broken", "integer");
        spec.constraints.min = Some(0.0);
        spec.constraints.pattern = Some("x".to_string());
        assert!(matches!(
            registry.register(&spec),
            Err(TabuluaError::InvalidConstraint { .. })
        ));
    }

    #[test]
    fn test_unknown_type_reports_once() {
        let registry = TypeRegistry::new();
        let mut sink = crate::report::ErrorSink::new();
        assert!(registry.resolve("Missing", &mut sink).is_none());
        assert!(registry.resolve("Missing", &mut sink).is_none());
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn test_tag_merge_is_additive() {
        let mut registry = TypeRegistry::new();
        registry.register(&custom("Currency", "{a:integer,b:integer}")).unwrap();
        registry
            .register(&CustomTypeSpec {
                name: "gold".to_string(),
                parent: Some("{extends:Currency,bonus:integer}".to_string()),
                constraints: Constraints::default(),
            })
            .unwrap();
        registry
            .register(&CustomTypeSpec {
                name: "bossGem".to_string(),
                parent: Some("{extends:Currency,tier:integer}".to_string()),
                constraints: Constraints::default(),
            })
            .unwrap();

        let tag = |members: &[&str]| CustomTypeSpec {
            name: "CurrencyType".to_string(),
            parent: None,
            constraints: Constraints {
                members: Some(members.iter().map(|s| s.to_string()).collect()),
                ..Constraints::default()
            },
        };
        registry.register(&tag(&["gold"])).unwrap();
        registry.register(&tag(&["bossGem"])).unwrap();
        let meta = registry.get("CurrencyType").unwrap();
        assert_eq!(meta.members, vec!["gold", "bossGem"]);
        assert_eq!(meta.parent.as_deref(), Some("Currency"));
    }
}
