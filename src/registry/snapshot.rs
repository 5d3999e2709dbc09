//! Schema snapshot export
//!
//! Serializes the registry into a stable, ordered description that exporters
//! and tooling consume without touching the registry itself.

use super::{Constraints, TypeKind, TypeRegistry};
use serde::{Deserialize, Serialize};

/// One registered type, flattened for export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeSummary {
    pub name: String,
    pub kind: TypeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_labels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_fields: Option<Vec<(String, String)>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuple_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_members: Option<Vec<String>>,
}

/// Snapshot of every registered type, in registration order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub types: Vec<TypeSummary>,
}

impl SchemaSnapshot {
    /// Capture the registry's current state
    pub fn capture(registry: &TypeRegistry) -> Self {
        let types = registry
            .iter()
            .map(|meta| TypeSummary {
                name: meta.name.clone(),
                kind: meta.kind,
                parent: meta.parent.clone(),
                definition: meta.definition.clone(),
                constraints: if meta.constraints == Constraints::default() {
                    None
                } else {
                    Some(meta.constraints.clone())
                },
                enum_labels: match meta.kind {
                    TypeKind::Enum => registry.enum_labels(&meta.name),
                    _ => None,
                },
                record_fields: match meta.kind {
                    TypeKind::Record | TypeKind::ExtendsRecord => {
                        registry.fields_of(&meta.name).map(|fields| {
                            fields
                                .into_iter()
                                .map(|f| (f.name, f.ty.to_string()))
                                .collect()
                        })
                    }
                    _ => None,
                },
                tuple_types: match meta.kind {
                    TypeKind::Tuple | TypeKind::ExtendsTuple => {
                        registry.tuple_types(&meta.name).map(|types| {
                            types.into_iter().map(|t| t.to_string()).collect()
                        })
                    }
                    _ => None,
                },
                tag_members: if meta.kind == TypeKind::Tag {
                    Some(meta.members.clone())
                } else {
                    None
                },
            })
            .collect();
        Self { types }
    }

    pub fn get(&self, name: &str) -> Option<&TypeSummary> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
