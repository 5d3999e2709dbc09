//! Built-in types
//!
//! Installed into every registry at setup, before any user code runs. The
//! actual parse behavior for these names lives in the cell module; entries
//! here carry the lineage and constraints the introspection surface and the
//! constraint checks rely on.

use super::{Constraints, TypeKind, TypeMeta, TypeRegistry};
use crate::typespec::TypeExpr;

fn meta(name: &str, kind: TypeKind, parent: Option<&str>) -> TypeMeta {
    TypeMeta {
        name: name.to_string(),
        kind,
        parent: parent.map(str::to_string),
        expr: None,
        definition: name.to_string(),
        constraints: Constraints::default(),
        members: Vec::new(),
        builtin: false, // set by install_builtin
        pattern: None,
        validate: None,
    }
}

fn ranged(name: &str, min: f64, max: f64) -> TypeMeta {
    let mut m = meta(name, TypeKind::Number, Some("integer"));
    m.constraints.min = Some(min);
    m.constraints.max = Some(max);
    m
}

fn structural(name: &str, kind: TypeKind, expr: TypeExpr) -> TypeMeta {
    let mut m = meta(name, kind, None);
    m.definition = expr.to_string();
    m.expr = Some(expr);
    m
}

fn named(n: &str) -> TypeExpr {
    TypeExpr::Named(n.to_string())
}

pub(super) fn install(registry: &mut TypeRegistry) {
    // numerics
    registry.install_builtin(meta("number", TypeKind::Number, None));
    registry.install_builtin(meta("integer", TypeKind::Number, Some("number")));
    registry.install_builtin(meta("long", TypeKind::Number, Some("number")));
    registry.install_builtin(meta("float", TypeKind::Number, Some("number")));
    registry.install_builtin(ranged("byte", -128.0, 127.0));
    registry.install_builtin(ranged("ubyte", 0.0, 255.0));
    registry.install_builtin(ranged("short", -32768.0, 32767.0));
    registry.install_builtin(ranged("ushort", 0.0, 65535.0));
    registry.install_builtin(ranged("int", -2147483648.0, 2147483647.0));
    registry.install_builtin(ranged("uint", 0.0, 4294967295.0));
    registry.install_builtin(meta("percent", TypeKind::Number, Some("number")));

    // strings
    registry.install_builtin(meta("boolean", TypeKind::Primitive, None));
    registry.install_builtin(meta("string", TypeKind::String, None));
    registry.install_builtin(meta("ascii", TypeKind::String, Some("string")));
    registry.install_builtin(meta("asciitext", TypeKind::String, Some("ascii")));
    registry.install_builtin(meta("asciimarkdown", TypeKind::String, Some("asciitext")));
    registry.install_builtin(meta("text", TypeKind::String, Some("string")));
    registry.install_builtin(meta("markdown", TypeKind::String, Some("text")));
    registry.install_builtin(meta("comment", TypeKind::String, Some("text")));
    registry.install_builtin(meta("identifier", TypeKind::String, Some("ascii")));
    registry.install_builtin(meta("name", TypeKind::String, Some("ascii")));
    registry.install_builtin(meta("version", TypeKind::String, Some("ascii")));
    registry.install_builtin(meta("cmp_version", TypeKind::String, Some("ascii")));
    registry.install_builtin(meta("http", TypeKind::String, Some("ascii")));
    registry.install_builtin(meta("regex", TypeKind::String, Some("string")));
    registry.install_builtin(meta("hexbytes", TypeKind::String, Some("ascii")));
    registry.install_builtin(meta("base64bytes", TypeKind::String, Some("ascii")));
    registry.install_builtin(meta("type", TypeKind::String, Some("ascii")));
    registry.install_builtin(meta("type_spec", TypeKind::String, Some("string")));

    // specials
    registry.install_builtin(meta("nil", TypeKind::Nil, None));
    registry.install_builtin(meta("true", TypeKind::True, None));
    registry.install_builtin(structural("table", TypeKind::Table, TypeExpr::Table));
    registry.install_builtin(structural(
        "raw",
        TypeKind::Raw,
        TypeExpr::Union(vec![
            named("boolean"),
            named("number"),
            named("table"),
            named("string"),
            TypeExpr::Nil,
        ]),
    ));
    registry.install_builtin(structural(
        "any",
        TypeKind::Tuple,
        TypeExpr::Tuple(vec![named("type"), named("raw")]),
    ));
    registry.install_builtin(structural(
        "ratio",
        TypeKind::Map,
        TypeExpr::Map(Box::new(named("name")), Box::new(named("percent"))),
    ));
    registry.install_builtin(meta("package_id", TypeKind::Alias, Some("name")));
    registry.install_builtin(structural(
        "super_type",
        TypeKind::Union,
        TypeExpr::Union(vec![named("type_spec"), TypeExpr::Nil]),
    ));
}
