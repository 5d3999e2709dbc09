//! Cell parser factory
//!
//! Compiles a [`TypeExpr`] or registered name into cell-parse behavior:
//! consuming a raw cell string, producing a typed [`Value`], and emitting a
//! canonical reformat string. Composition is by name through the registry so
//! mutually referencing types stay acyclic.
//!
//! All failures go to the sink; `None` is the sentinel the callers gate on.

pub mod container;
pub mod lex;
pub mod scalar;

use crate::registry::{TypeKind, TypeRegistry};
use crate::report::ErrorSink;
use crate::typespec::{FieldDecl, TypeExpr};
use crate::value::Value;
use base64::Engine as _;

/// Everything a cell parse needs: the registry for name resolution and the
/// sink for reports
pub struct ParseCx<'a> {
    pub registry: &'a TypeRegistry,
    pub sink: &'a mut ErrorSink,
}

/// Parse a whole cell against a type-spec
pub fn parse_cell(ty: &TypeExpr, raw: &str, cx: &mut ParseCx) -> Option<Value> {
    match ty {
        TypeExpr::Named(name) => parse_named(name, raw, cx),
        TypeExpr::Nil => {
            if raw.is_empty() {
                Some(Value::Nil)
            } else {
                cx.sink.error_value(raw, "expected an empty cell for nil");
                None
            }
        }
        TypeExpr::True => {
            if raw == "true" {
                Some(Value::Bool(true))
            } else {
                cx.sink.error_value(raw, "expected true");
                None
            }
        }
        TypeExpr::Union(alts) => parse_union(ty, alts, raw, cx),
        TypeExpr::Enum(labels) => {
            if labels.iter().any(|l| l == raw) {
                Some(Value::Str(raw.to_string()))
            } else {
                cx.sink
                    .error_value(raw, format!("expected one of: {}", labels.join("|")));
                None
            }
        }
        TypeExpr::Ancestor(ancestor) => parse_ancestor(ancestor.as_deref(), raw, cx),
        TypeExpr::SelfRef(key) => {
            cx.sink
                .error(format!("self reference {} was not resolved before parsing", key));
            None
        }
        container => container::parse_container(container, raw, cx),
    }
}

/// Union trial parsing: alternatives in declaration order; the sink is
/// rolled back across failed trials so only the winner's reports survive.
/// When every alternative fails, the first trial's reports are replayed as
/// the best error.
fn parse_union(ty: &TypeExpr, alts: &[TypeExpr], raw: &str, cx: &mut ParseCx) -> Option<Value> {
    if raw.is_empty() && ty.admits_nil() {
        return Some(Value::Nil);
    }
    let mut best: Option<Vec<crate::report::Report>> = None;
    for alt in alts {
        let cp = cx.sink.checkpoint();
        if let Some(value) = parse_cell(alt, raw, cx) {
            if cx.sink.errors_since(cp) == 0 {
                return Some(value);
            }
        }
        let discarded = cx.sink.rollback(cp);
        if best.is_none() && !discarded.is_empty() {
            best = Some(discarded);
        }
    }
    match best {
        Some(reports) => cx.sink.replay(reports),
        None => cx
            .sink
            .error_value(raw, format!("no union alternative matched {}", ty)),
    }
    None
}

/// Parse a cell against a registered type name
pub fn parse_named(name: &str, raw: &str, cx: &mut ParseCx) -> Option<Value> {
    parse_named_impl(name, raw, false, cx)
}

/// Like [`parse_named`], for text whose escapes were already decoded
pub(crate) fn parse_named_decoded(name: &str, raw: &str, cx: &mut ParseCx) -> Option<Value> {
    parse_named_impl(name, raw, true, cx)
}

fn parse_named_impl(name: &str, raw: &str, decoded: bool, cx: &mut ParseCx) -> Option<Value> {
    let registry = cx.registry;
    let meta = registry.resolve(name, cx.sink)?;
    if meta.kind == TypeKind::Tag {
        return parse_tag(name, raw, cx);
    }

    let chain = registry.ancestor_chain(name);
    let structural = chain.iter().find_map(|m| m.expr.as_ref());
    let value = match structural {
        Some(expr) => parse_cell(expr, raw, cx)?,
        None => {
            let base = chain.last().expect("chain contains at least the type itself");
            scalar::parse_builtin_with(&base.name, raw, decoded, cx)?
        }
    };

    for meta in &chain {
        if !apply_constraints(meta, &value, raw, cx) {
            return None;
        }
        match meta.name.as_str() {
            "ratio" => {
                if !check_ratio(&value, raw, cx) {
                    return None;
                }
            }
            "any" => {
                if !check_any(&value, cx) {
                    return None;
                }
            }
            _ => {}
        }
    }
    Some(value)
}

/// A tag accepts the names of its member types and their subtypes
fn parse_tag(tag: &str, raw: &str, cx: &mut ParseCx) -> Option<Value> {
    let registry = cx.registry;
    let meta = registry.resolve(raw, cx.sink)?;
    if registry.is_member_of_tag(tag, &meta.name) {
        Some(Value::TypeName(meta.name.clone()))
    } else {
        cx.sink
            .error_value(raw, format!("{} is not a member of tag {}", raw, tag));
        None
    }
}

/// `{extends,T}`: the cell names a registered type whose ancestor chain
/// reaches `T`; the `{extends_}` wildcard accepts any registered type
pub(crate) fn parse_ancestor(
    ancestor: Option<&str>,
    raw: &str,
    cx: &mut ParseCx,
) -> Option<Value> {
    let registry = cx.registry;
    let meta = registry.resolve(raw, cx.sink)?;
    match ancestor {
        Some(required) if !registry.extends_or_restrict_names(&meta.name, required) => {
            cx.sink
                .error_value(raw, format!("{} does not extend {}", raw, required));
            None
        }
        _ => Some(Value::TypeName(meta.name.clone())),
    }
}

fn apply_constraints(
    meta: &crate::registry::TypeMeta,
    value: &Value,
    raw: &str,
    cx: &mut ParseCx,
) -> bool {
    let c = &meta.constraints;
    if c.min.is_some() || c.max.is_some() {
        if let Some(n) = value.as_f64() {
            let min = c.min.unwrap_or(f64::NEG_INFINITY);
            let max = c.max.unwrap_or(f64::INFINITY);
            if n < min || n > max {
                cx.sink.with_col_type(&meta.name, |sink| {
                    sink.error_value(raw, format!("must be {}..{}", fmt_bound(min), fmt_bound(max)))
                });
                return false;
            }
        }
    }
    if let Some(s) = value.as_str() {
        let len = s.chars().count();
        if let Some(min_len) = c.min_len {
            if len < min_len {
                cx.sink.with_col_type(&meta.name, |sink| {
                    sink.error_value(raw, format!("shorter than {} characters", min_len))
                });
                return false;
            }
        }
        if let Some(max_len) = c.max_len {
            if len > max_len {
                cx.sink.with_col_type(&meta.name, |sink| {
                    sink.error_value(raw, format!("longer than {} characters", max_len))
                });
                return false;
            }
        }
        if let Some(pattern) = &meta.pattern {
            if !pattern.is_match(s) {
                cx.sink.with_col_type(&meta.name, |sink| {
                    sink.error_value(raw, format!("does not match pattern {}", pattern.as_str()))
                });
                return false;
            }
        }
        if let Some(values) = &c.values {
            if !values.iter().any(|v| v == s) {
                cx.sink.with_col_type(&meta.name, |sink| {
                    sink.error_value(raw, format!("expected one of: {}", values.join("|")))
                });
                return false;
            }
        }
    }
    if let Some(validator) = &meta.validate {
        let validator = validator.clone();
        if !crate::expr::run_type_validator(&validator, value, &meta.name, raw, cx) {
            return false;
        }
    }
    true
}

/// Ratio maps must sum to 1.0 within 1e-9
fn check_ratio(value: &Value, raw: &str, cx: &mut ParseCx) -> bool {
    let Value::Map(entries) = value else {
        return true;
    };
    let sum: f64 = entries.values().filter_map(Value::as_f64).sum();
    if (sum - 1.0).abs() > 1e-9 {
        cx.sink
            .error_value(raw, format!("ratio values must sum to 1.0, got {}", sum));
        return false;
    }
    true
}

/// `any` is `{type, raw}`: the raw component must parse as the named type
fn check_any(value: &Value, cx: &mut ParseCx) -> bool {
    let Value::Tuple(items) = value else {
        return true;
    };
    let (Some(Value::TypeName(ty)), Some(inner)) = (items.first(), items.get(1)) else {
        return true;
    };
    let ty = ty.clone();
    let rendered = reformat(None, inner, cx.registry);
    if parse_named(&ty, &rendered, cx).is_none() {
        cx.sink
            .error_value(&rendered, format!("value does not match the declared type {}", ty));
        return false;
    }
    true
}

fn fmt_bound(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

// ---------------------------------------------------------------------------
// Canonical reformatting
// ---------------------------------------------------------------------------

/// Canonical top-level reformat of a parsed value.
///
/// Numbers keep integer-ness except `float`, which always prints a decimal
/// point; text-family strings re-encode their escapes; containers emit
/// without outer braces and re-wrap and re-quote nested values.
pub fn reformat(ty: Option<&TypeExpr>, value: &Value, registry: &TypeRegistry) -> String {
    reformat_impl(ty, value, registry, false)
}

pub(crate) fn reformat_nested(
    ty: Option<&TypeExpr>,
    value: &Value,
    registry: &TypeRegistry,
) -> String {
    reformat_impl(ty, value, registry, true)
}

/// Brace-wrapped generic reformat, used when an exploded group collapses
/// into one cell
pub fn reformat_collapsed(value: &Value, registry: &TypeRegistry) -> String {
    reformat_impl(None, value, registry, true)
}

fn reformat_impl(
    ty: Option<&TypeExpr>,
    value: &Value,
    registry: &TypeRegistry,
    nested: bool,
) -> String {
    // pick the matching union alternative before anything else
    let ty = ty.map(|t| match t {
        TypeExpr::Union(alts) => alts
            .iter()
            .find(|alt| value_matches(alt, value, registry))
            .unwrap_or(t),
        other => other,
    });

    match value {
        Value::Nil => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => {
            if chain_contains(ty, registry, "percent") {
                format!("{}%", fmt_bound(f * 100.0))
            } else {
                format_float(*f)
            }
        }
        Value::Str(s) => {
            let free_text = ty
                .map(|t| container::is_string_shaped(t, registry))
                .unwrap_or(true);
            if !free_text {
                // identifier-like and enum values are written verbatim
                s.clone()
            } else if nested {
                lex::escape_quoted(s)
            } else if chain_contains(ty, registry, "text") {
                lex::escape(s)
            } else {
                s.clone()
            }
        }
        Value::Bytes(bytes) => {
            if chain_contains(ty, registry, "base64bytes") {
                base64::engine::general_purpose::STANDARD.encode(bytes)
            } else {
                crate::value::hex_upper(bytes)
            }
        }
        Value::TypeName(name) => name.clone(),
        Value::Array(items) => {
            let elem_ty = resolved_array_elem(ty, registry);
            let inner = items
                .iter()
                .map(|v| reformat_impl(elem_ty, v, registry, true))
                .collect::<Vec<_>>()
                .join(",");
            wrap_if(nested, inner)
        }
        Value::Tuple(items) => {
            let elem_tys = resolved_tuple_types(ty, registry);
            let inner = items
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let elem_ty = elem_tys.as_ref().and_then(|tys| tys.get(i));
                    reformat_impl(elem_ty, v, registry, true)
                })
                .collect::<Vec<_>>()
                .join(",");
            wrap_if(nested, inner)
        }
        Value::Record(fields) => {
            let decls = resolved_record_fields(ty, registry);
            let inner = fields
                .iter()
                .map(|(name, v)| {
                    let field_ty = decls
                        .as_ref()
                        .and_then(|d| d.iter().find(|f| &f.name == name).map(|f| &f.ty));
                    format!("{}={}", name, reformat_impl(field_ty, v, registry, true))
                })
                .collect::<Vec<_>>()
                .join(",");
            wrap_if(nested, inner)
        }
        Value::Map(entries) => {
            let kv = resolved_map_types(ty, registry);
            let set_valued = matches!(kv, Some((_, TypeExpr::True)));
            let inner = entries
                .iter()
                .map(|(key, v)| {
                    if set_valued {
                        key.clone()
                    } else {
                        let value_ty = kv.as_ref().map(|(_, v)| *v);
                        format!("{}={}", key, reformat_impl(value_ty, v, registry, true))
                    }
                })
                .collect::<Vec<_>>()
                .join(",");
            wrap_if(nested, inner)
        }
    }
}

fn wrap_if(nested: bool, inner: String) -> String {
    if nested {
        format!("{{{}}}", inner)
    } else {
        inner
    }
}

/// Always prints a decimal point (5 -> "5.0")
fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9e15 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

fn chain_contains(ty: Option<&TypeExpr>, registry: &TypeRegistry, target: &str) -> bool {
    match ty {
        Some(TypeExpr::Named(name)) => registry
            .ancestor_chain(name)
            .iter()
            .any(|m| m.name == target),
        _ => false,
    }
}

fn resolved_array_elem<'t>(
    ty: Option<&'t TypeExpr>,
    registry: &'t TypeRegistry,
) -> Option<&'t TypeExpr> {
    match ty? {
        TypeExpr::Array(elem) => Some(elem),
        TypeExpr::Named(name) => registry.array_elem(name),
        _ => None,
    }
}

fn resolved_tuple_types(
    ty: Option<&TypeExpr>,
    registry: &TypeRegistry,
) -> Option<Vec<TypeExpr>> {
    match ty? {
        TypeExpr::Tuple(elems) => Some(elems.clone()),
        TypeExpr::ExtendsTuple { parent, elems } => {
            let mut merged = registry.tuple_types(parent)?;
            merged.extend(elems.iter().cloned());
            Some(merged)
        }
        TypeExpr::Named(name) => registry.tuple_types(name),
        _ => None,
    }
}

fn resolved_record_fields(
    ty: Option<&TypeExpr>,
    registry: &TypeRegistry,
) -> Option<Vec<FieldDecl>> {
    match ty? {
        TypeExpr::Record(fields) => Some(fields.clone()),
        TypeExpr::ExtendsRecord { parent, fields } => {
            let mut merged = registry.fields_of(parent)?;
            for field in fields {
                match merged.iter_mut().find(|f| f.name == field.name) {
                    Some(slot) => slot.ty = field.ty.clone(),
                    None => merged.push(field.clone()),
                }
            }
            Some(merged)
        }
        TypeExpr::Named(name) => registry.fields_of(name),
        _ => None,
    }
}

fn resolved_map_types<'t>(
    ty: Option<&'t TypeExpr>,
    registry: &'t TypeRegistry,
) -> Option<(&'t TypeExpr, &'t TypeExpr)> {
    match ty? {
        TypeExpr::Map(key, value) => Some((key, value)),
        TypeExpr::Named(name) => registry.map_key_value(name),
        _ => None,
    }
}

/// Shape compatibility between a type-spec and a parsed value, used to pick
/// the union alternative a value came from
pub(crate) fn value_matches(ty: &TypeExpr, value: &Value, registry: &TypeRegistry) -> bool {
    match ty {
        TypeExpr::Nil => value.is_nil(),
        TypeExpr::True => matches!(value, Value::Bool(true)),
        TypeExpr::Union(alts) => alts.iter().any(|a| value_matches(a, value, registry)),
        TypeExpr::Array(_) => matches!(value, Value::Array(_)),
        TypeExpr::Map(..) => matches!(value, Value::Map(_)),
        TypeExpr::Tuple(_) | TypeExpr::ExtendsTuple { .. } => matches!(value, Value::Tuple(_)),
        TypeExpr::Record(_) | TypeExpr::ExtendsRecord { .. } => matches!(value, Value::Record(_)),
        TypeExpr::Table => matches!(value, Value::Array(_) | Value::Map(_)),
        TypeExpr::Enum(labels) => {
            matches!(value, Value::Str(s) if labels.iter().any(|l| l == s))
        }
        TypeExpr::Ancestor(_) | TypeExpr::SelfRef(_) => matches!(value, Value::TypeName(_)),
        TypeExpr::Named(name) => {
            if let Some(expr) = registry.structural_expr(name) {
                return value_matches(expr, value, registry);
            }
            let base = registry
                .ancestor_chain(name)
                .last()
                .map(|m| m.name.clone())
                .unwrap_or_default();
            match base.as_str() {
                "boolean" => matches!(value, Value::Bool(_)),
                "integer" | "long" => matches!(value, Value::Int(_)),
                "float" | "percent" => matches!(value, Value::Float(_)),
                "number" => matches!(value, Value::Int(_) | Value::Float(_)),
                "type" => matches!(value, Value::TypeName(_)),
                "hexbytes" | "base64bytes" => matches!(value, Value::Bytes(_)),
                "nil" => value.is_nil(),
                "true" => matches!(value, Value::Bool(true)),
                _ => matches!(value, Value::Str(_)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeRegistry;

    fn parse(spec: &str, raw: &str) -> (Option<Value>, usize, usize) {
        let registry = TypeRegistry::new();
        let mut sink = ErrorSink::new();
        let ty = crate::typespec::parse_type_spec(spec).unwrap();
        let mut cx = ParseCx {
            registry: &registry,
            sink: &mut sink,
        };
        let value = parse_cell(&ty, raw, &mut cx);
        (value, sink.error_count(), sink.warning_count())
    }

    fn roundtrip(spec: &str, raw: &str) -> String {
        let registry = TypeRegistry::new();
        let mut sink = ErrorSink::new();
        let ty = crate::typespec::parse_type_spec(spec).unwrap();
        let mut cx = ParseCx {
            registry: &registry,
            sink: &mut sink,
        };
        let value = parse_cell(&ty, raw, &mut cx).expect("cell parses");
        assert_eq!(sink.error_count(), 0, "unexpected errors: {:?}", sink.reports());
        reformat(Some(&ty), &value, &registry)
    }

    #[test]
    fn test_union_prefers_declaration_order() {
        let (value, errors, _) = parse("integer|string", "10");
        assert_eq!(value, Some(Value::Int(10)));
        assert_eq!(errors, 0);
        let (value, errors, _) = parse("integer|string", "10 kg");
        assert_eq!(value, Some(Value::Str("10 kg".to_string())));
        assert_eq!(errors, 0);
    }

    #[test]
    fn test_union_failure_reports_once() {
        let (value, errors, _) = parse("integer|float", "x");
        assert!(value.is_none());
        assert!(errors > 0);
    }

    #[test]
    fn test_nullable_union_empty_cell() {
        let (value, errors, _) = parse("integer|nil", "");
        assert_eq!(value, Some(Value::Nil));
        assert_eq!(errors, 0);
        let (value, errors, _) = parse("integer", "");
        assert!(value.is_none());
        assert!(errors > 0);
    }

    #[test]
    fn test_array_cell() {
        let (value, errors, _) = parse("{integer}", "1,2,3");
        assert_eq!(
            value,
            Some(Value::Array(vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3)
            ]))
        );
        assert_eq!(errors, 0);
    }

    #[test]
    fn test_bare_single_string_array_warns() {
        let (value, errors, warnings) = parse("{string}", "sword");
        assert!(matches!(value, Some(Value::Array(_))));
        assert_eq!(errors, 0);
        assert_eq!(warnings, 1);
    }

    #[test]
    fn test_record_cell() {
        let (value, errors, _) = parse("{attack:integer,defense:integer}", "attack=5,defense=3");
        let Some(Value::Record(fields)) = value else {
            panic!("expected record");
        };
        assert_eq!(errors, 0);
        assert_eq!(fields["attack"], Value::Int(5));
        assert_eq!(fields["defense"], Value::Int(3));
    }

    #[test]
    fn test_record_unknown_field() {
        let (value, errors, _) = parse("{attack:integer,defense:integer}", "attack=5,magic=2");
        assert!(value.is_none());
        assert!(errors > 0);
    }

    #[test]
    fn test_map_set_form() {
        let (value, errors, _) = parse("{identifier:true}", "gold,gems");
        let Some(Value::Map(entries)) = value else {
            panic!("expected map");
        };
        assert_eq!(errors, 0);
        assert_eq!(entries["gold"], Value::Bool(true));
        assert_eq!(entries["gems"], Value::Bool(true));
    }

    #[test]
    fn test_ratio_sum() {
        let (value, errors, _) = parse("ratio", "a=50%,b=50%");
        assert!(matches!(value, Some(Value::Map(_))));
        assert_eq!(errors, 0);
        let (value, errors, _) = parse("ratio", "a=50%,b=30%");
        assert!(value.is_none());
        assert!(errors > 0);
    }

    #[test]
    fn test_float_reformat_has_decimal() {
        assert_eq!(roundtrip("float", "5"), "5.0");
        assert_eq!(roundtrip("float", "0.25"), "0.25");
    }

    #[test]
    fn test_hex_reformat_uppercases() {
        assert_eq!(roundtrip("hexbytes", "deadBEEF"), "DEADBEEF");
    }

    #[test]
    fn test_record_reformat() {
        assert_eq!(
            roundtrip("{attack:integer,defense:integer}", "attack=5, defense=3"),
            "attack=5,defense=3"
        );
    }

    #[test]
    fn test_tuple_roundtrip() {
        assert_eq!(roundtrip("{integer,string}", r#"5,"five""#), r#"5,"five""#);
    }

    #[test]
    fn test_percent_reformat() {
        assert_eq!(roundtrip("percent", "3/5"), "60%");
        assert_eq!(roundtrip("ratio", "a=50%,b=50%"), "a=50%,b=50%");
    }

    #[test]
    fn test_reformat_idempotent() {
        for (spec, raw) in [
            ("{integer}", "1,2,3"),
            ("{attack:integer,defense:integer}", "defense=3,attack=5"),
            ("integer|string", "10 kg"),
            ("float", "7"),
        ] {
            let first = roundtrip(spec, raw);
            let second = roundtrip(spec, &first);
            assert_eq!(first, second, "reformat not idempotent for {}", spec);
        }
    }

    #[test]
    fn test_ancestor_cell() {
        let mut registry = TypeRegistry::new();
        registry
            .register(&crate::registry::CustomTypeSpec {
                name: "Hp".to_string(),
                parent: Some("integer".to_string()),
                constraints: Default::default(),
            })
            .unwrap();
        let mut sink = ErrorSink::new();
        let ty = crate::typespec::parse_type_spec("{extends,number}").unwrap();
        let mut cx = ParseCx {
            registry: &registry,
            sink: &mut sink,
        };
        assert_eq!(
            parse_cell(&ty, "Hp", &mut cx),
            Some(Value::TypeName("Hp".to_string()))
        );
        assert!(parse_cell(&ty, "string", &mut cx).is_none());
    }

    #[test]
    fn test_custom_range_message() {
        let mut registry = TypeRegistry::new();
        let mut spec = crate::registry::CustomTypeSpec {
            name: "percentage".to_string(),
            parent: Some("number".to_string()),
            constraints: Default::default(),
        };
        spec.constraints.min = Some(0.0);
        spec.constraints.max = Some(100.0);
        registry.register(&spec).unwrap();

        let mut sink = ErrorSink::new();
        let mut cx = ParseCx {
            registry: &registry,
            sink: &mut sink,
        };
        assert_eq!(parse_named("percentage", "50", &mut cx), Some(Value::Int(50)));
        assert!(parse_named("percentage", "150", &mut cx).is_none());
        assert!(sink.reports().iter().any(|r| r.message == "must be 0..100"));
    }
}
