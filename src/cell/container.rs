//! Container cell parsing
//!
//! Arrays, maps, tuples, records, extends-records/tuples, and the loose
//! `table` type. Top-level container cells carry no outer braces; nested
//! containers are brace-wrapped and nested strings are quoted.

use super::lex::{self, Tok};
use super::{parse_named, ParseCx};
use crate::registry::TypeRegistry;
use crate::typespec::{FieldDecl, TypeExpr};
use crate::value::Value;
use indexmap::IndexMap;

/// Parse a container-shaped type spec against cell text
pub(super) fn parse_container(
    ty: &TypeExpr,
    raw: &str,
    cx: &mut ParseCx,
) -> Option<Value> {
    let Some(mut toks) = lex::split_top(raw) else {
        cx.sink.error_value(raw, "unbalanced quotes or braces");
        return None;
    };
    // tolerate a fully braced cell for record/map/tuple/table shapes (the
    // collapsed-emission form); arrays disambiguate on their own
    if toks.len() == 1
        && toks[0].braced
        && !matches!(ty, TypeExpr::Array(_))
    {
        match lex::split_top(&toks[0].text) {
            Some(inner) => toks = inner,
            None => {
                cx.sink.error_value(raw, "unbalanced quotes or braces");
                return None;
            }
        }
    }
    match ty {
        TypeExpr::Array(elem) => parse_array(elem, raw, toks, cx),
        TypeExpr::Map(key, value) => parse_map(key, value, toks, cx),
        TypeExpr::Tuple(elems) => parse_tuple(elems, toks, cx),
        TypeExpr::Record(fields) => parse_record(fields.clone(), toks, cx),
        TypeExpr::ExtendsRecord { parent, fields } => {
            let merged = merge_record_fields(parent, fields, cx)?;
            parse_record(merged, toks, cx)
        }
        TypeExpr::ExtendsTuple { parent, elems } => {
            let merged = merge_tuple_elems(parent, elems, cx)?;
            parse_tuple(&merged, toks, cx)
        }
        TypeExpr::Table => parse_table_generic(toks, cx),
        other => {
            cx.sink
                .error_value(raw, format!("{} is not a container type", other));
            None
        }
    }
}

fn merge_record_fields(
    parent: &str,
    fields: &[FieldDecl],
    cx: &mut ParseCx,
) -> Option<Vec<FieldDecl>> {
    let registry = cx.registry;
    let Some(mut merged) = registry.fields_of(parent) else {
        cx.sink
            .error_value(parent, format!("{} is not a record type", parent));
        return None;
    };
    for field in fields {
        match merged.iter_mut().find(|f| f.name == field.name) {
            Some(slot) => slot.ty = field.ty.clone(),
            None => merged.push(field.clone()),
        }
    }
    Some(merged)
}

fn merge_tuple_elems(
    parent: &str,
    elems: &[TypeExpr],
    cx: &mut ParseCx,
) -> Option<Vec<TypeExpr>> {
    let registry = cx.registry;
    let Some(mut merged) = registry.tuple_types(parent) else {
        cx.sink
            .error_value(parent, format!("{} is not a tuple type", parent));
        return None;
    };
    merged.extend(elems.iter().cloned());
    Some(merged)
}

fn parse_array(elem: &TypeExpr, raw: &str, mut toks: Vec<Tok>, cx: &mut ParseCx) -> Option<Value> {
    // a fully braced cell is the array itself unless the element is a container
    if toks.len() == 1 && toks[0].braced && !is_container_shaped(elem, cx.registry) {
        match lex::split_top(&toks[0].text) {
            Some(inner) => toks = inner,
            None => {
                cx.sink.error_value(raw, "unbalanced quotes or braces");
                return None;
            }
        }
    }
    if toks.len() == 1 && !toks[0].braced && !toks[0].quoted && is_string_shaped(elem, cx.registry) {
        cx.sink
            .warn_value(&toks[0].text, "bare single value in an array cell: wrap in {}");
    }
    let mut items = Vec::with_capacity(toks.len());
    let multi = toks.len() > 1;
    for tok in &toks {
        items.push(parse_element(elem, tok, multi, cx)?);
    }
    Some(Value::Array(items))
}

fn parse_map(
    key_ty: &TypeExpr,
    value_ty: &TypeExpr,
    toks: Vec<Tok>,
    cx: &mut ParseCx,
) -> Option<Value> {
    let set_valued = matches!(value_ty, TypeExpr::True);
    let mut entries = IndexMap::new();
    let multi = toks.len() > 1;
    for tok in &toks {
        let (key_value, value) = if set_valued {
            (parse_element(key_ty, tok, multi, cx)?, Value::Bool(true))
        } else {
            let Some((key_text, value_text)) = lex::split_kv(&tok.text) else {
                cx.sink.error_value(&tok.text, "expected key=value");
                return None;
            };
            let key_tok = subtok(key_text, cx)?;
            let value_tok = subtok(value_text, cx)?;
            (
                parse_element(key_ty, &key_tok, true, cx)?,
                parse_element(value_ty, &value_tok, true, cx)?,
            )
        };
        let key = super::reformat_nested(Some(key_ty), &key_value, cx.registry);
        if entries.insert(key.clone(), value).is_some() {
            cx.sink.error_value(&key, "duplicate map key");
            return None;
        }
    }
    Some(Value::Map(entries))
}

fn parse_tuple(elems: &[TypeExpr], toks: Vec<Tok>, cx: &mut ParseCx) -> Option<Value> {
    if toks.len() != elems.len() {
        cx.sink.error(format!(
            "expected {} tuple elements, found {}",
            elems.len(),
            toks.len()
        ));
        return None;
    }
    let multi = toks.len() > 1;
    let mut items = Vec::with_capacity(elems.len());
    for (elem_ty, tok) in elems.iter().zip(&toks) {
        items.push(parse_element(elem_ty, tok, multi, cx)?);
    }
    Some(Value::Tuple(items))
}

fn parse_record(fields: Vec<FieldDecl>, toks: Vec<Tok>, cx: &mut ParseCx) -> Option<Value> {
    let mut provided: IndexMap<String, Value> = IndexMap::new();
    for tok in &toks {
        let Some((name, value_text)) = lex::split_kv(&tok.text) else {
            cx.sink.error_value(&tok.text, "expected field=value");
            return None;
        };
        let name = name.trim();
        let Some(field) = fields.iter().find(|f| f.name == name) else {
            cx.sink.error_value(name, format!("unknown field: {}", name));
            return None;
        };
        if matches!(field.ty, TypeExpr::Nil) {
            cx.sink.error_value(
                name,
                format!("field {} is omitted by this type and cannot be set", name),
            );
            return None;
        }
        if provided.contains_key(name) {
            cx.sink.error_value(name, format!("duplicate field: {}", name));
            return None;
        }
        let value_tok = subtok(value_text, cx)?;
        let value = parse_element(&field.ty, &value_tok, true, cx)?;
        provided.insert(name.to_string(), value);
    }

    // assemble in declaration order; optional fields may be absent
    let mut record = IndexMap::new();
    for field in &fields {
        match provided.swap_remove(&field.name) {
            Some(value) => {
                record.insert(field.name.clone(), value);
            }
            None => {
                let omitted = matches!(field.ty, TypeExpr::Nil);
                if !omitted && !field.is_optional() {
                    cx.sink
                        .error(format!("missing required field: {}", field.name));
                    return None;
                }
            }
        }
    }
    Some(Value::Record(record))
}

/// Loose parsing for the bare `table` type: `k=v` entries make a map,
/// anything else makes an array of guessed scalars
fn parse_table_generic(toks: Vec<Tok>, cx: &mut ParseCx) -> Option<Value> {
    let all_kv = toks
        .iter()
        .all(|t| !t.quoted && !t.braced && lex::split_kv(&t.text).is_some());
    if all_kv {
        let mut entries = IndexMap::new();
        for tok in &toks {
            let (key, value_text) = lex::split_kv(&tok.text).expect("checked above");
            let value_tok = subtok(value_text, cx)?;
            let value = generic_value(&value_tok, cx)?;
            if entries.insert(key.trim().to_string(), value).is_some() {
                cx.sink.error_value(key, "duplicate map key");
                return None;
            }
        }
        return Some(Value::Map(entries));
    }
    let mut items = Vec::with_capacity(toks.len());
    for tok in &toks {
        items.push(generic_value(tok, cx)?);
    }
    Some(Value::Array(items))
}

fn generic_value(tok: &Tok, cx: &mut ParseCx) -> Option<Value> {
    if tok.braced {
        let Some(inner) = lex::split_top(&tok.text) else {
            cx.sink.error_value(&tok.text, "unbalanced quotes or braces");
            return None;
        };
        return parse_table_generic(inner, cx);
    }
    if tok.quoted {
        return Some(Value::Str(lex::unescape(&tok.text)));
    }
    let text = tok.text.as_str();
    if text.is_empty() {
        return Some(Value::Nil);
    }
    if text == "true" {
        return Some(Value::Bool(true));
    }
    if text == "false" {
        return Some(Value::Bool(false));
    }
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Int(i));
    }
    if let Ok(f) = text.parse::<f64>() {
        if f.is_finite() {
            return Some(Value::Float(f));
        }
    }
    Some(Value::Str(text.to_string()))
}

/// Re-tokenize a `key=` / `=value` fragment of a map or record entry
fn subtok(text: &str, cx: &mut ParseCx) -> Option<Tok> {
    match lex::split_top(text) {
        Some(mut toks) if toks.len() == 1 => Some(toks.pop().expect("one token")),
        _ => {
            cx.sink.error_value(text, "malformed container entry");
            None
        }
    }
}

/// Parse one container element token against its declared type
pub(super) fn parse_element(
    ty: &TypeExpr,
    tok: &Tok,
    multi: bool,
    cx: &mut ParseCx,
) -> Option<Value> {
    match ty {
        TypeExpr::Nil => {
            if tok.text.is_empty() && !tok.quoted && !tok.braced {
                Some(Value::Nil)
            } else {
                cx.sink.error_value(&tok.text, "expected an empty cell for nil");
                None
            }
        }
        TypeExpr::True => {
            if !tok.quoted && !tok.braced && tok.text == "true" {
                Some(Value::Bool(true))
            } else {
                cx.sink.error_value(&tok.text, "expected true");
                None
            }
        }
        TypeExpr::Union(alts) => {
            if tok.text.is_empty() && !tok.quoted && !tok.braced && ty.admits_nil() {
                return Some(Value::Nil);
            }
            let mut best: Option<Vec<crate::report::Report>> = None;
            for alt in alts {
                let cp = cx.sink.checkpoint();
                if let Some(value) = parse_element(alt, tok, multi, cx) {
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
                    .error_value(&tok.text, format!("no union alternative matched {}", ty)),
            }
            None
        }
        TypeExpr::Enum(labels) => parse_enum_element(labels, tok, cx),
        TypeExpr::Ancestor(ancestor) => {
            super::parse_ancestor(ancestor.as_deref(), tok.text.as_str(), cx)
        }
        TypeExpr::SelfRef(key) => {
            cx.sink
                .error(format!("unresolved self reference {} in a nested type", key));
            None
        }
        TypeExpr::Named(name) => parse_named_element(name, tok, multi, cx),
        container => {
            if tok.braced {
                parse_container(container, &tok.text, cx)
            } else {
                cx.sink
                    .error_value(&tok.text, "nested containers must be brace-wrapped");
                None
            }
        }
    }
}

fn parse_enum_element(labels: &[String], tok: &Tok, cx: &mut ParseCx) -> Option<Value> {
    if tok.quoted || tok.braced {
        cx.sink.error_value(&tok.text, "enum values are written verbatim");
        return None;
    }
    if labels.iter().any(|l| l == &tok.text) {
        Some(Value::Str(tok.text.clone()))
    } else {
        cx.sink.error_value(
            &tok.text,
            format!("expected one of: {}", labels.join("|")),
        );
        None
    }
}

fn parse_named_element(name: &str, tok: &Tok, multi: bool, cx: &mut ParseCx) -> Option<Value> {
    let registry = cx.registry;
    if tok.braced {
        let Some(expr) = registry.structural_expr(name) else {
            cx.sink
                .error_value(&tok.text, format!("{} is not a container type", name));
            return None;
        };
        if !shaped_as_container(expr) {
            // a braced token against a scalar union (e.g. raw) re-enters trials
            return parse_named(name, &format!("{{{}}}", tok.text), cx);
        }
        return parse_container(expr, &tok.text, cx);
    }
    if tok.quoted {
        // escapes were decoded by the tokenizer
        let decoded = lex::unescape(&tok.text);
        if !is_string_shaped(&TypeExpr::Named(name.to_string()), cx.registry) {
            cx.sink
                .error_value(&tok.text, format!("{} values are never quoted", name));
            return None;
        }
        return super::parse_named_decoded(name, &decoded, cx);
    }
    if multi && is_free_text(name, cx.registry) {
        cx.sink.error_value(
            &tok.text,
            "strings inside multi-entry containers must be quoted",
        );
        return None;
    }
    parse_named(name, &tok.text, cx)
}

/// Does the type resolve to a container shape (needs braces when nested)?
pub(super) fn is_container_shaped(ty: &TypeExpr, registry: &TypeRegistry) -> bool {
    match ty {
        TypeExpr::Named(name) => registry
            .structural_expr(name)
            .map(shaped_as_container)
            .unwrap_or(false),
        other => shaped_as_container(other),
    }
}

fn shaped_as_container(ty: &TypeExpr) -> bool {
    matches!(
        ty,
        TypeExpr::Array(_)
            | TypeExpr::Map(..)
            | TypeExpr::Tuple(_)
            | TypeExpr::Record(_)
            | TypeExpr::Table
            | TypeExpr::ExtendsRecord { .. }
            | TypeExpr::ExtendsTuple { .. }
    )
}

/// Does the type accept free string text (and so want quoting in containers)?
pub(super) fn is_string_shaped(ty: &TypeExpr, registry: &TypeRegistry) -> bool {
    match ty {
        TypeExpr::Named(name) => {
            if is_free_text(name, registry) {
                return true;
            }
            match registry.structural_expr(name) {
                Some(TypeExpr::Union(alts)) => {
                    alts.iter().any(|a| is_string_shaped(a, registry))
                }
                _ => false,
            }
        }
        TypeExpr::Union(alts) => alts.iter().any(|a| is_string_shaped(a, registry)),
        _ => false,
    }
}

/// Free-text string family: quoted inside containers. Identifier-like
/// strings (identifiers, names, versions, type names) stay verbatim.
fn is_free_text(name: &str, registry: &TypeRegistry) -> bool {
    let mut current = name;
    loop {
        match current {
            "string" | "text" | "markdown" | "comment" | "regex" => return true,
            "ascii" | "asciitext" | "asciimarkdown" => return true,
            "identifier" | "name" | "version" | "cmp_version" | "http" | "type"
            | "type_spec" | "hexbytes" | "base64bytes" | "package_id" => return false,
            _ => match registry.parent_of(current) {
                Some(parent) => current = parent,
                None => return false,
            },
        }
    }
}
