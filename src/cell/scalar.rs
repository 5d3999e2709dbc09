//! Built-in scalar parsers
//!
//! One entry point, dispatched by built-in type name. Every parser reports
//! through the sink and returns `None` on failure so union trials can roll
//! the reports back.

use super::ParseCx;
use crate::registry::naming;
use crate::typespec::TypeExpr;
use crate::value::Value;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;

/// Largest integer magnitude exactly representable as an IEEE double
pub const SAFE_INTEGER: i64 = 1 << 53;

static HTTP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://\S+$").unwrap());

/// Parse `raw` as the built-in scalar type `name`
pub(crate) fn parse_builtin(name: &str, raw: &str, cx: &mut ParseCx) -> Option<Value> {
    parse_builtin_with(name, raw, false, cx)
}

/// `decoded` marks text whose escapes were already decoded by the container
/// tokenizer (quoted positions), so the text family must not decode twice
pub(crate) fn parse_builtin_with(
    name: &str,
    raw: &str,
    decoded: bool,
    cx: &mut ParseCx,
) -> Option<Value> {
    match name {
        "boolean" => parse_boolean(raw, cx),
        "integer" => {
            let v = parse_i64(raw, cx)?;
            if !(-SAFE_INTEGER..=SAFE_INTEGER).contains(&v) {
                cx.sink.error_value(raw, "integer outside the safe range +/-2^53");
                return None;
            }
            Some(Value::Int(v))
        }
        // i64 is exact on every host this crate targets
        "long" => parse_i64(raw, cx).map(Value::Int),
        "float" => parse_f64(raw, cx).map(Value::Float),
        "number" => match raw.parse::<i64>() {
            Ok(v) => Some(Value::Int(v)),
            Err(_) => parse_f64(raw, cx).map(Value::Float),
        },
        "percent" => parse_percent(raw, cx),
        "string" => Some(Value::Str(raw.to_string())),
        "ascii" => {
            if !is_printable_ascii(raw) {
                cx.sink.error_value(raw, "non-printable or non-ASCII character");
                return None;
            }
            Some(Value::Str(raw.to_string()))
        }
        "text" | "markdown" | "comment" => {
            let text = if decoded {
                raw.to_string()
            } else {
                super::lex::unescape(raw)
            };
            Some(Value::Str(text))
        }
        "asciitext" | "asciimarkdown" => {
            let text = if decoded {
                raw.to_string()
            } else {
                super::lex::unescape(raw)
            };
            if !text.chars().all(|c| c == '\t' || c == '\n' || is_printable_ascii_char(c)) {
                cx.sink.error_value(raw, "non-printable or non-ASCII character");
                return None;
            }
            Some(Value::Str(text))
        }
        "identifier" => {
            if !naming::is_identifier(raw) {
                cx.sink.error_value(raw, "not a legal identifier");
                return None;
            }
            Some(Value::Str(raw.to_string()))
        }
        "name" | "package_id" => {
            if !naming::is_name(raw) {
                cx.sink.error_value(raw, "not a legal dotted name");
                return None;
            }
            Some(Value::Str(raw.to_string()))
        }
        "version" => match Version::parse(raw) {
            Ok(v) => Some(Value::Str(v.to_string())),
            Err(e) => {
                cx.sink.error_value(raw, format!("not an x.y.z version: {}", e));
                None
            }
        },
        "cmp_version" => parse_cmp_version(raw, cx),
        "http" => {
            if !HTTP_RE.is_match(raw) {
                cx.sink.error_value(raw, "not an http(s) URL");
                return None;
            }
            Some(Value::Str(raw.to_string()))
        }
        "regex" => match Regex::new(raw) {
            Ok(_) => Some(Value::Str(raw.to_string())),
            Err(e) => {
                cx.sink.error_value(raw, format!("invalid regex: {}", e));
                None
            }
        },
        "hexbytes" => parse_hexbytes(raw, cx),
        "base64bytes" => match base64::engine::general_purpose::STANDARD.decode(raw) {
            Ok(bytes) => Some(Value::Bytes(bytes)),
            Err(e) => {
                cx.sink.error_value(raw, format!("invalid base64: {}", e));
                None
            }
        },
        "type" => {
            let meta = cx.registry.resolve(raw, cx.sink)?;
            Some(Value::TypeName(meta.name.clone()))
        }
        "nil" => {
            if raw.is_empty() {
                Some(Value::Nil)
            } else {
                cx.sink.error_value(raw, "expected an empty cell for nil");
                None
            }
        }
        "true" => {
            if raw == "true" {
                Some(Value::Bool(true))
            } else {
                cx.sink.error_value(raw, "expected true");
                None
            }
        }
        "type_spec" => parse_type_spec_cell(raw, cx),
        other => {
            cx.sink
                .error_value(raw, format!("no parser for built-in {}", other));
            None
        }
    }
}

fn parse_boolean(raw: &str, cx: &mut ParseCx) -> Option<Value> {
    match raw {
        "true" | "yes" | "1" => Some(Value::Bool(true)),
        "false" | "no" | "0" => Some(Value::Bool(false)),
        _ => {
            cx.sink.error_value(raw, "not a boolean");
            None
        }
    }
}

fn parse_i64(raw: &str, cx: &mut ParseCx) -> Option<i64> {
    match raw.parse::<i64>() {
        Ok(v) => Some(v),
        Err(_) => {
            cx.sink.error_value(raw, "not an integer");
            None
        }
    }
}

fn parse_f64(raw: &str, cx: &mut ParseCx) -> Option<f64> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(v),
        _ => {
            cx.sink.error_value(raw, "not a finite number");
            None
        }
    }
}

/// `<n>%` or `<int>/<int>`, yielding a plain number (50% -> 0.5)
fn parse_percent(raw: &str, cx: &mut ParseCx) -> Option<Value> {
    if let Some(head) = raw.strip_suffix('%') {
        let n = match head.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => n,
            _ => {
                cx.sink.error_value(raw, "not a percentage");
                return None;
            }
        };
        return Some(Value::Float(n / 100.0));
    }
    if let Some((num, den)) = raw.split_once('/') {
        let (Ok(num), Ok(den)) = (num.trim().parse::<i64>(), den.trim().parse::<i64>()) else {
            cx.sink.error_value(raw, "not an <int>/<int> fraction");
            return None;
        };
        if den == 0 {
            cx.sink.error_value(raw, "zero denominator");
            return None;
        }
        return Some(Value::Float(num as f64 / den as f64));
    }
    cx.sink.error_value(raw, "expected <n>% or <int>/<int>");
    None
}

fn parse_cmp_version(raw: &str, cx: &mut ParseCx) -> Option<Value> {
    const OPS: [&str; 6] = ["==", "!=", "<=", ">=", "<", ">"];
    let op = OPS.iter().find(|op| raw.starts_with(**op));
    let Some(op) = op else {
        cx.sink.error_value(raw, "expected a comparison operator before the version");
        return None;
    };
    match Version::parse(&raw[op.len()..]) {
        Ok(v) => Some(Value::Str(format!("{}{}", op, v))),
        Err(e) => {
            cx.sink.error_value(raw, format!("not an <op>x.y.z version: {}", e));
            None
        }
    }
}

fn parse_hexbytes(raw: &str, cx: &mut ParseCx) -> Option<Value> {
    if raw.len() % 2 != 0 {
        cx.sink.error_value(raw, "odd-length hex string");
        return None;
    }
    match hex::decode(raw) {
        Ok(bytes) => Some(Value::Bytes(bytes)),
        Err(e) => {
            cx.sink.error_value(raw, format!("invalid hex: {}", e));
            None
        }
    }
}

/// `type_spec` cells must parse and reference only registered names
fn parse_type_spec_cell(raw: &str, cx: &mut ParseCx) -> Option<Value> {
    let spec = match crate::typespec::parse_type_spec(raw) {
        Ok(spec) => spec,
        Err(e) => {
            cx.sink.error_value(raw, format!("invalid type spec: {}", e));
            return None;
        }
    };
    let mut names = Vec::new();
    collect_named(&spec, &mut names);
    let mut ok = true;
    for name in names {
        if cx.registry.resolve(&name, cx.sink).is_none() {
            ok = false;
        }
    }
    ok.then(|| Value::Str(spec.to_string()))
}

fn collect_named(expr: &TypeExpr, out: &mut Vec<String>) {
    match expr {
        TypeExpr::Named(name) => out.push(name.clone()),
        TypeExpr::Union(items) | TypeExpr::Tuple(items) => {
            items.iter().for_each(|e| collect_named(e, out));
        }
        TypeExpr::Array(elem) => collect_named(elem, out),
        TypeExpr::Map(k, v) => {
            collect_named(k, out);
            collect_named(v, out);
        }
        TypeExpr::Record(fields) => fields.iter().for_each(|f| collect_named(&f.ty, out)),
        TypeExpr::ExtendsRecord { parent, fields } => {
            out.push(parent.clone());
            fields.iter().for_each(|f| collect_named(&f.ty, out));
        }
        TypeExpr::ExtendsTuple { parent, elems } => {
            out.push(parent.clone());
            elems.iter().for_each(|e| collect_named(e, out));
        }
        TypeExpr::Ancestor(Some(parent)) => out.push(parent.clone()),
        _ => {}
    }
}

fn is_printable_ascii(s: &str) -> bool {
    s.chars().all(is_printable_ascii_char)
}

fn is_printable_ascii_char(c: char) -> bool {
    ('\x20'..='\x7e').contains(&c)
}
