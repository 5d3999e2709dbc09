//! Column pipeline
//!
//! Compiles header tokens (`name:typeSpec[:default]`) into column specs:
//! parsed type expressions, literal or expression defaults, exploded paths,
//! and the compile-time checks on self-referencing column types.

pub mod explode;
pub mod schedule;

pub use explode::{assemble, parse_column_path, ColumnPath, PathSeg};
pub use schedule::evaluation_order;

use crate::expr::{parse_expr, Expr};
use crate::registry::{TypeKind, TypeRegistry};
use crate::report::ErrorSink;
use crate::typespec::{parse_type_spec, SelfKey, TypeExpr};
use std::sync::Arc;

/// A column default: literal text, or an `=`-prefixed expression
#[derive(Debug, Clone)]
pub enum ColumnDefault {
    Literal(String),
    Expr { src: String, compiled: Arc<Expr> },
}

/// A compiled header column
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    /// Full header name, including any exploded path
    pub name: String,
    pub path: ColumnPath,
    /// Type-spec source text, for reports and re-emission
    pub spec_src: String,
    pub ty: TypeExpr,
    pub default: Option<ColumnDefault>,
}

impl ColumnSpec {
    /// Header token for canonical re-emission
    pub fn header_token(&self) -> String {
        match &self.default {
            None => format!("{}:{}", self.name, self.spec_src),
            Some(ColumnDefault::Literal(text)) => {
                format!("{}:{}:{}", self.name, self.spec_src, text)
            }
            Some(ColumnDefault::Expr { src, .. }) => {
                format!("{}:{}:={}", self.name, self.spec_src, src)
            }
        }
    }
}

/// Compile one `name:typeSpec[:default]` header token.
///
/// Only the first two `:` separate; a default may contain further colons.
pub fn make_column_parser(token: &str, sink: &mut ErrorSink) -> Option<ColumnSpec> {
    let Some((name, rest)) = token.split_once(':') else {
        sink.error_value(token, "expected name:typeSpec in header");
        return None;
    };
    let (spec_src, default_src) = match rest.split_once(':') {
        Some((spec, default)) => (spec, Some(default)),
        None => (rest, None),
    };

    let path = match parse_column_path(name.trim()) {
        Ok(path) => path,
        Err(e) => {
            sink.error_value(name, e);
            return None;
        }
    };

    let spec_src = spec_src.trim();
    let ty = match parse_type_spec(spec_src) {
        Ok(ty) => ty,
        Err(e) => {
            sink.error_value(spec_src, format!("bad type spec: {}", e));
            return None;
        }
    };

    let default = match default_src {
        None => None,
        Some(src) => match src.strip_prefix('=') {
            Some(expr_src) => match parse_expr(expr_src) {
                Ok(compiled) => Some(ColumnDefault::Expr {
                    src: expr_src.to_string(),
                    compiled: Arc::new(compiled),
                }),
                Err(e) => {
                    // syntax errors report once, at compile
                    sink.error_value(expr_src, format!("bad default expression: {}", e));
                    return None;
                }
            },
            None => Some(ColumnDefault::Literal(src.to_string())),
        },
    };

    Some(ColumnSpec {
        name: name.trim().to_string(),
        path,
        spec_src: spec_src.to_string(),
        ty,
        default,
    })
}

/// Compile a whole header row
pub fn compile_header(
    tokens: &[String],
    registry: &TypeRegistry,
    sink: &mut ErrorSink,
) -> Option<Vec<ColumnSpec>> {
    if tokens.is_empty() {
        sink.error("empty header row");
        return None;
    }
    let mut columns = Vec::with_capacity(tokens.len());
    for token in tokens {
        columns.push(make_column_parser(token, sink)?);
    }
    for (i, column) in columns.iter().enumerate() {
        if columns[..i].iter().any(|c| c.name == column.name) {
            sink.error_value(&column.name, format!("duplicate column: {}", column.name));
            return None;
        }
    }
    check_self_refs(&columns, registry, sink)?;
    Some(columns)
}

/// Resolve a `self.*` key to a column index
pub fn resolve_self_key(columns: &[ColumnSpec], key: &SelfKey) -> Option<usize> {
    match key {
        SelfKey::Index(i) => (*i >= 1 && *i <= columns.len()).then(|| *i - 1),
        SelfKey::Field(name) => columns.iter().position(|c| &c.name == name),
    }
}

/// Compile-time checks for self-referencing column types: the referenced
/// sibling must exist, must statically yield type names, and must not be a
/// self reference itself (no chains, no self-pointing).
fn check_self_refs(
    columns: &[ColumnSpec],
    registry: &TypeRegistry,
    sink: &mut ErrorSink,
) -> Option<()> {
    let mut ok = true;
    for (i, column) in columns.iter().enumerate() {
        let TypeExpr::SelfRef(key) = &column.ty else {
            continue;
        };
        let Some(target) = resolve_self_key(columns, key) else {
            sink.error_value(&column.name, format!("{} points at no column", key));
            ok = false;
            continue;
        };
        if target == i {
            sink.error_value(&column.name, format!("{} points at its own column", key));
            ok = false;
            continue;
        }
        if matches!(columns[target].ty, TypeExpr::SelfRef(_)) {
            sink.error_value(
                &column.name,
                format!("{} points at another self reference", key),
            );
            ok = false;
            continue;
        }
        if !column_yields_type_names(&columns[target].ty, registry) {
            sink.error_value(
                &column.name,
                format!(
                    "{} points at a {} column, which never holds type names",
                    key, columns[target].spec_src
                ),
            );
            ok = false;
        }
    }
    ok.then_some(())
}

/// Can values of this column type name registered types? (`type`,
/// `type_spec`, `name`, ancestor constraints, and tags qualify.)
fn yields_type_names(ty: &TypeExpr) -> bool {
    match ty {
        TypeExpr::Named(name) => {
            matches!(name.as_str(), "type" | "type_spec" | "name" | "super_type")
        }
        TypeExpr::Ancestor(_) => true,
        TypeExpr::Union(alts) => alts
            .iter()
            .all(|a| matches!(a, TypeExpr::Nil) || yields_type_names(a)),
        _ => false,
    }
}

/// Like [`yields_type_names`] but consulting the registry, so registered
/// tags and aliases of `type` qualify too
pub fn column_yields_type_names(ty: &TypeExpr, registry: &TypeRegistry) -> bool {
    if yields_type_names(ty) {
        return true;
    }
    match ty {
        TypeExpr::Named(name) => match registry.get(name) {
            Some(meta) if meta.kind == TypeKind::Tag => true,
            Some(_) => registry
                .ancestor_chain(name)
                .iter()
                .any(|m| matches!(m.name.as_str(), "type" | "type_spec" | "name")),
            None => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(tokens: &[&str]) -> (Option<Vec<ColumnSpec>>, usize) {
        let mut sink = ErrorSink::new();
        let registry = TypeRegistry::new();
        let tokens: Vec<String> = tokens.iter().map(|s| s.to_string()).collect();
        let columns = compile_header(&tokens, &registry, &mut sink);
        (columns, sink.error_count())
    }

    #[test]
    fn test_plain_column_spec() {
        let (columns, errors) = header(&["id:identifier", "level:integer"]);
        let columns = columns.unwrap();
        assert_eq!(errors, 0);
        assert_eq!(columns[0].name, "id");
        assert!(columns[0].default.is_none());
    }

    #[test]
    fn test_default_with_colons() {
        let (columns, _) = header(&["url:http:http://example.com/a:b"]);
        let columns = columns.unwrap();
        let Some(ColumnDefault::Literal(text)) = &columns[0].default else {
            panic!("expected literal default");
        };
        assert_eq!(text, "http://example.com/a:b");
    }

    #[test]
    fn test_expression_default() {
        let (columns, errors) = header(&["total:integer:=self.a + self.b", "a:integer", "b:integer"]);
        let columns = columns.unwrap();
        assert_eq!(errors, 0);
        assert!(matches!(
            columns[0].default,
            Some(ColumnDefault::Expr { .. })
        ));
    }

    #[test]
    fn test_bad_expression_default_reports() {
        let (columns, errors) = header(&["total:integer:=self.+"]);
        assert!(columns.is_none());
        assert_eq!(errors, 1);
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let (columns, errors) = header(&["id:identifier", "id:integer"]);
        assert!(columns.is_none());
        assert!(errors > 0);
    }

    #[test]
    fn test_self_ref_checks() {
        // valid: points at a type column
        let (columns, errors) = header(&["kind:type", "payload:self.kind"]);
        assert!(columns.is_some());
        assert_eq!(errors, 0);

        // self-pointing
        let (columns, _) = header(&["payload:self.payload"]);
        assert!(columns.is_none());

        // chained self references
        let (columns, _) = header(&["kind:type", "a:self.kind", "b:self.a"]);
        assert!(columns.is_none());

        // target never yields type names
        let (columns, _) = header(&["kind:integer", "payload:self.kind"]);
        assert!(columns.is_none());
    }

    #[test]
    fn test_positional_self_ref() {
        let (columns, errors) = header(&["kind:type", "payload:self._1"]);
        assert!(columns.is_some());
        assert_eq!(errors, 0);
    }
}
