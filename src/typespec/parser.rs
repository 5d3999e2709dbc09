//! Recursive-descent parser for type-spec strings
//!
//! Implements the column-header type grammar: unions, arrays, maps, tuples,
//! records, enums, `extends` inheritance, ancestor constraints, and
//! self-references. Insertion order of record fields, union alternatives,
//! and tuple elements is preserved in the AST.

use super::ast::{FieldDecl, SelfKey, TypeExpr};
use super::lexer::{Lexer, Token, TokenKind};
use crate::registry::naming;
use std::fmt;

/// A type-spec parse failure with its byte offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecError {
    pub message: String,
    pub pos: usize,
}

impl fmt::Display for SpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at offset {})", self.message, self.pos)
    }
}

impl std::error::Error for SpecError {}

/// Parse a type-spec string into a [`TypeExpr`]
pub fn parse_type_spec(source: &str) -> Result<TypeExpr, SpecError> {
    let tokens = Lexer::new(source).tokenize().map_err(|pos| SpecError {
        message: "unexpected character in type spec".to_string(),
        pos,
    })?;
    let mut parser = Parser { tokens, pos: 0 };
    let spec = parser.parse_top()?;
    parser.expect_eof()?;
    Ok(spec)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// One comma-separated item inside braces, before record/map/tuple/array
/// disambiguation
enum Entry {
    Plain(TypeExpr),
    Keyed(TypeExpr, TypeExpr),
}

impl Parser {
    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, SpecError> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, SpecError> {
        match &self.current().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(format!("expected {}", what))),
        }
    }

    fn expect_eof(&self) -> Result<(), SpecError> {
        if self.check(&TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.error("trailing input after type spec".to_string()))
        }
    }

    fn error(&self, message: String) -> SpecError {
        SpecError {
            message,
            pos: self.current().pos,
        }
    }

    /// TypeSpec := SelfRef | Union
    fn parse_top(&mut self) -> Result<TypeExpr, SpecError> {
        if let TokenKind::Ident(name) = &self.current().kind {
            if name == "self" {
                return self.parse_self_ref();
            }
        }
        self.parse_union()
    }

    /// SelfRef := 'self.' Ident | 'self._' Integer
    fn parse_self_ref(&mut self) -> Result<TypeExpr, SpecError> {
        self.advance(); // self
        self.expect(TokenKind::Dot, "'.' after self")?;
        let field = self.expect_ident("column name or _N after 'self.'")?;
        if let Some(digits) = field.strip_prefix('_') {
            if let Ok(index) = digits.parse::<usize>() {
                if index == 0 {
                    return Err(self.error("self._N positions are 1-based".to_string()));
                }
                return Ok(TypeExpr::SelfRef(SelfKey::Index(index)));
            }
        }
        if !naming::is_field_name(&field) {
            return Err(self.error(format!("invalid column name in self reference: {}", field)));
        }
        Ok(TypeExpr::SelfRef(SelfKey::Field(field)))
    }

    /// Union := UnionAtom ('|' UnionAtom)*
    fn parse_union(&mut self) -> Result<TypeExpr, SpecError> {
        let mut alts = vec![self.parse_atom()?];
        while self.eat(&TokenKind::Pipe) {
            alts.push(self.parse_atom()?);
        }
        if alts.len() == 1 {
            return Ok(alts.pop().unwrap());
        }
        self.validate_union(&alts)?;
        Ok(TypeExpr::Union(alts))
    }

    fn validate_union(&self, alts: &[TypeExpr]) -> Result<(), SpecError> {
        let mut seen = Vec::new();
        for alt in alts {
            let repr = alt.to_string();
            if seen.contains(&repr) {
                return Err(self.error(format!("duplicate union alternative: {}", repr)));
            }
            seen.push(repr);
        }
        if let Some(nil_at) = alts.iter().position(|a| matches!(a, TypeExpr::Nil)) {
            if nil_at != alts.len() - 1 {
                return Err(self.error("nil must be the last union alternative".to_string()));
            }
        }
        // string matches everything, so alternatives after it are unreachable
        if let Some(string_at) = alts
            .iter()
            .position(|a| matches!(a, TypeExpr::Named(n) if n == "string"))
        {
            let last_non_nil = alts
                .iter()
                .rposition(|a| !matches!(a, TypeExpr::Nil))
                .unwrap_or(0);
            if string_at != last_non_nil {
                return Err(
                    self.error("string must be the last non-nil union alternative".to_string())
                );
            }
        }
        Ok(())
    }

    /// UnionAtom := '{' CompoundInner '}' | Identifier | 'nil' | 'true'
    fn parse_atom(&mut self) -> Result<TypeExpr, SpecError> {
        match &self.current().kind {
            TokenKind::LBrace => {
                self.advance();
                let inner = self.parse_compound_inner()?;
                self.expect(TokenKind::RBrace, "'}'")?;
                Ok(inner)
            }
            TokenKind::Ident(name) => {
                let name = name.clone();
                if name == "self" {
                    return Err(
                        self.error("a self reference must be the whole column type".to_string())
                    );
                }
                self.advance();
                match name.as_str() {
                    "nil" => Ok(TypeExpr::Nil),
                    "true" => Ok(TypeExpr::True),
                    _ => Ok(TypeExpr::Named(name)),
                }
            }
            _ => Err(self.error("expected a type name or '{'".to_string())),
        }
    }

    fn parse_compound_inner(&mut self) -> Result<TypeExpr, SpecError> {
        if self.check(&TokenKind::RBrace) {
            return Ok(TypeExpr::Table);
        }
        if let TokenKind::Ident(name) = &self.current().kind {
            match name.as_str() {
                "enum" => {
                    // only 'enum:' starts an enum; a bare 'enum' ident falls through
                    if self.tokens[self.pos + 1].kind == TokenKind::Colon {
                        self.advance();
                        self.advance();
                        return self.parse_enum();
                    }
                }
                "extends" => {
                    self.advance();
                    return self.parse_extends();
                }
                "extends_" => {
                    self.advance();
                    if self.check(&TokenKind::Comma) {
                        return Err(self.error(
                            "a tuple extension needs a named parent, not '_'".to_string(),
                        ));
                    }
                    return Ok(TypeExpr::Ancestor(None));
                }
                _ => {}
            }
        }
        self.parse_entries()
    }

    /// Enum := Ident ('|' Ident)*
    fn parse_enum(&mut self) -> Result<TypeExpr, SpecError> {
        let mut labels = vec![self.enum_label()?];
        while self.eat(&TokenKind::Pipe) {
            labels.push(self.enum_label()?);
        }
        for (i, label) in labels.iter().enumerate() {
            if labels[..i].contains(label) {
                return Err(self.error(format!("duplicate enum label: {}", label)));
            }
        }
        Ok(TypeExpr::Enum(labels))
    }

    fn enum_label(&mut self) -> Result<String, SpecError> {
        let label = self.expect_ident("enum label")?;
        if !naming::is_identifier(&label) {
            return Err(self.error(format!("invalid enum label: {}", label)));
        }
        Ok(label)
    }

    /// After the 'extends' keyword:
    ///   ':' Ident (',' Field)+          extends-record
    ///   ',' Ident                       ancestor constraint
    ///   ',' Ident (',' TypeSpec)+       extends-tuple
    fn parse_extends(&mut self) -> Result<TypeExpr, SpecError> {
        if self.eat(&TokenKind::Colon) {
            let parent = self.expect_ident("parent record name")?;
            let mut fields = Vec::new();
            while self.eat(&TokenKind::Comma) {
                fields.push(self.parse_field()?);
            }
            if fields.is_empty() {
                return Err(self.error("extends-record must add at least one field".to_string()));
            }
            self.check_field_names(&fields)?;
            return Ok(TypeExpr::ExtendsRecord { parent, fields });
        }
        self.expect(TokenKind::Comma, "',' or ':' after extends")?;
        let parent = self.expect_ident("parent type name")?;
        if self.check(&TokenKind::RBrace) {
            return Ok(TypeExpr::Ancestor(Some(parent)));
        }
        let mut elems = Vec::new();
        while self.eat(&TokenKind::Comma) {
            elems.push(self.parse_union()?);
        }
        if elems.is_empty() {
            return Err(self.error("expected ',' or '}' after ancestor name".to_string()));
        }
        Ok(TypeExpr::ExtendsTuple { parent, elems })
    }

    fn parse_field(&mut self) -> Result<FieldDecl, SpecError> {
        let name = self.expect_ident("field name")?;
        if naming::is_reserved(&name) {
            return Err(self.error(format!("reserved field name: {}", name)));
        }
        self.expect(TokenKind::Colon, "':' after field name")?;
        let ty = self.parse_union()?;
        Ok(FieldDecl { name, ty })
    }

    fn check_field_names(&self, fields: &[FieldDecl]) -> Result<(), SpecError> {
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(self.error(format!("duplicate field name: {}", field.name)));
            }
        }
        Ok(())
    }

    /// FieldList | TupleList | ArrayMapEntry — disambiguated after parsing:
    /// keyed entries make a record (>= 2) or a map (exactly 1); plain
    /// entries make a tuple (>= 2) or an array (exactly 1).
    fn parse_entries(&mut self) -> Result<TypeExpr, SpecError> {
        let mut entries = vec![self.parse_entry()?];
        while self.eat(&TokenKind::Comma) {
            entries.push(self.parse_entry()?);
        }

        let keyed = entries.iter().filter(|e| matches!(e, Entry::Keyed(..))).count();
        if keyed != 0 && keyed != entries.len() {
            return Err(self.error("cannot mix named fields and positional types".to_string()));
        }

        if keyed == 0 {
            let elems: Vec<TypeExpr> = entries
                .into_iter()
                .map(|e| match e {
                    Entry::Plain(spec) => spec,
                    Entry::Keyed(..) => unreachable!(),
                })
                .collect();
            return Ok(if elems.len() == 1 {
                TypeExpr::Array(Box::new(elems.into_iter().next().unwrap()))
            } else {
                TypeExpr::Tuple(elems)
            });
        }

        if entries.len() == 1 {
            let Some(Entry::Keyed(key, value)) = entries.pop() else {
                unreachable!()
            };
            return Ok(TypeExpr::Map(Box::new(key), Box::new(value)));
        }

        // >= 2 keyed entries: a record; every key must be a plain field name
        let mut fields = Vec::new();
        for entry in entries {
            let Entry::Keyed(key, ty) = entry else {
                unreachable!()
            };
            let TypeExpr::Named(name) = key else {
                return Err(self.error("record field names must be identifiers".to_string()));
            };
            if naming::is_reserved(&name) {
                return Err(self.error(format!("reserved field name: {}", name)));
            }
            fields.push(FieldDecl { name, ty });
        }
        self.check_field_names(&fields)?;
        Ok(TypeExpr::Record(fields))
    }

    fn parse_entry(&mut self) -> Result<Entry, SpecError> {
        let lhs = self.parse_union()?;
        if self.eat(&TokenKind::Colon) {
            let rhs = self.parse_union()?;
            Ok(Entry::Keyed(lhs, rhs))
        } else {
            Ok(Entry::Plain(lhs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> TypeExpr {
        parse_type_spec(src).unwrap()
    }

    #[test]
    fn test_simple_name() {
        assert_eq!(parse("integer"), TypeExpr::Named("integer".into()));
    }

    #[test]
    fn test_union_with_nil() {
        assert_eq!(
            parse("integer|nil"),
            TypeExpr::Union(vec![TypeExpr::Named("integer".into()), TypeExpr::Nil])
        );
    }

    #[test]
    fn test_nil_must_be_last() {
        assert!(parse_type_spec("nil|integer").is_err());
    }

    #[test]
    fn test_string_must_be_last_non_nil() {
        assert!(parse_type_spec("string|integer").is_err());
        assert!(parse_type_spec("integer|string|nil").is_ok());
    }

    #[test]
    fn test_duplicate_alternatives_rejected() {
        assert!(parse_type_spec("integer|integer").is_err());
    }

    #[test]
    fn test_array() {
        assert_eq!(
            parse("{integer}"),
            TypeExpr::Array(Box::new(TypeExpr::Named("integer".into())))
        );
    }

    #[test]
    fn test_map() {
        assert_eq!(
            parse("{name:percent}"),
            TypeExpr::Map(
                Box::new(TypeExpr::Named("name".into())),
                Box::new(TypeExpr::Named("percent".into()))
            )
        );
    }

    #[test]
    fn test_tuple() {
        assert_eq!(
            parse("{integer,string}"),
            TypeExpr::Tuple(vec![
                TypeExpr::Named("integer".into()),
                TypeExpr::Named("string".into()),
            ])
        );
    }

    #[test]
    fn test_record_needs_two_fields() {
        let spec = parse("{attack:integer,defense:integer}");
        assert!(matches!(spec, TypeExpr::Record(ref fields) if fields.len() == 2));
    }

    #[test]
    fn test_record_rejects_reserved_names() {
        assert!(parse_type_spec("{self:integer,b:integer}").is_err());
        assert!(parse_type_spec("{_1:integer,b:integer}").is_err());
    }

    #[test]
    fn test_record_field_may_end_with_underscore() {
        assert!(parse_type_spec("{type_:integer,b:integer}").is_ok());
    }

    #[test]
    fn test_enum() {
        assert_eq!(
            parse("{enum:red|green|blue}"),
            TypeExpr::Enum(vec!["red".into(), "green".into(), "blue".into()])
        );
    }

    #[test]
    fn test_enum_duplicate_labels() {
        assert!(parse_type_spec("{enum:red|red}").is_err());
    }

    #[test]
    fn test_bare_table() {
        assert_eq!(parse("{}"), TypeExpr::Table);
    }

    #[test]
    fn test_ancestor_constraint() {
        assert_eq!(
            parse("{extends,Item}"),
            TypeExpr::Ancestor(Some("Item".into()))
        );
        assert_eq!(parse("{extends_}"), TypeExpr::Ancestor(None));
    }

    #[test]
    fn test_extends_tuple() {
        assert_eq!(
            parse("{extends,Pair,integer}"),
            TypeExpr::ExtendsTuple {
                parent: "Pair".into(),
                elems: vec![TypeExpr::Named("integer".into())],
            }
        );
    }

    #[test]
    fn test_extends_record() {
        let spec = parse("{extends:Item,damage:integer}");
        assert!(
            matches!(spec, TypeExpr::ExtendsRecord { ref parent, ref fields }
                if parent == "Item" && fields.len() == 1)
        );
    }

    #[test]
    fn test_self_ref() {
        assert_eq!(
            parse("self.kind"),
            TypeExpr::SelfRef(SelfKey::Field("kind".into()))
        );
        assert_eq!(parse("self._2"), TypeExpr::SelfRef(SelfKey::Index(2)));
    }

    #[test]
    fn test_self_ref_not_inside_braces() {
        assert!(parse_type_spec("{self.kind}").is_err());
    }

    #[test]
    fn test_nested_compound() {
        let spec = parse("{a:{integer},b:{name:percent}}");
        let TypeExpr::Record(fields) = spec else {
            panic!("expected record");
        };
        assert!(matches!(fields[0].ty, TypeExpr::Array(_)));
        assert!(matches!(fields[1].ty, TypeExpr::Map(..)));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        assert!(parse_type_spec("integer}").is_err());
    }
}
