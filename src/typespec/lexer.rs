//! Type-spec lexer

use std::iter::Peekable;
use std::str::CharIndices;

/// Token kinds of the type-spec grammar
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    Integer(u64),
    LBrace,
    RBrace,
    Pipe,
    Comma,
    Colon,
    Dot,
    Eof,
}

/// A token with its byte offset in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: usize,
}

/// Lexer for type-spec strings.
pub struct Lexer<'a> {
    chars: Peekable<CharIndices<'a>>,
    len: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            len: source.len(),
        }
    }

    /// Tokenize the entire source. Returns `Err` with the byte offset of the
    /// first character that is not part of the grammar.
    pub fn tokenize(mut self) -> Result<Vec<Token>, usize> {
        let mut tokens = Vec::new();
        loop {
            while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
                self.chars.next();
            }
            let Some(&(pos, c)) = self.chars.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    pos: self.len,
                });
                return Ok(tokens);
            };
            let kind = match c {
                '{' => {
                    self.chars.next();
                    TokenKind::LBrace
                }
                '}' => {
                    self.chars.next();
                    TokenKind::RBrace
                }
                '|' => {
                    self.chars.next();
                    TokenKind::Pipe
                }
                ',' => {
                    self.chars.next();
                    TokenKind::Comma
                }
                ':' => {
                    self.chars.next();
                    TokenKind::Colon
                }
                '.' => {
                    self.chars.next();
                    TokenKind::Dot
                }
                c if c.is_ascii_digit() => {
                    let mut n: u64 = 0;
                    while let Some(&(_, d)) = self.chars.peek() {
                        if let Some(digit) = d.to_digit(10) {
                            n = n.saturating_mul(10).saturating_add(digit as u64);
                            self.chars.next();
                        } else {
                            break;
                        }
                    }
                    TokenKind::Integer(n)
                }
                c if c == '_' || c.is_ascii_alphabetic() => {
                    let mut ident = String::new();
                    while let Some(&(_, d)) = self.chars.peek() {
                        if d == '_' || d.is_ascii_alphanumeric() {
                            ident.push(d);
                            self.chars.next();
                        } else {
                            break;
                        }
                    }
                    TokenKind::Ident(ident)
                }
                _ => return Err(pos),
            };
            tokens.push(Token { kind, pos });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_union_tokens() {
        assert_eq!(
            kinds("integer|nil"),
            vec![
                TokenKind::Ident("integer".into()),
                TokenKind::Pipe,
                TokenKind::Ident("nil".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_compound_tokens() {
        assert_eq!(
            kinds("{a:integer,b:string}"),
            vec![
                TokenKind::LBrace,
                TokenKind::Ident("a".into()),
                TokenKind::Colon,
                TokenKind::Ident("integer".into()),
                TokenKind::Comma,
                TokenKind::Ident("b".into()),
                TokenKind::Colon,
                TokenKind::Ident("string".into()),
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_self_ref_tokens() {
        assert_eq!(
            kinds("self._2"),
            vec![
                TokenKind::Ident("self".into()),
                TokenKind::Dot,
                TokenKind::Ident("_2".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_rejects_stray_characters() {
        assert!(Lexer::new("integer$").tokenize().is_err());
    }
}
