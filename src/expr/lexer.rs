//! Expression lexer

use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    PercentSign,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Semi,
    Pipe,
    OrOr,
    AndAnd,
    Bang,
    Assign,
    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    KwAnd,
    KwOr,
    KwNot,
    KwTrue,
    KwFalse,
    KwNil,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: usize,
}

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

    /// Tokenize, returning `Err` with the byte offset of the first bad char
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
                '+' => self.one(TokenKind::Plus),
                '*' => self.one(TokenKind::Star),
                '/' => self.one(TokenKind::Slash),
                '%' => self.one(TokenKind::PercentSign),
                '(' => self.one(TokenKind::LParen),
                ')' => self.one(TokenKind::RParen),
                '[' => self.one(TokenKind::LBracket),
                ']' => self.one(TokenKind::RBracket),
                ',' => self.one(TokenKind::Comma),
                ';' => self.one(TokenKind::Semi),
                '-' => self.one(TokenKind::Minus),
                '.' => self.one(TokenKind::Dot),
                '|' => {
                    self.chars.next();
                    if self.eat('|') {
                        TokenKind::OrOr
                    } else {
                        TokenKind::Pipe
                    }
                }
                '&' => {
                    self.chars.next();
                    if self.eat('&') {
                        TokenKind::AndAnd
                    } else {
                        return Err(pos);
                    }
                }
                '!' => {
                    self.chars.next();
                    if self.eat('=') {
                        TokenKind::Ne
                    } else {
                        TokenKind::Bang
                    }
                }
                '=' => {
                    self.chars.next();
                    if self.eat('=') {
                        TokenKind::EqEq
                    } else {
                        TokenKind::Assign
                    }
                }
                '<' => {
                    self.chars.next();
                    if self.eat('=') {
                        TokenKind::Le
                    } else {
                        TokenKind::Lt
                    }
                }
                '>' => {
                    self.chars.next();
                    if self.eat('=') {
                        TokenKind::Ge
                    } else {
                        TokenKind::Gt
                    }
                }
                '"' => self.string(pos)?,
                c if c.is_ascii_digit() => self.number(pos)?,
                c if c == '_' || c.is_alphabetic() => self.ident(),
                _ => return Err(pos),
            };
            tokens.push(Token { kind, pos });
        }
    }

    fn one(&mut self, kind: TokenKind) -> TokenKind {
        self.chars.next();
        kind
    }

    fn eat(&mut self, expected: char) -> bool {
        if matches!(self.chars.peek(), Some((_, c)) if *c == expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn string(&mut self, start: usize) -> Result<TokenKind, usize> {
        self.chars.next(); // opening quote
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some((_, '"')) => return Ok(TokenKind::Str(out)),
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, 't')) => out.push('\t'),
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, '\\')) => out.push('\\'),
                    Some((_, '"')) => out.push('"'),
                    _ => return Err(start),
                },
                Some((_, c)) => out.push(c),
                None => return Err(start),
            }
        }
    }

    fn number(&mut self, start: usize) -> Result<TokenKind, usize> {
        let mut text = String::new();
        let mut is_float = false;
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.chars.next();
            } else if c == '.' && !is_float {
                // a digit must follow, else this dot is field access
                let mut lookahead = self.chars.clone();
                lookahead.next();
                if !matches!(lookahead.peek(), Some((_, d)) if d.is_ascii_digit()) {
                    break;
                }
                is_float = true;
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        if is_float {
            text.parse::<f64>().map(TokenKind::Float).map_err(|_| start)
        } else {
            text.parse::<i64>().map(TokenKind::Int).map_err(|_| start)
        }
    }

    fn ident(&mut self) -> TokenKind {
        let mut text = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c == '_' || c.is_alphanumeric() {
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        match text.as_str() {
            "and" => TokenKind::KwAnd,
            "or" => TokenKind::KwOr,
            "not" => TokenKind::KwNot,
            "true" => TokenKind::KwTrue,
            "false" => TokenKind::KwFalse,
            "nil" => TokenKind::KwNil,
            _ => TokenKind::Ident(text),
        }
    }
}
