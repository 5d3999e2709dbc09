//! Expression parser
//!
//! Precedence-climbing over the token stream. Grammar, loosest first:
//! `;` sequence, assignment, `or`, `and`, comparison, additive,
//! multiplicative, unary, postfix (call / index / field), primary.

use super::ast::{BinOp, Expr, UnOp};
use super::lexer::{Lexer, Token, TokenKind};
use std::fmt;

/// An expression parse failure with its byte offset
#[derive(Debug, Clone, PartialEq)]
pub struct ExprError {
    pub message: String,
    pub pos: usize,
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at offset {})", self.message, self.pos)
    }
}

impl std::error::Error for ExprError {}

/// Parse an expression source string
pub fn parse_expr(source: &str) -> Result<Expr, ExprError> {
    let tokens = Lexer::new(source).tokenize().map_err(|pos| ExprError {
        message: "unexpected character".to_string(),
        pos,
    })?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_seq()?;
    parser.expect_eof()?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
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

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), ExprError> {
        if self.eat(&kind) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn expect_eof(&self) -> Result<(), ExprError> {
        if self.check(&TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.error("trailing input after expression".to_string()))
        }
    }

    fn error(&self, message: String) -> ExprError {
        ExprError {
            message,
            pos: self.current().pos,
        }
    }

    fn parse_seq(&mut self) -> Result<Expr, ExprError> {
        let mut items = vec![self.parse_assign()?];
        while self.eat(&TokenKind::Semi) {
            items.push(self.parse_assign()?);
        }
        Ok(if items.len() == 1 {
            items.pop().unwrap()
        } else {
            Expr::Seq(items)
        })
    }

    fn parse_assign(&mut self) -> Result<Expr, ExprError> {
        let target = self.parse_or()?;
        if self.eat(&TokenKind::Assign) {
            if !matches!(target, Expr::Var(_) | Expr::Field(..) | Expr::Index(..)) {
                return Err(self.error("assignment target must be a variable, field, or index".to_string()));
            }
            let value = self.parse_assign()?;
            return Ok(Expr::Assign(Box::new(target), Box::new(value)));
        }
        Ok(target)
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&TokenKind::KwOr) || self.eat(&TokenKind::OrOr) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_comparison()?;
        while self.eat(&TokenKind::KwAnd) || self.eat(&TokenKind::AndAnd) {
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.parse_additive()?;
        let op = match &self.current().kind {
            TokenKind::EqEq => BinOp::Eq,
            TokenKind::Ne => BinOp::Ne,
            TokenKind::Lt => BinOp::Lt,
            TokenKind::Le => BinOp::Le,
            TokenKind::Gt => BinOp::Gt,
            TokenKind::Ge => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_additive()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match &self.current().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match &self.current().kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::PercentSign => BinOp::Mod,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&TokenKind::Minus) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnOp::Neg, Box::new(inner)));
        }
        if self.eat(&TokenKind::KwNot) || self.eat(&TokenKind::Bang) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnOp::Not, Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&TokenKind::Dot) {
                let name = self.expect_ident("field name after '.'")?;
                expr = Expr::Field(Box::new(expr), name);
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.parse_assign()?;
                self.expect(TokenKind::RBracket, "']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat(&TokenKind::LParen) {
                let mut args = Vec::new();
                if !self.check(&TokenKind::RParen) {
                    args.push(self.parse_assign()?);
                    while self.eat(&TokenKind::Comma) {
                        args.push(self.parse_assign()?);
                    }
                }
                self.expect(TokenKind::RParen, "')'")?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.current().kind.clone() {
            TokenKind::Int(v) => {
                self.advance();
                Ok(Expr::Int(v))
            }
            TokenKind::Float(v) => {
                self.advance();
                Ok(Expr::Float(v))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::KwTrue => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::KwFalse => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::KwNil => {
                self.advance();
                Ok(Expr::Nil)
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Var(name))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_seq()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Pipe => self.parse_lambda(false),
            TokenKind::OrOr => self.parse_lambda(true),
            _ => Err(self.error("expected an expression".to_string())),
        }
    }

    /// `|x, y| body`; `||` is the empty parameter list
    fn parse_lambda(&mut self, empty: bool) -> Result<Expr, ExprError> {
        self.advance();
        let mut params = Vec::new();
        if !empty {
            if !self.check(&TokenKind::Pipe) {
                params.push(self.expect_ident("parameter name")?);
                while self.eat(&TokenKind::Comma) {
                    params.push(self.expect_ident("parameter name")?);
                }
            }
            self.expect(TokenKind::Pipe, "'|' after lambda parameters")?;
        }
        let body = self.parse_assign()?;
        Ok(Expr::Lambda(params, Box::new(body)))
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ExprError> {
        match &self.current().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(format!("expected {}", what))),
        }
    }
}
