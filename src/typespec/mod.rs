//! Type-spec grammar
//!
//! Parses the inline type language carried in column headers into a
//! [`TypeExpr`] AST. The AST preserves declaration order and re-emits the
//! canonical definition string via `Display`.

pub mod ast;
pub mod lexer;
pub mod parser;

pub use ast::{FieldDecl, SelfKey, TypeExpr};
pub use parser::{parse_type_spec, SpecError};
