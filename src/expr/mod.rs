//! Sandboxed expression engine
//!
//! Powers `=`-cells, expression defaults, `validate` type constraints, and
//! the row/file/package validator levels. Evaluation is deterministic and
//! bounded by per-invocation operation quotas; the only environment is what
//! the caller installs.

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod stdlib;

pub use ast::{BinOp, Expr, UnOp};
pub use eval::{rt_eq, Env, EvalError, Interp, NativeFn, NativeVal, RtValue};
pub use parser::{parse_expr, ExprError};
pub use stdlib::{base_env, install_helpers};

use crate::value::Value;
use indexmap::IndexMap;

/// Operation quotas, per invocation
pub const QUOTA_CELL: u64 = 10_000;
pub const QUOTA_ROW_VALIDATOR: u64 = 1_000;
pub const QUOTA_FILE_VALIDATOR: u64 = 10_000;
pub const QUOTA_PACKAGE_VALIDATOR: u64 = 100_000;
pub const QUOTA_LIBRARY_LOAD: u64 = 10_000;

/// Lift a parsed cell value into the sandbox
pub fn value_to_rt(value: &Value) -> RtValue {
    match value {
        Value::Nil => RtValue::Nil,
        Value::Bool(b) => RtValue::Bool(*b),
        Value::Int(i) => RtValue::Int(*i),
        Value::Float(f) => RtValue::Float(*f),
        Value::Str(s) => RtValue::str(s),
        Value::Bytes(b) => RtValue::str(crate::value::hex_upper(b)),
        Value::Array(items) | Value::Tuple(items) => {
            RtValue::list(items.iter().map(value_to_rt).collect())
        }
        Value::Record(fields) | Value::Map(fields) => RtValue::table(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), value_to_rt(v)))
                .collect(),
        ),
        Value::TypeName(name) => RtValue::str(name),
    }
}

/// Lower a sandbox value back to a cell value. Functions have no cell form.
pub fn rt_to_value(rt: &RtValue) -> Option<Value> {
    match rt {
        RtValue::Nil => Some(Value::Nil),
        RtValue::Bool(b) => Some(Value::Bool(*b)),
        RtValue::Int(i) => Some(Value::Int(*i)),
        RtValue::Float(f) => Some(Value::Float(*f)),
        RtValue::Str(s) => Some(Value::Str(s.to_string())),
        RtValue::List(items) => {
            let items: Option<Vec<Value>> = items.iter().map(rt_to_value).collect();
            Some(Value::Array(items?))
        }
        RtValue::Table(table) => {
            let mut out = IndexMap::new();
            for (k, v) in table.borrow().iter() {
                out.insert(k.clone(), rt_to_value(v)?);
            }
            Some(Value::Map(out))
        }
        RtValue::Lambda(_) | RtValue::Native(_) => None,
    }
}

/// Render an expression result as raw cell text, ready for the column
/// parser (numbers plain, nil empty, containers in cell syntax)
pub fn rt_to_cell_string(rt: &RtValue, registry: &crate::registry::TypeRegistry) -> Option<String> {
    let value = rt_to_value(rt)?;
    Some(crate::cell::reformat(None, &value, registry))
}

/// How a validator expression's result is read
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatorOutcome {
    Pass,
    Fail(String),
}

/// `true` or `""` pass; `false`/`nil` fail with the default message; a
/// string fails with that message; a number fails with its string form
pub fn interpret_result(rt: &RtValue, default_msg: &str) -> ValidatorOutcome {
    match rt {
        RtValue::Bool(true) => ValidatorOutcome::Pass,
        RtValue::Str(s) if s.is_empty() => ValidatorOutcome::Pass,
        RtValue::Str(s) => ValidatorOutcome::Fail(s.to_string()),
        RtValue::Bool(false) | RtValue::Nil => ValidatorOutcome::Fail(default_msg.to_string()),
        RtValue::Int(i) => ValidatorOutcome::Fail(i.to_string()),
        RtValue::Float(f) => ValidatorOutcome::Fail(f.to_string()),
        _ => ValidatorOutcome::Fail(default_msg.to_string()),
    }
}

/// Run a type-level `validate` constraint against a candidate value.
/// The environment exposes `self` (the value) and the general utilities.
pub(crate) fn run_type_validator(
    expr: &Expr,
    value: &Value,
    type_name: &str,
    raw: &str,
    cx: &mut crate::cell::ParseCx,
) -> bool {
    let env = base_env();
    install_helpers(&env);
    env.define("self", value_to_rt(value));
    let mut interp = Interp::new(cx.registry, QUOTA_CELL);
    match interp.eval(expr, &env) {
        Err(e) => {
            cx.sink.with_col_type(type_name, |sink| {
                sink.error_value(raw, format!("validator failed: {}", e))
            });
            false
        }
        Ok(rt) => match interpret_result(&rt, &format!("not a valid {}", type_name)) {
            ValidatorOutcome::Pass => true,
            ValidatorOutcome::Fail(msg) => {
                cx.sink
                    .with_col_type(type_name, |sink| sink.error_value(raw, msg));
                false
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_round_trip() {
        let mut fields = IndexMap::new();
        fields.insert("a".to_string(), Value::Int(1));
        fields.insert("b".to_string(), Value::Str("x".to_string()));
        let value = Value::Record(fields);
        let rt = value_to_rt(&value);
        let back = rt_to_value(&rt).unwrap();
        // records come back as maps; contents and order survive
        let Value::Map(entries) = back else {
            panic!("expected map");
        };
        assert_eq!(entries["a"], Value::Int(1));
        assert_eq!(entries["b"], Value::Str("x".to_string()));
    }

    #[test]
    fn test_interpret_result_protocol() {
        assert_eq!(
            interpret_result(&RtValue::Bool(true), "d"),
            ValidatorOutcome::Pass
        );
        assert_eq!(
            interpret_result(&RtValue::str(""), "d"),
            ValidatorOutcome::Pass
        );
        assert_eq!(
            interpret_result(&RtValue::Nil, "d"),
            ValidatorOutcome::Fail("d".to_string())
        );
        assert_eq!(
            interpret_result(&RtValue::str("too big"), "d"),
            ValidatorOutcome::Fail("too big".to_string())
        );
        assert_eq!(
            interpret_result(&RtValue::Int(7), "d"),
            ValidatorOutcome::Fail("7".to_string())
        );
    }

    #[test]
    fn test_cell_string_rendering() {
        let registry = crate::registry::TypeRegistry::new();
        assert_eq!(
            rt_to_cell_string(&RtValue::Int(5), &registry).unwrap(),
            "5"
        );
        assert_eq!(rt_to_cell_string(&RtValue::Nil, &registry).unwrap(), "");
        assert_eq!(
            rt_to_cell_string(&RtValue::list(vec![RtValue::Int(1), RtValue::Int(2)]), &registry)
                .unwrap(),
            "1,2"
        );
    }
}
