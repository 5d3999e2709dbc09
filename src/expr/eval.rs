//! Sandboxed expression evaluation
//!
//! A tree-walking evaluator with a per-invocation operation quota. Every
//! AST node costs one fuel unit; exhaustion halts evaluation with a
//! quota-exceeded error. The environment holds exactly what the caller
//! installs — there are no ambient globals, no I/O, and no clock.

use super::ast::{BinOp, Expr, UnOp};
use crate::registry::TypeRegistry;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A runtime evaluation failure (reported by the caller, never panicking)
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn quota() -> Self {
        Self::new("operation quota exceeded")
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Signature of a native (host-provided) function
pub type NativeFn = fn(&mut Interp, &[RtValue]) -> Result<RtValue, EvalError>;

/// A named native function value
#[derive(Clone)]
pub struct NativeVal {
    pub name: Rc<str>,
    pub f: NativeFn,
}

/// A lambda with its captured environment
pub struct LambdaVal {
    pub params: Vec<String>,
    pub body: Expr,
    pub env: Env,
}

/// Runtime values of the expression sandbox
#[derive(Clone)]
pub enum RtValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<Vec<RtValue>>),
    Table(Rc<RefCell<IndexMap<String, RtValue>>>),
    Lambda(Rc<LambdaVal>),
    Native(NativeVal),
}

impl fmt::Debug for RtValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtValue::Nil => write!(f, "nil"),
            RtValue::Bool(b) => write!(f, "{}", b),
            RtValue::Int(i) => write!(f, "{}", i),
            RtValue::Float(x) => write!(f, "{}", x),
            RtValue::Str(s) => write!(f, "{:?}", s),
            RtValue::List(items) => f.debug_list().entries(items.iter()).finish(),
            RtValue::Table(t) => f.debug_map().entries(t.borrow().iter()).finish(),
            RtValue::Lambda(l) => write!(f, "<lambda/{}>", l.params.len()),
            RtValue::Native(n) => write!(f, "<native {}>", n.name),
        }
    }
}

impl RtValue {
    pub fn str(s: impl AsRef<str>) -> Self {
        RtValue::Str(Rc::from(s.as_ref()))
    }

    pub fn list(items: Vec<RtValue>) -> Self {
        RtValue::List(Rc::new(items))
    }

    pub fn table(entries: IndexMap<String, RtValue>) -> Self {
        RtValue::Table(Rc::new(RefCell::new(entries)))
    }

    /// nil and false are falsy, everything else truthy
    pub fn truthy(&self) -> bool {
        !matches!(self, RtValue::Nil | RtValue::Bool(false))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RtValue::Int(i) => Some(*i as f64),
            RtValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            RtValue::Nil => "nil",
            RtValue::Bool(_) => "boolean",
            RtValue::Int(_) | RtValue::Float(_) => "number",
            RtValue::Str(_) => "string",
            RtValue::List(_) => "list",
            RtValue::Table(_) => "table",
            RtValue::Lambda(_) | RtValue::Native(_) => "function",
        }
    }
}

/// Deep structural equality; ints and floats compare numerically
pub fn rt_eq(a: &RtValue, b: &RtValue) -> bool {
    match (a, b) {
        (RtValue::Nil, RtValue::Nil) => true,
        (RtValue::Bool(x), RtValue::Bool(y)) => x == y,
        (RtValue::Str(x), RtValue::Str(y)) => x == y,
        (RtValue::List(x), RtValue::List(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| rt_eq(a, b))
        }
        (RtValue::Table(x), RtValue::Table(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|w| rt_eq(v, w)).unwrap_or(false))
        }
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// Lexical scope chain; frames are cheaply shared so lambdas can capture
#[derive(Clone, Default)]
pub struct Env {
    frames: Vec<Rc<RefCell<IndexMap<String, RtValue>>>>,
}

impl Env {
    pub fn new() -> Self {
        Self {
            frames: vec![Rc::new(RefCell::new(IndexMap::new()))],
        }
    }

    /// A child scope sharing every existing frame
    pub fn child(&self) -> Self {
        let mut frames = self.frames.clone();
        frames.push(Rc::new(RefCell::new(IndexMap::new())));
        Self { frames }
    }

    /// Define (or shadow) a name in the innermost frame
    pub fn define(&self, name: impl Into<String>, value: RtValue) {
        self.frames
            .last()
            .expect("env has at least one frame")
            .borrow_mut()
            .insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<RtValue> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.borrow().get(name).cloned())
    }

    /// Overwrite wherever the name lives, defining it innermost otherwise
    fn set(&self, name: &str, value: RtValue) {
        for frame in self.frames.iter().rev() {
            let mut frame = frame.borrow_mut();
            if let Some(slot) = frame.get_mut(name) {
                *slot = value;
                return;
            }
        }
        self.define(name, value);
    }
}

/// One bounded evaluation run
pub struct Interp<'a> {
    pub registry: &'a TypeRegistry,
    fuel: u64,
}

impl<'a> Interp<'a> {
    pub fn new(registry: &'a TypeRegistry, quota: u64) -> Self {
        Self {
            registry,
            fuel: quota,
        }
    }

    pub fn fuel_left(&self) -> u64 {
        self.fuel
    }

    fn step(&mut self) -> Result<(), EvalError> {
        match self.fuel.checked_sub(1) {
            Some(left) => {
                self.fuel = left;
                Ok(())
            }
            None => Err(EvalError::quota()),
        }
    }

    pub fn eval(&mut self, expr: &Expr, env: &Env) -> Result<RtValue, EvalError> {
        self.step()?;
        match expr {
            Expr::Nil => Ok(RtValue::Nil),
            Expr::Bool(b) => Ok(RtValue::Bool(*b)),
            Expr::Int(i) => Ok(RtValue::Int(*i)),
            Expr::Float(f) => Ok(RtValue::Float(*f)),
            Expr::Str(s) => Ok(RtValue::str(s)),
            Expr::Var(name) => env
                .get(name)
                .ok_or_else(|| EvalError::new(format!("undefined reference: {}", name))),
            Expr::Field(base, name) => {
                let base = self.eval(base, env)?;
                self.field(&base, name)
            }
            Expr::Index(base, index) => {
                let base = self.eval(base, env)?;
                let index = self.eval(index, env)?;
                self.index(&base, &index)
            }
            Expr::Call(callee, args) => {
                let callee = self.eval(callee, env)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, env)?);
                }
                self.apply(&callee, &values)
            }
            Expr::Unary(op, inner) => {
                let inner = self.eval(inner, env)?;
                match op {
                    UnOp::Neg => match inner {
                        RtValue::Int(i) => Ok(RtValue::Int(-i)),
                        RtValue::Float(f) => Ok(RtValue::Float(-f)),
                        other => Err(EvalError::new(format!(
                            "cannot negate a {}",
                            other.type_name()
                        ))),
                    },
                    UnOp::Not => Ok(RtValue::Bool(!inner.truthy())),
                }
            }
            Expr::Binary(op, lhs, rhs) => self.binary(*op, lhs, rhs, env),
            Expr::Lambda(params, body) => Ok(RtValue::Lambda(Rc::new(LambdaVal {
                params: params.clone(),
                body: (**body).clone(),
                env: env.clone(),
            }))),
            Expr::Assign(target, value) => {
                let value = self.eval(value, env)?;
                self.assign(target, value.clone(), env)?;
                Ok(value)
            }
            Expr::Seq(items) => {
                let mut last = RtValue::Nil;
                for item in items {
                    last = self.eval(item, env)?;
                }
                Ok(last)
            }
        }
    }

    /// Call a lambda or native with already-evaluated arguments
    pub fn apply(&mut self, callee: &RtValue, args: &[RtValue]) -> Result<RtValue, EvalError> {
        self.step()?;
        match callee {
            RtValue::Native(native) => (native.f)(self, args),
            RtValue::Lambda(lambda) => {
                if args.len() != lambda.params.len() {
                    return Err(EvalError::new(format!(
                        "lambda takes {} arguments, got {}",
                        lambda.params.len(),
                        args.len()
                    )));
                }
                let scope = lambda.env.child();
                for (param, arg) in lambda.params.iter().zip(args) {
                    scope.define(param.clone(), arg.clone());
                }
                self.eval(&lambda.body, &scope)
            }
            other => Err(EvalError::new(format!(
                "a {} is not callable",
                other.type_name()
            ))),
        }
    }

    fn field(&mut self, base: &RtValue, name: &str) -> Result<RtValue, EvalError> {
        match base {
            RtValue::Table(table) => Ok(table.borrow().get(name).cloned().unwrap_or(RtValue::Nil)),
            RtValue::Nil => Err(EvalError::new(format!("field {} of nil", name))),
            other => Err(EvalError::new(format!(
                "cannot read field {} of a {}",
                name,
                other.type_name()
            ))),
        }
    }

    fn index(&mut self, base: &RtValue, index: &RtValue) -> Result<RtValue, EvalError> {
        match base {
            RtValue::List(items) => {
                let RtValue::Int(i) = index else {
                    return Err(EvalError::new("list index must be an integer"));
                };
                // 1-based, like column positions
                if *i >= 1 && (*i as usize) <= items.len() {
                    Ok(items[*i as usize - 1].clone())
                } else {
                    Ok(RtValue::Nil)
                }
            }
            RtValue::Table(table) => {
                let key = index_key(index)?;
                Ok(table.borrow().get(&key).cloned().unwrap_or(RtValue::Nil))
            }
            RtValue::Nil => Err(EvalError::new("indexing nil")),
            other => Err(EvalError::new(format!(
                "cannot index a {}",
                other.type_name()
            ))),
        }
    }

    fn assign(&mut self, target: &Expr, value: RtValue, env: &Env) -> Result<(), EvalError> {
        self.step()?;
        match target {
            Expr::Var(name) => {
                env.set(name, value);
                Ok(())
            }
            Expr::Field(base, name) => {
                let base = self.eval(base, env)?;
                let RtValue::Table(table) = base else {
                    return Err(EvalError::new(format!(
                        "cannot set field {} of a {}",
                        name,
                        base.type_name()
                    )));
                };
                table.borrow_mut().insert(name.clone(), value);
                Ok(())
            }
            Expr::Index(base, index) => {
                let base = self.eval(base, env)?;
                let index = self.eval(index, env)?;
                let RtValue::Table(table) = base else {
                    return Err(EvalError::new(format!(
                        "cannot index-assign a {}",
                        base.type_name()
                    )));
                };
                table.borrow_mut().insert(index_key(&index)?, value);
                Ok(())
            }
            _ => Err(EvalError::new("invalid assignment target")),
        }
    }

    fn binary(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        env: &Env,
    ) -> Result<RtValue, EvalError> {
        // short-circuit forms return the deciding operand
        if op == BinOp::And {
            let lhs = self.eval(lhs, env)?;
            return if lhs.truthy() { self.eval(rhs, env) } else { Ok(lhs) };
        }
        if op == BinOp::Or {
            let lhs = self.eval(lhs, env)?;
            return if lhs.truthy() { Ok(lhs) } else { self.eval(rhs, env) };
        }

        let lhs = self.eval(lhs, env)?;
        let rhs = self.eval(rhs, env)?;
        match op {
            BinOp::Eq => Ok(RtValue::Bool(rt_eq(&lhs, &rhs))),
            BinOp::Ne => Ok(RtValue::Bool(!rt_eq(&lhs, &rhs))),
            BinOp::Add => {
                if let (RtValue::Str(a), RtValue::Str(b)) = (&lhs, &rhs) {
                    return Ok(RtValue::str(format!("{}{}", a, b)));
                }
                self.arith(op, &lhs, &rhs)
            }
            BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => self.arith(op, &lhs, &rhs),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => self.compare(op, &lhs, &rhs),
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        }
    }

    fn arith(&self, op: BinOp, lhs: &RtValue, rhs: &RtValue) -> Result<RtValue, EvalError> {
        if let (RtValue::Int(a), RtValue::Int(b)) = (lhs, rhs) {
            let out = match op {
                BinOp::Add => a.checked_add(*b),
                BinOp::Sub => a.checked_sub(*b),
                BinOp::Mul => a.checked_mul(*b),
                BinOp::Div => {
                    // integer division yields a float, like cell numbers do
                    return if *b == 0 {
                        Err(EvalError::new("division by zero"))
                    } else {
                        Ok(RtValue::Float(*a as f64 / *b as f64))
                    };
                }
                BinOp::Mod => {
                    return if *b == 0 {
                        Err(EvalError::new("modulo by zero"))
                    } else {
                        Ok(RtValue::Int(a.rem_euclid(*b)))
                    };
                }
                _ => unreachable!(),
            };
            return out
                .map(RtValue::Int)
                .ok_or_else(|| EvalError::new("integer overflow"));
        }
        let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
            return Err(EvalError::new(format!(
                "arithmetic on {} and {}",
                lhs.type_name(),
                rhs.type_name()
            )));
        };
        let out = match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::Mod => a.rem_euclid(b),
            _ => unreachable!(),
        };
        Ok(RtValue::Float(out))
    }

    fn compare(&self, op: BinOp, lhs: &RtValue, rhs: &RtValue) -> Result<RtValue, EvalError> {
        let ordering = match (lhs, rhs) {
            (RtValue::Str(a), RtValue::Str(b)) => a.cmp(b),
            _ => {
                let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
                    return Err(EvalError::new(format!(
                        "cannot compare {} and {}",
                        lhs.type_name(),
                        rhs.type_name()
                    )));
                };
                a.partial_cmp(&b)
                    .ok_or_else(|| EvalError::new("cannot order NaN"))?
            }
        };
        let out = match op {
            BinOp::Lt => ordering.is_lt(),
            BinOp::Le => ordering.is_le(),
            BinOp::Gt => ordering.is_gt(),
            BinOp::Ge => ordering.is_ge(),
            _ => unreachable!(),
        };
        Ok(RtValue::Bool(out))
    }
}

fn index_key(index: &RtValue) -> Result<String, EvalError> {
    match index {
        RtValue::Str(s) => Ok(s.to_string()),
        RtValue::Int(i) => Ok(i.to_string()),
        other => Err(EvalError::new(format!(
            "invalid table key: {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_expr;

    fn eval_str(src: &str) -> Result<RtValue, EvalError> {
        let registry = TypeRegistry::new();
        let expr = parse_expr(src).unwrap();
        let mut interp = Interp::new(&registry, 10_000);
        interp.eval(&expr, &Env::new())
    }

    #[test]
    fn test_arithmetic() {
        assert!(rt_eq(&eval_str("1 + 2 * 3").unwrap(), &RtValue::Int(7)));
        assert!(rt_eq(&eval_str("7 / 2").unwrap(), &RtValue::Float(3.5)));
        assert!(rt_eq(&eval_str("-7 % 3").unwrap(), &RtValue::Int(2)));
    }

    #[test]
    fn test_string_concat() {
        assert!(rt_eq(
            &eval_str(r#""a" + "b""#).unwrap(),
            &RtValue::str("ab")
        ));
    }

    #[test]
    fn test_short_circuit_values() {
        assert!(rt_eq(&eval_str("nil or 5").unwrap(), &RtValue::Int(5)));
        assert!(rt_eq(&eval_str("false and 5").unwrap(), &RtValue::Bool(false)));
    }

    #[test]
    fn test_undefined_reference() {
        let err = eval_str("missing + 1").unwrap_err();
        assert!(err.message.contains("undefined reference"));
    }

    #[test]
    fn test_quota_exhaustion() {
        let registry = TypeRegistry::new();
        let expr = parse_expr("1 + 1 + 1 + 1 + 1 + 1 + 1 + 1").unwrap();
        let mut interp = Interp::new(&registry, 3);
        let err = interp.eval(&expr, &Env::new()).unwrap_err();
        assert_eq!(err, EvalError::quota());
    }

    #[test]
    fn test_lambda_capture_and_apply() {
        let registry = TypeRegistry::new();
        let env = Env::new();
        env.define("base", RtValue::Int(10));
        let expr = parse_expr("(|x| x + base)(5)").unwrap();
        let mut interp = Interp::new(&registry, 10_000);
        assert!(rt_eq(&interp.eval(&expr, &env).unwrap(), &RtValue::Int(15)));
    }

    #[test]
    fn test_table_assignment() {
        let registry = TypeRegistry::new();
        let env = Env::new();
        env.define("ctx", RtValue::table(IndexMap::new()));
        let expr = parse_expr("ctx.total = (ctx.total or 0) + 2; ctx.total").unwrap();
        let mut interp = Interp::new(&registry, 10_000);
        assert!(rt_eq(&interp.eval(&expr, &env).unwrap(), &RtValue::Int(2)));
        // ctx persists across invocations
        let mut interp = Interp::new(&registry, 10_000);
        assert!(rt_eq(&interp.eval(&expr, &env).unwrap(), &RtValue::Int(4)));
    }

    #[test]
    fn test_list_indexing_is_one_based() {
        let registry = TypeRegistry::new();
        let env = Env::new();
        env.define(
            "xs",
            RtValue::list(vec![RtValue::Int(10), RtValue::Int(20)]),
        );
        let expr = parse_expr("xs[1] + xs[2]").unwrap();
        let mut interp = Interp::new(&registry, 10_000);
        assert!(rt_eq(&interp.eval(&expr, &env).unwrap(), &RtValue::Int(30)));
    }
}
