//! Native functions exposed to sandboxed expressions
//!
//! A safe subset of general utilities available everywhere, plus the
//! collection helpers the file/package validator environments add
//! (`unique`, `sum`, `groupBy`, tag queries, ...). All are pure; none touch
//! the host beyond the registry queries the tag helpers make.

use super::eval::{rt_eq, EvalError, Interp, NativeFn, NativeVal, RtValue};
use super::Env;
use indexmap::IndexMap;
use std::rc::Rc;

/// An environment with the general utilities installed
pub fn base_env() -> Env {
    let env = Env::new();
    for (name, f) in GENERAL {
        env.define(*name, native(name, *f));
    }
    env
}

/// Add the validator collection helpers to an environment
pub fn install_helpers(env: &Env) {
    for (name, f) in HELPERS {
        env.define(*name, native(name, *f));
    }
}

fn native(name: &str, f: NativeFn) -> RtValue {
    RtValue::Native(NativeVal {
        name: Rc::from(name),
        f,
    })
}

const GENERAL: &[(&str, NativeFn)] = &[
    ("len", n_len),
    ("abs", n_abs),
    ("floor", n_floor),
    ("ceil", n_ceil),
    ("round", n_round),
    ("str", n_str),
    ("num", n_num),
    ("contains", n_contains),
    ("startsWith", n_starts_with),
    ("endsWith", n_ends_with),
    ("lower", n_lower),
    ("upper", n_upper),
    ("trim", n_trim),
];

const HELPERS: &[(&str, NativeFn)] = &[
    ("unique", n_unique),
    ("sum", n_sum),
    ("min", n_min),
    ("max", n_max),
    ("avg", n_avg),
    ("count", n_count),
    ("all", n_all),
    ("any", n_any),
    ("none", n_none),
    ("filter", n_filter),
    ("find", n_find),
    ("lookup", n_lookup),
    ("groupBy", n_group_by),
    ("listMembersOfTag", n_list_members_of_tag),
    ("isMemberOfTag", n_is_member_of_tag),
];

fn arg<'v>(args: &'v [RtValue], i: usize, what: &str) -> Result<&'v RtValue, EvalError> {
    args.get(i)
        .ok_or_else(|| EvalError::new(format!("missing argument: {}", what)))
}

fn str_arg<'v>(args: &'v [RtValue], i: usize, what: &str) -> Result<&'v str, EvalError> {
    match arg(args, i, what)? {
        RtValue::Str(s) => Ok(s),
        other => Err(EvalError::new(format!(
            "{} must be a string, got {}",
            what,
            other.type_name()
        ))),
    }
}

fn list_arg<'v>(args: &'v [RtValue], i: usize, what: &str) -> Result<&'v [RtValue], EvalError> {
    match arg(args, i, what)? {
        RtValue::List(items) => Ok(items),
        other => Err(EvalError::new(format!(
            "{} must be a list, got {}",
            what,
            other.type_name()
        ))),
    }
}

/// Apply the optional selector/predicate in `args[i]` to one element
fn select(
    interp: &mut Interp,
    args: &[RtValue],
    i: usize,
    item: &RtValue,
) -> Result<RtValue, EvalError> {
    match args.get(i) {
        Some(f @ (RtValue::Lambda(_) | RtValue::Native(_))) => {
            interp.apply(f, std::slice::from_ref(item))
        }
        Some(other) => Err(EvalError::new(format!(
            "selector must be a function, got {}",
            other.type_name()
        ))),
        None => Ok(item.clone()),
    }
}

fn n_len(_: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    let len = match arg(args, 0, "value")? {
        RtValue::Str(s) => s.chars().count(),
        RtValue::List(items) => items.len(),
        RtValue::Table(t) => t.borrow().len(),
        other => {
            return Err(EvalError::new(format!(
                "len of a {}",
                other.type_name()
            )))
        }
    };
    Ok(RtValue::Int(len as i64))
}

fn numeric(args: &[RtValue], f: fn(f64) -> f64) -> Result<RtValue, EvalError> {
    match arg(args, 0, "number")? {
        RtValue::Int(i) => Ok(RtValue::Int(*i)),
        RtValue::Float(x) => Ok(RtValue::Float(f(*x))),
        other => Err(EvalError::new(format!(
            "expected a number, got {}",
            other.type_name()
        ))),
    }
}

fn n_abs(_: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    match arg(args, 0, "number")? {
        RtValue::Int(i) => Ok(RtValue::Int(i.abs())),
        RtValue::Float(x) => Ok(RtValue::Float(x.abs())),
        other => Err(EvalError::new(format!(
            "expected a number, got {}",
            other.type_name()
        ))),
    }
}

fn n_floor(_: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    numeric(args, f64::floor)
}

fn n_ceil(_: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    numeric(args, f64::ceil)
}

fn n_round(_: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    numeric(args, f64::round)
}

fn n_str(_: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    let out = match arg(args, 0, "value")? {
        RtValue::Str(s) => s.to_string(),
        RtValue::Nil => String::new(),
        RtValue::Bool(b) => b.to_string(),
        RtValue::Int(i) => i.to_string(),
        RtValue::Float(f) => f.to_string(),
        other => format!("{:?}", other),
    };
    Ok(RtValue::str(out))
}

fn n_num(_: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    match arg(args, 0, "value")? {
        RtValue::Int(i) => Ok(RtValue::Int(*i)),
        RtValue::Float(f) => Ok(RtValue::Float(*f)),
        RtValue::Str(s) => {
            if let Ok(i) = s.parse::<i64>() {
                Ok(RtValue::Int(i))
            } else if let Ok(f) = s.parse::<f64>() {
                Ok(RtValue::Float(f))
            } else {
                Ok(RtValue::Nil)
            }
        }
        _ => Ok(RtValue::Nil),
    }
}

fn n_contains(_: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    let needle = arg(args, 1, "needle")?;
    let found = match arg(args, 0, "haystack")? {
        RtValue::Str(s) => match needle {
            RtValue::Str(n) => s.contains(n.as_ref()),
            other => {
                return Err(EvalError::new(format!(
                    "cannot search a string for a {}",
                    other.type_name()
                )))
            }
        },
        RtValue::List(items) => items.iter().any(|item| rt_eq(item, needle)),
        RtValue::Table(t) => match needle {
            RtValue::Str(n) => t.borrow().contains_key(n.as_ref()),
            _ => false,
        },
        other => {
            return Err(EvalError::new(format!(
                "contains on a {}",
                other.type_name()
            )))
        }
    };
    Ok(RtValue::Bool(found))
}

fn n_starts_with(_: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    let s = str_arg(args, 0, "string")?;
    let prefix = str_arg(args, 1, "prefix")?;
    Ok(RtValue::Bool(s.starts_with(prefix)))
}

fn n_ends_with(_: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    let s = str_arg(args, 0, "string")?;
    let suffix = str_arg(args, 1, "suffix")?;
    Ok(RtValue::Bool(s.ends_with(suffix)))
}

fn n_lower(_: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    Ok(RtValue::str(str_arg(args, 0, "string")?.to_lowercase()))
}

fn n_upper(_: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    Ok(RtValue::str(str_arg(args, 0, "string")?.to_uppercase()))
}

fn n_trim(_: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    Ok(RtValue::str(str_arg(args, 0, "string")?.trim()))
}

fn n_unique(interp: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    let items = list_arg(args, 0, "list")?.to_vec();
    let mut seen: Vec<RtValue> = Vec::with_capacity(items.len());
    for item in &items {
        let key = select(interp, args, 1, item)?;
        if seen.iter().any(|s| rt_eq(s, &key)) {
            return Ok(RtValue::Bool(false));
        }
        seen.push(key);
    }
    Ok(RtValue::Bool(true))
}

fn fold_numeric(
    interp: &mut Interp,
    args: &[RtValue],
) -> Result<Vec<f64>, EvalError> {
    let items = list_arg(args, 0, "list")?.to_vec();
    let mut out = Vec::with_capacity(items.len());
    for item in &items {
        let v = select(interp, args, 1, item)?;
        let Some(n) = v.as_f64() else {
            return Err(EvalError::new(format!(
                "expected a number, got {}",
                v.type_name()
            )));
        };
        out.push(n);
    }
    Ok(out)
}

fn float_or_int(n: f64) -> RtValue {
    if n.fract() == 0.0 && n.abs() < 9e15 {
        RtValue::Int(n as i64)
    } else {
        RtValue::Float(n)
    }
}

fn n_sum(interp: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    Ok(float_or_int(fold_numeric(interp, args)?.iter().sum()))
}

fn n_avg(interp: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    let values = fold_numeric(interp, args)?;
    if values.is_empty() {
        return Ok(RtValue::Nil);
    }
    Ok(RtValue::Float(values.iter().sum::<f64>() / values.len() as f64))
}

fn extremum(
    interp: &mut Interp,
    args: &[RtValue],
    pick_max: bool,
) -> Result<RtValue, EvalError> {
    // list form with optional selector, or plain variadic numbers
    if matches!(args.first(), Some(RtValue::List(_))) {
        let values = fold_numeric(interp, args)?;
        let best = if pick_max {
            values.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
        } else {
            values.iter().cloned().fold(f64::INFINITY, f64::min)
        };
        if values.is_empty() {
            return Ok(RtValue::Nil);
        }
        return Ok(float_or_int(best));
    }
    let mut best: Option<f64> = None;
    for value in args {
        let Some(n) = value.as_f64() else {
            return Err(EvalError::new(format!(
                "expected a number, got {}",
                value.type_name()
            )));
        };
        best = Some(match best {
            Some(b) if pick_max => b.max(n),
            Some(b) => b.min(n),
            None => n,
        });
    }
    best.map(float_or_int)
        .ok_or_else(|| EvalError::new("min/max of nothing"))
}

fn n_min(interp: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    extremum(interp, args, false)
}

fn n_max(interp: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    extremum(interp, args, true)
}

fn n_count(interp: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    let items = list_arg(args, 0, "list")?.to_vec();
    if args.len() < 2 {
        return Ok(RtValue::Int(items.len() as i64));
    }
    let mut count = 0;
    for item in &items {
        if select(interp, args, 1, item)?.truthy() {
            count += 1;
        }
    }
    Ok(RtValue::Int(count))
}

fn quantify(
    interp: &mut Interp,
    args: &[RtValue],
) -> Result<(usize, usize), EvalError> {
    let items = list_arg(args, 0, "list")?.to_vec();
    let mut matched = 0;
    for item in &items {
        if select(interp, args, 1, item)?.truthy() {
            matched += 1;
        }
    }
    Ok((matched, items.len()))
}

fn n_all(interp: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    let (matched, total) = quantify(interp, args)?;
    Ok(RtValue::Bool(matched == total))
}

fn n_any(interp: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    let (matched, _) = quantify(interp, args)?;
    Ok(RtValue::Bool(matched > 0))
}

fn n_none(interp: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    let (matched, _) = quantify(interp, args)?;
    Ok(RtValue::Bool(matched == 0))
}

fn n_filter(interp: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    let items = list_arg(args, 0, "list")?.to_vec();
    let mut out = Vec::new();
    for item in &items {
        if select(interp, args, 1, item)?.truthy() {
            out.push(item.clone());
        }
    }
    Ok(RtValue::list(out))
}

fn n_find(interp: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    let items = list_arg(args, 0, "list")?.to_vec();
    for item in &items {
        if select(interp, args, 1, item)?.truthy() {
            return Ok(item.clone());
        }
    }
    Ok(RtValue::Nil)
}

fn n_lookup(_: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    let key = match arg(args, 1, "key")? {
        RtValue::Str(s) => s.to_string(),
        RtValue::Int(i) => i.to_string(),
        other => {
            return Err(EvalError::new(format!(
                "lookup key must be a string, got {}",
                other.type_name()
            )))
        }
    };
    match arg(args, 0, "view")? {
        RtValue::Table(t) => Ok(t.borrow().get(&key).cloned().unwrap_or(RtValue::Nil)),
        other => Err(EvalError::new(format!(
            "lookup in a {}",
            other.type_name()
        ))),
    }
}

fn n_group_by(interp: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    let items = list_arg(args, 0, "list")?.to_vec();
    let mut groups: IndexMap<String, Vec<RtValue>> = IndexMap::new();
    for item in &items {
        let key = match select(interp, args, 1, item)? {
            RtValue::Str(s) => s.to_string(),
            RtValue::Int(i) => i.to_string(),
            RtValue::Bool(b) => b.to_string(),
            other => {
                return Err(EvalError::new(format!(
                    "group key must be scalar, got {}",
                    other.type_name()
                )))
            }
        };
        groups.entry(key).or_default().push(item.clone());
    }
    let table = groups
        .into_iter()
        .map(|(k, v)| (k, RtValue::list(v)))
        .collect();
    Ok(RtValue::table(table))
}

fn n_list_members_of_tag(interp: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    let tag = str_arg(args, 0, "tag")?;
    let members = interp
        .registry
        .list_members_of_tag(tag)
        .into_iter()
        .map(RtValue::str)
        .collect();
    Ok(RtValue::list(members))
}

fn n_is_member_of_tag(interp: &mut Interp, args: &[RtValue]) -> Result<RtValue, EvalError> {
    let tag = str_arg(args, 0, "tag")?;
    let candidate = str_arg(args, 1, "type")?;
    Ok(RtValue::Bool(interp.registry.is_member_of_tag(tag, candidate)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_expr;
    use crate::registry::TypeRegistry;

    fn eval_with_rows(src: &str) -> RtValue {
        let registry = TypeRegistry::new();
        let env = base_env();
        install_helpers(&env);
        let mut rows = Vec::new();
        for (id, hp) in [("a", 10), ("b", 20), ("c", 20)] {
            let mut row = IndexMap::new();
            row.insert("id".to_string(), RtValue::str(id));
            row.insert("hp".to_string(), RtValue::Int(hp));
            rows.push(RtValue::table(row));
        }
        env.define("rows", RtValue::list(rows));
        let expr = parse_expr(src).unwrap();
        let mut interp = Interp::new(&registry, 100_000);
        interp.eval(&expr, &env).unwrap()
    }

    #[test]
    fn test_sum_with_selector() {
        assert!(rt_eq(
            &eval_with_rows("sum(rows, |r| r.hp)"),
            &RtValue::Int(50)
        ));
    }

    #[test]
    fn test_unique_detects_duplicates() {
        assert!(rt_eq(
            &eval_with_rows("unique(rows, |r| r.id)"),
            &RtValue::Bool(true)
        ));
        assert!(rt_eq(
            &eval_with_rows("unique(rows, |r| r.hp)"),
            &RtValue::Bool(false)
        ));
    }

    #[test]
    fn test_quantifiers() {
        assert!(rt_eq(
            &eval_with_rows("all(rows, |r| r.hp > 0)"),
            &RtValue::Bool(true)
        ));
        assert!(rt_eq(
            &eval_with_rows("none(rows, |r| r.hp > 100)"),
            &RtValue::Bool(true)
        ));
        assert!(rt_eq(
            &eval_with_rows("count(rows, |r| r.hp == 20)"),
            &RtValue::Int(2)
        ));
    }

    #[test]
    fn test_filter_and_find() {
        assert!(rt_eq(
            &eval_with_rows("len(filter(rows, |r| r.hp == 20))"),
            &RtValue::Int(2)
        ));
        assert!(rt_eq(
            &eval_with_rows("find(rows, |r| r.id == \"b\").hp"),
            &RtValue::Int(20)
        ));
    }

    #[test]
    fn test_group_by() {
        assert!(rt_eq(
            &eval_with_rows("len(groupBy(rows, |r| str(r.hp)))"),
            &RtValue::Int(2)
        ));
    }

    #[test]
    fn test_string_utilities() {
        assert!(rt_eq(
            &eval_with_rows("upper(trim(\"  ab  \"))"),
            &RtValue::str("AB")
        ));
        assert!(rt_eq(
            &eval_with_rows("contains(\"sword\", \"or\")"),
            &RtValue::Bool(true)
        ));
    }
}
