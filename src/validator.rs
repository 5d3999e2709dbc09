//! Multi-level validator engine
//!
//! Validators are sandboxed expressions at row, file, and package level,
//! each with its own environment, quota, and a writable `ctx` table shared
//! across the scope. `error`-level failures block acceptance; `warn`-level
//! failures accumulate and never stop the run.

use crate::context::Context;
use crate::expr::{
    self, interpret_result, value_to_rt, Env, Expr, Interp, RtValue, ValidatorOutcome,
    QUOTA_FILE_VALIDATOR, QUOTA_PACKAGE_VALIDATOR, QUOTA_ROW_VALIDATOR,
};
use crate::report::ErrorSink;
use crate::table::Table;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Validator severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Error,
    Warn,
}

/// A declared validator: expression source plus level.
///
/// Manifests may write a bare string (defaulting to `error`) or a record
/// `{expr, level}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "ValidatorDecl")]
pub struct ValidatorSpec {
    pub expr: String,
    pub level: Level,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ValidatorDecl {
    Bare(String),
    Full { expr: String, level: Level },
}

impl From<ValidatorDecl> for ValidatorSpec {
    fn from(decl: ValidatorDecl) -> Self {
        match decl {
            ValidatorDecl::Bare(expr) => Self {
                expr,
                level: Level::Error,
            },
            ValidatorDecl::Full { expr, level } => Self { expr, level },
        }
    }
}

impl ValidatorSpec {
    pub fn error(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            level: Level::Error,
        }
    }

    pub fn warn(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            level: Level::Warn,
        }
    }
}

/// A fresh writable `ctx` table for one validator scope
pub fn new_ctx() -> RtValue {
    RtValue::table(IndexMap::new())
}

struct Compiled {
    spec: ValidatorSpec,
    expr: Option<Arc<Expr>>,
}

/// Compile validator sources, reporting syntax errors once
fn compile(specs: &[ValidatorSpec], sink: &mut ErrorSink) -> Vec<Compiled> {
    specs
        .iter()
        .map(|spec| {
            let expr = match expr::parse_expr(&spec.expr) {
                Ok(expr) => Some(Arc::new(expr)),
                Err(e) => {
                    sink.error_value(&spec.expr, format!("bad validator expression: {}", e));
                    None
                }
            };
            Compiled {
                spec: spec.clone(),
                expr,
            }
        })
        .collect()
}

fn run_one(
    compiled: &Compiled,
    env: &Env,
    quota: u64,
    ctx: &Context,
    sink: &mut ErrorSink,
) -> bool {
    let Some(expr) = &compiled.expr else {
        return false; // syntax error already reported
    };
    let mut interp = Interp::new(&ctx.registry, quota);
    let outcome = match interp.eval(expr, env) {
        Err(e) => ValidatorOutcome::Fail(format!("validator error: {}", e)),
        Ok(rt) => interpret_result(&rt, &format!("validator failed: {}", compiled.spec.expr)),
    };
    match outcome {
        ValidatorOutcome::Pass => true,
        ValidatorOutcome::Fail(message) => {
            match compiled.spec.level {
                Level::Error => sink.error(message),
                Level::Warn => sink.warn(message),
            }
            compiled.spec.level == Level::Warn
        }
    }
}

/// Shared scaffolding: general utilities, helpers, libraries, published
/// views, and the writable `ctx`
fn scope_env(ctx: &Context, shared_ctx: &RtValue, sink: &mut ErrorSink) -> Option<Env> {
    let env = expr::base_env();
    expr::install_helpers(&env);
    if let Err(e) = ctx.install_libraries(&env) {
        sink.error(format!("library load failed: {}", e));
        return None;
    }
    ctx.install_published(&env);
    env.define("ctx", shared_ctx.clone());
    Some(env)
}

/// Run row validators across every row of a table.
///
/// Environment: `self`/`row` (parsed-value view), `rowIndex`, `fileName`,
/// and the per-file `ctx`. Returns false when any error-level validator
/// failed on any row.
pub fn run_row_validators(
    table: &Table,
    specs: &[ValidatorSpec],
    shared_ctx: &RtValue,
    ctx: &Context,
    sink: &mut ErrorSink,
) -> bool {
    if specs.is_empty() {
        return true;
    }
    sink.set_source(&table.schema.source);
    let compiled = compile(specs, sink);
    let Some(base) = scope_env(ctx, shared_ctx, sink) else {
        return false;
    };

    let mut accepted = true;
    for (i, row) in table.rows.iter().enumerate() {
        sink.set_line(Some(row.line));
        let env = base.child();
        let row_view = row_table(row, table);
        env.define("self", row_view.clone());
        env.define("row", row_view);
        env.define("rowIndex", RtValue::Int(i as i64 + 1));
        env.define("fileName", RtValue::str(&table.schema.source));
        for validator in &compiled {
            // all validators run even after a failure
            accepted &= run_one(validator, &env, QUOTA_ROW_VALIDATOR, ctx, sink);
        }
    }
    sink.set_line(None);
    accepted
}

/// Run file validators once over a whole table.
///
/// Environment: `rows`/`file`, `count`, `fileName`, the collection
/// helpers, and the same per-file `ctx` the row validators used.
pub fn run_file_validators(
    table: &Table,
    specs: &[ValidatorSpec],
    shared_ctx: &RtValue,
    ctx: &Context,
    sink: &mut ErrorSink,
) -> bool {
    if specs.is_empty() {
        return true;
    }
    sink.set_source(&table.schema.source);
    sink.set_line(None);
    let compiled = compile(specs, sink);
    let Some(env) = scope_env(ctx, shared_ctx, sink) else {
        return false;
    };

    let rows = rows_list(table);
    env.define("rows", rows.clone());
    env.define("file", rows);
    env.define("count", RtValue::Int(table.rows.len() as i64));
    env.define("fileName", RtValue::str(&table.schema.source));

    let mut accepted = true;
    for validator in &compiled {
        accepted &= run_one(validator, &env, QUOTA_FILE_VALIDATOR, ctx, sink);
    }
    accepted
}

/// Run package validators once over every file of a package.
///
/// Environment: `files`/`package` (lowercased file name -> rows),
/// `packageId`, the helpers, and a per-package `ctx`.
pub fn run_package_validators(
    package_id: &str,
    tables: &[&Table],
    specs: &[ValidatorSpec],
    shared_ctx: &RtValue,
    ctx: &Context,
    sink: &mut ErrorSink,
) -> bool {
    if specs.is_empty() {
        return true;
    }
    sink.set_source(package_id);
    sink.set_line(None);
    let compiled = compile(specs, sink);
    let Some(env) = scope_env(ctx, shared_ctx, sink) else {
        return false;
    };

    let mut files = IndexMap::new();
    for table in tables {
        files.insert(table.schema.source.to_lowercase(), rows_list(table));
    }
    let files = RtValue::table(files);
    env.define("files", files.clone());
    env.define("package", files);
    env.define("packageId", RtValue::str(package_id));

    let mut accepted = true;
    for validator in &compiled {
        accepted &= run_one(validator, &env, QUOTA_PACKAGE_VALIDATOR, ctx, sink);
    }
    accepted
}

/// One row as a sandbox table: assembled values by name, plus positions
fn row_table(row: &crate::table::Row, table: &Table) -> RtValue {
    let mut view: IndexMap<String, RtValue> = row
        .assembled(&table.schema)
        .iter()
        .map(|(k, v)| (k.clone(), value_to_rt(v)))
        .collect();
    for (i, cell) in row.cells.iter().enumerate() {
        view.insert((i + 1).to_string(), value_to_rt(&cell.parsed));
    }
    RtValue::table(view)
}

fn rows_list(table: &Table) -> RtValue {
    RtValue::list(table.rows.iter().map(|row| row_table(row, table)).collect())
}
