//! Row and file assembly
//!
//! Applies the column pipeline across the data rows of one file: default
//! resolution, expression scheduling and evaluation, cell parsing, exploded
//! group assembly, primary-key uniqueness, and published views.

use crate::cell::{self, ParseCx};
use crate::column::{self, ColumnDefault, ColumnSpec, PathSeg};
use crate::context::{Context, PublishedView};
use crate::expr::{
    self, value_to_rt, Env, Expr, Interp, RtValue, QUOTA_CELL,
};
use crate::report::ErrorSink;
use crate::typespec::TypeExpr;
use crate::value::{ParsedCell, Value};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Join declaration of a secondary file
#[derive(Debug, Clone)]
pub struct JoinSpec {
    /// Primary file this one joins into
    pub into: String,
    /// Join column; defaults to the primary key column
    pub column: Option<String>,
}

/// File-level options from the package manifest
#[derive(Debug, Clone, Default)]
pub struct FileOptions {
    /// Registered type the rows instantiate; scopes dataset-wide
    /// primary-key uniqueness to the type's root ancestor
    pub row_type: Option<String>,
    pub publish_column: Option<String>,
    pub publish_context: Option<String>,
    pub join: Option<JoinSpec>,
}

/// Compiled header plus file metadata
#[derive(Debug, Clone)]
pub struct FileSchema {
    pub source: String,
    pub columns: Vec<ColumnSpec>,
    pub options: FileOptions,
}

impl FileSchema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// One parsed data row
#[derive(Debug, Clone)]
pub struct Row {
    /// 1-based source line
    pub line: usize,
    pub cells: Vec<ParsedCell>,
}

impl Row {
    /// The primary key (column 1's canonical reformat)
    pub fn primary_key(&self) -> Option<&str> {
        let cell = self.cells.first()?;
        (!cell.parsed.is_nil()).then_some(cell.reformatted.as_str())
    }

    /// Name-indexed view of the row with exploded groups assembled under
    /// their root names
    pub fn assembled(&self, schema: &FileSchema) -> IndexMap<String, Value> {
        let mut groups: Vec<(&str, Vec<(&[PathSeg], &Value)>)> = Vec::new();
        for (column, cell) in schema.columns.iter().zip(&self.cells) {
            let entry = (column.path.segs.as_slice(), &cell.parsed);
            match groups.iter_mut().find(|(root, _)| *root == column.path.root) {
                Some((_, group)) => group.push(entry),
                None => groups.push((&column.path.root, vec![entry])),
            }
        }
        let mut out = IndexMap::new();
        for (root, group) in groups {
            match column::assemble(&group) {
                Ok(value) => {
                    out.insert(root.to_string(), value);
                }
                Err(e) => {
                    tracing::warn!(root, error = %e, "exploded group failed to assemble");
                }
            }
        }
        out
    }
}

/// A parsed dataset file
#[derive(Debug, Clone)]
pub struct Table {
    pub schema: FileSchema,
    pub rows: Vec<Row>,
}

impl Table {
    /// Canonical TSV re-emission: header tokens plus reformatted cells,
    /// keeping the exploded column layout
    pub fn emit_canonical(&self) -> Vec<Vec<String>> {
        let mut out = Vec::with_capacity(self.rows.len() + 1);
        out.push(
            self.schema
                .columns
                .iter()
                .map(ColumnSpec::header_token)
                .collect(),
        );
        for row in &self.rows {
            out.push(row.cells.iter().map(|c| c.reformatted.clone()).collect());
        }
        out
    }

    /// Collapsed emission: exploded groups merge into one brace-wrapped
    /// cell under the root name. Parsed values are preserved across the
    /// exploded/collapsed toggle.
    pub fn emit_collapsed(&self, registry: &crate::registry::TypeRegistry) -> Vec<Vec<String>> {
        let mut roots: Vec<&str> = Vec::new();
        for column in &self.schema.columns {
            if !roots.contains(&column.path.root.as_str()) {
                roots.push(&column.path.root);
            }
        }
        let mut out = Vec::with_capacity(self.rows.len() + 1);
        out.push(roots.iter().map(|r| r.to_string()).collect());
        for row in &self.rows {
            let assembled = row.assembled(&self.schema);
            out.push(
                roots
                    .iter()
                    .map(|root| {
                        let value = assembled.get(*root).cloned().unwrap_or(Value::Nil);
                        let exploded_root = self
                            .schema
                            .columns
                            .iter()
                            .any(|c| c.path.root == *root && c.path.is_exploded());
                        if exploded_root {
                            crate::cell::reformat_collapsed(&value, registry)
                        } else {
                            // plain columns keep their canonical cell text
                            self.schema
                                .column_index(*root)
                                .and_then(|i| row.cells.get(i))
                                .map(|c| c.reformatted.clone())
                                .unwrap_or_default()
                        }
                    })
                    .collect(),
            );
        }
        out
    }

    /// JSON view of the parsed rows for the non-TSV exporters.
    ///
    /// Comment columns survive canonical TSV round-trips but are excluded
    /// from every other format.
    pub fn rows_to_json(&self, registry: &crate::registry::TypeRegistry) -> serde_json::Value {
        let comment_roots: Vec<&str> = self
            .schema
            .columns
            .iter()
            .filter(|c| !c.path.is_exploded() && is_comment_type(&c.ty, registry))
            .map(|c| c.path.root.as_str())
            .collect();
        serde_json::Value::Array(
            self.rows
                .iter()
                .map(|row| {
                    serde_json::Value::Object(
                        row.assembled(&self.schema)
                            .iter()
                            .filter(|(root, _)| !comment_roots.contains(&root.as_str()))
                            .map(|(root, value)| (root.clone(), value.to_json()))
                            .collect(),
                    )
                })
                .collect(),
        )
    }
}

fn is_comment_type(ty: &TypeExpr, registry: &crate::registry::TypeRegistry) -> bool {
    match ty {
        TypeExpr::Named(name) => registry.ancestor_chain(name).iter().any(|m| m.name == "comment"),
        TypeExpr::Union(alts) => alts
            .iter()
            .any(|a| !matches!(a, TypeExpr::Nil) && is_comment_type(a, registry)),
        _ => false,
    }
}

/// The value one row contributes to the file's published view
fn publish_value(schema: &FileSchema, row: &Row, publish_column: Option<usize>) -> Option<Value> {
    match publish_column {
        Some(i) => row.cells.get(i).map(|c| c.parsed.clone()),
        None => Some(Value::Record(row.assembled(schema))),
    }
}

/// A tokenized file as the upstream splitter hands it over: header token
/// row plus (1-based line, cells) data rows
#[derive(Debug, Clone)]
pub struct RawFile<'a> {
    pub source: &'a str,
    pub header: &'a [String],
    pub rows: &'a [(usize, Vec<String>)],
}

/// What a cell holds before evaluation
enum Staged {
    Literal { text: String, raw: String },
    Expr {
        compiled: Arc<Expr>,
        raw: String,
    },
    /// Compile failed earlier; already reported once
    Broken { raw: String },
}

/// Parse one file against the context.
///
/// Every problem goes to the sink; the returned table is complete either
/// way, with failed cells holding nil. Callers gate on the sink's error
/// count.
pub fn parse_file(
    raw: &RawFile,
    options: FileOptions,
    ctx: &mut Context,
    sink: &mut ErrorSink,
) -> Option<Table> {
    sink.set_source(raw.source);
    sink.set_line(None);
    tracing::debug!(source = raw.source, rows = raw.rows.len(), "parsing file");

    let columns = column::compile_header(raw.header, &ctx.registry, sink)?;
    let schema = FileSchema {
        source: raw.source.to_string(),
        columns,
        options,
    };

    // dataset-wide primary keys are scoped to the row type's root ancestor
    let pk_root = match schema.options.row_type.as_deref() {
        Some(ty) => ctx
            .registry
            .ancestor_chain(ty)
            .last()
            .map(|m| m.name.clone())
            .unwrap_or_else(|| ty.to_string()),
        None => raw.source.to_string(),
    };

    // the sandbox environment shared by every row of this file
    let file_env = expr::base_env();
    expr::install_helpers(&file_env);
    if let Err(e) = ctx.install_libraries(&file_env) {
        sink.error(format!("library load failed: {}", e));
        return None;
    }
    ctx.install_published(&file_env);

    // this file's own view grows row by row and is visible to later rows
    let own_context = schema.options.publish_context.clone();
    let own_view_rt = RtValue::table(IndexMap::new());
    if let Some(name) = &own_context {
        file_env.define(name.clone(), own_view_rt.clone());
    }

    let publish_idx = match schema.options.publish_column.as_deref() {
        Some(name) => match schema.column_index(name) {
            Some(i) => Some(i),
            None => {
                sink.error_value(name, format!("publish column {} does not exist", name));
                return None;
            }
        },
        None => None,
    };

    let mut expr_cache: HashMap<String, Option<Arc<Expr>>> = HashMap::new();
    let mut pk_seen: HashMap<String, usize> = HashMap::new();
    let mut published_entries: IndexMap<String, Value> = IndexMap::new();
    let mut rows = Vec::with_capacity(raw.rows.len());

    for (row_idx, (line, cells)) in raw.rows.iter().enumerate() {
        sink.set_line(Some(*line));
        if cells.len() > schema.columns.len() {
            sink.error(format!(
                "row has {} cells but the header declares {} columns",
                cells.len(),
                schema.columns.len()
            ));
            continue;
        }

        let Some(row) = parse_row_inner(
            &schema,
            row_idx,
            *line,
            cells,
            &file_env,
            &mut expr_cache,
            ctx,
            sink,
        ) else {
            continue;
        };

        // primary-key uniqueness: within the file, then across the
        // dataset-wide root type index
        if let Some(key) = row.primary_key().map(str::to_string) {
            if let Some(previous) = pk_seen.get(&key) {
                sink.error_value(
                    &key,
                    format!("duplicate primary key (first used on line {})", previous),
                );
            } else {
                pk_seen.insert(key.clone(), *line);
                if let Some(owner) = ctx.claim_primary_key(&pk_root, &key, raw.source) {
                    if owner != raw.source {
                        sink.error_value(
                            &key,
                            format!("primary key already defined by {}", owner),
                        );
                    }
                }
            }

            // publish progressively so rows i+1.. can see row i
            if let Some(value) = publish_value(&schema, &row, publish_idx) {
                if own_context.is_some() {
                    if let RtValue::Table(t) = &own_view_rt {
                        t.borrow_mut().insert(key.clone(), value_to_rt(&value));
                    }
                    published_entries.insert(key, value);
                } else if publish_idx.is_some() {
                    file_env.define(key.clone(), value_to_rt(&value));
                    published_entries.insert(key, value);
                }
            }
        }

        rows.push(row);
    }
    sink.set_line(None);

    // make the finished view visible to later files
    if let Some(name) = own_context {
        ctx.publish(name, PublishedView {
            entries: published_entries,
        });
    } else if publish_idx.is_some() {
        ctx.publish_globals(published_entries);
    }

    Some(Table { schema, rows })
}

/// Parse one raw row against a compiled schema, outside a file run.
///
/// Builds a fresh sandbox environment (libraries, published views) for the
/// single row; within [`parse_file`] the environment is shared instead.
pub fn parse_row(
    schema: &FileSchema,
    row_idx: usize,
    line: usize,
    cells: &[String],
    ctx: &Context,
    sink: &mut ErrorSink,
) -> Option<Row> {
    sink.set_source(&schema.source);
    sink.set_line(Some(line));
    let env = expr::base_env();
    expr::install_helpers(&env);
    if let Err(e) = ctx.install_libraries(&env) {
        sink.error(format!("library load failed: {}", e));
        return None;
    }
    ctx.install_published(&env);
    let mut cache = HashMap::new();
    let row = parse_row_inner(schema, row_idx, line, cells, &env, &mut cache, ctx, sink);
    sink.set_line(None);
    row
}

/// Parse a single data row: stage cells, schedule expressions, evaluate,
/// parse, and assemble the cells in header order.
#[allow(clippy::too_many_arguments)]
fn parse_row_inner(
    schema: &FileSchema,
    row_idx: usize,
    line: usize,
    cells: &[String],
    file_env: &Env,
    expr_cache: &mut HashMap<String, Option<Arc<Expr>>>,
    ctx: &Context,
    sink: &mut ErrorSink,
) -> Option<Row> {
    let columns = &schema.columns;
    let n = columns.len();

    // stage each cell: literal text, pending expression, or broken
    let mut staged = Vec::with_capacity(n);
    for (i, column) in columns.iter().enumerate() {
        let raw = cells.get(i).map(String::as_str).unwrap_or("");
        let stage = if raw.is_empty() {
            match &column.default {
                None => Staged::Literal {
                    text: String::new(),
                    raw: String::new(),
                },
                Some(ColumnDefault::Literal(text)) => Staged::Literal {
                    text: text.clone(),
                    raw: String::new(),
                },
                Some(ColumnDefault::Expr { compiled, .. }) => Staged::Expr {
                    compiled: compiled.clone(),
                    raw: String::new(),
                },
            }
        } else if let Some(src) = raw.strip_prefix('=') {
            // compile each unique expression source once
            let compiled = expr_cache
                .entry(src.to_string())
                .or_insert_with(|| match expr::parse_expr(src) {
                    Ok(expr) => Some(Arc::new(expr)),
                    Err(e) => {
                        sink.set_column(Some(columns[i].name.clone()));
                        sink.error_value(src, format!("bad expression: {}", e));
                        sink.set_column(None);
                        None
                    }
                })
                .clone();
            match compiled {
                Some(compiled) => Staged::Expr {
                    compiled,
                    raw: raw.to_string(),
                },
                None => Staged::Broken {
                    raw: raw.to_string(),
                },
            }
        } else {
            Staged::Literal {
                text: raw.to_string(),
                raw: raw.to_string(),
            }
        };
        staged.push(stage);
    }

    // dependency edges: expression self-references plus self-ref types
    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, column) in columns.iter().enumerate() {
        if let Staged::Expr { compiled, .. } = &staged[i] {
            for key in compiled.self_refs() {
                if let Some(target) = column::resolve_self_key(columns, &key) {
                    if target == i {
                        sink.error_value(&column.name, "expression references its own column");
                        return None;
                    }
                    deps[i].push(target);
                    continue;
                }
                // a reference to an exploded root depends on its whole group
                if let crate::typespec::SelfKey::Field(name) = &key {
                    let group: Vec<usize> = columns
                        .iter()
                        .enumerate()
                        .filter(|(_, c)| &c.path.root == name)
                        .map(|(j, _)| j)
                        .collect();
                    if !group.is_empty() {
                        if group.contains(&i) {
                            sink.error_value(
                                &column.name,
                                "expression references its own column group",
                            );
                            return None;
                        }
                        deps[i].extend(group);
                        continue;
                    }
                }
                sink.error_value(
                    &column.name,
                    format!("expression references unknown column {}", key),
                );
                return None;
            }
        }
        if let TypeExpr::SelfRef(key) = &column.ty {
            if let Some(target) = column::resolve_self_key(columns, key) {
                deps[i].push(target);
            }
        }
    }
    let order = match column::evaluation_order(&deps) {
        Ok(order) => order,
        Err(stuck) => {
            let names: Vec<&str> = stuck.iter().map(|&i| columns[i].name.as_str()).collect();
            sink.error(format!("cyclic column dependencies: {}", names.join(", ")));
            return None;
        }
    };

    // the per-row sandbox view: parsed values so far, by name, by
    // position, and nested under exploded roots
    let row_env = file_env.child();
    let self_table = RtValue::table(IndexMap::new());
    if let RtValue::Table(t) = &self_table {
        t.borrow_mut()
            .insert("__idx".to_string(), RtValue::Int(row_idx as i64 + 1));
    }
    row_env.define("self", self_table.clone());

    let mut out: Vec<Option<ParsedCell>> = (0..n).map(|_| None).collect();
    for &i in &order {
        let column = &columns[i];
        sink.set_column(Some(column.name.clone()));
        let cell = sink.with_col_type(&column.spec_src, |sink| {
            parse_one_cell(column, &staged[i], columns, &out, &row_env, ctx, sink)
        });
        if let Some(cell) = &cell {
            let rt = value_to_rt(&cell.parsed);
            if let RtValue::Table(t) = &self_table {
                t.borrow_mut().insert((i + 1).to_string(), rt.clone());
            }
            insert_self_value(&self_table, column, rt);
        }
        out[i] = Some(cell.unwrap_or_else(|| match &staged[i] {
            Staged::Literal { raw, .. }
            | Staged::Expr { raw, .. }
            | Staged::Broken { raw } => ParsedCell {
                raw: raw.clone(),
                evaluated: String::new(),
                parsed: Value::Nil,
                reformatted: String::new(),
            },
        }));
        sink.set_column(None);
    }

    Some(Row {
        line,
        cells: out.into_iter().map(|c| c.expect("every column visited")).collect(),
    })
}

/// Evaluate (if an expression) and parse one cell
fn parse_one_cell(
    column: &ColumnSpec,
    staged: &Staged,
    columns: &[ColumnSpec],
    parsed_so_far: &[Option<ParsedCell>],
    row_env: &Env,
    ctx: &Context,
    sink: &mut ErrorSink,
) -> Option<ParsedCell> {
    let (evaluated, raw) = match staged {
        Staged::Broken { .. } => return None, // reported at compile
        Staged::Literal { text, raw } => (text.clone(), raw.clone()),
        Staged::Expr { compiled, raw } => {
            let mut interp = Interp::new(&ctx.registry, QUOTA_CELL);
            match interp.eval(compiled, row_env) {
                Err(e) => {
                    sink.error(format!("expression failed: {}", e));
                    return None;
                }
                Ok(rt) => match expr::rt_to_cell_string(&rt, &ctx.registry) {
                    Some(text) => (text, raw.clone()),
                    None => {
                        sink.error("expression yielded a function, not a value");
                        return None;
                    }
                },
            }
        }
    };

    // second pass for self-referencing types: the sibling's value names
    // the parser to use
    let resolved_ty;
    let ty = match &column.ty {
        TypeExpr::SelfRef(key) => {
            let target = column::resolve_self_key(columns, key)?;
            let target_cell = parsed_so_far[target].as_ref()?;
            match &target_cell.parsed {
                Value::TypeName(name) | Value::Str(name) => {
                    resolved_ty = TypeExpr::Named(name.clone());
                    &resolved_ty
                }
                Value::Nil if evaluated.is_empty() => {
                    return Some(ParsedCell {
                        raw,
                        evaluated,
                        parsed: Value::Nil,
                        reformatted: String::new(),
                    });
                }
                other => {
                    sink.error_value(
                        &evaluated,
                        format!(
                            "{} resolved to a {}, not a type name",
                            key,
                            other.kind_name()
                        ),
                    );
                    return None;
                }
            }
        }
        other => other,
    };

    let mut cx = ParseCx {
        registry: &ctx.registry,
        sink,
    };
    let parsed = cell::parse_cell(ty, &evaluated, &mut cx)?;
    let reformatted = cell::reformat(Some(ty), &parsed, &ctx.registry);
    Some(ParsedCell {
        raw,
        evaluated,
        parsed,
        reformatted,
    })
}

/// Mirror a parsed value into the `self` table, nesting exploded paths so
/// expressions can write `self.stats.attack`
fn insert_self_value(self_table: &RtValue, column: &ColumnSpec, rt: RtValue) {
    let RtValue::Table(root) = self_table else {
        return;
    };
    if !column.path.is_exploded() {
        root.borrow_mut().insert(column.path.root.clone(), rt);
        return;
    }
    let mut keys = vec![column.path.root.clone()];
    for seg in &column.path.segs {
        keys.push(match seg {
            PathSeg::Field(name) => name.clone(),
            PathSeg::TupleIdx(i) => format!("_{}", i),
            PathSeg::ArrayIdx(i) => i.to_string(),
            PathSeg::MapKey(key) => key.clone(),
        });
    }
    let mut current = root.clone();
    for key in &keys[..keys.len() - 1] {
        let next = {
            let mut table = current.borrow_mut();
            match table.get(key) {
                Some(RtValue::Table(t)) => t.clone(),
                _ => {
                    let fresh = std::rc::Rc::new(std::cell::RefCell::new(IndexMap::new()));
                    table.insert(key.clone(), RtValue::Table(fresh.clone()));
                    fresh
                }
            }
        };
        current = next;
    }
    current
        .borrow_mut()
        .insert(keys.last().expect("nonempty path").clone(), rt);
}
