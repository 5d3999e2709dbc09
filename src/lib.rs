//! TabuLua core
//!
//! A typed tabular-data engine: tab-separated files carry an inline type
//! grammar in their column headers; every cell is validated against that
//! grammar, sandboxed `=`-expressions fill defaults and computed cells, and
//! multi-level validators check rows, files, and packages.
//!
//! ## Features
//!
//! - **Type grammar**: unions, arrays, maps, tuples, records, enums,
//!   `extends` inheritance, ancestor constraints, type tags, and
//!   self-referencing column types
//! - **Type registry**: named parsers built by composition, with full
//!   introspection and schema-snapshot export
//! - **Cell pipeline**: defaults, topologically ordered expression cells,
//!   exploded-column assembly, canonical reformatting
//! - **Sandboxed expressions**: deterministic, quota-bounded evaluation
//!   with no ambient globals
//! - **Validators**: row / file / package levels with shared `ctx` state
//!   and error/warn severities
//!
//! ## Architecture
//!
//! ```text
//! header token ──> typespec ──> TypeExpr ──> registry entry
//! raw cell ──> column pipeline ──> expression sandbox ──> cell parser
//!          ──> ParsedCell { raw, evaluated, parsed, reformatted }
//! rows ──> table ──> joins ──> validators ──> published views
//! ```
//!
//! All data-level failures flow through the [`ErrorSink`]; core APIs
//! return sentinels instead of unwinding so batch validation continues.

pub mod cell;
pub mod column;
pub mod context;
pub mod error;
pub mod expr;
pub mod join;
pub mod package;
pub mod registry;
pub mod report;
pub mod table;
pub mod typespec;
pub mod validator;
pub mod value;

pub use cell::{parse_cell, parse_named, reformat, ParseCx};
pub use column::{compile_header, make_column_parser, ColumnSpec};
pub use context::{Context, Library, PublishedView};
pub use error::{Result, TabuluaError};
pub use join::join_files;
pub use package::{resolve_load_order, Dependency, PackageManifest, VersionPred};
pub use registry::{
    naming, Constraints, CustomTypeSpec, SchemaSnapshot, TypeKind, TypeMeta, TypeRegistry,
};
pub use report::{ErrorSink, Report, Severity};
pub use table::{parse_file, parse_row, FileOptions, FileSchema, JoinSpec, RawFile, Row, Table};
pub use typespec::{parse_type_spec, SelfKey, TypeExpr};
pub use validator::{
    new_ctx, run_file_validators, run_package_validators, run_row_validators, Level,
    ValidatorSpec,
};
pub use value::{ParsedCell, Value};
