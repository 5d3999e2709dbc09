//! The explicit core handle
//!
//! The registry and the published views are process-wide state during a
//! run; both live on [`Context`] and every core operation takes the handle
//! explicitly. Setup registers the built-ins before any user code runs.

use crate::error::{Result, TabuluaError};
use crate::expr::{Env, EvalError, Expr, Interp, NativeFn, RtValue, QUOTA_LIBRARY_LOAD};
use crate::registry::{CustomTypeSpec, SchemaSnapshot, TypeRegistry};
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::HashMap;

/// One entry of a code library: a host function, or a lambda compiled from
/// expression source
#[derive(Debug, Clone)]
pub enum LibraryFn {
    Native(NativeFn),
    /// Must be a lambda expression; instantiated into each sandbox
    Lambda(std::sync::Arc<Expr>),
}

/// A named, frozen set of pure functions exposed to expressions
#[derive(Debug, Clone, Default)]
pub struct Library {
    pub name: String,
    pub fns: IndexMap<String, LibraryFn>,
}

impl Library {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fns: IndexMap::new(),
        }
    }

    pub fn with_native(mut self, name: impl Into<String>, f: NativeFn) -> Self {
        self.fns.insert(name.into(), LibraryFn::Native(f));
        self
    }

    /// Compile an expression-defined entry; the source must be a lambda
    pub fn with_expr(mut self, name: impl Into<String>, src: &str) -> Result<Self> {
        let expr = crate::expr::parse_expr(src)
            .map_err(|e| TabuluaError::InvalidTypeSpec(format!("library function: {}", e)))?;
        if !matches!(expr, Expr::Lambda(..)) {
            return Err(TabuluaError::InvalidTypeSpec(
                "library functions must be lambdas".to_string(),
            ));
        }
        self.fns
            .insert(name.into(), LibraryFn::Lambda(std::sync::Arc::new(expr)));
        Ok(self)
    }

    /// Build the table value a sandbox sees for this library
    pub(crate) fn instantiate(&self, interp: &mut Interp, env: &Env) -> std::result::Result<RtValue, EvalError> {
        let mut entries = IndexMap::new();
        for (name, f) in &self.fns {
            let value = match f {
                LibraryFn::Native(f) => RtValue::Native(crate::expr::NativeVal {
                    name: std::rc::Rc::from(name.as_str()),
                    f: *f,
                }),
                LibraryFn::Lambda(expr) => interp.eval(expr, env)?,
            };
            entries.insert(name.clone(), value);
        }
        Ok(RtValue::table(entries))
    }
}

/// A published view: primary key -> projected value (or whole row)
#[derive(Debug, Clone, Default)]
pub struct PublishedView {
    pub entries: IndexMap<String, Value>,
}

/// Explicit handle carrying all cross-file state: the type registry, code
/// libraries, published views, and the dataset-level primary-key index.
pub struct Context {
    pub registry: TypeRegistry,
    libraries: IndexMap<String, Library>,
    /// Namespaced contexts: view name -> key -> value
    published: IndexMap<String, PublishedView>,
    /// Flat globals from files publishing a column without a context name
    globals: IndexMap<String, Value>,
    /// root type (or file) -> primary key -> claiming source file
    dataset_keys: HashMap<String, HashMap<String, String>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// A context with all built-in types installed
    pub fn new() -> Self {
        Self {
            registry: TypeRegistry::new(),
            libraries: IndexMap::new(),
            published: IndexMap::new(),
            globals: IndexMap::new(),
            dataset_keys: HashMap::new(),
        }
    }

    /// Register a custom type (manifest or custom-type file record)
    pub fn register_custom(&mut self, spec: &CustomTypeSpec) -> Result<()> {
        self.registry.register(spec)
    }

    pub fn add_library(&mut self, library: Library) -> Result<()> {
        if self.libraries.contains_key(&library.name) {
            return Err(TabuluaError::DuplicateLibrary(library.name));
        }
        tracing::debug!(name = %library.name, fns = library.fns.len(), "library registered");
        self.libraries.insert(library.name.clone(), library);
        Ok(())
    }

    pub fn libraries(&self) -> &IndexMap<String, Library> {
        &self.libraries
    }

    /// Install the libraries into a sandbox environment.
    /// Instantiation is bounded by the library-load quota.
    pub(crate) fn install_libraries(&self, env: &Env) -> std::result::Result<(), EvalError> {
        let mut interp = Interp::new(&self.registry, QUOTA_LIBRARY_LOAD);
        for (name, library) in &self.libraries {
            let table = library.instantiate(&mut interp, env)?;
            env.define(name.clone(), table);
        }
        Ok(())
    }

    pub fn publish(&mut self, name: impl Into<String>, view: PublishedView) {
        let name = name.into();
        tracing::debug!(name = %name, keys = view.entries.len(), "view published");
        self.published.insert(name, view);
    }

    /// Publish key -> value pairs as flat global names
    pub fn publish_globals(&mut self, entries: impl IntoIterator<Item = (String, Value)>) {
        self.globals.extend(entries);
    }

    pub fn published(&self) -> &IndexMap<String, PublishedView> {
        &self.published
    }

    pub fn globals(&self) -> &IndexMap<String, Value> {
        &self.globals
    }

    pub fn published_view(&self, name: &str) -> Option<&PublishedView> {
        self.published.get(name)
    }

    /// Define every published view and flat global in a sandbox environment
    pub(crate) fn install_published(&self, env: &Env) {
        for (name, value) in &self.globals {
            env.define(name.clone(), crate::expr::value_to_rt(value));
        }
        for (name, view) in &self.published {
            let table = view
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), crate::expr::value_to_rt(v)))
                .collect();
            env.define(name.clone(), RtValue::table(table));
        }
    }

    /// Claim a dataset-wide primary key under a root type. Returns the
    /// previous claimant when the key is already taken.
    pub(crate) fn claim_primary_key(
        &mut self,
        root: &str,
        key: &str,
        source: &str,
    ) -> Option<String> {
        let keys = self.dataset_keys.entry(root.to_string()).or_default();
        match keys.get(key) {
            Some(existing) => Some(existing.clone()),
            None => {
                keys.insert(key.to_string(), source.to_string());
                None
            }
        }
    }

    /// Export the registry's schema snapshot
    pub fn snapshot(&self) -> SchemaSnapshot {
        SchemaSnapshot::capture(&self.registry)
    }
}
