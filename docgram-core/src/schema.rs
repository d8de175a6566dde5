//! Schema declaration and compilation.
//!
//! A schema is declared as a plain nested BSON document in which leaf
//! values are scalar type markers (`"number"`, `"string"`, ...), arrays
//! typed by their first element, nested sub-documents (recursed into), or
//! an explicit descriptor sub-document whose first key starts with the
//! reserved marker `$` (stored verbatim, never descended into).
//!
//! [`Schema::new`] compiles the shape into a flattened mapping from every
//! reachable dot-path (including `$` wildcard array paths) to its
//! [`PathSpec`]. The result is deterministic given the shape and immutable
//! afterwards; every document and query created against the schema shares
//! it read-only.
//!
//! The schema also carries the middleware registry and the per-role method
//! tables. Both are additive and freeze once the schema is handed to a
//! model behind an `Arc`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use bson::{Bson, Document};
use futures::future::BoxFuture;

use crate::middleware::{HookContext, HookResult, MiddlewareRegistry, Next};
use crate::path;

/// The reserved marker prefix for explicit descriptor sub-documents.
pub const RESERVED_MARKER: char = '$';

/// Key holding the type marker inside an explicit descriptor.
pub const TYPE_KEY: &str = "$type";

/// The scalar types a leaf path can coerce to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    /// Any numeric value; strings are parsed.
    Number,
    /// Whole numbers only.
    Integer,
    /// UTF-8 text; scalars are stringified.
    String,
    /// Booleans; numbers and `"true"`/`"false"` coerce.
    Boolean,
    /// Timestamps; RFC 3339 strings and millisecond integers coerce.
    DateTime,
    /// Object ids; 24-hex strings coerce.
    ObjectId,
}

impl ScalarKind {
    /// Resolves a type marker string to a scalar kind. Unknown markers
    /// yield `None` (the path becomes `Mixed`: no coercion is applied).
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker.to_ascii_lowercase().as_str() {
            "number" | "double" | "float" => Some(ScalarKind::Number),
            "int" | "integer" | "long" => Some(ScalarKind::Integer),
            "string" => Some(ScalarKind::String),
            "bool" | "boolean" => Some(ScalarKind::Boolean),
            "date" | "datetime" => Some(ScalarKind::DateTime),
            "objectid" => Some(ScalarKind::ObjectId),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarKind::Number => "number",
            ScalarKind::Integer => "integer",
            ScalarKind::String => "string",
            ScalarKind::Boolean => "boolean",
            ScalarKind::DateTime => "date",
            ScalarKind::ObjectId => "objectId",
        };
        f.write_str(name)
    }
}

/// The type descriptor compiled for one schema path.
#[derive(Debug, Clone, PartialEq)]
pub enum PathSpec {
    /// A coercible scalar leaf.
    Scalar(ScalarKind),
    /// An array node; its elements are described by the `path.$` entry.
    Array,
    /// A structural sub-document node.
    Object,
    /// No declared type; values pass through uncoerced.
    Mixed,
    /// An explicit descriptor supplied verbatim by the schema author
    /// (`{ "$type": ..., "$default": ..., ... }`). Terminal: never
    /// descended into.
    Descriptor(Document),
}

impl PathSpec {
    /// The scalar kind this path coerces to, if any. Structural nodes and
    /// descriptors without a recognized `$type` marker resolve to `None`.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            PathSpec::Scalar(kind) => Some(*kind),
            PathSpec::Descriptor(doc) => doc
                .get(TYPE_KEY)
                .and_then(Bson::as_str)
                .and_then(ScalarKind::from_marker),
            _ => None,
        }
    }

    /// Whether data at this path recurses as an array.
    pub fn is_array(&self) -> bool {
        matches!(self, PathSpec::Array)
    }

    /// Whether data at this path recurses as a sub-document.
    pub fn is_object(&self) -> bool {
        matches!(self, PathSpec::Object)
    }
}

/// The roles a user-registered method can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodTarget {
    /// Methods invoked on a tracked document.
    Document,
    /// Methods invoked on a query builder.
    Query,
    /// Methods invoked on the model itself.
    Model,
}

/// A user-registered method: the terminal operation of its own hook.
pub type MethodFn = Arc<dyn Fn(HookContext) -> BoxFuture<'static, HookResult> + Send + Sync>;

/// A compiled schema: the flattened path map plus the middleware registry
/// and method tables consumed by models, documents and queries.
#[derive(Clone)]
pub struct Schema {
    shape: Document,
    paths: BTreeMap<String, PathSpec>,
    middleware: MiddlewareRegistry,
    methods: HashMap<MethodTarget, HashMap<String, MethodFn>>,
}

impl Schema {
    /// Compiles `shape` into a schema. Compilation is deterministic and
    /// idempotent: the same shape always yields an identical path map.
    pub fn new(shape: Document) -> Self {
        let mut paths = BTreeMap::new();
        visit_object(&shape, "", &mut paths);
        Self {
            shape,
            paths,
            middleware: MiddlewareRegistry::new(),
            methods: HashMap::new(),
        }
    }

    /// A schema with no declared paths: every field passes through and
    /// casting never fires.
    pub fn untyped() -> Self {
        Self::new(Document::new())
    }

    /// The declared shape this schema was compiled from.
    pub fn shape(&self) -> &Document {
        &self.shape
    }

    /// The compiled flattened path map.
    pub fn paths(&self) -> &BTreeMap<String, PathSpec> {
        &self.paths
    }

    /// Looks up the descriptor for a schema path.
    pub fn path(&self, path: &str) -> Option<&PathSpec> {
        self.paths.get(path)
    }

    /// Whether any paths were declared. An untyped schema skips the
    /// cast-on-save gate.
    pub fn is_typed(&self) -> bool {
        !self.paths.is_empty()
    }

    /// Registers `interceptor` under `hook`. Interceptors fire in
    /// registration order on the way in; the last registered runs
    /// innermost.
    pub fn middleware<F>(&mut self, hook: impl Into<String>, interceptor: F) -> &mut Self
    where
        F: for<'a> Fn(HookContext, Next<'a>) -> BoxFuture<'a, HookResult>
            + Send
            + Sync
            + 'static,
    {
        self.middleware.register(hook, interceptor);
        self
    }

    /// The registry read by every hook fire.
    pub fn middleware_registry(&self) -> &MiddlewareRegistry {
        &self.middleware
    }

    /// Registers a named method for `target`. Re-registering a name
    /// replaces the previous function.
    pub fn method<F>(&mut self, target: MethodTarget, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(HookContext) -> BoxFuture<'static, HookResult> + Send + Sync + 'static,
    {
        self.methods
            .entry(target)
            .or_default()
            .insert(name.into(), Arc::new(f));
        self
    }

    /// Looks up a registered method.
    pub fn method_fn(&self, target: MethodTarget, name: &str) -> Option<&MethodFn> {
        self.methods.get(&target).and_then(|table| table.get(name))
    }

    /// The names registered for `target`, in no particular order.
    pub fn method_names(&self, target: MethodTarget) -> Vec<&str> {
        self.methods
            .get(&target)
            .map(|table| table.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("paths", &self.paths)
            .field("middleware", &self.middleware)
            .finish_non_exhaustive()
    }
}

fn visit_object(obj: &Document, current: &str, paths: &mut BTreeMap<String, PathSpec>) {
    // A sub-document whose first key carries the reserved marker is an
    // explicit descriptor, stored verbatim instead of descended into.
    if let Some(first_key) = obj.keys().next() {
        if first_key.starts_with(RESERVED_MARKER) {
            paths.insert(current.to_string(), PathSpec::Descriptor(obj.clone()));
            return;
        }
    }

    if !current.is_empty() {
        paths.insert(current.to_string(), PathSpec::Object);
    }

    for (key, value) in obj {
        let child = path::join(current, key);
        match value {
            Bson::Array(arr) => visit_array(arr, &child, paths),
            Bson::Document(doc) => visit_object(doc, &child, paths),
            other => {
                paths.insert(child, scalar_spec(other));
            }
        }
    }
}

fn visit_array(arr: &[Bson], current: &str, paths: &mut BTreeMap<String, PathSpec>) {
    paths.insert(current.to_string(), PathSpec::Array);
    let wildcard = path::join(current, "$");
    match arr.first() {
        None => {
            paths.insert(wildcard, PathSpec::Mixed);
        }
        Some(Bson::Array(inner)) => visit_array(inner, &wildcard, paths),
        Some(Bson::Document(doc)) => visit_object(doc, &wildcard, paths),
        Some(other) => {
            paths.insert(wildcard, scalar_spec(other));
        }
    }
}

fn scalar_spec(value: &Bson) -> PathSpec {
    match value {
        Bson::String(marker) => ScalarKind::from_marker(marker)
            .map(PathSpec::Scalar)
            .unwrap_or(PathSpec::Mixed),
        _ => PathSpec::Mixed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn compiles_nested_paths() {
        let schema = Schema::new(doc! {
            "test": "number",
            "nested": {
                "a": { "$type": "number" },
            },
        });

        assert_eq!(schema.path("test"), Some(&PathSpec::Scalar(ScalarKind::Number)));
        assert_eq!(schema.path("nested"), Some(&PathSpec::Object));
        assert_eq!(
            schema.path("nested.a"),
            Some(&PathSpec::Descriptor(doc! { "$type": "number" }))
        );
        assert_eq!(
            schema.path("nested.a").and_then(PathSpec::scalar_kind),
            Some(ScalarKind::Number)
        );
    }

    #[test]
    fn handles_arrays() {
        let schema = Schema::new(doc! {
            "test": "number",
            "arr_mixed": [],
            "arr_plain": ["number"],
            "arr_nested": [["number"]],
        });

        assert_eq!(schema.path("arr_mixed"), Some(&PathSpec::Array));
        assert_eq!(schema.path("arr_mixed.$"), Some(&PathSpec::Mixed));
        assert_eq!(schema.path("arr_plain"), Some(&PathSpec::Array));
        assert_eq!(
            schema.path("arr_plain.$"),
            Some(&PathSpec::Scalar(ScalarKind::Number))
        );
        assert_eq!(schema.path("arr_nested.$"), Some(&PathSpec::Array));
        assert_eq!(
            schema.path("arr_nested.$.$"),
            Some(&PathSpec::Scalar(ScalarKind::Number))
        );
    }

    #[test]
    fn handles_nested_document_arrays() {
        let schema = Schema::new(doc! {
            "docs": [{ "_id": "objectId" }],
        });

        assert_eq!(schema.path("docs"), Some(&PathSpec::Array));
        assert_eq!(schema.path("docs.$"), Some(&PathSpec::Object));
        assert_eq!(
            schema.path("docs.$._id"),
            Some(&PathSpec::Scalar(ScalarKind::ObjectId))
        );
    }

    #[test]
    fn compilation_is_idempotent() {
        let shape = doc! {
            "a": "string",
            "b": { "c": ["integer"] },
            "d": { "$type": "date", "$default": Bson::Null },
        };
        let first = Schema::new(shape.clone());
        let second = Schema::new(shape);
        assert_eq!(first.paths(), second.paths());
    }

    #[test]
    fn unknown_markers_become_mixed() {
        let schema = Schema::new(doc! { "blob": "frobnicator" });
        assert_eq!(schema.path("blob"), Some(&PathSpec::Mixed));
    }

    #[test]
    fn method_tables_are_per_role() {
        let mut schema = Schema::untyped();
        schema.method(MethodTarget::Model, "ping", |_ctx| {
            Box::pin(async { Ok(bson::bson!("pong")) })
        });

        assert!(schema.method_fn(MethodTarget::Model, "ping").is_some());
        assert!(schema.method_fn(MethodTarget::Document, "ping").is_none());
        assert_eq!(schema.method_names(MethodTarget::Model), vec!["ping"]);
    }
}
