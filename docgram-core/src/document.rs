//! Tracked documents: nested BSON structures instrumented with change
//! observation and delta bookkeeping.
//!
//! Mutation observation is capability-scoped rather than ambient: every
//! mutator the application may call ([`set`](TrackedDocument::set),
//! [`unset`](TrackedDocument::unset), [`replace`](TrackedDocument::replace))
//! is an explicit method on the handle, and each one feeds the delta engine
//! with exactly what changed. The handle owns its data; the delta of one
//! document is never shared with another.

use bson::{Bson, Document};
use serde::Serialize;
use serde_json::Value;

use crate::delta::Delta;
use crate::error::OdmResult;
use crate::path;

/// A nested document augmented with an is-new flag and a [`Delta`].
///
/// Invariant: the delta always reflects the net difference between the
/// document's current values and its values at the last checkpoint
/// (construction, or the last successful save).
#[derive(Debug, Clone)]
pub struct TrackedDocument {
    data: Document,
    delta: Delta,
    is_new: bool,
    ignore_depth: usize,
}

impl TrackedDocument {
    /// Starts tracking `data`.
    ///
    /// A new document seeds its delta with every top-level field, so the
    /// first save writes all of it; a document loaded from the store starts
    /// with an empty delta.
    pub fn new(data: Document, is_new: bool) -> Self {
        let delta = if is_new { Delta::seed(&data) } else { Delta::new() };
        Self { data, delta, is_new, ignore_depth: 0 }
    }

    /// Builds a tracked document from any serializable value.
    pub fn from_value<T: Serialize>(value: &T, is_new: bool) -> OdmResult<Self> {
        let bson = bson::ser::serialize_to_bson(value)?;
        match bson {
            Bson::Document(doc) => Ok(Self::new(doc, is_new)),
            other => Err(crate::error::OdmError::Serialization(format!(
                "expected a document, got {other:?}"
            ))),
        }
    }

    /// Reads the value at `path`, if present.
    pub fn get(&self, path: &str) -> Option<&Bson> {
        path::get_path(&self.data, path)
    }

    /// Sets `path` to `value`, recording an update directive.
    pub fn set(&mut self, path: &str, value: impl Into<Bson>) {
        let value = value.into();
        if self.ignore_depth == 0 {
            self.delta.record_set(path, value.clone());
        }
        path::set_path(&mut self.data, path, value);
    }

    /// Removes `path`, recording an unset directive.
    pub fn unset(&mut self, path: &str) {
        if self.ignore_depth == 0 {
            self.delta.record_unset(path);
        }
        path::unset_path(&mut self.data, path);
    }

    /// Replaces the entire sub-structure at `path`.
    ///
    /// All previously recorded finer-grained directives under `path` are
    /// wiped and one coarse set directive is recorded for the replaced
    /// path. Equivalent to [`set`](Self::set) for scalar values.
    pub fn replace(&mut self, path: &str, value: impl Into<Bson>) {
        self.set(path, value);
    }

    /// Runs `f` with observation suspended.
    ///
    /// Mutations performed by `f` are applied to the data but never
    /// reflected in the delta. The toggle is a depth counter, so nested
    /// `ignore` calls still leave a single consistent checkpoint after
    /// the outermost call returns.
    pub fn ignore<F>(&mut self, f: F)
    where
        F: FnOnce(&mut TrackedDocument),
    {
        self.ignore_depth += 1;
        f(self);
        self.ignore_depth -= 1;
    }

    /// The current compiled partial-update directive.
    pub fn delta(&self) -> &Delta {
        &self.delta
    }

    /// Whether this document has never been persisted.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Overrides the lifecycle flag.
    pub fn set_is_new(&mut self, is_new: bool) {
        self.is_new = is_new;
    }

    /// Marks the current state as persisted: clears the delta and flips
    /// the document to not-new. Called after a successful save.
    pub fn checkpoint(&mut self) {
        self.delta.clear();
        self.is_new = false;
    }

    /// Whether the document contains a top-level field named `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// The document's `_id` field, if present.
    pub fn id(&self) -> Option<&Bson> {
        self.data.get("_id")
    }

    /// A read-only view of the underlying data.
    pub fn data(&self) -> &Document {
        &self.data
    }

    /// Consumes the handle, returning the underlying data.
    pub fn into_inner(self) -> Document {
        self.data
    }

    /// Serializes the underlying data to JSON.
    pub fn to_json(&self) -> OdmResult<Value> {
        Ok(serde_json::to_value(&self.data)?)
    }

    /// Replaces the underlying data without recording any directive.
    ///
    /// Used by the save path after casting coerces field values. The delta
    /// keeps its touched paths but re-reads their values from the new
    /// data, so the update directive sent to the driver carries what the
    /// document actually holds.
    pub(crate) fn replace_data(&mut self, data: Document) {
        self.delta.resync(&data);
        self.data = data;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{bson, doc};

    #[test]
    fn tracks_changes_on_non_new_docs() {
        let mut doc = TrackedDocument::new(doc! {}, false);
        doc.set("a", 1);

        assert_eq!(doc.delta().set_entries().get("a"), Some(&bson!(1)));
        assert!(doc.delta().unset_entries().is_empty());
        assert_eq!(doc.get("a"), Some(&bson!(1)));
    }

    #[test]
    fn nested_set_merges_into_tracked_ancestor() {
        let mut doc = TrackedDocument::new(doc! {}, false);

        doc.set("nested", doc! { "x": 2 });
        assert_eq!(
            doc.delta().set_entries().get("nested"),
            Some(&bson!({ "x": 2 }))
        );

        doc.set("nested.x", 3);
        assert_eq!(
            doc.delta().set_entries().get("nested"),
            Some(&bson!({ "x": 3 }))
        );
        assert_eq!(doc.get("nested.x"), Some(&bson!(3)));

        doc.set("nested", doc! { "y": 2 });
        assert_eq!(doc.delta().set_entries().len(), 1);
        assert_eq!(
            doc.delta().set_entries().get("nested"),
            Some(&bson!({ "y": 2 }))
        );
    }

    #[test]
    fn handles_deletes() {
        let mut doc = TrackedDocument::new(doc! {}, false);

        doc.set("top", 1);
        doc.set("nested", doc! { "x": 2 });

        doc.unset("nested.x");
        doc.unset("top");

        assert!(doc.delta().unset_entries().contains("nested.x"));
        assert!(doc.delta().unset_entries().contains("top"));
        assert!(!doc.delta().set_entries().contains_key("top"));
        assert_eq!(doc.get("top"), None);
        assert_eq!(doc.get("nested.x"), None);

        doc.unset("nested");
        assert!(doc.delta().set_entries().is_empty());
        assert!(doc.delta().unset_entries().contains("nested"));
        assert!(doc.delta().unset_entries().contains("top"));
    }

    #[test]
    fn new_documents_seed_their_delta() {
        let doc = TrackedDocument::new(doc! { "a": 1 }, true);
        assert!(doc.is_new());
        assert_eq!(doc.delta().set_entries().get("a"), Some(&bson!(1)));
    }

    #[test]
    fn ignore_suspends_observation() {
        let mut doc = TrackedDocument::new(doc! {}, false);
        doc.set("kept", 1);
        let before = doc.delta().clone();

        doc.ignore(|d| {
            d.set("hidden", 2);
            d.unset("kept");
        });

        assert_eq!(doc.delta(), &before);
        assert_eq!(doc.get("hidden"), Some(&bson!(2)));
        assert_eq!(doc.get("kept"), None);
    }

    #[test]
    fn nested_ignore_restores_a_single_checkpoint() {
        let mut doc = TrackedDocument::new(doc! {}, false);

        doc.ignore(|d| {
            d.set("outer", 1);
            d.ignore(|d| d.set("inner", 2));
            // Observation must still be off after the inner call returns.
            d.set("late", 3);
        });

        assert!(doc.delta().is_empty());
        doc.set("tracked", 4);
        assert_eq!(doc.delta().set_entries().len(), 1);
    }

    #[test]
    fn checkpoint_resets_lifecycle() {
        let mut doc = TrackedDocument::new(doc! { "a": 1 }, true);
        doc.checkpoint();
        assert!(!doc.is_new());
        assert!(doc.delta().is_empty());
    }

    #[test]
    fn replace_wipes_subtree_directives() {
        let mut doc = TrackedDocument::new(doc! {}, false);
        doc.set("cfg.a", 1);
        doc.set("cfg.b", 2);
        doc.replace("cfg", doc! { "c": 3 });

        assert_eq!(doc.delta().set_entries().len(), 1);
        assert_eq!(
            doc.delta().set_entries().get("cfg"),
            Some(&bson!({ "c": 3 }))
        );
    }
}
