//! The delta engine: compiles observed mutations into minimal partial-update
//! directives.
//!
//! A [`Delta`] is a pair of mappings, `set: path -> value` and
//! `unset: path`, that always describes the net difference between a
//! document's current in-memory values and its values at the last
//! checkpoint. The engine maintains three invariants:
//!
//! - a path never appears in both mappings at once;
//! - if a path is in `set`, no strict descendant of it appears as its own
//!   top-level `set` key (the descendant's state is spliced into the
//!   ancestor's stored value instead);
//! - mutating a path wipes every previously recorded finer-grained
//!   directive under it.
//!
//! The engine deliberately does not diff against previous *values*, only
//! against previous *paths touched*: re-setting a field to the value it
//! already held still records a directive. Downstream consumers rely on
//! directive presence as a "touched" signal.

use std::collections::{BTreeMap, BTreeSet};

use bson::{Bson, Document};
use tracing::trace;

use crate::path;

/// A compiled partial-update directive.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Delta {
    set: BTreeMap<String, Bson>,
    unset: BTreeSet<String>,
}

impl Delta {
    /// Creates an empty delta.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the delta with every top-level field of `doc`.
    ///
    /// Used when a brand-new document enters tracking: persisting it for
    /// the first time must write all of it.
    pub fn seed(doc: &Document) -> Self {
        let mut delta = Self::new();
        for (key, value) in doc {
            delta.set.insert(key.clone(), value.clone());
        }
        delta
    }

    /// Returns `true` if no directive has been recorded.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// The recorded set directives, keyed by path.
    pub fn set_entries(&self) -> &BTreeMap<String, Bson> {
        &self.set
    }

    /// The recorded unset paths.
    pub fn unset_entries(&self) -> &BTreeSet<String> {
        &self.unset
    }

    /// Records an add/update mutation at `path`.
    ///
    /// Stale descendant directives are dropped first, because `path` is
    /// about to be fully described. If an ancestor of `path` already holds
    /// a `set` entry, `value` is spliced into that stored value at the
    /// relative remaining path instead of creating a second top-level key
    /// for the same logical field. An ancestor previously marked unset is
    /// promoted back to a `set` entry containing only the new value.
    pub fn record_set(&mut self, path: &str, value: Bson) {
        trace!(path, "delta record set");
        self.clean(path);

        for ancestor in path::ancestors(path) {
            let relative = &path[ancestor.len() + 1..];
            if let Some(stored) = self.set.get_mut(&ancestor) {
                splice_set(stored, relative, value);
                return;
            }
            if self.unset.remove(&ancestor) {
                let mut rebuilt = Document::new();
                path::set_path(&mut rebuilt, relative, value);
                self.set.insert(ancestor, Bson::Document(rebuilt));
                return;
            }
        }

        self.unset.remove(path);
        self.set.insert(path.to_string(), value);
    }

    /// Records a delete mutation at `path`.
    ///
    /// Descendant directives are dropped (unsetting a path subsumes all
    /// descendants). If an ancestor holds a `set` entry, the relative path
    /// is removed from that stored value as well, so the pair of mappings
    /// stays consistent with the in-memory state. A path already covered
    /// by an ancestor unset records nothing new.
    pub fn record_unset(&mut self, path: &str) {
        trace!(path, "delta record unset");
        self.clean(path);

        for ancestor in path::ancestors(path) {
            let relative = &path[ancestor.len() + 1..];
            if self.unset.contains(&ancestor) {
                return;
            }
            if let Some(stored) = self.set.get_mut(&ancestor) {
                splice_unset(stored, relative);
                break;
            }
        }

        self.set.remove(path);
        self.unset.insert(path.to_string());
    }

    /// Drops every directive recorded for a strict descendant of `path`.
    fn clean(&mut self, path: &str) {
        self.set
            .retain(|key, _| !path::is_strict_descendant(key, path));
        self.unset
            .retain(|key| !path::is_strict_descendant(key, path));
    }

    /// Re-reads every `set` entry from `data` so the stored values match
    /// the document's current state. The touched paths stay exactly as
    /// recorded; only their values refresh. Used after casting coerces
    /// field values in place, so the update directive carries the coerced
    /// values rather than the ones captured at mutation time.
    pub(crate) fn resync(&mut self, data: &Document) {
        for (path, value) in self.set.iter_mut() {
            if let Some(current) = path::get_path(data, path) {
                *value = current.clone();
            }
        }
    }

    /// Forgets everything recorded so far.
    pub fn clear(&mut self) {
        self.set.clear();
        self.unset.clear();
    }

    /// Compiles the delta into the update directive sent to the driver.
    ///
    /// The result has up to two keys, `$set` and `$unset`; an empty mapping
    /// is omitted entirely (conforming document stores treat an empty
    /// operator as a client error). A delta with no entries yields `None`.
    pub fn to_update(&self) -> Option<Document> {
        if self.is_empty() {
            return None;
        }
        let mut update = Document::new();
        if !self.set.is_empty() {
            let mut set = Document::new();
            for (key, value) in &self.set {
                set.insert(key.clone(), value.clone());
            }
            update.insert("$set", set);
        }
        if !self.unset.is_empty() {
            let mut unset = Document::new();
            for key in &self.unset {
                unset.insert(key.clone(), true);
            }
            update.insert("$unset", unset);
        }
        Some(update)
    }
}

/// Splices `value` into `stored` at the relative `path`, coercing a
/// non-container into a sub-document first. Array values take the indexed
/// write through a temporary owner document so the generic splice helper
/// applies.
fn splice_set(stored: &mut Bson, path: &str, value: Bson) {
    if !matches!(stored, Bson::Document(_) | Bson::Array(_)) {
        *stored = Bson::Document(Document::new());
    }
    match stored {
        Bson::Document(d) => path::set_path(d, path, value),
        Bson::Array(_) => {
            let mut owner = Document::new();
            owner.insert("root", std::mem::replace(stored, Bson::Null));
            path::set_path(&mut owner, &format!("root.{path}"), value);
            if let Some(replaced) = owner.remove("root") {
                *stored = replaced;
            }
        }
        _ => {}
    }
}

fn splice_unset(stored: &mut Bson, path: &str) {
    match stored {
        Bson::Document(d) => path::unset_path(d, path),
        Bson::Array(_) => {
            let mut owner = Document::new();
            owner.insert("root", std::mem::replace(stored, Bson::Null));
            path::unset_path(&mut owner, &format!("root.{path}"));
            if let Some(replaced) = owner.remove("root") {
                *stored = replaced;
            }
        }
        _ => {}
    }
}
