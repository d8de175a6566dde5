//! Dot-separated path utilities.
//!
//! Paths address positions inside nested BSON documents: `"a.b.c"` walks
//! through sub-documents, numeric segments index into arrays, and the
//! wildcard segment `$` (used only in compiled schema paths) stands for
//! "every array element". The functions here are pure; the splice helpers
//! at the bottom are shared by the delta engine and by drivers that apply
//! partial-update directives.

use bson::{Bson, Document};

/// Joins a path and a key, treating an empty path as the root.
pub fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// Splits a path into its segments.
pub fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('.')
}

/// Strict ancestor paths of `path`, root-most first.
///
/// `ancestors("a.b.c")` yields `["a", "a.b"]`; a single-segment path has
/// no ancestors.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    for (idx, ch) in path.char_indices() {
        if ch == '.' {
            out.push(path[..idx].to_string());
        }
    }
    out
}

/// Returns `true` if `candidate` is a strict descendant of `path`
/// (prefix match on `path + "."`).
pub fn is_strict_descendant(candidate: &str, path: &str) -> bool {
    candidate.len() > path.len() + 1
        && candidate.starts_with(path)
        && candidate.as_bytes()[path.len()] == b'.'
}

/// Rewrites an actual data path into its schema form by replacing numeric
/// array-index segments with the wildcard (`"people.0.name"` becomes
/// `"people.$.name"`).
pub fn to_schema_path(path: &str) -> String {
    split(path)
        .map(|seg| {
            if seg.bytes().all(|b| b.is_ascii_digit()) && !seg.is_empty() {
                "$"
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Reads the value at `path`, if present.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut current: Option<&Bson> = None;
    for seg in split(path) {
        current = match current {
            None => doc.get(seg),
            Some(Bson::Document(d)) => d.get(seg),
            Some(Bson::Array(arr)) => seg.parse::<usize>().ok().and_then(|i| arr.get(i)),
            _ => None,
        };
        current?;
    }
    current
}

/// Writes `value` at `path`, creating intermediate sub-documents as needed.
///
/// A numeric segment indexes into an existing array, padding with `Null`
/// when the index is past the end. A non-container in the middle of the
/// path is overwritten by a fresh sub-document.
pub fn set_path(doc: &mut Document, path: &str, value: Bson) {
    let segments: Vec<&str> = split(path).collect();
    let (first, rest) = match segments.split_first() {
        Some(parts) => parts,
        None => return,
    };
    if rest.is_empty() {
        doc.insert(first.to_string(), value);
        return;
    }
    if doc.get(*first).is_none() {
        doc.insert(first.to_string(), Bson::Document(Document::new()));
    }
    if let Some(entry) = doc.get_mut(*first) {
        set_in_bson(entry, rest, value);
    }
}

fn set_in_bson(target: &mut Bson, segments: &[&str], value: Bson) {
    let (first, rest) = match segments.split_first() {
        Some(parts) => parts,
        None => {
            *target = value;
            return;
        }
    };

    match target {
        Bson::Array(arr) => {
            if let Ok(idx) = first.parse::<usize>() {
                if idx >= arr.len() {
                    arr.resize(idx + 1, Bson::Null);
                }
                if rest.is_empty() {
                    arr[idx] = value;
                } else {
                    set_in_bson(&mut arr[idx], rest, value);
                }
                return;
            }
            // Non-numeric segment against an array: replace with a document.
            *target = Bson::Document(Document::new());
            set_in_bson(target, segments, value);
        }
        Bson::Document(d) => {
            if rest.is_empty() {
                d.insert(first.to_string(), value);
                return;
            }
            if d.get(*first).is_none() {
                d.insert(first.to_string(), Bson::Document(Document::new()));
            }
            if let Some(entry) = d.get_mut(*first) {
                set_in_bson(entry, rest, value);
            }
        }
        _ => {
            *target = Bson::Document(Document::new());
            set_in_bson(target, segments, value);
        }
    }
}

/// Removes the value at `path`.
///
/// Removing a document key deletes it; removing an array index nulls the
/// slot out (matching how document stores apply `$unset` to array
/// elements). Missing intermediate paths are a no-op.
pub fn unset_path(doc: &mut Document, path: &str) {
    let segments: Vec<&str> = split(path).collect();
    let (first, rest) = match segments.split_first() {
        Some(parts) => parts,
        None => return,
    };
    if rest.is_empty() {
        doc.remove(*first);
        return;
    }
    if let Some(entry) = doc.get_mut(*first) {
        unset_in_bson(entry, rest);
    }
}

fn unset_in_bson(target: &mut Bson, segments: &[&str]) {
    let (first, rest) = match segments.split_first() {
        Some(parts) => parts,
        None => return,
    };

    match target {
        Bson::Document(d) => {
            if rest.is_empty() {
                d.remove(*first);
            } else if let Some(entry) = d.get_mut(*first) {
                unset_in_bson(entry, rest);
            }
        }
        Bson::Array(arr) => {
            if let Ok(idx) = first.parse::<usize>() {
                if let Some(slot) = arr.get_mut(idx) {
                    if rest.is_empty() {
                        *slot = Bson::Null;
                    } else {
                        unset_in_bson(slot, rest);
                    }
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{bson, doc};

    #[test]
    fn join_is_root_aware() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a.b", "c"), "a.b.c");
    }

    #[test]
    fn ancestors_are_root_most_first() {
        assert_eq!(ancestors("a.b.c"), vec!["a".to_string(), "a.b".to_string()]);
        assert!(ancestors("a").is_empty());
    }

    #[test]
    fn strict_descendant_requires_dot_boundary() {
        assert!(is_strict_descendant("a.b", "a"));
        assert!(is_strict_descendant("a.b.c", "a.b"));
        assert!(!is_strict_descendant("a", "a"));
        assert!(!is_strict_descendant("ab.c", "a"));
    }

    #[test]
    fn schema_path_replaces_indices_with_wildcard() {
        assert_eq!(to_schema_path("people.0.name"), "people.$.name");
        assert_eq!(to_schema_path("plain.path"), "plain.path");
    }

    #[test]
    fn set_path_creates_intermediates() {
        let mut doc = doc! {};
        set_path(&mut doc, "a.b.c", bson!(1));
        assert_eq!(doc, doc! { "a": { "b": { "c": 1 } } });
    }

    #[test]
    fn set_path_indexes_arrays() {
        let mut doc = doc! { "tags": ["x", "y"] };
        set_path(&mut doc, "tags.1", bson!("z"));
        assert_eq!(doc, doc! { "tags": ["x", "z"] });

        set_path(&mut doc, "tags.3", bson!("w"));
        assert_eq!(doc, doc! { "tags": ["x", "z", Bson::Null, "w"] });
    }

    #[test]
    fn unset_path_removes_leaves_and_nulls_array_slots() {
        let mut doc = doc! { "a": { "b": 1, "c": 2 }, "arr": [1, 2, 3] };
        unset_path(&mut doc, "a.b");
        unset_path(&mut doc, "arr.1");
        unset_path(&mut doc, "missing.leaf");
        assert_eq!(doc, doc! { "a": { "c": 2 }, "arr": [1, Bson::Null, 3] });
    }

    #[test]
    fn get_path_walks_documents_and_arrays() {
        let doc = doc! { "people": [{ "name": "Axl" }, { "name": "Slash" }] };
        assert_eq!(get_path(&doc, "people.1.name"), Some(&bson!("Slash")));
        assert_eq!(get_path(&doc, "people.2.name"), None);
    }
}
