//! Document casting against a compiled schema.
//!
//! [`cast`] walks actual data mirroring the shape the schema compiler
//! declared: fields with no matching schema path are silently dropped
//! (strict filtering), matched leaf fields are type-coerced in place, and
//! array/object paths recurse. Coercion failures are aggregated into one
//! [`CastError`] reporting every bad field; the walk always completes
//! before the error is returned.

use bson::{Bson, Document};
use chrono::{DateTime as ChronoDateTime, Utc};

use crate::error::CastError;
use crate::path;
use crate::schema::{PathSpec, ScalarKind, Schema};

/// Casts `value` against `schema` in place.
///
/// Returns the aggregate error if at least one field failed; callers
/// wiring cast-on-save must treat that as abort-before-persist. Top-level
/// non-document input is a hard failure keyed at the root path.
pub fn cast(value: &mut Bson, schema: &Schema) -> Result<(), CastError> {
    let mut error = CastError::new();
    match value {
        Bson::Document(doc) => visit_object(doc, schema, "", &mut error),
        other => error.mark("", format!("could not cast {other:?} to Object")),
    }
    if error.has_errors() { Err(error) } else { Ok(()) }
}

fn visit_object(doc: &mut Document, schema: &Schema, real_path: &str, error: &mut CastError) {
    let keys: Vec<String> = doc.keys().cloned().collect();
    for key in keys {
        // The identity key is never declared in a shape yet must survive.
        if real_path.is_empty() && key == "_id" {
            continue;
        }
        let child_path = path::join(real_path, &key);
        let spec = match schema.path(&path::to_schema_path(&child_path)) {
            Some(spec) => spec,
            None => {
                // Unknown fields are dropped, not an error.
                doc.remove(&key);
                continue;
            }
        };

        if spec.is_array() {
            if let Some(value) = doc.get_mut(&key) {
                visit_array(value, schema, &child_path, error);
            }
        } else if spec.is_object() {
            match doc.get_mut(&key) {
                Some(Bson::Null) | None => {
                    doc.remove(&key);
                }
                Some(Bson::Document(inner)) => visit_object(inner, schema, &child_path, error),
                Some(other) => {
                    error.mark(child_path, format!("could not cast {other:?} to Object"));
                }
            }
        } else if let Some(kind) = spec.scalar_kind() {
            if let Some(value) = doc.get_mut(&key) {
                if let Err(message) = coerce(value, kind) {
                    error.mark(child_path, message);
                }
            }
        }
        // Mixed paths and descriptors without a scalar type: structural
        // only, no coercion applied.
    }
}

fn visit_array(value: &mut Bson, schema: &Schema, real_path: &str, error: &mut CastError) {
    let wildcard = path::join(&path::to_schema_path(real_path), "$");
    let spec = match schema.path(&wildcard) {
        Some(spec) => spec,
        None => return,
    };
    // An array with no usable wildcard type passes through unmodified.
    if !spec.is_array() && !spec.is_object() && spec.scalar_kind().is_none() {
        return;
    }

    if !matches!(value, Bson::Array(_)) {
        let single = std::mem::replace(value, Bson::Null);
        *value = Bson::Array(vec![single]);
    }
    if let Bson::Array(elements) = value {
        for (index, element) in elements.iter_mut().enumerate() {
            let element_path = path::join(real_path, &index.to_string());
            if spec.is_array() {
                visit_array(element, schema, &element_path, error);
            } else if spec.is_object() {
                match element {
                    Bson::Document(inner) => visit_object(inner, schema, &element_path, error),
                    other => {
                        error.mark(element_path, format!("could not cast {other:?} to Object"));
                    }
                }
            } else if let Some(kind) = spec.scalar_kind() {
                if let Err(message) = coerce(element, kind) {
                    error.mark(element_path, message);
                }
            }
        }
    }
}

/// Coerces `value` to `kind` in place, or explains why it cannot.
fn coerce(value: &mut Bson, kind: ScalarKind) -> Result<(), String> {
    let coerced = match (kind, &*value) {
        (ScalarKind::Number, Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_)) => return Ok(()),
        (ScalarKind::Number, Bson::String(s)) => {
            if let Ok(int) = s.parse::<i64>() {
                Some(Bson::Int64(int))
            } else {
                s.parse::<f64>().ok().map(Bson::Double)
            }
        }
        (ScalarKind::Number, Bson::Boolean(b)) => Some(Bson::Int32(i32::from(*b))),

        (ScalarKind::Integer, Bson::Int32(_) | Bson::Int64(_)) => return Ok(()),
        (ScalarKind::Integer, Bson::Double(d)) if d.fract() == 0.0 => Some(Bson::Int64(*d as i64)),
        (ScalarKind::Integer, Bson::String(s)) => s.parse::<i64>().ok().map(Bson::Int64),

        (ScalarKind::String, Bson::String(_)) => return Ok(()),
        (ScalarKind::String, Bson::Int32(n)) => Some(Bson::String(n.to_string())),
        (ScalarKind::String, Bson::Int64(n)) => Some(Bson::String(n.to_string())),
        (ScalarKind::String, Bson::Double(n)) => Some(Bson::String(n.to_string())),
        (ScalarKind::String, Bson::Boolean(b)) => Some(Bson::String(b.to_string())),

        (ScalarKind::Boolean, Bson::Boolean(_)) => return Ok(()),
        (ScalarKind::Boolean, Bson::Int32(n)) => Some(Bson::Boolean(*n != 0)),
        (ScalarKind::Boolean, Bson::Int64(n)) => Some(Bson::Boolean(*n != 0)),
        (ScalarKind::Boolean, Bson::Double(n)) => Some(Bson::Boolean(*n != 0.0)),
        (ScalarKind::Boolean, Bson::String(s)) => match s.as_str() {
            "true" | "1" => Some(Bson::Boolean(true)),
            "false" | "0" => Some(Bson::Boolean(false)),
            _ => None,
        },

        (ScalarKind::DateTime, Bson::DateTime(_)) => return Ok(()),
        (ScalarKind::DateTime, Bson::String(s)) => ChronoDateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| Bson::DateTime(bson::DateTime::from_chrono(dt.with_timezone(&Utc)))),
        (ScalarKind::DateTime, Bson::Int64(millis)) => {
            Some(Bson::DateTime(bson::DateTime::from_millis(*millis)))
        }

        (ScalarKind::ObjectId, Bson::ObjectId(_)) => return Ok(()),
        (ScalarKind::ObjectId, Bson::String(s)) => {
            bson::oid::ObjectId::parse_str(s).ok().map(Bson::ObjectId)
        }

        _ => None,
    };

    match coerced {
        Some(new_value) => {
            *value = new_value;
            Ok(())
        }
        None => Err(format!("could not cast {value:?} to {kind}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{bson, doc};

    #[test]
    fn coerces_matched_fields_and_drops_unknown_ones() {
        let schema = Schema::new(doc! { "count": "number" });
        let mut value = Bson::Document(doc! { "count": "3", "extra": 1 });

        cast(&mut value, &schema).unwrap();
        assert_eq!(value, bson!({ "count": 3_i64 }));
    }

    #[test]
    fn the_identity_key_survives_strict_filtering() {
        let schema = Schema::new(doc! { "count": "number" });
        let mut value = Bson::Document(doc! { "_id": "u1", "count": 3, "extra": 1 });

        cast(&mut value, &schema).unwrap();
        assert_eq!(value, bson!({ "_id": "u1", "count": 3 }));
    }

    #[test]
    fn invalid_scalar_yields_error_at_its_path() {
        let schema = Schema::new(doc! { "count": "number" });
        let mut value = Bson::Document(doc! { "count": "abc" });

        let err = cast(&mut value, &schema).unwrap_err();
        assert!(err.error_at("count").is_some());
    }

    #[test]
    fn two_invalid_fields_aggregate_into_one_error() {
        let schema = Schema::new(doc! { "count": "number", "flag": "boolean" });
        let mut value = Bson::Document(doc! { "count": "abc", "flag": "maybe" });

        let err = cast(&mut value, &schema).unwrap_err();
        assert_eq!(err.errors().len(), 2);
        assert!(err.error_at("count").is_some());
        assert!(err.error_at("flag").is_some());
    }

    #[test]
    fn recurses_into_nested_objects() {
        let schema = Schema::new(doc! { "nested": { "a": "integer" } });
        let mut value = Bson::Document(doc! { "nested": { "a": "42", "junk": true } });

        cast(&mut value, &schema).unwrap();
        assert_eq!(value, bson!({ "nested": { "a": 42_i64 } }));
    }

    #[test]
    fn typed_array_elements_coerce_at_indexed_paths() {
        let schema = Schema::new(doc! { "nums": ["number"] });
        let mut value = Bson::Document(doc! { "nums": ["1", 2, "x"] });

        let err = cast(&mut value, &schema).unwrap_err();
        assert!(err.error_at("nums.2").is_some());
        assert_eq!(err.errors().len(), 1);
    }

    #[test]
    fn untyped_array_passes_through() {
        let schema = Schema::new(doc! { "blob": [] });
        let mut value = Bson::Document(doc! { "blob": [1, "two", { "three": 3 }] });

        cast(&mut value, &schema).unwrap();
        assert_eq!(value, bson!({ "blob": [1, "two", { "three": 3 }] }));
    }

    #[test]
    fn single_value_is_promoted_into_a_typed_array() {
        let schema = Schema::new(doc! { "nums": ["number"] });
        let mut value = Bson::Document(doc! { "nums": "5" });

        cast(&mut value, &schema).unwrap();
        assert_eq!(value, bson!({ "nums": [5_i64] }));
    }

    #[test]
    fn document_arrays_recurse_per_element() {
        let schema = Schema::new(doc! { "people": [{ "age": "integer" }] });
        let mut value = Bson::Document(doc! {
            "people": [{ "age": "30", "noise": 1 }, { "age": "x" }],
        });

        let err = cast(&mut value, &schema).unwrap_err();
        assert!(err.error_at("people.1.age").is_some());
        // The valid sibling element was still coerced and filtered.
        if let Bson::Document(doc) = &value {
            assert_eq!(
                path::get_path(doc, "people.0"),
                Some(&bson!({ "age": 30_i64 }))
            );
        } else {
            panic!("expected document");
        }
    }

    #[test]
    fn top_level_non_object_is_a_hard_failure() {
        let schema = Schema::new(doc! { "a": "number" });
        let mut value = bson!([1, 2, 3]);

        let err = cast(&mut value, &schema).unwrap_err();
        assert!(err.error_at("").is_some());
    }

    #[test]
    fn null_object_fields_are_dropped() {
        let schema = Schema::new(doc! { "nested": { "a": "number" } });
        let mut value = Bson::Document(doc! { "nested": Bson::Null });

        cast(&mut value, &schema).unwrap();
        assert_eq!(value, bson!({}));
    }

    #[test]
    fn datetime_and_objectid_coercions() {
        let schema = Schema::new(doc! { "at": "date", "ref": "objectId" });
        let oid = bson::oid::ObjectId::new();
        let mut value = Bson::Document(doc! {
            "at": "2026-01-02T03:04:05Z",
            "ref": oid.to_hex(),
        });

        cast(&mut value, &schema).unwrap();
        if let Bson::Document(doc) = &value {
            assert!(matches!(doc.get("at"), Some(Bson::DateTime(_))));
            assert_eq!(doc.get("ref"), Some(&Bson::ObjectId(oid)));
        } else {
            panic!("expected document");
        }
    }
}
