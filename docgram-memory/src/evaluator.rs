//! Filter evaluation for in-memory document matching.
//!
//! This module matches BSON documents against filter records and provides
//! the value comparison used for sorting. Filters address fields by
//! dot-separated path; a value that is itself a document of `$`-prefixed
//! keys is interpreted as an operator record.

use std::cmp::Ordering;
use std::collections::HashMap;

use bson::{datetime::DateTime, oid::ObjectId, Bson, Document};
use docgram_core::path;

/// Type-erased, comparable representation of BSON values.
///
/// Normalizes numeric types to f64 so mixed Int32/Int64/Double fields
/// compare as a single numeric line.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    ObjectId(&'a ObjectId),
    String(&'a str),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::ObjectId(value) => Comparable::ObjectId(value),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            _ => Comparable::Null, // Other types are not comparable
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => {
                a.bytes().partial_cmp(&b.bytes())
            }
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// True when `doc` satisfies every clause of `filter`.
///
/// Clauses are conjunctive. A clause whose value is an operator record
/// (`{ "$gt": 3 }`) applies each operator; any other value means equality.
/// Equality against an array field also matches element-wise, and a `null`
/// expectation matches a missing field.
pub(crate) fn matches(doc: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(field, expected)| clause_matches(doc, field, expected))
}

fn clause_matches(doc: &Document, field: &str, expected: &Bson) -> bool {
    let actual = path::get_path(doc, field);

    if let Bson::Document(ops) = expected {
        if !ops.is_empty() && ops.keys().all(|key| key.starts_with('$')) {
            return ops.iter().all(|(op, operand)| apply_op(actual, op, operand));
        }
    }

    match actual {
        Some(value) => equals(value, expected),
        None => matches!(expected, Bson::Null),
    }
}

fn apply_op(actual: Option<&Bson>, op: &str, operand: &Bson) -> bool {
    match op {
        "$exists" => {
            let should_exist = operand.as_bool().unwrap_or(false);
            actual.is_some() == should_exist
        }
        "$eq" => actual.map(|value| equals(value, operand)).unwrap_or(false),
        "$ne" => !actual.map(|value| equals(value, operand)).unwrap_or(false),
        "$in" => match (actual, operand) {
            (Some(value), Bson::Array(candidates)) => {
                candidates.iter().any(|candidate| equals(value, candidate))
            }
            _ => false,
        },
        "$nin" => match (actual, operand) {
            (Some(value), Bson::Array(candidates)) => {
                !candidates.iter().any(|candidate| equals(value, candidate))
            }
            (None, Bson::Array(_)) => true,
            _ => false,
        },
        "$gt" | "$gte" | "$lt" | "$lte" => {
            let Some(value) = actual else { return false };
            match Comparable::from(value).partial_cmp(&Comparable::from(operand)) {
                Some(ordering) => match op {
                    "$gt" => ordering == Ordering::Greater,
                    "$gte" => ordering != Ordering::Less,
                    "$lt" => ordering == Ordering::Less,
                    "$lte" => ordering != Ordering::Greater,
                    _ => unreachable!(),
                },
                None => false,
            }
        }
        _ => false,
    }
}

fn equals(actual: &Bson, expected: &Bson) -> bool {
    if Comparable::from(actual) == Comparable::from(expected) {
        return true;
    }
    // Array fields also match on any element, as document stores do.
    if let (Bson::Array(items), expected) = (actual, expected) {
        if !matches!(expected, Bson::Array(_)) {
            return items.iter().any(|item| {
                Comparable::from(item) == Comparable::from(expected)
            });
        }
    }
    false
}

/// Compares two optional field values for sorting. Missing fields sort
/// before present ones; incomparable pairs are treated as equal.
pub(crate) fn compare_values(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => Comparable::from(a)
            .partial_cmp(&Comparable::from(b))
            .unwrap_or(Ordering::Equal),
    }
}
