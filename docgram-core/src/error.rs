//! Error types and result types for mapping-layer operations.
//!
//! This module provides the error taxonomy for the whole crate. Use
//! [`OdmResult<T>`] as the return type for fallible operations.

use std::collections::BTreeMap;
use std::fmt;

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Aggregate casting failure.
///
/// Collects one entry per failing path during a single casting pass. The
/// caster never aborts mid-walk, so a `CastError` always reports every
/// invalid field of a document, not just the first one it encountered.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CastError {
    errors: BTreeMap<String, String>,
}

impl CastError {
    /// Creates an empty aggregate with no recorded failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure for `path`. A later failure for the same path
    /// overwrites the earlier one.
    pub fn mark(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.insert(path.into(), message.into());
    }

    /// Absorbs all failures recorded in `other`.
    pub fn merge(&mut self, other: CastError) {
        self.errors.extend(other.errors);
    }

    /// Returns `true` if at least one path failed.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// The failing paths and their messages, ordered by path.
    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    /// Returns the message recorded for `path`, if any.
    pub fn error_at(&self, path: &str) -> Option<&str> {
        self.errors.get(path).map(String::as_str)
    }
}

impl fmt::Display for CastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cast failed for {} path(s):", self.errors.len())?;
        for (path, message) in &self.errors {
            write!(f, " [{path}: {message}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for CastError {}

/// Represents all possible errors that can occur in the mapping layer.
///
/// This enum covers casting failures, API misuse, serialization errors and
/// errors surfaced by the underlying data-store driver. Errors raised inside
/// a middleware interceptor or terminal propagate through the chain as-is;
/// nothing in this crate wraps or swallows them.
#[derive(Error, Debug)]
pub enum OdmError {
    /// One or more fields of a document failed type coercion. Carries the
    /// full aggregate so callers can report every bad field at once.
    #[error("Cast error: {0}")]
    Cast(#[from] CastError),
    /// The API was used out of contract (e.g. re-dispatching a query builder
    /// that has already executed, or invoking an unregistered method).
    #[error("Usage error: {0}")]
    Usage(String),
    /// An error surfaced by the underlying data-store driver.
    #[error("Driver error: {0}")]
    Driver(String),
    /// Serialization/deserialization error when converting between document
    /// formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A specialized `Result` type for mapping-layer operations.
pub type OdmResult<T> = Result<T, OdmError>;

impl From<BsonError> for OdmError {
    fn from(err: BsonError) -> Self {
        OdmError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for OdmError {
    fn from(err: SerdeJsonError) -> Self {
        OdmError::Serialization(err.to_string())
    }
}
