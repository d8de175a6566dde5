//! The data-store driver collaborator contract.
//!
//! The mapping layer never speaks the wire protocol itself; it hands plain
//! BSON filter/update/options values to a [`DriverCollection`] and gets
//! plain BSON documents back. Implementations live outside this crate
//! (an in-memory driver ships in `docgram-memory`).

use std::fmt::Debug;

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::error::OdmResult;

/// A handle onto one named collection of the underlying data store.
///
/// All methods are async and suspend only for the duration of the
/// underlying store operation; there is no internal parallelism and no
/// cancellation token. A caller that abandons an awaited result leaves
/// whatever the driver was asked to do potentially still in flight.
#[async_trait]
pub trait DriverCollection: Send + Sync + Debug {
    /// The collection's name.
    fn name(&self) -> &str;

    /// Inserts one document, returning the driver's acknowledgement
    /// (at minimum the inserted id).
    async fn insert(&self, doc: Document) -> OdmResult<Bson>;

    /// Applies a partial-update directive to the first matching document.
    async fn update_one(
        &self,
        filter: Document,
        update: Document,
        options: Document,
    ) -> OdmResult<Bson>;

    /// Applies a partial-update directive to every matching document.
    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: Document,
    ) -> OdmResult<Bson>;

    /// Replaces the first matching document wholesale.
    async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        options: Document,
    ) -> OdmResult<Bson>;

    /// Returns every document matching `filter`, honoring `options`
    /// (skip/limit/sort).
    async fn find(&self, filter: Document, options: Document) -> OdmResult<Vec<Document>>;

    /// Returns the first document matching `filter`, if any.
    async fn find_one(&self, filter: Document, options: Document) -> OdmResult<Option<Document>>;

    /// Counts the documents matching `filter`.
    async fn count(&self, filter: Document, options: Document) -> OdmResult<u64>;

    /// Returns the distinct values stored at `field` across the documents
    /// matching `filter`.
    async fn distinct(
        &self,
        field: &str,
        filter: Document,
        options: Document,
    ) -> OdmResult<Vec<Bson>>;

    /// Deletes the first matching document, returning the deleted count.
    async fn delete_one(&self, filter: Document, options: Document) -> OdmResult<u64>;

    /// Deletes every matching document, returning the deleted count.
    async fn delete_many(&self, filter: Document, options: Document) -> OdmResult<u64>;
}
