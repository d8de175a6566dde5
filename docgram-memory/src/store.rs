//! In-memory driver collection.
//!
//! This module provides a simple but complete in-memory backend that
//! stores documents in a BTreeMap behind an async-safe read-write lock.
//! Documents are keyed by the rendered form of their `_id`, so iteration
//! (and therefore `find_one` without a sort) is deterministic.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use mea::rwlock::RwLock;

use docgram_core::driver::DriverCollection;
use docgram_core::error::{OdmError, OdmResult};
use docgram_core::path;

use crate::evaluator::{compare_values, matches};

/// Thread-safe in-memory collection.
///
/// Implements [`DriverCollection`] entirely in memory. The handle is
/// cloneable; clones share the same underlying data.
///
/// Queries scan every document in the collection (no indexing), which is
/// fine for tests and small datasets.
///
/// # Example
///
/// ```ignore
/// use docgram_memory::MemoryCollection;
/// use bson::doc;
///
/// let users = MemoryCollection::new("users");
/// users.insert(doc! { "name": "Alice", "age": 30 }).await?;
/// let found = users.find_one(doc! { "age": { "$gte": 21 } }, doc! {}).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryCollection {
    name: String,
    documents: Arc<RwLock<BTreeMap<String, Document>>>,
}

impl MemoryCollection {
    /// Creates a new empty collection.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// The number of stored documents, ignoring any filter.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Removes every document.
    pub async fn clear(&self) {
        self.documents.write().await.clear();
    }

    fn id_key(id: &Bson) -> String {
        match id {
            Bson::ObjectId(oid) => oid.to_hex(),
            Bson::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn apply_update(doc: &mut Document, update: &Document) -> OdmResult<()> {
        // Validate the whole directive before touching the document, so a
        // bad operator never leaves a partial write behind.
        for (operator, spec) in update {
            if !matches!(operator.as_str(), "$set" | "$unset") {
                return Err(OdmError::Driver(format!(
                    "unsupported update operator `{operator}`"
                )));
            }
            if !matches!(spec, Bson::Document(_)) {
                return Err(OdmError::Driver(format!(
                    "update operator `{operator}` wants a document, got {spec:?}"
                )));
            }
        }
        for (operator, spec) in update {
            let spec = match spec {
                Bson::Document(spec) => spec,
                _ => continue,
            };
            match operator.as_str() {
                "$set" => {
                    for (field, value) in spec {
                        path::set_path(doc, field, value.clone());
                    }
                }
                "$unset" => {
                    for field in spec.keys() {
                        path::unset_path(doc, field);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn sorted_matches(
        documents: &BTreeMap<String, Document>,
        filter: &Document,
        options: &Document,
    ) -> Vec<Document> {
        let mut found: Vec<Document> = documents
            .values()
            .filter(|doc| matches(doc, filter))
            .cloned()
            .collect();

        if let Some(Bson::Document(sort)) = options.get("sort") {
            found.sort_by(|a, b| {
                for (field, direction) in sort {
                    let ordering =
                        compare_values(path::get_path(a, field), path::get_path(b, field));
                    let ordering = if descending(direction) {
                        ordering.reverse()
                    } else {
                        ordering
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let skip = options
            .get("skip")
            .and_then(as_index)
            .unwrap_or(0);
        let limit = options
            .get("limit")
            .and_then(as_index)
            .unwrap_or(usize::MAX);

        let mut found: Vec<Document> =
            found.into_iter().skip(skip).take(limit).collect();

        if let Some(Bson::Document(projection)) = options.get("projection") {
            if !projection.is_empty() {
                for doc in &mut found {
                    project(doc, projection);
                }
            }
        }

        found
    }
}

/// Applies a flat inclusion or exclusion projection. Inclusion keeps the
/// named top-level fields plus `_id` unless `_id: 0` says otherwise.
fn project(doc: &mut Document, projection: &Document) {
    let inclusive = projection
        .iter()
        .any(|(field, value)| field != "_id" && truthy(value));

    if inclusive {
        let drop: Vec<String> = doc
            .keys()
            .filter(|key| {
                if *key == "_id" {
                    !projection.get("_id").map(truthy).unwrap_or(true)
                } else {
                    !projection.get(key.as_str()).map(truthy).unwrap_or(false)
                }
            })
            .cloned()
            .collect();
        for key in drop {
            doc.remove(&key);
        }
    } else {
        for (field, value) in projection {
            if !truthy(value) {
                doc.remove(field);
            }
        }
    }
}

fn descending(direction: &Bson) -> bool {
    match direction {
        Bson::Int32(n) => *n < 0,
        Bson::Int64(n) => *n < 0,
        Bson::Double(n) => *n < 0.0,
        _ => false,
    }
}

fn as_index(value: &Bson) -> Option<usize> {
    match value {
        Bson::Int32(n) => Some((*n).max(0) as usize),
        Bson::Int64(n) => Some((*n).max(0) as usize),
        Bson::Double(n) if *n >= 0.0 => Some(*n as usize),
        _ => None,
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        Bson::Boolean(b) => *b,
        _ => false,
    }
}

#[async_trait]
impl DriverCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert(&self, mut doc: Document) -> OdmResult<Bson> {
        if !doc.contains_key("_id") {
            doc.insert("_id", ObjectId::new());
        }
        let id = doc.get("_id").cloned().unwrap_or(Bson::Null);
        let key = Self::id_key(&id);

        let mut documents = self.documents.write().await;
        if documents.contains_key(&key) {
            return Err(OdmError::Driver(format!(
                "duplicate _id {id} in collection `{}`",
                self.name
            )));
        }
        documents.insert(key, doc);

        Ok(Bson::Document(doc! { "insertedId": id }))
    }

    async fn update_one(
        &self,
        filter: Document,
        update: Document,
        _options: Document,
    ) -> OdmResult<Bson> {
        let mut documents = self.documents.write().await;
        for doc in documents.values_mut() {
            if matches(doc, &filter) {
                Self::apply_update(doc, &update)?;
                return Ok(Bson::Document(
                    doc! { "matchedCount": 1_i64, "modifiedCount": 1_i64 },
                ));
            }
        }
        Ok(Bson::Document(
            doc! { "matchedCount": 0_i64, "modifiedCount": 0_i64 },
        ))
    }

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        _options: Document,
    ) -> OdmResult<Bson> {
        let mut documents = self.documents.write().await;
        let mut matched = 0_i64;
        for doc in documents.values_mut() {
            if matches(doc, &filter) {
                Self::apply_update(doc, &update)?;
                matched += 1;
            }
        }
        Ok(Bson::Document(
            doc! { "matchedCount": matched, "modifiedCount": matched },
        ))
    }

    async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        _options: Document,
    ) -> OdmResult<Bson> {
        let mut documents = self.documents.write().await;
        for doc in documents.values_mut() {
            if matches(doc, &filter) {
                let id = doc.get("_id").cloned();
                *doc = replacement;
                // The stored identity survives replacement.
                if let Some(id) = id {
                    doc.insert("_id", id);
                }
                return Ok(Bson::Document(
                    doc! { "matchedCount": 1_i64, "modifiedCount": 1_i64 },
                ));
            }
        }
        Ok(Bson::Document(
            doc! { "matchedCount": 0_i64, "modifiedCount": 0_i64 },
        ))
    }

    async fn find(&self, filter: Document, options: Document) -> OdmResult<Vec<Document>> {
        let documents = self.documents.read().await;
        Ok(Self::sorted_matches(&documents, &filter, &options))
    }

    async fn find_one(
        &self,
        filter: Document,
        mut options: Document,
    ) -> OdmResult<Option<Document>> {
        options.insert("limit", 1_i64);
        let documents = self.documents.read().await;
        Ok(Self::sorted_matches(&documents, &filter, &options)
            .into_iter()
            .next())
    }

    async fn count(&self, filter: Document, _options: Document) -> OdmResult<u64> {
        let documents = self.documents.read().await;
        Ok(documents.values().filter(|doc| matches(doc, &filter)).count() as u64)
    }

    async fn distinct(
        &self,
        field: &str,
        filter: Document,
        _options: Document,
    ) -> OdmResult<Vec<Bson>> {
        let documents = self.documents.read().await;
        let mut values: Vec<Bson> = Vec::new();
        for doc in documents.values() {
            if !matches(doc, &filter) {
                continue;
            }
            match path::get_path(doc, field) {
                // Array fields contribute their elements, not the array.
                Some(Bson::Array(items)) => {
                    for item in items {
                        if !values.contains(item) {
                            values.push(item.clone());
                        }
                    }
                }
                Some(value) => {
                    if !values.contains(value) {
                        values.push(value.clone());
                    }
                }
                None => {}
            }
        }
        Ok(values)
    }

    async fn delete_one(&self, filter: Document, _options: Document) -> OdmResult<u64> {
        let mut documents = self.documents.write().await;
        let key = documents
            .iter()
            .find(|(_, doc)| matches(doc, &filter))
            .map(|(key, _)| key.clone());
        match key {
            Some(key) => {
                documents.remove(&key);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_many(&self, filter: Document, _options: Document) -> OdmResult<u64> {
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|_, doc| !matches(doc, &filter));
        Ok((before - documents.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> MemoryCollection {
        let users = MemoryCollection::new("users");
        users
            .insert(doc! { "_id": "a", "name": "Axl", "age": 30, "tags": ["red"] })
            .await
            .unwrap();
        users
            .insert(doc! { "_id": "b", "name": "Slash", "age": 25, "tags": ["red", "blue"] })
            .await
            .unwrap();
        users
            .insert(doc! { "_id": "c", "name": "Duff", "age": 35 })
            .await
            .unwrap();
        users
    }

    #[tokio::test]
    async fn insert_assigns_an_object_id_when_missing() {
        let users = MemoryCollection::new("users");
        let result = users.insert(doc! { "name": "Izzy" }).await.unwrap();

        let inserted_id = result
            .as_document()
            .and_then(|doc| doc.get("insertedId"))
            .cloned()
            .unwrap();
        assert!(matches!(inserted_id, Bson::ObjectId(_)));

        let found = users.find_one(doc! { "name": "Izzy" }, doc! {}).await.unwrap();
        assert_eq!(found.unwrap().get("_id"), Some(&inserted_id));
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let users = MemoryCollection::new("users");
        users.insert(doc! { "_id": "a" }).await.unwrap();
        let err = users.insert(doc! { "_id": "a" }).await.unwrap_err();
        assert!(matches!(err, OdmError::Driver(_)));
    }

    #[tokio::test]
    async fn find_honors_sort_skip_and_limit() {
        let users = seeded().await;
        let found = users
            .find(
                doc! {},
                doc! { "sort": { "age": -1 }, "skip": 1_i64, "limit": 1_i64 },
            )
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_str("name").unwrap(), "Axl");
    }

    #[tokio::test]
    async fn projection_keeps_named_fields_and_id() {
        let users = seeded().await;
        let found = users
            .find(doc! { "_id": "a" }, doc! { "projection": { "name": 1 } })
            .await
            .unwrap();

        assert_eq!(found[0], doc! { "_id": "a", "name": "Axl" });
    }

    #[tokio::test]
    async fn update_one_applies_set_and_unset_paths() {
        let users = seeded().await;
        let result = users
            .update_one(
                doc! { "_id": "a" },
                doc! { "$set": { "nested.x": 1 }, "$unset": { "age": "" } },
                doc! {},
            )
            .await
            .unwrap();

        assert_eq!(
            result.as_document().unwrap().get_i64("matchedCount").unwrap(),
            1
        );
        let updated = users.find_one(doc! { "_id": "a" }, doc! {}).await.unwrap().unwrap();
        assert_eq!(updated.get_document("nested").unwrap(), &doc! { "x": 1 });
        assert!(!updated.contains_key("age"));
    }

    #[tokio::test]
    async fn unknown_update_operator_is_a_driver_error() {
        let users = seeded().await;
        let err = users
            .update_one(doc! { "_id": "a" }, doc! { "$inc": { "age": 1 } }, doc! {})
            .await
            .unwrap_err();
        assert!(matches!(err, OdmError::Driver(_)));
    }

    #[tokio::test]
    async fn rejected_update_leaves_the_document_untouched() {
        let users = seeded().await;
        let err = users
            .update_one(
                doc! { "_id": "a" },
                doc! { "$set": { "age": 99 }, "$inc": { "age": 1 } },
                doc! {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OdmError::Driver(_)));

        let stored = users
            .find_one(doc! { "_id": "a" }, doc! {})
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.get("age"), Some(&Bson::Int32(30)));
    }

    #[tokio::test]
    async fn replace_one_preserves_the_stored_id() {
        let users = seeded().await;
        users
            .replace_one(doc! { "_id": "a" }, doc! { "name": "Axl 2" }, doc! {})
            .await
            .unwrap();

        let replaced = users.find_one(doc! { "_id": "a" }, doc! {}).await.unwrap().unwrap();
        assert_eq!(replaced, doc! { "name": "Axl 2", "_id": "a" });
    }

    #[tokio::test]
    async fn distinct_flattens_array_fields() {
        let users = seeded().await;
        let mut tags = users.distinct("tags", doc! {}, doc! {}).await.unwrap();
        tags.sort_by_key(|tag| tag.as_str().unwrap_or_default().to_string());

        assert_eq!(tags, vec![Bson::from("blue"), Bson::from("red")]);
    }

    #[tokio::test]
    async fn delete_many_removes_every_match() {
        let users = seeded().await;
        let removed = users
            .delete_many(doc! { "age": { "$gte": 30 } }, doc! {})
            .await
            .unwrap();

        assert_eq!(removed, 2);
        assert_eq!(users.len().await, 1);
    }
}
