//! Query construction and deferred execution.
//!
//! A [`Query`] accumulates filter/update/options clauses across chained
//! calls without touching the network; execution happens exactly once, at
//! terminal consumption, dispatched through the middleware hook named
//! after the recorded operation. Each chained call performs a shallow
//! merge of its argument into the accumulated record: later values for
//! the same key overwrite earlier ones, never a deep merge.

use std::sync::Arc;

use bson::{doc, Bson, Document};
use tracing::debug;

use crate::document::TrackedDocument;
use crate::driver::DriverCollection;
use crate::error::{OdmError, OdmResult};
use crate::middleware::Terminal;
use crate::schema::Schema;

/// The operation a query dispatches. Doubles as its middleware hook name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    Find,
    FindOne,
    Count,
    Distinct,
    DeleteOne,
    DeleteMany,
    UpdateOne,
    UpdateMany,
    ReplaceOne,
}

impl QueryOp {
    /// The middleware hook fired when this operation dispatches.
    pub fn hook(self) -> &'static str {
        match self {
            QueryOp::Find => "find",
            QueryOp::FindOne => "find_one",
            QueryOp::Count => "count",
            QueryOp::Distinct => "distinct",
            QueryOp::DeleteOne => "delete_one",
            QueryOp::DeleteMany => "delete_many",
            QueryOp::UpdateOne => "update_one",
            QueryOp::UpdateMany => "update_many",
            QueryOp::ReplaceOne => "replace_one",
        }
    }
}

/// A deferred query against one collection.
///
/// States: *building* (chained calls accumulate) then *dispatched* (after
/// the one allowed execution). Re-dispatching is rejected with
/// [`OdmError::Usage`].
#[derive(Debug)]
pub struct Query {
    collection: Arc<dyn DriverCollection>,
    schema: Arc<Schema>,
    filter: Document,
    update: Document,
    options: Document,
    field_name: Option<String>,
    op: Option<QueryOp>,
    dispatched: bool,
}

impl Query {
    /// Creates a query in the building state, bound to a collection and
    /// the schema whose middleware wraps its execution.
    pub fn new(collection: Arc<dyn DriverCollection>, schema: Arc<Schema>) -> Self {
        Self {
            collection,
            schema,
            filter: Document::new(),
            update: Document::new(),
            options: Document::new(),
            field_name: None,
            op: None,
            dispatched: false,
        }
    }

    /// Records a `find` operation, merging `filter`.
    pub fn find(mut self, filter: Document) -> Self {
        self.op = Some(QueryOp::Find);
        shallow_merge(&mut self.filter, filter);
        self
    }

    /// Records a `find_one` operation, merging `filter`.
    pub fn find_one(mut self, filter: Document) -> Self {
        self.op = Some(QueryOp::FindOne);
        shallow_merge(&mut self.filter, filter);
        self
    }

    /// Records a `count` operation, merging `filter`.
    pub fn count(mut self, filter: Document) -> Self {
        self.op = Some(QueryOp::Count);
        shallow_merge(&mut self.filter, filter);
        self
    }

    /// Records a `distinct` operation over `field`, merging `filter`.
    pub fn distinct(mut self, field: impl Into<String>, filter: Document) -> Self {
        self.op = Some(QueryOp::Distinct);
        self.field_name = Some(field.into());
        shallow_merge(&mut self.filter, filter);
        self
    }

    /// Records a `delete_one` operation, merging `filter`.
    pub fn delete_one(mut self, filter: Document) -> Self {
        self.op = Some(QueryOp::DeleteOne);
        shallow_merge(&mut self.filter, filter);
        self
    }

    /// Records a `delete_many` operation, merging `filter`.
    pub fn delete_many(mut self, filter: Document) -> Self {
        self.op = Some(QueryOp::DeleteMany);
        shallow_merge(&mut self.filter, filter);
        self
    }

    /// Records an `update_one` operation, merging `filter` and `update`.
    pub fn update_one(mut self, filter: Document, update: Document) -> Self {
        self.op = Some(QueryOp::UpdateOne);
        shallow_merge(&mut self.filter, filter);
        shallow_merge(&mut self.update, update);
        self
    }

    /// Records an `update_many` operation, merging `filter` and `update`.
    pub fn update_many(mut self, filter: Document, update: Document) -> Self {
        self.op = Some(QueryOp::UpdateMany);
        shallow_merge(&mut self.filter, filter);
        shallow_merge(&mut self.update, update);
        self
    }

    /// Records a `replace_one` operation, merging `filter` and the
    /// replacement document.
    pub fn replace_one(mut self, filter: Document, replacement: Document) -> Self {
        self.op = Some(QueryOp::ReplaceOne);
        shallow_merge(&mut self.filter, filter);
        shallow_merge(&mut self.update, replacement);
        self
    }

    /// Merges `options` into the accumulated options record.
    pub fn options(mut self, options: Document) -> Self {
        shallow_merge(&mut self.options, options);
        self
    }

    /// Sets the number of documents to skip.
    pub fn skip(self, n: i64) -> Self {
        self.options(doc! { "skip": n })
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(self, n: i64) -> Self {
        self.options(doc! { "limit": n })
    }

    /// Sets the sort specification (`{ field: 1 | -1 }`).
    pub fn sort(self, sort: Document) -> Self {
        self.options(doc! { "sort": sort })
    }

    /// Sets the projection specification.
    pub fn projection(self, projection: Document) -> Self {
        self.options(doc! { "projection": projection })
    }

    /// The accumulated filter record.
    pub fn filter_doc(&self) -> &Document {
        &self.filter
    }

    /// The accumulated options record.
    pub fn options_doc(&self) -> &Document {
        &self.options
    }

    /// The recorded operation, if one was chained yet.
    pub fn op(&self) -> Option<QueryOp> {
        self.op
    }

    /// Dispatches the query exactly once through the middleware hook named
    /// after the recorded operation.
    ///
    /// The hook payload is `{ filter, update, options }` (plus `field` for
    /// `distinct`); interceptors may rewrite it before the driver sees it.
    /// Calling `exec` a second time is a usage error.
    pub async fn exec(&mut self) -> OdmResult<Bson> {
        if self.dispatched {
            return Err(OdmError::Usage("query already dispatched".into()));
        }
        let op = self
            .op
            .ok_or_else(|| OdmError::Usage("no operation recorded on this query".into()))?;
        self.dispatched = true;

        debug!(
            op = op.hook(),
            collection = self.collection.name(),
            "dispatching query"
        );

        let mut payload = doc! {
            "filter": self.filter.clone(),
            "update": self.update.clone(),
            "options": self.options.clone(),
        };
        if let Some(field) = &self.field_name {
            payload.insert("field", field.clone());
        }

        let collection = Arc::clone(&self.collection);
        let terminal: Terminal = Box::new(move |ctx| {
            Box::pin(async move {
                let mut state = match ctx.payload {
                    Bson::Document(doc) => doc,
                    other => {
                        return Err(OdmError::Usage(format!(
                            "query payload must be a document, got {other:?}"
                        )));
                    }
                };
                let filter = take_document(&mut state, "filter");
                let update = take_document(&mut state, "update");
                let options = take_document(&mut state, "options");

                match op {
                    QueryOp::Find => collection.find(filter, options).await.map(|docs| {
                        Bson::Array(docs.into_iter().map(Bson::Document).collect())
                    }),
                    QueryOp::FindOne => collection
                        .find_one(filter, options)
                        .await
                        .map(|found| found.map(Bson::Document).unwrap_or(Bson::Null)),
                    QueryOp::Count => collection
                        .count(filter, options)
                        .await
                        .map(|n| Bson::Int64(n as i64)),
                    QueryOp::Distinct => {
                        let field = state.get("field").and_then(Bson::as_str).ok_or_else(|| {
                            OdmError::Usage("distinct requires a field name".into())
                        })?;
                        collection
                            .distinct(field, filter, options)
                            .await
                            .map(Bson::Array)
                    }
                    QueryOp::DeleteOne => collection
                        .delete_one(filter, options)
                        .await
                        .map(|n| Bson::Int64(n as i64)),
                    QueryOp::DeleteMany => collection
                        .delete_many(filter, options)
                        .await
                        .map(|n| Bson::Int64(n as i64)),
                    QueryOp::UpdateOne => collection.update_one(filter, update, options).await,
                    QueryOp::UpdateMany => collection.update_many(filter, update, options).await,
                    QueryOp::ReplaceOne => collection.replace_one(filter, update, options).await,
                }
            })
        });

        self.schema
            .middleware_registry()
            .dispatch(op.hook(), Bson::Document(payload), terminal)
            .await
    }

    /// Dispatches and re-wraps the resulting documents as not-new tracked
    /// documents. Intended for `find`.
    pub async fn documents(mut self) -> OdmResult<Vec<TrackedDocument>> {
        match self.exec().await? {
            Bson::Array(items) => Ok(items
                .into_iter()
                .filter_map(|item| match item {
                    Bson::Document(doc) => Some(TrackedDocument::new(doc, false)),
                    _ => None,
                })
                .collect()),
            other => Err(OdmError::Usage(format!(
                "operation did not return a document list: {other:?}"
            ))),
        }
    }

    /// Dispatches and re-wraps the single resulting document, if any.
    /// Intended for `find_one`.
    pub async fn document(mut self) -> OdmResult<Option<TrackedDocument>> {
        match self.exec().await? {
            Bson::Document(doc) => Ok(Some(TrackedDocument::new(doc, false))),
            Bson::Null => Ok(None),
            other => Err(OdmError::Usage(format!(
                "operation did not return a document: {other:?}"
            ))),
        }
    }
}

/// Shallow merge: later keys win, no deep merge.
pub(crate) fn shallow_merge(dest: &mut Document, src: Document) {
    for (key, value) in src {
        dest.insert(key, value);
    }
}

fn take_document(state: &mut Document, key: &str) -> Document {
    match state.remove(key) {
        Some(Bson::Document(doc)) => doc,
        _ => Document::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bson::bson;
    use std::sync::Mutex;

    /// Records what the driver was asked to do.
    #[derive(Debug, Default)]
    struct StubCollection {
        calls: Mutex<Vec<(String, Document, Document)>>,
    }

    impl StubCollection {
        fn log(&self, op: &str, filter: &Document, extra: &Document) {
            self.calls
                .lock()
                .unwrap()
                .push((op.to_string(), filter.clone(), extra.clone()));
        }
    }

    #[async_trait]
    impl DriverCollection for StubCollection {
        fn name(&self) -> &str {
            "stub"
        }

        async fn insert(&self, doc: Document) -> OdmResult<Bson> {
            self.log("insert", &doc, &Document::new());
            Ok(bson!({ "insertedId": "stub" }))
        }

        async fn update_one(
            &self,
            filter: Document,
            update: Document,
            _options: Document,
        ) -> OdmResult<Bson> {
            self.log("update_one", &filter, &update);
            Ok(bson!({ "matchedCount": 1_i64 }))
        }

        async fn update_many(
            &self,
            filter: Document,
            update: Document,
            _options: Document,
        ) -> OdmResult<Bson> {
            self.log("update_many", &filter, &update);
            Ok(bson!({ "matchedCount": 0_i64 }))
        }

        async fn replace_one(
            &self,
            filter: Document,
            replacement: Document,
            _options: Document,
        ) -> OdmResult<Bson> {
            self.log("replace_one", &filter, &replacement);
            Ok(bson!({ "matchedCount": 0_i64 }))
        }

        async fn find(&self, filter: Document, options: Document) -> OdmResult<Vec<Document>> {
            self.log("find", &filter, &options);
            Ok(vec![doc! { "_id": 1, "name": "Axl" }])
        }

        async fn find_one(
            &self,
            filter: Document,
            options: Document,
        ) -> OdmResult<Option<Document>> {
            self.log("find_one", &filter, &options);
            Ok(None)
        }

        async fn count(&self, filter: Document, options: Document) -> OdmResult<u64> {
            self.log("count", &filter, &options);
            Ok(3)
        }

        async fn distinct(
            &self,
            field: &str,
            filter: Document,
            _options: Document,
        ) -> OdmResult<Vec<Bson>> {
            self.log("distinct", &filter, &doc! { "field": field });
            Ok(vec![bson!("a"), bson!("b")])
        }

        async fn delete_one(&self, filter: Document, options: Document) -> OdmResult<u64> {
            self.log("delete_one", &filter, &options);
            Ok(1)
        }

        async fn delete_many(&self, filter: Document, options: Document) -> OdmResult<u64> {
            self.log("delete_many", &filter, &options);
            Ok(2)
        }
    }

    fn query_with_stub() -> (Arc<StubCollection>, Query) {
        let collection = Arc::new(StubCollection::default());
        let schema = Arc::new(Schema::untyped());
        let query = Query::new(Arc::clone(&collection) as Arc<dyn DriverCollection>, schema);
        (collection, query)
    }

    #[tokio::test]
    async fn chained_calls_shallow_merge_later_keys_win() {
        let (_collection, query) = query_with_stub();
        let query = query
            .find(doc! { "a": 1, "b": 1 })
            .find(doc! { "b": 2 })
            .skip(5)
            .skip(10);

        assert_eq!(query.filter_doc(), &doc! { "a": 1, "b": 2 });
        assert_eq!(query.options_doc(), &doc! { "skip": 10_i64 });
    }

    #[tokio::test]
    async fn find_dispatches_and_rewraps_documents() {
        let (collection, query) = query_with_stub();
        let docs = query.find(doc! { "name": "Axl" }).documents().await.unwrap();

        assert_eq!(docs.len(), 1);
        assert!(!docs[0].is_new());
        assert!(docs[0].delta().is_empty());
        assert_eq!(collection.calls.lock().unwrap()[0].0, "find");
    }

    #[tokio::test]
    async fn redispatch_is_a_usage_error() {
        let (_collection, query) = query_with_stub();
        let mut query = query.count(doc! {});

        assert_eq!(query.exec().await.unwrap(), Bson::Int64(3));
        let err = query.exec().await.unwrap_err();
        assert!(matches!(err, OdmError::Usage(_)));
    }

    #[tokio::test]
    async fn exec_without_operation_is_a_usage_error() {
        let (_collection, mut query) = query_with_stub();
        let err = query.exec().await.unwrap_err();
        assert!(matches!(err, OdmError::Usage(_)));
    }

    #[tokio::test]
    async fn distinct_forwards_its_field_name() {
        let (collection, query) = query_with_stub();
        let values = query
            .distinct("name", doc! {})
            .exec()
            .await
            .unwrap();

        assert_eq!(values, bson!(["a", "b"]));
        let calls = collection.calls.lock().unwrap();
        assert_eq!(calls[0].2, doc! { "field": "name" });
    }

    #[tokio::test]
    async fn middleware_wraps_query_dispatch() {
        let collection = Arc::new(StubCollection::default());
        let mut schema = Schema::untyped();
        schema.middleware("find", |mut ctx, next| {
            Box::pin(async move {
                // Force an extra filter clause before the driver runs.
                if let Bson::Document(ref mut state) = ctx.payload {
                    if let Some(Bson::Document(filter)) = state.get_mut("filter") {
                        filter.insert("injected", true);
                    }
                }
                next.run(ctx).await
            })
        });

        let query = Query::new(
            Arc::clone(&collection) as Arc<dyn DriverCollection>,
            Arc::new(schema),
        );
        query.find(doc! { "a": 1 }).documents().await.unwrap();

        let calls = collection.calls.lock().unwrap();
        assert_eq!(calls[0].1, doc! { "a": 1, "injected": true });
    }

    #[tokio::test]
    async fn short_circuiting_middleware_skips_the_driver() {
        let collection = Arc::new(StubCollection::default());
        let mut schema = Schema::untyped();
        schema.middleware("count", |_ctx, _next| {
            Box::pin(async { Ok(Bson::Int64(0)) })
        });

        let mut query = Query::new(
            Arc::clone(&collection) as Arc<dyn DriverCollection>,
            Arc::new(schema),
        )
        .count(doc! {});

        assert_eq!(query.exec().await.unwrap(), Bson::Int64(0));
        assert!(collection.calls.lock().unwrap().is_empty());
    }
}
