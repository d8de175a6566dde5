//! The model: the collection-facing entry point.
//!
//! A [`Model`] binds a driver collection to a [`Schema`] and exposes
//! document construction, persistence, query constructors, and schema
//! method invocation. Persistence routes every write through the `save`
//! middleware hook; queries route through the hook named after their
//! operation.

use std::sync::Arc;

use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use tracing::debug;

use crate::cast::cast;
use crate::document::TrackedDocument;
use crate::driver::DriverCollection;
use crate::error::{OdmError, OdmResult};
use crate::middleware::{HookContext, Terminal};
use crate::query::Query;
use crate::schema::{MethodTarget, Schema};

/// A collection handle with schema-aware persistence.
#[derive(Debug, Clone)]
pub struct Model {
    collection: Arc<dyn DriverCollection>,
    schema: Arc<Schema>,
}

impl Model {
    pub fn new(collection: Arc<dyn DriverCollection>, schema: Arc<Schema>) -> Self {
        Self { collection, schema }
    }

    /// The schema this model validates against.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The underlying driver collection.
    pub fn collection(&self) -> &Arc<dyn DriverCollection> {
        &self.collection
    }

    /// Wraps `doc` as a new tracked document. An `_id` is assigned
    /// client-side when absent so the save/update round trip has a stable
    /// identity from the start.
    pub fn create(&self, mut doc: Document) -> TrackedDocument {
        if !doc.contains_key("_id") {
            doc.insert("_id", ObjectId::new());
        }
        TrackedDocument::new(doc, true)
    }

    /// A query in the building state with no operation recorded yet.
    pub fn query(&self) -> Query {
        Query::new(Arc::clone(&self.collection), Arc::clone(&self.schema))
    }

    pub fn find(&self, filter: Document) -> Query {
        self.query().find(filter)
    }

    pub fn find_one(&self, filter: Document) -> Query {
        self.query().find_one(filter)
    }

    pub fn count(&self, filter: Document) -> Query {
        self.query().count(filter)
    }

    pub fn distinct(&self, field: impl Into<String>, filter: Document) -> Query {
        self.query().distinct(field, filter)
    }

    pub fn delete_one(&self, filter: Document) -> Query {
        self.query().delete_one(filter)
    }

    pub fn delete_many(&self, filter: Document) -> Query {
        self.query().delete_many(filter)
    }

    pub fn update_one(&self, filter: Document, update: Document) -> Query {
        self.query().update_one(filter, update)
    }

    pub fn update_many(&self, filter: Document, update: Document) -> Query {
        self.query().update_many(filter, update)
    }

    pub fn replace_one(&self, filter: Document, replacement: Document) -> Query {
        self.query().replace_one(filter, replacement)
    }

    /// Persists `doc` through the `save` middleware hook.
    ///
    /// A typed schema casts the full document first; cast failure aborts
    /// the save before any hook or driver call. New documents insert their
    /// whole content; existing documents send only the delta as an update
    /// directive, and an empty delta skips the driver entirely and
    /// resolves to `Bson::Null`. On success the document is checkpointed:
    /// its delta clears and it is no longer new.
    ///
    /// Interceptors on `save` see (and may rewrite) what is persisted, not
    /// the in-memory handle.
    pub async fn save(&self, doc: &mut TrackedDocument) -> OdmResult<Bson> {
        if self.schema.is_typed() {
            let mut value = Bson::Document(doc.data().clone());
            cast(&mut value, &self.schema)?;
            if let Bson::Document(coerced) = value {
                doc.replace_data(coerced);
            }
        }

        let result = if doc.is_new() {
            debug!(collection = self.collection.name(), "saving new document");
            let collection = Arc::clone(&self.collection);
            let terminal: Terminal = Box::new(move |ctx| {
                Box::pin(async move {
                    match ctx.payload {
                        Bson::Document(content) => collection.insert(content).await,
                        other => Err(OdmError::Usage(format!(
                            "save payload must be a document, got {other:?}"
                        ))),
                    }
                })
            });
            self.schema
                .middleware_registry()
                .dispatch("save", Bson::Document(doc.data().clone()), terminal)
                .await?
        } else {
            let update = match doc.delta().to_update() {
                Some(update) => update,
                None => return Ok(Bson::Null),
            };
            let id = doc
                .id()
                .cloned()
                .ok_or_else(|| OdmError::Usage("cannot update a document without an _id".into()))?;
            debug!(collection = self.collection.name(), "saving document delta");

            let payload = doc! { "filter": { "_id": id }, "update": update };
            let collection = Arc::clone(&self.collection);
            let terminal: Terminal = Box::new(move |ctx| {
                Box::pin(async move {
                    let mut state = match ctx.payload {
                        Bson::Document(state) => state,
                        other => {
                            return Err(OdmError::Usage(format!(
                                "save payload must be a document, got {other:?}"
                            )));
                        }
                    };
                    let filter = match state.remove("filter") {
                        Some(Bson::Document(filter)) => filter,
                        _ => Document::new(),
                    };
                    let update = match state.remove("update") {
                        Some(Bson::Document(update)) => update,
                        _ => Document::new(),
                    };
                    collection.update_one(filter, update, Document::new()).await
                })
            });
            self.schema
                .middleware_registry()
                .dispatch("save", Bson::Document(payload), terminal)
                .await?
        };

        doc.checkpoint();
        Ok(result)
    }

    /// Invokes the model-level schema method `name`, wrapped by the
    /// middleware hook of the same name.
    pub async fn call(&self, name: &str, payload: Bson) -> OdmResult<Bson> {
        self.call_on(MethodTarget::Model, name, payload).await
    }

    /// Invokes the schema method `name` registered for `target`. The
    /// method body is the terminal of the middleware hook sharing its
    /// name, so interceptors wrap method calls exactly like operations.
    pub async fn call_on(&self, target: MethodTarget, name: &str, payload: Bson) -> OdmResult<Bson> {
        let method = self
            .schema
            .method_fn(target, name)
            .cloned()
            .ok_or_else(|| OdmError::Usage(format!("no {target:?} method named `{name}`")))?;

        let terminal: Terminal =
            Box::new(move |ctx: HookContext| method(ctx));
        self.schema
            .middleware_registry()
            .dispatch(name, payload, terminal)
            .await
    }

    /// Invokes a document-level schema method against `doc`'s content.
    pub async fn call_on_document(
        &self,
        name: &str,
        doc: &TrackedDocument,
    ) -> OdmResult<Bson> {
        self.call_on(
            MethodTarget::Document,
            name,
            Bson::Document(doc.data().clone()),
        )
        .await
    }
}
