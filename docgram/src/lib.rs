//! Main docgram crate providing an object-document mapping layer.
//!
//! This crate is the primary entry point for users of the docgram framework.
//! It re-exports the core types from various sub-crates and provides
//! convenient access to the bundled storage backend.
//!
//! # Features
//!
//! - **Change tracking** - Documents record field-level mutations and persist
//!   only the minimal `$set`/`$unset` update directive
//! - **Schemas and casting** - Declarative shapes compiled to a flat path table,
//!   with coercion that reports every failing path at once
//! - **Middleware** - Async interceptor chains wrap every operation and can
//!   rewrite payloads, short-circuit, or fail the whole call
//! - **Deferred queries** - Operations accumulate across chained calls and
//!   dispatch exactly once
//!
//! # Quick Start
//!
//! ```ignore
//! use docgram::prelude::*;
//! use docgram::memory::MemoryCollection;
//! use bson::{doc, Bson};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let schema = Schema::new(doc! {
//!         "name": "string",
//!         "age": "number",
//!     });
//!
//!     let users = Arc::new(MemoryCollection::new("users"));
//!     let model = Model::new(users, Arc::new(schema));
//!
//!     // Insert a document; the string "30" casts to a number on save.
//!     let mut user = model.create(doc! { "name": "Alice", "age": "30" });
//!     model.save(&mut user).await?;
//!
//!     // Mutate and save again; only the delta goes to the store.
//!     user.set("age", 31);
//!     model.save(&mut user).await?;
//!
//!     // Query it back.
//!     let found = model
//!         .find_one(doc! { "name": "Alice" })
//!         .document()
//!         .await?;
//!     assert_eq!(found.unwrap().get("age"), Some(&Bson::Int64(31)));
//!
//!     Ok(())
//! }
//! ```
//!
//! # Middleware
//!
//! Interceptors registered on a schema hook wrap the operation of the same
//! name. They run in registration order on the way in and reverse order on
//! the way out, and may rewrite the payload, short-circuit with a result,
//! or fail the whole call:
//!
//! ```ignore
//! let mut schema = Schema::untyped();
//! schema.middleware("find", |ctx, next| Box::pin(async move {
//!     // runs before the driver
//!     let result = next.run(ctx).await?;
//!     // runs after, in reverse registration order
//!     Ok(result)
//! }));
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing; any type
//!   implementing [`DriverCollection`](docgram_core::driver::DriverCollection)
//!   plugs in the same way.

pub mod prelude;

pub use docgram_core::{cast, delta, document, driver, error, middleware, model, path, query, schema};

// Re-export BSON types for convenience
pub use bson;

pub use docgram_core::document::TrackedDocument;
pub use docgram_core::model::Model;
pub use docgram_core::schema::Schema;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docgram_memory::MemoryCollection;
}
