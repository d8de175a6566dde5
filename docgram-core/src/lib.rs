//! An object-document mapping layer over document-oriented data stores.
//!
//! This crate is the core of the docgram project and provides:
//!
//! - **Change tracking** ([`document`], [`delta`]) - Documents that record field-level
//!   mutations as a minimal `$set`/`$unset` update directive
//! - **Path utilities** ([`path`]) - Dot-separated path navigation over BSON documents
//! - **Schemas** ([`schema`]) - Shape declarations compiled to a flat path table, plus
//!   middleware and named method registration
//! - **Casting** ([`cast`]) - Schema-directed coercion that aggregates every failure
//!   before reporting
//! - **Middleware** ([`middleware`]) - Async interceptor chains wrapping every operation
//! - **Queries** ([`query`]) - Deferred operation accumulation with single dispatch
//! - **Models** ([`model`]) - The collection-facing entry point for persistence
//! - **Driver abstraction** ([`driver`]) - The trait a storage backend implements
//! - **Error handling** ([`error`]) - Aggregated cast errors and the crate-wide result type
//!
//! # Example
//!
//! ```ignore
//! use docgram_core::model::Model;
//! use bson::doc;
//!
//! let model = Model::new(collection, schema);
//! let mut user = model.create(doc! { "name": "Axl", "nested": { "x": 1 } });
//! model.save(&mut user).await?;
//!
//! user.set("nested.y", 2);
//! model.save(&mut user).await?; // sends { "$set": { "nested.y": 2 } }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docgram_core;

pub mod cast;
pub mod delta;
pub mod document;
pub mod driver;
pub mod error;
pub mod middleware;
pub mod model;
pub mod path;
pub mod query;
pub mod schema;
