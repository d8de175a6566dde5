//! In-memory driver backend for docgram.
//!
//! This crate provides a thread-safe, in-memory implementation of the
//! `DriverCollection` trait. It uses async-aware read-write locks for
//! concurrent access and is ideal for development and testing.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using an async-aware RwLock
//! - **Deterministic iteration** - Documents keyed by `_id` in a BTreeMap
//! - **Filter support** - Equality, dotted paths, and the common comparison operators
//! - **Option support** - Sorting, skip/limit, and flat projections
//!
//! # Quick Start
//!
//! ```ignore
//! use docgram::{Model, Schema, memory::MemoryCollection};
//! use bson::doc;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let users = Arc::new(MemoryCollection::new("users"));
//!     let model = Model::new(users, Arc::new(Schema::untyped()));
//!
//!     let mut user = model.create(doc! { "name": "Alice" });
//!     model.save(&mut user).await?;
//!
//!     let found = model.find_one(doc! { "name": "Alice" }).document().await?;
//!     assert!(found.is_some());
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docgram_memory;

pub mod evaluator;
pub mod store;

pub use store::MemoryCollection;
