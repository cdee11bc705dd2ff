//! SQLite-backed typed object store adapter for Syncline.
//!
//! This crate is the concrete stand-in for the backing relational store the
//! cache core consumes: typed instance and relationship CRUD over JSON
//! property bags, class metadata with polymorphism, relationship
//! enumeration by endpoint and direction, persisted sequences, and a
//! savepoint-scoped unit of work.
//!
//! It deliberately implements no query language and no schema evolution;
//! those belong to the store proper, not to its adapter surface.

mod error;
mod schema;
mod store;

pub use error::{StoreError, StoreResult};
pub use schema::{ClassDef, ClassKind, ClassSpec, PropertyDef, RelEndDef, RelationshipSpec};
pub use store::{ObjectStore, RelationshipRow};
