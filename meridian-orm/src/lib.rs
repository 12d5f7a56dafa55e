//! # Meridian ORM
//!
//! **Meridian ORM** is a relational ORM core for Rust built on top of
//! [sqlx](https://github.com/launchbadge/sqlx): pooled multi-database
//! connection routing (primary/writing/reading, replicas, sharding), a
//! composable query builder, model lifecycle (validations, callbacks,
//! dirty tracking, optimistic locking), associations with N+1-avoiding
//! eager loading, and field-level encryption.
//!
//! ## Features
//!
//! - **Async & Non-blocking**: built on `tokio` and `sqlx`
//! - **Multi-Driver Support**: PostgreSQL, MySQL, and SQLite via `sqlx::Any`
//! - **Macro-based Models**: `#[derive(Model)]` on plain Rust structs
//! - **Composable Query Builder**: immutable chaining over WHERE/GROUP/
//!   HAVING/ORDER/LIMIT/OFFSET/lock clauses
//! - **Connection Registry**: per-`(database, role, shard)` pools with
//!   health-monitored failover and replica load balancing
//! - **Model Lifecycle**: validations, ordered before/after/around
//!   callbacks, dirty-attribute tracking, optimistic locking
//! - **Associations**: `belongs_to`/`has_one`/`has_many`, polymorphic
//!   `belongs_to`, `:through`, eager loading in a bounded number of queries
//! - **Sharding**: hash/range/geo strategies, task-local shard scoping,
//!   scatter-gather fan-out
//! - **Field-Level Encryption**: randomized and deterministic AES-256-GCM
//!   attribute storage with key rotation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use meridian_orm::{Adapter, Model};
//! use serde::{Deserialize, Serialize};
//! use sqlx::FromRow;
//!
//! #[derive(Model, Debug, Clone, Serialize, Deserialize, FromRow)]
//! struct User {
//!     #[orm(primary_key)]
//!     id: i32,
//!     #[orm(size = 50, unique)]
//!     username: String,
//!     age: i32,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Adapter::connect("sqlite::memory:").await?;
//!
//!     db.migrator().register::<User>().run().await?;
//!
//!     let users: Vec<User> = db.model::<User>()
//!         .filter(meridian_orm::query::Predicate::gte("age", meridian_orm::ColumnValue::I32(18)))
//!         .scan()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

// ============================================================================
// Macro Re-exports
// ============================================================================

/// Re-export of the procedural macro for deriving the `Model` trait.
///
/// This macro is defined in the `meridian-orm-macro` crate and generates
/// table/column metadata, `to_map()`, and a `sqlx::FromRow` implementation
/// for structs representing database tables.
pub use meridian_orm_macro::Model;

// ============================================================================
// Module Declarations
// ============================================================================

/// Dialect-specific SQL execution: pooled connections, identifier quoting,
/// and capability probes. Every other component talks to the database
/// exclusively through an `Adapter`.
pub mod adapter;

/// `belongs_to`/`has_one`/`has_many` resolution, polymorphic associations,
/// `:through` joins, and N+1-avoiding eager loading.
pub mod association;

/// Connection-routing CRUD surface: `find`/`save`/`destroy`/`touch`/
/// `reload`, `connected_to`, and sticky-to-primary read routing.
pub mod base;

/// Replica load balancing strategies for a single logical database.
pub mod balancer;

/// Ordered lifecycle hooks (before/after/around callbacks) and the
/// after-commit/after-rollback queue.
pub mod callbacks;

/// The process-scoped service locator owning the connection registry,
/// replica balancers, polymorphic type registry, and shard configuration.
pub mod context;

/// Dirty-attribute tracking (`Tracked<T>`) layered over `Model::to_map()`.
pub mod dirty;

/// Randomized and deterministic AES-256-GCM field-level encryption, with
/// HKDF key derivation and batched key rotation.
pub mod encryption;

/// The central `Error` type and its classification of raw `sqlx::Error`s
/// into specific, matchable variants.
pub mod error;

/// Background connection health probing.
pub mod health;

/// Schema bootstrap: registers models and runs table creation and
/// foreign-key assignment in two ordered phases.
pub mod migration;

/// The `Model` trait, `ColumnInfo`/`ColumnValue`, and their primary-key
/// helpers.
pub mod model;

/// Page-request/page-result types compatible with `serde`-based web
/// frameworks.
pub mod pagination;

/// The composable query layer: `Predicate`, `QueryBuilder`, and the SQL
/// `Assembler`.
pub mod query;

/// The process-wide connection registry, keyed by `database:role[:shard]`.
pub mod registry;

/// Hash/range/geo shard resolution, task-local shard scoping, and
/// scatter-gather fan-out.
pub mod sharding;

/// Temporal type conversion across database drivers.
pub mod temporal;

/// Begin/commit/rollback with savepoint-based nesting.
pub mod transaction;

/// Declarative per-field validators, run before save.
pub mod validation;

/// Type-aware SQL value binding across database drivers.
pub mod value_binding;

// ============================================================================
// Public API Re-exports
// ============================================================================

/// Re-export of `Adapter`, the main entry point for establishing
/// connections and creating query builders, migrators, and transactions.
pub use adapter::{Adapter, Drivers};

/// Re-export of the CRUD surface types.
pub use base::{Base, ConnectionOverride, ModelConfig, SaveOutcome, connected_to};

/// Re-export of the process-scoped service locator.
pub use context::Context;

/// Re-export of dirty-attribute tracking.
pub use dirty::Tracked;

/// Re-export of the `Error` type used throughout Meridian ORM.
pub use error::Error;

/// Re-export of the `Model` trait and its metadata structures.
pub use model::{ColumnInfo, ColumnValue, Model};

/// Re-export of the `Migrator` for schema migration management.
pub use migration::Migrator;

/// Re-export of the query layer's most commonly used types.
pub use query::{Predicate, QueryBuilder};

/// Re-export of the connection registry and its role/spec types.
pub use registry::{ConnectionRegistry, ConnectionSpec, Role};
