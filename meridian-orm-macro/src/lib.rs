//! # Meridian ORM Procedural Macros
//!
//! This crate provides the `#[derive(Model)]` macro that implements the
//! `Model` trait for structs representing database tables: table/column
//! metadata, a `to_map()` serialization, and a generated `sqlx::FromRow`
//! impl for the `Any` driver.
//!
//! ## Architecture
//!
//! - **`lib.rs`** (this file): Entry point and macro definition
//! - **`derive_model.rs`**: Implementation of the Model derive macro
//! - **`types.rs`**: Type mapping utilities (Rust → SQL)
//!
//! ## Usage
//!
//! This crate is not meant to be used directly. Instead, it's re-exported
//! by the main `meridian-orm` crate:
//!
//! ```rust,ignore
//! use meridian_orm::Model;
//! use uuid::Uuid;
//!
//! #[derive(Model)]
//! struct User {
//!     #[orm(primary_key)]
//!     id: Uuid,
//!     username: String,
//! }
//! ```
//!
//! ## Supported Attributes
//!
//! The `#[orm(...)]` attribute supports the following options:
//!
//! ### Primary Key
//! ```rust,ignore
//! #[orm(primary_key)]
//! id: Uuid,
//! ```
//! Marks the field as (part of) the table's primary key.
//!
//! ### Unique Constraint
//! ```rust,ignore
//! #[orm(unique)]
//! username: String,
//! ```
//!
//! ### Database Index
//! ```rust,ignore
//! #[orm(index)]
//! email: String,
//! ```
//!
//! ### Column Size
//! ```rust,ignore
//! #[orm(size = 100)]
//! username: String,
//! ```
//! Sets `VARCHAR(N)` size for `String` fields. Default is `TEXT`.
//!
//! ### Auto-Timestamps
//! ```rust,ignore
//! #[orm(create_time)]
//! created_at: DateTime<Utc>,
//! #[orm(update_time)]
//! updated_at: DateTime<Utc>,
//! ```
//!
//! ### Foreign Key
//! ```rust,ignore
//! #[orm(foreign_key = "User::id")]
//! user_id: Uuid,
//! ```
//! Format: `"TargetTable::target_column"`.
//!
//! ### Omit Field
//! ```rust,ignore
//! #[orm(omit)]
//! password: String,
//! ```
//! Excludes this field from `SELECT *` projections by default.
//!
//! ### Optimistic Locking
//! ```rust,ignore
//! #[orm(lock_version)]
//! lock_version: i32,
//! ```
//! Marks the column as the row's optimistic-lock counter, incremented on
//! every update; a stale write raises `StaleObjectError`.
//!
//! ### Encrypted Attribute Storage
//! ```rust,ignore
//! #[orm(encrypted)]
//! ssn_encrypted: String,
//! ```
//! Marks the column as ciphertext storage for a logical encrypted attribute,
//! managed by the `encryption` module rather than written in plaintext.
//!
//! ### Combining Attributes
//! ```rust,ignore
//! #[orm(size = 50, unique, index)]
//! username: String,
//! ```
//!
//! ## Generated Field Constants
//!
//! The macro also generates a `{model}_fields` module with constants for each
//! field, for IDE autocomplete with `filter()`/`select()`/etc:
//!
//! ```rust,ignore
//! pub mod user_fields {
//!     pub const ID: &'static str = "id";
//!     pub const USERNAME: &'static str = "username";
//! }
//! ```

// ============================================================================
// Compiler Directives
// ============================================================================

#![warn(missing_docs)]

// ============================================================================
// External Crate Imports
// ============================================================================

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

// ============================================================================
// Module Declarations
// ============================================================================

/// Type mapping module - converts Rust types to SQL types.
mod types;

/// Model derive implementation module.
mod derive_model;

// ============================================================================
// Procedural Macro Definitions
// ============================================================================

/// Derives the `Model` trait for a struct.
///
/// Inspects the struct's fields and `#[orm(...)]` attributes and generates an
/// implementation of `Model` (table/column metadata, `to_map()`) plus a
/// `sqlx::FromRow<'_, sqlx::any::AnyRow>` implementation that decodes each
/// column either by its bare name or by a `<table>__<column>` alias (the
/// latter lets query results from joined/annotated selects disambiguate
/// same-named columns across tables).
///
/// # Requirements
///
/// The struct must have named fields. Tuple structs and unit structs are not
/// supported.
///
/// # Panics
///
/// Panics at macro-expansion time if the input is not a named-field struct,
/// or an `#[orm(...)]` attribute is malformed (e.g. `foreign_key` not in
/// `"Table::Column"` form).
#[proc_macro_derive(Model, attributes(orm))]
pub fn model_derive(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    let expanded = derive_model::expand(ast);
    TokenStream::from(expanded)
}
