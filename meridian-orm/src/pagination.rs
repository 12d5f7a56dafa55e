//! # Pagination Module
//!
//! A `Pagination` struct compatible with web frameworks (`axum`, `actix-web`)
//! via `serde`, plus a `paginate` helper that runs a `COUNT(*)` alongside the
//! limited/offset data query and returns both in one `Paginated<T>`.
//!
//! ## Example with Axum
//!
//! ```rust,ignore
//! use axum::extract::{Query, State};
//! use axum::Json;
//! use meridian_orm::{Adapter, pagination::Pagination};
//!
//! async fn list_users(
//!     State(db): State<Adapter>,
//!     Query(pagination): Query<Pagination>,
//! ) -> Json<Vec<User>> {
//!     let page = pagination.paginate(db.model::<User>()).await.unwrap();
//!     Json(page.data)
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::{adapter::Connection, model::Model, query::builder::QueryBuilder};

/// A page request, deserializable from query parameters (`?page=1&limit=20`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    /// The page number (0-indexed). Default: 0.
    #[serde(default)]
    pub page: usize,
    /// The number of items per page. Default: 10.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// A page of results plus the metadata needed to render pager controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    /// The items on this page.
    pub data: Vec<T>,
    /// Total items matching the query, across all pages.
    pub total: i64,
    /// The page number served (0-indexed).
    pub page: usize,
    /// The page size used.
    pub limit: usize,
    /// `ceil(total / limit)`.
    pub total_pages: i64,
}

fn default_limit() -> usize {
    10
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 0, limit: 10 }
    }
}

impl Pagination {
    /// Builds a `Pagination` directly from a page number and page size.
    pub fn new(page: usize, limit: usize) -> Self {
        Self { page, limit }
    }

    /// Applies `limit`/`offset` to `query` without running a count query.
    pub fn apply<'a, T, C>(self, query: QueryBuilder<'a, T, C>) -> QueryBuilder<'a, T, C>
    where
        T: Model + Send + Sync + Unpin,
        C: Connection + Send,
    {
        query.limit(self.limit as i64).offset((self.page * self.limit) as i64)
    }

    /// Runs a `COUNT(*)` over `query`'s filters, then the limited/offset data
    /// query, and bundles both into a `Paginated<T>`. Issues two round trips;
    /// callers who don't need `total`/`total_pages` should use `apply()`
    /// followed by a single `scan()` instead.
    pub async fn paginate<'a, T, C>(self, query: QueryBuilder<'a, T, C>) -> Result<Paginated<T>, crate::error::Error>
    where
        T: Model + for<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> + Send + Unpin,
        C: Connection + Send + Clone,
    {
        let total = query.clone().count().await?;
        let data = self.apply(query).scan().await?;
        let total_pages = if self.limit == 0 { 0 } else { (total as f64 / self.limit as f64).ceil() as i64 };
        Ok(Paginated { data, total, page: self.page, limit: self.limit, total_pages })
    }
}
