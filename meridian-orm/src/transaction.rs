//! # Transaction Manager
//!
//! Begin/commit/rollback with savepoint-based nesting and a commit-callback
//! queue. Wraps `sqlx::Transaction` behind the crate's own `Connection`
//! trait (GAT-based `Exec<'c>`) and `Error` type, plus the commit-queue
//! mechanics from `callbacks::CommitQueue`.

use std::sync::{Arc, Mutex};

use crate::adapter::{Connection, Drivers};
use crate::callbacks::CommitQueue;
use crate::error::Error;
use crate::model::Model;
use crate::query::builder::QueryBuilder;

/// A transaction or nested savepoint, wrapping a `sqlx::Transaction`. If
/// dropped without an explicit `commit()`/`rollback()`, `sqlx` rolls it
/// back on drop.
///
/// `commit_queue` is shared (via `Arc<Mutex<_>>`) with every savepoint
/// nested under the same outermost transaction. `mark` is the queue's
/// length at the moment this savepoint was opened: a savepoint's own
/// `commit()` (a `RELEASE`) leaves every queued callback exactly where it
/// was, since the savepoint's fate can still be undone by an enclosing
/// rollback — only `commit()` on the *root* (`is_root`) ever drains the
/// queue. A savepoint's own `rollback()`, by contrast, resolves immediately:
/// it runs the rollback callbacks (and discards the commit callbacks)
/// queued since `mark`, without touching anything the enclosing transaction
/// queued before this savepoint began.
pub struct Transaction<'a> {
    tx: sqlx::Transaction<'a, sqlx::Any>,
    driver: Drivers,
    commit_queue: Arc<Mutex<CommitQueue>>,
    is_root: bool,
    mark: (usize, usize),
}

impl<'a> Connection for Transaction<'a> {
    type Exec<'c>
        = &'c mut sqlx::AnyConnection
    where
        Self: 'c;

    fn driver(&self) -> Drivers {
        self.driver
    }

    fn executor<'c>(&'c mut self) -> Self::Exec<'c> {
        &mut *self.tx
    }
}

impl<'a, 'b> Connection for &'b mut Transaction<'a> {
    type Exec<'c>
        = &'c mut sqlx::AnyConnection
    where
        Self: 'c;

    fn driver(&self) -> Drivers {
        (**self).driver
    }

    fn executor<'c>(&'c mut self) -> Self::Exec<'c> {
        &mut *self.tx
    }
}

impl<'a> Transaction<'a> {
    /// Wraps a fresh, top-level `sqlx::Transaction` (normally reached via
    /// `Adapter::begin`). Starts with a fresh, empty commit queue that any
    /// `begin_nested` savepoint below it will share.
    pub(crate) fn new(tx: sqlx::Transaction<'a, sqlx::Any>, driver: Drivers) -> Self {
        Self { tx, driver, commit_queue: Arc::new(Mutex::new(CommitQueue::new())), is_root: true, mark: (0, 0) }
    }

    /// Starts building a query that executes within this transaction.
    pub fn model<T: Model + Send + Sync + Unpin>(&mut self) -> QueryBuilder<'_, T, &mut Self> {
        let driver = self.driver;
        QueryBuilder::for_model(self, driver)
    }

    /// Opens a raw parameterized query against this transaction.
    pub fn raw<'q>(&'q mut self, sql: &'q str) -> crate::adapter::RawQuery<'q, &'q mut Self> {
        crate::adapter::RawQuery::new(self, sql)
    }

    /// Begins a nested transaction via `SAVEPOINT`. Dialects without
    /// savepoint support would make this a no-op; every dialect this core
    /// targets supports them (`Drivers::supports_savepoints`).
    pub async fn begin_nested(&mut self) -> Result<Transaction<'_>, Error> {
        let nested = self.tx.begin().await.map_err(Error::from_sqlx_classified)?;
        let mark = {
            let queue = self.commit_queue.lock().expect("commit queue mutex poisoned");
            (queue.commit_len(), queue.rollback_len())
        };
        Ok(Transaction { tx: nested, driver: self.driver, commit_queue: self.commit_queue.clone(), is_root: false, mark })
    }

    /// Registers a callback flushed only once the *outermost* transaction
    /// commits. Nested savepoint commits do
    /// not flush this queue; only `commit()` on the top-level `Transaction`
    /// returned by `Adapter::begin` does, since a savepoint release can
    /// still be undone by an enclosing rollback.
    pub fn after_commit(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.commit_queue.lock().expect("commit queue mutex poisoned").push_commit(callback);
    }

    /// Registers a callback run if the transaction rolls back.
    pub fn after_rollback(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.commit_queue.lock().expect("commit queue mutex poisoned").push_rollback(callback);
    }

    /// Commits the transaction. Only the root transaction's commit flushes
    /// the commit-callback queue; a nested savepoint's `RELEASE` leaves the
    /// queue untouched for an ancestor to resolve.
    pub async fn commit(mut self) -> Result<(), Error> {
        self.tx.commit().await.map_err(Error::from_sqlx_classified)?;
        if self.is_root {
            self.commit_queue.lock().expect("commit queue mutex poisoned").flush_commit();
        }
        Ok(())
    }

    /// Rolls back the transaction. The root transaction discards every
    /// queued commit callback and runs every queued rollback callback; a
    /// nested savepoint instead resolves only the slice of the queue it
    /// contributed since `begin_nested`, leaving anything the enclosing
    /// transaction queued before that point untouched.
    pub async fn rollback(mut self) -> Result<(), Error> {
        self.tx.rollback().await.map_err(Error::from_sqlx_classified)?;
        let mut queue = self.commit_queue.lock().expect("commit queue mutex poisoned");
        if self.is_root {
            queue.flush_rollback();
        } else {
            queue.rollback_since(self.mark.0, self.mark.1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Adapter;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn nested_rollback_runs_only_its_own_callbacks_and_outer_still_commits() {
        let adapter = Adapter::connect("sqlite::memory:").await.unwrap();
        let mut outer = adapter.begin().await.unwrap();

        let outer_committed = Arc::new(AtomicBool::new(false));
        let outer_committed2 = outer_committed.clone();
        outer.after_commit(move || outer_committed2.store(true, Ordering::SeqCst));

        let inner_rolled_back = Arc::new(AtomicBool::new(false));
        let inner_rolled_back2 = inner_rolled_back.clone();
        let inner_committed = Arc::new(AtomicBool::new(false));
        let inner_committed2 = inner_committed.clone();
        {
            let mut nested = outer.begin_nested().await.unwrap();
            nested.after_rollback(move || inner_rolled_back2.store(true, Ordering::SeqCst));
            nested.after_commit(move || inner_committed2.store(true, Ordering::SeqCst));
            nested.rollback().await.unwrap();
        }
        assert!(inner_rolled_back.load(Ordering::SeqCst), "nested rollback callback must run immediately");
        assert!(!inner_committed.load(Ordering::SeqCst), "nested commit callback must be discarded on rollback");
        assert!(!outer_committed.load(Ordering::SeqCst), "outer commit callback must not fire before outer commits");

        outer.commit().await.unwrap();
        assert!(outer_committed.load(Ordering::SeqCst), "outer commit callback must fire once the root commits");
    }

    #[tokio::test]
    async fn nested_commit_defers_its_callbacks_to_the_root_commit() {
        let adapter = Adapter::connect("sqlite::memory:").await.unwrap();
        let mut outer = adapter.begin().await.unwrap();

        let inner_committed = Arc::new(AtomicBool::new(false));
        let inner_committed2 = inner_committed.clone();
        {
            let mut nested = outer.begin_nested().await.unwrap();
            nested.after_commit(move || inner_committed2.store(true, Ordering::SeqCst));
            nested.commit().await.unwrap();
        }
        assert!(!inner_committed.load(Ordering::SeqCst), "a savepoint RELEASE must not drain the queue");

        outer.commit().await.unwrap();
        assert!(inner_committed.load(Ordering::SeqCst), "the root commit must drain callbacks queued by a released savepoint");
    }
}
