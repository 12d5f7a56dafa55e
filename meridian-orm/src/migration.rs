//! # Migration Module
//!
//! Schema bootstrap management: registers models and runs their table
//! creation and foreign-key assignment in two ordered phases, so a foreign
//! key never references a table that does not exist yet.
//!
//! ```rust,ignore
//! use meridian_orm::{Adapter, Model};
//! use uuid::Uuid;
//!
//! #[derive(Model)]
//! struct User {
//!     #[orm(primary_key)]
//!     id: Uuid,
//!     username: String,
//! }
//!
//! #[derive(Model)]
//! struct Post {
//!     #[orm(primary_key)]
//!     id: Uuid,
//!     #[orm(foreign_key = "User::id")]
//!     user_id: Uuid,
//!     title: String,
//! }
//!
//! # async fn run(db: Adapter) -> Result<(), meridian_orm::Error> {
//! db.migrator().register::<User>().register::<Post>().run().await?;
//! # Ok(())
//! # }
//! ```

use futures::future::BoxFuture;

use crate::{adapter::Adapter, error::Error, model::Model};

/// A single migration step: create a table, or assign its foreign keys.
pub type MigrationTask = Box<dyn Fn(Adapter) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

/// Schema migration manager bound to one `Adapter`.
///
/// Maintains two task queues — table creation and foreign-key assignment —
/// so that registering models in any order still produces a valid schema:
/// every table exists before any foreign key referencing it is created.
pub struct Migrator<'a> {
    pub(crate) db: &'a Adapter,
    pub(crate) tasks: Vec<MigrationTask>,
    pub(crate) fk_task: Vec<MigrationTask>,
}

impl<'a> Migrator<'a> {
    /// Creates an empty migrator for `db`. Normally reached via
    /// `Adapter::migrator()`.
    pub fn new(db: &'a Adapter) -> Self {
        Self { db, tasks: Vec::new(), fk_task: Vec::new() }
    }

    /// Queues table creation and foreign-key assignment for model `T`.
    /// Chainable; tasks run in registration order within each phase.
    pub fn register<T>(mut self) -> Self
    where
        T: Model + 'static + Send + Sync,
    {
        let task = Box::new(|db: Adapter| -> BoxFuture<'static, Result<(), Error>> {
            Box::pin(async move {
                db.create_table::<T>().await?;
                Ok(())
            })
        });
        let fk_task = Box::new(|db: Adapter| -> BoxFuture<'static, Result<(), Error>> {
            Box::pin(async move {
                db.assign_foreign_keys::<T>().await?;
                Ok(())
            })
        });

        self.tasks.push(task);
        self.fk_task.push(fk_task);
        self
    }

    /// Runs every table-creation task, then every foreign-key task. Aborts
    /// on the first failure, leaving the schema partially migrated (callers
    /// running against a fresh database can simply retry `run()`; both
    /// phases are idempotent `IF NOT EXISTS` operations).
    pub async fn run(self) -> Result<Adapter, Error> {
        for task in self.tasks {
            (task)(self.db.clone()).await?;
        }
        for task in self.fk_task {
            (task)(self.db.clone()).await?;
        }
        Ok(self.db.clone())
    }
}
