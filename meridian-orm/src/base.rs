//! # Model Base
//!
//! The CRUD surface and connection-routing glue that sits above a single
//! `Adapter`/`QueryBuilder` query and below a fully wired application model:
//! `new`/`create`/`create!`/`find`/`find!`/`find_by[!]`/`first[!]`/`last[!]`/
//! `all`/`save`/`save!`/`update`/`update!`/`destroy`/`destroy!`/`touch`/
//! `reload`, plus `connected_to` and the "sticky to primary" read routing
//! that follows every write. This is where querying, the connection pool,
//! and model instances tie together, routed through this core's
//! `Context`/`ConnectionRegistry`/`Validator`/`CallbackRegistry` split.
//!
//! A Ruby-style model class carries its validations, callbacks, and table
//! routing as class-level mutable state. Rust has no such per-type
//! singleton without reintroducing the `static`-registry pattern this core
//! already rejected in `context.rs`; `ModelConfig<T>` is that state made
//! explicit and owned by the caller instead, passed alongside a `Context`
//! to every `Base` call.

use sqlx::any::AnyRow;
use sqlx::FromRow;

use crate::adapter::Adapter;
use crate::balancer::BalanceStrategy;
use crate::callbacks::{CallbackRegistry, Hook};
use crate::context::Context;
use crate::dirty::Tracked;
use crate::error::Error;
use crate::model::{ColumnValue, Model};
use crate::query::predicate::Predicate;
use crate::registry::Role;
use crate::validation::{Errors, ValidationContext, Validator};

tokio::task_local! {
    static CONNECTION_OVERRIDE: ConnectionOverride;
}

/// A per-block override of connection routing, set up by
/// `connected_to(role:, database:, shard:, prevent_writes:)`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOverride {
    role: Option<Role>,
    database: Option<String>,
    shard: Option<String>,
    prevent_writes: bool,
}

impl ConnectionOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn shard(mut self, shard: impl Into<String>) -> Self {
        self.shard = Some(shard.into());
        self
    }

    /// Raises `InvalidArgument` on any write attempted inside the block —
    /// used to guarantee a read-only code path never accidentally writes.
    pub fn prevent_writes(mut self) -> Self {
        self.prevent_writes = true;
        self
    }
}

/// Runs `f` with every `Base` connection resolution inside it honoring
/// `opts`, restoring the previous override (or absence of one) on return —
/// the same RAII-like task-local discipline `sharding::with_shard` uses.
pub async fn connected_to<F, Fut, R>(opts: ConnectionOverride, f: F) -> R
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = R>,
{
    CONNECTION_OVERRIDE.scope(opts, f()).await
}

fn current_override() -> Option<ConnectionOverride> {
    CONNECTION_OVERRIDE.try_with(|o| o.clone()).ok()
}

/// Resolves the adapter for one logical operation against `database`
/// (optionally `shard`), honoring any `connected_to` override and the
/// sticky-to-primary window: a read that lands within
/// `Context::connection_switch_wait_period` of the last write to the same
/// `(database, shard)` is routed to the writer rather than a replica, so a
/// caller never reads its own write off a lagging replica.
pub async fn resolve_adapter(
    ctx: &Context,
    database: &str,
    shard: Option<&str>,
    write: bool,
) -> Result<Adapter, Error> {
    let override_ = current_override();

    let database = override_.as_ref().and_then(|o| o.database.clone()).unwrap_or_else(|| database.to_string());
    let shard = override_.as_ref().and_then(|o| o.shard.clone()).or_else(|| shard.map(String::from));
    let prevent_writes = override_.as_ref().map(|o| o.prevent_writes).unwrap_or(false);

    if write && prevent_writes {
        return Err(Error::invalid_argument("writes are disabled inside this connected_to block"));
    }

    let sticky_key = match &shard {
        Some(s) => format!("{database}:{s}"),
        None => database.clone(),
    };

    let role = match override_.as_ref().and_then(|o| o.role) {
        Some(role) => role,
        None if write => Role::Writing,
        None if ctx.recently_written(&sticky_key).await => Role::Writing,
        None => Role::Reading,
    };

    if write {
        ctx.record_write(&sticky_key).await;
    }

    if role == Role::Reading {
        let balancer = ctx.balancer_for(&database, BalanceStrategy::RoundRobin).await;
        if let Some((_, adapter)) = balancer.next_replica().await {
            return Ok(adapter);
        }
    }

    ctx.connections().get_adapter(&database, role, shard.as_deref()).await
}

/// `save`'s outcome: either the record persisted, or it didn't and `Errors`
/// explains why. An enum instead of a `bool` + side-channel `errors` field, since nothing
/// here holds per-instance mutable class state to stash the latter in.
#[derive(Debug)]
pub enum SaveOutcome {
    Saved,
    Invalid(Errors),
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveOutcome::Saved)
    }
}

/// A model type's declared validations, callbacks, and home database —
/// the data a Ruby-style model class would otherwise carry as static
/// state. One `ModelConfig<T>` per model type, built once at startup and
/// passed to every `Base::new` call for that type.
pub struct ModelConfig<T: Model> {
    database: String,
    validators: Validator<T>,
    callbacks: CallbackRegistry<T>,
    lock_version_column: Option<&'static str>,
}

impl<T: Model + Send + 'static> ModelConfig<T> {
    pub fn new(database: impl Into<String>) -> Self {
        let lock_version_column = T::columns().into_iter().find(|c| c.is_lock_version).map(|c| c.name);
        Self { database: database.into(), validators: Validator::new(), callbacks: CallbackRegistry::new(), lock_version_column }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn validators_mut(&mut self) -> &mut Validator<T> {
        &mut self.validators
    }

    pub fn callbacks_mut(&mut self) -> &mut CallbackRegistry<T> {
        &mut self.callbacks
    }
}

/// The CRUD surface for model `T`, bound to one `Context`/`ModelConfig`
/// pair (and optionally one shard).
pub struct Base<'a, T: Model> {
    ctx: &'a Context,
    config: &'a ModelConfig<T>,
    shard: Option<String>,
}

fn primary_key_column<T: Model>() -> Result<&'static str, Error> {
    T::primary_key_columns()
        .into_iter()
        .next()
        .ok_or_else(|| Error::invalid_argument(format!("model {} declares no primary key", T::table_name())))
}

/// Parses a raw `to_map()` string into the `ColumnValue` variant matching
/// `column`'s declared SQL type, so primary-key lookups and `UPDATE`
/// assignments bind with the same type as the column they compare/set
/// rather than always falling back to `Text` (which strict-typed dialects
/// like PostgreSQL reject against an integer/bool/uuid column).
fn typed_value<T: Model>(column: &str, raw: &str) -> ColumnValue {
    let sql_type = T::columns().into_iter().find(|c| c.name == column).map(|c| c.sql_type).unwrap_or("TEXT");
    ColumnValue::from_sql_str(raw, sql_type)
}

impl<'a, T> Base<'a, T>
where
    T: Model + Clone + for<'r> FromRow<'r, AnyRow> + Send + Sync + Unpin + 'static,
{
    pub fn new(ctx: &'a Context, config: &'a ModelConfig<T>) -> Self {
        Self { ctx, config, shard: None }
    }

    /// Scopes every query this `Base` issues to a single shard, bypassing
    /// shard-key resolution (`sharding::ShardStrategy`) for call sites that
    /// already know the shard.
    pub fn for_shard(mut self, shard: impl Into<String>) -> Self {
        self.shard = Some(shard.into());
        self
    }

    pub(crate) async fn write_adapter(&self) -> Result<Adapter, Error> {
        resolve_adapter(self.ctx, &self.config.database, self.shard.as_deref(), true).await
    }

    pub(crate) async fn read_adapter(&self) -> Result<Adapter, Error> {
        resolve_adapter(self.ctx, &self.config.database, self.shard.as_deref(), false).await
    }

    /// Wraps a freshly constructed (not yet persisted) instance.
    pub fn new_record(&self, instance: T) -> Tracked<T> {
        Tracked::new_record(instance)
    }

    pub async fn all(&self) -> Result<Vec<T>, Error> {
        let adapter = self.read_adapter().await?;
        adapter.model::<T>().scan().await
    }

    fn after_find(&self, row: Option<T>) -> Result<Option<Tracked<T>>, Error> {
        let Some(instance) = row else { return Ok(None) };
        let mut tracked = Tracked::loaded(instance);
        self.config.callbacks.run_plain(Hook::AfterFind, tracked.get_mut())?;
        Ok(Some(tracked))
    }

    pub async fn find(&self, pk: &str) -> Result<Option<Tracked<T>>, Error> {
        let adapter = self.read_adapter().await?;
        let pk_col = primary_key_column::<T>()?;
        let row =
            adapter.model::<T>().filter(Predicate::eq(pk_col, typed_value::<T>(pk_col, pk))).first().await?;
        self.after_find(row)
    }

    pub async fn find_bang(&self, pk: &str) -> Result<Tracked<T>, Error> {
        self.find(pk).await?.ok_or(Error::NotFound)
    }

    pub async fn find_by(&self, field: &str, value: ColumnValue) -> Result<Option<Tracked<T>>, Error> {
        let adapter = self.read_adapter().await?;
        let row = adapter.model::<T>().filter(Predicate::eq(field, value)).first().await?;
        self.after_find(row)
    }

    pub async fn find_by_bang(&self, field: &str, value: ColumnValue) -> Result<Tracked<T>, Error> {
        self.find_by(field, value).await?.ok_or(Error::NotFound)
    }

    pub async fn first(&self) -> Result<Option<Tracked<T>>, Error> {
        let adapter = self.read_adapter().await?;
        let pk_col = primary_key_column::<T>()?;
        let row = adapter.model::<T>().order(pk_col, true).first().await?;
        self.after_find(row)
    }

    pub async fn first_bang(&self) -> Result<Tracked<T>, Error> {
        self.first().await?.ok_or(Error::NotFound)
    }

    pub async fn last(&self) -> Result<Option<Tracked<T>>, Error> {
        let adapter = self.read_adapter().await?;
        let pk_col = primary_key_column::<T>()?;
        let row = adapter.model::<T>().order(pk_col, false).first().await?;
        self.after_find(row)
    }

    pub async fn last_bang(&self) -> Result<Tracked<T>, Error> {
        self.last().await?.ok_or(Error::NotFound)
    }

    /// Re-reads `tracked`'s row by primary key, replacing both its current
    /// state and its dirty-tracking snapshot.
    pub async fn reload(&self, tracked: &mut Tracked<T>) -> Result<(), Error> {
        let pk_col = primary_key_column::<T>()?;
        let pk_value = tracked
            .get()
            .primary_key_values()
            .into_iter()
            .next()
            .ok_or_else(|| Error::invalid_argument("primary key missing from instance"))?;
        let adapter = self.read_adapter().await?;
        let instance = adapter
            .model::<T>()
            .filter(Predicate::eq(pk_col, typed_value::<T>(pk_col, &pk_value)))
            .first()
            .await?
            .ok_or(Error::NotFound)?;
        *tracked = Tracked::loaded(instance);
        Ok(())
    }

    /// Runs `before_validation`/validators/`after_validation`, then (if
    /// valid) the insert or update plus its surrounding callbacks. A failed
    /// validation returns `false` and populates `errors` rather than
    /// raising; `save!` raises `RecordNotSaved` in that case instead.
    pub async fn save(&self, tracked: &mut Tracked<T>) -> Result<SaveOutcome, Error> {
        self.config.callbacks.run_plain(Hook::BeforeValidation, tracked.get_mut())?;
        let context = if tracked.is_new_record() { ValidationContext::Create } else { ValidationContext::Update };
        let errors = self.config.validators.run(tracked.get(), context);
        self.config.callbacks.run_plain(Hook::AfterValidation, tracked.get_mut())?;
        if !errors.is_empty() {
            return Ok(SaveOutcome::Invalid(errors));
        }

        self.config.callbacks.run_plain(Hook::BeforeSave, tracked.get_mut())?;
        if tracked.is_new_record() {
            self.config.callbacks.run_plain(Hook::BeforeCreate, tracked.get_mut())?;
            self.insert(tracked).await?;
            self.config.callbacks.run_plain(Hook::AfterCreate, tracked.get_mut())?;
            self.config.callbacks.run_plain(Hook::AfterCreateCommit, tracked.get_mut())?;
        } else {
            self.config.callbacks.run_plain(Hook::BeforeUpdate, tracked.get_mut())?;
            self.update_existing(tracked).await?;
            self.config.callbacks.run_plain(Hook::AfterUpdate, tracked.get_mut())?;
            self.config.callbacks.run_plain(Hook::AfterUpdateCommit, tracked.get_mut())?;
        }
        self.config.callbacks.run_plain(Hook::AfterSave, tracked.get_mut())?;
        // `Base` issues one autocommitting statement per call rather than
        // threading an explicit `Transaction` through (see `transaction.rs`
        // for the nested-savepoint commit-queue used when callers do run
        // inside one); a successful write here has already committed, so the
        // commit-family hooks fire immediately rather than via
        // `Transaction::after_commit`'s deferred queue.
        self.config.callbacks.run_plain(Hook::AfterCommit, tracked.get_mut())?;
        tracked.mark_saved();
        Ok(SaveOutcome::Saved)
    }

    pub async fn save_bang(&self, tracked: &mut Tracked<T>) -> Result<(), Error> {
        match self.save(tracked).await? {
            SaveOutcome::Saved => Ok(()),
            SaveOutcome::Invalid(errors) => Err(Error::RecordNotSaved(errors.full_messages().join(", "))),
        }
    }

    /// `update`/`update!` apply no attribute hash of their own — callers
    /// mutate `tracked.get_mut()` directly, since `T` is a statically typed
    /// struct rather than an open attribute bag — and are otherwise plain
    /// aliases for `save`/`save!`.
    pub async fn update(&self, tracked: &mut Tracked<T>) -> Result<SaveOutcome, Error> {
        self.save(tracked).await
    }

    pub async fn update_bang(&self, tracked: &mut Tracked<T>) -> Result<(), Error> {
        self.save_bang(tracked).await
    }

    async fn insert(&self, tracked: &mut Tracked<T>) -> Result<(), Error> {
        let adapter = self.write_adapter().await?;
        adapter.model::<T>().insert(tracked.get()).await?;
        Ok(())
    }

    async fn update_existing(&self, tracked: &mut Tracked<T>) -> Result<(), Error> {
        let changed = tracked.changed_attributes();
        if changed.is_empty() {
            return Ok(());
        }

        let pk_col = primary_key_column::<T>()?;
        let pk_value = tracked
            .get()
            .primary_key_values()
            .into_iter()
            .next()
            .ok_or_else(|| Error::invalid_argument("primary key missing from instance"))?;

        let adapter = self.write_adapter().await?;
        let mut query = adapter.model::<T>().filter(Predicate::eq(pk_col, typed_value::<T>(pk_col, &pk_value)));

        let mut assignments: Vec<(String, ColumnValue)> = changed
            .iter()
            .filter(|(col, _)| col.as_str() != pk_col)
            .map(|(col, (_, new))| (col.clone(), typed_value::<T>(col, &new.clone().unwrap_or_default())))
            .collect();

        let expected_lock_version = if let Some(lock_col) = self.config.lock_version_column {
            let current: i64 = tracked.get().to_map().get(lock_col).and_then(|v| v.parse().ok()).unwrap_or(0);
            query = query.filter(Predicate::eq(lock_col, ColumnValue::I64(current)));
            assignments.retain(|(col, _)| col != lock_col);
            assignments.push((lock_col.to_string(), ColumnValue::I64(current + 1)));
            Some(current)
        } else {
            None
        };

        let rows = query.update_all(assignments).await?;
        if rows == 0 {
            return match expected_lock_version {
                Some(expected) => Err(Error::StaleObjectError { expected }),
                None => Err(Error::RecordNotSaved(format!("no row matched the primary key of {}", T::table_name()))),
            };
        }
        Ok(())
    }

    /// Runs `before_destroy`; a halting `Err` from that callback is an
    /// abort rather than a system fault, so `destroy`
    /// reports it as `Ok(false)` instead of propagating it — only
    /// `destroy!` turns "not destroyed" into an error.
    pub async fn destroy(&self, tracked: &mut Tracked<T>) -> Result<bool, Error> {
        if self.config.callbacks.run_plain(Hook::BeforeDestroy, tracked.get_mut()).is_err() {
            return Ok(false);
        }
        let adapter = self.write_adapter().await?;
        let rows = adapter.model::<T>().delete_by_pk(tracked.get()).await?;
        if rows == 0 {
            return Ok(false);
        }
        tracked.mark_destroyed();
        self.config.callbacks.run_plain(Hook::AfterDestroy, tracked.get_mut())?;
        self.config.callbacks.run_plain(Hook::AfterDestroyCommit, tracked.get_mut())?;
        self.config.callbacks.run_plain(Hook::AfterCommit, tracked.get_mut())?;
        Ok(true)
    }

    pub async fn destroy_bang(&self, tracked: &mut Tracked<T>) -> Result<(), Error> {
        if self.destroy(tracked).await? {
            Ok(())
        } else {
            Err(Error::RecordNotDestroyed(format!("{} was not destroyed", T::table_name())))
        }
    }

    /// Sets `columns` (or every `update_time` column, if empty) to now,
    /// without running validations.
    pub async fn touch(&self, tracked: &mut Tracked<T>, columns: &[&str]) -> Result<(), Error> {
        let pk_col = primary_key_column::<T>()?;
        let pk_value = tracked
            .get()
            .primary_key_values()
            .into_iter()
            .next()
            .ok_or_else(|| Error::invalid_argument("primary key missing from instance"))?;

        let cols: Vec<&str> = if columns.is_empty() {
            T::columns().into_iter().filter(|c| c.update_time).map(|c| c.name).collect()
        } else {
            columns.to_vec()
        };
        if cols.is_empty() {
            return Ok(());
        }

        let adapter = self.write_adapter().await?;
        let rows = adapter
            .model::<T>()
            .filter(Predicate::eq(pk_col, typed_value::<T>(pk_col, &pk_value)))
            .touch_all(&cols, chrono::Utc::now())
            .await?;
        if rows == 0 {
            return Err(Error::RecordNotSaved(format!("no row matched the primary key of {}", T::table_name())));
        }
        self.config.callbacks.run_plain(Hook::AfterTouch, tracked.get_mut())?;
        Ok(())
    }

    /// `create`/`create!` build a new record and immediately `save`/`save!`
    /// it. `create` mirrors ActiveRecord: it always returns the instance,
    /// saved or not — callers inspect `tracked.is_new_record()` (still
    /// `true` means it didn't persist) or re-derive `Errors` via `save`
    /// directly if they need the failure detail.
    pub async fn create(&self, instance: T) -> Result<Tracked<T>, Error> {
        let mut tracked = Tracked::new_record(instance);
        self.save(&mut tracked).await?;
        Ok(tracked)
    }

    pub async fn create_bang(&self, instance: T) -> Result<Tracked<T>, Error> {
        let mut tracked = Tracked::new_record(instance);
        self.save_bang(&mut tracked).await?;
        Ok(tracked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, Clone)]
    struct Widget {
        id: i32,
        name: String,
    }

    impl Model for Widget {
        fn table_name() -> &'static str {
            "widget"
        }

        fn columns() -> Vec<crate::model::ColumnInfo> {
            vec![
                crate::model::ColumnInfo {
                    name: "id",
                    sql_type: "INTEGER",
                    is_primary_key: true,
                    is_nullable: false,
                    create_time: false,
                    update_time: false,
                    unique: false,
                    index: false,
                    foreign_table: None,
                    foreign_key: None,
                    omit: false,
                    is_lock_version: false,
                    is_encrypted_storage: false,
                },
                crate::model::ColumnInfo {
                    name: "name",
                    sql_type: "TEXT",
                    is_primary_key: false,
                    is_nullable: false,
                    create_time: false,
                    update_time: false,
                    unique: false,
                    index: false,
                    foreign_table: None,
                    foreign_key: None,
                    omit: false,
                    is_lock_version: false,
                    is_encrypted_storage: false,
                },
            ]
        }

        fn active_columns() -> Vec<&'static str> {
            vec!["id", "name"]
        }

        fn to_map(&self) -> HashMap<String, String> {
            let mut m = HashMap::new();
            m.insert("id".to_string(), self.id.to_string());
            m.insert("name".to_string(), self.name.clone());
            m
        }
    }

    #[test]
    fn model_config_discovers_its_lock_version_column() {
        let config = ModelConfig::<Widget>::new("primary");
        assert_eq!(config.lock_version_column, None);
        assert_eq!(config.database(), "primary");
    }

    #[tokio::test]
    async fn connected_to_scopes_an_override_and_restores_it() {
        assert!(current_override().is_none());
        connected_to(ConnectionOverride::new().role(Role::Reading), || async {
            assert!(current_override().unwrap().role == Some(Role::Reading));
        })
        .await;
        assert!(current_override().is_none());
    }

    #[tokio::test]
    async fn prevent_writes_rejects_a_write_inside_the_block() {
        let ctx = Context::new_for_test();
        let result = connected_to(ConnectionOverride::new().prevent_writes(), || async {
            resolve_adapter(&ctx, "primary", None, true).await
        })
        .await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn save_outcome_reports_saved_state() {
        assert!(SaveOutcome::Saved.is_saved());
        assert!(!SaveOutcome::Invalid(Errors::new()).is_saved());
    }
}
