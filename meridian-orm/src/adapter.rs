//! # Adapter Module
//!
//! Dialect-specific SQL execution: pooled connections, identifier quoting,
//! and capability probes (lock modes, isolation levels, savepoints). Every
//! other component talks to the database exclusively through an `Adapter`.

use heck::ToSnakeCase;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Arguments, Row};
use std::time::Duration;

use crate::error::Error;
use crate::migration::Migrator;
use crate::model::Model;
use crate::query::builder::QueryBuilder;
use crate::transaction::Transaction;

/// Supported database driver types.
///
/// The driver is detected from the connection URL scheme and drives every
/// dialect-specific decision downstream: placeholder style (`$N` vs `?`),
/// identifier quoting, RETURNING/last-insert-id conventions, and which lock
/// and isolation clauses are legal.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Hash)]
pub enum Drivers {
    /// PostgreSQL (9.5+). Numbered placeholders, `"..."` quoting, full lock
    /// mode and isolation level support, native savepoints.
    Postgres,
    /// SQLite (3.x). `?` placeholders, `"..."` quoting, no row-level locks,
    /// savepoints supported, isolation levels are a no-op (single writer).
    SQLite,
    /// MySQL / MariaDB (5.7+/10.2+). `?` placeholders, backtick quoting,
    /// savepoints supported, `READ UNCOMMITTED`..`SERIALIZABLE`.
    MySQL,
}

/// A pessimistic row lock mode requestable via the query builder's `lock()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// `SELECT ... FOR UPDATE`.
    ForUpdate,
    /// `SELECT ... FOR SHARE` (`LOCK IN SHARE MODE` on MySQL).
    ForShare,
    /// `SELECT ... FOR UPDATE SKIP LOCKED`.
    ForUpdateSkipLocked,
    /// `SELECT ... FOR UPDATE NOWAIT`.
    ForUpdateNoWait,
}

/// A transaction isolation level, as understood by `BEGIN ISOLATION LEVEL ...`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Drivers {
    /// Detects a driver from a connection URL's scheme.
    pub fn detect(url: &str) -> Self {
        let (scheme, _) = url.split_once(':').unwrap_or(("sqlite", ""));
        match scheme {
            "postgresql" | "postgres" => Drivers::Postgres,
            "mysql" => Drivers::MySQL,
            _ => Drivers::SQLite,
        }
    }

    /// Quotes an identifier (table or column name) per dialect.
    pub fn quote(&self, ident: &str) -> String {
        match self {
            Drivers::Postgres | Drivers::SQLite => format!("\"{}\"", ident),
            Drivers::MySQL => format!("`{}`", ident),
        }
    }

    /// Renders the Nth positional placeholder (1-indexed) for this dialect.
    pub fn placeholder(&self, position: usize) -> String {
        match self {
            Drivers::Postgres => format!("${}", position),
            Drivers::MySQL | Drivers::SQLite => "?".to_string(),
        }
    }

    /// Whether this dialect supports the given pessimistic lock mode.
    pub fn supports_lock_mode(&self, _mode: LockMode) -> bool {
        match self {
            Drivers::Postgres | Drivers::MySQL => true,
            Drivers::SQLite => false,
        }
    }

    /// Whether this dialect supports the given isolation level.
    pub fn supports_isolation_level(&self, _level: IsolationLevel) -> bool {
        match self {
            Drivers::Postgres | Drivers::MySQL => true,
            // SQLite serializes all writers regardless of the requested level.
            Drivers::SQLite => false,
        }
    }

    /// Whether this dialect supports `SAVEPOINT` for nested transactions.
    pub fn supports_savepoints(&self) -> bool {
        matches!(self, Drivers::Postgres | Drivers::MySQL | Drivers::SQLite)
    }

    /// Renders a `FOR ...` lock clause, or an empty string if unsupported.
    pub fn lock_clause(&self, mode: LockMode) -> &'static str {
        if !self.supports_lock_mode(mode) {
            return "";
        }
        match mode {
            LockMode::ForUpdate => " FOR UPDATE",
            LockMode::ForShare if matches!(self, Drivers::MySQL) => " LOCK IN SHARE MODE",
            LockMode::ForShare => " FOR SHARE",
            LockMode::ForUpdateSkipLocked => " FOR UPDATE SKIP LOCKED",
            LockMode::ForUpdateNoWait => " FOR UPDATE NOWAIT",
        }
    }

    /// Renders an isolation level clause suffix for `BEGIN`.
    pub fn isolation_clause(&self, level: IsolationLevel) -> String {
        let name = match level {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        };
        format!(" ISOLATION LEVEL {}", name)
    }
}

/// A builder for creating an `Adapter` with custom pool options.
#[derive(Debug)]
pub struct AdapterBuilder {
    options: AnyPoolOptions,
}

impl AdapterBuilder {
    /// Sets the maximum number of connections the pool should maintain.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.options = self.options.max_connections(max);
        self
    }

    /// Sets the minimum number of connections the pool should maintain.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.options = self.options.min_connections(min);
        self
    }

    /// Sets the maximum amount of time to wait for a connection checkout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.acquire_timeout(timeout);
        self
    }

    /// Sets the maximum amount of time a connection may sit idle.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.idle_timeout(Some(timeout));
        self
    }

    /// Sets the maximum lifetime of a pooled connection.
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.options = self.options.max_lifetime(Some(lifetime));
        self
    }

    /// Connects using the configured pool options.
    pub async fn connect(self, url: &str) -> Result<Adapter, Error> {
        sqlx::any::install_default_drivers();
        let pool = self.options.connect(url).await.map_err(Error::from_sqlx_classified)?;
        let driver = Drivers::detect(url);
        Ok(Adapter { pool, driver })
    }
}

/// A pooled, dialect-aware connection to a single database.
///
/// Every SQL statement the ORM issues eventually runs through an
/// `Adapter`'s pool. `Adapter` implements `Clone` cheaply (the pool is
/// internally `Arc`-backed)
/// so it can be stored in the connection registry and handed out freely.
#[derive(Debug, Clone)]
pub struct Adapter {
    pub(crate) pool: AnyPool,
    pub(crate) driver: Drivers,
}

impl Adapter {
    /// Creates a builder to configure pool options before connecting.
    pub fn builder() -> AdapterBuilder {
        AdapterBuilder { options: AnyPoolOptions::new() }
    }

    /// Connects with a default pool (max 5 connections).
    pub async fn connect(url: &str) -> Result<Self, Error> {
        Self::builder().max_connections(5).connect(url).await
    }

    /// The dialect this adapter speaks.
    pub fn driver(&self) -> Drivers {
        self.driver
    }

    /// Runs a `SELECT 1`-style liveness probe, used by the health monitor.
    pub async fn probe(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(Error::from_sqlx_classified)?;
        Ok(())
    }

    /// Number of connections currently checked out of the pool plus idle,
    /// i.e. the pool's live size — used for least-connections balancing and
    /// pool metrics reporting.
    pub fn pool_size(&self) -> u32 {
        self.pool.size()
    }

    /// Number of idle (not checked out) connections.
    pub fn idle_connections(&self) -> usize {
        self.pool.num_idle()
    }

    /// Starts building a query for a specific model.
    pub fn model<T: Model + Send + Sync + Unpin>(&self) -> QueryBuilder<'_, T, Self> {
        QueryBuilder::for_model(self.clone(), self.driver)
    }

    /// Opens a raw parameterized query, bypassing the model query builder.
    pub fn raw<'a>(&'a self, sql: &'a str) -> RawQuery<'a, Self> {
        RawQuery::new(self.clone(), sql)
    }

    /// Executes already-assembled SQL and hands back the undecoded rows,
    /// for callers that need to decode more than one `FromRow` type out of
    /// the same row (a joined `SELECT` spanning two models) — `RawQuery`
    /// assumes a single destination type.
    pub(crate) async fn fetch_any_rows(&self, sql: &str, args: AnyArguments<'_>) -> Result<Vec<AnyRow>, Error> {
        sqlx::query_with(sql, args).fetch_all(&self.pool).await.map_err(Error::from_sqlx_classified)
    }

    /// Creates the table for model `T` if it does not already exist. A
    /// production deployment is expected to provision schema separately;
    /// this is kept here for test fixtures and first-run setup, not as a
    /// migration DSL.
    pub async fn create_table<T: Model>(&self) -> Result<&Self, Error> {
        let table_name = T::table_name().to_snake_case();
        let columns = T::columns();
        let mut column_defs = Vec::new();
        let mut index_statements = Vec::new();

        for col in &columns {
            let col_name = col.name.strip_prefix("r#").unwrap_or(col.name).to_snake_case();
            let mut def = format!("{} {}", self.driver.quote(&col_name), col.sql_type);
            if col.is_primary_key {
                def.push_str(" PRIMARY KEY");
            }
            if !col.is_nullable && !col.is_primary_key {
                def.push_str(" NOT NULL");
            }
            if col.create_time {
                def.push_str(" DEFAULT CURRENT_TIMESTAMP");
            }
            if col.unique {
                def.push_str(" UNIQUE");
            }
            column_defs.push(def);

            if col.index {
                let index_type = if col.unique { "UNIQUE INDEX" } else { "INDEX" };
                let index_name = format!("idx_{}_{}", table_name, col_name);
                index_statements.push(format!(
                    "CREATE {} IF NOT EXISTS {} ON {} ({})",
                    index_type,
                    self.driver.quote(&index_name),
                    self.driver.quote(&table_name),
                    self.driver.quote(&col_name)
                ));
            }
        }

        if let Drivers::SQLite = self.driver {
            for col in &columns {
                if let (Some(f_table), Some(f_key)) = (col.foreign_table, col.foreign_key) {
                    let col_name = col.name.strip_prefix("r#").unwrap_or(col.name).to_snake_case();
                    column_defs.push(format!(
                        "FOREIGN KEY ({}) REFERENCES {} ({})",
                        self.driver.quote(&col_name),
                        self.driver.quote(&f_table.to_snake_case()),
                        self.driver.quote(&f_key.to_snake_case())
                    ));
                }
            }
        }

        let create_table_query =
            format!("CREATE TABLE IF NOT EXISTS {} ({})", self.driver.quote(&table_name), column_defs.join(", "));
        log::info!(target: "sql", "{}", create_table_query);
        sqlx::query(&create_table_query).execute(&self.pool).await.map_err(Error::from_sqlx_classified)?;

        for idx_stmt in index_statements {
            sqlx::query(&idx_stmt).execute(&self.pool).await.map_err(Error::from_sqlx_classified)?;
        }

        Ok(self)
    }

    /// Creates a `Migrator` to register and run schema bootstrap for
    /// multiple models in dependency order.
    pub fn migrator(&self) -> Migrator<'_> {
        Migrator::new(self)
    }

    /// Starts a new top-level transaction (see `transaction` module for
    /// savepoint-based nesting).
    pub async fn begin<'a>(&self) -> Result<Transaction<'a>, Error> {
        let tx = self.pool.begin().await.map_err(Error::from_sqlx_classified)?;
        Ok(Transaction::new(tx, self.driver))
    }

    /// Checks for and assigns foreign key constraints for model `T`.
    /// SQLite inlines FKs at `create_table` time, so this is a no-op there.
    pub async fn assign_foreign_keys<T: Model>(&self) -> Result<&Self, Error> {
        if let Drivers::SQLite = self.driver {
            return Ok(self);
        }

        let table_name = T::table_name().to_snake_case();
        for col in T::columns() {
            if let (Some(f_table), Some(f_key)) = (col.foreign_table, col.foreign_key) {
                let col_name = col.name.strip_prefix("r#").unwrap_or(col.name).to_snake_case();
                let constraint_name = format!("fk_{}_{}", table_name, col_name);

                let count: i64 = match self.driver {
                    Drivers::Postgres => {
                        let check = "SELECT count(*) FROM information_schema.table_constraints WHERE constraint_name = $1";
                        let row = sqlx::query(check)
                            .bind(&constraint_name)
                            .fetch_one(&self.pool)
                            .await
                            .map_err(Error::from_sqlx_classified)?;
                        row.try_get(0).unwrap_or(0)
                    }
                    Drivers::MySQL => {
                        let check = "SELECT count(*) FROM information_schema.TABLE_CONSTRAINTS WHERE CONSTRAINT_NAME = ? AND TABLE_SCHEMA = DATABASE()";
                        let row = sqlx::query(check)
                            .bind(&constraint_name)
                            .fetch_one(&self.pool)
                            .await
                            .map_err(Error::from_sqlx_classified)?;
                        row.try_get(0).unwrap_or(0)
                    }
                    Drivers::SQLite => 0,
                };

                if count > 0 {
                    continue;
                }

                let alter_query = format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                    self.driver.quote(&table_name),
                    self.driver.quote(&constraint_name),
                    self.driver.quote(&col_name),
                    self.driver.quote(&f_table.to_snake_case()),
                    self.driver.quote(&f_key.to_snake_case())
                );
                sqlx::query(&alter_query).execute(&self.pool).await.map_err(Error::from_sqlx_classified)?;
            }
        }

        Ok(self)
    }
}

/// A connection or transaction capable of producing a `sqlx` executor.
///
/// Abstracts over `Adapter` (pool) and `Transaction` so `QueryBuilder` can
/// work with either.
pub trait Connection {
    /// The executor type, lifetime-bound to the borrow of `self`.
    type Exec<'c>: sqlx::Executor<'c, Database = sqlx::Any>
    where
        Self: 'c;

    /// The dialect this connection speaks.
    fn driver(&self) -> Drivers;

    /// A mutable reference to the executor.
    fn executor<'c>(&'c mut self) -> Self::Exec<'c>;
}

impl Connection for Adapter {
    type Exec<'c> = &'c sqlx::Pool<sqlx::Any>;

    fn driver(&self) -> Drivers {
        self.driver
    }

    fn executor<'c>(&'c mut self) -> Self::Exec<'c> {
        &self.pool
    }
}

impl<'a> Connection for &'a mut Adapter {
    type Exec<'c>
        = &'c sqlx::Pool<sqlx::Any>
    where
        Self: 'c;

    fn driver(&self) -> Drivers {
        (**self).driver
    }

    fn executor<'c>(&'c mut self) -> Self::Exec<'c> {
        &self.pool
    }
}

/// A builder for raw SQL queries with parameter binding, bypassing the
/// model query builder for CTEs, window functions, or other SQL the
/// predicate tree cannot express.
pub struct RawQuery<'a, C> {
    conn: C,
    sql: &'a str,
    args: AnyArguments<'a>,
}

impl<'a, C> RawQuery<'a, C>
where
    C: Connection + Send,
{
    pub(crate) fn new(conn: C, sql: &'a str) -> Self {
        Self { conn, sql, args: AnyArguments::default() }
    }

    /// Binds a positional parameter.
    pub fn bind<T>(mut self, value: T) -> Self
    where
        T: 'a + sqlx::Encode<'a, sqlx::Any> + sqlx::Type<sqlx::Any> + Send + Sync,
    {
        let _ = self.args.add(value);
        self
    }

    /// Executes and maps every row to `T`.
    pub async fn fetch_all<T>(mut self) -> Result<Vec<T>, Error>
    where
        T: for<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> + Send + Unpin,
    {
        sqlx::query_as_with::<_, T, _>(self.sql, self.args)
            .fetch_all(self.conn.executor())
            .await
            .map_err(Error::from_sqlx_classified)
    }

    /// Executes and maps the first row to `T`, erroring if none match.
    pub async fn fetch_one<T>(mut self) -> Result<T, Error>
    where
        T: for<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> + Send + Unpin,
    {
        sqlx::query_as_with::<_, T, _>(self.sql, self.args)
            .fetch_one(self.conn.executor())
            .await
            .map_err(Error::from_sqlx_classified)
    }

    /// Executes and maps the first row to `T`, or `None` if no rows match.
    pub async fn fetch_optional<T>(mut self) -> Result<Option<T>, Error>
    where
        T: for<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> + Send + Unpin,
    {
        sqlx::query_as_with::<_, T, _>(self.sql, self.args)
            .fetch_optional(self.conn.executor())
            .await
            .map_err(Error::from_sqlx_classified)
    }

    /// Executes, returning a single scalar value (e.g. `SELECT count(*)`).
    pub async fn fetch_scalar<O>(mut self) -> Result<O, Error>
    where
        O: for<'r> sqlx::Decode<'r, sqlx::Any> + sqlx::Type<sqlx::Any> + Send + Unpin,
    {
        sqlx::query_scalar_with::<_, O, _>(self.sql, self.args)
            .fetch_one(self.conn.executor())
            .await
            .map_err(Error::from_sqlx_classified)
    }

    /// Executes a write statement, returning rows affected.
    pub async fn execute(mut self) -> Result<u64, Error> {
        let result =
            sqlx::query_with(self.sql, self.args).execute(self.conn.executor()).await.map_err(Error::from_sqlx_classified)?;
        Ok(result.rows_affected())
    }
}
