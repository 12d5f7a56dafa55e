//! # Query Builder
//!
//! `QueryBuilder<T, C>` accumulates WHERE/GROUP/HAVING/ORDER/LIMIT/OFFSET/LOCK
//! state immutably — every chain method consumes `self` and returns a new
//! value — then hands that state to the `Assembler` at execution time, over
//! a `Predicate` tree rather than opaque filter closures.

use std::marker::PhantomData;

use heck::ToSnakeCase;
use sqlx::any::AnyRow;
use sqlx::{Decode, FromRow, Type};

use crate::adapter::{Connection, Drivers, LockMode};
use crate::error::Error;
use crate::model::{ColumnInfo, ColumnValue, Model};
use crate::query::assembler::Assembler;
use crate::query::predicate::Predicate;
use crate::value_binding::bind_typed_value_or_string;

/// A composable, immutable query over model `T`, executed through
/// connection `C` (a pooled `Adapter` or an in-flight `Transaction`).
pub struct QueryBuilder<'a, T, C> {
    conn: C,
    driver: Drivers,
    table_name: &'static str,
    columns_info: Vec<ColumnInfo>,
    select_list: Vec<String>,
    where_pred: Option<Predicate>,
    group_by: Vec<String>,
    having: Option<Predicate>,
    order_by: Vec<(String, bool)>,
    limit: Option<i64>,
    offset: Option<i64>,
    lock_mode: Option<LockMode>,
    distinct: bool,
    annotation: Option<String>,
    _marker: PhantomData<(&'a (), T)>,
}

impl<'a, T, C> QueryBuilder<'a, T, C>
where
    T: Model,
{
    /// Starts a query for model `T` against connection `conn`.
    pub fn for_model(conn: C, driver: Drivers) -> Self {
        Self {
            conn,
            driver,
            table_name: T::table_name(),
            columns_info: T::columns(),
            select_list: Vec::new(),
            where_pred: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            lock_mode: None,
            distinct: false,
            annotation: None,
            _marker: PhantomData,
        }
    }

    fn table(&self) -> String {
        self.table_name.to_snake_case()
    }

    fn primary_key_column(&self) -> Result<&'static str, Error> {
        self.columns_info
            .iter()
            .find(|c| c.is_primary_key)
            .map(|c| c.name)
            .ok_or_else(|| Error::invalid_argument(format!("model {} declares no primary key", self.table_name)))
    }

    // ------------------------------------------------------------------
    // Chain methods (all consume and return `Self`)
    // ------------------------------------------------------------------

    /// Adds a predicate, combined with any existing one via `AND`.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.where_pred = Some(match self.where_pred {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Shorthand for `filter(Predicate::eq(column, value))`.
    pub fn equals(self, column: impl Into<String>, value: ColumnValue) -> Self {
        self.filter(Predicate::eq(column, value))
    }

    /// Appends an ORDER BY term.
    pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order_by.push((column.into(), ascending));
        self
    }

    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    /// Adds a HAVING predicate, combined via `AND`.
    pub fn having(mut self, predicate: Predicate) -> Self {
        self.having = Some(match self.having {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: i64) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn lock(mut self, mode: LockMode) -> Self {
        self.lock_mode = Some(mode);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Restricts the projection to the given columns (default: all).
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.select_list = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Attaches a SQL comment with no semantic effect, for tracing.
    pub fn annotate(mut self, comment: impl Into<String>) -> Self {
        self.annotation = Some(comment.into());
        self
    }

    fn assembler(&self) -> Assembler {
        Assembler::new(self.driver)
    }
}

impl<'a, T, C> QueryBuilder<'a, T, C>
where
    T: Model + for<'r> FromRow<'r, AnyRow> + Send + Unpin,
    C: Connection + Send,
{
    /// Materializes the query as a `Vec<T>`.
    pub async fn scan(mut self) -> Result<Vec<T>, Error> {
        let assembled = self.assembler().assemble_select(
            &self.table(),
            &self.select_list,
            self.where_pred.as_ref(),
            &self.group_by,
            self.having.as_ref(),
            &self.order_by,
            self.limit,
            self.offset,
            self.lock_mode,
            self.distinct,
            self.annotation.as_deref(),
        );
        let started = std::time::Instant::now();
        let rows = sqlx::query_as_with::<_, T, _>(&assembled.sql, assembled.args)
            .fetch_all(self.conn.executor())
            .await
            .map_err(Error::from_sqlx_classified)?;
        log::debug!(target: "query", "scan {} rows in {:?}", rows.len(), started.elapsed());
        Ok(rows)
    }

    /// Returns the first matching row, if any.
    pub async fn first(self) -> Result<Option<T>, Error> {
        let mut rows = self.limit(1).scan().await?;
        Ok(rows.pop())
    }

    /// Returns the single matching row. `NotFound` if zero, `NotUnique` if
    /// more than one.
    pub async fn sole(self) -> Result<T, Error> {
        let mut rows = self.limit(2).scan().await?;
        match rows.len() {
            0 => Err(Error::NotFound),
            1 => Ok(rows.pop().unwrap()),
            _ => Err(Error::NotUnique),
        }
    }

    /// Returns `true` if any row matches.
    pub async fn exists(self) -> Result<bool, Error> {
        Ok(self.first().await?.is_some())
    }

    /// Fetches keyset-paginated batches ordered by the primary key, largest
    /// batch `of` rows each. Ascending unless `descending` is set. `start`
    /// and `finish` bound the keyset scan to primary keys `>= start` and
    /// `<= finish` respectively (either or both may be omitted), regardless
    /// of scan direction. Batches are disjoint and their union is the full
    /// result set for the query as scoped before calling this method,
    /// restricted to `[start, finish]`.
    pub async fn in_batches(
        mut self,
        of: i64,
        start: Option<ColumnValue>,
        finish: Option<ColumnValue>,
        descending: bool,
    ) -> Result<Vec<Vec<T>>, Error>
    where
        C: Clone,
    {
        let pk = self.primary_key_column()?.to_string();
        let pk_sql_type = self.columns_info.iter().find(|c| c.is_primary_key).map(|c| c.sql_type).unwrap_or("TEXT");
        if let Some(s) = start {
            self = self.filter(Predicate::gte(pk.clone(), s));
        }
        if let Some(f) = finish {
            self = self.filter(Predicate::lte(pk.clone(), f));
        }
        let mut batches = Vec::new();
        let mut cursor: Option<ColumnValue> = None;
        loop {
            let mut page: QueryBuilder<'a, T, C> = QueryBuilder {
                conn: self.conn.clone(),
                driver: self.driver,
                table_name: self.table_name,
                columns_info: self.columns_info.clone(),
                select_list: self.select_list.clone(),
                where_pred: self.where_pred.clone(),
                group_by: self.group_by.clone(),
                having: self.having.clone(),
                order_by: vec![(pk.clone(), !descending)],
                limit: Some(of),
                offset: None,
                lock_mode: self.lock_mode,
                distinct: self.distinct,
                annotation: self.annotation.clone(),
                _marker: PhantomData,
            };
            if let Some(c) = cursor.clone() {
                let bound = if descending { Predicate::lt(pk.clone(), c) } else { Predicate::gt(pk.clone(), c) };
                page = page.filter(bound);
            }
            let rows = page.scan().await?;
            if rows.is_empty() {
                break;
            }
            let last = rows.last().unwrap().primary_key_values();
            batches.push(rows);
            let last_str = last.into_iter().next().unwrap_or_default();
            cursor = Some(ColumnValue::from_sql_str(&last_str, pk_sql_type));
            if batches.last().map(|b| b.len() as i64) != Some(of) {
                break;
            }
        }
        Ok(batches)
    }

    /// Iterates every row in batches of `batch_size`, invoking `f` once per
    /// row. A buffered convenience over `in_batches`; the full result set is
    /// never materialized at once on the Rust side since batches stream
    /// through `f` as they're fetched.
    pub async fn find_each<F>(self, batch_size: i64, mut f: F) -> Result<(), Error>
    where
        C: Clone,
        F: FnMut(T),
    {
        for batch in self.in_batches(batch_size, None, None, false).await? {
            for row in batch {
                f(row);
            }
        }
        Ok(())
    }

    /// Like `find_each`, but hands whole batches to `f`.
    pub async fn find_in_batches<F>(self, batch_size: i64, mut f: F) -> Result<(), Error>
    where
        C: Clone,
        F: FnMut(Vec<T>),
    {
        for batch in self.in_batches(batch_size, None, None, false).await? {
            f(batch);
        }
        Ok(())
    }
}

impl<'a, T, C> Clone for QueryBuilder<'a, T, C>
where
    C: Clone,
{
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            driver: self.driver,
            table_name: self.table_name,
            columns_info: self.columns_info.clone(),
            select_list: self.select_list.clone(),
            where_pred: self.where_pred.clone(),
            group_by: self.group_by.clone(),
            having: self.having.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            lock_mode: self.lock_mode,
            distinct: self.distinct,
            annotation: self.annotation.clone(),
            _marker: PhantomData,
        }
    }
}

impl<'a, T, C> QueryBuilder<'a, T, C>
where
    T: Model,
    C: Connection + Send,
{
    /// Scalar aggregate helper shared by `count`/`sum`/`avg`/`min`/`max`.
    async fn scalar_aggregate<O>(self, expr: String) -> Result<O, Error>
    where
        O: for<'r> Decode<'r, sqlx::Any> + Type<sqlx::Any> + Send + Unpin,
    {
        let mut this = self;
        this.select_list = vec![expr];
        this.distinct = false;
        let assembled = this.assembler().assemble_select(
            &this.table(),
            &this.select_list,
            this.where_pred.as_ref(),
            &this.group_by,
            this.having.as_ref(),
            &[],
            None,
            None,
            None,
            false,
            this.annotation.as_deref(),
        );
        sqlx::query_scalar_with::<_, O, _>(&assembled.sql, assembled.args)
            .fetch_one(this.conn.executor())
            .await
            .map_err(Error::from_sqlx_classified)
    }

    pub async fn count(self) -> Result<i64, Error> {
        let driver = self.driver;
        self.scalar_aggregate(format!("COUNT(*) AS {}", driver.quote("count"))).await
    }

    pub async fn sum<O>(self, column: &str) -> Result<O, Error>
    where
        O: for<'r> Decode<'r, sqlx::Any> + Type<sqlx::Any> + Send + Unpin,
    {
        let quoted = self.driver.quote(column);
        self.scalar_aggregate(format!("SUM({})", quoted)).await
    }

    pub async fn avg<O>(self, column: &str) -> Result<O, Error>
    where
        O: for<'r> Decode<'r, sqlx::Any> + Type<sqlx::Any> + Send + Unpin,
    {
        let quoted = self.driver.quote(column);
        self.scalar_aggregate(format!("AVG({})", quoted)).await
    }

    pub async fn min<O>(self, column: &str) -> Result<O, Error>
    where
        O: for<'r> Decode<'r, sqlx::Any> + Type<sqlx::Any> + Send + Unpin,
    {
        let quoted = self.driver.quote(column);
        self.scalar_aggregate(format!("MIN({})", quoted)).await
    }

    pub async fn max<O>(self, column: &str) -> Result<O, Error>
    where
        O: for<'r> Decode<'r, sqlx::Any> + Type<sqlx::Any> + Send + Unpin,
    {
        let quoted = self.driver.quote(column);
        self.scalar_aggregate(format!("MAX({})", quoted)).await
    }

    /// Column-only projection across every matching row.
    pub async fn pluck<O>(self, column: &str) -> Result<Vec<O>, Error>
    where
        O: for<'r> Decode<'r, sqlx::Any> + Type<sqlx::Any> + Send + Unpin,
    {
        let mut this = self;
        this.select_list = vec![column.to_string()];
        let assembled = this.assembler().assemble_select(
            &this.table(),
            &this.select_list,
            this.where_pred.as_ref(),
            &this.group_by,
            this.having.as_ref(),
            &this.order_by,
            this.limit,
            this.offset,
            this.lock_mode,
            this.distinct,
            this.annotation.as_deref(),
        );
        sqlx::query_scalar_with::<_, O, _>(&assembled.sql, assembled.args)
            .fetch_all(this.conn.executor())
            .await
            .map_err(Error::from_sqlx_classified)
    }

    /// `pluck` restricted to (at most) the first row.
    pub async fn pick<O>(self, column: &str) -> Result<Option<O>, Error>
    where
        O: for<'r> Decode<'r, sqlx::Any> + Type<sqlx::Any> + Send + Unpin,
    {
        let mut rows = self.limit(1).pluck::<O>(column).await?;
        Ok(rows.pop())
    }

    /// Updates every matching row, setting the given `(column, value)` pairs
    /// in a single SQL statement.
    pub async fn update_all(self, assignments: Vec<(String, ColumnValue)>) -> Result<u64, Error> {
        let driver = self.driver;
        let table = self.table();
        let assembler = self.assembler();
        let mut args = sqlx::any::AnyArguments::default();
        let mut idx = 1usize;
        let set_clause = assignments
            .iter()
            .map(|(col, val)| {
                let ph = driver.placeholder(idx);
                idx += 1;
                crate::value_binding::bind_column_value(&mut args, val, &driver);
                format!("{} = {}", driver.quote(col), ph)
            })
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("UPDATE {} SET {}", driver.quote(&table), set_clause);
        if let Some(pred) = &self.where_pred {
            sql.push_str(" WHERE ");
            sql.push_str(&assembler.render_where(pred, &mut args, &mut idx));
        }
        let mut conn = self.conn;
        let result = sqlx::query_with(&sql, args).execute(conn.executor()).await.map_err(Error::from_sqlx_classified)?;
        Ok(result.rows_affected())
    }

    /// Deletes every matching row in a single SQL statement.
    pub async fn delete_all(self) -> Result<u64, Error> {
        let driver = self.driver;
        let table = self.table();
        let assembler = self.assembler();
        let mut sql = format!("DELETE FROM {}", driver.quote(&table));
        let mut args = sqlx::any::AnyArguments::default();
        if let Some(pred) = &self.where_pred {
            let mut idx = 1usize;
            sql.push_str(" WHERE ");
            sql.push_str(&assembler.render_where(pred, &mut args, &mut idx));
        }
        let mut conn = self.conn;
        let result = sqlx::query_with(&sql, args).execute(conn.executor()).await.map_err(Error::from_sqlx_classified)?;
        Ok(result.rows_affected())
    }

    /// Sets the given columns to `time` for every matching row.
    pub async fn touch_all(self, columns: &[&str], time: chrono::DateTime<chrono::Utc>) -> Result<u64, Error> {
        let assignments =
            columns.iter().map(|c| (c.to_string(), ColumnValue::DateTimeUtc(time))).collect::<Vec<_>>();
        self.update_all(assignments).await
    }

    /// Inserts a single model instance, binding every active column from its
    /// `to_map()` snapshot, resolved off `ColumnInfo.sql_type` via
    /// `ValueBinder::bind_value` rather than relying on `sqlx`'s static
    /// `Encode` per field.
    pub async fn insert(mut self, instance: &T) -> Result<u64, Error> {
        let table = self.table();
        let map = instance.to_map();
        let columns: Vec<&ColumnInfo> = self.columns_info.iter().filter(|c| map.contains_key(c.name)).collect();

        let col_names: Vec<String> =
            columns.iter().map(|c| self.driver.quote(c.name.strip_prefix("r#").unwrap_or(c.name))).collect();
        let mut args = sqlx::any::AnyArguments::default();
        let mut placeholders = Vec::with_capacity(columns.len());
        for (i, col) in columns.iter().enumerate() {
            placeholders.push(self.driver.placeholder(i + 1));
            let value = map.get(col.name).expect("filtered above");
            bind_typed_value_or_string(&mut args, value, col.sql_type, &self.driver);
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.driver.quote(&table),
            col_names.join(", "),
            placeholders.join(", ")
        );
        log::debug!(target: "sql", "{}", sql);
        let result =
            sqlx::query_with(&sql, args).execute(self.conn.executor()).await.map_err(Error::from_sqlx_classified)?;
        Ok(result.rows_affected())
    }

    /// Updates a single model instance by primary key, setting only the
    /// columns present in `changed`. Returns the rows affected (0 means the
    /// primary key did not match any row, or — with optimistic locking — a
    /// stale `lock_version`; callers distinguish these via `base::save!`).
    pub async fn update_by_pk(self, instance: &T, changed: &[&str]) -> Result<u64, Error> {
        let pk_col = self.primary_key_column()?;
        let map = instance.to_map();
        let pk_value =
            map.get(pk_col).ok_or_else(|| Error::invalid_argument("primary key missing from to_map()"))?.clone();

        let set_cols: Vec<&ColumnInfo> =
            self.columns_info.iter().filter(|c| !c.is_primary_key && changed.contains(&c.name)).collect();
        if set_cols.is_empty() {
            return Ok(0);
        }

        let mut args = sqlx::any::AnyArguments::default();
        let mut idx = 1usize;
        let mut set_clauses = Vec::with_capacity(set_cols.len());
        for col in &set_cols {
            let ph = self.driver.placeholder(idx);
            idx += 1;
            let value = map.get(col.name).cloned().unwrap_or_default();
            bind_typed_value_or_string(&mut args, &value, col.sql_type, &self.driver);
            set_clauses.push(format!("{} = {}", self.driver.quote(col.name.strip_prefix("r#").unwrap_or(col.name)), ph));
        }
        let pk_placeholder = self.driver.placeholder(idx);
        let pk_sql_type = self.columns_info.iter().find(|c| c.is_primary_key).map(|c| c.sql_type).unwrap_or("TEXT");
        bind_typed_value_or_string(&mut args, &pk_value, pk_sql_type, &self.driver);

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.driver.quote(&self.table()),
            set_clauses.join(", "),
            self.driver.quote(pk_col),
            pk_placeholder
        );
        let mut conn = self.conn;
        let result = sqlx::query_with(&sql, args).execute(conn.executor()).await.map_err(Error::from_sqlx_classified)?;
        Ok(result.rows_affected())
    }

    /// Deletes a single model instance by primary key.
    pub async fn delete_by_pk(self, instance: &T) -> Result<u64, Error> {
        let pk_col = self.primary_key_column()?;
        let pk_value = instance
            .primary_key_values()
            .into_iter()
            .next()
            .ok_or_else(|| Error::invalid_argument("primary key missing"))?;
        let pk_sql_type = self.columns_info.iter().find(|c| c.is_primary_key).map(|c| c.sql_type).unwrap_or("TEXT");
        let pred = Predicate::eq(pk_col, ColumnValue::from_sql_str(&pk_value, pk_sql_type));
        self.filter(pred).delete_all().await
    }
}
