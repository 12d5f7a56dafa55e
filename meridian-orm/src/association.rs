//! # Association Graph
//!
//! `belongs_to`/`has_one`/`has_many` resolution, `:through` joins,
//! polymorphic `belongs_to`, dependent destroy/nullify, and N+1-avoiding
//! eager loading, built on top of the query builder and predicate tree.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use heck::ToSnakeCase;
use sqlx::any::AnyRow;
use sqlx::FromRow;
use tokio::sync::RwLock;

use crate::adapter::Adapter;
use crate::base::Base;
use crate::dirty::Tracked;
use crate::error::Error;
use crate::model::{ColumnValue, Model};
use crate::query::assembler::Assembler;
use crate::query::predicate::Predicate;

/// What kind of relationship an `AssociationDescriptor` declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    BelongsTo,
    HasOne,
    HasMany,
}

/// What happens to associated rows when the owner is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependentStrategy {
    /// Leave associated rows untouched.
    None,
    /// Load every child and call destroy on each so callbacks run.
    Destroy,
    /// Issue a single `UPDATE` setting the FK (and type column, if
    /// polymorphic) to `NULL`.
    Nullify,
}

/// `has_many :through` join parameters: the target is reached by way of an
/// intermediate join table.
#[derive(Debug, Clone)]
pub struct ThroughSpec {
    /// The join (through) table name.
    pub join_table: &'static str,
    /// Column on the join table referencing the owner's primary key.
    pub join_owner_key: &'static str,
    /// Column on the join table referencing the target's primary key.
    pub join_target_key: &'static str,
}

/// Declares one edge of the association graph.
#[derive(Debug, Clone)]
pub struct AssociationDescriptor {
    pub name: &'static str,
    pub kind: AssociationKind,
    /// FK column name. On the owning side for `belongs_to`; on the target
    /// side for `has_one`/`has_many`.
    pub foreign_key: &'static str,
    /// PK column referenced by `foreign_key`. Defaults to the referenced
    /// model's primary key if not overridden.
    pub primary_key: &'static str,
    pub through: Option<ThroughSpec>,
    pub polymorphic: bool,
    /// `x_type` column name, required when `polymorphic` is set.
    pub type_column: Option<&'static str>,
    /// The concrete type name this side of a polymorphic association
    /// identifies as, written into `type_column` on save.
    pub polymorphic_as: Option<&'static str>,
    pub dependent: DependentStrategy,
    /// Whether a `belongs_to` may have no target (nullable FK).
    pub optional: bool,
}

impl AssociationDescriptor {
    pub fn belongs_to(name: &'static str, foreign_key: &'static str, primary_key: &'static str) -> Self {
        Self {
            name,
            kind: AssociationKind::BelongsTo,
            foreign_key,
            primary_key,
            through: None,
            polymorphic: false,
            type_column: None,
            polymorphic_as: None,
            dependent: DependentStrategy::None,
            optional: false,
        }
    }

    pub fn has_one(name: &'static str, foreign_key: &'static str, primary_key: &'static str) -> Self {
        Self {
            name,
            kind: AssociationKind::HasOne,
            foreign_key,
            primary_key,
            through: None,
            polymorphic: false,
            type_column: None,
            polymorphic_as: None,
            dependent: DependentStrategy::None,
            optional: true,
        }
    }

    pub fn has_many(name: &'static str, foreign_key: &'static str, primary_key: &'static str) -> Self {
        Self {
            name,
            kind: AssociationKind::HasMany,
            foreign_key,
            primary_key,
            through: None,
            polymorphic: false,
            type_column: None,
            polymorphic_as: None,
            dependent: DependentStrategy::None,
            optional: true,
        }
    }

    pub fn through(mut self, spec: ThroughSpec) -> Self {
        self.through = Some(spec);
        self
    }

    pub fn polymorphic_as(mut self, type_column: &'static str, as_type: &'static str) -> Self {
        self.polymorphic = true;
        self.type_column = Some(type_column);
        self.polymorphic_as = Some(as_type);
        self
    }

    pub fn dependent(mut self, strategy: DependentStrategy) -> Self {
        self.dependent = strategy;
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }
}

/// Resolves a `belongs_to` for a single owner. Returns `None` if the FK is
/// null or no matching row exists.
pub async fn load_belongs_to<Related>(
    adapter: &Adapter,
    fk_value: Option<&ColumnValue>,
    desc: &AssociationDescriptor,
) -> Result<Option<Related>, Error>
where
    Related: Model + for<'r> FromRow<'r, AnyRow> + Send + Unpin,
{
    let Some(value) = fk_value else { return Ok(None) };
    if value.is_null() {
        return Ok(None);
    }
    adapter.model::<Related>().equals(desc.primary_key, value.clone()).first().await
}

/// Resolves a `has_one` for a single owner: first matching row where the
/// target's FK equals the owner's PK.
pub async fn load_has_one<Related>(
    adapter: &Adapter,
    owner_pk: &ColumnValue,
    desc: &AssociationDescriptor,
) -> Result<Option<Related>, Error>
where
    Related: Model + for<'r> FromRow<'r, AnyRow> + Send + Unpin,
{
    adapter.model::<Related>().equals(desc.foreign_key, owner_pk.clone()).first().await
}

/// Resolves a `has_many` for a single owner via a single `WHERE fk = pk`
/// query.
pub async fn load_has_many<Related>(
    adapter: &Adapter,
    owner_pk: &ColumnValue,
    desc: &AssociationDescriptor,
) -> Result<Vec<Related>, Error>
where
    Related: Model + for<'r> FromRow<'r, AnyRow> + Send + Unpin,
{
    adapter.model::<Related>().equals(desc.foreign_key, owner_pk.clone()).scan().await
}

/// Resolves a `has_many :through` for a single owner: joins the through
/// table on the target's PK, filtered by the owner's PK on the join table's
/// owner-key column.
pub async fn load_has_many_through<Related>(
    adapter: &Adapter,
    owner_pk: &ColumnValue,
    desc: &AssociationDescriptor,
) -> Result<Vec<Related>, Error>
where
    Related: Model + for<'r> FromRow<'r, AnyRow> + Send + Unpin,
{
    let through = desc.through.as_ref().ok_or_else(|| Error::invalid_argument("association has no :through spec"))?;
    let driver = adapter.driver();
    let target_table = Related::table_name().to_snake_case();
    let target_pk = Related::primary_key_columns().into_iter().next().unwrap_or(desc.primary_key);

    let sql = format!(
        "SELECT t.* FROM {target} t INNER JOIN {through} j ON j.{join_target} = t.{target_pk} WHERE j.{join_owner} = {ph}",
        target = driver.quote(&target_table),
        through = driver.quote(through.join_table),
        join_target = driver.quote(through.join_target_key),
        target_pk = driver.quote(target_pk),
        join_owner = driver.quote(through.join_owner_key),
        ph = driver.placeholder(1),
    );

    // The join-table FK is bound through its string form, consistent with
    // how every other dynamically-typed column value binds (`ValueBinder`).
    let owner_pk_str = owner_pk.as_db_string().unwrap_or_default();
    adapter.raw(&sql).bind(owner_pk_str).fetch_all::<Related>().await
}

/// Eager-loads a `has_many`/`has_one` for every owner in `owners` with a
/// single `WHERE fk IN (...)` query, then buckets rows back to their owner
/// by FK value — the "separate queries" strategy that is the default for
/// `includes` (as opposed to `eager_load`'s single LEFT OUTER JOIN).
/// Returns a map from the owner's PK (as a string) to its matching rows.
pub async fn eager_load_has_many<Related>(
    adapter: &Adapter,
    owner_pks: &[ColumnValue],
    desc: &AssociationDescriptor,
) -> Result<HashMap<String, Vec<Related>>, Error>
where
    Related: Model + for<'r> FromRow<'r, AnyRow> + Send + Unpin,
{
    if owner_pks.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = adapter
        .model::<Related>()
        .filter(Predicate::in_list(desc.foreign_key, owner_pks.to_vec()))
        .scan()
        .await?;

    let mut buckets: HashMap<String, Vec<Related>> = HashMap::new();
    for row in rows {
        let map = row.to_map();
        if let Some(key) = map.get(desc.foreign_key).cloned() {
            buckets.entry(key).or_default().push(row);
        }
    }
    Ok(buckets)
}

/// Eager-loads a `has_many`/`has_one` with a single `LEFT OUTER JOIN` plus
/// `DISTINCT` — `eager_load`'s strategy, as opposed to `includes`'s two
/// separate queries (`eager_load_has_many` above). One `SELECT` returns
/// every matching owner row alongside its related rows (or no related row
/// at all, on the join's `NULL` side); owner and related columns are
/// aliased `{table}__{column}` the same way a plain single-table query is,
/// so `Owner::from_row`/`Related::from_row` each decode their own half of
/// the joined row. A related side that decodes as `Err` (every related
/// column `NULL`, since the owner had no match) is treated as "no row",
/// not propagated as a fault.
pub async fn eager_load_joined<Owner, Related>(
    adapter: &Adapter,
    owner_scope: Option<&Predicate>,
    desc: &AssociationDescriptor,
) -> Result<Vec<(Owner, Vec<Related>)>, Error>
where
    Owner: Model + for<'r> FromRow<'r, AnyRow> + Send + Unpin,
    Related: Model + for<'r> FromRow<'r, AnyRow> + Send + Unpin,
{
    let driver = adapter.driver();
    let owner_table = Owner::table_name().to_snake_case();
    let related_table = Related::table_name().to_snake_case();
    let owner_pk = Owner::primary_key_columns()
        .into_iter()
        .next()
        .ok_or_else(|| Error::invalid_argument(format!("model {} declares no primary key", Owner::table_name())))?;

    let aliased = |table: &str, columns: Vec<crate::model::ColumnInfo>| -> Vec<String> {
        columns
            .iter()
            .map(|c| {
                let raw = c.name.strip_prefix("r#").unwrap_or(c.name);
                format!("{}.{} AS {}", driver.quote(table), driver.quote(raw), driver.quote(&format!("{}__{}", table, raw)))
            })
            .collect()
    };
    let owner_cols = aliased(&owner_table, Owner::columns());
    let related_cols = aliased(&related_table, Related::columns());

    let mut sql = format!(
        "SELECT DISTINCT {}, {} FROM {} LEFT OUTER JOIN {} ON {}.{} = {}.{}",
        owner_cols.join(", "),
        related_cols.join(", "),
        driver.quote(&owner_table),
        driver.quote(&related_table),
        driver.quote(&related_table),
        driver.quote(desc.foreign_key),
        driver.quote(&owner_table),
        driver.quote(owner_pk),
    );

    let assembler = Assembler::new(driver);
    let mut args = sqlx::any::AnyArguments::default();
    let mut idx = 1usize;
    if let Some(pred) = owner_scope {
        sql.push_str(" WHERE ");
        sql.push_str(&assembler.render_where(pred, &mut args, &mut idx));
    }
    sql.push_str(&format!(" ORDER BY {}.{}", driver.quote(&owner_table), driver.quote(owner_pk)));

    let rows = adapter.fetch_any_rows(&sql, args).await?;

    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, (Owner, Vec<Related>)> = HashMap::new();
    for row in &rows {
        let owner = Owner::from_row(row).map_err(Error::from_sqlx_classified)?;
        let owner_key = owner
            .to_map()
            .get(owner_pk)
            .cloned()
            .ok_or_else(|| Error::invalid_argument("owner row missing its primary key"))?;
        if !grouped.contains_key(&owner_key) {
            order.push(owner_key.clone());
            grouped.insert(owner_key.clone(), (owner, Vec::new()));
        }
        if let Ok(related) = Related::from_row(row) {
            grouped.get_mut(&owner_key).expect("just inserted").1.push(related);
        }
    }

    Ok(order.into_iter().filter_map(|k| grouped.remove(&k)).collect())
}

/// Pre-populates a `belongs_to` inverse on freshly loaded children — the
/// in-memory counterpart to Rails' `:inverse_of`, avoiding a redundant
/// query if the owner is accessed again from the child side. `Model` has
/// no generic field setter, so the caller supplies `setter` to reach into
/// `Related`'s own field; this issues no SQL.
pub fn populate_inverse<Owner: Clone, Related>(owner: &Owner, children: &mut [Related], setter: impl Fn(&mut Related, Owner)) {
    for child in children.iter_mut() {
        setter(child, owner.clone());
    }
}

/// Cascades a `dependent: destroy` on parent removal: loads every child
/// matching `fk = owner_pk` and calls `destroy` on each through `base`, so
/// `before_destroy`/`after_destroy` callbacks on `Related` actually run
/// (a raw `DELETE` has no access to `Related`'s `CallbackRegistry`).
pub async fn cascade_destroy<Related>(
    base: &Base<'_, Related>,
    owner_pk: &ColumnValue,
    desc: &AssociationDescriptor,
) -> Result<u64, Error>
where
    Related: Model + Clone + for<'r> FromRow<'r, AnyRow> + Send + Sync + Unpin + 'static,
{
    let adapter = base.read_adapter().await?;
    let children = load_has_many::<Related>(&adapter, owner_pk, desc).await?;
    let mut destroyed = 0u64;
    for child in children {
        let mut tracked = Tracked::loaded(child);
        if base.destroy(&mut tracked).await? {
            destroyed += 1;
        }
    }
    Ok(destroyed)
}

/// Cascades a `dependent: nullify` on parent removal: a single `UPDATE`
/// setting the FK (and type column, for polymorphic associations) to
/// `NULL` for every matching child.
pub async fn cascade_nullify<Related>(
    adapter: &Adapter,
    owner_pk: &ColumnValue,
    desc: &AssociationDescriptor,
) -> Result<u64, Error>
where
    Related: Model + for<'r> FromRow<'r, AnyRow> + Send + Unpin,
{
    let mut assignments = vec![(desc.foreign_key.to_string(), ColumnValue::Null)];
    if let Some(type_col) = desc.type_column {
        assignments.push((type_col.to_string(), ColumnValue::Null));
    }
    adapter
        .model::<Related>()
        .equals(desc.foreign_key, owner_pk.clone())
        .update_all(assignments)
        .await
}

/// Resolves a polymorphic `belongs_to` through the process-wide type
/// registry, mapping `x_type` to the concrete model's loader.
/// Type-erased: `register` captures the
/// concrete `Related` type once per model at declaration time, and `resolve`
/// hands back the loaded instance as `Box<dyn Any + Send>` for the caller to
/// downcast.
#[derive(Clone)]
pub struct PolymorphicRegistry {
    loaders: Arc<RwLock<HashMap<String, PolymorphicLoader>>>,
}

type PolymorphicLoader = Arc<dyn Fn(Adapter, ColumnValue) -> BoxFuture<'static, Result<Option<Box<dyn Any + Send>>, Error>> + Send + Sync>;

impl PolymorphicRegistry {
    pub fn new() -> Self {
        Self { loaders: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Registers the loader for `type_name`, normally called once per model
    /// at process startup, when each model's association declarations run.
    pub async fn register<Related>(&self, type_name: impl Into<String>, primary_key: &'static str)
    where
        Related: Model + for<'r> FromRow<'r, AnyRow> + Send + Unpin + 'static,
    {
        let loader: PolymorphicLoader = Arc::new(move |adapter, fk_value| {
            Box::pin(async move {
                let found: Option<Related> = adapter.model::<Related>().equals(primary_key, fk_value).first().await?;
                Ok(found.map(|r| Box::new(r) as Box<dyn Any + Send>))
            })
        });
        self.loaders.write().await.insert(type_name.into(), loader);
    }

    /// Resolves `(type_name, fk_value)` to a boxed instance of whatever
    /// model was registered under `type_name`. Callers downcast with
    /// `.downcast::<Related>()`. An unregistered `type_name` is not an
    /// error — it resolves to `None`, the same as a matching registration
    /// whose row is simply absent.
    pub async fn resolve(
        &self,
        adapter: &Adapter,
        type_name: &str,
        fk_value: ColumnValue,
    ) -> Result<Option<Box<dyn Any + Send>>, Error> {
        let loaders = self.loaders.read().await;
        let Some(loader) = loaders.get(type_name) else {
            return Ok(None);
        };
        loader(adapter.clone(), fk_value).await
    }
}

impl Default for PolymorphicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A Rails-style `has_many`/`has_one` collection proxy: every operation is
/// scoped to rows whose `foreign_key` equals the owning record's primary
/// key, and writes run through a `Base<Related>` so `create`/`destroy_all`
/// get the same validation and callback pipeline a direct `Base` call
/// would. Built fresh per access (there is no persistent per-instance
/// handle the way a Ruby object's association cache lives on `self`).
pub struct AssociationCollection<'a, Related: Model> {
    base: Base<'a, Related>,
    foreign_key: &'static str,
    owner_pk: ColumnValue,
}

impl<'a, Related> AssociationCollection<'a, Related>
where
    Related: Model + Clone + for<'r> FromRow<'r, AnyRow> + Send + Sync + Unpin + 'static,
{
    pub fn new(base: Base<'a, Related>, desc: &AssociationDescriptor, owner_pk: ColumnValue) -> Self {
        Self { base, foreign_key: desc.foreign_key, owner_pk }
    }

    fn scope(&self) -> Predicate {
        Predicate::eq(self.foreign_key, self.owner_pk.clone())
    }

    /// Wraps a new, unsaved `Related` for dirty tracking — no SQL. The
    /// foreign key (and, for a polymorphic association, the type column)
    /// still need setting on `instance` by the caller first: `Model` is a
    /// plain struct with no generic field setter, so `build` cannot reach
    /// in and set it the way Ruby's open attribute hash would.
    pub fn build(&self, instance: Related) -> Tracked<Related> {
        self.base.new_record(instance)
    }

    /// Builds and immediately saves. Mirrors `Base::create`: always
    /// returns the instance, saved or not; callers inspect
    /// `tracked.is_new_record()` for the outcome.
    pub async fn create(&self, instance: Related) -> Result<Tracked<Related>, Error> {
        self.base.create(instance).await
    }

    pub async fn create_bang(&self, instance: Related) -> Result<Tracked<Related>, Error> {
        self.base.create_bang(instance).await
    }

    /// Loads every matching child and calls `destroy` on each, so
    /// `before_destroy`/`after_destroy` callbacks run — the `dependent:
    /// :destroy` strategy, scoped to just this owner.
    pub async fn destroy_all(&self) -> Result<u64, Error> {
        let adapter = self.base.read_adapter().await?;
        let children: Vec<Related> = adapter.model::<Related>().filter(self.scope()).scan().await?;
        let mut destroyed = 0u64;
        for child in children {
            let mut tracked = Tracked::loaded(child);
            if self.base.destroy(&mut tracked).await? {
                destroyed += 1;
            }
        }
        Ok(destroyed)
    }

    /// Deletes every matching child in one `DELETE` statement, running no
    /// callbacks — the `dependent: :delete_all` distinction from
    /// `destroy_all`.
    pub async fn delete_all(&self) -> Result<u64, Error> {
        let adapter = self.base.read_adapter().await?;
        adapter.model::<Related>().filter(self.scope()).delete_all().await
    }

    fn primary_key_column(&self) -> Result<&'static str, Error> {
        Related::primary_key_columns()
            .into_iter()
            .next()
            .ok_or_else(|| Error::invalid_argument(format!("model {} declares no primary key", Related::table_name())))
    }

    pub async fn find(&self, pk: &str) -> Result<Option<Tracked<Related>>, Error> {
        let pk_col = self.primary_key_column()?;
        let pk_sql_type = Related::columns().into_iter().find(|c| c.name == pk_col).map(|c| c.sql_type).unwrap_or("TEXT");
        let adapter = self.base.read_adapter().await?;
        let row = adapter
            .model::<Related>()
            .filter(self.scope())
            .filter(Predicate::eq(pk_col, ColumnValue::from_sql_str(pk, pk_sql_type)))
            .first()
            .await?;
        Ok(row.map(Tracked::loaded))
    }

    pub async fn find_bang(&self, pk: &str) -> Result<Tracked<Related>, Error> {
        self.find(pk).await?.ok_or(Error::NotFound)
    }

    pub async fn find_by(&self, field: &str, value: ColumnValue) -> Result<Option<Tracked<Related>>, Error> {
        let adapter = self.base.read_adapter().await?;
        let row = adapter.model::<Related>().filter(self.scope()).filter(Predicate::eq(field, value)).first().await?;
        Ok(row.map(Tracked::loaded))
    }

    pub async fn find_by_bang(&self, field: &str, value: ColumnValue) -> Result<Tracked<Related>, Error> {
        self.find_by(field, value).await?.ok_or(Error::NotFound)
    }

    /// Every matching row, additionally filtered by a raw `clause` (using
    /// `?` placeholders bound positionally to `params`, the same escape
    /// hatch `Predicate::raw` offers anywhere else in the query layer).
    pub async fn all(&self, clause: Option<&str>, params: Vec<ColumnValue>) -> Result<Vec<Related>, Error> {
        let adapter = self.base.read_adapter().await?;
        let mut query = adapter.model::<Related>().filter(self.scope());
        if let Some(clause) = clause {
            query = query.filter(Predicate::raw(clause, params));
        }
        query.scan().await
    }

    /// Fetches this proxy's full result set once and hands back a
    /// `LoadedAssociationCollection` caching it — `association_loaded?`'s
    /// underlying cache. Further reads of the returned value issue no SQL.
    pub async fn load(&self) -> Result<LoadedAssociationCollection<Related>, Error> {
        let records = self.all(None, Vec::new()).await?;
        Ok(LoadedAssociationCollection { records })
    }
}

/// The cached result of `AssociationCollection::load`. `loaded()` is
/// always `true` on a value of this type — existing at all is the proof
/// of having loaded, in place of a boolean flag next to an `Option` target
/// a Ruby object would carry on itself.
pub struct LoadedAssociationCollection<Related> {
    records: Vec<Related>,
}

impl<Related> LoadedAssociationCollection<Related> {
    pub fn loaded(&self) -> bool {
        true
    }

    pub fn records(&self) -> &[Related] {
        &self.records
    }

    pub fn into_inner(self) -> Vec<Related> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn belongs_to_builder_defaults_to_required() {
        let desc = AssociationDescriptor::belongs_to("author", "author_id", "id");
        assert!(!desc.optional);
        assert_eq!(desc.kind, AssociationKind::BelongsTo);
    }

    #[test]
    fn has_many_through_attaches_join_spec() {
        let desc = AssociationDescriptor::has_many("tags", "taggable_id", "id").through(ThroughSpec {
            join_table: "taggings",
            join_owner_key: "taggable_id",
            join_target_key: "tag_id",
        });
        assert!(desc.through.is_some());
    }

    #[test]
    fn polymorphic_as_sets_type_column() {
        let desc = AssociationDescriptor::belongs_to("commentable", "commentable_id", "id")
            .polymorphic_as("commentable_type", "Post");
        assert!(desc.polymorphic);
        assert_eq!(desc.type_column, Some("commentable_type"));
        assert_eq!(desc.polymorphic_as, Some("Post"));
    }

    #[tokio::test]
    async fn polymorphic_registry_resolves_unknown_type_to_none() {
        let registry = PolymorphicRegistry::new();
        let adapter = Adapter::builder().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let result = registry.resolve(&adapter, "Missing", ColumnValue::I64(1)).await.unwrap();
        assert!(result.is_none());
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Comment {
        id: i32,
        post_id: i32,
        body: String,
    }

    impl Model for Comment {
        fn table_name() -> &'static str {
            "comment"
        }

        fn columns() -> Vec<crate::model::ColumnInfo> {
            let col = |name, sql_type, is_primary_key| crate::model::ColumnInfo {
                name,
                sql_type,
                is_primary_key,
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
            };
            vec![col("id", "INTEGER", true), col("post_id", "INTEGER", false), col("body", "TEXT", false)]
        }

        fn active_columns() -> Vec<&'static str> {
            vec!["id", "post_id", "body"]
        }

        fn to_map(&self) -> HashMap<String, String> {
            let mut m = HashMap::new();
            m.insert("id".to_string(), self.id.to_string());
            m.insert("post_id".to_string(), self.post_id.to_string());
            m.insert("body".to_string(), self.body.clone());
            m
        }
    }

    impl<'r> FromRow<'r, AnyRow> for Comment {
        fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
            use sqlx::Row;
            Ok(Comment { id: row.try_get("id")?, post_id: row.try_get("post_id")?, body: row.try_get("body")? })
        }
    }

    #[tokio::test]
    async fn association_collection_scopes_create_and_destroy_all_to_the_owner() {
        use crate::context::Context;

        let ctx = Context::new_for_test();
        let spec = crate::registry::ConnectionSpec::new("main", crate::registry::Role::Primary, "sqlite::memory:")
            .pool(crate::registry::PoolConfig { max: 1, initial: 1, ..crate::registry::PoolConfig::default() });
        let adapter = ctx.connections().establish_connection(&spec).await.unwrap();
        adapter.migrator().register::<Comment>().run().await.unwrap();

        let config = crate::base::ModelConfig::<Comment>::new("main");
        let base = Base::new(&ctx, &config);
        let desc = AssociationDescriptor::has_many("comments", "post_id", "id");
        let comments = AssociationCollection::new(Base::new(&ctx, &config), &desc, ColumnValue::I32(1));

        comments.create(Comment { id: 1, post_id: 1, body: "first".to_string() }).await.unwrap();
        comments.create(Comment { id: 2, post_id: 1, body: "second".to_string() }).await.unwrap();
        base.create(Comment { id: 3, post_id: 2, body: "other post".to_string() }).await.unwrap();

        let all = comments.all(None, Vec::new()).await.unwrap();
        assert_eq!(all.len(), 2, "only the scoped owner's comments should come back");
        assert!(all.iter().all(|c| c.post_id == 1));

        let found = comments.find_by("body", ColumnValue::Text("second".to_string())).await.unwrap();
        assert!(found.is_some());

        let destroyed = comments.destroy_all().await.unwrap();
        assert_eq!(destroyed, 2);

        let remaining: Vec<Comment> = adapter.model::<Comment>().scan().await.unwrap();
        assert_eq!(remaining.len(), 1, "the other post's comment must survive destroy_all scoped to post 1");
    }
}
