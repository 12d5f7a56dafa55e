use meridian_orm::registry::PoolConfig;
use meridian_orm::{Base, ConnectionSpec, Context, Model, ModelConfig, Role};
use uuid::Uuid;

#[derive(Debug, Clone, Model, PartialEq)]
struct Account {
    #[orm(primary_key)]
    id: Uuid,
    name: String,
    balance: i64,
}

#[tokio::test]
async fn create_mutate_save_and_destroy_round_trips_through_dirty_tracking() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Context::new_for_test();
    // A single pooled connection, matching `tests/simple_test.rs`'s
    // `max_connections(1)`: sqlite's `:memory:` database is private to the
    // connection that opened it, so a pool of more than one connection would
    // see an empty, unmigrated database on every other checkout.
    let spec = ConnectionSpec::new("main", Role::Primary, "sqlite::memory:")
        .pool(PoolConfig { max: 1, initial: 1, ..PoolConfig::default() });
    let adapter = ctx.connections().establish_connection(&spec).await?;
    adapter.migrator().register::<Account>().run().await?;

    let config = ModelConfig::<Account>::new("main");
    let base = Base::new(&ctx, &config);

    let mut tracked = base.create(Account { id: Uuid::new_v4(), name: "checking".to_string(), balance: 0 }).await?;
    assert!(!tracked.is_destroyed());
    assert!(!tracked.is_new_record(), "create should persist and clear new_record");

    tracked.get_mut().balance = 100;
    assert!(tracked.is_changed());
    assert!(tracked.attribute_changed("balance"));
    assert_eq!(tracked.attribute_was("balance"), Some("0".to_string()));

    let outcome = base.save(&mut tracked).await?;
    assert!(outcome.is_saved());
    assert!(!tracked.is_changed(), "save should clear the dirty set");
    let changes = tracked.previous_changes();
    let (old, new) = changes.get("balance").expect("balance recorded in previous_changes");
    assert_eq!(old.as_deref(), Some("0"));
    assert_eq!(new.as_deref(), Some("100"));

    let id_str = tracked.get().id.to_string();
    let reloaded = base.find(&id_str).await?.expect("account persisted");
    assert_eq!(reloaded.get().balance, 100);

    let mut reloaded = reloaded;
    let destroyed = base.destroy(&mut reloaded).await?;
    assert!(destroyed);
    assert!(reloaded.is_destroyed());

    let gone = base.find(&id_str).await?;
    assert!(gone.is_none());

    Ok(())
}
