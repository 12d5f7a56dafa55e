use meridian_orm::association::{AssociationDescriptor, eager_load_has_many, eager_load_joined};
use meridian_orm::{Adapter, ColumnValue, Model};

#[derive(Debug, Clone, Model, PartialEq)]
struct Author {
    #[orm(primary_key)]
    id: i32,
    name: String,
}

#[derive(Debug, Clone, Model, PartialEq)]
struct Post {
    #[orm(primary_key)]
    id: i32,
    #[orm(foreign_key = "Author::id")]
    author_id: i32,
    title: String,
}

#[tokio::test]
async fn eager_loading_has_many_issues_exactly_two_queries() -> Result<(), Box<dyn std::error::Error>> {
    let db = Adapter::builder().max_connections(1).connect("sqlite::memory:").await?;
    db.migrator().register::<Author>().register::<Post>().run().await?;

    for author_id in 1..=3 {
        db.model::<Author>().insert(&Author { id: author_id, name: format!("author-{author_id}") }).await?;
        for seq in 1..=2 {
            let post_id = author_id * 10 + seq;
            db.model::<Post>().insert(&Post { id: post_id, author_id, title: format!("post-{post_id}") }).await?;
        }
    }

    // Query 1: load every owner.
    let authors: Vec<Author> = db.model::<Author>().scan().await?;
    assert_eq!(authors.len(), 3);

    let owner_pks: Vec<ColumnValue> = authors.iter().map(|a| ColumnValue::I32(a.id)).collect();
    let desc = AssociationDescriptor::has_many("posts", "author_id", "id");

    // Query 2: a single `WHERE author_id IN (...)` covering every owner at
    // once, the "separate queries" eager-load strategy — never N+1.
    let buckets = eager_load_has_many::<Post>(&db, &owner_pks, &desc).await?;

    assert_eq!(buckets.len(), 3, "every author should have a bucket of posts");
    for author in &authors {
        let posts = buckets.get(&author.id.to_string()).expect("bucket present for author");
        assert_eq!(posts.len(), 2, "each author was seeded with exactly 2 posts");
        assert!(posts.iter().all(|p| p.author_id == author.id));
    }

    Ok(())
}

#[tokio::test]
async fn eager_loading_with_no_owners_short_circuits_without_a_query() -> Result<(), Box<dyn std::error::Error>> {
    let db = Adapter::builder().max_connections(1).connect("sqlite::memory:").await?;
    db.migrator().register::<Author>().register::<Post>().run().await?;

    let desc = AssociationDescriptor::has_many("posts", "author_id", "id");
    let buckets = eager_load_has_many::<Post>(&db, &[], &desc).await?;
    assert!(buckets.is_empty());

    Ok(())
}

#[tokio::test]
async fn eager_load_joined_fetches_owners_and_children_in_one_statement() -> Result<(), Box<dyn std::error::Error>> {
    let db = Adapter::builder().max_connections(1).connect("sqlite::memory:").await?;
    db.migrator().register::<Author>().register::<Post>().run().await?;

    db.model::<Author>().insert(&Author { id: 1, name: "author-1".to_string() }).await?;
    db.model::<Author>().insert(&Author { id: 2, name: "author-2".to_string() }).await?;
    db.model::<Post>().insert(&Post { id: 10, author_id: 1, title: "post-10".to_string() }).await?;
    db.model::<Post>().insert(&Post { id: 11, author_id: 1, title: "post-11".to_string() }).await?;

    let desc = AssociationDescriptor::has_many("posts", "author_id", "id");
    let joined = eager_load_joined::<Author, Post>(&db, None, &desc).await?;

    assert_eq!(joined.len(), 2, "every author appears exactly once, including the one with no posts");
    let (author1, posts1) = joined.iter().find(|(a, _)| a.id == 1).expect("author 1 present");
    assert_eq!(author1.name, "author-1");
    assert_eq!(posts1.len(), 2);

    let (_, posts2) = joined.iter().find(|(a, _)| a.id == 2).expect("author 2 present");
    assert!(posts2.is_empty(), "an owner with no matching rows still appears, with an empty bucket");

    Ok(())
}
