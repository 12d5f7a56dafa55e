use meridian_orm::encryption::{AttributeKeys, EncryptedAttribute, EncryptionMode, rotate_column};
use meridian_orm::Adapter;

fn attribute(master_secret: &[u8], mode: EncryptionMode) -> EncryptedAttribute {
    let keys = AttributeKeys::derive(master_secret, "Patient", "ssn");
    EncryptedAttribute::new("ssn", mode, keys)
}

#[tokio::test]
async fn deterministic_encryption_is_searchable_by_equality() -> Result<(), Box<dyn std::error::Error>> {
    let db = Adapter::builder().max_connections(1).connect("sqlite::memory:").await?;
    db.raw("CREATE TABLE patient (id INTEGER PRIMARY KEY, ssn_encrypted TEXT)").execute().await?;

    let attr = attribute(b"test-master-secret-32-bytes-ok!", EncryptionMode::Deterministic);

    let shared_ssn = attr.encrypt(Some("123-45-6789")).unwrap();
    db.raw("INSERT INTO patient (id, ssn_encrypted) VALUES (?, ?)").bind(1i64).bind(shared_ssn.clone()).execute().await?;
    db.raw("INSERT INTO patient (id, ssn_encrypted) VALUES (?, ?)").bind(2i64).bind(shared_ssn.clone()).execute().await?;
    let other_ssn = attr.encrypt(Some("987-65-4321")).unwrap();
    db.raw("INSERT INTO patient (id, ssn_encrypted) VALUES (?, ?)").bind(3i64).bind(other_ssn).execute().await?;

    let probe = attr.encrypt_for_query("123-45-6789");
    assert_eq!(probe, shared_ssn, "deterministic encryption of the same plaintext must match what's stored");

    let matched: i64 = db.raw("SELECT count(*) FROM patient WHERE ssn_encrypted = ?").bind(probe).fetch_scalar().await?;
    assert_eq!(matched, 2, "both rows sharing the ssn should match the equality probe");

    Ok(())
}

#[tokio::test]
async fn key_rotation_preserves_searchability_under_the_new_key() -> Result<(), Box<dyn std::error::Error>> {
    let db = Adapter::builder().max_connections(1).connect("sqlite::memory:").await?;
    db.raw("CREATE TABLE patient (id INTEGER PRIMARY KEY, ssn_encrypted TEXT)").execute().await?;

    let old_attr = attribute(b"old-master-secret-32-bytes-ok!!", EncryptionMode::Deterministic);
    let new_attr = attribute(b"new-master-secret-32-bytes-ok!!", EncryptionMode::Deterministic);

    let ciphertext = old_attr.encrypt(Some("555-11-2222")).unwrap();
    db.raw("INSERT INTO patient (id, ssn_encrypted) VALUES (?, ?)").bind(1i64).bind(ciphertext).execute().await?;

    let rotated = rotate_column(&db, "patient", "id", &old_attr, &new_attr, 50).await?;
    assert_eq!(rotated, 1);

    let probe = new_attr.encrypt_for_query("555-11-2222");
    let matched: i64 = db.raw("SELECT count(*) FROM patient WHERE ssn_encrypted = ?").bind(probe).fetch_scalar().await?;
    assert_eq!(matched, 1, "the rotated row should be searchable under the new key");

    let stored: String = db.raw("SELECT ssn_encrypted FROM patient WHERE id = ?").bind(1i64).fetch_scalar().await?;
    assert!(old_attr.decrypt(Some(&stored)).is_err(), "old key should no longer authenticate a rotated row");
    assert_eq!(new_attr.decrypt(Some(&stored))?.as_deref(), Some("555-11-2222"));

    Ok(())
}
