//! # Encryption Subsystem
//!
//! Per-attribute AES-256-GCM field encryption. Ciphertext for a logical
//! attribute `foo` lives in a sibling `foo_encrypted` column
//! (`ColumnInfo::is_encrypted_storage`), base64-encoded, produced in one of
//! two modes:
//!
//! - **Randomized** — a fresh random nonce per call; the same plaintext
//!   never encrypts to the same ciphertext twice. Used for attributes that
//!   are never queried by value.
//! - **Deterministic** — the nonce is derived from an HMAC-SHA256 of the
//!   plaintext under the deterministic key, truncated to the GCM nonce
//!   length, so identical plaintexts always produce identical ciphertext.
//!   This sacrifices semantic security for equality-queryability: a
//!   `where_<field>` probe can be encrypted the same way and compared with
//!   `=` in SQL.
//!
//! Built on `aes-gcm`, `hkdf`, `hmac`, `sha2`, and `base64`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::Error;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// A raw 32-byte symmetric key, already keyed for AES-256-GCM use. Produced
/// by [`derive_key`]; never constructed directly from attacker-controlled
/// bytes.
#[derive(Clone)]
struct DerivedKey([u8; KEY_LEN]);

/// Derives a 32-byte key from `master_secret` via HKDF-SHA256, salted with
/// `model`/`attribute`/`purpose` so every (model, attribute) pair — and the
/// randomized vs. deterministic roles within it — gets an independent key
/// even when sharing one master secret.
fn derive_key(master_secret: &[u8], model: &str, attribute: &str, purpose: &str) -> DerivedKey {
    let hk = Hkdf::<Sha256>::new(None, master_secret);
    let info = format!("meridian-orm:{model}:{attribute}:{purpose}");
    let mut out = [0u8; KEY_LEN];
    hk.expand(info.as_bytes(), &mut out).expect("32 bytes is a valid HKDF-SHA256 output length");
    DerivedKey(out)
}

/// The pair of derived keys backing one encrypted attribute: a randomized
/// key for non-searchable ciphertext and a deterministic key for
/// equality-queryable ciphertext. Either role may go unused by a given
/// attribute, but both are always derived so `EncryptedAttribute` can be
/// reconfigured between modes without re-deriving keys elsewhere.
#[derive(Clone)]
pub struct AttributeKeys {
    randomized: DerivedKey,
    deterministic: DerivedKey,
}

impl AttributeKeys {
    /// Derives both roles' keys for `model`/`attribute` from one master
    /// secret (e.g. loaded from a secrets manager or environment variable).
    pub fn derive(master_secret: &[u8], model: &str, attribute: &str) -> Self {
        Self {
            randomized: derive_key(master_secret, model, attribute, "randomized"),
            deterministic: derive_key(master_secret, model, attribute, "deterministic"),
        }
    }
}

/// Whether an encrypted attribute uses randomized or deterministic nonces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    /// A fresh random nonce each time; ciphertext is not equality-queryable.
    Randomized,
    /// A plaintext-derived nonce; ciphertext is equality-queryable via
    /// [`EncryptedAttribute::encrypt_for_query`].
    Deterministic,
}

/// Declares one logical encrypted attribute: its storage column, mode, and
/// derived keys. Constructed once per (model, attribute) and reused across
/// encrypt/decrypt calls.
#[derive(Clone)]
pub struct EncryptedAttribute {
    storage_column: String,
    mode: EncryptionMode,
    keys: AttributeKeys,
}

impl EncryptedAttribute {
    /// `logical_name` is the attribute name as the model author writes it;
    /// the ciphertext is stored in `<logical_name>_encrypted`.
    pub fn new(logical_name: &str, mode: EncryptionMode, keys: AttributeKeys) -> Self {
        Self { storage_column: format!("{logical_name}_encrypted"), mode, keys }
    }

    /// The sibling storage column name (`<logical_name>_encrypted`).
    pub fn storage_column(&self) -> &str {
        &self.storage_column
    }

    /// Encrypts `plaintext` under this attribute's configured mode, base64
    /// encoding the result for storage in the sibling column. Returns
    /// `None` for `None` input (nil stays nil).
    pub fn encrypt(&self, plaintext: Option<&str>) -> Option<String> {
        let plaintext = plaintext?;
        let (key, nonce_bytes) = match self.mode {
            EncryptionMode::Randomized => (&self.keys.randomized, random_nonce()),
            EncryptionMode::Deterministic => (&self.keys.deterministic, deterministic_nonce(&self.keys.deterministic, plaintext)),
        };
        Some(seal(key, &nonce_bytes, plaintext.as_bytes()))
    }

    /// Encrypts a probe value the same way a stored deterministic attribute
    /// would have been encrypted, for use in an equality `WHERE` clause.
    /// Only meaningful when `mode` is `Deterministic`; calling it on a
    /// randomized attribute produces ciphertext that will never match
    /// anything stored (each stored value used its own random nonce).
    pub fn encrypt_for_query(&self, plaintext: &str) -> String {
        let nonce_bytes = deterministic_nonce(&self.keys.deterministic, plaintext);
        seal(&self.keys.deterministic, &nonce_bytes, plaintext.as_bytes())
    }

    /// Decrypts `ciphertext`, trying this attribute's configured-mode key
    /// first and the other role's key second, so a column midway through a
    /// mode change (or a key rotation, via [`rotate_column`]) still decrypts
    /// with either the new or the not-yet-rotated key. `None` input yields
    /// `None` (nil stays nil). Returns [`Error::DecryptionError`] if neither
    /// key authenticates the ciphertext.
    pub fn decrypt(&self, ciphertext: Option<&str>) -> Result<Option<String>, Error> {
        let Some(ciphertext) = ciphertext else { return Ok(None) };
        let primary = match self.mode {
            EncryptionMode::Randomized => &self.keys.randomized,
            EncryptionMode::Deterministic => &self.keys.deterministic,
        };
        let secondary = match self.mode {
            EncryptionMode::Randomized => &self.keys.deterministic,
            EncryptionMode::Deterministic => &self.keys.randomized,
        };
        if let Ok(plaintext) = open(primary, ciphertext) {
            return Ok(Some(plaintext));
        }
        if let Ok(plaintext) = open(secondary, ciphertext) {
            return Ok(Some(plaintext));
        }
        Err(Error::DecryptionError(format!("no configured key decrypts column {}", self.storage_column)))
    }
}

fn random_nonce() -> [u8; NONCE_LEN] {
    use rand::RngCore;
    let mut bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Derives a GCM nonce from `HMAC-SHA256(key, plaintext)`, truncated to
/// `NONCE_LEN` bytes, so encrypting the same plaintext under the same key
/// always yields the same nonce (and hence the same ciphertext).
fn deterministic_nonce(key: &DerivedKey, plaintext: &str) -> [u8; NONCE_LEN] {
    let mut mac = Hmac::<Sha256>::new_from_slice(&key.0).expect("HMAC accepts any key length");
    mac.update(plaintext.as_bytes());
    let digest = mac.finalize().into_bytes();
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&digest[..NONCE_LEN]);
    nonce
}

/// Seals `plaintext` with AES-256-GCM under `key`/`nonce`, returning
/// base64(`nonce || ciphertext || tag`) (`aes_gcm::encrypt` already appends
/// the authentication tag to the ciphertext).
fn seal(key: &DerivedKey, nonce_bytes: &[u8; NONCE_LEN], plaintext: &[u8]) -> String {
    let cipher = Aes256Gcm::new_from_slice(&key.0).expect("key is exactly 32 bytes");
    let nonce = Nonce::from_slice(nonce_bytes);
    let ciphertext = cipher.encrypt(nonce, plaintext).expect("AES-GCM encryption over a valid key/nonce cannot fail");
    let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    framed.extend_from_slice(nonce_bytes);
    framed.extend_from_slice(&ciphertext);
    base64::engine::general_purpose::STANDARD.encode(framed)
}

/// Inverse of [`seal`]: decodes base64, splits off the leading nonce, and
/// authenticates/decrypts the remainder.
fn open(key: &DerivedKey, encoded: &str) -> Result<String, Error> {
    let framed = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| Error::DecryptionError(format!("invalid base64 ciphertext: {e}")))?;
    if framed.len() < NONCE_LEN {
        return Err(Error::DecryptionError("ciphertext shorter than one nonce".to_string()));
    }
    let (nonce_bytes, ciphertext) = framed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(&key.0).expect("key is exactly 32 bytes");
    let nonce = Nonce::from_slice(nonce_bytes);
    let plaintext =
        cipher.decrypt(nonce, ciphertext).map_err(|_| Error::DecryptionError("authentication failed".to_string()))?;
    String::from_utf8(plaintext).map_err(|e| Error::DecryptionError(format!("decrypted bytes were not valid UTF-8: {e}")))
}

/// Re-encrypts every non-null value in `storage_column` of `table`, in
/// batches of `batch_size`, decrypting with `old` and re-encrypting with
/// `new`. Idempotent: rows already re-encrypted under `new` decrypt
/// successfully as their own "old" value on a repeat run (since `decrypt`
/// tries both of `old`'s keys) and re-encrypt to the same ciphertext family,
/// so running `rotate_column` twice in a row is a correctness no-op (though
/// it still re-writes every row; callers wanting a true no-op should track
/// rotation completion externally).
///
/// Deterministic rotations remain searchable post-rotation: queries built
/// with `new.encrypt_for_query()` match rows rotated under `new`.
pub async fn rotate_column(
    db: &crate::adapter::Adapter,
    table: &str,
    primary_key_column: &str,
    old: &EncryptedAttribute,
    new: &EncryptedAttribute,
    batch_size: i64,
) -> Result<u64, Error> {
    use sqlx::Row;

    let quoted_table = db.driver().quote(table);
    let quoted_pk = db.driver().quote(primary_key_column);
    let quoted_col = db.driver().quote(old.storage_column());

    let mut rotated = 0u64;
    loop {
        let sql =
            format!("SELECT {quoted_pk}, {quoted_col} FROM {quoted_table} WHERE {quoted_col} IS NOT NULL ORDER BY {quoted_pk} LIMIT {batch_size}");
        let rows = sqlx::query(&sql).fetch_all(&db.pool).await.map_err(Error::from_sqlx_classified)?;
        if rows.is_empty() {
            break;
        }

        for row in &rows {
            let pk: String = row
                .try_get::<String, _>(0)
                .or_else(|_| row.try_get::<i64, _>(0).map(|v| v.to_string()))
                .map_err(Error::from_sqlx_classified)?;
            let ciphertext: Option<String> = row.try_get(1).ok();
            let plaintext = old.decrypt(ciphertext.as_deref())?;
            let Some(plaintext) = plaintext else { continue };
            let re_encrypted = new.encrypt(Some(&plaintext));

            let update_sql = format!("UPDATE {quoted_table} SET {quoted_col} = ? WHERE {quoted_pk} = ?");
            db.raw(&update_sql).bind(re_encrypted).bind(pk).execute().await?;
            rotated += 1;
        }

        if (rows.len() as i64) < batch_size {
            break;
        }
    }

    Ok(rotated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attribute(mode: EncryptionMode) -> EncryptedAttribute {
        let keys = AttributeKeys::derive(b"test-master-secret-32-bytes-ok!", "User", "ssn");
        EncryptedAttribute::new("ssn", mode, keys)
    }

    #[test]
    fn nil_stays_nil() {
        let attr = attribute(EncryptionMode::Randomized);
        assert_eq!(attr.encrypt(None), None);
        assert_eq!(attr.decrypt(None).unwrap(), None);
    }

    #[test]
    fn randomized_round_trips_and_varies() {
        let attr = attribute(EncryptionMode::Randomized);
        let a = attr.encrypt(Some("123-45-6789")).unwrap();
        let b = attr.encrypt(Some("123-45-6789")).unwrap();
        assert_ne!(a, b, "randomized mode must not repeat ciphertext for the same plaintext");
        assert_eq!(attr.decrypt(Some(&a)).unwrap().unwrap(), "123-45-6789");
        assert_eq!(attr.decrypt(Some(&b)).unwrap().unwrap(), "123-45-6789");
    }

    #[test]
    fn deterministic_is_stable_and_searchable() {
        let attr = attribute(EncryptionMode::Deterministic);
        let a = attr.encrypt(Some("123-45-6789")).unwrap();
        let b = attr.encrypt(Some("123-45-6789")).unwrap();
        assert_eq!(a, b, "deterministic mode must repeat ciphertext for the same plaintext");
        let probe = attr.encrypt_for_query("123-45-6789");
        assert_eq!(probe, a);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let attr = attribute(EncryptionMode::Randomized);
        let ciphertext = attr.encrypt(Some("secret")).unwrap();
        let other_keys = AttributeKeys::derive(b"a-totally-different-master-key!!", "User", "ssn");
        let other = EncryptedAttribute::new("ssn", EncryptionMode::Randomized, other_keys);
        assert!(other.decrypt(Some(&ciphertext)).is_err());
    }

    #[test]
    fn decrypt_tolerates_either_configured_role() {
        let keys = AttributeKeys::derive(b"test-master-secret-32-bytes-ok!", "User", "ssn");
        let deterministic = EncryptedAttribute::new("ssn", EncryptionMode::Deterministic, keys.clone());
        let randomized = EncryptedAttribute::new("ssn", EncryptionMode::Randomized, keys);
        let ciphertext = deterministic.encrypt(Some("value")).unwrap();
        assert_eq!(randomized.decrypt(Some(&ciphertext)).unwrap().unwrap(), "value");
    }
}
