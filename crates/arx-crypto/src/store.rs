//! Secret storage behind a narrow `get`/`set` interface.
//!
//! Two implementations: [`FileSecretStore`] keeps each secret in an
//! Argon2id-protected file under a directory (the host store, usually below
//! the user's config dir), [`MemorySecretStore`] holds secrets for the
//! lifetime of the process and backs tests and short-lived agents.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{aead, CryptoError, Result};

/// Named secret material, `get` and `set` only. Secrets are opaque byte
/// strings; key typing happens at the call site.
pub trait SecretStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Vec<u8>>;
    fn set(&self, name: &str, secret: &[u8]) -> Result<()>;
}

/// Process-local store.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, name: &str) -> Result<Vec<u8>> {
        self.entries
            .lock()
            .expect("store lock")
            .get(name)
            .cloned()
            .ok_or_else(|| CryptoError::SecretMissing(name.to_string()))
    }

    fn set(&self, name: &str, secret: &[u8]) -> Result<()> {
        self.entries
            .lock()
            .expect("store lock")
            .insert(name.to_string(), secret.to_vec());
        Ok(())
    }
}

const FILE_MAGIC: &[u8] = b"ARX_SECRET\x01";
const SALT_LEN: usize = 16;

#[derive(Serialize, Deserialize, Default)]
struct StoreIndex {
    entries: HashMap<String, IndexEntry>,
}

#[derive(Serialize, Deserialize)]
struct IndexEntry {
    file: String,
    created: String,
}

/// Encrypted on-disk store. Layout per secret:
/// `magic || salt(16) || sealed(nonce(24) || ct || tag)` with the file key
/// derived by Argon2id from the store passphrase and the per-file salt.
pub struct FileSecretStore {
    dir: PathBuf,
    passphrase: Vec<u8>,
}

impl FileSecretStore {
    /// Open (creating the directory if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>, passphrase: &[u8]) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(FileSecretStore {
            dir,
            passphrase: passphrase.to_vec(),
        })
    }

    /// Default host location, `<config dir>/arx/secrets`.
    pub fn host_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("arx").join("secrets"))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    fn load_index(&self) -> Result<StoreIndex> {
        match std::fs::read(self.index_path()) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| CryptoError::StoreMalformed(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreIndex::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save_index(&self, index: &StoreIndex) -> Result<()> {
        let bytes =
            serde_json::to_vec_pretty(index).map_err(|e| CryptoError::StoreMalformed(e.to_string()))?;
        std::fs::write(self.index_path(), bytes)?;
        Ok(())
    }

    fn derive_key(&self, salt: &[u8]) -> Result<[u8; 32]> {
        let mut key = [0u8; 32];
        argon2::Argon2::default()
            .hash_password_into(&self.passphrase, salt, &mut key)
            .map_err(|_| CryptoError::CryptoFailure)?;
        Ok(key)
    }

    fn entry_file(name: &str) -> String {
        // File names come from caller-chosen secret names; keep them tame.
        let safe: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("{safe}.sec")
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, name: &str) -> Result<Vec<u8>> {
        let index = self.load_index()?;
        let entry = index
            .entries
            .get(name)
            .ok_or_else(|| CryptoError::SecretMissing(name.to_string()))?;
        let data = std::fs::read(self.dir.join(&entry.file))?;
        if !data.starts_with(FILE_MAGIC) || data.len() < FILE_MAGIC.len() + SALT_LEN {
            return Err(CryptoError::StoreMalformed(name.to_string()));
        }
        let salt = &data[FILE_MAGIC.len()..FILE_MAGIC.len() + SALT_LEN];
        let sealed = &data[FILE_MAGIC.len() + SALT_LEN..];
        let mut key = self.derive_key(salt)?;
        let secret = aead::open(&key, FILE_MAGIC, sealed);
        key.zeroize();
        secret
    }

    fn set(&self, name: &str, secret: &[u8]) -> Result<()> {
        let salt: [u8; SALT_LEN] = crate::random_array();
        let mut key = self.derive_key(&salt)?;
        let sealed = aead::seal(&key, FILE_MAGIC, secret);
        key.zeroize();
        let sealed = sealed?;

        let file = Self::entry_file(name);
        let mut data = Vec::with_capacity(FILE_MAGIC.len() + SALT_LEN + sealed.len());
        data.extend_from_slice(FILE_MAGIC);
        data.extend_from_slice(&salt);
        data.extend_from_slice(&sealed);
        let path = self.dir.join(&file);
        std::fs::write(&path, &data)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }

        let mut index = self.load_index()?;
        index.entries.insert(
            name.to_string(),
            IndexEntry {
                file,
                created: chrono_free_now(),
            },
        );
        self.save_index(&index)
    }
}

// The store records wall-clock creation as a plain RFC3339-ish string without
// pulling chrono into this crate.
fn chrono_free_now() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("@{now}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrip() {
        let store = MemorySecretStore::new();
        assert!(matches!(
            store.get("missing"),
            Err(CryptoError::SecretMissing(_))
        ));
        store.set("master", &[1, 2, 3]).unwrap();
        assert_eq!(store.get("master").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::open(dir.path(), b"passphrase").unwrap();
        store.set("archive-master", &[9u8; 32]).unwrap();
        assert_eq!(store.get("archive-master").unwrap(), vec![9u8; 32]);
    }

    #[test]
    fn file_store_wrong_passphrase_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::open(dir.path(), b"right").unwrap();
        store.set("k", b"secret").unwrap();
        let other = FileSecretStore::open(dir.path(), b"wrong").unwrap();
        assert!(matches!(other.get("k"), Err(CryptoError::CryptoFailure)));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileSecretStore::open(dir.path(), b"pw").unwrap();
            store.set("node-seed", b"0123456789abcdef").unwrap();
        }
        let store = FileSecretStore::open(dir.path(), b"pw").unwrap();
        assert_eq!(store.get("node-seed").unwrap(), b"0123456789abcdef");
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(
            FileSecretStore::entry_file("../evil/name"),
            "___evil_name.sec"
        );
    }
}
