//! File-based storage backends
//!
//! The key-value store keeps one file per key; the document store keeps one
//! directory per object store and one JSON envelope per document, with the
//! schema version recorded in `meta.json`. Writes go to a temporary file that
//! is renamed into place.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::storage::{
    error::{StorageError, StorageResult},
    traits::*,
};

/// Encode a key into a portable file name.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes `%XX`.
pub(crate) fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

/// Reverse of [`encode_key`]; `None` for names this backend did not produce.
pub(crate) fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("entry");
    path.with_file_name(format!(".{name}.tmp"))
}

/// File-backed key-value store
pub struct FileKeyValueStore {
    dir: PathBuf,
    quota: u64,
}

impl FileKeyValueStore {
    /// Create a store under `base_dir/kv`
    pub fn new(base_dir: &Path, quota: u64) -> StorageResult<Self> {
        let dir = base_dir.join("kv");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, quota })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(encode_key(key))
    }

    /// Bytes used by every key except `excluded`
    fn usage_excluding(&self, excluded: &str) -> StorageResult<u64> {
        let mut total = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let Some(key) = entry.file_name().to_str().and_then(decode_key) else {
                continue;
            };
            if key.starts_with('.') || key == excluded {
                continue;
            }
            total += key.len() as u64 + entry.metadata()?.len();
        }
        Ok(total)
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let needed = self.usage_excluding(key)? + (key.len() + value.len()) as u64;
        if needed > self.quota {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                needed,
                quota: self.quota,
            });
        }

        let path = self.path_for(key);
        let tmp = temp_path(&path);
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = decode_key(name) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Persisted schema of a file document database
#[derive(Debug, Default, Serialize, Deserialize)]
struct DatabaseMeta {
    version: u32,
    stores: BTreeSet<String>,
}

/// On-disk form of a single document
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    key: String,
    value: Value,
}

/// File-backed document database
pub struct FileDocumentStore {
    name: String,
    version: u32,
    root: PathBuf,
    stores: BTreeSet<String>,
}

impl FileDocumentStore {
    /// Open (creating or upgrading) the database `name` under `base_dir/db`
    pub async fn open(
        base_dir: &Path,
        name: &str,
        version: u32,
        upgrade: &UpgradeFn,
    ) -> StorageResult<Self> {
        if version == 0 {
            return Err(StorageError::configuration(
                "document database version must be at least 1",
            ));
        }

        let root = base_dir.join("db").join(encode_key(name));
        fs::create_dir_all(&root).await?;

        let meta_path = root.join("meta.json");
        let mut meta = match fs::read_to_string(&meta_path).await {
            Ok(content) => serde_json::from_str::<DatabaseMeta>(&content)?,
            Err(e) if e.kind() == ErrorKind::NotFound => DatabaseMeta::default(),
            Err(e) => return Err(StorageError::Io(e)),
        };

        if version < meta.version {
            return Err(StorageError::VersionMismatch {
                name: name.to_string(),
                requested: version,
                existing: meta.version,
            });
        }

        if version > meta.version {
            let before = meta.stores.clone();
            let mut schema = SchemaUpgrade::new(meta.version, version, &mut meta.stores);
            upgrade(&mut schema);

            for removed in before.difference(&meta.stores) {
                let dir = root.join(encode_key(removed));
                if let Err(e) = fs::remove_dir_all(&dir).await {
                    if e.kind() != ErrorKind::NotFound {
                        return Err(StorageError::Io(e));
                    }
                }
            }

            info!(
                "Upgraded document database {} from v{} to v{}",
                name, meta.version, version
            );
            meta.version = version;
            write_atomic(&meta_path, serde_json::to_string_pretty(&meta)?.as_bytes()).await?;
        }

        for store in &meta.stores {
            fs::create_dir_all(root.join(encode_key(store))).await?;
        }

        Ok(Self {
            name: name.to_string(),
            version,
            root,
            stores: meta.stores,
        })
    }

    fn store_dir(&self, store: &str) -> StorageResult<PathBuf> {
        if !self.stores.contains(store) {
            return Err(StorageError::not_found(format!("object store '{store}'")));
        }
        Ok(self.root.join(encode_key(store)))
    }

    fn doc_path(&self, store: &str, key: &str) -> StorageResult<PathBuf> {
        Ok(self
            .store_dir(store)?
            .join(format!("{}.json", encode_key(key))))
    }

    async fn read_envelope(path: &Path) -> StorageResult<Option<Envelope>> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    let tmp = temp_path(path);
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

fn is_document_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(true);
    !hidden && path.extension().and_then(|e| e.to_str()) == Some("json")
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn store_names(&self) -> Vec<String> {
        self.stores.iter().cloned().collect()
    }

    async fn get(&self, store: &str, key: &str) -> StorageResult<Option<Value>> {
        let path = self.doc_path(store, key)?;
        Ok(Self::read_envelope(&path).await?.map(|env| env.value))
    }

    async fn put(&self, store: &str, key: &str, value: Value) -> StorageResult<()> {
        let path = self.doc_path(store, key)?;
        let envelope = Envelope {
            key: key.to_string(),
            value,
        };
        write_atomic(&path, &serde_json::to_vec(&envelope)?).await?;
        debug!("Wrote {}/{} to {}", store, key, path.display());
        Ok(())
    }

    async fn delete(&self, store: &str, key: &str) -> StorageResult<()> {
        let path = self.doc_path(store, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn get_all(&self, store: &str) -> StorageResult<Vec<(String, Value)>> {
        let dir = self.store_dir(store)?;
        let mut docs = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_document_file(&path) {
                continue;
            }
            match Self::read_envelope(&path).await {
                Ok(Some(env)) => docs.push((env.key, env.value)),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable document {}: {}", path.display(), e),
            }
        }
        docs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(docs)
    }

    async fn count(&self, store: &str) -> StorageResult<usize> {
        let dir = self.store_dir(store)?;
        let mut count = 0;
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if is_document_file(&entry.path()) {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn clear(&self, store: &str) -> StorageResult<()> {
        let dir = self.store_dir(store)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Io(e)),
        }
        fs::create_dir_all(&dir).await?;
        Ok(())
    }
}
