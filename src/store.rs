use base64::{URL_SAFE_NO_PAD, decode_config, encode_config};

use std::path::PathBuf;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    InvalidKey,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "storage i/o error: {err}"),
            StoreError::InvalidKey => f.write_str("invalid storage key"),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

/// Named durable buckets of string-keyed byte values. Guarantees
/// read-your-writes per bucket; no cross-task transactions. `put` is an
/// upsert.
pub trait BucketStore: Send + Sync {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError>;
    fn keys(&self, bucket: &str) -> Result<Vec<String>, StoreError>;
    fn buckets(&self) -> Result<Vec<String>, StoreError>;
    fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError>;
    fn create_bucket(&self, bucket: &str) -> Result<(), StoreError>;
}

/// Keys may be URLs or composite ids, so file names carry them
/// base64-url encoded.
fn encode_key(key: &str) -> String {
    encode_config(key.as_bytes(), URL_SAFE_NO_PAD)
}

fn decode_key(name: &str) -> Result<String, StoreError> {
    let bytes = decode_config(name, URL_SAFE_NO_PAD).map_err(|_| StoreError::InvalidKey)?;
    String::from_utf8(bytes).map_err(|_| StoreError::InvalidKey)
}

fn valid_bucket_name(bucket: &str) -> bool {
    !bucket.is_empty()
        && bucket
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

/// Primary backend: one directory per bucket, one file per key.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StoreError> {
        if !valid_bucket_name(bucket) {
            return Err(StoreError::InvalidKey);
        }
        Ok(self.root.join(bucket))
    }
}

impl BucketStore for DirStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.bucket_dir(bucket)?.join(encode_key(key));
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let dir = self.bucket_dir(bucket)?;
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(encode_key(key)), value)?;
        Ok(())
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let path = self.bucket_dir(bucket)?.join(encode_key(key));
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn keys(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.bucket_dir(bucket)?;
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            keys.push(decode_key(name)?);
        }
        keys.sort();
        Ok(keys)
    }

    fn buckets(&self) -> Result<Vec<String>, StoreError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut buckets = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                buckets.push(name.to_string());
            }
        }
        buckets.sort();
        Ok(buckets)
    }

    fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let dir = self.bucket_dir(bucket)?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let dir = self.bucket_dir(bucket)?;
        std::fs::create_dir_all(&dir)?;
        Ok(())
    }
}

/// Fallback backend for constrained platforms: a single directory where
/// file names are `<bucket>__<encoded key>`, enumerated by prefix.
#[derive(Debug, Clone)]
pub struct FlatStore {
    root: PathBuf,
}

const FLAT_SEPARATOR: &str = "__";

impl FlatStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn entry_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        if !valid_bucket_name(bucket) {
            return Err(StoreError::InvalidKey);
        }
        Ok(self
            .root
            .join(format!("{bucket}{FLAT_SEPARATOR}{}", encode_key(key))))
    }

    fn entry_names(&self) -> Result<Vec<String>, StoreError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

impl BucketStore for FlatStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.entry_path(bucket, key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.entry_path(bucket, key)?;
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(path, value)?;
        Ok(())
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let path = self.entry_path(bucket, key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn keys(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        if !valid_bucket_name(bucket) {
            return Err(StoreError::InvalidKey);
        }
        let prefix = format!("{bucket}{FLAT_SEPARATOR}");
        let mut keys = Vec::new();
        for name in self.entry_names()? {
            if let Some(encoded) = name.strip_prefix(&prefix) {
                keys.push(decode_key(encoded)?);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn buckets(&self) -> Result<Vec<String>, StoreError> {
        let mut buckets = Vec::new();
        for name in self.entry_names()? {
            if let Some((bucket, _)) = name.split_once(FLAT_SEPARATOR)
                && !buckets.iter().any(|existing| existing == bucket)
            {
                buckets.push(bucket.to_string());
            }
        }
        buckets.sort();
        Ok(buckets)
    }

    fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        if !valid_bucket_name(bucket) {
            return Err(StoreError::InvalidKey);
        }
        let prefix = format!("{bucket}{FLAT_SEPARATOR}");
        for name in self.entry_names()? {
            if name.starts_with(&prefix) {
                std::fs::remove_file(self.root.join(&name))?;
            }
        }
        Ok(())
    }

    fn create_bucket(&self, _bucket: &str) -> Result<(), StoreError> {
        // Flat layout has no bucket marker; buckets exist once a key does.
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }
}

/// Backend selected at startup by the `flat_storage` capability flag.
#[derive(Debug, Clone)]
pub enum WorkerStore {
    Dir(DirStore),
    Flat(FlatStore),
}

impl WorkerStore {
    pub fn open(root: PathBuf, flat: bool) -> Self {
        if flat {
            WorkerStore::Flat(FlatStore::new(root))
        } else {
            WorkerStore::Dir(DirStore::new(root))
        }
    }
}

impl BucketStore for WorkerStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            WorkerStore::Dir(store) => store.get(bucket, key),
            WorkerStore::Flat(store) => store.get(bucket, key),
        }
    }

    fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        match self {
            WorkerStore::Dir(store) => store.put(bucket, key, value),
            WorkerStore::Flat(store) => store.put(bucket, key, value),
        }
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        match self {
            WorkerStore::Dir(store) => store.delete(bucket, key),
            WorkerStore::Flat(store) => store.delete(bucket, key),
        }
    }

    fn keys(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        match self {
            WorkerStore::Dir(store) => store.keys(bucket),
            WorkerStore::Flat(store) => store.keys(bucket),
        }
    }

    fn buckets(&self) -> Result<Vec<String>, StoreError> {
        match self {
            WorkerStore::Dir(store) => store.buckets(),
            WorkerStore::Flat(store) => store.buckets(),
        }
    }

    fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        match self {
            WorkerStore::Dir(store) => store.delete_bucket(bucket),
            WorkerStore::Flat(store) => store.delete_bucket(bucket),
        }
    }

    fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        match self {
            WorkerStore::Dir(store) => store.create_bucket(bucket),
            WorkerStore::Flat(store) => store.create_bucket(bucket),
        }
    }
}
