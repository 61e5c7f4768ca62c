//! File-based storage engine for persistent storage.

use crate::engine::{StorageEngine, WriteBatch};
use crate::error::{StorageError, StorageResult};
use crate::memory::StoreData;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 4] = b"KSST";
const FORMAT_VERSION: u8 = 1;
const EXTENSION: &str = "kss";

/// A directory-backed storage engine.
///
/// Each named store lives in its own `<name>.kss` file. Stores are loaded
/// into memory on open; every commit rewrites the store file through a
/// temporary file that is synced and then renamed over the original, so a
/// crash leaves either the old or the new contents, never a mix.
///
/// # Durability
///
/// A successful `commit`, `append` or `clear` has been `sync_all`ed to disk.
///
/// # Example
///
/// ```no_run
/// use keepsync_storage::{FileEngine, StorageEngine};
/// use std::path::Path;
///
/// let engine = FileEngine::open(Path::new("offline-data")).unwrap();
/// engine.put("notes", b"n1", b"doc").unwrap();
/// ```
#[derive(Debug)]
pub struct FileEngine {
    dir: PathBuf,
    stores: RwLock<BTreeMap<String, StoreData>>,
}

impl FileEngine {
    /// Opens (or creates) an engine rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or a store file
    /// cannot be read or parsed.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;

        let mut stores = BTreeMap::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let data = read_store(name, &path)?;
            stores.insert(name.to_string(), data);
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            stores: RwLock::new(stores),
        })
    }

    /// Returns the directory holding the store files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn store_path(&self, store: &str) -> PathBuf {
        self.dir.join(format!("{store}.{EXTENSION}"))
    }

    /// Applies `mutate` to a copy of the store, persists it, then publishes it.
    fn update<T>(
        &self,
        store: &str,
        mutate: impl FnOnce(&mut StoreData) -> StorageResult<T>,
    ) -> StorageResult<T> {
        validate_store_name(store)?;
        let mut stores = self.stores.write();
        let mut next = stores.get(store).cloned().unwrap_or_default();
        let out = mutate(&mut next)?;
        write_store(&self.store_path(store), &next)?;
        stores.insert(store.to_string(), next);
        Ok(out)
    }
}

impl StorageEngine for FileEngine {
    fn get(&self, store: &str, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .stores
            .read()
            .get(store)
            .and_then(|data| data.entries.get(key).cloned()))
    }

    fn scan(&self, store: &str) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .stores
            .read()
            .get(store)
            .map(|data| {
                data.entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn count(&self, store: &str) -> StorageResult<usize> {
        Ok(self
            .stores
            .read()
            .get(store)
            .map_or(0, |data| data.entries.len()))
    }

    fn commit(&self, store: &str, batch: WriteBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.update(store, |data| {
            data.apply(batch);
            Ok(())
        })
    }

    fn append(&self, store: &str, value: &[u8]) -> StorageResult<u64> {
        self.update(store, |data| data.append(store, value))
    }

    fn clear(&self, store: &str) -> StorageResult<()> {
        if !self.stores.read().contains_key(store) {
            return Ok(());
        }
        self.update(store, |data| {
            data.entries.clear();
            Ok(())
        })
    }

    fn store_names(&self) -> StorageResult<Vec<String>> {
        Ok(self.stores.read().keys().cloned().collect())
    }
}

fn validate_store_name(name: &str) -> StorageResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidStoreName(name.to_string()))
    }
}

fn write_store(path: &Path, data: &StoreData) -> StorageResult<()> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    buf.push(FORMAT_VERSION);
    buf.extend_from_slice(&data.last_sequence.to_le_bytes());
    buf.extend_from_slice(&(data.entries.len() as u32).to_le_bytes());
    for (key, value) in &data.entries {
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        buf.extend_from_slice(value);
    }

    let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_store(name: &str, path: &Path) -> StorageResult<StoreData> {
    let mut buf = Vec::new();
    File::open(path)?.read_to_end(&mut buf)?;

    let corrupted = |message: &str| StorageError::Corrupted {
        store: name.to_string(),
        message: message.to_string(),
    };

    let mut reader = Reader { buf: &buf, pos: 0 };
    if reader.take(4).ok_or_else(|| corrupted("missing header"))? != MAGIC {
        return Err(corrupted("bad magic"));
    }
    let version = reader.take(1).ok_or_else(|| corrupted("missing version"))?[0];
    if version != FORMAT_VERSION {
        return Err(corrupted(&format!("unsupported format version {version}")));
    }
    let last_sequence = reader.u64().ok_or_else(|| corrupted("missing sequence"))?;
    let count = reader.u32().ok_or_else(|| corrupted("missing entry count"))?;

    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let key = reader.chunk().ok_or_else(|| corrupted("truncated key"))?;
        let value = reader.chunk().ok_or_else(|| corrupted("truncated value"))?;
        entries.insert(key.to_vec(), value.to_vec());
    }
    if reader.pos != buf.len() {
        return Err(corrupted("trailing bytes"));
    }

    Ok(StoreData {
        entries,
        last_sequence,
    })
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let out = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(out)
    }

    fn u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn u64(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    fn chunk(&mut self) -> Option<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }
}
