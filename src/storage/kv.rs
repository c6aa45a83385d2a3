// Byte-oriented key/value stores the ledger persists into.
// Each store guarantees atomic single-key get/put/delete and a full scan;
// nothing here spans keys, so callers order dependent writes themselves.

use crate::error::{BlockchainError, Result};
use log::{debug, error};
use sled::{Db, Tree};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

const BLOCKS_TREE: &str = "blocks";
const CHAINSTATE_TREE: &str = "chainstate";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Every (key, value) pair, ordered by key.
    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    fn clear(&self) -> Result<()> {
        for (key, _) in self.scan()? {
            self.delete(&key)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// A sled tree used as one bucket.
#[derive(Clone)]
pub struct SledStore {
    tree: Tree,
}

impl SledStore {
    pub fn new(tree: Tree) -> SledStore {
        SledStore { tree }
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self
            .tree
            .get(key)
            .map_err(|e| BlockchainError::StoreFailure(format!("Failed to get key: {e}")))?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.tree
            .insert(key, value)
            .map_err(|e| BlockchainError::StoreFailure(format!("Failed to put key: {e}")))?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.tree
            .remove(key)
            .map_err(|e| BlockchainError::StoreFailure(format!("Failed to delete key: {e}")))?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = vec![];
        for item in self.tree.iter() {
            let (k, v) = item.map_err(|e| {
                BlockchainError::StoreFailure(format!("Failed to iterate tree: {e}"))
            })?;
            entries.push((k.to_vec(), v.to_vec()));
        }
        Ok(entries)
    }

    fn clear(&self) -> Result<()> {
        self.tree
            .clear()
            .map_err(|e| BlockchainError::StoreFailure(format!("Failed to clear tree: {e}")))
    }

    fn flush(&self) -> Result<()> {
        self.tree
            .flush()
            .map_err(|e| BlockchainError::StoreFailure(format!("Failed to flush tree: {e}")))?;
        Ok(())
    }
}

/// Process-local store, used for tests and throwaway chains.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| BlockchainError::StoreFailure("Memory store lock poisoned".to_string()))?;
        Ok(inner.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| BlockchainError::StoreFailure("Memory store lock poisoned".to_string()))?;
        inner.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| BlockchainError::StoreFailure("Memory store lock poisoned".to_string()))?;
        inner.remove(key);
        Ok(())
    }

    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| BlockchainError::StoreFailure("Memory store lock poisoned".to_string()))?;
        Ok(inner
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn clear(&self) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| BlockchainError::StoreFailure("Memory store lock poisoned".to_string()))?;
        inner.clear();
        Ok(())
    }
}

/// The ledger's store handle: one bucket for blocks and the tip pointer, one
/// for the UTXO index. Created once and handed to `Blockchain` and `UTXOSet`;
/// flushed when dropped.
pub struct Database {
    blocks: Arc<dyn KeyValueStore>,
    chainstate: Arc<dyn KeyValueStore>,
    path: Option<PathBuf>,
    _db: Option<Db>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Database> {
        let db = sled::open(path)
            .map_err(|e| BlockchainError::StoreFailure(format!("Failed to open database: {e}")))?;
        let blocks = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::StoreFailure(format!("Failed to open blocks tree: {e}")))?;
        let chainstate = db.open_tree(CHAINSTATE_TREE).map_err(|e| {
            BlockchainError::StoreFailure(format!("Failed to open chainstate tree: {e}"))
        })?;
        debug!("Opened database at {}", path.display());

        Ok(Database {
            blocks: Arc::new(SledStore::new(blocks)),
            chainstate: Arc::new(SledStore::new(chainstate)),
            path: Some(path.to_path_buf()),
            _db: Some(db),
        })
    }

    pub fn in_memory() -> Database {
        Database {
            blocks: Arc::new(MemoryStore::new()),
            chainstate: Arc::new(MemoryStore::new()),
            path: None,
            _db: None,
        }
    }

    pub fn blocks(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.blocks)
    }

    pub fn chainstate(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.chainstate)
    }

    pub fn get_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn flush(&self) -> Result<()> {
        self.blocks.flush()?;
        self.chainstate.flush()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            error!("Failed to flush database on close: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(store: &dyn KeyValueStore) {
        assert_eq!(store.get(b"a").unwrap(), None);
        store.put(b"b", b"2").unwrap();
        store.put(b"a", b"1").unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));

        let keys: Vec<Vec<u8>> = store.scan().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);

        store.delete(b"a").unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
        // deleting an absent key is not an error
        store.delete(b"a").unwrap();

        store.clear().unwrap();
        assert!(store.scan().unwrap().is_empty());
    }

    #[test]
    fn test_memory_store_contract() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_sled_store_contract() {
        let temp_dir = tempdir().unwrap();
        let db = Database::open(&temp_dir.path().join("kv")).unwrap();
        exercise(db.blocks().as_ref());
        exercise(db.chainstate().as_ref());
    }

    #[test]
    fn test_buckets_are_separate() {
        let db = Database::in_memory();
        db.blocks().put(b"k", b"block").unwrap();
        assert_eq!(db.chainstate().get(b"k").unwrap(), None);
    }

    #[test]
    fn test_sled_data_survives_reopen() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("kv");
        {
            let db = Database::open(&path).unwrap();
            db.blocks().put(b"tip", b"abc").unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.blocks().get(b"tip").unwrap(), Some(b"abc".to_vec()));
        assert_eq!(db.get_path(), Some(path.as_path()));
    }
}
