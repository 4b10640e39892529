//! Write-time LRU cache mapping an index key to a `RowBitmap`, with
//! spill-to-substore on eviction. Used for `WIDE` indexed columns so a
//! high-cardinality index doesn't have to hold every key's bitmap in memory
//! at once.
//!
//! Grounded on `hustle`'s `Victor` adapter (`core/marble.py`) binding a
//! `(txn, db)` pair into the `fetch`/`evict` closures `pylru.LRUDict.getDict`
//! takes. In Rust the transaction is simply passed as an explicit argument
//! to each call instead of captured ahead of time, so there is nothing to
//! rebind there; what still needs rebinding after a map resize is the
//! `SubStore` handle itself (LMDB re-opens sub-databases against the new
//! transaction), which is what `repoint` updates.

use crate::bitmap::RowBitmap;
use crate::error::MarbleResult;
use crate::kv::SubStore;
use heed::RwTxn;
use std::collections::{HashMap, VecDeque};

pub struct BitmapLru {
    capacity: usize,
    sub: SubStore,
    entries: HashMap<Vec<u8>, RowBitmap>,
    /// Most-recently-used key at the back.
    order: VecDeque<Vec<u8>>,
}

impl BitmapLru {
    pub fn new(capacity: usize, sub: SubStore) -> Self {
        Self {
            capacity,
            sub,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Rebind the sub-store handle after a commit/growth cycle. Cached
    /// entries are untouched; only the path back to storage changes.
    pub fn repoint(&mut self, sub: SubStore) {
        self.sub = sub;
    }

    fn touch(&mut self, key: &[u8]) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos).unwrap();
            self.order.push_back(k);
        }
    }

    /// Promotes on hit; on miss, deserializes from the sub-store (or starts
    /// an empty bitmap if the key has never been written).
    pub fn get(&mut self, txn: &RwTxn<'_>, key: &[u8]) -> MarbleResult<RowBitmap> {
        if let Some(bm) = self.entries.get(key) {
            let bm = bm.clone();
            self.touch(key);
            return Ok(bm);
        }
        let bm = match self.sub.get(txn, key)? {
            Some(bytes) => RowBitmap::deserialize(bytes)
                .map_err(|e| crate::error::MarbleError::storage(e.to_string()))?,
            None => RowBitmap::new(),
        };
        self.insert(txn, key.to_vec(), bm.clone())?;
        Ok(bm)
    }

    /// Inserts or replaces `key`'s bitmap, evicting the least-recently-used
    /// entry to the sub-store once over capacity.
    pub fn set(&mut self, txn: &mut RwTxn<'_>, key: Vec<u8>, bitmap: RowBitmap) -> MarbleResult<()> {
        self.insert(txn, key, bitmap)
    }

    fn insert(&mut self, txn: &mut RwTxn<'_>, key: Vec<u8>, bitmap: RowBitmap) -> MarbleResult<()> {
        if !self.entries.contains_key(&key) {
            self.order.push_back(key.clone());
        } else if let Some(pos) = self.order.iter().position(|k| k == &key) {
            let k = self.order.remove(pos).unwrap();
            self.order.push_back(k);
        }
        self.entries.insert(key, bitmap);

        while self.entries.len() > self.capacity {
            if let Some(evicted_key) = self.order.pop_front() {
                if let Some(bm) = self.entries.remove(&evicted_key) {
                    self.sub.put(txn, &evicted_key, &bm.serialize())?;
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Flushes every cached entry to the sub-store, e.g. at marble close.
    pub fn evict_all(&mut self, txn: &mut RwTxn<'_>) -> MarbleResult<()> {
        for (key, bm) in self.entries.drain() {
            self.sub.put(txn, &key, &bm.serialize())?;
        }
        self.order.clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
