//! Embedded ordered key/value store abstraction over `heed` (safe liblmdb
//! bindings) — the Rust analogue of the source system's `mdb` Cython
//! binding to LMDB. Every sub-store is opened over raw bytes; callers
//! (`column`, `marble`) are responsible for encoding keys so that byte
//! ordering matches the ordering they need (big-endian integers sort
//! numerically, RAW/LZ4 strings sort lexicographically).

mod cursor;

pub use cursor::RangeCursor;

use crate::error::{MarbleError, MarbleResult};
use heed::types::Bytes;
use heed::{Database, DatabaseFlags, Env, EnvFlags, EnvOpenOptions, RoTxn, RwTxn};
use std::path::Path;
use std::thread;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Default)]
pub struct SubStoreFlags {
    pub dup_sort: bool,
    pub create: bool,
}

/// A single named sub-store, holding raw key/value bytes.
#[derive(Clone, Copy)]
pub struct SubStore {
    db: Database<Bytes, Bytes>,
}

/// A memory-mapped environment containing named sub-stores, mirroring
/// `Marble._open_env`'s retry-on-lock-contention open policy.
pub struct KvEnv {
    env: Env,
    map_size: usize,
    growth_factor: f64,
    high_watermark: f64,
}

impl KvEnv {
    /// Opens (creating if missing) the environment at `path`, retrying on
    /// lock contention up to `retries` times, `retry_delay` apart.
    pub fn open(
        path: &Path,
        map_size: usize,
        max_dbs: u32,
        retries: u32,
        retry_delay: Duration,
    ) -> MarbleResult<Self> {
        std::fs::create_dir_all(path)?;
        let mut attempt = 0;
        loop {
            let opened = unsafe {
                EnvOpenOptions::new()
                    .map_size(map_size)
                    .max_dbs(max_dbs)
                    .open(path)
            };
            match opened {
                Ok(env) => {
                    return Ok(Self {
                        env,
                        map_size,
                        growth_factor: 1.5,
                        high_watermark: 0.75,
                    })
                }
                Err(e) if attempt < retries => {
                    attempt += 1;
                    thread::sleep(retry_delay);
                    tracing::debug!(target: "marbledb::kv", attempt, "retrying environment open after {e}");
                }
                Err(e) => return Err(MarbleError::Open(e.to_string())),
            }
        }
    }

    pub fn with_growth_policy(mut self, growth_factor: f64, high_watermark: f64) -> Self {
        self.growth_factor = growth_factor;
        self.high_watermark = high_watermark;
        self
    }

    /// Opens a sealed marble for reading: `NO_LOCK` (the engine guarantees no
    /// concurrent writer once a file is sealed) and `NO_RD_AHEAD` (matching
    /// `MarbleStream`'s "map flags that disable read-ahead and locking").
    pub fn open_read_only(path: &Path, map_size: usize, max_dbs: u32) -> MarbleResult<Self> {
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(max_dbs)
                .flags(EnvFlags::NO_LOCK | EnvFlags::NO_RD_AHEAD)
                .open(path)?
        };
        Ok(Self { env, map_size, growth_factor: 1.5, high_watermark: 0.75 })
    }

    pub fn begin_rw(&self) -> MarbleResult<RwTxn<'_>> {
        Ok(self.env.write_txn()?)
    }

    pub fn begin_ro(&self) -> MarbleResult<RoTxn<'_>> {
        Ok(self.env.read_txn()?)
    }

    pub fn commit(&self, txn: RwTxn<'_>) -> MarbleResult<()> {
        txn.commit()?;
        Ok(())
    }

    pub fn abort(&self, txn: RwTxn<'_>) {
        drop(txn);
    }

    /// Opens (creating if `flags.create`) a named sub-store with the given flags.
    pub fn open_sub(&self, txn: &mut RwTxn<'_>, name: &str, flags: SubStoreFlags) -> MarbleResult<SubStore> {
        let mut opts = self.env.database_options().types::<Bytes, Bytes>();
        opts.name(name);
        if flags.dup_sort {
            opts.flags(DatabaseFlags::DUP_SORT);
        }
        let db = if flags.create {
            opts.create(txn)?
        } else {
            opts.open(txn)?.ok_or_else(|| MarbleError::storage(format!("missing sub-store {name}")))?
        };
        Ok(SubStore { db })
    }

    pub fn open_sub_ro(&self, txn: &RoTxn<'_>, name: &str) -> MarbleResult<SubStore> {
        let db = self
            .env
            .database_options()
            .types::<Bytes, Bytes>()
            .name(name)
            .open(txn)?
            .ok_or_else(|| MarbleError::storage(format!("missing sub-store {name}")))?;
        Ok(SubStore { db })
    }

    /// True once the estimated free-page fraction drops below the configured
    /// high watermark, per the 1.5x-growth-at-75% policy in §4.1.
    pub fn past_high_watermark(&self, used_bytes: usize) -> bool {
        (used_bytes as f64) >= (self.map_size as f64) * self.high_watermark
    }

    pub fn next_map_size(&self) -> usize {
        ((self.map_size as f64) * self.growth_factor) as usize
    }

    /// Approximate bytes currently used, for the high-watermark growth
    /// check. LMDB only grows the backing file as pages are dirtied, so the
    /// on-disk size is a reasonable proxy for map occupancy.
    pub fn used_bytes(&self) -> MarbleResult<usize> {
        Ok(self.env.real_disk_size()? as usize)
    }

    pub fn map_size(&self) -> usize {
        self.map_size
    }

    /// Resize the memory map in place. Any open sub-store handles and LRUs
    /// bound to `(txn, sub)` pairs must be re-pointed by the caller after
    /// this returns (see `BitmapLru::repoint`).
    pub fn resize(&mut self, new_map_size: usize) -> MarbleResult<()> {
        unsafe {
            self.env.resize(new_map_size)?;
        }
        self.map_size = new_map_size;
        Ok(())
    }
}

impl SubStore {
    pub fn put(&self, txn: &mut RwTxn<'_>, key: &[u8], value: &[u8]) -> MarbleResult<()> {
        self.db.put(txn, key, value)?;
        Ok(())
    }

    pub fn get<'a>(&self, txn: &'a RoTxn<'_>, key: &[u8]) -> MarbleResult<Option<&'a [u8]>> {
        Ok(self.db.get(txn, key)?)
    }

    /// Preserves input key order, unlike a raw cursor scan.
    pub fn mget<'a>(&self, txn: &'a RoTxn<'_>, keys: &[&[u8]]) -> MarbleResult<Vec<Option<&'a [u8]>>> {
        keys.iter().map(|k| self.get(txn, k)).collect()
    }

    pub fn delete(&self, txn: &mut RwTxn<'_>, key: &[u8]) -> MarbleResult<bool> {
        Ok(self.db.delete(txn, key)?)
    }

    pub fn delete_value(&self, txn: &mut RwTxn<'_>, key: &[u8], value: &[u8]) -> MarbleResult<bool> {
        Ok(self.db.delete_one_duplicate(txn, key, value)?)
    }

    /// Zero-copy store of a large blob (trie node/kid buffers). Identical to
    /// `put` for a `Bytes`-keyed/valued database; kept as a distinct name so
    /// call sites read like the `put_raw`/`get_raw` pair in `hustle/core/marble.py`.
    pub fn put_raw(&self, txn: &mut RwTxn<'_>, key: &[u8], bytes: &[u8]) -> MarbleResult<()> {
        self.put(txn, key, bytes)
    }

    pub fn get_raw<'a>(&self, txn: &'a RoTxn<'_>, key: &[u8]) -> MarbleResult<Option<&'a [u8]>> {
        self.get(txn, key)
    }

    pub fn range<'txn>(&self, txn: &'txn RoTxn<'_>) -> MarbleResult<RangeCursor<'txn>> {
        RangeCursor::new(self.db, txn)
    }
}
