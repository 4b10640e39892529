//! Range cursors over a sub-store's raw key/value pairs, honoring the
//! sub-store's byte-lexicographic key ordering (numeric for big-endian
//! integer keys, lexicographic for raw string/VID keys).

use crate::error::MarbleResult;
use heed::types::Bytes;
use heed::{Database, RoIter, RoRange, RoTxn};
use std::ops::Bound;

pub struct RangeCursor<'txn> {
    db: Database<Bytes, Bytes>,
    txn: &'txn RoTxn<'txn>,
}

impl<'txn> RangeCursor<'txn> {
    pub(super) fn new(db: Database<Bytes, Bytes>, txn: &'txn RoTxn<'txn>) -> MarbleResult<Self> {
        Ok(Self { db, txn })
    }

    fn range_iter(
        &self,
        lo: Bound<&[u8]>,
        hi: Bound<&[u8]>,
    ) -> MarbleResult<RoRange<'txn, Bytes, Bytes>> {
        Ok(self.db.range(self.txn, &(lo, hi))?)
    }

    pub fn all(&self) -> MarbleResult<RoIter<'txn, Bytes, Bytes>> {
        Ok(self.db.iter(self.txn)?)
    }

    pub fn eq(&self, key: &[u8]) -> MarbleResult<RoRange<'txn, Bytes, Bytes>> {
        self.range_iter(Bound::Included(key), Bound::Included(key))
    }

    pub fn ne<'a>(&'a self, key: &'a [u8]) -> MarbleResult<impl Iterator<Item = heed::Result<(&'txn [u8], &'txn [u8])>> + 'a> {
        Ok(self.all()?.filter(move |r| match r {
            Ok((k, _)) => *k != key,
            Err(_) => true,
        }))
    }

    pub fn lt(&self, key: &[u8]) -> MarbleResult<RoRange<'txn, Bytes, Bytes>> {
        self.range_iter(Bound::Unbounded, Bound::Excluded(key))
    }

    pub fn le(&self, key: &[u8]) -> MarbleResult<RoRange<'txn, Bytes, Bytes>> {
        self.range_iter(Bound::Unbounded, Bound::Included(key))
    }

    pub fn gt(&self, key: &[u8]) -> MarbleResult<RoRange<'txn, Bytes, Bytes>> {
        self.range_iter(Bound::Excluded(key), Bound::Unbounded)
    }

    pub fn ge(&self, key: &[u8]) -> MarbleResult<RoRange<'txn, Bytes, Bytes>> {
        self.range_iter(Bound::Included(key), Bound::Unbounded)
    }

    pub fn range(&self, lo: &[u8], hi: &[u8]) -> MarbleResult<RoRange<'txn, Bytes, Bytes>> {
        self.range_iter(Bound::Included(lo), Bound::Included(hi))
    }
}
