//! Ordered RID bitsets backing bitmap indexes.
//!
//! `RowBitmap` wraps `roaring::RoaringBitmap`, the Rust-ecosystem analogue of
//! the source system's bespoke bitset extension: both store a compressed,
//! ascending-iterable set of 32-bit row identifiers with fast union,
//! intersect and population count.

use roaring::RoaringBitmap;
use std::io::Cursor;

pub type Rid = u32;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RowBitmap(RoaringBitmap);

impl RowBitmap {
    pub fn new() -> Self {
        Self(RoaringBitmap::new())
    }

    pub fn from_iter(rids: impl IntoIterator<Item = Rid>) -> Self {
        Self(RoaringBitmap::from_iter(rids))
    }

    pub fn insert(&mut self, rid: Rid) -> bool {
        self.0.insert(rid)
    }

    pub fn contains(&self, rid: Rid) -> bool {
        self.0.contains(rid)
    }

    pub fn len(&self) -> u64 {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn union_with(&mut self, other: &RowBitmap) {
        self.0 |= &other.0;
    }

    pub fn intersect_with(&mut self, other: &RowBitmap) {
        self.0 &= &other.0;
    }

    pub fn union(&self, other: &RowBitmap) -> RowBitmap {
        RowBitmap(&self.0 | &other.0)
    }

    pub fn intersect(&self, other: &RowBitmap) -> RowBitmap {
        RowBitmap(&self.0 & &other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = Rid> + '_ {
        self.0.iter()
    }

    /// Complement over the inclusive universe `[1, row_count]`: every RID is
    /// a real row (RIDs are assigned `1..=total_rows`), so only the RID 0
    /// sentinel is excluded from the result.
    pub fn complement(&self, row_count: Rid) -> RowBitmap {
        let mut extended = self.0.clone();
        extended.insert(0);
        let mut complemented = RoaringBitmap::new();
        complemented.insert_range(0..=row_count);
        complemented -= &extended;
        RowBitmap(complemented)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.0
            .serialize_into(&mut buf)
            .expect("serialization into a Vec cannot fail");
        buf
    }

    pub fn deserialize(bytes: &[u8]) -> std::io::Result<Self> {
        RoaringBitmap::deserialize_from(Cursor::new(bytes)).map(RowBitmap)
    }
}

impl FromIterator<Rid> for RowBitmap {
    fn from_iter<T: IntoIterator<Item = Rid>>(iter: T) -> Self {
        RowBitmap::from_iter(iter)
    }
}
