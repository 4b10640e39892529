//! Marble read path (§4.3). A `MarbleStream` borrows an already-open
//! read-only `KvEnv` rather than owning one, so its `RoTxn` can carry the
//! same lifetime as the environment without the struct being
//! self-referential — the caller keeps the `KvEnv` alive for as long as it
//! keeps the stream (see `Marble::open` for the usual pairing).

use crate::bitmap::RowBitmap;
use crate::column::Column;
use crate::error::{MarbleError, MarbleResult};
use crate::kv::{KvEnv, SubStore};
use crate::predicate::BitmapSource;
use crate::tuple::Value;
use heed::RoTxn;
use std::collections::HashMap;

use super::meta::{MarbleMeta, TrieBuffers};
use super::{decode_value, encode_lookup_key, rid_key};

pub struct MarbleStream<'env> {
    txn: RoTxn<'env>,
    schema: Vec<Column>,
    meta: MarbleMeta,
    trie_bufs: TrieBuffers,
    col_subs: Vec<SubStore>,
    ix_subs: HashMap<usize, SubStore>,
}

impl<'env> MarbleStream<'env> {
    pub fn open(env: &'env KvEnv) -> MarbleResult<Self> {
        let txn = env.begin_ro()?;
        let meta_sub = env.open_sub_ro(&txn, "meta")?;
        let meta = MarbleMeta::read(&txn, &meta_sub)?;
        let trie_bufs = TrieBuffers::read(&txn, &meta_sub)?;
        let schema = meta.schema()?;

        let mut col_subs = Vec::with_capacity(schema.len());
        let mut ix_subs = HashMap::new();
        for (i, col) in schema.iter().enumerate() {
            col_subs.push(env.open_sub_ro(&txn, &format!("col:{}", col.name))?);
            if col.is_indexed() {
                ix_subs.insert(i, env.open_sub_ro(&txn, &format!("ix:{}", col.name))?);
            }
        }

        Ok(Self { txn, schema, meta, trie_bufs, col_subs, ix_subs })
    }

    pub fn schema(&self) -> &[Column] {
        &self.schema
    }

    pub fn meta(&self) -> &MarbleMeta {
        &self.meta
    }

    pub fn get(&self, column: &str, rid: u32) -> MarbleResult<Value> {
        let i = self.col_index(column)?;
        match self.col_subs[i].get(&self.txn, &rid_key(rid))? {
            Some(bytes) => decode_value(&self.schema[i], bytes, &self.trie_bufs),
            None => Ok(Value::Null),
        }
    }

    /// Decoded values for every RID in `bitmap`, in ascending RID order.
    pub fn mget(&self, column: &str, bitmap: &RowBitmap) -> MarbleResult<Vec<Value>> {
        let i = self.col_index(column)?;
        bitmap
            .iter()
            .map(|rid| match self.col_subs[i].get(&self.txn, &rid_key(rid))? {
                Some(bytes) => decode_value(&self.schema[i], bytes, &self.trie_bufs),
                None => Ok(Value::Null),
            })
            .collect()
    }

    fn col_index(&self, name: &str) -> MarbleResult<usize> {
        self.schema
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| MarbleError::query(format!("no such column '{name}'")))
    }

    fn index_sub(&self, i: usize) -> MarbleResult<&SubStore> {
        self.ix_subs
            .get(&i)
            .ok_or_else(|| MarbleError::query(format!("column '{}' is not indexed", self.schema[i].name)))
    }

    fn bitmap_for_key(&self, i: usize, key: &[u8]) -> MarbleResult<RowBitmap> {
        match self.index_sub(i)?.get(&self.txn, key)? {
            Some(bytes) => RowBitmap::deserialize(bytes).map_err(|e| MarbleError::data(format!("corrupt bitmap: {e}"))),
            None => Ok(RowBitmap::new()),
        }
    }

    fn union_pairs<'a>(&self, pairs: impl Iterator<Item = heed::Result<(&'a [u8], &'a [u8])>>) -> MarbleResult<RowBitmap> {
        let mut out = RowBitmap::new();
        for pair in pairs {
            let (_k, v) = pair?;
            out.union_with(&RowBitmap::deserialize(v).map_err(|e| MarbleError::data(format!("corrupt bitmap: {e}")))?);
        }
        Ok(out)
    }

    fn lookup_key(&self, i: usize, value: &Value) -> MarbleResult<Option<Vec<u8>>> {
        encode_lookup_key(&self.schema[i], value, &self.trie_bufs)
    }
}

impl<'env> BitmapSource for MarbleStream<'env> {
    fn row_count(&self) -> u32 {
        self.meta.total_rows
    }

    fn bit_eq(&self, column: &str, value: &Value) -> MarbleResult<RowBitmap> {
        let i = self.col_index(column)?;
        match self.lookup_key(i, value)? {
            Some(key) => self.bitmap_for_key(i, &key),
            None => Ok(RowBitmap::new()),
        }
    }

    fn bit_ne(&self, column: &str, value: &Value) -> MarbleResult<RowBitmap> {
        Ok(self.bit_eq(column, value)?.complement(self.row_count()))
    }

    fn bit_lt(&self, column: &str, value: &Value) -> MarbleResult<RowBitmap> {
        let i = self.col_index(column)?;
        let key = self.lookup_key(i, value)?.ok_or_else(|| MarbleError::query("range comparison on a non-rangeable column"))?;
        let cursor = self.index_sub(i)?.range(&self.txn)?;
        self.union_pairs(cursor.lt(&key)?)
    }

    fn bit_gt(&self, column: &str, value: &Value) -> MarbleResult<RowBitmap> {
        let i = self.col_index(column)?;
        let key = self.lookup_key(i, value)?.ok_or_else(|| MarbleError::query("range comparison on a non-rangeable column"))?;
        let cursor = self.index_sub(i)?.range(&self.txn)?;
        self.union_pairs(cursor.gt(&key)?)
    }

    fn bit_le(&self, column: &str, value: &Value) -> MarbleResult<RowBitmap> {
        let i = self.col_index(column)?;
        let key = self.lookup_key(i, value)?.ok_or_else(|| MarbleError::query("range comparison on a non-rangeable column"))?;
        let cursor = self.index_sub(i)?.range(&self.txn)?;
        self.union_pairs(cursor.le(&key)?)
    }

    fn bit_ge(&self, column: &str, value: &Value) -> MarbleResult<RowBitmap> {
        let i = self.col_index(column)?;
        let key = self.lookup_key(i, value)?.ok_or_else(|| MarbleError::query("range comparison on a non-rangeable column"))?;
        let cursor = self.index_sub(i)?.range(&self.txn)?;
        self.union_pairs(cursor.ge(&key)?)
    }

    fn bit_eq_ex(&self, column: &str, values: &[Value]) -> MarbleResult<RowBitmap> {
        let mut out = RowBitmap::new();
        for v in values {
            out.union_with(&self.bit_eq(column, v)?);
        }
        Ok(out)
    }

    fn bit_ne_ex(&self, column: &str, values: &[Value]) -> MarbleResult<RowBitmap> {
        Ok(self.bit_eq_ex(column, values)?.complement(self.row_count()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::marble::writer::{MarbleWriter, Record};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn schema() -> Vec<Column> {
        vec![
            Column::parse("+$date", Some("date")).unwrap(),
            Column::parse("=@4ad_id", None).unwrap(),
            Column::parse("+site", None).unwrap(),
        ]
    }

    fn record(date: &str, ad_id: i64, site: &str) -> Record {
        let mut r = Record::new();
        r.insert("date".to_string(), Value::from(date));
        r.insert("ad_id".to_string(), Value::Int(ad_id));
        r.insert("site".to_string(), Value::from(site));
        r
    }

    fn build_one_partition() -> (tempfile::TempDir, std::path::PathBuf) {
        let scratch = tempdir().unwrap();
        let mut w = MarbleWriter::new("impressions", schema(), scratch.path(), Arc::new(EngineConfig::default())).unwrap();
        w.write_all([
            record("2014-01-27", 10, "a.com"),
            record("2014-01-27", 20, "b.com"),
            record("2014-01-27", 10, "a.com"),
            record("2014-01-27", 30, "a.com"),
        ])
        .unwrap();
        let sealed = w.close().unwrap();
        assert_eq!(sealed.len(), 1);
        (scratch, sealed[0].path.clone())
    }

    #[test]
    fn row_count_and_get_match_written_records() {
        let (_scratch, path) = build_one_partition();
        let env = KvEnv::open_read_only(&path, 10 * 1024 * 1024, 8).unwrap();
        let stream = MarbleStream::open(&env).unwrap();
        assert_eq!(stream.row_count(), 4);
        assert_eq!(stream.get("site", 1).unwrap().as_str(), Some("a.com"));
        assert_eq!(stream.get("ad_id", 2).unwrap().as_int(), Some(20));
    }

    #[test]
    fn bit_eq_and_bit_ne_partition_the_universe() {
        let (_scratch, path) = build_one_partition();
        let env = KvEnv::open_read_only(&path, 10 * 1024 * 1024, 8).unwrap();
        let stream = MarbleStream::open(&env).unwrap();

        let eq = stream.bit_eq("ad_id", &Value::Int(10)).unwrap();
        assert_eq!(eq.len(), 2);
        let ne = stream.bit_ne("ad_id", &Value::Int(10)).unwrap();
        assert_eq!(ne.len(), 2);
        assert!(eq.intersect(&ne).is_empty());
    }

    #[test]
    fn bit_eq_on_trie_column_groups_by_dictionary_value() {
        let (_scratch, path) = build_one_partition();
        let env = KvEnv::open_read_only(&path, 10 * 1024 * 1024, 8).unwrap();
        let stream = MarbleStream::open(&env).unwrap();

        let a_com = stream.bit_eq("site", &Value::from("a.com")).unwrap();
        assert_eq!(a_com.len(), 3);
        let unseen = stream.bit_eq("site", &Value::from("never-seen.com")).unwrap();
        assert!(unseen.is_empty());
    }

    #[test]
    fn bit_range_queries_union_matching_keys() {
        let (_scratch, path) = build_one_partition();
        let env = KvEnv::open_read_only(&path, 10 * 1024 * 1024, 8).unwrap();
        let stream = MarbleStream::open(&env).unwrap();

        let ge20 = stream.bit_ge("ad_id", &Value::Int(20)).unwrap();
        assert_eq!(ge20.len(), 2);
        let lt20 = stream.bit_lt("ad_id", &Value::Int(20)).unwrap();
        assert_eq!(lt20.len(), 2);
    }

    #[test]
    fn mget_preserves_bitmap_ascending_order() {
        let (_scratch, path) = build_one_partition();
        let env = KvEnv::open_read_only(&path, 10 * 1024 * 1024, 8).unwrap();
        let stream = MarbleStream::open(&env).unwrap();
        let bm = RowBitmap::from_iter([3, 1, 2]);
        let values = stream.mget("ad_id", &bm).unwrap();
        assert_eq!(values.iter().map(|v| v.as_int().unwrap()).collect::<Vec<_>>(), vec![10, 20, 10]);
    }
}
