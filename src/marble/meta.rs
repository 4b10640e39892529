//! The meta sub-store: schema and trie buffers every marble carries,
//! grounded on `hustle/core/marble.py`'s `Marble._flush`/`Marble._open_meta`
//! (the `name, fields, partition, _pdata, _total_rows, _vid_nodes,
//! _vid_kids, _vid16_nodes, _vid16_kids` key set).

use crate::column::Column;
use crate::error::{MarbleError, MarbleResult};
use crate::kv::SubStore;
use heed::{RoTxn, RwTxn};

pub const KEY_NAME: &[u8] = b"name";
pub const KEY_FIELDS: &[u8] = b"fields";
pub const KEY_PARTITION: &[u8] = b"partition";
pub const KEY_PDATA: &[u8] = b"_pdata";
pub const KEY_TOTAL_ROWS: &[u8] = b"_total_rows";
pub const KEY_VID_NODES: &[u8] = b"_vid_nodes";
pub const KEY_VID_KIDS: &[u8] = b"_vid_kids";
pub const KEY_VID16_NODES: &[u8] = b"_vid16_nodes";
pub const KEY_VID16_KIDS: &[u8] = b"_vid16_kids";

#[derive(Clone, Debug)]
pub struct MarbleMeta {
    pub name: String,
    pub fields: Vec<String>,
    pub partition: Option<String>,
    pub pdata: String,
    pub total_rows: u32,
}

impl MarbleMeta {
    pub fn schema(&self) -> MarbleResult<Vec<Column>> {
        self.fields
            .iter()
            .map(|spec| Column::parse(spec, self.partition.as_deref()))
            .collect()
    }

    pub fn write(&self, txn: &mut RwTxn<'_>, sub: &SubStore) -> MarbleResult<()> {
        sub.put(txn, KEY_NAME, &json_bytes(&self.name)?)?;
        sub.put(txn, KEY_FIELDS, &json_bytes(&self.fields)?)?;
        sub.put(txn, KEY_PARTITION, &json_bytes(&self.partition)?)?;
        sub.put(txn, KEY_PDATA, &json_bytes(&self.pdata)?)?;
        sub.put(txn, KEY_TOTAL_ROWS, &json_bytes(&self.total_rows)?)?;
        Ok(())
    }

    pub fn read(txn: &RoTxn<'_>, sub: &SubStore) -> MarbleResult<Self> {
        Ok(MarbleMeta {
            name: json_get(txn, sub, KEY_NAME)?,
            fields: json_get(txn, sub, KEY_FIELDS)?,
            partition: json_get(txn, sub, KEY_PARTITION)?,
            pdata: json_get(txn, sub, KEY_PDATA)?,
            total_rows: json_get(txn, sub, KEY_TOTAL_ROWS)?,
        })
    }
}

/// Raw trie buffers for both VID widths, stored and loaded alongside
/// `MarbleMeta` but kept separate since they're large binary blobs, not
/// JSON scalars (§6.1).
#[derive(Clone, Debug, Default)]
pub struct TrieBuffers {
    pub nodes32: Vec<u8>,
    pub kids32: Vec<u8>,
    pub nodes16: Vec<u8>,
    pub kids16: Vec<u8>,
}

impl TrieBuffers {
    pub fn write(&self, txn: &mut RwTxn<'_>, sub: &SubStore) -> MarbleResult<()> {
        sub.put_raw(txn, KEY_VID_NODES, &self.nodes32)?;
        sub.put_raw(txn, KEY_VID_KIDS, &self.kids32)?;
        sub.put_raw(txn, KEY_VID16_NODES, &self.nodes16)?;
        sub.put_raw(txn, KEY_VID16_KIDS, &self.kids16)?;
        Ok(())
    }

    pub fn read(txn: &RoTxn<'_>, sub: &SubStore) -> MarbleResult<Self> {
        Ok(TrieBuffers {
            nodes32: raw_get(txn, sub, KEY_VID_NODES)?,
            kids32: raw_get(txn, sub, KEY_VID_KIDS)?,
            nodes16: raw_get(txn, sub, KEY_VID16_NODES)?,
            kids16: raw_get(txn, sub, KEY_VID16_KIDS)?,
        })
    }
}

fn json_bytes<T: serde::Serialize>(value: &T) -> MarbleResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn json_get<T: serde::de::DeserializeOwned>(txn: &RoTxn<'_>, sub: &SubStore, key: &[u8]) -> MarbleResult<T> {
    let bytes = sub.get(txn, key)?.ok_or_else(|| {
        MarbleError::storage(format!("meta sub-store missing expected key {:?}", String::from_utf8_lossy(key)))
    })?;
    Ok(serde_json::from_slice(bytes)?)
}

fn raw_get(txn: &RoTxn<'_>, sub: &SubStore, key: &[u8]) -> MarbleResult<Vec<u8>> {
    let bytes = sub.get_raw(txn, key)?.ok_or_else(|| {
        MarbleError::storage(format!("meta sub-store missing expected trie buffer {:?}", String::from_utf8_lossy(key)))
    })?;
    Ok(bytes.to_vec())
}
