//! The marble file format: schema-driven column packing, bitmap indexes,
//! and trie dictionaries behind a single `KvEnv`. Grounded on
//! `hustle/core/marble.py`'s `Marble` class — the write path and
//! `MarbleStream` are split into `writer`/`reader` modules.

pub mod meta;
pub mod reader;
pub mod writer;

pub use meta::{MarbleMeta, TrieBuffers};
pub use reader::MarbleStream;
pub use writer::{MarbleWriter, Record, SealedMarble};

use crate::column::{Column, ColumnType, StringCompression, TrieWidth};
use crate::error::{MarbleError, MarbleResult};
use crate::trie::{value_for_vid, vid_for_value, VidWidth};
use crate::tuple::Value;

/// Encodes a single field's value into its on-disk representation,
/// assigning a fresh VID for TRIE columns as a side effect (§4.2 step 3).
pub fn encode_value(
    col: &Column,
    value: &Value,
    trie16: &mut crate::trie::TrieDict,
    trie32: &mut crate::trie::TrieDict,
) -> MarbleResult<Vec<u8>> {
    match col.ty {
        ColumnType::Str => match col.compression {
            StringCompression::Trie => {
                let bytes = value.as_str().unwrap_or("").as_bytes();
                let trie = match col.trie_width {
                    TrieWidth::Narrow16 => &mut *trie16,
                    TrieWidth::Wide32 => &mut *trie32,
                };
                let vid = trie.add(bytes)?;
                Ok(encode_vid(col.trie_width, vid))
            }
            StringCompression::Lz4 => {
                let bytes = value.as_str().unwrap_or("").as_bytes();
                Ok(lz4_flex::compress_prepend_size(bytes))
            }
            StringCompression::Raw | StringCompression::Binary => match value {
                Value::Bytes(b) => Ok(b.clone()),
                _ => Ok(Vec::new()),
            },
        },
        _ => encode_integer(col.ty, value),
    }
}

/// Encodes a query literal the same way, for index lookups, but never
/// mutates a trie: an unseen TRIE value simply has no VID.
pub fn encode_lookup_key(col: &Column, value: &Value, trie_bufs: &TrieBuffers) -> MarbleResult<Option<Vec<u8>>> {
    match col.ty {
        ColumnType::Str => match col.compression {
            StringCompression::Trie => {
                let bytes = value.as_str().unwrap_or("").as_bytes();
                let (nodes, kids) = trie_slices(col.trie_width, trie_bufs);
                Ok(vid_for_value(nodes, kids, bytes).map(|vid| encode_vid(col.trie_width, vid)))
            }
            StringCompression::Lz4 => {
                let bytes = value.as_str().unwrap_or("").as_bytes();
                Ok(Some(lz4_flex::compress_prepend_size(bytes)))
            }
            StringCompression::Raw | StringCompression::Binary => match value {
                Value::Bytes(b) => Ok(Some(b.clone())),
                _ => Ok(Some(Vec::new())),
            },
        },
        _ => Ok(Some(encode_integer(col.ty, value)?)),
    }
}

/// Decodes a stored column value back into a `Value`, per the column's
/// effective storage type (§4.3 key-encoding rule).
pub fn decode_value(col: &Column, bytes: &[u8], trie_bufs: &TrieBuffers) -> MarbleResult<Value> {
    match col.ty {
        ColumnType::Str => match col.compression {
            StringCompression::Trie => {
                let vid = decode_vid(col.trie_width, bytes)?;
                let (nodes, kids) = trie_slices(col.trie_width, trie_bufs);
                match value_for_vid(nodes, kids, vid) {
                    Some(v) => Ok(Value::Bytes(v)),
                    None => Ok(Value::Null),
                }
            }
            StringCompression::Lz4 => {
                let decompressed = lz4_flex::decompress_size_prepended(bytes)
                    .map_err(|e| MarbleError::data(format!("corrupt lz4 column value: {e}")))?;
                Ok(Value::Bytes(decompressed))
            }
            StringCompression::Raw | StringCompression::Binary => Ok(Value::Bytes(bytes.to_vec())),
        },
        _ => decode_integer(col.ty, bytes),
    }
}

fn trie_slices(width: TrieWidth, bufs: &TrieBuffers) -> (&[u8], &[u8]) {
    match width {
        TrieWidth::Narrow16 => (&bufs.nodes16, &bufs.kids16),
        TrieWidth::Wide32 => (&bufs.nodes32, &bufs.kids32),
    }
}

fn encode_vid(width: TrieWidth, vid: u32) -> Vec<u8> {
    match width {
        TrieWidth::Narrow16 => (vid as u16).to_be_bytes().to_vec(),
        TrieWidth::Wide32 => vid.to_be_bytes().to_vec(),
    }
}

fn decode_vid(width: TrieWidth, bytes: &[u8]) -> MarbleResult<u32> {
    match width {
        TrieWidth::Narrow16 => {
            let arr: [u8; 2] = bytes.try_into().map_err(|_| MarbleError::data("short narrow-trie VID"))?;
            Ok(u16::from_be_bytes(arr) as u32)
        }
        TrieWidth::Wide32 => {
            let arr: [u8; 4] = bytes.try_into().map_err(|_| MarbleError::data("short wide-trie VID"))?;
            Ok(u32::from_be_bytes(arr))
        }
    }
}

fn encode_integer(ty: ColumnType, value: &Value) -> MarbleResult<Vec<u8>> {
    let i = value.as_int().unwrap_or(0);
    Ok(match ty {
        ColumnType::I8 => (i as i8).to_be_bytes().to_vec(),
        ColumnType::U8 => (i as u8).to_be_bytes().to_vec(),
        ColumnType::I16 => (i as i16).to_be_bytes().to_vec(),
        ColumnType::U16 => (i as u16).to_be_bytes().to_vec(),
        ColumnType::I32 => (i as i32).to_be_bytes().to_vec(),
        ColumnType::U32 => (i as u32).to_be_bytes().to_vec(),
        ColumnType::I64 => i.to_be_bytes().to_vec(),
        ColumnType::U64 => (i as u64).to_be_bytes().to_vec(),
        ColumnType::Str => unreachable!("encode_integer called on a string column"),
    })
}

fn decode_integer(ty: ColumnType, bytes: &[u8]) -> MarbleResult<Value> {
    fn arr<const N: usize>(bytes: &[u8]) -> MarbleResult<[u8; N]> {
        bytes.try_into().map_err(|_| MarbleError::data(format!("short integer value, expected {N} bytes")))
    }
    let v: i64 = match ty {
        ColumnType::I8 => i8::from_be_bytes(arr(bytes)?) as i64,
        ColumnType::U8 => u8::from_be_bytes(arr(bytes)?) as i64,
        ColumnType::I16 => i16::from_be_bytes(arr(bytes)?) as i64,
        ColumnType::U16 => u16::from_be_bytes(arr(bytes)?) as i64,
        ColumnType::I32 => i32::from_be_bytes(arr(bytes)?) as i64,
        ColumnType::U32 => u32::from_be_bytes(arr(bytes)?) as i64,
        ColumnType::I64 => i64::from_be_bytes(arr(bytes)?),
        ColumnType::U64 => u64::from_be_bytes(arr(bytes)?) as i64,
        ColumnType::Str => unreachable!("decode_integer called on a string column"),
    };
    Ok(Value::Int(v))
}

/// Big-endian RID key, matching the value sub-store's integer-keyed order.
pub fn rid_key(rid: u32) -> [u8; 4] {
    rid.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::TrieDict;

    #[test]
    fn trie_column_round_trips_through_encode_decode() {
        let col = Column::parse("+%4site", None).unwrap();
        let mut trie16 = TrieDict::new(VidWidth::Narrow16);
        let mut trie32 = TrieDict::new(VidWidth::Wide32);
        let encoded = encode_value(&col, &Value::from("example.com"), &mut trie16, &mut trie32).unwrap();

        let (nodes, kids) = trie32.serialize();
        let bufs = TrieBuffers { nodes32: nodes, kids32: kids, ..Default::default() };
        let decoded = decode_value(&col, &encoded, &bufs).unwrap();
        assert_eq!(decoded.as_str(), Some("example.com"));
    }

    #[test]
    fn integer_column_round_trips() {
        let col = Column::parse("#4score", None).unwrap();
        let mut trie16 = TrieDict::new(VidWidth::Narrow16);
        let mut trie32 = TrieDict::new(VidWidth::Wide32);
        let encoded = encode_value(&col, &Value::Int(-42), &mut trie16, &mut trie32).unwrap();
        let decoded = decode_value(&col, &encoded, &TrieBuffers::default()).unwrap();
        assert_eq!(decoded.as_int(), Some(-42));
    }

    #[test]
    fn unseen_trie_lookup_has_no_vid() {
        let col = Column::parse("+site", None).unwrap();
        let bufs = TrieBuffers::default();
        let key = encode_lookup_key(&col, &Value::from("never-inserted"), &bufs).unwrap();
        assert_eq!(key, None);
    }

    #[test]
    fn lz4_column_round_trips() {
        let col = Column::parse("*payload", None).unwrap();
        let mut trie16 = TrieDict::new(VidWidth::Narrow16);
        let mut trie32 = TrieDict::new(VidWidth::Wide32);
        let long = "x".repeat(500);
        let encoded = encode_value(&col, &Value::from(long.as_str()), &mut trie16, &mut trie32).unwrap();
        assert!(encoded.len() < long.len());
        let decoded = decode_value(&col, &encoded, &TrieBuffers::default()).unwrap();
        assert_eq!(decoded.as_str(), Some(long.as_str()));
    }
}
