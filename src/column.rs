//! Column schema model and its prefix-coded wire grammar
//! (`ColumnSpec::parse`/`Column::schema_string`), grounded on
//! `Marble._parse_index_type`/`Column.schema_string` in
//! `hustle/core/marble.py`.

use crate::error::{MarbleError, MarbleResult};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Str,
    I32,
    U32,
    I16,
    U16,
    I8,
    U8,
    I64,
    U64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StringCompression {
    Trie,
    Raw,
    Lz4,
    Binary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrieWidth {
    Narrow16,
    Wide32,
}

impl From<TrieWidth> for crate::trie::VidWidth {
    fn from(w: TrieWidth) -> Self {
        match w {
            TrieWidth::Narrow16 => crate::trie::VidWidth::Narrow16,
            TrieWidth::Wide32 => crate::trie::VidWidth::Wide32,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    None,
    Narrow,
    Wide,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub alias: Option<String>,
    pub ty: ColumnType,
    pub compression: StringCompression,
    pub trie_width: TrieWidth,
    pub index: IndexKind,
    pub partition: bool,
}

impl Column {
    /// Parse a single prefix-coded field spec, e.g. `"+%4date"` (NARROW
    /// index, 32-bit trie) or `"@4ad_id"` (plain unsigned 32-bit integer).
    /// `partition_name`, if it matches the parsed column name, marks it as
    /// this marble's partition column.
    pub fn parse(spec: &str, partition_name: Option<&str>) -> MarbleResult<Self> {
        let mut ty = ColumnType::Str;
        let mut compression = StringCompression::Trie;
        let mut trie_width = TrieWidth::Wide32;
        let mut index = IndexKind::None;
        let mut rest = spec;

        loop {
            let bytes = rest.as_bytes();
            if bytes.len() <= 1 || bytes[0] >= b'a' {
                break;
            }
            match bytes[0] {
                b'+' => {
                    index = IndexKind::Narrow;
                    rest = &rest[1..];
                    continue;
                }
                b'=' => {
                    index = IndexKind::Wide;
                    rest = &rest[1..];
                    continue;
                }
                b'#' => {
                    ty = ColumnType::I32;
                    match bytes[1] {
                        b'2' => {
                            ty = ColumnType::I16;
                            rest = &rest[2..];
                        }
                        b'4' => rest = &rest[2..],
                        b'1' => {
                            ty = ColumnType::I8;
                            rest = &rest[2..];
                        }
                        b'8' => {
                            ty = ColumnType::I64;
                            rest = &rest[2..];
                        }
                        _ => rest = &rest[1..],
                    }
                }
                b'@' => {
                    ty = ColumnType::U32;
                    match bytes[1] {
                        b'2' => {
                            ty = ColumnType::U16;
                            rest = &rest[2..];
                        }
                        b'4' => rest = &rest[2..],
                        b'1' => {
                            ty = ColumnType::U8;
                            rest = &rest[2..];
                        }
                        b'8' => {
                            ty = ColumnType::U64;
                            rest = &rest[2..];
                        }
                        _ => rest = &rest[1..],
                    }
                }
                b'%' => match bytes[1] {
                    b'2' => {
                        trie_width = TrieWidth::Narrow16;
                        rest = &rest[2..];
                    }
                    b'4' => rest = &rest[2..],
                    _ => rest = &rest[1..],
                },
                b'$' => {
                    compression = StringCompression::Raw;
                    rest = &rest[1..];
                }
                b'*' => {
                    compression = StringCompression::Lz4;
                    rest = &rest[1..];
                }
                b'&' => {
                    compression = StringCompression::Binary;
                    rest = &rest[1..];
                }
                _ => break,
            }
            break;
        }

        if rest.is_empty() {
            return Err(MarbleError::schema(format!(
                "column spec '{spec}' has no field name after its prefix"
            )));
        }

        let name = rest.to_string();
        let partition = partition_name == Some(name.as_str());
        if partition && (ty != ColumnType::Str || compression != StringCompression::Raw) {
            return Err(MarbleError::schema(format!(
                "partition column '{name}' must be a RAW string (got a typed/trie/lz4/binary spec)"
            )));
        }

        Ok(Column {
            name,
            alias: None,
            ty,
            compression,
            trie_width,
            index,
            partition,
        })
    }

    pub fn named(&self, alias: impl Into<String>) -> Column {
        let mut c = self.clone();
        c.alias = Some(alias.into());
        c
    }

    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn is_trie(&self) -> bool {
        self.ty == ColumnType::Str && self.compression == StringCompression::Trie
    }

    pub fn is_lz4(&self) -> bool {
        self.ty == ColumnType::Str && self.compression == StringCompression::Lz4
    }

    pub fn is_binary(&self) -> bool {
        self.ty == ColumnType::Str && self.compression == StringCompression::Binary
    }

    pub fn is_raw_string(&self) -> bool {
        self.ty == ColumnType::Str && self.compression == StringCompression::Raw
    }

    /// Whether this column's effective storage value is an integer (true
    /// for every numeric type, and for TRIE strings via their VID).
    pub fn is_int(&self) -> bool {
        self.ty != ColumnType::Str || self.is_trie()
    }

    pub fn is_numeric(&self) -> bool {
        self.ty != ColumnType::Str
    }

    pub fn is_indexed(&self) -> bool {
        self.index != IndexKind::None
    }

    pub fn is_wide(&self) -> bool {
        self.index == IndexKind::Wide
    }

    /// TRIE/LZ4/BINARY columns only support equality/set-membership, not
    /// range queries, unless they are the partition column (partition
    /// pruning runs over raw tag strings, not index bitmaps).
    pub fn supports_range_query(&self) -> bool {
        self.partition || !(self.is_trie() || self.is_lz4() || self.is_binary())
    }

    /// The prefix-coded wire form, the exact inverse of `parse` (modulo the
    /// unrecognized-suffix-character edge cases `parse` also tolerates).
    pub fn schema_string(&self) -> String {
        let mut prefix = match self.index {
            IndexKind::None => String::new(),
            IndexKind::Narrow => "+".to_string(),
            IndexKind::Wide => "=".to_string(),
        };
        match self.ty {
            ColumnType::Str => match self.compression {
                StringCompression::Trie => {
                    prefix.push('%');
                    prefix.push(match self.trie_width {
                        TrieWidth::Wide32 => '4',
                        TrieWidth::Narrow16 => '2',
                    });
                }
                StringCompression::Raw => prefix.push('$'),
                StringCompression::Lz4 => prefix.push('*'),
                StringCompression::Binary => prefix.push('&'),
            },
            ColumnType::I32 => prefix.push_str("#4"),
            ColumnType::U32 => prefix.push_str("@4"),
            ColumnType::I16 => prefix.push_str("#2"),
            ColumnType::U16 => prefix.push_str("@2"),
            ColumnType::I8 => prefix.push_str("#1"),
            ColumnType::U8 => prefix.push_str("@1"),
            ColumnType::I64 => prefix.push_str("#8"),
            ColumnType::U64 => prefix.push_str("@8"),
        }
        prefix.push_str(self.display_name());
        prefix
    }

    /// A human-readable type/flag summary, e.g. `"date (trie32,IX,PT)"`.
    pub fn description(&self) -> String {
        let mut rval = match self.ty {
            ColumnType::Str => String::new(),
            ColumnType::I32 => "int32".to_string(),
            ColumnType::U32 => "uint32".to_string(),
            ColumnType::I16 => "int16".to_string(),
            ColumnType::U16 => "uint16".to_string(),
            ColumnType::I8 => "int8".to_string(),
            ColumnType::U8 => "uint8".to_string(),
            ColumnType::I64 => "int64".to_string(),
            ColumnType::U64 => "uint64".to_string(),
        };
        if self.ty == ColumnType::Str {
            rval.push_str(match self.compression {
                StringCompression::Trie => "trie",
                StringCompression::Raw => "string",
                StringCompression::Lz4 => "lz4",
                StringCompression::Binary => "binary",
            });
            if self.compression == StringCompression::Trie {
                rval.push_str(match self.trie_width {
                    TrieWidth::Wide32 => "32",
                    TrieWidth::Narrow16 => "16",
                });
            }
        }
        let mut inds = vec![rval];
        if self.is_indexed() {
            inds.push("IX".to_string());
        }
        if self.partition {
            inds.push("PT".to_string());
        }
        format!("{} ({})", self.display_name(), inds.join(","))
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}
