//! Interface to the tag-addressed distributed blob store (§6.2) that
//! holds and replicates marble files under tag names. This module names
//! the collaborator's surface only; the store itself (and its
//! replication, placement, and durability) is out of scope, matching
//! `hustle`'s reliance on `disco`'s DDFS rather than owning storage
//! itself.

use crate::error::MarbleResult;

/// Schema tag: `{prefix}:{table_name}`, carrying `_fields_`/`_partition_`
/// attributes. Partition tag: `{prefix}:{table_name}:{partition_value}`,
/// holding the marble URLs for that partition.
pub trait BlobStore {
    /// Lists every tag with the given prefix.
    fn list(&self, prefix: &str) -> MarbleResult<Vec<String>>;

    /// URLs of every blob replica pushed under `tag`.
    fn blobs(&self, tag: &str) -> MarbleResult<Vec<String>>;

    /// Registers `files` as new blobs under `tag`.
    fn push(&self, tag: &str, files: &[String]) -> MarbleResult<()>;

    fn delete(&self, tag: &str) -> MarbleResult<()>;

    fn setattr(&self, tag: &str, key: &str, value: &str) -> MarbleResult<()>;

    fn getattr(&self, tag: &str, key: &str) -> MarbleResult<Option<String>>;

    fn exists(&self, tag: &str) -> MarbleResult<bool>;

    /// Replaces `tag`'s blob list wholesale with `urls`.
    fn tag(&self, tag: &str, urls: &[String]) -> MarbleResult<()>;
}

/// Builds the schema tag for a table, e.g. `marbledb:impressions`.
pub fn schema_tag(prefix: &str, table_name: &str) -> String {
    format!("{prefix}:{table_name}")
}

/// Builds the partition tag for a table's partition value, e.g.
/// `marbledb:impressions:2014-01-27`.
pub fn partition_tag(prefix: &str, table_name: &str, partition_value: &str) -> String {
    format!("{prefix}:{table_name}:{partition_value}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// An in-memory stand-in used only to exercise the trait contract.
    #[derive(Default)]
    struct FakeBlobStore {
        tags: Mutex<HashMap<String, Vec<String>>>,
        attrs: Mutex<HashMap<(String, String), String>>,
    }

    impl BlobStore for FakeBlobStore {
        fn list(&self, prefix: &str) -> MarbleResult<Vec<String>> {
            Ok(self.tags.lock().unwrap().keys().filter(|t| t.starts_with(prefix)).cloned().collect())
        }
        fn blobs(&self, tag: &str) -> MarbleResult<Vec<String>> {
            Ok(self.tags.lock().unwrap().get(tag).cloned().unwrap_or_default())
        }
        fn push(&self, tag: &str, files: &[String]) -> MarbleResult<()> {
            self.tags.lock().unwrap().entry(tag.to_string()).or_default().extend(files.iter().cloned());
            Ok(())
        }
        fn delete(&self, tag: &str) -> MarbleResult<()> {
            self.tags.lock().unwrap().remove(tag);
            Ok(())
        }
        fn setattr(&self, tag: &str, key: &str, value: &str) -> MarbleResult<()> {
            self.attrs.lock().unwrap().insert((tag.to_string(), key.to_string()), value.to_string());
            Ok(())
        }
        fn getattr(&self, tag: &str, key: &str) -> MarbleResult<Option<String>> {
            Ok(self.attrs.lock().unwrap().get(&(tag.to_string(), key.to_string())).cloned())
        }
        fn exists(&self, tag: &str) -> MarbleResult<bool> {
            Ok(self.tags.lock().unwrap().contains_key(tag))
        }
        fn tag(&self, tag: &str, urls: &[String]) -> MarbleResult<()> {
            self.tags.lock().unwrap().insert(tag.to_string(), urls.to_vec());
            Ok(())
        }
    }

    #[test]
    fn push_then_blobs_round_trips() {
        let store = FakeBlobStore::default();
        let tag = schema_tag("marbledb", "impressions");
        store.push(&tag, &["file://a".to_string()]).unwrap();
        assert_eq!(store.blobs(&tag).unwrap(), vec!["file://a".to_string()]);
        assert!(store.exists(&tag).unwrap());
    }

    #[test]
    fn setattr_then_getattr_round_trips() {
        let store = FakeBlobStore::default();
        let tag = schema_tag("marbledb", "impressions");
        store.setattr(&tag, "_partition_", "date").unwrap();
        assert_eq!(store.getattr(&tag, "_partition_").unwrap(), Some("date".to_string()));
        assert_eq!(store.getattr(&tag, "missing").unwrap(), None);
    }

    #[test]
    fn partition_tag_follows_the_naming_convention() {
        assert_eq!(partition_tag("marbledb", "impressions", "2014-01-27"), "marbledb:impressions:2014-01-27");
    }
}
