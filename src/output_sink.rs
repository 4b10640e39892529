//! Output routing for nested query results (§4.9), grounded on
//! `hustle/core/pipeline.py::hustle_output_stream`'s `HustleOutputStream`:
//! a result table is written the same way any other marble is, then its
//! sealed partitions are copied to their destination and the scratch
//! copy is removed.

use crate::column::Column;
use crate::config::EngineConfig;
use crate::error::MarbleResult;
use crate::marble::writer::{MarbleWriter, Record, SealedMarble};
use crate::tuple::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct OutputSink {
    writer: MarbleWriter,
    schema: Vec<Column>,
    destination: PathBuf,
}

impl OutputSink {
    pub fn new(
        table_name: impl Into<String>,
        schema: Vec<Column>,
        scratch_dir: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        config: Arc<EngineConfig>,
    ) -> MarbleResult<Self> {
        let writer = MarbleWriter::new(table_name, schema.clone(), scratch_dir, config)?;
        Ok(Self { writer, schema, destination: destination.into() })
    }

    /// Mirrors `HustleOutputStream.add`: zips a projected tuple onto the
    /// result schema's column names and appends one record.
    pub fn add(&mut self, values: &[Value]) -> MarbleResult<()> {
        let mut record = Record::new();
        for (col, value) in self.schema.iter().zip(values) {
            record.insert(col.name.clone(), value.clone());
        }
        self.writer.write_one(&record)
    }

    /// Mirrors `HustleOutputStream.close`: seals every open partition, then
    /// copies each to `destination` and removes the scratch copy. A failed
    /// copy leaves the scratch file in place so nothing is silently lost.
    pub fn close(self) -> MarbleResult<Vec<PathBuf>> {
        let sealed = self.writer.close()?;
        let mut out = Vec::with_capacity(sealed.len());
        for SealedMarble { partition_tag, path, .. } in sealed {
            let dest = self.destination.join(&partition_tag);
            copy_dir_recursive(&path, &dest)?;
            std::fs::remove_dir_all(&path)?;
            out.push(dest);
        }
        Ok(out)
    }
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> MarbleResult<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marble::reader::MarbleStream;
    use crate::kv::KvEnv;
    use tempfile::tempdir;

    fn schema() -> Vec<Column> {
        vec![Column::parse("+$date", Some("date")).unwrap(), Column::parse("=@4ad_id", None).unwrap()]
    }

    #[test]
    fn add_and_close_writes_a_readable_marble() {
        let scratch = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let mut sink = OutputSink::new("result", schema(), scratch.path(), dest.path(), Arc::new(EngineConfig::default())).unwrap();
        sink.add(&[Value::from("2014-01-27"), Value::Int(5)]).unwrap();
        sink.add(&[Value::from("2014-01-27"), Value::Int(6)]).unwrap();
        let paths = sink.close().unwrap();
        assert_eq!(paths.len(), 1);

        let env = KvEnv::open_read_only(&paths[0], 10 * 1024 * 1024, 8).unwrap();
        let stream = MarbleStream::open(&env).unwrap();
        assert_eq!(stream.meta().total_rows, 2);
    }
}
