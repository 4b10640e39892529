//! External merge sort (§4.7 steps 1-4): spill records to a scratch file,
//! shell out to the system `sort` binary, and read the result back.
//! Keeping per-task memory independent of input size this way is the
//! reason the engine spawns a subprocess at all (§5's "long blocks occur
//! at ... external-sort subprocess wait").

use crate::error::{MarbleError, MarbleResult};
use crate::tuple::Value;
use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::codec::{decode_record, encode_record, FieldCodec, FIELD_DELIM, RECORD_DELIM};

#[derive(Clone, Copy, Debug)]
pub struct SortKey {
    /// 0-based index into the record's field list.
    pub field: usize,
    pub numeric: bool,
    pub descending: bool,
}

/// Writes every record to `scratch_path`, invokes `sort -t '\xFF'` over
/// the given keys, and returns the path to the sorted file (distinct from
/// `scratch_path`; the caller is responsible for cleaning both up).
pub fn sort_records(
    records: impl IntoIterator<Item = Vec<Value>>,
    codecs: &[FieldCodec],
    keys: &[SortKey],
    scratch_path: &Path,
) -> MarbleResult<PathBuf> {
    {
        let mut f = std::fs::File::create(scratch_path)?;
        for record in records {
            f.write_all(&encode_record(&record, codecs))?;
        }
    }

    let sorted_path = scratch_path.with_extension("sorted");
    let mut cmd = Command::new("sort");
    cmd.env("LC_ALL", "C")
        .arg("-t")
        .arg(OsStr::from_bytes(&[FIELD_DELIM]))
        .arg("-o")
        .arg(&sorted_path);
    for key in keys {
        // sort's -k is 1-based; a trailing `n` sorts numerically, `r` reverses.
        let col = key.field + 1;
        let mut spec = format!("{col},{col}");
        if key.numeric {
            spec.push('n');
        }
        if key.descending {
            spec.push('r');
        }
        cmd.arg("-k").arg(spec);
    }
    cmd.arg(scratch_path);

    let status = cmd
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .status()
        .map_err(|e| MarbleError::storage(format!("failed to spawn external sort: {e}")))?;
    if !status.success() {
        return Err(MarbleError::storage(format!(
            "external sort exited with status {status}"
        )));
    }
    Ok(sorted_path)
}

/// Reads a file produced by [`sort_records`] back into decoded records, in
/// file order (i.e. sorted order).
pub fn read_sorted(path: &Path, codecs: &[FieldCodec]) -> MarbleResult<Vec<Vec<Value>>> {
    let file = std::fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut out = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader.read_until(RECORD_DELIM, &mut buf)?;
        if n == 0 {
            break;
        }
        if buf.last() == Some(&RECORD_DELIM) {
            buf.pop();
        }
        if buf.is_empty() {
            continue;
        }
        out.push(decode_record(&buf, codecs)?);
    }
    Ok(out)
}
