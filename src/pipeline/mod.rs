//! The 6-stage query pipeline (§4.8), compiled from a logical `Query` and
//! driven here as a single-process execution over an explicit list of
//! local marble files — the distributed half of
//! `hustle/core/pipeline.py::SelectPipe` (subclassing `disco.core.Job`,
//! per-task scheduling) is out of scope; `StageRunner` is the seam a real
//! scheduler would implement instead of [`LocalRunner`].

pub mod label;
pub mod stages;

use crate::aggregation::Aggregator;
use crate::column::Column;
use crate::config::EngineConfig;
use crate::error::{MarbleError, MarbleResult};
use crate::marble::MarbleStream;
use crate::output_sink::OutputSink;
use crate::predicate::{BitmapSource, Expr};
use crate::shuffle::merge::{compare_records, MergeKey};
use crate::tuple::{Tuple, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stages::{process_group, process_join, process_order, process_skip_group, JoinRecord, ProjectItem};

/// One projected output column: either a plain field or an aggregation
/// over a field.
#[derive(Clone)]
pub enum Select {
    Column(Column),
    Agg(Aggregator, Column),
}

impl Select {
    fn column(&self) -> &Column {
        match self {
            Select::Column(c) => c,
            Select::Agg(_, c) => c,
        }
    }

    fn is_agg(&self) -> bool {
        matches!(self, Select::Agg(..))
    }
}

/// The right-hand side of a join: its own partitions, the columns
/// projected from it, and which projected column on each side carries the
/// shared join key (`select(...)`'s "either a pair of columns or a single
/// shared column name").
pub struct Join {
    pub right_partitions: Vec<(String, PathBuf)>,
    pub right_project: Vec<Select>,
    pub left_key: usize,
    pub right_key: usize,
}

/// Where a `nest=true` query's output goes instead of back to the caller:
/// a brand new marble, written through [`OutputSink`] the same way any
/// other table is, then copied to `destination`.
pub struct NestTarget {
    pub table_name: String,
    pub schema: Vec<Column>,
    pub scratch_dir: PathBuf,
    pub destination: PathBuf,
    pub config: Arc<EngineConfig>,
}

/// What `select()` hands back: a streaming-style list of tuples for a
/// plain query, or the sealed partitions of a new table when the query
/// had `nest=true`.
pub enum SelectOutput {
    Tuples(Vec<Tuple>),
    Table(Vec<PathBuf>),
}

impl SelectOutput {
    /// Unwraps the tuple case. Panics if this was a `nest=true` query,
    /// which produces a table handle instead.
    pub fn into_tuples(self) -> Vec<Tuple> {
        match self {
            SelectOutput::Tuples(t) => t,
            SelectOutput::Table(_) => panic!("select() returned a table handle (query had nest set), not tuples"),
        }
    }
}

pub struct Query {
    pub predicate: Option<Expr>,
    pub project: Vec<Select>,
    /// Indices into the combined (post-join) select list to sort by;
    /// empty means "don't care".
    pub order_by: Vec<usize>,
    pub distinct: bool,
    pub desc: bool,
    pub limit: Option<usize>,
    pub partitions: u32,
    pub join: Option<Join>,
    pub full_join: bool,
    pub nest: Option<NestTarget>,
}

impl Query {
    pub fn new(project: Vec<Select>) -> Self {
        Self {
            predicate: None,
            project,
            order_by: Vec::new(),
            distinct: false,
            desc: false,
            limit: None,
            partitions: 16,
            join: None,
            full_join: false,
            nest: None,
        }
    }

    pub fn r#where(mut self, predicate: Expr) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn order_by(mut self, indices: Vec<usize>) -> Self {
        self.order_by = indices;
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn desc(mut self) -> Self {
        self.desc = true;
        self
    }

    pub fn limit(mut self, n: i64) -> MarbleResult<Self> {
        if n < 0 {
            return Err(MarbleError::query("LIMIT must not be negative"));
        }
        self.limit = Some(n as usize);
        Ok(self)
    }

    pub fn join(mut self, join: Join) -> Self {
        self.join = Some(join);
        self
    }

    pub fn full_join(mut self) -> Self {
        self.full_join = true;
        self
    }

    pub fn nest(mut self, target: NestTarget) -> Self {
        self.nest = Some(target);
        self
    }

    /// The select list actually produced once a join's right-hand columns
    /// are appended to the left-hand `project` list.
    fn combined_project(&self) -> Vec<&Select> {
        match &self.join {
            Some(j) => self.project.iter().chain(j.right_project.iter()).collect(),
            None => self.project.iter().collect(),
        }
    }

    /// Restores `check_query`'s synchronous validation: empty select,
    /// duplicate projected columns, and order-by columns that aren't
    /// projected are all `QueryError`s raised before any stage executes.
    pub fn validate(&self) -> MarbleResult<()> {
        if self.project.is_empty() {
            return Err(MarbleError::query("select list must not be empty"));
        }
        let combined = self.combined_project();
        let mut seen = HashSet::new();
        for s in &combined {
            if !s.is_agg() && !seen.insert(s.column().name.clone()) {
                return Err(MarbleError::query(format!(
                    "column '{}' is projected more than once",
                    s.column().name
                )));
            }
        }
        for &i in &self.order_by {
            if i >= combined.len() {
                return Err(MarbleError::query("ORDER BY column is not in the select list"));
            }
        }
        if self.full_join && self.join.is_none() {
            return Err(MarbleError::query("full_join requires a join"));
        }
        if let Some(join) = &self.join {
            if join.left_key >= self.project.len() || join.right_key >= join.right_project.len() {
                return Err(MarbleError::query("join key index is out of the projected range"));
            }
        }
        Ok(())
    }
}

fn all_aggregations(items: &[&Select]) -> bool {
    !items.is_empty() && items.iter().all(|s| s.is_agg())
}

/// The seam a real distributed scheduler plugs into instead of
/// [`LocalRunner`]: anything that can turn a pruned partition list plus a
/// compiled `Query` into projected tuples.
pub trait StageRunner {
    fn restrict(&self, partitions: &[PathBuf], query: &Query) -> MarbleResult<Vec<Vec<Value>>>;
}

/// Runs every stage in-process against on-disk marble partitions.
pub struct LocalRunner;

impl StageRunner for LocalRunner {
    fn restrict(&self, partitions: &[PathBuf], query: &Query) -> MarbleResult<Vec<Vec<Value>>> {
        let mut out = Vec::new();
        for path in partitions {
            let env = crate::kv::KvEnv::open_read_only(path, 100 * 1024 * 1024, 16)?;
            let stream = MarbleStream::open(&env)?;
            let bitmap = match &query.predicate {
                Some(expr) => expr.eval_rows(&stream, false)?,
                None => None,
            };
            let rids: Vec<u32> = match bitmap {
                Some(bm) => bm.iter().collect(),
                None => (1..=stream.row_count()).collect(),
            };
            for rid in rids {
                let mut row = Vec::with_capacity(query.project.len());
                for select in &query.project {
                    row.push(stream.get(&select.column().name, rid)?);
                }
                out.push(row);
            }
        }
        Ok(out)
    }
}

/// Compiles and runs `query` against the given sealed partition files,
/// pruning by `tags` first when the predicate touches the partition
/// column. Mirrors `SelectPipe`'s stage sequence minus the distributed
/// scheduling it otherwise relies on.
pub fn select(
    partitions: &[(String, PathBuf)],
    query: Query,
    runner: &dyn StageRunner,
) -> MarbleResult<SelectOutput> {
    query.validate()?;

    let tags: Vec<String> = partitions.iter().map(|(tag, _)| tag.clone()).collect();
    let kept_tags = match &query.predicate {
        Some(expr) => expr.eval_partition(&tags, false),
        None => tags,
    };
    let kept: Vec<PathBuf> = partitions
        .iter()
        .filter(|(tag, _)| kept_tags.contains(tag))
        .map(|(_, path)| path.clone())
        .collect();

    let left_rows = runner.restrict(&kept, &query)?;

    let mut rows = match &query.join {
        None => left_rows,
        Some(join) => {
            let right_paths: Vec<PathBuf> = join.right_partitions.iter().map(|(_, p)| p.clone()).collect();
            let right_query = Query::new(join.right_project.clone());
            let right_rows = runner.restrict(&right_paths, &right_query)?;
            join_rows(&query, join, left_rows, right_rows)
        }
    };

    let combined = query.combined_project();
    if combined.iter().any(|s| s.is_agg()) {
        if all_aggregations(&combined) {
            let aggs: Vec<(Aggregator, usize)> = combined
                .iter()
                .enumerate()
                .map(|(i, s)| match s {
                    Select::Agg(agg, _) => (agg.clone(), i),
                    Select::Column(_) => unreachable!("all_aggregations checked above"),
                })
                .collect();
            rows = vec![process_skip_group(rows, &aggs)];
        } else {
            let items: Vec<ProjectItem> = combined
                .iter()
                .enumerate()
                .map(|(i, s)| match s {
                    Select::Column(_) => ProjectItem::Plain(i),
                    Select::Agg(agg, _) => ProjectItem::Agg(agg.clone(), i),
                })
                .collect();
            rows = process_group(rows, &items, true);
        }
    }

    if !query.order_by.is_empty() || query.distinct || query.limit.is_some() {
        let sort_cols = if query.order_by.is_empty() {
            (0..combined.len()).collect::<Vec<_>>()
        } else {
            query.order_by.clone()
        };
        let keys: Vec<MergeKey> = sort_cols.iter().map(|&field| MergeKey { field, descending: query.desc }).collect();
        rows.sort_by(|a, b| compare_records(a, b, &keys));
        rows = process_order(rows, &sort_cols, query.distinct, query.limit.unwrap_or(usize::MAX));
    }

    match query.nest {
        None => Ok(SelectOutput::Tuples(rows.into_iter().map(Tuple::new).collect())),
        Some(target) => {
            let mut sink = OutputSink::new(target.table_name, target.schema, target.scratch_dir, target.destination, target.config)?;
            for row in &rows {
                sink.add(row)?;
            }
            Ok(SelectOutput::Table(sink.close()?))
        }
    }
}

/// Async counterpart to [`select`]: drives the same pipeline — every stage
/// from restrict through aggregation/order already has to materialize its
/// full result before the next stage can run, so there's no partial result
/// to yield early — then exposes the finished tuples as a
/// `futures_util::stream::Stream` instead of a `Vec`, for callers embedded
/// in an async runtime that want `Stream` rather than `IntoIterator`.
/// `nest` queries produce a table handle, not a tuple stream; use
/// [`select`] for those.
pub async fn select_async(
    partitions: &[(String, PathBuf)],
    query: Query,
    runner: &dyn StageRunner,
) -> MarbleResult<impl futures_util::stream::Stream<Item = Tuple>> {
    if query.nest.is_some() {
        return Err(MarbleError::query("select_async does not support nest; use select() for queries that write to a table"));
    }
    let tuples = select(partitions, query, runner)?.into_tuples();
    Ok(futures_util::stream::iter(tuples))
}

/// Builds the sorted `(join_key, left-before-right)` input `process_join`
/// expects out of both sides' restricted rows, runs the join stage, then
/// — when `full_join` is set — appends unmatched left rows with the
/// right-hand columns filled with `Value::Null`.
fn join_rows(query: &Query, join: &Join, left_rows: Vec<Vec<Value>>, right_rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    let left_len = query.project.len();
    let right_len = join.right_project.len();

    let mut sorted = Vec::with_capacity(left_rows.len() + right_rows.len());
    for row in &left_rows {
        let mut rest = row.clone();
        rest.extend(std::iter::repeat(Value::Null).take(right_len));
        sorted.push(JoinRecord { left: true, join_key: row[join.left_key].clone(), rest });
    }
    for row in &right_rows {
        let mut rest = Vec::with_capacity(left_len + right_len);
        rest.extend(std::iter::repeat(Value::Null).take(left_len));
        rest.extend(row.iter().cloned());
        sorted.push(JoinRecord { left: false, join_key: row[join.right_key].clone(), rest });
    }
    sorted.sort_by(|a, b| (a.join_key.clone(), !a.left).cmp(&(b.join_key.clone(), !b.left)));

    let label_cols: Vec<usize> = (0..(left_len + right_len)).collect();
    let mut joined: Vec<Vec<Value>> = process_join(&sorted, &label_cols, query.partitions).into_iter().map(|(_, row)| row).collect();

    if query.full_join {
        let right_keys: std::collections::BTreeSet<&Value> = right_rows.iter().map(|r| &r[join.right_key]).collect();
        for row in &left_rows {
            if !right_keys.contains(&row[join.left_key]) {
                let mut full = row.clone();
                full.extend(std::iter::repeat(Value::Null).take(right_len));
                joined.push(full);
            }
        }
    }

    joined
}

/// Asserts a partition replica is resident on this host, mirroring
/// `process_restrict`'s `inp.input.replicas` local-residency check before
/// a stage will touch a blob — left as a free function rather than baked
/// into `LocalRunner` because a non-local backing store (the external
/// blob collaborator in `blobstore`) may resolve residency differently.
pub fn assert_local_residency(path: &Path, local_host: &str, replica_host: &str) -> MarbleResult<()> {
    if local_host != replica_host {
        return Err(MarbleError::storage(format!(
            "input {} has no local replica on {local_host}",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Column;
    use crate::config::EngineConfig;
    use crate::marble::writer::{MarbleWriter, Record};
    use crate::predicate::{CmpOp, Literal};
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

    fn build_fixture() -> (tempfile::TempDir, Vec<(String, PathBuf)>) {
        let scratch = tempdir().unwrap();
        let mut w = MarbleWriter::new("impressions", schema(), scratch.path(), Arc::new(EngineConfig::default())).unwrap();
        w.write_all([
            record("2014-01-27", 10, "a.com"),
            record("2014-01-27", 20, "b.com"),
            record("2014-01-28", 10, "a.com"),
        ])
        .unwrap();
        let sealed = w.close().unwrap();
        let partitions = sealed.into_iter().map(|s| (s.partition_tag, s.path)).collect();
        (scratch, partitions)
    }

    #[test]
    fn select_projects_matching_rows() {
        let (_scratch, partitions) = build_fixture();
        let cols = schema();
        let query = Query::new(vec![Select::Column(cols[2].clone())])
            .r#where(Expr::compare(&cols[1], CmpOp::Eq, Literal::Scalar(Value::Int(10))).unwrap());

        let rows = select(&partitions, query, &LocalRunner).unwrap().into_tuples();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|t| t.values[0].as_str() == Some("a.com")));
    }

    #[test]
    fn select_prunes_partitions_by_tag() {
        let (_scratch, partitions) = build_fixture();
        let cols = schema();
        let query = Query::new(vec![Select::Column(cols[1].clone())])
            .r#where(Expr::compare(&cols[0], CmpOp::Eq, Literal::Scalar(Value::from("2014-01-27"))).unwrap());

        let rows = select(&partitions, query, &LocalRunner).unwrap().into_tuples();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn select_with_aggregation_produces_one_row_per_group() {
        let (_scratch, partitions) = build_fixture();
        let cols = schema();
        let query = Query::new(vec![Select::Column(cols[2].clone()), Select::Agg(Aggregator::Count, cols[1].clone())]);

        let rows = select(&partitions, query, &LocalRunner).unwrap().into_tuples();
        assert_eq!(rows.len(), 2);
        let a_row = rows.iter().find(|t| t.values[0].as_str() == Some("a.com")).unwrap();
        assert_eq!(a_row.values[1], Value::Int(2));
    }

    #[test]
    fn select_all_aggregations_collapses_to_one_row() {
        let (_scratch, partitions) = build_fixture();
        let cols = schema();
        let query = Query::new(vec![Select::Agg(Aggregator::Count, cols[1].clone())]);

        let rows = select(&partitions, query, &LocalRunner).unwrap().into_tuples();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values[0], Value::Int(3));
    }

    #[test]
    fn select_orders_and_limits() {
        let (_scratch, partitions) = build_fixture();
        let cols = schema();
        let query = Query::new(vec![Select::Column(cols[1].clone())]).order_by(vec![0]).limit(2).unwrap();

        let rows = select(&partitions, query, &LocalRunner).unwrap().into_tuples();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].values[0], Value::Int(10));
    }

    #[test]
    fn empty_select_list_is_a_query_error() {
        let query = Query::new(vec![]);
        assert!(query.validate().is_err());
    }

    #[test]
    fn negative_limit_is_a_query_error() {
        let cols = schema();
        let err = Query::new(vec![Select::Column(cols[1].clone())]).limit(-1);
        assert!(err.is_err());
    }

    fn amounts_schema() -> Vec<Column> {
        vec![
            Column::parse("+$tag", Some("tag")).unwrap(),
            Column::parse("=@4ad_id", None).unwrap(),
            Column::parse("=@8amount", None).unwrap(),
        ]
    }

    fn amount_record(ad_id: i64, amount: i64) -> Record {
        let mut r = Record::new();
        r.insert("tag".to_string(), Value::from("p"));
        r.insert("ad_id".to_string(), Value::Int(ad_id));
        r.insert("amount".to_string(), Value::Int(amount));
        r
    }

    fn build_amounts_fixture() -> (tempfile::TempDir, Vec<(String, PathBuf)>) {
        let scratch = tempdir().unwrap();
        let mut w = MarbleWriter::new("amounts", amounts_schema(), scratch.path(), Arc::new(EngineConfig::default())).unwrap();
        w.write_all([amount_record(10, 100), amount_record(10, 50), amount_record(20, 10)]).unwrap();
        let sealed = w.close().unwrap();
        let partitions = sealed.into_iter().map(|s| (s.partition_tag, s.path)).collect();
        (scratch, partitions)
    }

    #[test]
    fn select_with_join_reaches_process_join_through_the_public_api() {
        let (_left_scratch, left_partitions) = build_fixture();
        let (_right_scratch, right_partitions) = build_amounts_fixture();
        let left_cols = schema();
        let right_cols = amounts_schema();

        let query = Query::new(vec![Select::Column(left_cols[2].clone()), Select::Column(left_cols[1].clone())]).join(Join {
            right_partitions,
            right_project: vec![Select::Column(right_cols[1].clone()), Select::Column(right_cols[2].clone())],
            left_key: 1,
            right_key: 0,
        });

        let rows = select(&left_partitions, query, &LocalRunner).unwrap().into_tuples();
        // ad_id=10 appears twice on the left (both "a.com") and twice on the right (100, 50):
        // 2 left * 2 right = 4 joined rows; ad_id=20 has one match on each side.
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|t| t.values.len() == 4));
    }

    #[test]
    fn full_join_keeps_unmatched_left_rows() {
        let (_left_scratch, left_partitions) = build_fixture();
        let (_right_scratch, right_partitions) = build_amounts_fixture();
        let left_cols = schema();
        let right_cols = amounts_schema();

        // ad_id=30 has no match on either side of the fixture data, so add
        // one more left row with an ad_id the right side never has.
        let scratch = tempdir().unwrap();
        let mut w = MarbleWriter::new("impressions2", schema(), scratch.path(), Arc::new(EngineConfig::default())).unwrap();
        w.write_all([record("2014-01-29", 99, "c.com")]).unwrap();
        let sealed = w.close().unwrap();
        let mut partitions = left_partitions;
        partitions.extend(sealed.into_iter().map(|s| (s.partition_tag, s.path)));

        let query = Query::new(vec![Select::Column(left_cols[2].clone()), Select::Column(left_cols[1].clone())])
            .join(Join {
                right_partitions,
                right_project: vec![Select::Column(right_cols[1].clone()), Select::Column(right_cols[2].clone())],
                left_key: 1,
                right_key: 0,
            })
            .full_join();

        let rows = select(&partitions, query, &LocalRunner).unwrap().into_tuples();
        assert!(rows.iter().any(|t| t.values[0].as_str() == Some("c.com") && t.values[3].is_null()));
    }

    #[test]
    fn nest_writes_results_to_a_new_table_instead_of_tuples() {
        let (_scratch, partitions) = build_fixture();
        let cols = schema();
        let dest = tempdir().unwrap();
        let nest_scratch = tempdir().unwrap();
        let query = Query::new(vec![Select::Column(cols[2].clone())]).nest(NestTarget {
            table_name: "nested".to_string(),
            schema: vec![cols[2].clone()],
            scratch_dir: nest_scratch.path().to_path_buf(),
            destination: dest.path().to_path_buf(),
            config: Arc::new(EngineConfig::default()),
        });

        let output = select(&partitions, query, &LocalRunner).unwrap();
        match output {
            SelectOutput::Table(paths) => assert!(!paths.is_empty()),
            SelectOutput::Tuples(_) => panic!("nest=true query should return a table handle"),
        }
    }

    #[test]
    fn select_async_yields_the_same_rows_as_select() {
        use futures_util::stream::StreamExt;
        use futures_util::FutureExt;

        let (_scratch, partitions) = build_fixture();
        let cols = schema();
        let query = Query::new(vec![Select::Column(cols[0].clone()), Select::Column(cols[2].clone())])
            .r#where(Expr::compare(&cols[1], CmpOp::Eq, Literal::Scalar(Value::Int(10))).unwrap());

        // select_async never awaits anything internally — every stage
        // already ran synchronously by the time the stream is handed back —
        // so the future resolves on its first poll.
        let stream = select_async(&partitions, query, &LocalRunner)
            .now_or_never()
            .expect("select_async resolves without yielding")
            .unwrap();
        let rows: Vec<Tuple> = stream.collect().now_or_never().expect("stream drains without yielding");

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|t| t.values[1].as_str() == Some("a.com")));
    }

    #[test]
    fn select_async_rejects_nest_queries() {
        use futures_util::FutureExt;

        let (_scratch, partitions) = build_fixture();
        let cols = schema();
        let dest = tempdir().unwrap();
        let nest_scratch = tempdir().unwrap();
        let query = Query::new(vec![Select::Column(cols[2].clone())]).nest(NestTarget {
            table_name: "nested".to_string(),
            schema: vec![cols[2].clone()],
            scratch_dir: nest_scratch.path().to_path_buf(),
            destination: dest.path().to_path_buf(),
            config: Arc::new(EngineConfig::default()),
        });

        let result = select_async(&partitions, query, &LocalRunner).now_or_never().expect("resolves without yielding");
        assert!(result.is_err());
    }
}
