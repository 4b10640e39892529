//! Per-stage processor functions (§4.8), grounded on
//! `hustle/core/pipeline.py`'s `process_restrict`/`process_join`/
//! `process_group`/`process_skip_group`/`process_order`. The source
//! threads an always-empty value half alongside every key tuple
//! (`empty = ()` at every call site); since it never carries data, these
//! functions drop it and operate on a single tuple (`Vec<Value>`) per
//! record.

use crate::aggregation::{Accumulate, AggState, Aggregator};
use crate::tuple::Value;
use std::collections::HashMap;

use super::label::tuple_hash;

/// A projected item is either a plain column carried through as a
/// group-by key, or an aggregation reducing one input column.
pub enum ProjectItem {
    Plain(usize),
    Agg(Aggregator, usize),
}

/// Stage 1: tag each restrict-selected record with its shuffle label.
pub fn process_restrict(records: Vec<Vec<Value>>, label_cols: &[usize], partitions: u32) -> Vec<(u32, Vec<Value>)> {
    records
        .into_iter()
        .map(|r| {
            let label = tuple_hash(&r, label_cols, partitions);
            (label, r)
        })
        .collect()
}

/// A join-stage input record: which side of the join it came from, its
/// join key, and the remaining projected columns.
pub struct JoinRecord {
    pub left: bool,
    pub join_key: Value,
    pub rest: Vec<Value>,
}

/// Stage 2: merges records already sorted by `(join_key, left-before-right)`.
/// For every join-key group, every right record is paired with every
/// buffered left record; a column absent on one side is filled from the
/// other.
pub fn process_join(sorted: &[JoinRecord], label_cols: &[usize], partitions: u32) -> Vec<(u32, Vec<Value>)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let key = &sorted[i].join_key;
        let mut left_buf: Vec<&Vec<Value>> = Vec::new();
        let mut j = i;
        while j < sorted.len() && &sorted[j].join_key == key {
            let rec = &sorted[j];
            if rec.left {
                left_buf.push(&rec.rest);
            } else if !left_buf.is_empty() {
                for left in &left_buf {
                    let merged = merge_record(left, &rec.rest);
                    let label = tuple_hash(&merged, label_cols, partitions);
                    out.push((label, merged));
                }
            }
            j += 1;
        }
        i = j;
    }
    out
}

fn merge_record(a: &[Value], b: &[Value]) -> Vec<Value> {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| if !x.is_null() { x.clone() } else { y.clone() })
        .collect()
}

/// Stages 3/4: groups by every `Plain` projected column and accumulates
/// every `Agg` column, finalizing only when `finalize` is true (group-reduce,
/// not group-combine, per §4.10's f/h/g split).
pub fn process_group(records: Vec<Vec<Value>>, items: &[ProjectItem], finalize: bool) -> Vec<Vec<Value>> {
    let mut groups: HashMap<Vec<Value>, Vec<AggState>> = HashMap::new();
    let mut order: Vec<Vec<Value>> = Vec::new();

    for record in &records {
        let key: Vec<Value> = items
            .iter()
            .map(|it| match it {
                ProjectItem::Plain(i) => record[*i].clone(),
                ProjectItem::Agg(_, _) => Value::Null,
            })
            .collect();
        let is_new = !groups.contains_key(&key);
        let states = groups.entry(key.clone()).or_insert_with(|| {
            items
                .iter()
                .map(|it| match it {
                    ProjectItem::Plain(_) => AggState::Count(0),
                    ProjectItem::Agg(agg, _) => agg.default_state(),
                })
                .collect()
        });
        if is_new {
            order.push(key);
        }
        for (state, it) in states.iter_mut().zip(items) {
            if let ProjectItem::Agg(agg, i) = it {
                agg.map(state, &record[*i]);
            }
        }
    }

    order
        .into_iter()
        .map(|key| {
            let states = &groups[&key];
            items
                .iter()
                .zip(states)
                .enumerate()
                .map(|(pos, (it, state))| match it {
                    ProjectItem::Plain(_) => key[pos].clone(),
                    ProjectItem::Agg(agg, _) if finalize => agg.finalize(state),
                    ProjectItem::Agg(_, _) => encode_partial(state),
                })
                .collect()
        })
        .collect()
}

/// Stage combine: merges two partial accumulator rows produced by an
/// earlier, unfinalized `process_group` pass (h in §4.10's notation).
pub fn combine_partials(agg: &Aggregator, accumulated: &mut AggState, incoming: &AggState) {
    agg.combine(accumulated, incoming);
}

fn encode_partial(state: &AggState) -> Value {
    // Partial accumulators never leave the process in this single-process
    // port (no shuffle boundary to cross), so they pass through opaquely.
    match state {
        AggState::Sum(v) => Value::Int(*v),
        AggState::Count(v) => Value::Int(*v as i64),
        AggState::Min(v) | AggState::Max(v) => v.map(Value::Int).unwrap_or(Value::Null),
        AggState::Avg(sum, count) => Value::Int(if *count == 0 { 0 } else { sum / *count as i64 }),
        AggState::Extension(bytes) => Value::Bytes(bytes.clone()),
    }
}

/// Used when every projected column is an aggregation: one global
/// accumulator, one output record for the whole stream (§4.10's
/// "skip-group" path).
pub fn process_skip_group(records: Vec<Vec<Value>>, aggs: &[(Aggregator, usize)]) -> Vec<Value> {
    let mut states: Vec<AggState> = aggs.iter().map(|(agg, _)| agg.default_state()).collect();
    for record in &records {
        for (state, (agg, i)) in states.iter_mut().zip(aggs) {
            agg.map(state, &record[*i]);
        }
    }
    states.iter().zip(aggs).map(|(s, (agg, _))| agg.finalize(s)).collect()
}

/// Stages 5/6: applies DISTINCT (dedup consecutive equal keys — the input
/// must already be sorted) and LIMIT. `key_cols` restricts distinct
/// comparison to non-binary projected columns, per the "DISTINCT ignores
/// BINARY columns" resolution.
pub fn process_order(sorted: Vec<Vec<Value>>, key_cols: &[usize], distinct: bool, limit: usize) -> Vec<Vec<Value>> {
    if !distinct {
        return sorted.into_iter().take(limit).collect();
    }
    let mut out = Vec::new();
    let mut last_key: Option<Vec<Value>> = None;
    for record in sorted {
        let key: Vec<Value> = key_cols.iter().map(|&i| record[i].clone()).collect();
        if last_key.as_ref() != Some(&key) {
            last_key = Some(key);
            out.push(record);
            if out.len() >= limit {
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restrict_tags_every_record_with_a_label() {
        let records = vec![vec![Value::Int(1)], vec![Value::Int(2)]];
        let tagged = process_restrict(records, &[0], 4);
        assert_eq!(tagged.len(), 2);
        assert!(tagged.iter().all(|(l, _)| *l < 4));
    }

    #[test]
    fn join_merges_matching_keys_from_both_sides() {
        let sorted = vec![
            JoinRecord { left: true, join_key: Value::Int(1), rest: vec![Value::from("l1"), Value::Null] },
            JoinRecord { left: false, join_key: Value::Int(1), rest: vec![Value::Null, Value::from("r1")] },
            JoinRecord { left: true, join_key: Value::Int(2), rest: vec![Value::from("l2"), Value::Null] },
        ];
        let out = process_join(&sorted, &[0], 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1, vec![Value::from("l1"), Value::from("r1")]);
    }

    #[test]
    fn join_emits_nothing_for_a_right_only_key() {
        let sorted = vec![JoinRecord { left: false, join_key: Value::Int(9), rest: vec![Value::Null] }];
        assert!(process_join(&sorted, &[0], 1).is_empty());
    }

    #[test]
    fn group_sums_per_distinct_key() {
        let records = vec![
            vec![Value::from("a"), Value::Int(1)],
            vec![Value::from("a"), Value::Int(2)],
            vec![Value::from("b"), Value::Int(5)],
        ];
        let items = vec![ProjectItem::Plain(0), ProjectItem::Agg(Aggregator::Sum, 1)];
        let out = process_group(records, &items, true);
        assert_eq!(out.len(), 2);
        let a_row = out.iter().find(|r| r[0].as_str() == Some("a")).unwrap();
        assert_eq!(a_row[1], Value::Int(3));
    }

    #[test]
    fn skip_group_produces_one_global_row() {
        let records = vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(3)]];
        let out = process_skip_group(records, &[(Aggregator::Sum, 0)]);
        assert_eq!(out, vec![Value::Int(6)]);
    }

    #[test]
    fn order_applies_distinct_and_limit() {
        let sorted = vec![vec![Value::Int(1)], vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(3)]];
        let out = process_order(sorted, &[0], true, 2);
        assert_eq!(out, vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
    }

    #[test]
    fn order_without_distinct_just_limits() {
        let sorted = vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(3)]];
        let out = process_order(sorted, &[0], false, 2);
        assert_eq!(out.len(), 2);
    }
}
