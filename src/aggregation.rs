//! Aggregation (§4.10): a closed set of built-in aggregators plus an
//! extension point for opaque sketch-based ones, grounded on
//! `hustle/core/pipeline.py`'s four-closure aggregator contract
//! (`new`/`add`/`merge`/`finalize`, `hustle.cardinality`'s HLL/MinHash
//! implementations plugging into that contract).
//!
//! Every aggregator obeys an associativity property: partial results
//! computed per partition must `combine` into the same
//! answer as one run over the whole input, so `Pipeline` can opportunistically
//! aggregate before a shuffle.

use crate::tuple::Value;
use std::fmt;

/// The four-operation contract every aggregator implements. `State` must be
/// cheaply cloneable, since a pipeline stage may carry several in-flight
/// group accumulators at once.
pub trait Accumulate {
    type State: Clone + fmt::Debug;

    fn default_state(&self) -> Self::State;
    fn map(&self, state: &mut Self::State, value: &Value);
    fn combine(&self, into: &mut Self::State, other: &Self::State);
    fn finalize(&self, state: &Self::State) -> Value;
}

/// An opaque extension aggregator (HLL cardinality, MinHash sketch merge),
/// operating on a serialized blob so this crate need not depend on a
/// concrete sketch implementation.
pub trait ExtAggregator: fmt::Debug {
    fn default_state(&self) -> Vec<u8>;
    fn map(&self, state: &mut Vec<u8>, value: &Value);
    fn combine(&self, into: &mut Vec<u8>, other: &[u8]);
    fn finalize(&self, state: &[u8]) -> Value;
    /// Lets `Aggregator` derive a real `Clone` despite boxing a trait object.
    fn clone_box(&self) -> Box<dyn ExtAggregator>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AggKind {
    Sum,
    Count,
    Min,
    Max,
    Avg,
    /// HLL-backed approximate distinct count. The sketch itself is an
    /// opaque extension; this variant only names the slot.
    Cardinality,
    /// HLL union of per-partition sketches.
    SetUnion,
    /// MinHash sketch merge.
    SketchMerge,
}

#[derive(Clone, Debug)]
pub enum AggState {
    Sum(i64),
    Count(u64),
    Min(Option<i64>),
    Max(Option<i64>),
    /// (sum, count) so `combine` stays associative; `finalize` divides.
    Avg(i64, u64),
    Extension(Vec<u8>),
}

pub enum Aggregator {
    Sum,
    Count,
    Min,
    Max,
    Avg,
    Extension(Box<dyn ExtAggregator>),
}

impl Clone for Aggregator {
    fn clone(&self) -> Self {
        match self {
            Aggregator::Sum => Aggregator::Sum,
            Aggregator::Count => Aggregator::Count,
            Aggregator::Min => Aggregator::Min,
            Aggregator::Max => Aggregator::Max,
            Aggregator::Avg => Aggregator::Avg,
            Aggregator::Extension(ext) => Aggregator::Extension(ext.clone_box()),
        }
    }
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregator::Sum => write!(f, "Sum"),
            Aggregator::Count => write!(f, "Count"),
            Aggregator::Min => write!(f, "Min"),
            Aggregator::Max => write!(f, "Max"),
            Aggregator::Avg => write!(f, "Avg"),
            Aggregator::Extension(ext) => write!(f, "Extension({ext:?})"),
        }
    }
}

impl Aggregator {
    pub fn kind(&self) -> AggKind {
        match self {
            Aggregator::Sum => AggKind::Sum,
            Aggregator::Count => AggKind::Count,
            Aggregator::Min => AggKind::Min,
            Aggregator::Max => AggKind::Max,
            Aggregator::Avg => AggKind::Avg,
            Aggregator::Extension(_) => AggKind::Cardinality,
        }
    }
}

impl Accumulate for Aggregator {
    type State = AggState;

    fn default_state(&self) -> AggState {
        match self {
            Aggregator::Sum => AggState::Sum(0),
            Aggregator::Count => AggState::Count(0),
            Aggregator::Min => AggState::Min(None),
            Aggregator::Max => AggState::Max(None),
            Aggregator::Avg => AggState::Avg(0, 0),
            Aggregator::Extension(ext) => AggState::Extension(ext.default_state()),
        }
    }

    fn map(&self, state: &mut AggState, value: &Value) {
        match (self, state) {
            (Aggregator::Sum, AggState::Sum(acc)) => {
                if let Some(i) = value.as_int() {
                    *acc += i;
                }
            }
            (Aggregator::Count, AggState::Count(acc)) => {
                if !value.is_null() {
                    *acc += 1;
                }
            }
            (Aggregator::Min, AggState::Min(acc)) => {
                if let Some(i) = value.as_int() {
                    *acc = Some(acc.map_or(i, |cur| cur.min(i)));
                }
            }
            (Aggregator::Max, AggState::Max(acc)) => {
                if let Some(i) = value.as_int() {
                    *acc = Some(acc.map_or(i, |cur| cur.max(i)));
                }
            }
            (Aggregator::Avg, AggState::Avg(sum, count)) => {
                if let Some(i) = value.as_int() {
                    *sum += i;
                    *count += 1;
                }
            }
            (Aggregator::Extension(ext), AggState::Extension(bytes)) => ext.map(bytes, value),
            _ => unreachable!("aggregator state type must match its own kind"),
        }
    }

    fn combine(&self, into: &mut AggState, other: &AggState) {
        match (self, into, other) {
            (Aggregator::Sum, AggState::Sum(a), AggState::Sum(b)) => *a += b,
            (Aggregator::Count, AggState::Count(a), AggState::Count(b)) => *a += b,
            (Aggregator::Min, AggState::Min(a), AggState::Min(b)) => {
                *a = match (*a, *b) {
                    (Some(x), Some(y)) => Some(x.min(y)),
                    (Some(x), None) => Some(x),
                    (None, y) => y,
                }
            }
            (Aggregator::Max, AggState::Max(a), AggState::Max(b)) => {
                *a = match (*a, *b) {
                    (Some(x), Some(y)) => Some(x.max(y)),
                    (Some(x), None) => Some(x),
                    (None, y) => y,
                }
            }
            (Aggregator::Avg, AggState::Avg(sa, ca), AggState::Avg(sb, cb)) => {
                *sa += sb;
                *ca += cb;
            }
            (Aggregator::Extension(ext), AggState::Extension(a), AggState::Extension(b)) => ext.combine(a, b),
            _ => unreachable!("aggregator state type must match its own kind"),
        }
    }

    fn finalize(&self, state: &AggState) -> Value {
        match (self, state) {
            (Aggregator::Sum, AggState::Sum(acc)) => Value::Int(*acc),
            (Aggregator::Count, AggState::Count(acc)) => Value::Int(*acc as i64),
            (Aggregator::Min, AggState::Min(acc)) => acc.map(Value::Int).unwrap_or(Value::Null),
            (Aggregator::Max, AggState::Max(acc)) => acc.map(Value::Int).unwrap_or(Value::Null),
            (Aggregator::Avg, AggState::Avg(sum, count)) => {
                if *count == 0 {
                    Value::Null
                } else {
                    Value::Int(sum / *count as i64)
                }
            }
            (Aggregator::Extension(ext), AggState::Extension(bytes)) => ext.finalize(bytes),
            _ => unreachable!("aggregator state type must match its own kind"),
        }
    }
}
