//! Expression tree compiling relational predicates into bitmap set
//! operations, with partition-tag pruning folded into the same tree.
//!
//! Grounded on `hustle/core/marble.py`'s `Expr`/`Column.__eq__` etc. and the
//! `in_*`/`part_*` free functions. Where the source carries raw Python
//! closures (`f`, `part_f`), this crate uses a plain recursive enum instead
//! (per the "cyclic expression-table ownership" design note: expressions
//! own no marble data, only column references and literals) — `eval_rows`/
//! `eval_partition` walk the tree and call back into a `BitmapSource`
//! (`MarbleStream`) rather than stashing a closure per node.

use crate::bitmap::RowBitmap;
use crate::column::Column;
use crate::error::{MarbleError, MarbleResult};
use crate::tuple::Value;
use std::collections::HashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    In,
    NotIn,
}

impl CmpOp {
    /// Logical negation used when an enclosing `¬` toggles the invert flag,
    /// mirroring `in_eq`/`in_ne`/... swapping on `invert`.
    fn negate(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Ge => CmpOp::Lt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::In => CmpOp::NotIn,
            CmpOp::NotIn => CmpOp::In,
        }
    }

    fn is_range(self) -> bool {
        matches!(self, CmpOp::Lt | CmpOp::Gt | CmpOp::Le | CmpOp::Ge)
    }
}

#[derive(Clone, Debug)]
pub enum Literal {
    Scalar(Value),
    Set(Vec<Value>),
}

/// Read-only access to a sealed marble's bitmap indexes, implemented by
/// `marble::reader::MarbleStream`.
pub trait BitmapSource {
    fn row_count(&self) -> u32;
    fn bit_eq(&self, column: &str, value: &Value) -> MarbleResult<RowBitmap>;
    fn bit_ne(&self, column: &str, value: &Value) -> MarbleResult<RowBitmap>;
    fn bit_lt(&self, column: &str, value: &Value) -> MarbleResult<RowBitmap>;
    fn bit_gt(&self, column: &str, value: &Value) -> MarbleResult<RowBitmap>;
    fn bit_le(&self, column: &str, value: &Value) -> MarbleResult<RowBitmap>;
    fn bit_ge(&self, column: &str, value: &Value) -> MarbleResult<RowBitmap>;
    fn bit_eq_ex(&self, column: &str, values: &[Value]) -> MarbleResult<RowBitmap>;
    fn bit_ne_ex(&self, column: &str, values: &[Value]) -> MarbleResult<RowBitmap>;
}

#[derive(Clone, Debug)]
pub enum Expr {
    Leaf {
        column: String,
        op: CmpOp,
        value: Literal,
        is_partition: bool,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    /// Construct a leaf `column OP literal` node, rejecting range operators
    /// on TRIE/LZ4/BINARY non-partition columns at construction time.
    pub fn compare(column: &Column, op: CmpOp, value: Literal) -> MarbleResult<Expr> {
        if !column.is_indexed() && !column.partition {
            return Err(MarbleError::query(format!(
                "column {} is not indexed, cannot appear in a where clause",
                column.name
            )));
        }
        if op.is_range() && !column.supports_range_query() {
            return Err(MarbleError::query(format!(
                "column {} doesn't support range queries",
                column.name
            )));
        }
        Ok(Expr::Leaf {
            column: column.name.clone(),
            op,
            value,
            is_partition: column.partition,
        })
    }

    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }

    /// True only when every leaf in this subtree is the partition column.
    fn is_partition_only(&self) -> bool {
        match self {
            Expr::Leaf { is_partition, .. } => *is_partition,
            Expr::Not(e) => e.is_partition_only(),
            Expr::And(a, b) | Expr::Or(a, b) => a.is_partition_only() && b.is_partition_only(),
        }
    }

    /// True when any leaf in this subtree references the partition column.
    fn touches_partition(&self) -> bool {
        match self {
            Expr::Leaf { is_partition, .. } => *is_partition,
            Expr::Not(e) => e.touches_partition(),
            Expr::And(a, b) | Expr::Or(a, b) => a.touches_partition() || b.touches_partition(),
        }
    }

    /// Row-level evaluation against a sealed marble. `None` means "no row
    /// constraint" (the universe), which arises only from combining two
    /// partition-only sub-expressions with `∧` (the partition tag check
    /// alone fully decides inclusion, see `eval_partition`).
    pub fn eval_rows(&self, src: &dyn BitmapSource, invert: bool) -> MarbleResult<Option<RowBitmap>> {
        match self {
            Expr::Leaf { column, op, value, is_partition } => {
                if *is_partition {
                    // A pure partition comparison, combined alone, has no
                    // row-level restriction beyond "this partition matched".
                    let _ = (column, op, value);
                    return Ok(None);
                }
                Ok(Some(Self::eval_leaf(src, column, *op, value, invert)?))
            }
            Expr::Not(e) => e.eval_rows(src, !invert),
            Expr::And(a, b) => Ok(Self::merge_rows(invert, true, a.eval_rows(src, invert)?, b.eval_rows(src, invert)?)),
            Expr::Or(a, b) => Ok(Self::merge_rows(invert, false, a.eval_rows(src, invert)?, b.eval_rows(src, invert)?)),
        }
    }

    fn eval_leaf(src: &dyn BitmapSource, column: &str, op: CmpOp, value: &Literal, invert: bool) -> MarbleResult<RowBitmap> {
        let op = if invert { op.negate() } else { op };
        match (op, value) {
            (CmpOp::Eq, Literal::Scalar(v)) => src.bit_eq(column, v),
            (CmpOp::Ne, Literal::Scalar(v)) => src.bit_ne(column, v),
            (CmpOp::Lt, Literal::Scalar(v)) => src.bit_lt(column, v),
            (CmpOp::Gt, Literal::Scalar(v)) => src.bit_gt(column, v),
            (CmpOp::Le, Literal::Scalar(v)) => src.bit_le(column, v),
            (CmpOp::Ge, Literal::Scalar(v)) => src.bit_ge(column, v),
            (CmpOp::In, Literal::Set(vs)) => src.bit_eq_ex(column, vs),
            (CmpOp::NotIn, Literal::Set(vs)) => src.bit_ne_ex(column, vs),
            _ => Err(MarbleError::query("operator/literal shape mismatch in predicate")),
        }
    }

    fn merge_rows(invert: bool, node_is_and: bool, a: Option<RowBitmap>, b: Option<RowBitmap>) -> Option<RowBitmap> {
        let do_and = node_is_and != invert; // De Morgan: inverting swaps AND/OR
        match (do_and, a, b) {
            (true, None, None) => None,
            (true, Some(x), None) => Some(x),
            (true, None, Some(y)) => Some(y),
            (true, Some(x), Some(y)) => Some(x.intersect(&y)),
            (false, None, _) | (false, _, None) => None,
            (false, Some(x), Some(y)) => Some(x.union(&y)),
        }
    }

    /// Filters partition tags using only this subtree's partition
    /// sub-expressions; sub-expressions that don't touch the partition
    /// pass every tag through unfiltered (they provide no pruning).
    pub fn eval_partition(&self, tags: &[String], invert: bool) -> Vec<String> {
        if !self.touches_partition() {
            return if invert { Vec::new() } else { tags.to_vec() };
        }
        match self {
            Expr::Leaf { column: _, op, value, .. } => Self::eval_partition_leaf(tags, *op, value, invert),
            Expr::Not(e) => e.eval_partition(tags, !invert),
            Expr::And(a, b) => Self::merge_partition(invert, true, tags, a, b),
            Expr::Or(a, b) => Self::merge_partition(invert, false, tags, a, b),
        }
    }

    fn eval_partition_leaf(tags: &[String], op: CmpOp, value: &Literal, invert: bool) -> Vec<String> {
        let op = if invert { op.negate() } else { op };
        let as_str = |v: &Value| v.as_str().unwrap_or_default().to_string();
        match (op, value) {
            (CmpOp::Eq, Literal::Scalar(v)) => {
                let v = as_str(v);
                tags.iter().filter(|t| **t == v).cloned().collect()
            }
            (CmpOp::Ne, Literal::Scalar(v)) => {
                let v = as_str(v);
                tags.iter().filter(|t| **t != v).cloned().collect()
            }
            (CmpOp::Lt, Literal::Scalar(v)) => {
                let v = as_str(v);
                tags.iter().filter(|t| **t < v).cloned().collect()
            }
            (CmpOp::Gt, Literal::Scalar(v)) => {
                let v = as_str(v);
                tags.iter().filter(|t| **t > v).cloned().collect()
            }
            (CmpOp::Le, Literal::Scalar(v)) => {
                let v = as_str(v);
                tags.iter().filter(|t| **t <= v).cloned().collect()
            }
            (CmpOp::Ge, Literal::Scalar(v)) => {
                let v = as_str(v);
                tags.iter().filter(|t| **t >= v).cloned().collect()
            }
            (CmpOp::In, Literal::Set(vs)) => {
                let set: HashSet<String> = vs.iter().map(as_str).collect();
                tags.iter().filter(|t| set.contains(*t)).cloned().collect()
            }
            (CmpOp::NotIn, Literal::Set(vs)) => {
                let set: HashSet<String> = vs.iter().map(as_str).collect();
                tags.iter().filter(|t| !set.contains(*t)).cloned().collect()
            }
            _ => Vec::new(),
        }
    }

    fn merge_partition(invert: bool, node_is_and: bool, tags: &[String], a: &Expr, b: &Expr) -> Vec<String> {
        let do_and = node_is_and != invert;
        let a_side = if a.touches_partition() { Some(a.eval_partition(tags, invert)) } else { None };
        let b_side = if b.touches_partition() { Some(b.eval_partition(tags, invert)) } else { None };
        match (do_and, a_side, b_side) {
            (true, None, None) => tags.to_vec(),
            (true, Some(x), None) => x,
            (true, None, Some(y)) => y,
            (true, Some(x), Some(y)) => {
                let yset: HashSet<&String> = y.iter().collect();
                x.into_iter().filter(|t| yset.contains(t)).collect()
            }
            (false, None, _) | (false, _, None) => tags.to_vec(),
            (false, Some(x), Some(y)) => {
                let mut seen: HashSet<String> = x.iter().cloned().collect();
                let mut out = x;
                for t in y {
                    if seen.insert(t.clone()) {
                        out.push(t);
                    }
                }
                out
            }
        }
    }

    /// Asserts both sides of a binary operator reference the same marble
    /// (callers pass the table name each side was built against).
    pub fn assert_same_table(left_table: &str, right_table: &str) -> MarbleResult<()> {
        if left_table != right_table {
            return Err(MarbleError::query(format!(
                "expression must reference a single table: {left_table} != {right_table}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    /// A fake bitmap source keyed by (column, value) -> fixed bitmap, enough
    /// to exercise the combination table without a real marble.
    struct FakeSource {
        row_count: u32,
        eq: StdHashMap<(String, i64), RowBitmap>,
    }

    impl BitmapSource for FakeSource {
        fn row_count(&self) -> u32 {
            self.row_count
        }
        fn bit_eq(&self, column: &str, value: &Value) -> MarbleResult<RowBitmap> {
            let i = value.as_int().unwrap();
            Ok(self.eq.get(&(column.to_string(), i)).cloned().unwrap_or_default())
        }
        fn bit_ne(&self, column: &str, value: &Value) -> MarbleResult<RowBitmap> {
            Ok(self.bit_eq(column, value)?.complement(self.row_count))
        }
        fn bit_lt(&self, _column: &str, _value: &Value) -> MarbleResult<RowBitmap> {
            Ok(RowBitmap::new())
        }
        fn bit_gt(&self, _column: &str, _value: &Value) -> MarbleResult<RowBitmap> {
            Ok(RowBitmap::new())
        }
        fn bit_le(&self, _column: &str, _value: &Value) -> MarbleResult<RowBitmap> {
            Ok(RowBitmap::new())
        }
        fn bit_ge(&self, _column: &str, _value: &Value) -> MarbleResult<RowBitmap> {
            Ok(RowBitmap::new())
        }
        fn bit_eq_ex(&self, column: &str, values: &[Value]) -> MarbleResult<RowBitmap> {
            let mut out = RowBitmap::new();
            for v in values {
                out.union_with(&self.bit_eq(column, v)?);
            }
            Ok(out)
        }
        fn bit_ne_ex(&self, column: &str, values: &[Value]) -> MarbleResult<RowBitmap> {
            Ok(self.bit_eq_ex(column, values)?.complement(self.row_count))
        }
    }

    fn non_partition_col(name: &str) -> Column {
        crate::column::Column::parse(&format!("+@4{name}"), None).unwrap()
    }

    fn partition_col(name: &str) -> Column {
        crate::column::Column::parse(&format!("+${name}"), Some(name)).unwrap()
    }

    #[test]
    fn and_of_two_non_partition_leaves_intersects() {
        let col = non_partition_col("ad_id");
        let a = Expr::compare(&col, CmpOp::Eq, Literal::Scalar(Value::Int(1))).unwrap();
        let b = Expr::compare(&col, CmpOp::Eq, Literal::Scalar(Value::Int(2))).unwrap();
        let combined = a.and(b);

        let mut eq = StdHashMap::new();
        eq.insert(("ad_id".to_string(), 1), RowBitmap::from_iter([1, 2, 3]));
        eq.insert(("ad_id".to_string(), 2), RowBitmap::from_iter([2, 3, 4]));
        let src = FakeSource { row_count: 10, eq };

        let result = combined.eval_rows(&src, false).unwrap().unwrap();
        assert_eq!(result, RowBitmap::from_iter([2, 3]));
    }

    #[test]
    fn and_of_two_partition_leaves_has_no_row_constraint() {
        let pcol = partition_col("date");
        let a = Expr::compare(&pcol, CmpOp::Eq, Literal::Scalar(Value::from("2014-01-27"))).unwrap();
        let b = Expr::compare(&pcol, CmpOp::Ge, Literal::Scalar(Value::from("2014-01-01"))).unwrap();
        let combined = a.and(b);
        assert!(combined.is_partition_only());

        let src = FakeSource { row_count: 0, eq: StdHashMap::new() };
        assert_eq!(combined.eval_rows(&src, false).unwrap(), None);
    }

    #[test]
    fn partition_and_intersects_tags() {
        let pcol = partition_col("date");
        let a = Expr::compare(&pcol, CmpOp::Ge, Literal::Scalar(Value::from("2014-01-20"))).unwrap();
        let ncol = non_partition_col("ad_id");
        let b = Expr::compare(&ncol, CmpOp::Eq, Literal::Scalar(Value::Int(30010))).unwrap();
        let combined = a.clone().and(b.clone());

        let tags = vec!["2014-01-10".to_string(), "2014-01-20".to_string(), "2014-01-25".to_string()];
        let pruned = combined.eval_partition(&tags, false);
        assert_eq!(pruned, vec!["2014-01-20".to_string(), "2014-01-25".to_string()]);

        // pruning an AND must keep a subset of each side's own pruning
        let a_only = a.eval_partition(&tags, false);
        let b_only_touches = b.touches_partition();
        assert!(!b_only_touches);
        for t in &pruned {
            assert!(a_only.contains(t));
        }
    }

    #[test]
    fn or_with_one_non_partition_side_cannot_prune() {
        let pcol = partition_col("date");
        let a = Expr::compare(&pcol, CmpOp::Eq, Literal::Scalar(Value::from("2014-01-27"))).unwrap();
        let ncol = non_partition_col("ad_id");
        let b = Expr::compare(&ncol, CmpOp::Eq, Literal::Scalar(Value::Int(1))).unwrap();
        let combined = a.or(b);
        let tags = vec!["2014-01-27".to_string(), "2014-01-28".to_string()];
        assert_eq!(combined.eval_partition(&tags, false), tags);
    }

    #[test]
    fn range_operator_rejected_on_trie_column() {
        let trie_col = crate::column::Column::parse("+site", None).unwrap();
        let err = Expr::compare(&trie_col, CmpOp::Lt, Literal::Scalar(Value::from("x")));
        assert!(err.is_err());
    }

    #[test]
    fn not_inverts_comparison() {
        let col = non_partition_col("ad_id");
        let e = Expr::compare(&col, CmpOp::Eq, Literal::Scalar(Value::Int(1))).unwrap().not();
        let mut eq = StdHashMap::new();
        eq.insert(("ad_id".to_string(), 1), RowBitmap::from_iter([1, 2]));
        let src = FakeSource { row_count: 5, eq };
        let result = e.eval_rows(&src, false).unwrap().unwrap();
        assert_eq!(result, RowBitmap::from_iter([3, 4, 5]));
    }
}
