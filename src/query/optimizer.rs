//! # Index Selection
//!
//! `determine_index_to_use` turns a predicate tree into a list of
//! [`QueryAdvice`]s: which index to scan over which key range so the
//! caller touches as few entries as possible. It is a feasibility advisor,
//! not a cost planner; advices come back in the order their branches
//! appear in the tree, and the caller always re-applies the original
//! predicate as a residual filter over what the scans yield.
//!
//! The tree is first split into conjunctive subqueries at OR nodes. An OR
//! is split only when both branches can be served by some index; with an
//! unindexable side, splitting would either double-count rows or miss the
//! side that needs a full scan, so such an OR stays whole and constrains
//! nothing. Each subquery then intersects its comparisons per field into
//! one `[min, max]` interval and advises a single index: a point interval
//! if any field has one, otherwise the narrowest. Subqueries whose
//! intervals come up empty can match nothing and are dropped; a subquery
//! with no usable interval at all degrades the whole query to one
//! full-scan advice.

use eyre::{bail, Result};
use log::{debug, trace};

use super::advice::{merge_advices, QueryAdvice};
use super::expr::{CompOp, FieldIndexes, IndexHandle, QueryNode, QueryTerm, QueryValue};
use super::sortable::prefix_bounds;

pub fn determine_index_to_use(
    tree: &QueryNode,
    indexes: &FieldIndexes,
    params: &[QueryValue],
) -> Result<Vec<QueryAdvice>> {
    let subqueries = split_subqueries(tree, indexes, params)?;
    let mut advices = Vec::with_capacity(subqueries.len());

    for terms in &subqueries {
        let intervals = conjunction_intervals(terms, indexes, params)?;

        if intervals.is_empty() {
            // One branch the indexes cannot narrow forces a full scan for
            // the whole query.
            debug!("subquery with no usable interval, advising full scan");
            return Ok(vec![QueryAdvice::full_scan()]);
        }

        match select_interval(&intervals) {
            Some((handle, min, max)) => {
                trace!("subquery advises index {:?} over [{}, {}]", handle, min, max);
                advices.push(QueryAdvice::ranged(handle, min, max));
            }
            // Contradictory bounds; the branch matches nothing.
            None => trace!("subquery is unsatisfiable, dropped"),
        }
    }

    let merged = merge_advices(advices);
    debug!(
        "{} subqueries produced {} advice(s)",
        subqueries.len(),
        merged.len()
    );
    Ok(merged)
}

/// Splits the tree into conjunctions of terms, left-to-right depth-first.
/// An OR with an unindexable branch stays whole and contributes nothing.
fn split_subqueries<'t>(
    node: &'t QueryNode,
    indexes: &FieldIndexes,
    params: &[QueryValue],
) -> Result<Vec<Vec<&'t QueryTerm>>> {
    match node {
        QueryNode::Term(term) => Ok(vec![vec![term]]),
        QueryNode::And(left, right) => {
            let left_subs = split_subqueries(left, indexes, params)?;
            let right_subs = split_subqueries(right, indexes, params)?;

            let mut product = Vec::with_capacity(left_subs.len() * right_subs.len());
            for l in &left_subs {
                for r in &right_subs {
                    let mut terms = l.clone();
                    terms.extend_from_slice(r);
                    product.push(terms);
                }
            }
            Ok(product)
        }
        QueryNode::Or(left, right) => {
            if is_indexable(left, indexes, params)? && is_indexable(right, indexes, params)? {
                let mut subs = split_subqueries(left, indexes, params)?;
                subs.extend(split_subqueries(right, indexes, params)?);
                Ok(subs)
            } else {
                Ok(vec![Vec::new()])
            }
        }
    }
}

/// Whether some index can serve this branch.
fn is_indexable(node: &QueryNode, indexes: &FieldIndexes, params: &[QueryValue]) -> Result<bool> {
    match node {
        QueryNode::Term(term) => Ok(indexes.is_indexed(&term.field)
            && term_interval(term, params)?.is_some()),
        QueryNode::And(left, right) => {
            Ok(is_indexable(left, indexes, params)? || is_indexable(right, indexes, params)?)
        }
        QueryNode::Or(left, right) => {
            Ok(is_indexable(left, indexes, params)? && is_indexable(right, indexes, params)?)
        }
    }
}

/// Per-field intervals of one conjunction, in first-appearance order.
fn conjunction_intervals(
    terms: &[&QueryTerm],
    indexes: &FieldIndexes,
    params: &[QueryValue],
) -> Result<Vec<(IndexHandle, i64, i64)>> {
    let mut intervals: Vec<(IndexHandle, i64, i64)> = Vec::new();

    for term in terms {
        let Some(handle) = indexes.handle_for(&term.field) else {
            continue;
        };
        let Some((min, max)) = term_interval(term, params)? else {
            continue;
        };

        match intervals.iter_mut().find(|(h, _, _)| *h == handle) {
            Some((_, cur_min, cur_max)) => {
                *cur_min = (*cur_min).max(min);
                *cur_max = (*cur_max).min(max);
            }
            None => intervals.push((handle, min, max)),
        }
    }
    Ok(intervals)
}

/// The interval a single comparison imposes on its field, or `None` when
/// the operator constrains nothing a range scan can use.
fn term_interval(term: &QueryTerm, params: &[QueryValue]) -> Result<Option<(i64, i64)>> {
    let value = resolve(&term.value, params)?;

    let interval = match (term.op, value) {
        (CompOp::Eq, QueryValue::Long(v)) => Some((*v, *v)),
        (CompOp::Lt, QueryValue::Long(v)) => Some((i64::MIN, v.saturating_sub(1))),
        (CompOp::Le, QueryValue::Long(v)) => Some((i64::MIN, *v)),
        (CompOp::Gt, QueryValue::Long(v)) => Some((v.saturating_add(1), i64::MAX)),
        (CompOp::Ge, QueryValue::Long(v)) => Some((*v, i64::MAX)),
        (CompOp::Ne, _) => None,

        // String comparisons go through the sortable encoding; the bounds
        // are necessary but not sufficient, the residual filter decides.
        (CompOp::Eq, QueryValue::Str(s)) => {
            let (min, max) = prefix_bounds(s);
            Some((min, max))
        }
        (CompOp::Lt | CompOp::Le, QueryValue::Str(s)) => Some((i64::MIN, prefix_bounds(s).1)),
        (CompOp::Gt | CompOp::Ge, QueryValue::Str(s)) => Some((prefix_bounds(s).0, i64::MAX)),
        (CompOp::StrPrefix, QueryValue::Str(s)) => {
            let (min, max) = prefix_bounds(s);
            Some((min, max))
        }
        (CompOp::StrMatches, QueryValue::Str(pattern)) => match fixed_prefix(pattern) {
            Some(prefix) => {
                let (min, max) = prefix_bounds(&prefix);
                Some((min, max))
            }
            None => None,
        },

        (CompOp::StrPrefix | CompOp::StrMatches, QueryValue::Long(_)) => {
            bail!(
                "string operator {:?} on integer literal for field '{}'",
                term.op,
                term.field
            )
        }
        (_, QueryValue::Param(_)) => unreachable!("resolve never returns a parameter"),
    };
    Ok(interval)
}

fn resolve<'v>(value: &'v QueryValue, params: &'v [QueryValue]) -> Result<&'v QueryValue> {
    match value {
        QueryValue::Param(pos) => match params.get(*pos) {
            Some(QueryValue::Param(_)) | None => {
                bail!("unbound query parameter at position {}", pos)
            }
            Some(resolved) => Ok(resolved),
        },
        literal => Ok(literal),
    }
}

/// Literal prefix of a regex up to its first metacharacter. A trailing
/// quantifier makes the preceding character optional, so it is dropped.
fn fixed_prefix(pattern: &str) -> Option<String> {
    let mut prefix = String::new();

    for c in pattern.chars() {
        match c {
            '*' | '+' | '?' | '{' => {
                prefix.pop();
                break;
            }
            '.' | '[' | ']' | '(' | ')' | '}' | '\\' | '^' | '$' | '|' => break,
            _ => prefix.push(c),
        }
    }

    if prefix.is_empty() {
        None
    } else {
        Some(prefix)
    }
}

/// One interval per subquery: a point if any field pins one, else the
/// narrowest, ties broken by first appearance. `None` when some interval
/// is empty, meaning the conjunction is unsatisfiable.
fn select_interval(intervals: &[(IndexHandle, i64, i64)]) -> Option<(IndexHandle, i64, i64)> {
    if intervals.iter().any(|(_, min, max)| min > max) {
        return None;
    }

    if let Some(point) = intervals.iter().find(|(_, min, max)| min == max) {
        return Some(*point);
    }

    intervals
        .iter()
        .min_by_key(|(_, min, max)| *max as i128 - *min as i128)
        .copied()
}
