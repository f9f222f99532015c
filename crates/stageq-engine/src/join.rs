//! Join Engine

use std::collections::HashMap;

use stageq_ir::{FieldPath, JoinKind, JoinSpec, Row, ValueKey};

use crate::error::StepError;

/// Join two row sequences.
///
/// Rows are shallow-merged with the right side winning on key collision.
/// Output is left-driven; for `right` joins the unmatched right rows follow
/// all matched rows in right-relation order.
pub fn join(left: &[Row], right: &[Row], spec: &JoinSpec) -> Result<Vec<Row>, StepError> {
    match (&spec.left_key, &spec.right_key) {
        (Some(lk), Some(rk)) if spec.kind != JoinKind::Cross => {
            check_resolvable(left, lk, &spec.left_relation)?;
            check_resolvable(right, rk, &spec.right_relation)?;
            Ok(keyed_join(left, right, lk, rk, spec.kind))
        }
        _ => Ok(cartesian(left, right, spec.kind)),
    }
}

/// A key that resolves on no row of a non-empty side cannot be meant.
fn check_resolvable(rows: &[Row], key: &FieldPath, relation: &str) -> Result<(), StepError> {
    if key_resolves(rows, key) {
        Ok(())
    } else {
        Err(StepError::UnresolvableJoin {
            relation: relation.to_string(),
            key: key.to_string(),
        })
    }
}

/// Whether a key resolves on at least one row (or there are no rows).
pub fn key_resolves(rows: &[Row], key: &FieldPath) -> bool {
    rows.is_empty() || rows.iter().any(|r| r.contains(key))
}

fn keyed_join(left: &[Row], right: &[Row], lk: &FieldPath, rk: &FieldPath, kind: JoinKind) -> Vec<Row> {
    // Null never equals anything, so null keys are not indexed
    let mut index: HashMap<ValueKey, Vec<usize>> = HashMap::new();
    for (i, row) in right.iter().enumerate() {
        let value = row.resolve(rk);
        if !value.is_null() {
            index.entry(value.key()).or_default().push(i);
        }
    }

    let mut matched_right = vec![false; right.len()];
    let mut out = Vec::with_capacity(left.len());

    for l in left {
        let value = l.resolve(lk);
        let matches = if value.is_null() {
            None
        } else {
            index.get(&value.key())
        };

        match matches {
            Some(indices) => {
                for &i in indices {
                    matched_right[i] = true;
                    out.push(l.merged(&right[i]));
                }
            }
            None if kind == JoinKind::Left => out.push(l.clone()),
            None => {}
        }
    }

    if kind == JoinKind::Right {
        out.extend(
            right
                .iter()
                .zip(&matched_right)
                .filter(|(_, matched)| !**matched)
                .map(|(r, _)| r.clone()),
        );
    }

    out
}

fn cartesian(left: &[Row], right: &[Row], kind: JoinKind) -> Vec<Row> {
    match kind {
        JoinKind::Left if right.is_empty() => return left.to_vec(),
        JoinKind::Right if left.is_empty() => return right.to_vec(),
        _ => {}
    }

    let mut out = Vec::with_capacity(left.len() * right.len());
    for l in left {
        for r in right {
            out.push(l.merged(r));
        }
    }
    out
}
