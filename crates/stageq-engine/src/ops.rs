//! Row-wise steps: compute, select, sort and limit

use std::borrow::Cow;
use std::cmp::Ordering;

use stageq_ir::{FieldPath, Projection, Row, SortDirection, SortKey, Value};

use crate::compute::Formula;
use crate::error::StepError;

/// Append (or overwrite) `alias` on every row.
pub fn compute(rows: &[Row], alias: &str, formula: &Formula) -> Result<Vec<Row>, StepError> {
    let alias = alias.trim();
    if alias.is_empty() {
        return Err(StepError::malformed("compute step needs an output name"));
    }
    let target = FieldPath::single(alias);

    Ok(rows
        .iter()
        .map(|row| {
            let value = formula.eval(row);
            let mut out = row.clone();
            out.insert(target.clone(), value);
            out
        })
        .collect())
}

/// Project and rename fields. Fields a row lacks come out as `Null`; a
/// `*` projection copies every field of the row.
pub fn select(rows: &[Row], projections: &[Projection]) -> Result<Vec<Row>, StepError> {
    if projections.is_empty() {
        return Err(StepError::malformed("select step needs at least one projection"));
    }

    Ok(rows
        .iter()
        .map(|row| {
            let mut out = Row::with_capacity(projections.len());
            for projection in projections {
                if projection.from.is_wildcard() {
                    for (key, value) in row.iter() {
                        out.insert(key.clone(), value.clone());
                    }
                } else {
                    out.insert(projection.output_path(), row.resolve(&projection.from).clone());
                }
            }
            out
        })
        .collect())
}

/// Numeric strings order as numbers.
fn sort_value(value: &Value) -> Cow<'_, Value> {
    match value {
        Value::String(_) => match value.as_number() {
            Some(n) => Cow::Owned(Value::Number(n)),
            None => Cow::Borrowed(value),
        },
        other => Cow::Borrowed(other),
    }
}

/// Stable multi-key sort.
pub fn sort(rows: &[Row], orders: &[SortKey]) -> Result<Vec<Row>, StepError> {
    if orders.iter().any(|o| o.field.is_empty()) {
        return Err(StepError::malformed("sort key without a field"));
    }

    let mut out = rows.to_vec();
    out.sort_by(|a, b| {
        for key in orders {
            let av = sort_value(a.resolve(&key.field));
            let bv = sort_value(b.resolve(&key.field));
            let ord = match key.direction {
                SortDirection::Asc => av.sort_cmp(&bv),
                SortDirection::Desc => bv.sort_cmp(&av),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(out)
}

/// Slice `[offset, offset + count)`; `count <= 0` keeps the remainder.
pub fn limit(rows: &[Row], offset: i64, count: i64) -> Result<Vec<Row>, StepError> {
    let offset = usize::try_from(offset)
        .map_err(|_| StepError::malformed(format!("negative limit offset {}", offset)))?;
    let rest = rows.iter().skip(offset);
    Ok(match usize::try_from(count) {
        Ok(count) if count > 0 => rest.take(count).cloned().collect(),
        _ => rest.cloned().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stageq_registry::FunctionRegistry;

    fn people() -> Vec<Row> {
        vec![
            Row::from_pairs([("name", Value::from("b")), ("age", Value::from("30")), ("seq", Value::from(1))]),
            Row::from_pairs([("name", Value::from("a")), ("age", Value::from(9)), ("seq", Value::from(2))]),
            Row::from_pairs([("name", Value::from("c")), ("age", Value::from(30)), ("seq", Value::from(3))]),
            Row::from_pairs([("name", Value::from("d")), ("age", Value::Null), ("seq", Value::from(4))]),
        ]
    }

    fn seqs(rows: &[Row]) -> Vec<String> {
        rows.iter()
            .map(|r| r.resolve(&FieldPath::single("seq")).display_string())
            .collect()
    }

    #[test]
    fn test_sort_stable_with_numeric_strings() {
        let out = sort(&people(), &[SortKey::asc("age")]).unwrap();
        // null first, then 9, then the two 30s in input order
        assert_eq!(seqs(&out), vec!["4", "2", "1", "3"]);

        let out = sort(&people(), &[SortKey::desc("age")]).unwrap();
        assert_eq!(seqs(&out), vec!["1", "3", "2", "4"]);
    }

    #[test]
    fn test_sort_multi_key() {
        let out = sort(&people(), &[SortKey::desc("age"), SortKey::desc("name")]).unwrap();
        assert_eq!(seqs(&out), vec!["3", "1", "2", "4"]);
    }

    #[test]
    fn test_limit() {
        assert_eq!(seqs(&limit(&people(), 1, 2).unwrap()), vec!["2", "3"]);
        assert_eq!(limit(&people(), 0, 0).unwrap(), people());
        assert_eq!(limit(&people(), 0, -1).unwrap(), people());
        assert!(limit(&people(), 10, 5).unwrap().is_empty());
        assert!(limit(&people(), -1, 5).is_err());
    }

    #[test]
    fn test_select_renames_and_fills_nulls() {
        let out = select(
            &people(),
            &[Projection::aliased("name", "who"), Projection::new("missing")],
        )
        .unwrap();
        let keys: Vec<String> = out[0].keys().map(FieldPath::to_string).collect();
        assert_eq!(keys, vec!["who", "missing"]);
        assert!(out[0].resolve(&FieldPath::single("missing")).is_null());
        assert!(select(&people(), &[]).is_err());
    }

    #[test]
    fn test_compute_appends_column() {
        let registry = FunctionRegistry::default();
        let formula = Formula::compile("upper(name)", &registry).unwrap();
        let out = compute(&people(), "shout", &formula).unwrap();
        assert_eq!(out[1].resolve(&FieldPath::single("shout")), &Value::from("A"));
        assert_eq!(out[1].len(), 4);
        assert!(compute(&people(), " ", &formula).is_err());
    }
}
