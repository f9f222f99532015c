//! Group/Aggregate Engine

use indexmap::IndexMap;
use stageq_ir::{output_key_names, AggOp, AggregateSpec, FieldPath, Row, Value, ValueKey};
use stageq_registry::round_to;

use crate::error::StepError;

/// Decimal places kept on emitted aggregate values.
pub const AGGREGATE_SCALE: i32 = 4;

/// Non-numeric values dropped from one numeric aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeMismatch {
    pub op: AggOp,
    pub field: FieldPath,
    pub excluded: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Aggregated {
    pub rows: Vec<Row>,
    pub mismatches: Vec<TypeMismatch>,
}

/// Tally of excluded values per `(op, field)`, first-seen order.
#[derive(Debug, Default)]
pub(crate) struct MismatchTally {
    counts: IndexMap<(AggOp, FieldPath), usize>,
}

impl MismatchTally {
    pub(crate) fn add(&mut self, op: AggOp, field: &FieldPath, excluded: usize) {
        if excluded > 0 {
            *self.counts.entry((op, field.clone())).or_insert(0) += excluded;
        }
    }

    pub(crate) fn finish(self) -> Vec<TypeMismatch> {
        self.counts
            .into_iter()
            .map(|((op, field), excluded)| TypeMismatch { op, field, excluded })
            .collect()
    }
}

/// Partition rows by the ordered tuple of resolved key values.
/// Partitions keep first-seen order; no keys means one partition.
pub(crate) fn partition<'a>(rows: &'a [Row], keys: &[FieldPath]) -> IndexMap<Vec<ValueKey>, Vec<&'a Row>> {
    let mut partitions: IndexMap<Vec<ValueKey>, Vec<&'a Row>> = IndexMap::new();
    for row in rows {
        let key = keys.iter().map(|k| row.resolve(k).key()).collect();
        partitions.entry(key).or_default().push(row);
    }
    partitions
}

/// Group keys must each resolve on at least one input row.
pub(crate) fn check_keys(rows: &[Row], keys: &[FieldPath], role: &str) -> Result<(), StepError> {
    if rows.is_empty() {
        return Ok(());
    }
    for key in keys {
        if key.is_empty() || !rows.iter().any(|r| r.contains(key)) {
            return Err(StepError::malformed(format!("{} key {} is not a field of any row", role, key)));
        }
    }
    Ok(())
}

/// Copy key values from the first row of a partition.
pub(crate) fn key_fields(first: &Row, keys: &[FieldPath], names: &[FieldPath]) -> Row {
    let mut out = Row::with_capacity(keys.len());
    for (key, name) in keys.iter().zip(names) {
        out.insert(name.clone(), first.resolve(key).clone());
    }
    out
}

/// Compute one aggregate over a partition.
///
/// Returns the rounded value and how many non-null, non-numeric values
/// were excluded.
pub(crate) fn aggregate(op: AggOp, field: &FieldPath, rows: &[&Row]) -> (Value, usize) {
    if op == AggOp::Count {
        return (Value::Number(rows.len() as f64), 0);
    }

    let mut excluded = 0;
    let mut numbers = Vec::with_capacity(rows.len());
    for row in rows {
        let value = row.resolve(field);
        match value.as_number() {
            Some(n) => numbers.push(n),
            None if value.is_null() => {}
            None => excluded += 1,
        }
    }

    if numbers.is_empty() {
        return (Value::Null, excluded);
    }

    let result = match op {
        AggOp::Sum => numbers.iter().sum(),
        AggOp::Avg => numbers.iter().sum::<f64>() / numbers.len() as f64,
        AggOp::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
        AggOp::Max => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        AggOp::Count => numbers.len() as f64,
    };

    (Value::Number(round_to(result, AGGREGATE_SCALE)), excluded)
}

/// Group rows by `keys` and compute `aggregates` per partition.
pub fn group(rows: &[Row], keys: &[FieldPath], aggregates: &[AggregateSpec]) -> Result<Aggregated, StepError> {
    check_keys(rows, keys, "group")?;
    if aggregates.iter().any(|a| a.field.is_empty()) {
        return Err(StepError::malformed("aggregate without a field"));
    }

    let names = output_key_names(keys);
    let mut tally = MismatchTally::default();
    let mut out = Vec::new();

    for members in partition(rows, keys).values() {
        let Some(first) = members.first() else {
            continue;
        };
        let mut row = key_fields(first, keys, &names);
        for spec in aggregates {
            let (value, excluded) = aggregate(spec.op, &spec.field, members);
            tally.add(spec.op, &spec.field, excluded);
            row.insert(FieldPath::single(spec.output_name()), value);
        }
        out.push(row);
    }

    Ok(Aggregated {
        rows: out,
        mismatches: tally.finish(),
    })
}
