//! Pivot Engine

use indexmap::IndexMap;
use stageq_ir::{output_key_names, FieldPath, PivotStep, Row, Value, ValueKey};

use crate::aggregate::{aggregate, check_keys, key_fields, partition, Aggregated, MismatchTally};
use crate::error::StepError;

/// Distinct column-key tuple, in first-seen order.
#[derive(Debug, Clone)]
struct Bucket {
    key: Vec<ValueKey>,
    suffix: String,
}

/// Display form of bucket values for column labels.
fn bucket_suffix(values: &[&Value]) -> String {
    values
        .iter()
        .map(|v| if v.is_null() { "null".to_string() } else { v.display_string() })
        .collect::<Vec<_>>()
        .join(".")
}

fn column_buckets(rows: &[Row], col_keys: &[FieldPath]) -> Vec<Bucket> {
    if col_keys.is_empty() {
        return vec![Bucket {
            key: Vec::new(),
            suffix: String::new(),
        }];
    }

    let mut seen: IndexMap<Vec<ValueKey>, String> = IndexMap::new();
    for row in rows {
        let values: Vec<&Value> = col_keys.iter().map(|k| row.resolve(k)).collect();
        let key: Vec<ValueKey> = values.iter().map(|v| v.key()).collect();
        seen.entry(key).or_insert_with(|| bucket_suffix(&values));
    }
    seen.into_iter().map(|(key, suffix)| Bucket { key, suffix }).collect()
}

fn label(base: String, bucket: &Bucket, has_columns: bool) -> FieldPath {
    if has_columns {
        FieldPath::single(format!("{}.{}", base, bucket.suffix))
    } else {
        FieldPath::single(base)
    }
}

/// Reshape rows into one row per row-key partition and one field per
/// (value aggregate, column bucket) pair.
pub fn pivot(rows: &[Row], step: &PivotStep) -> Result<Aggregated, StepError> {
    check_keys(rows, &step.row_keys, "pivot row")?;
    check_keys(rows, &step.col_keys, "pivot column")?;

    let values = step.effective_values();
    let has_columns = !step.col_keys.is_empty();
    let buckets = column_buckets(rows, &step.col_keys);
    let names = output_key_names(&step.row_keys);
    let mut tally = MismatchTally::default();
    let mut out = Vec::new();

    for members in partition(rows, &step.row_keys).values() {
        let Some(first) = members.first() else {
            continue;
        };
        let mut row = key_fields(first, &step.row_keys, &names);

        let mut cells: IndexMap<Vec<ValueKey>, Vec<&Row>> = IndexMap::new();
        for member in members {
            let key = step.col_keys.iter().map(|k| member.resolve(k).key()).collect();
            cells.entry(key).or_default().push(*member);
        }

        for value in &values {
            for bucket in &buckets {
                let field = label(value.label(), bucket, has_columns);
                let cell = match cells.get(&bucket.key) {
                    Some(cell_rows) => {
                        let (result, excluded) = aggregate(value.op, &value.field, cell_rows);
                        tally.add(value.op, &value.field, excluded);
                        result
                    }
                    None => Value::Null,
                };
                row.insert(field, cell);
            }
        }
        out.push(row);
    }

    Ok(Aggregated {
        rows: out,
        mismatches: tally.finish(),
    })
}
