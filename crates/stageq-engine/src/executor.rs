//! Pipeline Executor
//!
//! Runs steps strictly in list order over rows read from a
//! [`StoreSnapshot`]. Each step produces a new row sequence; a failing step
//! never touches the rows produced before it.

use serde::{Deserialize, Serialize};
use stageq_ir::{plan_join, JoinOrigin, JoinStep, Pipeline, PipelineStep, Row};
use stageq_registry::FunctionRegistry;
use std::fmt;
use std::str::FromStr;

use crate::aggregate::{group, Aggregated};
use crate::compute::Formula;
use crate::error::{PipelineError, StepError};
use crate::filter;
use crate::join::{join, key_resolves};
use crate::ops;
use crate::pivot::pivot;
use crate::result::{Notice, ResultTable, SkippedStep};
use crate::store::StoreSnapshot;

/// What to do when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the failing step and report the rows as of the last good one
    #[default]
    Abort,
    /// Record the failure and pass the unmodified rows to the next step
    #[serde(alias = "skip")]
    SkipStep,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "skip" | "skip_step" | "skipstep" => Ok(FailurePolicy::SkipStep),
            other => Err(format!("unknown failure policy: {}", other)),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Abort => write!(f, "abort"),
            FailurePolicy::SkipStep => write!(f, "skip_step"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorOptions {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

/// Rows flowing between steps plus the relation a following join is
/// inferred against.
struct RunState {
    rows: Vec<Row>,
    current_relation: String,
    notices: Vec<Notice>,
    skipped: Vec<SkippedStep>,
}

/// Output of one successful step.
struct StepOutput {
    rows: Vec<Row>,
    notices: Vec<Notice>,
    current_relation: Option<String>,
}

impl StepOutput {
    fn rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            notices: Vec::new(),
            current_relation: None,
        }
    }

    fn aggregated(index: usize, result: Aggregated) -> Self {
        let notices = result
            .mismatches
            .into_iter()
            .map(|m| Notice::AggregationTypeMismatch {
                step: index,
                op: m.op,
                field: m.field,
                excluded: m.excluded,
            })
            .collect();
        Self {
            rows: result.rows,
            notices,
            current_relation: None,
        }
    }
}

pub struct Executor {
    registry: FunctionRegistry,
    options: ExecutorOptions,
}

impl Executor {
    pub fn new(options: ExecutorOptions) -> Self {
        Self::with_registry(FunctionRegistry::default(), options)
    }

    pub fn with_registry(registry: FunctionRegistry, options: ExecutorOptions) -> Self {
        Self { registry, options }
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Execute a query document against a store snapshot
    pub fn execute(&self, store: &StoreSnapshot, pipeline: &Pipeline) -> Result<ResultTable, PipelineError> {
        self.execute_steps(store, &pipeline.dataset, &pipeline.steps)
    }

    /// Execute `steps` over the base relation `base`
    pub fn execute_steps(
        &self,
        store: &StoreSnapshot,
        base: &str,
        steps: &[PipelineStep],
    ) -> Result<ResultTable, PipelineError> {
        let span = tracing::info_span!("pipeline", relation = %base, steps = steps.len());
        let _enter = span.enter();

        let relation = store
            .get(base)
            .ok_or_else(|| PipelineError::UnknownRelation(base.to_string()))?;

        let mut state = RunState {
            rows: relation.rows.iter().map(|r| r.qualify(base)).collect(),
            current_relation: base.to_string(),
            notices: Vec::new(),
            skipped: Vec::new(),
        };
        tracing::debug!("Scanned {} rows from {}", state.rows.len(), base);

        for (index, step) in steps.iter().enumerate() {
            match self.apply(store, &state, index, step) {
                Ok(output) => {
                    tracing::debug!("Step {} ({}) produced {} rows", index, step.kind(), output.rows.len());
                    state.rows = output.rows;
                    state.notices.extend(output.notices);
                    if let Some(current) = output.current_relation {
                        state.current_relation = current;
                    }
                }
                Err(error) => match self.options.failure_policy {
                    FailurePolicy::Abort => {
                        tracing::warn!("Step {} ({}) failed, aborting run: {}", index, step.kind(), error);
                        return Err(PipelineError::StepFailed {
                            index,
                            kind: step.kind(),
                            source: error,
                            partial: Box::new(finish(state)),
                        });
                    }
                    FailurePolicy::SkipStep => {
                        tracing::warn!("Step {} ({}) skipped: {}", index, step.kind(), error);
                        state.skipped.push(SkippedStep {
                            index,
                            kind: step.kind(),
                            reason: error.to_string(),
                        });
                    }
                },
            }
        }

        let result = finish(state);
        tracing::info!("Pipeline produced {} rows", result.row_count());
        Ok(result)
    }

    fn apply(
        &self,
        store: &StoreSnapshot,
        state: &RunState,
        index: usize,
        step: &PipelineStep,
    ) -> Result<StepOutput, StepError> {
        let rows = &state.rows;
        match step {
            PipelineStep::Filter(filter_step) => {
                let predicate = filter::compile(&filter_step.condition)?;
                Ok(StepOutput::rows(rows.iter().filter(|&r| predicate(r)).cloned().collect()))
            }
            PipelineStep::Join(join_step) => self.apply_join(store, state, index, join_step),
            PipelineStep::Group(group_step) => {
                let result = group(rows, &group_step.group_keys, &group_step.aggregates)?;
                Ok(StepOutput::aggregated(index, result))
            }
            PipelineStep::Pivot(pivot_step) => Ok(StepOutput::aggregated(index, pivot(rows, pivot_step)?)),
            PipelineStep::Compute(compute_step) => {
                let formula = Formula::compile(&compute_step.expression, &self.registry)?;
                Ok(StepOutput::rows(ops::compute(rows, &compute_step.alias, &formula)?))
            }
            PipelineStep::Select(select_step) => Ok(StepOutput::rows(ops::select(rows, &select_step.projections)?)),
            PipelineStep::Sort(sort_step) => Ok(StepOutput::rows(ops::sort(rows, &sort_step.orders)?)),
            PipelineStep::Limit(limit_step) => {
                Ok(StepOutput::rows(ops::limit(rows, limit_step.offset, limit_step.count)?))
            }
        }
    }

    fn apply_join(
        &self,
        store: &StoreSnapshot,
        state: &RunState,
        index: usize,
        step: &JoinStep,
    ) -> Result<StepOutput, StepError> {
        let right = store
            .get(&step.right_relation)
            .ok_or_else(|| StepError::UnknownRelation(step.right_relation.clone()))?;
        let right_rows: Vec<Row> = right.rows.iter().map(|r| r.qualify(&right.name)).collect();

        let mut planned = plan_join(
            &state.current_relation,
            &step.right_relation,
            step.left_key.as_ref(),
            step.right_key.as_ref(),
            step.kind,
            store,
        );

        // Inferred keys are only a guess; fall back when the current rows
        // no longer carry them (for example after a group step)
        if planned.origin == JoinOrigin::Inferred {
            let usable = match (&planned.spec.left_key, &planned.spec.right_key) {
                (Some(lk), Some(rk)) => key_resolves(&state.rows, lk) && key_resolves(&right_rows, rk),
                _ => false,
            };
            if !usable {
                planned.spec.left_key = None;
                planned.spec.right_key = None;
                planned.origin = JoinOrigin::CartesianFallback;
            }
        }

        let mut notices = Vec::new();
        if planned.origin == JoinOrigin::CartesianFallback {
            tracing::warn!(
                "No join key between {} and {}, falling back to cartesian product",
                state.current_relation,
                step.right_relation
            );
            notices.push(Notice::CartesianFallback {
                step: index,
                left: state.current_relation.clone(),
                right: step.right_relation.clone(),
                join_kind: step.kind,
            });
        } else if planned.origin == JoinOrigin::Inferred {
            tracing::debug!(
                "Inferred join {} = {}",
                planned.spec.left_key.as_ref().map(ToString::to_string).unwrap_or_default(),
                planned.spec.right_key.as_ref().map(ToString::to_string).unwrap_or_default()
            );
        }

        let rows = join(&state.rows, &right_rows, &planned.spec)?;
        Ok(StepOutput {
            rows,
            notices,
            current_relation: Some(step.right_relation.clone()),
        })
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ExecutorOptions::default())
    }
}

fn finish(state: RunState) -> ResultTable {
    let mut notices = state.notices;
    if state.rows.is_empty() {
        notices.push(Notice::EmptyResult);
    }
    ResultTable::new(state.rows, notices, state.skipped)
}
