//! StageQ Engine - in-memory pipeline execution
//!
//! Applies a [`stageq_ir::Pipeline`] to relations held in a
//! [`RelationStore`]. Each step consumes the previous row sequence and
//! produces a new one; the final rows come back as a [`ResultTable`]
//! together with notices about cartesian fallbacks, excluded aggregate
//! inputs and skipped steps.

pub mod aggregate;
pub mod compute;
pub mod error;
pub mod executor;
pub mod filter;
pub mod join;
pub mod ops;
pub mod pivot;
pub mod result;
pub mod store;

pub use aggregate::{group, Aggregated, TypeMismatch, AGGREGATE_SCALE};
pub use compute::Formula;
pub use error::{PipelineError, StepError};
pub use executor::{Executor, ExecutorOptions, FailurePolicy};
pub use filter::Predicate;
pub use join::join;
pub use pivot::pivot;
pub use result::{Notice, ResultTable, SkippedStep};
pub use store::{RelationStore, StoreSnapshot};
