//! Selection pipeline engine, block executors, expression evaluator, and linting.
//!
//! This crate implements the Sieve pipeline runner: a small interpreter that
//! walks a declarative list of blocks over a set of proposal records, with
//! structural expression evaluation, per-type block executors, branch
//! recursion with isolated context copies, and definition lint rules.

pub mod block;
pub mod engine;
pub mod evaluator;
pub mod events;
pub mod executor;
pub mod executors;
pub mod expression;
mod functions;
pub mod path;
pub mod regex_guard;
pub mod validation;
pub mod value;

pub use block::{
    AggregateOp, Block, BlockKind, BranchBlock, BranchCase, BranchDefault, ComputeBlock,
    DebugBlock, FilterBlock, GroupAggregation, GroupBlock, GroupKey, LimitBlock, MergeBlock,
    MergeStrategy, Pipeline, Quantity, ScoreBlock, ScoreCriterion, SortBlock, SortKey, SortOrder,
    TransformBlock,
};
pub use engine::{execute_pipeline, EngineConfig, PipelineEngine, PipelineRun};
pub use evaluator::{evaluate, evaluate_for, evaluate_in, Scope};
pub use events::{EventEmitter, PipelineEvent};
pub use executor::{
    default_registry, BlockExecutor, BranchExecutor, DebugExecutor, DynExecutor,
    ExecutorRegistry,
};
pub use executors::{
    ComputeExecutor, FilterExecutor, GroupExecutor, LimitExecutor, MergeExecutor, ScoreExecutor,
    SortExecutor, TransformExecutor,
};
pub use expression::{ArithmeticOp, CompareOp, Expression, Function};
pub use regex_guard::{is_safe_pattern, safe_regex};
pub use validation::{validate, validate_or_raise, Diagnostic, LintRule, Severity};
