//! Block executor trait, dynamic dispatch wrapper, and executor registry.

use std::collections::HashMap;

use serde_json::Value;
use sieve_types::{proposal_id, BlockOutcome, ExecutionContext, Result, SieveError};

use crate::block::{Block, BlockKind};
use crate::path;

// ---------------------------------------------------------------------------
// BlockExecutor trait
// ---------------------------------------------------------------------------

pub trait BlockExecutor: Send + Sync {
    /// The block type this executor handles (e.g. "filter", "sort").
    fn block_type(&self) -> &str;

    /// Execute the block against `context.proposals` (the block's input).
    ///
    /// Executors never mutate the context; any new variables or side outputs
    /// are returned in the [`BlockOutcome`] for the engine to fold in.
    fn execute(&self, block: &Block, context: &ExecutionContext) -> Result<BlockOutcome>;
}

/// Error for a block routed to an executor of a different type.
pub(crate) fn mismatch(executor: &str, block: &Block) -> SieveError {
    SieveError::ExecutorMismatch {
        executor: executor.to_string(),
        block: format!("{} ({})", block.id, block.block_type()),
    }
}

// ---------------------------------------------------------------------------
// DynExecutor: object-safe wrapper
// ---------------------------------------------------------------------------

pub struct DynExecutor(Box<dyn BlockExecutor>);

impl DynExecutor {
    pub fn new(executor: impl BlockExecutor + 'static) -> Self {
        Self(Box::new(executor))
    }

    pub fn block_type(&self) -> &str {
        self.0.block_type()
    }

    pub fn execute(&self, block: &Block, context: &ExecutionContext) -> Result<BlockOutcome> {
        self.0.execute(block, context)
    }
}

// ---------------------------------------------------------------------------
// ExecutorRegistry
// ---------------------------------------------------------------------------

pub struct ExecutorRegistry {
    executors: HashMap<String, DynExecutor>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor, replacing any previous one for the same type.
    pub fn register(&mut self, executor: impl BlockExecutor + 'static) {
        let t = executor.block_type().to_string();
        self.executors.insert(t, DynExecutor::new(executor));
    }

    pub fn get(&self, block_type: &str) -> Option<&DynExecutor> {
        self.executors.get(block_type)
    }

    pub fn has(&self, block_type: &str) -> bool {
        self.executors.contains_key(block_type)
    }

    /// Look up the executor for `block`, failing with `UnknownBlockType`.
    pub fn resolve(&self, block: &Block) -> Result<&DynExecutor> {
        let block_type = block.block_type();
        self.get(block_type)
            .ok_or_else(|| SieveError::UnknownBlockType {
                block_type: block_type.to_string(),
            })
    }

    /// Registered block types in sorted order.
    pub fn block_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Built-in pass-through executors
// ---------------------------------------------------------------------------

/// Logs the current proposal set and context keys; never changes data.
pub struct DebugExecutor;

const DEFAULT_DEBUG_SAMPLE: usize = 5;

impl BlockExecutor for DebugExecutor {
    fn block_type(&self) -> &str {
        "debug"
    }

    fn execute(&self, block: &Block, context: &ExecutionContext) -> Result<BlockOutcome> {
        let BlockKind::Debug(debug) = &block.kind else {
            return Err(mismatch(self.block_type(), block));
        };

        let label = debug.label.as_deref().unwrap_or(&block.id);
        let variables: Vec<&str> = context.variables.keys().map(String::as_str).collect();
        let outputs: Vec<&str> = context.outputs.keys().map(String::as_str).collect();
        tracing::info!(
            block = %block.id,
            label = %label,
            proposals = context.proposals.len(),
            variables = ?variables,
            outputs = ?outputs,
            "Debug block"
        );

        if !debug.fields.is_empty() {
            let sample = debug.sample.unwrap_or(DEFAULT_DEBUG_SAMPLE);
            for (index, proposal) in context.proposals.iter().take(sample).enumerate() {
                let selected: serde_json::Map<String, Value> = debug
                    .fields
                    .iter()
                    .map(|f| (f.clone(), path::get(proposal, f)))
                    .collect();
                let fields = Value::Object(selected);
                tracing::info!(
                    block = %block.id,
                    index,
                    id = ?proposal_id(proposal),
                    fields = %fields,
                    "Debug proposal"
                );
            }
        }

        Ok(BlockOutcome::proposals(context.proposals.clone()))
    }
}

/// Placeholder for `branch` blocks. The engine replaces its pass-through
/// result with the selected branch's nested run.
pub struct BranchExecutor;

impl BlockExecutor for BranchExecutor {
    fn block_type(&self) -> &str {
        "branch"
    }

    fn execute(&self, block: &Block, context: &ExecutionContext) -> Result<BlockOutcome> {
        if !matches!(block.kind, BlockKind::Branch(_)) {
            return Err(mismatch(self.block_type(), block));
        }
        Ok(BlockOutcome::proposals(context.proposals.clone()))
    }
}

// ---------------------------------------------------------------------------
// Default registry factory
// ---------------------------------------------------------------------------

pub fn default_registry() -> ExecutorRegistry {
    let mut reg = ExecutorRegistry::new();
    reg.register(crate::executors::FilterExecutor);
    reg.register(crate::executors::TransformExecutor);
    reg.register(crate::executors::ComputeExecutor);
    reg.register(crate::executors::SortExecutor);
    reg.register(crate::executors::LimitExecutor);
    reg.register(crate::executors::GroupExecutor);
    reg.register(crate::executors::ScoreExecutor);
    reg.register(crate::executors::MergeExecutor);
    reg.register(DebugExecutor);
    reg.register(BranchExecutor);
    reg
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
