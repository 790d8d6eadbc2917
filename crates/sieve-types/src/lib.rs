//! Shared types, errors, context, and outcomes for the Sieve selection engine.
//!
//! This crate provides the foundational types used across the other Sieve crates:
//! - `SieveError`: unified error taxonomy
//! - `ExecutionContext`: per-run state threaded through pipeline blocks
//! - `BlockOutcome`: result of executing one block
//! - `VoteAggregation`: precomputed per-proposal engagement metrics

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unified error type for all Sieve subsystems.
#[derive(Debug, thiserror::Error)]
pub enum SieveError {
    // === Definition Errors ===
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("Unknown operator '{operator}'")]
    UnknownOperator { operator: String },

    #[error("Unknown function '{function}'")]
    UnknownFunction { function: String },

    #[error("Invalid arguments to '{function}': {message}")]
    InvalidArguments { function: String, message: String },

    #[error("Unknown block type '{block_type}'")]
    UnknownBlockType { block_type: String },

    #[error("Executor '{executor}' cannot run block '{block}'")]
    ExecutorMismatch { executor: String, block: String },

    #[error("Merge strategy '{strategy}' is not implemented")]
    UnsupportedMergeStrategy { strategy: String },

    #[error("Branch nesting exceeded the maximum depth of {depth}")]
    BranchDepthExceeded { depth: usize },

    #[error("Pipeline validation failed: {0}")]
    ValidationError(String),

    // === Run Errors ===
    #[error("Pipeline execution failed: {message}")]
    PipelineFailed { message: String },

    #[error("Vote data source error: {0}")]
    DataSource(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl SieveError {
    /// Returns `true` for programmer/configuration errors in a pipeline definition.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            SieveError::InvalidExpression(_)
                | SieveError::UnknownOperator { .. }
                | SieveError::UnknownFunction { .. }
                | SieveError::InvalidArguments { .. }
                | SieveError::UnknownBlockType { .. }
                | SieveError::ExecutorMismatch { .. }
                | SieveError::UnsupportedMergeStrategy { .. }
                | SieveError::BranchDepthExceeded { .. }
        )
    }

    /// Returns `true` if retrying the same run cannot succeed.
    pub fn is_terminal(&self) -> bool {
        self.is_definition_error() || matches!(self, SieveError::ValidationError(_))
    }
}

/// A convenience alias for `Result<T, SieveError>`.
pub type Result<T> = std::result::Result<T, SieveError>;

// ---------------------------------------------------------------------------
// Proposal: caller-owned, schema-flexible record
// ---------------------------------------------------------------------------

/// Proposals are opaque JSON records addressed by dot-path.
pub type Proposal = Value;

/// The proposal's `id` rendered as a string, if it has a scalar one.
pub fn proposal_id(proposal: &Proposal) -> Option<String> {
    match proposal.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Identity used for de-duplication: the id when present, otherwise the
/// record's canonical JSON.
pub fn identity_key(proposal: &Proposal) -> String {
    proposal_id(proposal).unwrap_or_else(|| proposal.to_string())
}

// ---------------------------------------------------------------------------
// VoteAggregation: per-proposal engagement metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteAggregation {
    pub like_count: u64,
    pub follow_count: u64,
    pub vote_count: u64,
    pub approval_count: u64,
    pub rejection_count: u64,
    pub abstain_count: u64,
    pub approval_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participation_rate: Option<f64>,
    #[serde(default)]
    pub votes: Vec<Value>,
}

impl VoteAggregation {
    /// Recompute the derived rates from the raw counts.
    ///
    /// `approval_rate` is `0` when there are no votes. `participation_rate` is
    /// only set when a positive eligible-voter count is known.
    pub fn finalize(&mut self, eligible_voters: Option<u64>) {
        self.approval_rate = if self.vote_count == 0 {
            0.0
        } else {
            self.approval_count as f64 / self.vote_count as f64
        };
        self.participation_rate = match eligible_voters {
            Some(n) if n > 0 => Some(self.vote_count as f64 / n as f64),
            _ => None,
        };
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext: the engine's working state
// ---------------------------------------------------------------------------

/// Per-run state handed to expressions and block executors.
///
/// Executors receive it by shared reference and report changes through
/// [`BlockOutcome`]; only the engine folds those changes back in. Cloning
/// yields a fully independent copy, which is how branch isolation works.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    #[serde(default)]
    pub proposals: Vec<Proposal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal: Option<Proposal>,
    #[serde(default)]
    pub vote_data: BTreeMap<String, VoteAggregation>,
    #[serde(default)]
    pub process: Value,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

impl ExecutionContext {
    /// Create a context over the given proposals with no metadata.
    pub fn new(proposals: Vec<Proposal>) -> Self {
        Self {
            proposals,
            ..Self::default()
        }
    }

    pub fn with_process(mut self, process: Value) -> Self {
        self.process = process;
        self
    }

    pub fn with_vote_data(mut self, vote_data: BTreeMap<String, VoteAggregation>) -> Self {
        self.vote_data = vote_data;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Merge `updates` into the variables. Existing names are overwritten.
    pub fn apply_variables(&mut self, updates: BTreeMap<String, Value>) {
        self.variables.extend(updates);
    }

    pub fn set_output(&mut self, name: impl Into<String>, value: Value) {
        self.outputs.insert(name.into(), value);
    }

    /// Look up a named output only if it holds an array.
    pub fn output_array(&self, name: &str) -> Option<&Vec<Value>> {
        self.outputs.get(name).and_then(Value::as_array)
    }

    /// Resolve a variable reference: an optional leading `$` is stripped, then
    /// variables are checked before outputs. Unknown names resolve to `null`.
    pub fn lookup_variable(&self, name: &str) -> Value {
        let name = name.strip_prefix('$').unwrap_or(name);
        self.variables
            .get(name)
            .or_else(|| self.outputs.get(name))
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Vote metrics for one proposal, if the aggregator produced any.
    pub fn votes_for(&self, proposal: &Proposal) -> Option<&VoteAggregation> {
        proposal_id(proposal).and_then(|id| self.vote_data.get(&id))
    }

    /// Copy used for a nested branch run: own variables and outputs, the given
    /// proposals, and no scoped proposal.
    pub fn isolated_with(&self, proposals: Vec<Proposal>) -> Self {
        Self {
            proposals,
            proposal: None,
            vote_data: self.vote_data.clone(),
            process: self.process.clone(),
            variables: self.variables.clone(),
            outputs: self.outputs.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// BlockOutcome: result of executing a block
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockOutcome {
    /// The proposal set after this block.
    pub proposals: Vec<Proposal>,
    /// Variables to merge into the context.
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    /// Side-channel output stored instead of `proposals` under the block's output name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl BlockOutcome {
    /// An outcome that only carries a proposal set.
    pub fn proposals(proposals: Vec<Proposal>) -> Self {
        Self {
            proposals,
            variables: BTreeMap::new(),
            output: None,
        }
    }

    pub fn with_variables(mut self, variables: BTreeMap<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    /// The value the engine stores under the block's output name.
    pub fn stored_value(&self) -> Value {
        match &self.output {
            Some(v) => v.clone(),
            None => Value::Array(self.proposals.clone()),
        }
    }
}
