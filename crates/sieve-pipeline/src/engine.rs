//! Pipeline execution engine: the sequential block walk plus branch recursion.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sieve_types::{BlockOutcome, ExecutionContext, Proposal, Result, SieveError};
use uuid::Uuid;

use crate::block::{Block, BlockKind, BranchBlock, Pipeline};
use crate::evaluator::evaluate_in;
use crate::events::{EventEmitter, PipelineEvent};
use crate::executor::{default_registry, ExecutorRegistry};
use crate::value::is_truthy;

/// Input name used when neither the block nor its predecessor names one.
pub const DEFAULT_INPUT: &str = "proposals";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deepest allowed nesting of branch blocks inside branch blocks.
    pub max_branch_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_branch_depth: 32,
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub proposals: Vec<Proposal>,
    pub outputs: BTreeMap<String, Value>,
    pub variables: BTreeMap<String, Value>,
    /// Block ids in execution order, nested branch blocks included.
    pub completed_blocks: Vec<String>,
    pub finished_at: DateTime<Utc>,
}

/// Drives a [`Pipeline`] over an [`ExecutionContext`].
pub struct PipelineEngine {
    registry: ExecutorRegistry,
    config: EngineConfig,
    events: Option<EventEmitter>,
}

// ---------------------------------------------------------------------------
// PipelineEngine
// ---------------------------------------------------------------------------

impl PipelineEngine {
    pub fn new(registry: ExecutorRegistry) -> Self {
        Self {
            registry,
            config: EngineConfig::default(),
            events: None,
        }
    }

    /// Engine pre-loaded with the built-in executors.
    pub fn with_default_registry() -> Self {
        Self::new(default_registry())
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    /// Run `pipeline` to completion. Any block failure aborts the run and is
    /// reported as [`SieveError::PipelineFailed`]; partial results are dropped.
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        mut context: ExecutionContext,
    ) -> Result<PipelineRun> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();

        tracing::info!(
            run_id = %run_id,
            blocks = pipeline.blocks.len(),
            proposals = context.proposals.len(),
            "Pipeline started"
        );
        self.emit(PipelineEvent::PipelineStarted {
            run_id: run_id.to_string(),
            block_count: pipeline.blocks.len(),
            proposal_count: context.proposals.len(),
        });

        // Pipeline-declared variables win over caller-seeded ones.
        context.apply_variables(pipeline.variables.clone());

        let mut completed_blocks = Vec::new();
        let outcome = self.run_blocks(&pipeline.blocks, &mut context, 0, &mut completed_blocks);
        let running = match outcome {
            Ok(running) => running,
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "Pipeline failed");
                self.emit(PipelineEvent::PipelineFailed {
                    run_id: run_id.to_string(),
                    error: e.to_string(),
                });
                return Err(SieveError::PipelineFailed {
                    message: e.to_string(),
                });
            }
        };

        let proposals = match pipeline.output.as_deref().and_then(|n| context.output_array(n)) {
            Some(named) => named.clone(),
            None => running,
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            run_id = %run_id,
            proposals = proposals.len(),
            duration_ms,
            "Pipeline completed"
        );
        self.emit(PipelineEvent::PipelineCompleted {
            run_id: run_id.to_string(),
            proposal_count: proposals.len(),
            duration_ms,
        });

        Ok(PipelineRun {
            run_id,
            proposals,
            outputs: context.outputs,
            variables: context.variables,
            completed_blocks,
            finished_at: Utc::now(),
        })
    }

    /// Execute `blocks` in order against `context`, returning the final
    /// running proposal set.
    fn run_blocks(
        &self,
        blocks: &[Block],
        context: &mut ExecutionContext,
        depth: usize,
        completed: &mut Vec<String>,
    ) -> Result<Vec<Proposal>> {
        let mut running = context.proposals.clone();
        let mut previous_output: Option<String> = None;

        for block in blocks {
            let input_name = block
                .input
                .clone()
                .or_else(|| previous_output.take())
                .unwrap_or_else(|| DEFAULT_INPUT.to_string());
            let input = match context.output_array(&input_name) {
                Some(named) => named.clone(),
                None => running.clone(),
            };

            let started = Instant::now();
            let executor = self.registry.resolve(block)?;
            tracing::debug!(
                block = %block.id,
                block_type = block.block_type(),
                input = %input_name,
                proposals = input.len(),
                "Executing block"
            );
            self.emit(PipelineEvent::BlockStarted {
                block_id: block.id.clone(),
                block_type: block.block_type().to_string(),
                input_count: input.len(),
            });

            context.proposals = input;
            let mut outcome = executor.execute(block, context)?;
            if let BlockKind::Branch(branch) = &block.kind {
                let selected = self.execute_branch(block, branch, context, depth, completed)?;
                outcome = BlockOutcome::proposals(selected);
            }

            let output_name = block.output_name();
            context.set_output(output_name, outcome.stored_value());
            previous_output = match outcome.output {
                None => block.output.clone(),
                Some(_) => None,
            };
            context.apply_variables(outcome.variables);
            running = outcome.proposals;
            completed.push(block.id.clone());

            self.emit(PipelineEvent::BlockCompleted {
                block_id: block.id.clone(),
                block_type: block.block_type().to_string(),
                output_count: running.len(),
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        Ok(running)
    }

    /// Pick the first case whose condition holds (else the default) and run
    /// its blocks on a copy of the context. Only the case's named output is
    /// written back to the parent.
    fn execute_branch(
        &self,
        block: &Block,
        branch: &BranchBlock,
        context: &mut ExecutionContext,
        depth: usize,
        completed: &mut Vec<String>,
    ) -> Result<Vec<Proposal>> {
        let mut selected = None;
        for (index, case) in branch.branches.iter().enumerate() {
            if is_truthy(&evaluate_in(&case.condition, context)?) {
                selected = Some((Some(index), &case.blocks, case.output.as_ref()));
                break;
            }
        }
        let selected = selected.or_else(|| {
            branch
                .default
                .as_ref()
                .map(|d| (None, &d.blocks, d.output.as_ref()))
        });

        let Some((case, blocks, output)) = selected else {
            tracing::debug!(block = %block.id, "No branch matched, passing input through");
            return Ok(context.proposals.clone());
        };

        if depth >= self.config.max_branch_depth {
            return Err(SieveError::BranchDepthExceeded {
                depth: self.config.max_branch_depth,
            });
        }

        tracing::debug!(block = %block.id, case = ?case, "Branch selected");
        self.emit(PipelineEvent::BranchSelected {
            block_id: block.id.clone(),
            case,
        });

        let mut nested = context.isolated_with(context.proposals.clone());
        let result = self.run_blocks(blocks, &mut nested, depth + 1, completed)?;
        if let Some(name) = output {
            context.set_output(name.clone(), Value::Array(result.clone()));
        }
        Ok(result)
    }
}

impl Default for PipelineEngine {
    fn default() -> Self {
        Self::with_default_registry()
    }
}

/// Run `pipeline` with the built-in executors and return the selected proposals.
pub async fn execute_pipeline(
    pipeline: &Pipeline,
    context: ExecutionContext,
) -> Result<Vec<Proposal>> {
    let run = PipelineEngine::with_default_registry()
        .run(pipeline, context)
        .await?;
    Ok(run.proposals)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
