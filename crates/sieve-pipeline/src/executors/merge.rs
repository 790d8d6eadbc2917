use std::collections::{HashMap, HashSet};

use serde_json::Value;
use sieve_types::{identity_key, BlockOutcome, ExecutionContext, Proposal, Result, SieveError};

use crate::block::{Block, BlockKind, MergeStrategy};
use crate::executor::{mismatch, BlockExecutor};

/// Combines named outputs. The block's own input is ignored.
pub struct MergeExecutor;

fn dedupe<'a>(items: impl IntoIterator<Item = &'a Value>) -> Vec<Proposal> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|p| seen.insert(identity_key(p)))
        .cloned()
        .collect()
}

fn union(inputs: &[&[Value]]) -> Vec<Proposal> {
    dedupe(inputs.iter().flat_map(|items| items.iter()))
}

fn intersection(inputs: &[&[Value]]) -> Vec<Proposal> {
    let Some(first) = inputs.first() else {
        return Vec::new();
    };

    let mut counts: HashMap<String, usize> = HashMap::new();
    for items in inputs {
        let ids: HashSet<String> = items.iter().map(identity_key).collect();
        for id in ids {
            *counts.entry(id).or_default() += 1;
        }
    }

    dedupe(
        first
            .iter()
            .filter(|p| counts.get(&identity_key(p)) == Some(&inputs.len())),
    )
}

fn concat(inputs: &[&[Value]]) -> Vec<Proposal> {
    inputs.iter().flat_map(|items| items.iter().cloned()).collect()
}

impl BlockExecutor for MergeExecutor {
    fn block_type(&self) -> &str {
        "merge"
    }

    fn execute(&self, block: &Block, context: &ExecutionContext) -> Result<BlockOutcome> {
        let BlockKind::Merge(merge) = &block.kind else {
            return Err(mismatch(self.block_type(), block));
        };

        let inputs: Vec<&[Value]> = merge
            .inputs
            .iter()
            .map(|name| match context.output_array(name) {
                Some(items) => items.as_slice(),
                None => {
                    tracing::warn!(
                        block = %block.id,
                        input = %name,
                        "Merge input missing or not an array"
                    );
                    &[][..]
                }
            })
            .collect();

        let merged = match merge.strategy {
            MergeStrategy::Union => union(&inputs),
            MergeStrategy::Intersection => intersection(&inputs),
            MergeStrategy::Concat => concat(&inputs),
            MergeStrategy::Custom => {
                return Err(SieveError::UnsupportedMergeStrategy {
                    strategy: merge.strategy.as_str().to_string(),
                })
            }
        };
        Ok(BlockOutcome::proposals(merged))
    }
}
