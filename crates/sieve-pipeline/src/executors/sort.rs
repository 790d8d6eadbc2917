use std::cmp::Ordering;

use serde_json::Value;
use sieve_types::{BlockOutcome, ExecutionContext, Result};

use crate::block::{Block, BlockKind, SortKey, SortOrder};
use crate::executor::{mismatch, BlockExecutor};
use crate::value::compare_for_sort;

use super::keyed_value;

/// Stable multi-key sort. Later keys only break ties left by earlier ones.
pub struct SortExecutor;

fn compare_key(key: &SortKey, a: &Value, b: &Value) -> Ordering {
    let ordering = match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) if key.nulls_first => Ordering::Less,
        (true, false) => Ordering::Greater,
        (false, true) if key.nulls_first => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => compare_for_sort(a, b),
    };
    match key.order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

impl BlockExecutor for SortExecutor {
    fn block_type(&self) -> &str {
        "sort"
    }

    fn execute(&self, block: &Block, context: &ExecutionContext) -> Result<BlockOutcome> {
        let BlockKind::Sort(sort) = &block.kind else {
            return Err(mismatch(self.block_type(), block));
        };

        // Sort keys are evaluated once per proposal, up front.
        let mut rows = Vec::with_capacity(context.proposals.len());
        for proposal in &context.proposals {
            let mut keys = Vec::with_capacity(sort.sort_by.len());
            for key in &sort.sort_by {
                keys.push(keyed_value(
                    key.field.as_deref(),
                    key.expression.as_ref(),
                    context,
                    proposal,
                )?);
            }
            rows.push((keys, proposal));
        }

        rows.sort_by(|(a, _), (b, _)| {
            sort.sort_by
                .iter()
                .zip(a.iter().zip(b.iter()))
                .map(|(key, (x, y))| compare_key(key, x, y))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });

        Ok(BlockOutcome::proposals(
            rows.into_iter().map(|(_, p)| p.clone()).collect(),
        ))
    }
}
