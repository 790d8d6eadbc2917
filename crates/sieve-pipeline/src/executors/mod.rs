//! Data-transforming block executors.

pub mod group;
pub mod merge;
pub mod score;
pub mod sort;

pub use group::GroupExecutor;
pub use merge::MergeExecutor;
pub use score::ScoreExecutor;
pub use sort::SortExecutor;

use std::collections::BTreeMap;

use serde_json::Value;
use sieve_types::{BlockOutcome, ExecutionContext, Proposal, Result};

use crate::block::{Block, BlockKind, Quantity};
use crate::evaluator::{evaluate, evaluate_for, evaluate_in, Scope};
use crate::executor::{mismatch, BlockExecutor};
use crate::expression::Expression;
use crate::path;
use crate::value::{is_truthy, to_number};

/// Value of a `field`/`expression` pair for one proposal. `field` wins when
/// both are given; neither yields `null`.
pub(crate) fn keyed_value(
    field: Option<&str>,
    expression: Option<&Expression>,
    context: &ExecutionContext,
    proposal: &Proposal,
) -> Result<Value> {
    match (field, expression) {
        (Some(f), _) => evaluate(&Expression::field(f), &Scope::with_proposal(context, proposal)),
        (None, Some(e)) => evaluate_for(e, context, proposal),
        (None, None) => Ok(Value::Null),
    }
}

// ---------------------------------------------------------------------------
// FilterExecutor
// ---------------------------------------------------------------------------

pub struct FilterExecutor;

impl BlockExecutor for FilterExecutor {
    fn block_type(&self) -> &str {
        "filter"
    }

    fn execute(&self, block: &Block, context: &ExecutionContext) -> Result<BlockOutcome> {
        let BlockKind::Filter(filter) = &block.kind else {
            return Err(mismatch(self.block_type(), block));
        };

        let mut kept = Vec::new();
        for proposal in &context.proposals {
            if is_truthy(&evaluate_for(&filter.condition, context, proposal)?) {
                kept.push(proposal.clone());
            }
        }

        tracing::debug!(
            block = %block.id,
            before = context.proposals.len(),
            after = kept.len(),
            "Filter applied"
        );
        Ok(BlockOutcome::proposals(kept))
    }
}

// ---------------------------------------------------------------------------
// TransformExecutor
// ---------------------------------------------------------------------------

pub struct TransformExecutor;

impl BlockExecutor for TransformExecutor {
    fn block_type(&self) -> &str {
        "transform"
    }

    fn execute(&self, block: &Block, context: &ExecutionContext) -> Result<BlockOutcome> {
        let BlockKind::Transform(transform) = &block.kind else {
            return Err(mismatch(self.block_type(), block));
        };

        let mut transformed = Vec::with_capacity(context.proposals.len());
        for proposal in &context.proposals {
            let mut copy = proposal.clone();
            for (field_path, expression) in &transform.transformations {
                let value = evaluate_for(expression, context, proposal)?;
                path::assign(&mut copy, field_path, value);
            }
            transformed.push(copy);
        }
        Ok(BlockOutcome::proposals(transformed))
    }
}

// ---------------------------------------------------------------------------
// ComputeExecutor
// ---------------------------------------------------------------------------

pub struct ComputeExecutor;

impl BlockExecutor for ComputeExecutor {
    fn block_type(&self) -> &str {
        "compute"
    }

    fn execute(&self, block: &Block, context: &ExecutionContext) -> Result<BlockOutcome> {
        let BlockKind::Compute(compute) = &block.kind else {
            return Err(mismatch(self.block_type(), block));
        };

        let mut variables = BTreeMap::new();
        for (name, expression) in &compute.computations {
            variables.insert(name.clone(), evaluate_in(expression, context)?);
        }

        tracing::debug!(
            block = %block.id,
            variables = ?variables.keys().collect::<Vec<_>>(),
            "Computed variables"
        );
        Ok(BlockOutcome::proposals(context.proposals.clone()).with_variables(variables))
    }
}

// ---------------------------------------------------------------------------
// LimitExecutor
// ---------------------------------------------------------------------------

pub struct LimitExecutor;

impl LimitExecutor {
    /// Resolve a count/offset once against the whole context, clamped to ≥ 0.
    fn resolve(quantity: Option<&Quantity>, context: &ExecutionContext) -> Result<Option<usize>> {
        let raw = match quantity {
            None => return Ok(None),
            Some(Quantity::Fixed(n)) => *n,
            Some(Quantity::Computed(e)) => to_number(&evaluate_in(e, context)?),
        };
        // NaN and negatives clamp to zero.
        Ok(Some(if raw > 0.0 { raw.floor() as usize } else { 0 }))
    }
}

impl BlockExecutor for LimitExecutor {
    fn block_type(&self) -> &str {
        "limit"
    }

    fn execute(&self, block: &Block, context: &ExecutionContext) -> Result<BlockOutcome> {
        let BlockKind::Limit(limit) = &block.kind else {
            return Err(mismatch(self.block_type(), block));
        };

        let offset = Self::resolve(limit.offset.as_ref(), context)?.unwrap_or(0);
        let count = Self::resolve(limit.count.as_ref(), context)?.unwrap_or(usize::MAX);

        let sliced = context
            .proposals
            .iter()
            .skip(offset)
            .take(count)
            .cloned()
            .collect();
        Ok(BlockOutcome::proposals(sliced))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn block(value: Value) -> Block {
        serde_json::from_value(value).unwrap()
    }

    fn ids(proposals: &[Proposal]) -> Vec<Value> {
        proposals.iter().map(|p| p["id"].clone()).collect()
    }

    fn five() -> Vec<Proposal> {
        (0..5).map(|i| json!({"id": i, "votes": i * 10})).collect()
    }

    #[test]
    fn filter_keeps_truthy_in_order() {
        let b = block(json!({"id": "f", "type": "filter", "condition": {
            "operator": "greaterThanOrEqual", "left": {"field": "votes"}, "right": {"value": 20}
        }}));
        let ctx = ExecutionContext::new(five());
        let outcome = FilterExecutor.execute(&b, &ctx).unwrap();
        assert_eq!(ids(&outcome.proposals), vec![json!(2), json!(3), json!(4)]);
    }

    #[test]
    fn filter_is_idempotent() {
        let b = block(json!({"id": "f", "type": "filter", "condition": {
            "operator": "in", "left": {"field": "id"}, "right": {"value": [1, 3]}
        }}));
        let once = FilterExecutor.execute(&b, &ExecutionContext::new(five())).unwrap();
        let twice = FilterExecutor
            .execute(&b, &ExecutionContext::new(once.proposals.clone()))
            .unwrap();
        assert_eq!(once.proposals, twice.proposals);
    }

    #[test]
    fn transform_writes_copies_and_leaves_input_untouched() {
        let b = block(json!({"id": "t", "type": "transform", "transformations": {
            "metadata.doubled": {
                "operator": "multiply",
                "operands": [{"field": "votes"}, {"value": 2}]
            },
            "status": {"value": "reviewed"}
        }}));
        let input = vec![json!({"id": 1, "votes": 4, "status": "draft"})];
        let ctx = ExecutionContext::new(input.clone());
        let outcome = TransformExecutor.execute(&b, &ctx).unwrap();

        assert_eq!(
            outcome.proposals[0],
            json!({"id": 1, "votes": 4, "status": "reviewed", "metadata": {"doubled": 8}})
        );
        assert_eq!(ctx.proposals, input);
    }

    #[test]
    fn transform_expressions_see_the_untransformed_proposal() {
        let b = block(json!({"id": "t", "type": "transform", "transformations": {
            "a": {"value": 100},
            "b": {"field": "a"}
        }}));
        let ctx = ExecutionContext::new(vec![json!({"a": 1})]);
        let outcome = TransformExecutor.execute(&b, &ctx).unwrap();
        assert_eq!(outcome.proposals[0], json!({"a": 100, "b": 1}));
    }

    #[test]
    fn transform_overwrites_array_elements_in_place() {
        let b = block(json!({"id": "t", "type": "transform", "transformations": {
            "tags.0": {"value": "X"}
        }}));
        let ctx = ExecutionContext::new(vec![json!({"id": 1, "tags": ["a", "b"]})]);
        let outcome = TransformExecutor.execute(&b, &ctx).unwrap();
        assert_eq!(outcome.proposals[0], json!({"id": 1, "tags": ["X", "b"]}));
    }

    #[test]
    fn transform_writes_parent_paths_before_children() {
        // Declared child-first; the parent still lands first.
        let b = block(json!({"id": "t", "type": "transform", "transformations": {
            "metadata.x": {"value": 1},
            "metadata": {"value": {"y": 2}}
        }}));
        let ctx = ExecutionContext::new(vec![json!({"id": 1})]);
        let outcome = TransformExecutor.execute(&b, &ctx).unwrap();
        assert_eq!(
            outcome.proposals[0],
            json!({"id": 1, "metadata": {"x": 1, "y": 2}})
        );
    }

    #[test]
    fn compute_returns_variables_and_passes_proposals() {
        let b = block(json!({"id": "c", "type": "compute", "computations": {
            "total": {"function": "sum", "arguments": [{"field": "proposals"}, {"value": "votes"}]},
            "count": {"function": "count", "arguments": [{"field": "proposals"}]}
        }}));
        let ctx = ExecutionContext::new(five());
        let outcome = ComputeExecutor.execute(&b, &ctx).unwrap();
        assert_eq!(outcome.variables["total"], json!(100));
        assert_eq!(outcome.variables["count"], json!(5));
        assert_eq!(outcome.proposals, five());
    }

    #[test]
    fn limit_with_count_and_offset() {
        let b = block(json!({"id": "l", "type": "limit", "count": 2, "offset": 1}));
        let outcome = LimitExecutor.execute(&b, &ExecutionContext::new(five())).unwrap();
        assert_eq!(ids(&outcome.proposals), vec![json!(1), json!(2)]);
    }

    #[test]
    fn limit_clamps_negative_and_evaluates_expressions_once() {
        let b = block(json!({
            "id": "l", "type": "limit", "count": {"variable": "top"}, "offset": -3
        }));
        let ctx = ExecutionContext::new(five()).with_variable("top", json!(3.7));
        let outcome = LimitExecutor.execute(&b, &ctx).unwrap();
        assert_eq!(ids(&outcome.proposals), vec![json!(0), json!(1), json!(2)]);

        let negative = block(json!({"id": "l", "type": "limit", "count": -1}));
        let outcome = LimitExecutor
            .execute(&negative, &ExecutionContext::new(five()))
            .unwrap();
        assert!(outcome.proposals.is_empty());
    }

    #[test]
    fn limit_without_count_keeps_the_tail() {
        let b = block(json!({"id": "l", "type": "limit", "offset": 3}));
        let outcome = LimitExecutor.execute(&b, &ExecutionContext::new(five())).unwrap();
        assert_eq!(ids(&outcome.proposals), vec![json!(3), json!(4)]);
    }
}
