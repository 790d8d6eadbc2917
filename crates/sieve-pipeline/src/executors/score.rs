use sieve_types::{BlockOutcome, ExecutionContext, Result};

use crate::block::{Block, BlockKind, ScoreCriterion};
use crate::evaluator::evaluate_for;
use crate::executor::{mismatch, BlockExecutor};
use crate::path;
use crate::value::{number_value, to_number};

use super::keyed_value;

/// Writes a numeric score at `scoreField` on a copy of every proposal.
pub struct ScoreExecutor;

/// Raw criterion values for the whole set, min-max normalized when requested
/// and inverted after normalization.
fn criterion_column(criterion: &ScoreCriterion, context: &ExecutionContext) -> Result<Vec<f64>> {
    let mut column = Vec::with_capacity(context.proposals.len());
    for proposal in &context.proposals {
        let raw = keyed_value(
            criterion.field.as_deref(),
            criterion.expression.as_ref(),
            context,
            proposal,
        )?;
        column.push(to_number(&raw));
    }

    if criterion.normalize {
        let min = column.iter().copied().fold(f64::INFINITY, f64::min);
        let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let range = max - min;
        for v in column.iter_mut() {
            *v = if range > 0.0 { (*v - min) / range } else { 0.5 };
        }
    }
    if criterion.invert {
        for v in column.iter_mut() {
            *v = 1.0 - *v;
        }
    }
    Ok(column)
}

impl BlockExecutor for ScoreExecutor {
    fn block_type(&self) -> &str {
        "score"
    }

    fn execute(&self, block: &Block, context: &ExecutionContext) -> Result<BlockOutcome> {
        let BlockKind::Score(score) = &block.kind else {
            return Err(mismatch(self.block_type(), block));
        };

        let scores: Vec<f64> = if let Some(expression) = &score.expression {
            let mut scores = Vec::with_capacity(context.proposals.len());
            for proposal in &context.proposals {
                scores.push(to_number(&evaluate_for(expression, context, proposal)?));
            }
            scores
        } else {
            let mut totals = vec![0.0; context.proposals.len()];
            for criterion in &score.criteria {
                let column = criterion_column(criterion, context)?;
                for (total, value) in totals.iter_mut().zip(column) {
                    *total += criterion.weight * value;
                }
            }
            totals
        };

        let scored = context
            .proposals
            .iter()
            .zip(scores)
            .map(|(proposal, s)| {
                let mut copy = proposal.clone();
                path::assign(&mut copy, &score.score_field, number_value(s));
                copy
            })
            .collect();
        Ok(BlockOutcome::proposals(scored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use sieve_types::Proposal;

    fn scores(block: Value, proposals: Vec<Proposal>) -> Vec<Value> {
        let block: Block = serde_json::from_value(block).unwrap();
        ScoreExecutor
            .execute(&block, &ExecutionContext::new(proposals))
            .unwrap()
            .proposals
            .into_iter()
            .map(|p| p["score"].clone())
            .collect()
    }

    fn votes(values: &[i64]) -> Vec<Proposal> {
        values.iter().map(|v| json!({"votes": v, "age": 10 - v})).collect()
    }

    #[test]
    fn normalizes_min_max_over_the_set() {
        let s = scores(
            json!({"id": "s", "type": "score", "scoreField": "score",
                   "criteria": [{"field": "votes", "weight": 1, "normalize": true}]}),
            votes(&[0, 5, 10]),
        );
        assert_eq!(s, vec![json!(0), json!(0.5), json!(1)]);
    }

    #[test]
    fn single_proposal_normalizes_to_half() {
        let s = scores(
            json!({"id": "s", "type": "score", "scoreField": "score",
                   "criteria": [{"field": "votes", "normalize": true}]}),
            votes(&[42]),
        );
        assert_eq!(s, vec![json!(0.5)]);
    }

    #[test]
    fn weighted_sum_with_inversion() {
        let s = scores(
            json!({"id": "s", "type": "score", "scoreField": "score", "criteria": [
                {"field": "votes", "weight": 2, "normalize": true},
                {"field": "votes", "weight": 1, "normalize": true, "invert": true}
            ]}),
            votes(&[0, 10]),
        );
        assert_eq!(s, vec![json!(1), json!(2)]);
    }

    #[test]
    fn expression_score_and_nested_field() {
        let block: Block = serde_json::from_value(json!({
            "id": "s", "type": "score", "scoreField": "metrics.score",
            "expression": {"operator": "multiply", "operands": [{"field": "votes"}, {"value": 3}]}
        }))
        .unwrap();
        let input = votes(&[2]);
        let ctx = ExecutionContext::new(input.clone());
        let outcome = ScoreExecutor.execute(&block, &ctx).unwrap();
        assert_eq!(outcome.proposals[0]["metrics"]["score"], json!(6));
        assert_eq!(ctx.proposals, input);
    }

    #[test]
    fn no_expression_or_criteria_scores_zero() {
        let s = scores(
            json!({"id": "s", "type": "score", "scoreField": "score"}),
            votes(&[3, 4]),
        );
        assert_eq!(s, vec![json!(0), json!(0)]);
    }
}
