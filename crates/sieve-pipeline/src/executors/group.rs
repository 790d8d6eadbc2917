use std::collections::hash_map::Entry;
use std::collections::HashMap;

use serde_json::{json, Map, Value};
use sieve_types::{BlockOutcome, ExecutionContext, Proposal, Result};

use crate::block::{AggregateOp, Block, BlockKind, GroupAggregation, GroupKey};
use crate::executor::{mismatch, BlockExecutor};
use crate::value::{as_number, canonical_key, number_value, to_number};

use super::keyed_value;

/// Partitions proposals into `[{ key, count, proposals, aggregations }]`.
///
/// The grouped view goes to the block's output; the proposal set itself passes
/// through unchanged.
pub struct GroupExecutor;

struct Bucket<'a> {
    key: Value,
    members: Vec<&'a Proposal>,
}

fn aggregate(
    aggregation: &GroupAggregation,
    members: &[&Proposal],
    context: &ExecutionContext,
) -> Result<Value> {
    if aggregation.operation == AggregateOp::Count {
        return Ok(Value::from(members.len()));
    }
    let Some(field) = aggregation.field.as_deref() else {
        return Ok(Value::Null);
    };

    let mut values = Vec::with_capacity(members.len());
    for proposal in members {
        values.push(keyed_value(Some(field), None, context, proposal)?);
    }

    let numbers = || values.iter().filter_map(as_number);
    Ok(match aggregation.operation {
        AggregateOp::Count => Value::from(members.len()),
        AggregateOp::Sum => number_value(values.iter().map(to_number).sum()),
        AggregateOp::Avg if values.is_empty() => Value::Null,
        AggregateOp::Avg => {
            number_value(values.iter().map(to_number).sum::<f64>() / values.len() as f64)
        }
        AggregateOp::Min => numbers().reduce(f64::min).map(number_value).unwrap_or(Value::Null),
        AggregateOp::Max => numbers().reduce(f64::max).map(number_value).unwrap_or(Value::Null),
    })
}

impl BlockExecutor for GroupExecutor {
    fn block_type(&self) -> &str {
        "group"
    }

    fn execute(&self, block: &Block, context: &ExecutionContext) -> Result<BlockOutcome> {
        let BlockKind::Group(group) = &block.kind else {
            return Err(mismatch(self.block_type(), block));
        };

        let mut buckets: Vec<Bucket<'_>> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for proposal in &context.proposals {
            let key = match &group.group_by {
                GroupKey::Field(path) => keyed_value(Some(path.as_str()), None, context, proposal)?,
                GroupKey::Computed(e) => keyed_value(None, Some(e), context, proposal)?,
            };
            // `1` and `1.0` share a group; `1` and `"1"` do not.
            match index.entry(canonical_key(&key)) {
                Entry::Occupied(slot) => buckets[*slot.get()].members.push(proposal),
                Entry::Vacant(slot) => {
                    slot.insert(buckets.len());
                    buckets.push(Bucket {
                        key,
                        members: vec![proposal],
                    });
                }
            }
        }

        let mut groups = Vec::with_capacity(buckets.len());
        for bucket in &buckets {
            let mut aggregations = Map::new();
            for aggregation in &group.aggregations {
                aggregations.insert(
                    aggregation.name.clone(),
                    aggregate(aggregation, &bucket.members, context)?,
                );
            }
            groups.push(json!({
                "key": bucket.key,
                "count": bucket.members.len(),
                "proposals": bucket.members,
                "aggregations": aggregations,
            }));
        }

        tracing::debug!(block = %block.id, groups = groups.len(), "Grouped proposals");
        Ok(BlockOutcome::proposals(context.proposals.clone()).with_output(Value::Array(groups)))
    }
}
