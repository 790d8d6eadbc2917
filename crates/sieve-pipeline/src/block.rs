//! Pipeline and block definitions, and their JSON shapes.
//!
//! A [`Pipeline`] is `{ version, blocks, output?, variables? }`. Each [`Block`]
//! carries an `id`, optional `input`/`output` names, and a `type`
//! discriminator selecting one of the [`BlockKind`] variants.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sieve_types::{Result, SieveError};

use crate::expression::Expression;
use crate::value::type_name;

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default = "default_version")]
    pub version: String,
    pub blocks: Vec<Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, Value>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Pipeline {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self {
            version: default_version(),
            blocks,
            output: None,
            variables: BTreeMap::new(),
        }
    }

    /// The pipeline used when a caller supplies none: keep shortlisted proposals.
    pub fn default_selection() -> Self {
        Self::new(vec![Block::new(
            "default_filter",
            BlockKind::Filter(FilterBlock {
                condition: Expression::equals(
                    Expression::field("status"),
                    Expression::literal("shortlisted"),
                ),
            }),
        )])
    }

    pub fn from_json(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: BlockKind,
}

impl Block {
    pub fn new(id: impl Into<String>, kind: BlockKind) -> Self {
        Self {
            id: id.into(),
            input: None,
            output: None,
            description: None,
            kind,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn block_type(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Name under which the engine stores this block's result.
    pub fn output_name(&self) -> String {
        self.output
            .clone()
            .unwrap_or_else(|| format!("block_{}_output", self.id))
    }

    /// Expressions owned directly by this block (nested branch bodies excluded).
    pub fn expressions(&self) -> Vec<&Expression> {
        let mut out = Vec::new();
        match &self.kind {
            BlockKind::Filter(b) => out.push(&b.condition),
            BlockKind::Transform(b) => out.extend(b.transformations.values()),
            BlockKind::Compute(b) => out.extend(b.computations.values()),
            BlockKind::Sort(b) => {
                out.extend(b.sort_by.iter().filter_map(|k| k.expression.as_ref()))
            }
            BlockKind::Limit(b) => {
                for q in [&b.count, &b.offset].into_iter().flatten() {
                    if let Quantity::Computed(e) = q {
                        out.push(e);
                    }
                }
            }
            BlockKind::Group(b) => {
                if let GroupKey::Computed(e) = &b.group_by {
                    out.push(e);
                }
            }
            BlockKind::Score(b) => {
                out.extend(b.expression.iter());
                out.extend(b.criteria.iter().filter_map(|c| c.expression.as_ref()));
            }
            BlockKind::Branch(b) => out.extend(b.branches.iter().map(|c| &c.condition)),
            BlockKind::Merge(_) | BlockKind::Debug(_) => {}
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BlockKind {
    Filter(FilterBlock),
    Transform(TransformBlock),
    Compute(ComputeBlock),
    Sort(SortBlock),
    Limit(LimitBlock),
    Group(GroupBlock),
    Score(ScoreBlock),
    Merge(MergeBlock),
    Debug(DebugBlock),
    Branch(BranchBlock),
}

impl BlockKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            BlockKind::Filter(_) => "filter",
            BlockKind::Transform(_) => "transform",
            BlockKind::Compute(_) => "compute",
            BlockKind::Sort(_) => "sort",
            BlockKind::Limit(_) => "limit",
            BlockKind::Group(_) => "group",
            BlockKind::Score(_) => "score",
            BlockKind::Merge(_) => "merge",
            BlockKind::Debug(_) => "debug",
            BlockKind::Branch(_) => "branch",
        }
    }
}

// ---------------------------------------------------------------------------
// Per-type definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterBlock {
    pub condition: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformBlock {
    /// Dot-path → expression evaluated against the untransformed proposal.
    ///
    /// Writes land in ascending path order, so a parent path is always
    /// written before its children.
    pub transformations: BTreeMap<String, Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeBlock {
    pub computations: BTreeMap<String, Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortBlock {
    pub sort_by: Vec<SortKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<Expression>,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub nulls_first: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<Quantity>,
}

/// A literal number or an expression evaluated once against the whole context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Quantity {
    Fixed(f64),
    Computed(Expression),
}

impl TryFrom<Value> for Quantity {
    type Error = SieveError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Number(n) => Ok(Quantity::Fixed(n.as_f64().unwrap_or(0.0))),
            other => Ok(Quantity::Computed(Expression::try_from(other)?)),
        }
    }
}

impl From<Quantity> for Value {
    fn from(q: Quantity) -> Self {
        match q {
            Quantity::Fixed(n) => crate::value::number_value(n),
            Quantity::Computed(e) => Value::from(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupBlock {
    pub group_by: GroupKey,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregations: Vec<GroupAggregation>,
}

/// A field path (plain string) or a per-proposal expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum GroupKey {
    Field(String),
    Computed(Expression),
}

impl TryFrom<Value> for GroupKey {
    type Error = SieveError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(path) => Ok(GroupKey::Field(path)),
            Value::Object(_) => Ok(GroupKey::Computed(Expression::try_from(value)?)),
            other => Err(SieveError::InvalidExpression(format!(
                "groupBy must be a field path or an expression, got {}",
                type_name(&other)
            ))),
        }
    }
}

impl From<GroupKey> for Value {
    fn from(key: GroupKey) -> Self {
        match key {
            GroupKey::Field(path) => Value::String(path),
            GroupKey::Computed(e) => Value::from(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupAggregation {
    pub name: String,
    pub operation: AggregateOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBlock {
    pub score_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<Expression>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub criteria: Vec<ScoreCriterion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCriterion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<Expression>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub normalize: bool,
    #[serde(default)]
    pub invert: bool,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeBlock {
    pub inputs: Vec<String>,
    #[serde(default)]
    pub strategy: MergeStrategy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    #[default]
    Union,
    Intersection,
    Concat,
    Custom,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Union => "union",
            MergeStrategy::Intersection => "intersection",
            MergeStrategy::Concat => "concat",
            MergeStrategy::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchBlock {
    #[serde(default)]
    pub branches: Vec<BranchCase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<BranchDefault>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchCase {
    pub condition: Expression,
    pub blocks: Vec<Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchDefault {
    pub blocks: Vec<Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_selection_filters_on_status() {
        let pipeline = Pipeline::default_selection();
        assert_eq!(pipeline.blocks.len(), 1);
        let encoded = serde_json::to_value(&pipeline).unwrap();
        assert_eq!(encoded["blocks"][0]["type"], json!("filter"));
        assert_eq!(encoded["blocks"][0]["condition"]["operator"], json!("equals"));
        assert_eq!(encoded["blocks"][0]["condition"]["right"], json!({"value": "shortlisted"}));
    }

    #[test]
    fn parses_every_block_type() {
        let pipeline = Pipeline::from_value(json!({
            "version": "2",
            "variables": {"minVotes": 3},
            "output": "final",
            "blocks": [
                {"id": "f", "type": "filter", "condition": {"field": "active"}},
                {"id": "t", "type": "transform",
                 "transformations": {"metadata.x": {"value": 1}}},
                {"id": "c", "type": "compute",
                 "computations": {
                     "n": {"function": "count", "arguments": [{"field": "proposals"}]}
                 }},
                {"id": "s", "type": "sort",
                 "sortBy": [{"field": "votes", "order": "desc", "nullsFirst": true}]},
                {"id": "l", "type": "limit", "count": 5, "offset": {"variable": "skip"}},
                {"id": "g", "type": "group", "groupBy": "category",
                 "aggregations": [{"name": "n", "operation": "count"}]},
                {"id": "sc", "type": "score", "scoreField": "score",
                 "criteria": [{"field": "votes", "normalize": true}]},
                {"id": "m", "type": "merge", "inputs": ["a", "b"], "strategy": "intersection"},
                {"id": "d", "type": "debug", "fields": ["id"]},
                {"id": "b", "type": "branch", "output": "final",
                 "branches": [{"condition": {"value": true}, "blocks": [], "output": "picked"}],
                 "default": {"blocks": []}}
            ]
        }))
        .unwrap();

        let types: Vec<&str> = pipeline.blocks.iter().map(Block::block_type).collect();
        assert_eq!(
            types,
            vec![
                "filter", "transform", "compute", "sort", "limit", "group", "score", "merge",
                "debug", "branch"
            ]
        );
        assert_eq!(pipeline.version, "2");
        assert_eq!(pipeline.output.as_deref(), Some("final"));

        match &pipeline.blocks[3].kind {
            BlockKind::Sort(sort) => {
                assert_eq!(sort.sort_by[0].order, SortOrder::Desc);
                assert!(sort.sort_by[0].nulls_first);
            }
            other => panic!("expected sort, got {other:?}"),
        }
        match &pipeline.blocks[4].kind {
            BlockKind::Limit(limit) => {
                assert_eq!(limit.count, Some(Quantity::Fixed(5.0)));
                assert!(matches!(limit.offset, Some(Quantity::Computed(_))));
            }
            other => panic!("expected limit, got {other:?}"),
        }
        match &pipeline.blocks[6].kind {
            BlockKind::Score(score) => {
                assert_eq!(score.criteria[0].weight, 1.0);
                assert!(!score.criteria[0].invert);
            }
            other => panic!("expected score, got {other:?}"),
        }
    }

    #[test]
    fn unknown_block_type_fails_to_parse() {
        let err = Pipeline::from_value(json!({
            "blocks": [{"id": "x", "type": "shuffle"}]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("shuffle"), "got: {err}");
    }

    #[test]
    fn unknown_operator_inside_block_is_reported_by_name() {
        let err = Pipeline::from_value(json!({
            "blocks": [{"id": "f", "type": "filter", "condition": {
                "operator": "roughly", "left": {"field": "a"}, "right": {"value": 1}
            }}]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("roughly"), "got: {err}");
    }

    #[test]
    fn output_name_defaults_to_block_id() {
        let block = Block::new("b1", BlockKind::Debug(DebugBlock::default()));
        assert_eq!(block.output_name(), "block_b1_output");
        assert_eq!(block.with_output("named").output_name(), "named");
    }

    #[test]
    fn block_round_trips_through_json() {
        let source = json!({
            "id": "g", "type": "group", "input": "shortlist", "output": "groups",
            "groupBy": {"function": "lower", "arguments": [{"field": "category"}]}
        });
        let block: Block = serde_json::from_value(source.clone()).unwrap();
        assert_eq!(block.input.as_deref(), Some("shortlist"));
        assert_eq!(serde_json::to_value(&block).unwrap(), source);
    }

    #[test]
    fn expressions_lists_direct_expressions() {
        let block: Block = serde_json::from_value(json!({
            "id": "s", "type": "score", "scoreField": "score",
            "expression": {"field": "votes"},
            "criteria": [{"expression": {"value": 1}}, {"field": "likes"}]
        }))
        .unwrap();
        assert_eq!(block.expressions().len(), 2);
    }
}
