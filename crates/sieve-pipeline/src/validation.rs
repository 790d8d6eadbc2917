//! Pipeline validation: lint rules and diagnostics.
//!
//! Provides 8 built-in rules that check a [`Pipeline`] definition before it
//! runs, descending into branch bodies. Call [`validate`] for advisory
//! diagnostics or [`validate_or_raise`] to fail on `Error`-severity issues.
//! The engine never calls these itself.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use sieve_types::{Result, SieveError};

use crate::block::{Block, BlockKind, MergeStrategy, Pipeline};
use crate::engine::DEFAULT_INPUT;
use crate::expression::{CompareOp, Expression, Function};
use crate::regex_guard::is_safe_pattern;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub block_id: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Traversal helpers
// ---------------------------------------------------------------------------

/// Every block in the pipeline, branch bodies included, in definition order.
fn all_blocks(blocks: &[Block]) -> Vec<&Block> {
    let mut out = Vec::new();
    for block in blocks {
        out.push(block);
        if let BlockKind::Branch(branch) = &block.kind {
            for case in &branch.branches {
                out.extend(all_blocks(&case.blocks));
            }
            if let Some(default) = &branch.default {
                out.extend(all_blocks(&default.blocks));
            }
        }
    }
    out
}

/// Visit each block with the set of output names written before it runs.
///
/// Branch bodies see everything their parent saw; after a branch, its named
/// case outputs become visible to later siblings.
fn walk_scoped<'a>(
    blocks: &'a [Block],
    available: &mut HashSet<String>,
    f: &mut dyn FnMut(&'a Block, &HashSet<String>),
) {
    for block in blocks {
        f(block, &*available);
        if let BlockKind::Branch(branch) = &block.kind {
            let bodies = branch
                .branches
                .iter()
                .map(|c| (&c.blocks, &c.output))
                .chain(branch.default.iter().map(|d| (&d.blocks, &d.output)));
            for (body, output) in bodies {
                let mut inner = available.clone();
                walk_scoped(body, &mut inner, f);
                if let Some(name) = output {
                    available.insert(name.clone());
                }
            }
        }
        available.insert(block.output_name());
    }
}

fn each_expression(block: &Block, f: &mut dyn FnMut(&Expression)) {
    for expression in block.expressions() {
        expression.visit(f);
    }
}

fn diagnostic(
    rule: &dyn LintRule,
    severity: Severity,
    block: Option<&Block>,
    message: String,
) -> Diagnostic {
    Diagnostic {
        rule: rule.name().into(),
        severity,
        message,
        block_id: block.map(|b| b.id.clone()),
        fix: None,
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct NonEmptyRule;
impl LintRule for NonEmptyRule {
    fn name(&self) -> &str { "non_empty" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        if !pipeline.blocks.is_empty() {
            return vec![];
        }
        let mut d = diagnostic(
            self,
            Severity::Warning,
            None,
            "Pipeline has no blocks; proposals pass through unchanged".into(),
        );
        d.fix = Some("Add at least one block, e.g. a filter".into());
        vec![d]
    }
}

struct UniqueBlockIdsRule;
impl LintRule for UniqueBlockIdsRule {
    fn name(&self) -> &str { "unique_block_ids" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for block in all_blocks(&pipeline.blocks) {
            *counts.entry(block.id.as_str()).or_default() += 1;
        }
        let mut diags = Vec::new();
        let mut reported = HashSet::new();
        for block in all_blocks(&pipeline.blocks) {
            let n = counts[block.id.as_str()];
            if n > 1 && reported.insert(block.id.as_str()) {
                let mut d = diagnostic(
                    self,
                    Severity::Error,
                    Some(block),
                    format!("Block id '{}' is used {} times", block.id, n),
                );
                d.fix = Some("Give every block a unique id".into());
                diags.push(d);
            }
        }
        diags
    }
}

struct InputReferencesRule;
impl LintRule for InputReferencesRule {
    fn name(&self) -> &str { "input_references" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        let mut available = HashSet::new();
        walk_scoped(&pipeline.blocks, &mut available, &mut |block, seen| {
            let Some(input) = &block.input else { return };
            if input != DEFAULT_INPUT && !seen.contains(input) {
                diags.push(diagnostic(
                    self,
                    Severity::Warning,
                    Some(block),
                    format!(
                        "Block '{}' reads '{}', which no earlier block produces; \
                         it will fall back to the current proposals",
                        block.id, input
                    ),
                ));
            }
        });

        // `available` now holds every name the top-level run can write.
        if let Some(output) = &pipeline.output {
            if !available.contains(output) {
                diags.push(diagnostic(
                    self,
                    Severity::Warning,
                    None,
                    format!("Pipeline output '{}' is never written by any block", output),
                ));
            }
        }
        diags
    }
}

struct MergeInputsRule;
impl LintRule for MergeInputsRule {
    fn name(&self) -> &str { "merge_inputs" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        let mut available = HashSet::new();
        walk_scoped(&pipeline.blocks, &mut available, &mut |block, seen| {
            let BlockKind::Merge(merge) = &block.kind else { return };
            if merge.inputs.is_empty() {
                diags.push(diagnostic(
                    self,
                    Severity::Warning,
                    Some(block),
                    format!("Merge block '{}' has no inputs and always yields nothing", block.id),
                ));
            }
            for input in merge.inputs.iter().filter(|i| !seen.contains(*i)) {
                diags.push(diagnostic(
                    self,
                    Severity::Warning,
                    Some(block),
                    format!(
                        "Merge block '{}' reads '{}', which no earlier block produces",
                        block.id, input
                    ),
                ));
            }
        });
        diags
    }
}

struct MergeStrategyRule;
impl LintRule for MergeStrategyRule {
    fn name(&self) -> &str { "merge_strategy" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        all_blocks(&pipeline.blocks)
            .into_iter()
            .filter_map(|block| match &block.kind {
                BlockKind::Merge(m) if m.strategy == MergeStrategy::Custom => {
                    let mut d = diagnostic(
                        self,
                        Severity::Error,
                        Some(block),
                        format!(
                            "Merge block '{}' uses the unsupported 'custom' strategy",
                            block.id
                        ),
                    );
                    d.fix = Some("Use 'union', 'intersection' or 'concat'".into());
                    Some(d)
                }
                _ => None,
            })
            .collect()
    }
}

struct RegexSafetyRule;
impl LintRule for RegexSafetyRule {
    fn name(&self) -> &str { "regex_safety" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for block in all_blocks(&pipeline.blocks) {
            each_expression(block, &mut |e| {
                let Expression::Comparison {
                    operator: CompareOp::Matches,
                    right,
                    ..
                } = e
                else {
                    return;
                };
                let Expression::Literal(Value::String(pattern)) = right.as_ref() else {
                    return;
                };
                let problem = if !is_safe_pattern(pattern) {
                    Some("is rejected as potentially catastrophic")
                } else if regex::Regex::new(pattern).is_err() {
                    Some("does not compile")
                } else {
                    None
                };
                if let Some(problem) = problem {
                    diags.push(diagnostic(
                        self,
                        Severity::Warning,
                        Some(block),
                        format!(
                            "Pattern '{}' {}; the match will always be false",
                            pattern, problem
                        ),
                    ));
                }
            });
        }
        diags
    }
}

struct IfArityRule;
impl LintRule for IfArityRule {
    fn name(&self) -> &str { "if_arity" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for block in all_blocks(&pipeline.blocks) {
            each_expression(block, &mut |e| {
                if let Expression::Call {
                    function: Function::If,
                    arguments,
                } = e
                {
                    if arguments.len() != 3 {
                        let mut d = diagnostic(
                            self,
                            Severity::Error,
                            Some(block),
                            format!("'if' takes 3 arguments, found {}", arguments.len()),
                        );
                        d.fix = Some("Use [condition, then, else]".into());
                        diags.push(d);
                    }
                }
            });
        }
        diags
    }
}

struct BranchCasesRule;
impl LintRule for BranchCasesRule {
    fn name(&self) -> &str { "branch_cases" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        all_blocks(&pipeline.blocks)
            .into_iter()
            .filter_map(|block| match &block.kind {
                BlockKind::Branch(b) if b.branches.is_empty() && b.default.is_none() => {
                    Some(diagnostic(
                        self,
                        Severity::Warning,
                        Some(block),
                        format!("Branch block '{}' has no cases and no default", block.id),
                    ))
                }
                _ => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

fn built_in_rules() -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(NonEmptyRule),
        Box::new(UniqueBlockIdsRule),
        Box::new(InputReferencesRule),
        Box::new(MergeInputsRule),
        Box::new(MergeStrategyRule),
        Box::new(RegexSafetyRule),
        Box::new(IfArityRule),
        Box::new(BranchCasesRule),
    ]
}

/// Run all built-in lint rules and return every diagnostic.
pub fn validate(pipeline: &Pipeline) -> Vec<Diagnostic> {
    built_in_rules()
        .iter()
        .flat_map(|rule| rule.apply(pipeline))
        .collect()
}

/// Run validation and fail if any `Error`-severity diagnostics are found.
pub fn validate_or_raise(pipeline: &Pipeline) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(pipeline);
    let errors: Vec<&Diagnostic> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    if errors.is_empty() {
        return Ok(diagnostics);
    }
    let messages: Vec<String> = errors
        .iter()
        .map(|d| format!("[{}] {}", d.rule, d.message))
        .collect();
    Err(SieveError::ValidationError(messages.join("; ")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pipeline(value: Value) -> Pipeline {
        Pipeline::from_value(value).unwrap()
    }

    fn rules_hit(p: &Pipeline) -> Vec<String> {
        validate(p).into_iter().map(|d| d.rule).collect()
    }

    #[test]
    fn default_pipeline_is_clean() {
        assert!(validate(&Pipeline::default_selection()).is_empty());
    }

    #[test]
    fn empty_pipeline_warns() {
        let diags = validate(&Pipeline::new(vec![]));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].rule, "non_empty");
        assert_eq!(diags[0].severity, Severity::Warning);
        assert!(validate_or_raise(&Pipeline::new(vec![])).is_ok());
    }

    #[test]
    fn duplicate_ids_are_errors_even_inside_branches() {
        let p = pipeline(json!({"blocks": [
            {"id": "a", "type": "limit", "count": 1},
            {"id": "route", "type": "branch", "branches": [
                {"condition": {"value": true}, "blocks": [{"id": "a", "type": "limit", "count": 2}]}
            ]}
        ]}));
        let diags = validate(&p);
        let dup: Vec<_> = diags.iter().filter(|d| d.rule == "unique_block_ids").collect();
        assert_eq!(dup.len(), 1);
        assert_eq!(dup[0].block_id.as_deref(), Some("a"));
        assert!(matches!(validate_or_raise(&p), Err(SieveError::ValidationError(_))));
    }

    #[test]
    fn input_references_must_be_produced_earlier() {
        let p = pipeline(json!({"blocks": [
            {"id": "late", "type": "limit", "count": 1, "input": "ranked"},
            {"id": "rank", "type": "sort", "sortBy": [{"field": "votes"}], "output": "ranked"},
            {"id": "ok", "type": "limit", "count": 1, "input": "ranked"},
            {"id": "trim", "type": "limit", "count": 3},
            {"id": "auto", "type": "limit", "count": 1, "input": "block_trim_output"},
            // A declared output replaces the generated name.
            {"id": "shadow", "type": "limit", "count": 1, "input": "block_rank_output"},
            {"id": "root", "type": "limit", "count": 1, "input": "proposals"}
        ]}));
        let flagged: Vec<String> = validate(&p)
            .into_iter()
            .filter(|d| d.rule == "input_references")
            .filter_map(|d| d.block_id)
            .collect();
        assert_eq!(flagged, vec!["late", "shadow"]);
    }

    #[test]
    fn branch_outputs_are_visible_after_the_branch() {
        let p = pipeline(json!({"blocks": [
            {"id": "route", "type": "branch", "branches": [
                {"condition": {"value": true},
                 "blocks": [{"id": "x", "type": "limit", "count": 1}],
                 "output": "picked"}
            ]},
            {"id": "m", "type": "merge", "inputs": ["picked"]}
        ]}));
        assert!(rules_hit(&p).is_empty());
    }

    #[test]
    fn merge_rules() {
        let p = pipeline(json!({"blocks": [
            {"id": "m1", "type": "merge", "inputs": []},
            {"id": "m2", "type": "merge", "inputs": ["ghost"], "strategy": "custom"}
        ]}));
        let hit = rules_hit(&p);
        assert_eq!(hit.iter().filter(|r| *r == "merge_inputs").count(), 2);
        assert!(hit.contains(&"merge_strategy".to_string()));
    }

    #[test]
    fn unsafe_and_invalid_patterns_warn() {
        let p = pipeline(json!({"blocks": [
            {"id": "f1", "type": "filter", "condition": {
                "operator": "matches", "left": {"field": "title"}, "right": {"value": "(a+)+$"}
            }},
            {"id": "f2", "type": "filter", "condition": {
                "operator": "matches", "left": {"field": "title"}, "right": {"value": "[unclosed"}
            }},
            {"id": "f3", "type": "filter", "condition": {
                "operator": "matches", "left": {"field": "title"}, "right": {"value": "^park"}
            }}
        ]}));
        let flagged: Vec<_> = validate(&p)
            .into_iter()
            .filter(|d| d.rule == "regex_safety")
            .filter_map(|d| d.block_id)
            .collect();
        assert_eq!(flagged, vec!["f1", "f2"]);
    }

    #[test]
    fn if_arity_is_checked_in_nested_expressions() {
        let p = pipeline(json!({"blocks": [
            {"id": "t", "type": "transform", "transformations": {
                "label": {"function": "concat", "arguments": [
                    {"function": "if", "arguments": [{"value": true}, {"value": "x"}]}
                ]}
            }}
        ]}));
        let diags = validate(&p);
        assert!(diags.iter().any(|d| d.rule == "if_arity" && d.severity == Severity::Error));
    }

    #[test]
    fn empty_branch_warns() {
        let p = pipeline(json!({"blocks": [{"id": "b", "type": "branch", "branches": []}]}));
        assert_eq!(rules_hit(&p), vec!["branch_cases"]);
    }

    #[test]
    fn unknown_pipeline_output_warns() {
        let p = pipeline(json!({
            "output": "nowhere",
            "blocks": [{"id": "a", "type": "limit", "count": 1}]
        }));
        assert_eq!(rules_hit(&p), vec!["input_references"]);
    }
}
