//! Expression evaluator.
//!
//! [`evaluate`] is a pure function of an expression and a [`Scope`]. The only
//! errors it produces are definition errors (such as a malformed `if`); missing
//! data coerces to `null` or `0`, and unsafe regular expressions evaluate to
//! `false`.

use std::collections::BTreeMap;

use serde_json::Value;
use sieve_types::{ExecutionContext, Proposal, Result};

use crate::expression::{ArithmeticOp, CompareOp, Expression};
use crate::functions;
use crate::path;
use crate::regex_guard::safe_regex;
use crate::value::{
    compare_ordered, is_truthy, number_value, strict_equals, to_display_string, to_number,
};

/// What an expression can see: the run context and, during per-item
/// evaluation, the proposal currently being examined.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub context: &'a ExecutionContext,
    pub proposal: Option<&'a Proposal>,
}

impl<'a> Scope<'a> {
    /// Whole-context scope, honouring a proposal already scoped on the context.
    pub fn of(context: &'a ExecutionContext) -> Self {
        Self {
            context,
            proposal: context.proposal.as_ref(),
        }
    }

    pub fn with_proposal(context: &'a ExecutionContext, proposal: &'a Proposal) -> Self {
        Self {
            context,
            proposal: Some(proposal),
        }
    }
}

/// Evaluate against the whole context.
pub fn evaluate_in(expr: &Expression, context: &ExecutionContext) -> Result<Value> {
    evaluate(expr, &Scope::of(context))
}

/// Evaluate with `proposal` scoped as the current record.
pub fn evaluate_for(
    expr: &Expression,
    context: &ExecutionContext,
    proposal: &Proposal,
) -> Result<Value> {
    evaluate(expr, &Scope::with_proposal(context, proposal))
}

pub fn evaluate(expr: &Expression, scope: &Scope<'_>) -> Result<Value> {
    match expr {
        Expression::Field(path) => Ok(resolve_field(path, scope)),
        Expression::Comparison {
            operator,
            left,
            right,
        } => {
            let left = evaluate(left, scope)?;
            let right = evaluate(right, scope)?;
            Ok(Value::Bool(compare(*operator, &left, &right)))
        }
        Expression::And(items) => {
            for item in items {
                if !is_truthy(&evaluate(item, scope)?) {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        Expression::Or(items) => {
            for item in items {
                if is_truthy(&evaluate(item, scope)?) {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Expression::Not(inner) => Ok(Value::Bool(!is_truthy(&evaluate(inner, scope)?))),
        Expression::Arithmetic { operator, operands } => arithmetic(*operator, operands, scope),
        Expression::Call {
            function,
            arguments,
        } => functions::call(*function, arguments, scope),
        Expression::Literal(value) => Ok(value.clone()),
        Expression::Variable(name) => Ok(scope.context.lookup_variable(name)),
    }
}

// ---------------------------------------------------------------------------
// Field access
// ---------------------------------------------------------------------------

fn resolve_field(path: &str, scope: &Scope<'_>) -> Value {
    let Some(proposal) = scope.proposal else {
        return resolve_context_path(scope.context, path);
    };

    match path::lookup(proposal, path) {
        Some(value) if !value.is_null() => value.clone(),
        _ => {
            // Engagement metrics live beside the proposal, not inside it.
            let (head, rest) = path::split_head(path);
            if head != "voteData" {
                return Value::Null;
            }
            match scope.context.votes_for(proposal) {
                Some(votes) => {
                    let votes = serde_json::to_value(votes).unwrap_or(Value::Null);
                    path::get(&votes, rest.unwrap_or(""))
                }
                None => Value::Null,
            }
        }
    }
}

fn resolve_context_path(context: &ExecutionContext, path: &str) -> Value {
    let (head, rest) = path::split_head(path);
    let rest = rest.unwrap_or("");
    match head {
        "proposals" => path::get(&Value::Array(context.proposals.clone()), rest),
        "voteData" => match serde_json::to_value(&context.vote_data) {
            Ok(data) => path::get(&data, rest),
            Err(_) => Value::Null,
        },
        "process" => path::get(&context.process, rest),
        "variables" => named_entry(&context.variables, rest),
        "outputs" => named_entry(&context.outputs, rest),
        _ => Value::Null,
    }
}

fn named_entry(entries: &BTreeMap<String, Value>, path: &str) -> Value {
    if path.is_empty() {
        return serde_json::to_value(entries).unwrap_or(Value::Null);
    }
    let (name, tail) = path::split_head(path);
    entries
        .get(name)
        .map(|v| path::get(v, tail.unwrap_or("")))
        .unwrap_or(Value::Null)
}

// ---------------------------------------------------------------------------
// Comparison and arithmetic
// ---------------------------------------------------------------------------

fn compare(operator: CompareOp, left: &Value, right: &Value) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};

    match operator {
        CompareOp::Equals => strict_equals(left, right),
        CompareOp::NotEquals => !strict_equals(left, right),
        CompareOp::GreaterThan => compare_ordered(left, right) == Some(Greater),
        CompareOp::GreaterThanOrEqual => {
            matches!(compare_ordered(left, right), Some(Greater | Equal))
        }
        CompareOp::LessThan => compare_ordered(left, right) == Some(Less),
        CompareOp::LessThanOrEqual => matches!(compare_ordered(left, right), Some(Less | Equal)),
        CompareOp::In => right
            .as_array()
            .is_some_and(|items| items.iter().any(|item| strict_equals(item, left))),
        CompareOp::NotIn => right
            .as_array()
            .is_some_and(|items| !items.iter().any(|item| strict_equals(item, left))),
        CompareOp::Contains => match (left, right) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|item| strict_equals(item, needle)),
            _ => false,
        },
        CompareOp::StartsWith => match (left, right) {
            (Value::String(s), Value::String(prefix)) => s.starts_with(prefix.as_str()),
            _ => false,
        },
        CompareOp::EndsWith => match (left, right) {
            (Value::String(s), Value::String(suffix)) => s.ends_with(suffix.as_str()),
            _ => false,
        },
        CompareOp::Matches => match right {
            Value::String(pattern) if !left.is_null() => safe_regex(pattern)
                .is_some_and(|re| re.is_match(&to_display_string(left))),
            _ => false,
        },
    }
}

fn arithmetic(operator: ArithmeticOp, operands: &[Expression], scope: &Scope<'_>) -> Result<Value> {
    let mut values = Vec::with_capacity(operands.len());
    for operand in operands {
        values.push(to_number(&evaluate(operand, scope)?));
    }

    let Some((first, rest)) = values.split_first() else {
        return Ok(number_value(0.0));
    };

    let mut acc = *first;
    for &n in rest {
        acc = match operator {
            ArithmeticOp::Add => acc + n,
            ArithmeticOp::Subtract => acc - n,
            ArithmeticOp::Multiply => acc * n,
            ArithmeticOp::Divide if n == 0.0 => return Ok(Value::Null),
            ArithmeticOp::Divide => acc / n,
            ArithmeticOp::Modulo if n == 0.0 => return Ok(Value::Null),
            ArithmeticOp::Modulo => acc % n,
            ArithmeticOp::Power => acc.powf(n),
        };
    }
    Ok(number_value(acc))
}
