//! Built-in function library for `{ "function": ..., "arguments": [...] }` nodes.

use serde_json::Value;
use sieve_types::{Result, SieveError};

use crate::evaluator::{evaluate, Scope};
use crate::expression::{Expression, Function};
use crate::path;
use crate::value::{as_number, is_truthy, number_value, to_display_string, to_number};

pub(crate) fn call(
    function: Function,
    arguments: &[Expression],
    scope: &Scope<'_>,
) -> Result<Value> {
    // Control functions evaluate their arguments lazily.
    match function {
        Function::If => {
            let [condition, then, otherwise] = arguments else {
                return Err(SieveError::InvalidArguments {
                    function: function.as_str().into(),
                    message: format!("expected exactly 3 arguments, got {}", arguments.len()),
                });
            };
            let taken = if is_truthy(&evaluate(condition, scope)?) {
                then
            } else {
                otherwise
            };
            return evaluate(taken, scope);
        }
        Function::Coalesce => {
            for argument in arguments {
                let value = evaluate(argument, scope)?;
                if !value.is_null() {
                    return Ok(value);
                }
            }
            return Ok(Value::Null);
        }
        _ => {}
    }

    let mut values = Vec::with_capacity(arguments.len());
    for argument in arguments {
        values.push(evaluate(argument, scope)?);
    }
    let first = values.first().cloned().unwrap_or(Value::Null);

    let result = match function {
        Function::Sum => {
            let items = aggregate_inputs(values);
            number_value(items.iter().map(to_number).sum())
        }
        Function::Avg => {
            let items = aggregate_inputs(values);
            if items.is_empty() {
                Value::Null
            } else {
                number_value(items.iter().map(to_number).sum::<f64>() / items.len() as f64)
            }
        }
        Function::Count => Value::from(aggregate_inputs(values).len()),
        Function::Min => extreme(aggregate_inputs(values), f64::min),
        Function::Max => extreme(aggregate_inputs(values), f64::max),
        Function::Concat => Value::String(values.iter().map(to_display_string).collect()),
        Function::Length => match &first {
            Value::String(s) => Value::from(s.chars().count()),
            Value::Array(items) => Value::from(items.len()),
            _ => Value::from(0),
        },
        Function::Abs => number_value(to_number(&first).abs()),
        Function::Round => number_value((to_number(&first) + 0.5).floor()),
        Function::Floor => number_value(to_number(&first).floor()),
        Function::Ceil => number_value(to_number(&first).ceil()),
        Function::Lower => map_text(&first, |s| s.to_lowercase()),
        Function::Upper => map_text(&first, |s| s.to_uppercase()),
        Function::Trim => map_text(&first, |s| s.trim().to_string()),
        Function::If | Function::Coalesce => Value::Null,
    };
    Ok(result)
}

/// Flatten aggregate arguments one level.
///
/// `f(array, "path")` plucks `path` from every element of `array` instead.
fn aggregate_inputs(values: Vec<Value>) -> Vec<Value> {
    if let [Value::Array(items), Value::String(pluck)] = values.as_slice() {
        return items.iter().map(|item| path::get(item, pluck)).collect();
    }
    values
        .into_iter()
        .flat_map(|v| match v {
            Value::Array(items) => items,
            other => vec![other],
        })
        .collect()
}

fn extreme(items: Vec<Value>, pick: fn(f64, f64) -> f64) -> Value {
    items
        .iter()
        .filter_map(as_number)
        .reduce(pick)
        .map(number_value)
        .unwrap_or(Value::Null)
}

fn map_text(value: &Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::Null => Value::Null,
        other => Value::String(f(&to_display_string(other))),
    }
}
