//! Coercion and comparison rules for dynamically-typed expression values.
//!
//! Values are plain `serde_json::Value`s. Every lenient conversion the
//! evaluator relies on lives here as an explicit match.

use std::cmp::Ordering;

use serde_json::Value;

/// `null`, `false`, `0`, `NaN` and `""` are falsy; everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// The numeric view of a value, if it is a JSON number.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Lenient numeric coercion: anything that is not a number becomes `0`.
pub fn to_number(value: &Value) -> f64 {
    as_number(value).unwrap_or(0.0)
}

/// Build a JSON number, preferring an integer representation when exact.
///
/// Non-finite results have no JSON form and become `null`.
pub fn number_value(n: f64) -> Value {
    if !n.is_finite() {
        return Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Text key under which strictly-equal values collide: numbers are rendered
/// through [`number_value`] at every depth, so `1` and `1.0` share a key.
pub fn canonical_key(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Number(n) => n.as_f64().map(number_value).unwrap_or_else(|| value.clone()),
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect(),
        ),
        Value::Null | Value::Bool(_) | Value::String(_) => value.clone(),
    }
}

/// Strict equality: numbers by value, containers structurally, no cross-type coercion.
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| strict_equals(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| strict_equals(x, y)))
        }
        _ => a == b,
    }
}

/// Ordering for comparison operators. Only defined between two numbers,
/// two strings, or two booleans.
pub fn compare_ordered(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Total order over non-null values used by sorting.
///
/// Values of different types order by type name so mixed columns still sort
/// deterministically. Containers fall back to their canonical JSON text.
pub fn compare_for_sort(a: &Value, b: &Value) -> Ordering {
    let (ta, tb) = (type_name(a), type_name(b));
    if ta != tb {
        return ta.cmp(tb);
    }
    match (a, b) {
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            a.to_string().cmp(&b.to_string())
        }
        _ => compare_ordered(a, b).unwrap_or(Ordering::Equal),
    }
}

/// Text form used by string functions: strings verbatim, `null` as empty,
/// numbers without a trailing `.0`, containers as JSON.
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) => match number_value(f) {
                Value::Number(n) => n.to_string(),
                _ => f.to_string(),
            },
            None => n.to_string(),
        },
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(0.0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!("0")));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));
        assert!(is_truthy(&json!(-1)));
    }

    #[test]
    fn number_value_prefers_integers() {
        assert_eq!(number_value(3.0), json!(3));
        assert_eq!(number_value(-2.0), json!(-2));
        assert_eq!(number_value(0.5), json!(0.5));
        assert_eq!(number_value(f64::INFINITY), Value::Null);
        assert_eq!(number_value(f64::NAN), Value::Null);
    }

    #[test]
    fn strict_equality_compares_numbers_by_value() {
        assert!(strict_equals(&json!(1), &json!(1.0)));
        assert!(!strict_equals(&json!(1), &json!("1")));
        assert!(!strict_equals(&json!(null), &json!(0)));
        assert!(strict_equals(&json!({"a": [1, 2]}), &json!({"a": [1.0, 2]})));
    }

    #[test]
    fn canonical_keys_agree_with_strict_equality() {
        assert_eq!(canonical_key(&json!(1)), canonical_key(&json!(1.0)));
        assert_eq!(
            canonical_key(&json!({"a": [2.0, {"b": 3}]})),
            canonical_key(&json!({"a": [2, {"b": 3.0}]}))
        );
        assert_ne!(canonical_key(&json!(1)), canonical_key(&json!("1")));
        assert_ne!(canonical_key(&json!(1.5)), canonical_key(&json!(1)));
    }

    #[test]
    fn ordering_is_undefined_across_types() {
        assert_eq!(compare_ordered(&json!(2), &json!(10)), Some(Ordering::Less));
        assert_eq!(compare_ordered(&json!("b"), &json!("a")), Some(Ordering::Greater));
        assert_eq!(compare_ordered(&json!(2), &json!("10")), None);
        assert_eq!(compare_ordered(&json!(null), &json!(0)), None);
    }

    #[test]
    fn mixed_types_sort_by_type_name() {
        // "number" < "string"
        assert_eq!(compare_for_sort(&json!(99), &json!("a")), Ordering::Less);
        // "boolean" < "number"
        assert_eq!(compare_for_sort(&json!(true), &json!(1)), Ordering::Less);
    }

    #[test]
    fn display_strings() {
        assert_eq!(to_display_string(&json!(3.0)), "3");
        assert_eq!(to_display_string(&json!(2.5)), "2.5");
        assert_eq!(to_display_string(&json!(null)), "");
        assert_eq!(to_display_string(&json!(true)), "true");
        assert_eq!(to_display_string(&json!([1])), "[1]");
    }
}
