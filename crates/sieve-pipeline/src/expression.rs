//! Expression tree: the seven node shapes and their JSON encoding.
//!
//! Expressions arrive as JSON objects and are classified structurally by the
//! keys they carry, checked in this order:
//!
//! ```text
//! field                        -> Field
//! operator + left + right      -> Comparison
//! and | or | not               -> Logical
//! operator + operands          -> Arithmetic
//! function (+ arguments)       -> Call
//! value                        -> Literal
//! variable                     -> Variable
//! ```
//!
//! `operator` alone is ambiguous between comparison and arithmetic, so the
//! presence of `left`/`right` is checked before `operands`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sieve_types::{Result, SieveError};

use crate::value::type_name;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Expression {
    /// Dot-path lookup into the scoped proposal (or the context).
    Field(String),
    Comparison {
        operator: CompareOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
    Arithmetic {
        operator: ArithmeticOp,
        operands: Vec<Expression>,
    },
    Call {
        function: Function,
        arguments: Vec<Expression>,
    },
    Literal(Value),
    /// Pipeline variable or named output; a leading `$` is optional.
    Variable(String),
}

impl Expression {
    pub fn field(path: impl Into<String>) -> Self {
        Expression::Field(path.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Expression::Variable(name.into())
    }

    pub fn compare(operator: CompareOp, left: Expression, right: Expression) -> Self {
        Expression::Comparison {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn equals(left: Expression, right: Expression) -> Self {
        Self::compare(CompareOp::Equals, left, right)
    }

    pub fn arithmetic(operator: ArithmeticOp, operands: Vec<Expression>) -> Self {
        Expression::Arithmetic { operator, operands }
    }

    pub fn call(function: Function, arguments: Vec<Expression>) -> Self {
        Expression::Call {
            function,
            arguments,
        }
    }

    /// Visit this node and every sub-expression, depth first.
    pub fn visit(&self, f: &mut dyn FnMut(&Expression)) {
        f(self);
        match self {
            Expression::Comparison { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            Expression::And(items) | Expression::Or(items) => {
                items.iter().for_each(|e| e.visit(f));
            }
            Expression::Not(inner) => inner.visit(f),
            Expression::Arithmetic { operands, .. } => operands.iter().for_each(|e| e.visit(f)),
            Expression::Call { arguments, .. } => arguments.iter().for_each(|e| e.visit(f)),
            Expression::Field(_) | Expression::Literal(_) | Expression::Variable(_) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Operators and functions
// ---------------------------------------------------------------------------

/// Generates a string-named enum with `as_str` and a `FromStr` that reports
/// unknown names through the given error constructor.
macro_rules! named_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $err:expr, {
            $( $variant:ident => $canonical:literal $(| $alias:literal)* ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant ),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $canonical ),+
                }
            }
        }

        impl FromStr for $name {
            type Err = SieveError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $( $canonical $(| $alias)* => Ok($name::$variant), )+
                    other => Err($err(other.to_string())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

fn unknown_operator(operator: String) -> SieveError {
    SieveError::UnknownOperator { operator }
}

fn unknown_function(function: String) -> SieveError {
    SieveError::UnknownFunction { function }
}

named_enum!(
    /// Comparison operators: equality, ordering, set membership, and string tests.
    CompareOp, unknown_operator, {
        Equals => "equals" | "eq",
        NotEquals => "notEquals" | "neq",
        GreaterThan => "greaterThan" | "gt",
        GreaterThanOrEqual => "greaterThanOrEqual" | "gte",
        LessThan => "lessThan" | "lt",
        LessThanOrEqual => "lessThanOrEqual" | "lte",
        In => "in",
        NotIn => "notIn",
        Contains => "contains",
        StartsWith => "startsWith",
        EndsWith => "endsWith",
        Matches => "matches",
    }
);

named_enum!(
    ArithmeticOp, unknown_operator, {
        Add => "add",
        Subtract => "subtract",
        Multiply => "multiply",
        Divide => "divide",
        Modulo => "modulo",
        Power => "power",
    }
);

named_enum!(
    /// Built-in function library.
    Function, unknown_function, {
        Sum => "sum",
        Avg => "avg" | "average",
        Count => "count",
        Min => "min",
        Max => "max",
        If => "if",
        Coalesce => "coalesce",
        Concat => "concat",
        Length => "length",
        Abs => "abs",
        Round => "round",
        Floor => "floor",
        Ceil => "ceil",
        Lower => "lower" | "lowercase",
        Upper => "upper" | "uppercase",
        Trim => "trim",
    }
);

// ---------------------------------------------------------------------------
// JSON decoding
// ---------------------------------------------------------------------------

impl TryFrom<Value> for Expression {
    type Error = SieveError;

    fn try_from(value: Value) -> Result<Self> {
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Err(SieveError::InvalidExpression(format!(
                    "expected an object, got {}",
                    type_name(&other)
                )))
            }
        };

        if let Some(field) = map.remove("field") {
            return Ok(Expression::Field(expect_string(field, "field")?));
        }

        if map.contains_key("operator") && map.contains_key("left") && map.contains_key("right")
        {
            let operator = take_string(&mut map, "operator")?.parse()?;
            let left = take_expression(&mut map, "left")?;
            let right = take_expression(&mut map, "right")?;
            return Ok(Expression::Comparison {
                operator,
                left: Box::new(left),
                right: Box::new(right),
            });
        }

        if let Some(items) = map.remove("and") {
            return Ok(Expression::And(parse_list(items, "and")?));
        }
        if let Some(items) = map.remove("or") {
            return Ok(Expression::Or(parse_list(items, "or")?));
        }
        if let Some(inner) = map.remove("not") {
            return Ok(Expression::Not(Box::new(Expression::try_from(inner)?)));
        }

        if map.contains_key("operator") && map.contains_key("operands") {
            let operator = take_string(&mut map, "operator")?.parse()?;
            let operands = parse_list(map.remove("operands").unwrap_or(Value::Null), "operands")?;
            return Ok(Expression::Arithmetic { operator, operands });
        }

        if map.contains_key("function") {
            let function = take_string(&mut map, "function")?.parse()?;
            let arguments = match map.remove("arguments") {
                Some(args) => parse_list(args, "arguments")?,
                None => Vec::new(),
            };
            return Ok(Expression::Call {
                function,
                arguments,
            });
        }

        if let Some(value) = map.remove("value") {
            return Ok(Expression::Literal(value));
        }

        if let Some(name) = map.remove("variable") {
            return Ok(Expression::Variable(expect_string(name, "variable")?));
        }

        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        Err(SieveError::InvalidExpression(format!(
            "unrecognised expression shape with keys [{}]",
            keys.join(", ")
        )))
    }
}

fn expect_string(value: Value, key: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(SieveError::InvalidExpression(format!(
            "'{key}' must be a string, got {}",
            type_name(&other)
        ))),
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Result<String> {
    expect_string(map.remove(key).unwrap_or(Value::Null), key)
}

fn take_expression(map: &mut Map<String, Value>, key: &str) -> Result<Expression> {
    Expression::try_from(map.remove(key).unwrap_or(Value::Null))
}

fn parse_list(value: Value, key: &str) -> Result<Vec<Expression>> {
    match value {
        Value::Array(items) => items.into_iter().map(Expression::try_from).collect(),
        other => Err(SieveError::InvalidExpression(format!(
            "'{key}' must be an array, got {}",
            type_name(&other)
        ))),
    }
}

// ---------------------------------------------------------------------------
// JSON encoding
// ---------------------------------------------------------------------------

impl From<Expression> for Value {
    fn from(expr: Expression) -> Self {
        match expr {
            Expression::Field(path) => json!({ "field": path }),
            Expression::Comparison {
                operator,
                left,
                right,
            } => json!({
                "operator": operator.as_str(),
                "left": Value::from(*left),
                "right": Value::from(*right),
            }),
            Expression::And(items) => json!({ "and": encode_list(items) }),
            Expression::Or(items) => json!({ "or": encode_list(items) }),
            Expression::Not(inner) => json!({ "not": Value::from(*inner) }),
            Expression::Arithmetic { operator, operands } => json!({
                "operator": operator.as_str(),
                "operands": encode_list(operands),
            }),
            Expression::Call {
                function,
                arguments,
            } => json!({
                "function": function.as_str(),
                "arguments": encode_list(arguments),
            }),
            Expression::Literal(value) => json!({ "value": value }),
            Expression::Variable(name) => json!({ "variable": name }),
        }
    }
}

fn encode_list(items: Vec<Expression>) -> Value {
    Value::Array(items.into_iter().map(Value::from).collect())
}
