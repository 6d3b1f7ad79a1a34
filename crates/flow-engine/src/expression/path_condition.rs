//! Path/Condition Evaluator (spec §4.A).
//!
//! Stateless; safe for concurrent use. The grammar is intentionally small:
//! literals, `$.dotted.paths` or bare identifiers, and the six comparison
//! operators, checked longest-first so `>=`/`<=` never collide with `>`/`<`.

use super::ExpressionError;
use serde_json::Value;

/// Operators in the order they must be probed to avoid `>=`/`<=` being
/// mistaken for `>`/`<` (longest match wins).
const OPERATORS: &[&str] = &["==", "!=", ">=", "<=", ">", "<"];

/// Resolve a literal or dotted path against a JSON value.
///
/// - `"true"` / `"false"` → boolean, `"null"` → nil, a parseable number →
///   float, a single/double-quoted string → string.
/// - `$.a.b.c` or a bare identifier → dotted traversal over nested objects.
pub fn resolve(expr: &str, data: &Value) -> Result<Value, ExpressionError> {
    let trimmed = expr.trim();

    match trimmed {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" => return Ok(Value::Null),
        _ => {}
    }

    if let Ok(n) = trimmed.parse::<f64>() {
        return Ok(serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null));
    }

    if (trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2)
        || (trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2)
    {
        return Ok(Value::String(trimmed[1..trimmed.len() - 1].to_string()));
    }

    let path = trimmed.strip_prefix("$.").unwrap_or(trimmed);
    resolve_path(path, data)
}

fn resolve_path(path: &str, data: &Value) -> Result<Value, ExpressionError> {
    let mut current = data;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        match current {
            Value::Object(map) => {
                current = map
                    .get(segment)
                    .ok_or_else(|| ExpressionError::FieldNotFound(path.to_string()))?;
            }
            _ => return Err(ExpressionError::NotAnObject(path.to_string())),
        }
    }
    Ok(current.clone())
}

/// Truthiness rules for a bare (non-comparison) expression's resolved value.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Evaluate a condition expression against a JSON value, per spec §4.A/§6.
///
/// `""` or `"true"` ⇒ true, `"false"` ⇒ false, `<L><op><R>` is split on the
/// first operator occurrence (checked longest-first), both sides resolved
/// and compared; a bare `<L>` evaluates truthiness. Missing fields on a bare
/// expression evaluate to `false` without error; missing fields on either
/// side of a comparator produce nil (nil==nil, nil < anything else).
///
/// Any other evaluation failure (a path traversing through a non-object) is
/// swallowed to `false` here — this is the edge-routing entry point, and
/// §7's propagation policy skips the edge on any evaluation error. Callers
/// that need to distinguish "evaluated false" from "failed to evaluate"
/// (the condition-step handler, §4.D) should call [`evaluate_checked`].
pub fn evaluate(expr: &str, data: &Value) -> bool {
    evaluate_checked(expr, data).unwrap_or(false)
}

/// Same grammar as [`evaluate`], but surfaces genuine evaluation failures
/// (a path segment traversing through a non-object) as `Err` instead of
/// folding them into `false`. A bare expression's missing field still
/// resolves to `Ok(false)` without error, per §4.A.
pub fn evaluate_checked(expr: &str, data: &Value) -> Result<bool, super::ExpressionError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() || trimmed == "true" {
        return Ok(true);
    }
    if trimmed == "false" {
        return Ok(false);
    }

    if let Some((left, op, right)) = split_on_operator(trimmed) {
        let left_val = resolve_or_nil(left.trim(), data)?;
        let right_val = resolve_or_nil(right.trim(), data)?;
        return Ok(compare(&left_val, op, &right_val));
    }

    match resolve(trimmed, data) {
        Ok(v) => Ok(is_truthy(&v)),
        Err(super::ExpressionError::FieldNotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Resolves a comparator operand, treating a missing field as `null` (per
/// §4.A's nil-comparison rule) while still surfacing a genuine
/// not-an-object traversal failure.
fn resolve_or_nil(expr: &str, data: &Value) -> Result<Value, super::ExpressionError> {
    match resolve(expr, data) {
        Ok(v) => Ok(v),
        Err(super::ExpressionError::FieldNotFound(_)) => Ok(Value::Null),
        Err(e) => Err(e),
    }
}

fn split_on_operator(expr: &str) -> Option<(&str, &str, &str)> {
    for op in OPERATORS {
        if let Some(idx) = expr.find(op) {
            return Some((&expr[..idx], op, &expr[idx + op.len()..]));
        }
    }
    None
}

fn compare(left: &Value, op: &str, right: &Value) -> bool {
    // nil vs nil = equal, nil vs anything = less-than.
    if left.is_null() || right.is_null() {
        return match op {
            "==" => left.is_null() && right.is_null(),
            "!=" => !(left.is_null() && right.is_null()),
            "<" | "<=" => left.is_null() && !right.is_null(),
            ">" | ">=" => !left.is_null() && right.is_null(),
            _ => false,
        };
    }

    let ordering = numeric_ordering(left, right).unwrap_or_else(|| lexicographic_ordering(left, right));

    match op {
        "==" => ordering == std::cmp::Ordering::Equal,
        "!=" => ordering != std::cmp::Ordering::Equal,
        ">=" => ordering != std::cmp::Ordering::Less,
        "<=" => ordering != std::cmp::Ordering::Greater,
        ">" => ordering == std::cmp::Ordering::Greater,
        "<" => ordering == std::cmp::Ordering::Less,
        _ => false,
    }
}

fn numeric_ordering(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    let l = as_f64(left)?;
    let r = as_f64(right)?;
    l.partial_cmp(&r)
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn lexicographic_ordering(left: &Value, right: &Value) -> std::cmp::Ordering {
    to_comparable_string(left).cmp(&to_comparable_string(right))
}

fn to_comparable_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
