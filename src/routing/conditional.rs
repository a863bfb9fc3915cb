//! Query evaluation for conditional routing
//!
//! Rules are evaluated in order against
//! `{"metadata": ..., "params": <request body>, "url": {"pathname": ...}}`.
//! The first rule whose query matches names the target; otherwise `default`
//! is used. A query is an object whose keys are dotted field paths or the
//! logical operators `$and` / `$or`:
//!
//! ```json
//! {"$or": [{"metadata.plan": "pro"}, {"params.max_tokens": {"$gt": 1000}}]}
//! ```

use regex::Regex;
use serde_json::{Map, Value, json};
use std::cmp::Ordering;

use crate::error::RouterError;
use crate::routing::node::{ConditionRule, RoutingNode};
use crate::sticky::lookup_path;

/// Values a condition can refer to
#[derive(Debug, Clone)]
pub struct ConditionContext {
    document: Value,
}

impl ConditionContext {
    pub fn new(metadata: &Map<String, Value>, params: &Value, pathname: &str) -> Self {
        Self {
            document: json!({
                "metadata": metadata,
                "params": params,
                "url": {"pathname": pathname},
            }),
        }
    }

    fn field(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.document, path)
    }
}

/// Pick the child a conditional group routes to
///
/// Returns the child's index among `targets`.
pub fn select_target(
    conditions: &[ConditionRule],
    default: Option<&str>,
    targets: &[RoutingNode],
    context: &ConditionContext,
) -> Result<usize, RouterError> {
    let mut chosen = None;
    for rule in conditions {
        if evaluate(&rule.query, context)? {
            chosen = Some(rule.then.as_str());
            break;
        }
    }

    let name = chosen.or(default).ok_or(RouterError::NoMatch)?;
    targets
        .iter()
        .position(|target| target.name() == Some(name))
        .ok_or_else(|| RouterError::UnknownTarget(name.to_string()))
}

/// Evaluate one query against the context
pub fn evaluate(query: &Value, context: &ConditionContext) -> Result<bool, RouterError> {
    let Value::Object(clauses) = query else {
        return Err(RouterError::InvalidQuery(format!(
            "query must be an object, got {}",
            query
        )));
    };

    for (key, expected) in clauses {
        let matched = match key.as_str() {
            "$and" => logical(expected, context, key)?.into_iter().all(|m| m),
            "$or" => logical(expected, context, key)?.into_iter().any(|m| m),
            field => field_matches(context.field(field), expected)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn logical(
    operand: &Value,
    context: &ConditionContext,
    operator: &str,
) -> Result<Vec<bool>, RouterError> {
    let Value::Array(queries) = operand else {
        return Err(RouterError::InvalidQuery(format!(
            "{} expects an array of queries",
            operator
        )));
    };
    queries.iter().map(|query| evaluate(query, context)).collect()
}

fn field_matches(actual: Option<&Value>, expected: &Value) -> Result<bool, RouterError> {
    let operators = match expected {
        Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => map,
        bare => return Ok(actual == Some(bare)),
    };

    for (operator, operand) in operators {
        let matched = match operator.as_str() {
            "$eq" => actual == Some(operand),
            "$ne" => actual != Some(operand),
            "$gt" => compare(actual, operand) == Some(Ordering::Greater),
            "$gte" => matches!(compare(actual, operand), Some(Ordering::Greater | Ordering::Equal)),
            "$lt" => compare(actual, operand) == Some(Ordering::Less),
            "$lte" => matches!(compare(actual, operand), Some(Ordering::Less | Ordering::Equal)),
            "$in" => list(operator, operand)?.iter().any(|v| Some(v) == actual),
            "$nin" => !list(operator, operand)?.iter().any(|v| Some(v) == actual),
            "$regex" => {
                let pattern = operand.as_str().ok_or_else(|| {
                    RouterError::InvalidQuery("$regex expects a string pattern".to_string())
                })?;
                let regex = Regex::new(pattern)
                    .map_err(|e| RouterError::InvalidQuery(format!("invalid $regex: {}", e)))?;
                actual
                    .and_then(Value::as_str)
                    .is_some_and(|text| regex.is_match(text))
            }
            other => {
                return Err(RouterError::InvalidQuery(format!(
                    "unsupported operator {}",
                    other
                )));
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn list<'v>(operator: &str, operand: &'v Value) -> Result<&'v Vec<Value>, RouterError> {
    operand
        .as_array()
        .ok_or_else(|| RouterError::InvalidQuery(format!("{} expects an array", operator)))
}

/// Numbers compare numerically, strings lexically; anything else is incomparable
fn compare(actual: Option<&Value>, operand: &Value) -> Option<Ordering> {
    match (actual?, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
