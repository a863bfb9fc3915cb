//! Check executor seam and the built-in `default.*` check registry

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::error::CheckError;
use crate::hooks::{HookCheck, HookContext, HookEventType, TransformedData};

/// Result of running one check
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckOutcome {
    pub verdict: bool,
    pub data: Option<Value>,
    pub transformed_data: Option<TransformedData>,
}

impl CheckOutcome {
    pub fn pass() -> Self {
        Self {
            verdict: true,
            ..Default::default()
        }
    }

    pub fn verdict(verdict: bool, data: Value) -> Self {
        Self {
            verdict,
            data: Some(data),
            transformed_data: None,
        }
    }
}

/// Runs a single guardrail or mutator check
///
/// Errors never block a request; the manager records them and treats the
/// check as passed.
#[async_trait]
pub trait CheckExecutor: Send + Sync {
    async fn execute(
        &self,
        check: &HookCheck,
        event: HookEventType,
        context: &HookContext,
    ) -> Result<CheckOutcome, CheckError>;
}

/// Built-in checks available without any plugin
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinChecks;

#[async_trait]
impl CheckExecutor for BuiltinChecks {
    async fn execute(
        &self,
        check: &HookCheck,
        event: HookEventType,
        context: &HookContext,
    ) -> Result<CheckOutcome, CheckError> {
        match check.id.as_str() {
            "default.contains" => contains(check, &context.text_for(event)),
            "default.regexMatch" => regex_match(check, &context.text_for(event)),
            "default.wordCount" => word_count(check, &context.text_for(event)),
            "default.requiredMetadataKeys" => required_metadata_keys(check, context),
            "default.addPrefix" => add_prefix(check, event, context),
            other => Err(CheckError::UnknownCheck(other.to_string())),
        }
    }
}

fn invalid(check: &HookCheck, reason: impl Into<String>) -> CheckError {
    CheckError::InvalidParameters {
        id: check.id.clone(),
        reason: reason.into(),
    }
}

fn param_strings(check: &HookCheck, key: &str) -> Result<Vec<String>, CheckError> {
    let values = check
        .parameters
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| invalid(check, format!("'{}' must be a list of strings", key)))?;
    values
        .iter()
        .map(|value| {
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(check, format!("'{}' must only contain strings", key)))
        })
        .collect()
}

/// `words` + `operator` (`any`, `all`, `none`), case-insensitive
fn contains(check: &HookCheck, text: &str) -> Result<CheckOutcome, CheckError> {
    let words = param_strings(check, "words")?;
    let operator = check
        .parameters
        .get("operator")
        .and_then(Value::as_str)
        .unwrap_or("any");
    let haystack = text.to_lowercase();
    let found: Vec<&String> = words
        .iter()
        .filter(|word| haystack.contains(&word.to_lowercase()))
        .collect();

    let verdict = match operator {
        "any" => !found.is_empty(),
        "all" => found.len() == words.len(),
        "none" => found.is_empty(),
        other => return Err(invalid(check, format!("unknown operator '{}'", other))),
    };
    Ok(CheckOutcome::verdict(
        verdict,
        serde_json::json!({ "operator": operator, "found": found }),
    ))
}

/// `rule` regex; `not: true` inverts the verdict
fn regex_match(check: &HookCheck, text: &str) -> Result<CheckOutcome, CheckError> {
    let rule = check
        .parameters
        .get("rule")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(check, "'rule' must be a string"))?;
    let regex = Regex::new(rule).map_err(|e| invalid(check, e.to_string()))?;
    let not = check
        .parameters
        .get("not")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let matched = regex.find(text).map(|m| m.as_str().to_string());
    Ok(CheckOutcome::verdict(
        matched.is_some() != not,
        serde_json::json!({ "rule": rule, "match": matched }),
    ))
}

fn word_count(check: &HookCheck, text: &str) -> Result<CheckOutcome, CheckError> {
    let min = check.parameters.get("minWords").and_then(Value::as_u64).unwrap_or(0);
    let max = check
        .parameters
        .get("maxWords")
        .and_then(Value::as_u64)
        .unwrap_or(u64::MAX);
    if min > max {
        return Err(invalid(check, "'minWords' exceeds 'maxWords'"));
    }
    let count = text.split_whitespace().count() as u64;
    Ok(CheckOutcome::verdict(
        (min..=max).contains(&count),
        serde_json::json!({ "wordCount": count }),
    ))
}

fn required_metadata_keys(
    check: &HookCheck,
    context: &HookContext,
) -> Result<CheckOutcome, CheckError> {
    let keys = param_strings(check, "metadataKeys")?;
    let missing: Vec<&String> = keys
        .iter()
        .filter(|key| !context.metadata.contains_key(key.as_str()))
        .collect();
    Ok(CheckOutcome::verdict(
        missing.is_empty(),
        serde_json::json!({ "missingKeys": missing }),
    ))
}

/// Mutator: prefix the last user message (before) or every choice (after)
fn add_prefix(
    check: &HookCheck,
    event: HookEventType,
    context: &HookContext,
) -> Result<CheckOutcome, CheckError> {
    let prefix = check
        .parameters
        .get("prefix")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(check, "'prefix' must be a string"))?;

    let transformed = match event {
        HookEventType::BeforeRequestHook => {
            let mut request = context.request.json.clone();
            let target = request
                .get_mut("messages")
                .and_then(Value::as_array_mut)
                .and_then(|messages| {
                    messages
                        .iter_mut()
                        .rev()
                        .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
                })
                .and_then(|message| message.get_mut("content"));
            match target {
                Some(Value::String(content)) => content.insert_str(0, prefix),
                _ => return Ok(CheckOutcome::pass()),
            }
            TransformedData {
                request: Some(request),
                response: None,
            }
        }
        HookEventType::AfterRequestHook => {
            let mut response = context.response.json.clone();
            let Some(choices) = response.get_mut("choices").and_then(Value::as_array_mut) else {
                return Ok(CheckOutcome::pass());
            };
            for choice in choices.iter_mut() {
                if let Some(Value::String(content)) = choice.pointer_mut("/message/content") {
                    content.insert_str(0, prefix);
                }
            }
            TransformedData {
                request: None,
                response: Some(response),
            }
        }
    };

    Ok(CheckOutcome {
        verdict: true,
        data: None,
        transformed_data: Some(transformed),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{RequestContext, ResponseContext};
    use crate::request::FunctionKind;
    use serde_json::{Map, json};

    fn context(request: Value, response: Value) -> HookContext {
        HookContext {
            request: RequestContext {
                json: request,
                is_streaming: false,
                is_transformed: false,
            },
            response: ResponseContext {
                json: response,
                status: 200,
                is_transformed: false,
            },
            provider: "openai".to_string(),
            request_type: FunctionKind::ChatComplete,
            metadata: Map::new(),
        }
    }

    fn chat(text: &str) -> Value {
        json!({"messages": [{"role": "user", "content": text}]})
    }

    async fn run(
        check: HookCheck,
        event: HookEventType,
        ctx: &HookContext,
    ) -> Result<CheckOutcome, CheckError> {
        BuiltinChecks.execute(&check, event, ctx).await
    }

    #[tokio::test]
    async fn test_contains_operators() {
        let ctx = context(chat("Please share the SSN"), Value::Null);
        let any = HookCheck::new("default.contains", json!({"words": ["ssn", "password"]}));
        assert!(run(any, HookEventType::BeforeRequestHook, &ctx).await.unwrap().verdict);

        let all = HookCheck::new(
            "default.contains",
            json!({"words": ["ssn", "password"], "operator": "all"}),
        );
        assert!(!run(all, HookEventType::BeforeRequestHook, &ctx).await.unwrap().verdict);

        let none = HookCheck::new(
            "default.contains",
            json!({"words": ["ssn"], "operator": "none"}),
        );
        assert!(!run(none, HookEventType::BeforeRequestHook, &ctx).await.unwrap().verdict);
    }

    #[tokio::test]
    async fn test_regex_match_and_invalid_rule() {
        let ctx = context(chat("order 12345"), Value::Null);
        let check = HookCheck::new("default.regexMatch", json!({"rule": "\\d{5}"}));
        assert!(run(check, HookEventType::BeforeRequestHook, &ctx).await.unwrap().verdict);

        let inverted = HookCheck::new("default.regexMatch", json!({"rule": "\\d{5}", "not": true}));
        assert!(!run(inverted, HookEventType::BeforeRequestHook, &ctx).await.unwrap().verdict);

        let broken = HookCheck::new("default.regexMatch", json!({"rule": "("}));
        assert!(matches!(
            run(broken, HookEventType::BeforeRequestHook, &ctx).await,
            Err(CheckError::InvalidParameters { .. })
        ));
    }

    #[tokio::test]
    async fn test_word_count_on_response() {
        let ctx = context(
            Value::Null,
            json!({"choices": [{"message": {"content": "one two three"}}]}),
        );
        let check = HookCheck::new("default.wordCount", json!({"minWords": 1, "maxWords": 2}));
        let outcome = run(check, HookEventType::AfterRequestHook, &ctx).await.unwrap();
        assert!(!outcome.verdict);
        assert_eq!(outcome.data.unwrap()["wordCount"], 3);
    }

    #[tokio::test]
    async fn test_add_prefix_rewrites_last_user_message() {
        let ctx = context(
            json!({"messages": [
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "reply"},
                {"role": "user", "content": "second"}
            ]}),
            Value::Null,
        );
        let check = HookCheck::new("default.addPrefix", json!({"prefix": "[safe] "}));
        let outcome = run(check, HookEventType::BeforeRequestHook, &ctx).await.unwrap();
        let request = outcome.transformed_data.unwrap().request.unwrap();
        assert_eq!(request["messages"][2]["content"], "[safe] second");
        assert_eq!(request["messages"][0]["content"], "first");
    }

    #[tokio::test]
    async fn test_unknown_check_is_an_error() {
        let ctx = context(Value::Null, Value::Null);
        let check = HookCheck::new("acme.toxicity", Value::Null);
        assert_eq!(
            run(check, HookEventType::BeforeRequestHook, &ctx).await,
            Err(CheckError::UnknownCheck("acme.toxicity".to_string()))
        );
    }
}
