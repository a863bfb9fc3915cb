//! Conversion of guardrail/mutator shorthands into hook definitions
//!
//! A shorthand entry is either a check id string or an object whose reserved
//! keys configure the hook and whose other keys are check ids mapped to their
//! parameters:
//!
//! ```json
//! "input_guardrails": [
//!     "default.requiredMetadataKeys",
//!     {"deny": false, "default.contains": {"words": ["ssn"], "operator": "none"}}
//! ]
//! ```

use serde_json::{Map, Value};

use crate::hooks::{HookCheck, HookDefinition, HookType};

const RESERVED_KEYS: [&str; 8] = [
    "id",
    "type",
    "deny",
    "async",
    "on_fail",
    "on_success",
    "onFail",
    "onSuccess",
];

/// Convert shorthand entries into hooks of the given type
///
/// Generated ids are `{id_prefix}[{index}]` unless the entry names its own.
/// Guardrails deny on failure unless the entry says otherwise; mutators never
/// deny by default.
pub fn convert_shorthand(
    entries: &[Value],
    hook_type: HookType,
    id_prefix: &str,
) -> Vec<HookDefinition> {
    entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let generated_id = format!("{}[{}]", id_prefix, index);
            match entry {
                Value::String(check_id) => Some(HookDefinition {
                    id: generated_id,
                    hook_type,
                    checks: vec![HookCheck::new(check_id.clone(), Value::Object(Map::new()))],
                    deny: hook_type == HookType::Guardrail,
                    run_async: false,
                    on_fail: None,
                    on_success: None,
                }),
                Value::Object(fields) => Some(from_object(fields, hook_type, generated_id)),
                other => {
                    tracing::warn!(
                        entry = %other,
                        prefix = id_prefix,
                        "Ignoring shorthand hook entry that is neither a string nor an object"
                    );
                    None
                }
            }
        })
        .collect()
}

fn from_object(
    fields: &Map<String, Value>,
    hook_type: HookType,
    generated_id: String,
) -> HookDefinition {
    let checks = fields
        .iter()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
        .map(|(key, parameters)| {
            let parameters = match parameters {
                Value::Null => Value::Object(Map::new()),
                other => other.clone(),
            };
            HookCheck::new(key.clone(), parameters)
        })
        .collect();

    let flag = |key: &str| fields.get(key).and_then(Value::as_bool);
    let field = |snake: &str, camel: &str| fields.get(snake).or_else(|| fields.get(camel)).cloned();

    HookDefinition {
        id: fields
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(generated_id),
        hook_type,
        checks,
        deny: flag("deny").unwrap_or(hook_type == HookType::Guardrail),
        run_async: flag("async").unwrap_or(false),
        on_fail: field("on_fail", "onFail"),
        on_success: field("on_success", "onSuccess"),
    }
}
