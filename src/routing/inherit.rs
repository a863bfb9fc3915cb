//! Settings accumulated on the way down the routing tree
//!
//! Each recursion level builds a fresh `InheritedConfig` from its parent's and
//! the current node's settings; nothing is mutated in place.
//!
//! | field            | rule                                      |
//! |------------------|-------------------------------------------|
//! | retry, cache     | child replaces parent wholesale           |
//! | override_params  | shallow merge, child keys win             |
//! | forward_headers  | child list replaces parent list if set    |
//! | custom_host      | child wins                                |
//! | request_timeout  | child wins                                |
//! | hooks            | child list replaces parent list if set    |
//!
//! Organisation default guardrails are held apart from the tree's hooks and
//! run ahead of whichever hook list reaches a leaf.

use serde_json::{Map, Value};

use crate::hooks::{HookDefinition, HookType, convert_shorthand};
use crate::resilience::retry::RetryPolicy;
use crate::routing::node::{CachePolicy, NodeSettings};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InheritedConfig {
    root: bool,
    retry: Option<RetryPolicy>,
    cache: Option<CachePolicy>,
    override_params: Map<String, Value>,
    forward_headers: Option<Vec<String>>,
    custom_host: Option<String>,
    request_timeout: Option<u64>,
    before_request_hooks: Option<Vec<HookDefinition>>,
    after_request_hooks: Option<Vec<HookDefinition>>,
    default_before_hooks: Vec<HookDefinition>,
    default_after_hooks: Vec<HookDefinition>,
}

impl InheritedConfig {
    /// Starting point for a resolution, carrying organisation default guardrails
    pub fn root(
        default_input_guardrails: Vec<Value>,
        default_output_guardrails: Vec<Value>,
    ) -> Self {
        Self {
            root: true,
            default_before_hooks: convert_shorthand(
                &default_input_guardrails,
                HookType::Guardrail,
                "default.input_guardrails",
            ),
            default_after_hooks: convert_shorthand(
                &default_output_guardrails,
                HookType::Guardrail,
                "default.output_guardrails",
            ),
            ..Default::default()
        }
    }

    /// `true` only for the value handed to the top of the tree
    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Settings for the children of a node with `settings`
    pub fn merge(&self, settings: &NodeSettings) -> Self {
        let mut override_params = self.override_params.clone();
        if let Some(own) = settings.override_params() {
            override_params.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        Self {
            root: false,
            retry: settings.retry().cloned().or_else(|| self.retry.clone()),
            cache: settings.cache().copied().or(self.cache),
            override_params,
            forward_headers: settings
                .forward_headers()
                .map(<[String]>::to_vec)
                .or_else(|| self.forward_headers.clone()),
            custom_host: settings
                .custom_host()
                .map(str::to_string)
                .or_else(|| self.custom_host.clone()),
            request_timeout: settings.request_timeout().or(self.request_timeout),
            before_request_hooks: settings
                .before_request_hooks()
                .map(<[HookDefinition]>::to_vec)
                .or_else(|| self.before_request_hooks.clone()),
            after_request_hooks: settings
                .after_request_hooks()
                .map(<[HookDefinition]>::to_vec)
                .or_else(|| self.after_request_hooks.clone()),
            default_before_hooks: self.default_before_hooks.clone(),
            default_after_hooks: self.default_after_hooks.clone(),
        }
    }

    pub fn retry(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn cache(&self) -> Option<&CachePolicy> {
        self.cache.as_ref()
    }

    pub fn override_params(&self) -> &Map<String, Value> {
        &self.override_params
    }

    pub fn forward_headers(&self) -> Option<&[String]> {
        self.forward_headers.as_deref()
    }

    pub fn custom_host(&self) -> Option<&str> {
        self.custom_host.as_deref()
    }

    pub fn request_timeout(&self) -> Option<u64> {
        self.request_timeout
    }

    /// Hooks a leaf runs before its call: defaults, then the nearest list
    pub fn before_request_hooks(&self) -> Vec<HookDefinition> {
        with_defaults(&self.default_before_hooks, self.before_request_hooks.as_deref())
    }

    /// Hooks a leaf runs after its call: defaults, then the nearest list
    pub fn after_request_hooks(&self) -> Vec<HookDefinition> {
        with_defaults(&self.default_after_hooks, self.after_request_hooks.as_deref())
    }
}

fn with_defaults(
    defaults: &[HookDefinition],
    own: Option<&[HookDefinition]>,
) -> Vec<HookDefinition> {
    defaults
        .iter()
        .chain(own.unwrap_or_default())
        .cloned()
        .collect()
}
