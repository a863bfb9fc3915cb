//! Typed routing tree parsed from a routing document
//!
//! A node is either a leaf naming a provider or a group with a strategy and
//! child targets. Settings (retry, cache, hooks, breaker config, ...) can sit
//! on either form and flow down to leaves through `InheritedConfig`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::hooks::{HookDefinition, HookType, convert_shorthand};
use crate::metrics::StrategyLabel;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::retry::{MAX_RETRY_ATTEMPTS, RetryPolicy};
use crate::routing::{ROOT_PATH, child_path};
use crate::sticky::StickySessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    Simple,
    Semantic,
    Disabled,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Semantic => "semantic",
            Self::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CachePolicy {
    mode: CacheMode,
    max_age: Option<u64>,
}

impl CachePolicy {
    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Seconds a cached response stays valid
    pub fn max_age(&self) -> Option<u64> {
        self.max_age
    }
}

/// `"cache": "simple"` or `"cache": {"mode": "simple", "max_age": 60}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCache {
    Mode(CacheMode),
    Full {
        mode: CacheMode,
        #[serde(default, alias = "maxAge")]
        max_age: Option<u64>,
    },
}

impl From<RawCache> for CachePolicy {
    fn from(raw: RawCache) -> Self {
        match raw {
            RawCache::Mode(mode) => Self {
                mode,
                max_age: None,
            },
            RawCache::Full { mode, max_age } => Self { mode, max_age },
        }
    }
}

/// One `{"query": ..., "then": "target-name"}` rule of a conditional group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRule {
    pub query: Value,
    pub then: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Single,
    Fallback {
        /// Statuses that keep the walk going; `None` means "continue on any non-2xx"
        on_status_codes: Option<Vec<u16>>,
    },
    LoadBalance {
        sticky_session: Option<StickySessionConfig>,
    },
    Conditional {
        conditions: Vec<ConditionRule>,
        default: Option<String>,
    },
}

impl Strategy {
    pub fn label(&self) -> StrategyLabel {
        match self {
            Self::Single => StrategyLabel::Single,
            Self::Fallback { .. } => StrategyLabel::Fallback,
            Self::LoadBalance { .. } => StrategyLabel::LoadBalance,
            Self::Conditional { .. } => StrategyLabel::Conditional,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawStrategy {
    mode: String,
    #[serde(default, alias = "onStatusCodes")]
    on_status_codes: Option<Vec<u16>>,
    #[serde(default)]
    conditions: Vec<ConditionRule>,
    #[serde(default)]
    default: Option<String>,
    #[serde(default, alias = "stickySession")]
    sticky_session: Option<StickySessionConfig>,
}

impl RawStrategy {
    fn into_strategy(self, path: &str) -> Result<Strategy, ConfigError> {
        match self.mode.as_str() {
            "single" => Ok(Strategy::Single),
            "fallback" => Ok(Strategy::Fallback {
                on_status_codes: self.on_status_codes,
            }),
            "loadbalance" => Ok(Strategy::LoadBalance {
                sticky_session: self.sticky_session,
            }),
            "conditional" => {
                if self.conditions.is_empty() {
                    return Err(ConfigError::MissingConditions {
                        path: path.to_string(),
                    });
                }
                Ok(Strategy::Conditional {
                    conditions: self.conditions,
                    default: self.default,
                })
            }
            other => Err(ConfigError::UnknownMode {
                path: path.to_string(),
                mode: other.to_string(),
            }),
        }
    }
}

/// Concrete provider endpoint at a leaf
#[derive(Clone, PartialEq)]
pub struct ProviderTarget {
    provider: String,
    api_key: Option<String>,
    virtual_key: Option<String>,
    options: Map<String, Value>,
}

impl ProviderTarget {
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn virtual_key(&self) -> Option<&str> {
        self.virtual_key.as_deref()
    }

    /// Provider-specific options kept verbatim from the document
    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }
}

impl fmt::Debug for ProviderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderTarget")
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("virtual_key", &self.virtual_key)
            .field("options", &self.options)
            .finish()
    }
}

/// Settings that may appear on any node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeSettings {
    retry: Option<RetryPolicy>,
    cache: Option<CachePolicy>,
    override_params: Option<Map<String, Value>>,
    forward_headers: Option<Vec<String>>,
    custom_host: Option<String>,
    request_timeout: Option<u64>,
    before_request_hooks: Option<Vec<HookDefinition>>,
    after_request_hooks: Option<Vec<HookDefinition>>,
    input_guardrails: Vec<Value>,
    output_guardrails: Vec<Value>,
    input_mutators: Vec<Value>,
    output_mutators: Vec<Value>,
    cb_config: Option<CircuitBreakerConfig>,
}

impl NodeSettings {
    pub fn retry(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn cache(&self) -> Option<&CachePolicy> {
        self.cache.as_ref()
    }

    pub fn override_params(&self) -> Option<&Map<String, Value>> {
        self.override_params.as_ref()
    }

    pub fn forward_headers(&self) -> Option<&[String]> {
        self.forward_headers.as_deref()
    }

    pub fn custom_host(&self) -> Option<&str> {
        self.custom_host.as_deref()
    }

    /// Per-attempt timeout in milliseconds
    pub fn request_timeout(&self) -> Option<u64> {
        self.request_timeout
    }

    /// Hooks declared on this node; `None` when the node inherits its parent's
    pub fn before_request_hooks(&self) -> Option<&[HookDefinition]> {
        self.before_request_hooks.as_deref()
    }

    pub fn after_request_hooks(&self) -> Option<&[HookDefinition]> {
        self.after_request_hooks.as_deref()
    }

    pub fn cb_config(&self) -> Option<&CircuitBreakerConfig> {
        self.cb_config.as_ref()
    }

    /// Whether any guardrail/mutator shorthand is still unconverted
    pub fn has_shorthand(&self) -> bool {
        !(self.input_guardrails.is_empty()
            && self.output_guardrails.is_empty()
            && self.input_mutators.is_empty()
            && self.output_mutators.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Leaf(ProviderTarget),
    Group {
        strategy: Strategy,
        targets: Vec<RoutingNode>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutingNode {
    name: Option<String>,
    weight: Option<u32>,
    settings: NodeSettings,
    kind: NodeKind,
    circuit_open: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    weight: Option<u32>,
    #[serde(default)]
    strategy: Option<RawStrategy>,
    #[serde(default)]
    targets: Option<Vec<RawNode>>,

    #[serde(default)]
    provider: Option<String>,
    #[serde(default, alias = "apiKey")]
    api_key: Option<String>,
    #[serde(default, alias = "virtualKey")]
    virtual_key: Option<String>,

    #[serde(default)]
    retry: Option<RetryPolicy>,
    #[serde(default)]
    cache: Option<RawCache>,
    #[serde(default, alias = "overrideParams")]
    override_params: Option<Map<String, Value>>,
    #[serde(default, alias = "forwardHeaders")]
    forward_headers: Option<Vec<String>>,
    #[serde(default, alias = "customHost")]
    custom_host: Option<String>,
    #[serde(default, alias = "requestTimeout")]
    request_timeout: Option<u64>,
    #[serde(default, alias = "beforeRequestHooks")]
    before_request_hooks: Option<Vec<HookDefinition>>,
    #[serde(default, alias = "afterRequestHooks")]
    after_request_hooks: Option<Vec<HookDefinition>>,
    #[serde(default, alias = "inputGuardrails")]
    input_guardrails: Vec<Value>,
    #[serde(default, alias = "outputGuardrails")]
    output_guardrails: Vec<Value>,
    #[serde(default, alias = "inputMutators")]
    input_mutators: Vec<Value>,
    #[serde(default, alias = "outputMutators")]
    output_mutators: Vec<Value>,
    #[serde(default, alias = "cbConfig")]
    cb_config: Option<CircuitBreakerConfig>,

    #[serde(flatten)]
    options: Map<String, Value>,
}

impl RoutingNode {
    /// Parse and validate a routing document
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let raw: RawNode =
            serde_json::from_value(value).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        Self::from_raw(raw, ROOT_PATH)
    }

    fn from_raw(raw: RawNode, path: &str) -> Result<Self, ConfigError> {
        if let Some(retry) = &raw.retry
            && retry.attempts() > MAX_RETRY_ATTEMPTS
        {
            return Err(ConfigError::RetryAttempts {
                path: path.to_string(),
                got: retry.attempts(),
                max: MAX_RETRY_ATTEMPTS,
            });
        }

        let settings = NodeSettings {
            retry: raw.retry,
            cache: raw.cache.map(CachePolicy::from),
            override_params: raw.override_params,
            forward_headers: raw.forward_headers,
            custom_host: raw.custom_host,
            request_timeout: raw.request_timeout,
            before_request_hooks: raw.before_request_hooks,
            after_request_hooks: raw.after_request_hooks,
            input_guardrails: raw.input_guardrails,
            output_guardrails: raw.output_guardrails,
            input_mutators: raw.input_mutators,
            output_mutators: raw.output_mutators,
            cb_config: raw.cb_config,
        };

        let kind = match raw.strategy {
            Some(strategy) => {
                if raw.provider.is_some() {
                    tracing::warn!(path, "Ignoring provider fields on a strategy node");
                }
                let strategy = strategy.into_strategy(path)?;
                let targets = raw.targets.unwrap_or_default();
                if targets.is_empty() {
                    return Err(ConfigError::EmptyTargets {
                        path: path.to_string(),
                    });
                }
                let targets = targets
                    .into_iter()
                    .enumerate()
                    .map(|(index, child)| Self::from_raw(child, &child_path(path, index)))
                    .collect::<Result<Vec<_>, _>>()?;
                NodeKind::Group { strategy, targets }
            }
            None => {
                let provider = raw.provider.ok_or_else(|| ConfigError::MissingProvider {
                    path: path.to_string(),
                })?;
                NodeKind::Leaf(ProviderTarget {
                    provider,
                    api_key: raw.api_key,
                    virtual_key: raw.virtual_key,
                    options: raw.options,
                })
            }
        };

        Ok(Self {
            name: raw.name,
            weight: raw.weight,
            settings,
            kind,
            circuit_open: None,
        })
    }

    /// Single-leaf tree for requests that only name a provider
    pub fn leaf(provider: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            name: None,
            weight: None,
            settings: NodeSettings::default(),
            kind: NodeKind::Leaf(ProviderTarget {
                provider: provider.into(),
                api_key,
                virtual_key: None,
                options: Map::new(),
            }),
            circuit_open: None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn weight(&self) -> Option<u32> {
        self.weight
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn strategy(&self) -> Option<&Strategy> {
        match &self.kind {
            NodeKind::Group { strategy, .. } => Some(strategy),
            NodeKind::Leaf(_) => None,
        }
    }

    /// Child targets; empty for a leaf
    pub fn targets(&self) -> &[RoutingNode] {
        match &self.kind {
            NodeKind::Group { targets, .. } => targets,
            NodeKind::Leaf(_) => &[],
        }
    }

    pub(crate) fn targets_mut(&mut self) -> &mut [RoutingNode] {
        match &mut self.kind {
            NodeKind::Group { targets, .. } => targets,
            NodeKind::Leaf(_) => &mut [],
        }
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self.strategy(), Some(Strategy::Conditional { .. }))
    }

    /// Breaker annotation: `None` when nothing under this node is tracked
    pub fn circuit_open(&self) -> Option<bool> {
        self.circuit_open
    }

    pub(crate) fn set_circuit_open(&mut self, open: Option<bool>) {
        self.circuit_open = open;
    }

    /// Copy of the tree with every shorthand converted into hooks
    ///
    /// A node declaring shorthand owns a hook list afterwards, even if it had
    /// none before.
    pub fn with_normalized_hooks(&self) -> Self {
        let mut root = self.clone();
        root.convert_shorthand_at(ROOT_PATH);
        root
    }

    fn convert_shorthand_at(&mut self, path: &str) {
        let settings = &mut self.settings;
        let shorthand = [
            (std::mem::take(&mut settings.input_guardrails), HookType::Guardrail, "input_guardrails", true),
            (std::mem::take(&mut settings.input_mutators), HookType::Mutator, "input_mutators", true),
            (std::mem::take(&mut settings.output_guardrails), HookType::Guardrail, "output_guardrails", false),
            (std::mem::take(&mut settings.output_mutators), HookType::Mutator, "output_mutators", false),
        ];
        for (entries, hook_type, field, before) in shorthand {
            if entries.is_empty() {
                continue;
            }
            let hooks = convert_shorthand(&entries, hook_type, &format!("{}.{}", path, field));
            let list = if before {
                &mut settings.before_request_hooks
            } else {
                &mut settings.after_request_hooks
            };
            list.get_or_insert_with(Vec::new).extend(hooks);
        }

        for (index, child) in self.targets_mut().iter_mut().enumerate() {
            child.convert_shorthand_at(&child_path(path, index));
        }
    }

    fn write_tree(&self, f: &mut fmt::Formatter<'_>, path: &str, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        let label = self
            .name
            .as_deref()
            .map(|name| format!(" ({})", name))
            .unwrap_or_default();
        let weight = self
            .weight
            .map(|w| format!(" weight={}", w))
            .unwrap_or_default();
        match &self.kind {
            NodeKind::Leaf(target) => {
                writeln!(f, "{}{}{}: provider={}{}", indent, path, label, target.provider, weight)
            }
            NodeKind::Group { strategy, targets } => {
                writeln!(
                    f,
                    "{}{}{}: {} ({} targets){}",
                    indent,
                    path,
                    label,
                    strategy.label().as_str(),
                    targets.len(),
                    weight
                )?;
                for (index, child) in targets.iter().enumerate() {
                    child.write_tree(f, &child_path(path, index), depth + 1)?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for RoutingNode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: Value =
            serde_json::from_str(s).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }
}

impl fmt::Display for RoutingNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_tree(f, ROOT_PATH, 0)
    }
}
