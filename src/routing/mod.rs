//! Routing documents and the recursive target resolver
//!
//! A routing document is a tree: groups carry a strategy and child targets,
//! leaves name a provider. Every node is addressed by its tree path
//! (`config`, `config.targets[0]`, `config.targets[0].targets[2]`, ...), which
//! doubles as the circuit breaker key and the value of the last-used-option
//! response header.

pub mod conditional;
pub mod inherit;
pub mod load_balance;
pub mod node;
pub mod resolver;

pub use inherit::InheritedConfig;
pub use node::{
    CacheMode, CachePolicy, ConditionRule, NodeKind, NodeSettings, ProviderTarget, RoutingNode,
    Strategy,
};
pub use resolver::Resolver;

/// Path of the document root
pub const ROOT_PATH: &str = "config";

/// Path of the `index`th child of the node at `parent`
pub fn child_path(parent: &str, index: usize) -> String {
    format!("{}.targets[{}]", parent, index)
}
