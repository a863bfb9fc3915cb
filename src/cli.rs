//! Command-line interface for Switchboard
//!
//! Provides argument parsing and subcommand handling for the Switchboard binary.

use clap::{Parser, Subcommand};
use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::routing::RoutingNode;

/// AI provider gateway with declarative routing
#[derive(Parser)]
#[command(name = "switchboard")]
#[command(version)]
#[command(about = "AI provider gateway with declarative routing")]
#[command(
    long_about = "Switchboard routes AI provider requests through a declarative routing document: \
    fallback chains, weighted load balancing with sticky sessions, conditional routing, \
    retries, circuit breaking and guardrail hooks."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Parse a routing document and print its target tree
    ValidateRouting {
        /// Routing document (JSON)
        file: String,
    },
}

/// Parse the routing document at `path` and render its tree
pub fn validate_routing_file(path: &Path) -> AppResult<String> {
    let content = std::fs::read_to_string(path).map_err(|source| AppError::ConfigFileRead {
        path: path.display().to_string(),
        source,
    })?;
    let root: RoutingNode = content.parse()?;
    Ok(root.to_string())
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# Switchboard Configuration
# =========================
#
# Server, provider endpoints and process-wide resilience settings.
# Routing documents (strategies, targets, retries, hooks) are not configured
# here: they arrive per request in the x-gateway-config header or are
# loaded from [saved_configs].dir.

# ─────────────────────────────────────────────────────────────────────────────
# SERVER
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"

# Port to listen on
port = 8787

# Circuit breaker counters are scoped by organisation, workspace and config slug
organisation_id = "default"
workspace_id = "default"

# ─────────────────────────────────────────────────────────────────────────────
# RETRIES
# ─────────────────────────────────────────────────────────────────────────────

[retry]
# Total time a request may spend waiting on provider Retry-After hints.
# A hint larger than what remains stops retrying instead of sleeping.
max_retry_after_ms = 60000

# Exponential backoff between retries: base * factor^(retry - 1), capped at 30s
backoff_base_ms = 1000
backoff_factor = 2

# ─────────────────────────────────────────────────────────────────────────────
# STICKY SESSIONS
# ─────────────────────────────────────────────────────────────────────────────

[sticky_session]
# Used when a load-balance strategy enables sticky sessions without a ttl
default_ttl_seconds = 3600

# ─────────────────────────────────────────────────────────────────────────────
# PROVIDERS
# ─────────────────────────────────────────────────────────────────────────────
#
# Base URL per provider id. A target's custom_host takes precedence.
# The inbound path minus its /v1 prefix is appended.

[providers.openai]
base_url = "https://api.openai.com/v1"

# [providers.local]
# base_url = "http://127.0.0.1:11434/v1"

# ─────────────────────────────────────────────────────────────────────────────
# DEFAULT GUARDRAILS
# ─────────────────────────────────────────────────────────────────────────────
#
# Applied ahead of every routing document's own hooks, using the same
# shorthand as input_guardrails/output_guardrails.

[guardrails]
default_input = []
default_output = []
# default_input = [{ "default.contains" = { words = ["password"], operator = "none" } }]

# ─────────────────────────────────────────────────────────────────────────────
# SAVED ROUTING CONFIGS
# ─────────────────────────────────────────────────────────────────────────────

[saved_configs]
# Directory of <slug>.json routing documents, selected with x-gateway-config: <slug>
# dir = "configs"

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error"
log_level = "info"

# Prometheus metrics are always available at /metrics on the server port
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use clap::CommandFactory;
    use std::str::FromStr;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_config_path() {
        let cli = Cli::parse_from(["switchboard"]);
        assert_eq!(cli.config, "config.toml");
        assert!(cli.command.is_none());
    }

    #[test]
    fn config_subcommand_with_output() {
        let cli = Cli::parse_from(["switchboard", "config", "-o", "my-config.toml"]);
        assert!(matches!(
            cli.command,
            Some(Command::Config { output: Some(ref path) }) if path == "my-config.toml"
        ));
    }

    #[test]
    fn validate_routing_subcommand() {
        let cli = Cli::parse_from(["switchboard", "validate-routing", "routing.json"]);
        assert!(matches!(
            cli.command,
            Some(Command::ValidateRouting { ref file }) if file == "routing.json"
        ));
    }

    #[test]
    fn template_is_a_valid_config() {
        let config = Config::from_str(generate_config_template());
        assert!(config.is_ok(), "template should load: {:?}", config.err());
    }

    #[test]
    fn validate_routing_file_prints_tree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routing.json");
        std::fs::write(
            &path,
            r#"{"strategy": {"mode": "loadbalance"}, "targets": [
                {"provider": "openai", "weight": 3},
                {"provider": "anthropic"}
            ]}"#,
        )
        .unwrap();

        let tree = validate_routing_file(&path).unwrap();
        assert!(tree.contains("loadbalance (2 targets)"), "got: {}", tree);
        assert!(tree.contains("config.targets[0]: provider=openai weight=3"));
    }

    #[test]
    fn validate_routing_file_rejects_invalid_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routing.json");
        std::fs::write(&path, r#"{"strategy": {"mode": "fallback"}, "targets": []}"#).unwrap();

        let err = validate_routing_file(&path).unwrap_err();
        assert!(matches!(err, AppError::RoutingConfig(_)), "got: {:?}", err);
    }
}
