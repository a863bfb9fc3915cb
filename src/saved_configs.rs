//! Routing documents stored server-side and addressed by slug
//!
//! Each `<slug>.json` file in the configured directory is parsed once at
//! startup. Its version is derived from the file content, so editing a
//! document starts fresh sticky assignments.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{AppError, AppResult, ConfigError};
use crate::routing::RoutingNode;

/// Hex digits of the content hash kept as the version
const VERSION_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq)]
pub struct SavedConfig {
    slug: String,
    version: String,
    root: RoutingNode,
}

impl SavedConfig {
    /// Parse a document and derive its version
    pub fn parse(slug: impl Into<String>, content: &str) -> Result<Self, ConfigError> {
        let root: RoutingNode = content.parse()?;
        let digest = hex::encode(Sha256::digest(content.as_bytes()));
        Ok(Self {
            slug: slug.into(),
            version: digest[..VERSION_LEN].to_string(),
            root,
        })
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn root(&self) -> &RoutingNode {
        &self.root
    }
}

#[derive(Debug, Clone, Default)]
pub struct SavedConfigRegistry {
    configs: HashMap<String, Arc<SavedConfig>>,
}

impl SavedConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` document in `dir`
    ///
    /// A document that fails to parse aborts startup with the offending file
    /// named in the error.
    pub fn load_dir(dir: &Path) -> AppResult<Self> {
        let display = dir.display().to_string();
        let entries = std::fs::read_dir(dir).map_err(|source| AppError::ConfigFileRead {
            path: display.clone(),
            source,
        })?;

        let mut registry = Self::new();
        for entry in entries {
            let path = entry
                .map_err(|source| AppError::ConfigFileRead {
                    path: display.clone(),
                    source,
                })?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(slug) = path.file_stem().and_then(|stem| stem.to_str()) else {
                tracing::warn!(path = %path.display(), "Skipping saved config with non-UTF-8 name");
                continue;
            };

            let content =
                std::fs::read_to_string(&path).map_err(|source| AppError::ConfigFileRead {
                    path: path.display().to_string(),
                    source,
                })?;
            let config =
                SavedConfig::parse(slug, &content).map_err(|e| AppError::ConfigValidationFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;

            tracing::info!(slug = %slug, version = %config.version(), "Loaded saved routing config");
            registry.insert(config);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, config: SavedConfig) {
        self.configs
            .insert(config.slug().to_string(), Arc::new(config));
    }

    pub fn get(&self, slug: &str) -> Option<Arc<SavedConfig>> {
        self.configs.get(slug).cloned()
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}
