//! Hierarchical configuration loader with precedence
//!
//! Loads the retry policy table from multiple sources with the following
//! precedence (low to high):
//! 1. Embedded defaults (built into the library)
//! 2. User policies (~/.rebound/retry-policies.yaml)
//! 3. Environment variables (REBOUND_* prefix, applied to the default definition)

use crate::error::{Error, Result};
use crate::types::{RetryDefinition, RetryPoliciesConfig};
use camino::{Utf8Path, Utf8PathBuf};
use rust_embed::RustEmbed;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::str::FromStr;
use std::time::Duration;

/// Embedded configuration files
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/embedded/"]
#[prefix = ""]
struct EmbeddedConfigs;

const EMBEDDED_DEFAULTS: &str = "retry-defaults.yaml";
const POLICIES_FILE: &str = "retry-policies.yaml";
const CONFIG_DIR_NAME: &str = ".rebound";

pub const ENV_MAX_ATTEMPTS: &str = "REBOUND_MAX_ATTEMPTS";
pub const ENV_INITIAL_DELAY_MS: &str = "REBOUND_INITIAL_DELAY_MS";
pub const ENV_MAX_DELAY_MS: &str = "REBOUND_MAX_DELAY_MS";
pub const ENV_BACKOFF_MULTIPLIER: &str = "REBOUND_BACKOFF_MULTIPLIER";
pub const ENV_JITTER: &str = "REBOUND_JITTER";
pub const ENV_ATTEMPT_TIMEOUT_MS: &str = "REBOUND_ATTEMPT_TIMEOUT_MS";

/// User policy file; every section is optional
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PoliciesOverlay {
    #[serde(default)]
    default: Option<RetryDefinition>,

    #[serde(default)]
    operations: HashMap<String, RetryDefinition>,
}

/// Configuration hierarchy loader
#[derive(Debug, Clone)]
pub struct HierarchicalConfigLoader {
    /// Base directory for configuration files
    config_dir: Utf8PathBuf,
}

impl HierarchicalConfigLoader {
    /// Create a loader rooted at the standard config directory
    pub fn new() -> Result<Self> {
        let config_dir = Self::default_config_dir()?;
        Ok(Self { config_dir })
    }

    /// Create a loader with a custom config directory
    pub fn with_dir(config_dir: Utf8PathBuf) -> Self {
        Self { config_dir }
    }

    /// Get the standard config directory (~/.rebound)
    ///
    /// The directory is not created; a missing directory simply means no
    /// user policies.
    fn default_config_dir() -> Result<Utf8PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::invalid_config("Could not determine home directory"))?;
        let home = Utf8PathBuf::from_path_buf(home).map_err(|path| {
            Error::invalid_config(format!(
                "Home directory is not valid UTF-8: {}",
                path.display()
            ))
        })?;

        Ok(home.join(CONFIG_DIR_NAME))
    }

    /// Load the retry policy table with hierarchical precedence
    pub fn load_policies(&self) -> Result<RetryPoliciesConfig> {
        // Start with embedded defaults
        let mut config = Self::load_embedded_config::<RetryPoliciesConfig>(EMBEDDED_DEFAULTS)?;

        // Layer the user policy file if it exists
        let policies_path = self.policies_path();
        if policies_path.exists() {
            tracing::debug!(path = %policies_path, "loading user retry policies");
            let overlay = self.load_yaml_file::<PoliciesOverlay>(&policies_path)?;
            config = Self::merge_policies(config, overlay);
        }

        // Apply environment variable overrides
        config = Self::apply_env_overrides(config)?;

        config.validate()?;
        Ok(config)
    }

    /// Resolve the definition for one operation
    pub fn load_definition(&self, operation: &str) -> Result<RetryDefinition> {
        Ok(self.load_policies()?.for_operation(operation))
    }

    /// Load an embedded configuration file
    fn load_embedded_config<T: DeserializeOwned>(filename: &str) -> Result<T> {
        let embedded_file = EmbeddedConfigs::get(filename).ok_or_else(|| {
            Error::config_not_found(format!("Embedded config not found: {}", filename))
        })?;

        let content = std::str::from_utf8(&embedded_file.data).map_err(|_| {
            Error::invalid_config(format!("Invalid UTF-8 in embedded config: {}", filename))
        })?;

        serde_yaml_ng::from_str(content).map_err(|e| {
            Error::invalid_config(format!(
                "Failed to parse embedded config {}: {}",
                filename, e
            ))
        })
    }

    /// Load a YAML file and parse it
    fn load_yaml_file<T: DeserializeOwned>(&self, path: &Utf8Path) -> Result<T> {
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return serde_yaml_ng::from_str("{}").map_err(Error::from);
        }
        serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", path, e)))
    }

    /// Merge user policies over the base table
    ///
    /// Operations are replaced whole, never merged field by field.
    fn merge_policies(
        mut base: RetryPoliciesConfig,
        overlay: PoliciesOverlay,
    ) -> RetryPoliciesConfig {
        if let Some(default) = overlay.default {
            base.default = default;
        }
        for (name, definition) in overlay.operations {
            base.operations.insert(name, definition);
        }
        base
    }

    /// Apply environment variable overrides to the default definition
    fn apply_env_overrides(mut config: RetryPoliciesConfig) -> Result<RetryPoliciesConfig> {
        let mut default = config.default;

        if let Some(max_attempts) = env_override::<u32>(ENV_MAX_ATTEMPTS)? {
            default = default.with_max_attempts(max_attempts);
        }

        let mut backoff = default.backoff().clone();
        if let Some(initial_delay_ms) = env_override::<u64>(ENV_INITIAL_DELAY_MS)? {
            backoff.initial_delay_ms = initial_delay_ms;
        }
        if let Some(max_delay_ms) = env_override::<u64>(ENV_MAX_DELAY_MS)? {
            backoff.max_delay_ms = max_delay_ms;
        }
        if let Some(multiplier) = env_override::<f64>(ENV_BACKOFF_MULTIPLIER)? {
            backoff.multiplier = multiplier;
        }
        if let Some(jitter) = env_override::<bool>(ENV_JITTER)? {
            backoff.jitter = jitter;
        }
        default = default.with_backoff(backoff);

        if let Some(timeout_ms) = env_override::<u64>(ENV_ATTEMPT_TIMEOUT_MS)? {
            default = default.with_attempt_timeout(Duration::from_millis(timeout_ms));
        }

        config.default = default;
        Ok(config)
    }

    /// Path of the user policy file
    pub fn policies_path(&self) -> Utf8PathBuf {
        self.config_dir.join(POLICIES_FILE)
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}

/// Read and parse one environment variable, if set
fn env_override<T: FromStr>(variable: &str) -> Result<Option<T>> {
    match env::var(variable) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::invalid_env_override(variable, value)),
        Err(_) => Ok(None),
    }
}
