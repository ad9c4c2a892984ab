use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use operator_core::OperatorError;

use crate::schema::OperatorConfig;

/// Loads and reloads the operator configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<OperatorConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > OPERATOR_CONFIG env > ~/.operator/operator.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("OPERATOR_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".operator")
            .join("operator.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> operator_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::read_file(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            OperatorConfig::default()
        };

        let config = Self::apply_env_overrides(config);
        Self::check(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Parse a TOML string without touching disk or the environment.
    pub fn from_toml(raw: &str) -> operator_core::Result<OperatorConfig> {
        let config = toml::from_str::<OperatorConfig>(raw)
            .map_err(|e| OperatorError::Configuration(format!("failed to parse config: {e}")))?;
        Self::check(&config)?;
        Ok(config)
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> OperatorConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<OperatorConfig>> {
        Arc::clone(&self.config)
    }

    /// Path the config was resolved to.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Reload the config from disk. The current config is kept when the new
    /// file fails to parse or validate.
    pub fn reload(&self) -> operator_core::Result<()> {
        if !self.config_path.exists() {
            return Err(OperatorError::Configuration(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::read_file(&self.config_path)?);
        Self::check(&new_config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    fn read_file(path: &Path) -> operator_core::Result<OperatorConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<OperatorConfig>(&raw).map_err(|e| {
            OperatorError::Configuration(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Log warnings, fail on errors.
    fn check(config: &OperatorConfig) -> operator_core::Result<()> {
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
                Ok(())
            }
            Err(e) => Err(OperatorError::Configuration(e)),
        }
    }

    /// Apply env var overrides (OPERATOR_DB_PATH, OPERATOR_LOG_LEVEL, etc.)
    fn apply_env_overrides(mut config: OperatorConfig) -> OperatorConfig {
        if let Ok(v) = std::env::var("OPERATOR_DB_PATH") {
            config.database.path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("OPERATOR_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("OPERATOR_REQUEST_TIMEOUT_SECS")
            && let Ok(secs) = v.parse::<u64>()
        {
            config.bridge.request_timeout_secs = secs;
        }
        if let Ok(v) = std::env::var("OPERATOR_PROMPT_TTL_SECS")
            && let Ok(secs) = v.parse::<u64>()
        {
            config.prompt_cache.ttl_secs = secs;
        }
        config
    }
}
