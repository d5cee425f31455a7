use crate::config::database::{DatabaseManager, SELECT_ACTIVE_OVERRIDES};
use crate::config::merge::{apply_env_overrides, deep_merge, parse_stored_value, set_nested, EnvSource};
use crate::config::models::SystemConfiguration;
use crate::config::secrets::apply_secret_policy;
use crate::config::{ConfigurationError, Result};
use crate::env;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Builds a [`SystemConfiguration`] from defaults, database, file and
/// environment, in that order of increasing precedence.
#[derive(Debug, Clone)]
pub struct ConfigurationLoader {
    config_path: PathBuf,
    env: EnvSource,
}

impl ConfigurationLoader {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            env: EnvSource::Process,
        }
    }

    /// Loader for the file named by the process environment
    pub fn from_environment() -> Self {
        Self::new(env::config_file_path())
    }

    pub fn with_env(mut self, env: EnvSource) -> Self {
        self.env = env;
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load, validate and apply the secret policy
    pub async fn load(&self, database: Option<&dyn DatabaseManager>) -> Result<SystemConfiguration> {
        let tree = self.load_merged_tree(database).await?;
        let config = self.build(tree)?;
        info!(
            "Configuration loaded (environment: {}, primary provider: {})",
            config.app.environment, config.ai.primary_provider
        );
        Ok(config)
    }

    /// All layers merged, before typing and validation
    pub async fn load_merged_tree(&self, database: Option<&dyn DatabaseManager>) -> Result<Value> {
        let overrides = match database {
            Some(db) => Some(load_database_overrides(db).await),
            None => None,
        };
        self.merge_layers(overrides).await
    }

    /// Configuration that would result from storing `value` at `key` in the
    /// database. Nothing is written.
    pub async fn load_with_override(
        &self,
        database: &dyn DatabaseManager,
        key: &str,
        value: Value,
    ) -> Result<SystemConfiguration> {
        let mut overrides = load_database_overrides(database).await;
        set_nested(&mut overrides, key, value);
        let tree = self.merge_layers(Some(overrides)).await?;
        self.build(tree)
    }

    async fn merge_layers(&self, database_overrides: Option<Value>) -> Result<Value> {
        let mut tree = SystemConfiguration::defaults_tree();

        if let Some(overrides) = database_overrides {
            deep_merge(&mut tree, overrides);
        }

        if let Some(file_tree) = self.load_yaml_file().await? {
            deep_merge(&mut tree, file_tree);
        }

        let applied = apply_env_overrides(&mut tree, &self.env);
        if !applied.is_empty() {
            debug!("Environment overrides applied: {}", applied.join(", "));
        }

        Ok(tree)
    }

    pub fn build(&self, tree: Value) -> Result<SystemConfiguration> {
        let mut config = SystemConfiguration::from_tree(tree)?;
        config.validate()?;
        let filled = apply_secret_policy(&mut config)?;
        if !filled.is_empty() {
            debug!("{} secrets replaced with placeholders", filled.len());
        }
        Ok(config)
    }

    /// Parsed YAML file, or `None` when the file does not exist
    pub async fn load_yaml_file(&self) -> Result<Option<Value>> {
        let contents = match tokio::fs::read_to_string(&self.config_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No configuration file at {}", self.config_path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let yaml_error = |message: String| ConfigurationError::Yaml {
            path: self.config_path.display().to_string(),
            message,
        };

        let value: Value = serde_yaml::from_str(&contents).map_err(|e| yaml_error(e.to_string()))?;
        match value {
            Value::Null => Ok(None),
            Value::Object(_) => Ok(Some(value)),
            _ => Err(yaml_error("top level must be a mapping".to_string())),
        }
    }
}

/// Active `system_config` rows as a tree. Failures yield an empty tree.
pub async fn load_database_overrides(db: &dyn DatabaseManager) -> Value {
    let mut tree = Value::Object(Map::new());

    let rows = match db.fetch_all(SELECT_ACTIVE_OVERRIDES, &[]).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!("Skipping database configuration overrides: {}", e);
            return tree;
        }
    };

    for row in rows {
        let (Some(Value::String(key)), Some(raw)) = (row.get("key"), row.get("value")) else {
            warn!("Ignoring malformed system_config row: {:?}", row);
            continue;
        };
        let value = match raw {
            Value::String(text) => parse_stored_value(text),
            other => other.clone(),
        };
        set_nested(&mut tree, key, value);
    }

    tree
}
