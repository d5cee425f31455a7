//! Reactions of running services to configuration changes.
//!
//! After a runtime configuration update the configuration manager hands the
//! changed key to a [`ServiceConfigManager`], which decides which services
//! must restart to pick it up. The configuration layer only sees this
//! trait; container runtimes live behind it.
//!
//! - [`LoggingServiceConfigManager`]: records what would restart
//! - `DockerServiceRestarter` (feature `containers`): restarts containers

#[cfg(feature = "containers")]
mod docker;

#[cfg(feature = "containers")]
pub use docker::DockerServiceRestarter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// Service orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Container runtime could not be reached
    #[error("Runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// A single service failed to restart
    #[error("Failed to restart {service}: {message}")]
    RestartFailed { service: String, message: String },
}

/// Which services restarted because of one configuration change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestartReport {
    pub correlation_id: String,
    pub services_restarted: Vec<String>,
    pub success: bool,
    pub errors: Vec<String>,
}

impl RestartReport {
    pub fn failed(correlation_id: &str, error: String) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            services_restarted: Vec::new(),
            success: false,
            errors: vec![error],
        }
    }
}

#[async_trait]
pub trait ServiceConfigManager: Send + Sync {
    async fn handle_config_change(
        &self,
        key: &str,
        value: &Value,
        correlation_id: &str,
    ) -> Result<RestartReport, ServiceError>;
}

/// Maps dotted configuration keys to the services that read them
#[derive(Debug, Clone)]
pub struct ServiceRestartMap {
    rules: Vec<(String, Vec<String>)>,
}

impl ServiceRestartMap {
    pub fn new(rules: Vec<(String, Vec<String>)>) -> Self {
        Self { rules }
    }

    /// Services affected by `key`, in rule order without duplicates
    pub fn services_for(&self, key: &str) -> Vec<String> {
        let mut services: Vec<String> = Vec::new();
        for (prefix, targets) in &self.rules {
            let matches = key == prefix.trim_end_matches('.') || key.starts_with(prefix.as_str());
            if !matches {
                continue;
            }
            for target in targets {
                if !services.contains(target) {
                    services.push(target.clone());
                }
            }
        }
        services
    }
}

impl Default for ServiceRestartMap {
    fn default() -> Self {
        let rule = |prefix: &str, services: &[&str]| {
            (
                prefix.to_string(),
                services.iter().map(|s| s.to_string()).collect(),
            )
        };
        Self::new(vec![
            rule("app.", &["api", "web"]),
            rule("ai.", &["api", "enrichment"]),
            rule("weaviate.", &["api"]),
            rule("redis.", &["api"]),
            rule("github.", &["api"]),
            rule("scraping.", &["api"]),
            rule("content.", &["api"]),
            rule("context7.", &["api"]),
            rule("enrichment.", &["enrichment"]),
            rule("mcp.", &["mcp"]),
        ])
    }
}

/// Logs the restarts a change would need without touching anything
#[derive(Debug, Clone, Default)]
pub struct LoggingServiceConfigManager {
    map: ServiceRestartMap,
}

impl LoggingServiceConfigManager {
    pub fn new(map: ServiceRestartMap) -> Self {
        Self { map }
    }
}

#[async_trait]
impl ServiceConfigManager for LoggingServiceConfigManager {
    async fn handle_config_change(
        &self,
        key: &str,
        _value: &Value,
        correlation_id: &str,
    ) -> Result<RestartReport, ServiceError> {
        let services = self.map.services_for(key);
        info!(
            correlation_id = %correlation_id,
            "Configuration key {} changed; services needing restart: {:?}",
            key, services
        );
        Ok(RestartReport {
            correlation_id: correlation_id.to_string(),
            services_restarted: services,
            success: true,
            errors: Vec::new(),
        })
    }
}
