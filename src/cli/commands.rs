//! Execution of the parsed subcommands.

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{
    ConfigurationLoader, ConfigurationManager, DatabaseManager, SystemConfiguration,
};
use crate::env;
use crate::llm::{
    GenerationParams, LLMProviderClient, ProviderRegistry, ProviderSettings, TextResponse,
};

use super::args::{ExecutionMode, SetConfig, TestProviderConfig};

/// Manager for an explicit file or the environment-selected one.
///
/// Database overrides are read when `DOCAICHE_DATABASE_URL` is set. An
/// unreachable database is logged and the remaining layers still load.
pub async fn manager_for(config: Option<PathBuf>) -> ConfigurationManager {
    let manager = file_manager(config);
    if let Some(url) = env::database_url() {
        match connect_database(&url).await {
            Ok(database) => manager.set_database_manager(database),
            Err(e) => warn!("Ignoring configuration database {}: {:#}", url, e),
        }
    }
    manager
}

fn file_manager(config: Option<PathBuf>) -> ConfigurationManager {
    let loader = match config {
        Some(path) => ConfigurationLoader::new(path),
        None => ConfigurationLoader::from_environment(),
    };
    ConfigurationManager::new(loader)
}

#[cfg(feature = "sqlite")]
async fn connect_database(url: &str) -> Result<Arc<dyn DatabaseManager>> {
    use crate::config::SqliteDatabaseManager;

    let database = SqliteDatabaseManager::connect(url).await?;
    database.ensure_schema().await?;
    Ok(Arc::new(database))
}

#[cfg(not(feature = "sqlite"))]
async fn connect_database(_url: &str) -> Result<Arc<dyn DatabaseManager>> {
    bail!("Database overrides require the 'sqlite' feature")
}

pub async fn execute(mode: ExecutionMode) -> Result<()> {
    match mode {
        ExecutionMode::ShowConfig { config, json } => show_config(config, json).await,
        ExecutionMode::CheckProviders { config } => check_providers(config).await,
        ExecutionMode::TestProvider(test) => test_provider(test).await,
        ExecutionMode::Generate { prompt, config } => generate(&prompt, config).await,
        ExecutionMode::Watch { config, interval } => watch(config, interval).await,
        ExecutionMode::Set(set) => set_value(set).await,
    }
}

async fn load(config: Option<PathBuf>) -> Result<Arc<SystemConfiguration>> {
    let manager = manager_for(config).await;
    manager
        .load_configuration()
        .await
        .with_context(|| format!("Failed to load configuration from {}", manager.config_path().display()))
}

async fn show_config(config: Option<PathBuf>, json: bool) -> Result<()> {
    let manager = manager_for(config).await;
    manager.load_configuration().await?;
    let tree = manager.get_configuration_dict()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tree)?);
    } else {
        print!("{}", serde_yaml::to_string(&tree)?);
    }
    Ok(())
}

async fn check_providers(config: Option<PathBuf>) -> Result<()> {
    let config = load(config).await?;
    let client = LLMProviderClient::from_config(&config.ai, ProviderRegistry::global())?;

    let report = client.health_check().await;
    println!(
        "Primary: {}  Fallback: {}  Failover: {}",
        report.primary_provider,
        report.fallback_provider.as_deref().unwrap_or("-"),
        if report.failover_enabled { "on" } else { "off" }
    );
    for health in &report.providers {
        let latency = health
            .latency
            .map(|l| format!("{}ms", l.as_millis()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<12} {:<10} circuit={:?} latency={}{}",
            health.provider_id,
            health.status,
            health.circuit_state,
            latency,
            health
                .error
                .as_ref()
                .map(|e| format!(" error={}", e))
                .unwrap_or_default()
        );
    }

    client.close().await;
    Ok(())
}

async fn test_provider(test: TestProviderConfig) -> Result<()> {
    let registry = ProviderRegistry::global();
    if !registry.is_registered(&test.provider_id) {
        bail!(
            "Unknown provider '{}'. Registered providers: {}",
            test.provider_id,
            registry.provider_ids().join(", ")
        );
    }

    // A missing or invalid configuration still allows testing with defaults
    let settings = match load(test.config).await {
        Ok(config) => config
            .ai
            .provider_config(&test.provider_id)
            .map(|section| section.to_settings(&config.ai))
            .unwrap_or_default(),
        Err(e) => {
            warn!("Testing {} with default settings: {:#}", test.provider_id, e);
            ProviderSettings::default()
        }
    };

    let result = registry
        .test_provider(&test.provider_id, &settings, test.discover)
        .await;

    if result.success {
        println!(
            "✅ {} reachable ({}ms)",
            result.provider_id,
            result.latency.map(|l| l.as_millis()).unwrap_or_default()
        );
    } else {
        println!(
            "❌ {} failed: {}",
            result.provider_id,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }

    if let Some(models) = &result.models {
        println!("Models ({:?}):", models.source);
        for model in &models.text_models {
            println!("  text      {}", model);
        }
        for model in &models.embedding_models {
            println!("  embedding {}", model);
        }
        if let Some(error) = &models.error {
            println!("  discovery error: {}", error);
        }
    }

    if !result.success {
        bail!("Provider test failed");
    }
    Ok(())
}

async fn generate(prompt: &str, config: Option<PathBuf>) -> Result<()> {
    let config = load(config).await?;
    let client = LLMProviderClient::from_config(&config.ai, ProviderRegistry::global())?;

    let result = client
        .generate_structured::<TextResponse>(prompt, &GenerationParams::default())
        .await;
    client.close().await;

    let response = result?;
    println!("{}", response.text);
    Ok(())
}

async fn watch(config: Option<PathBuf>, every: Duration) -> Result<()> {
    let manager = Arc::new(manager_for(config).await);
    manager.load_configuration().await?;
    let mut changes = manager.on_change();

    let watcher = manager.spawn_watcher(every);
    println!(
        "Watching {} every {}s (Ctrl-C to stop)",
        manager.config_path().display(),
        every.as_secs()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = changes.borrow_and_update().clone();
                if let Some(config) = current {
                    println!(
                        "🔄 Configuration reloaded (environment: {}, primary provider: {})",
                        config.app.environment, config.ai.primary_provider
                    );
                }
            }
        }
    }

    watcher.shutdown().await;
    info!("Configuration watcher stopped");
    Ok(())
}

async fn set_value(set: SetConfig) -> Result<()> {
    use crate::services::LoggingServiceConfigManager;

    let url = set.database_url.or_else(env::database_url).with_context(|| {
        format!("No configuration database: pass --database or set {}", env::DATABASE_URL_ENV)
    })?;
    let database = connect_database(&url).await?;

    let manager = file_manager(set.config);
    manager.set_database_manager(database.clone());
    if set.restart_containers {
        manager.set_service_manager(container_restarter().await?);
    } else {
        manager.set_service_manager(Arc::new(LoggingServiceConfigManager::default()));
    }

    let report = manager.update_in_db(&set.key, set.value).await;
    database.disconnect().await;
    let report = report?;

    println!("Stored {} (correlation id {})", report.key, report.correlation_id);
    if let Some(restart) = report.restart {
        if restart.services_restarted.is_empty() {
            println!("No services affected");
        } else {
            println!("Services: {}", restart.services_restarted.join(", "));
        }
        for error in &restart.errors {
            println!("  ⚠️  {}", error);
        }
    }
    Ok(())
}

#[cfg(feature = "containers")]
async fn container_restarter() -> Result<Arc<dyn crate::services::ServiceConfigManager>> {
    use crate::services::{DockerServiceRestarter, ServiceRestartMap};

    let restarter = DockerServiceRestarter::connect(ServiceRestartMap::default()).await?;
    Ok(Arc::new(restarter))
}

#[cfg(not(feature = "containers"))]
async fn container_restarter() -> Result<Arc<dyn crate::services::ServiceConfigManager>> {
    bail!("Container restarts require the 'containers' feature")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_manager_for_explicit_path() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"app:\n  workers: 3\n").unwrap();

        let manager = file_manager(Some(file.path().to_path_buf()));
        assert_eq!(manager.config_path(), file.path());
        let config = manager.load_configuration().await.unwrap();
        assert_eq!(config.app.workers, 3);
    }

    #[tokio::test]
    async fn test_unknown_provider_rejected() {
        let err = test_provider(TestProviderConfig {
            provider_id: "nonexistent".to_string(),
            discover: false,
            config: None,
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Unknown provider"));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_set_value_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "app:\n  workers: 2\n").unwrap();
        let db_path = dir.path().join("config.db");

        set_value(SetConfig {
            key: "app.workers".to_string(),
            value: serde_json::json!(5),
            database_url: Some(format!("sqlite://{}", db_path.display())),
            restart_containers: false,
            config: Some(config_path),
        })
        .await
        .unwrap();

        assert!(db_path.exists());
    }
}
