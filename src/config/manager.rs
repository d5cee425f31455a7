use crate::config::database::{DatabaseManager, UPSERT_OVERRIDE};
use crate::config::loader::ConfigurationLoader;
use crate::config::models::SystemConfiguration;
use crate::config::{ConfigurationError, Result};
use crate::services::{RestartReport, ServiceConfigManager};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default cadence for file change polling
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(5);

const SECRET_MARKERS: &[&str] = &["api_key", "api_token", "password", "secret", "token"];

static GLOBAL_MANAGER: OnceLock<Arc<ConfigurationManager>> = OnceLock::new();

/// Outcome of a persisted configuration change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigUpdateReport {
    pub key: String,
    pub correlation_id: String,
    pub restart: Option<RestartReport>,
}

/// Owns the published configuration and everything that replaces it.
///
/// The configuration is published as a whole `Arc` behind a lock that is
/// only held to clone or swap the pointer, never across an await.
pub struct ConfigurationManager {
    loader: ConfigurationLoader,
    current: RwLock<Option<Arc<SystemConfiguration>>>,
    config_mtime: RwLock<Option<SystemTime>>,
    database: RwLock<Option<Arc<dyn DatabaseManager>>>,
    service_manager: RwLock<Option<Arc<dyn ServiceConfigManager>>>,
    changes: watch::Sender<Option<Arc<SystemConfiguration>>>,
}

impl ConfigurationManager {
    pub fn new(loader: ConfigurationLoader) -> Self {
        let (changes, _) = watch::channel(None);
        Self {
            loader,
            current: RwLock::new(None),
            config_mtime: RwLock::new(None),
            database: RwLock::new(None),
            service_manager: RwLock::new(None),
            changes,
        }
    }

    /// Process-wide manager reading the environment-selected file
    pub fn global() -> Arc<ConfigurationManager> {
        GLOBAL_MANAGER
            .get_or_init(|| Arc::new(ConfigurationManager::new(ConfigurationLoader::from_environment())))
            .clone()
    }

    pub fn config_path(&self) -> &Path {
        self.loader.config_path()
    }

    pub fn set_database_manager(&self, database: Arc<dyn DatabaseManager>) {
        *write(&self.database) = Some(database);
    }

    pub fn set_service_manager(&self, service_manager: Arc<dyn ServiceConfigManager>) {
        *write(&self.service_manager) = Some(service_manager);
    }

    pub fn is_loaded(&self) -> bool {
        read(&self.current).is_some()
    }

    /// Current configuration snapshot
    pub fn get_configuration(&self) -> Result<Arc<SystemConfiguration>> {
        read(&self.current).clone().ok_or(ConfigurationError::NotLoaded)
    }

    /// Receiver notified with every newly published configuration
    pub fn on_change(&self) -> watch::Receiver<Option<Arc<SystemConfiguration>>> {
        self.changes.subscribe()
    }

    /// Load and publish. On any error the previous configuration stays.
    pub async fn load_configuration(&self) -> Result<Arc<SystemConfiguration>> {
        let mtime = self.current_file_mtime().await;
        let database = read(&self.database).clone();

        let config = Arc::new(self.loader.load(database.as_deref()).await?);

        *write(&self.current) = Some(config.clone());
        *write(&self.config_mtime) = mtime;
        self.changes.send_replace(Some(config.clone()));
        Ok(config)
    }

    pub async fn reload_configuration(&self) -> Result<Arc<SystemConfiguration>> {
        info!("Reloading configuration");
        self.load_configuration().await
    }

    /// Reload if the file's modification time moved since the last load.
    ///
    /// The remembered mtime only advances after a successful reload, so a
    /// broken edit is retried on the next poll.
    pub async fn check_for_config_file_changes(&self) -> Result<bool> {
        let observed = self.current_file_mtime().await;
        let known = *read(&self.config_mtime);
        if observed == known {
            return Ok(false);
        }

        debug!("Configuration file changed: {:?} -> {:?}", known, observed);
        self.reload_configuration().await?;
        Ok(true)
    }

    /// Poll for file changes in the background until shut down
    pub fn spawn_watcher(self: &Arc<Self>, every: Duration) -> ConfigWatcherHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = interval(every);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        match manager.check_for_config_file_changes().await {
                            Ok(true) => info!("Configuration hot-reloaded from {}", manager.config_path().display()),
                            Ok(false) => {}
                            Err(e) => error!("Configuration reload failed, keeping previous: {}", e),
                        }
                    }
                }
            }
            debug!("Configuration watcher stopped");
        });

        info!("Configuration watcher started with interval: {:?}", every);
        ConfigWatcherHandle { shutdown, task }
    }

    /// Validate, persist and publish an override, then let services react.
    ///
    /// A value the resulting configuration rejects is never written.
    pub async fn update_in_db(&self, key: &str, value: Value) -> Result<ConfigUpdateReport> {
        let database = read(&self.database).clone().ok_or_else(|| {
            ConfigurationError::Database(crate::config::DatabaseError::Unavailable(
                "no database manager configured".to_string(),
            ))
        })?;

        if let Err(e) = self
            .loader
            .load_with_override(&*database, key, value.clone())
            .await
        {
            warn!("Rejected configuration override for {}: {}", key, e);
            return Err(e);
        }

        let serialized = serde_json::to_string(&value)
            .map_err(|e| ConfigurationError::Deserialize(e.to_string()))?;
        database
            .execute(
                UPSERT_OVERRIDE,
                &[
                    Value::String(key.to_string()),
                    Value::String(serialized),
                    Value::String(Utc::now().to_rfc3339()),
                ],
            )
            .await?;
        info!("Stored configuration override for {}", key);

        self.reload_configuration().await?;

        let correlation_id = Uuid::new_v4().to_string();
        let service_manager = read(&self.service_manager).clone();
        let restart = match service_manager {
            Some(services) => match services.handle_config_change(key, &value, &correlation_id).await {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!("Service restart after {} change failed: {}", key, e);
                    Some(RestartReport::failed(&correlation_id, e.to_string()))
                }
            },
            None => None,
        };

        Ok(ConfigUpdateReport {
            key: key.to_string(),
            correlation_id,
            restart,
        })
    }

    /// Current configuration as a tree with secrets masked
    pub fn get_configuration_dict(&self) -> Result<Value> {
        let config = self.get_configuration()?;
        let mut tree = serde_json::to_value(config.as_ref())
            .map_err(|e| ConfigurationError::Deserialize(e.to_string()))?;
        redact_secrets(&mut tree);
        Ok(tree)
    }

    async fn current_file_mtime(&self) -> Option<SystemTime> {
        tokio::fs::metadata(self.loader.config_path())
            .await
            .ok()
            .and_then(|m| m.modified().ok())
    }
}

/// Handle to a running configuration watcher
pub struct ConfigWatcherHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConfigWatcherHandle {
    /// Stop the watcher and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Replace every non-null secret-looking leaf with `***`
pub fn redact_secrets(tree: &mut Value) {
    match tree {
        Value::Object(map) => {
            for (key, value) in map.iter_mut() {
                let secret = SECRET_MARKERS.iter().any(|marker| key.contains(marker));
                if secret && !value.is_null() && !value.is_object() {
                    *value = Value::String("***".to_string());
                } else {
                    redact_secrets(value);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_secrets),
        _ => {}
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
