//! Restart of service containers through the Docker or Podman API.

use crate::services::{RestartReport, ServiceConfigManager, ServiceError, ServiceRestartMap};
use async_trait::async_trait;
use bollard::Docker;
use serde_json::Value;
use tracing::{debug, error, info};

/// Container names are `<prefix><service>`
pub const DEFAULT_CONTAINER_PREFIX: &str = "docaiche-";

pub struct DockerServiceRestarter {
    docker: Docker,
    map: ServiceRestartMap,
    container_prefix: String,
}

impl DockerServiceRestarter {
    /// Connect to the local runtime and verify it answers
    pub async fn connect(map: ServiceRestartMap) -> Result<Self, ServiceError> {
        let docker = Self::connect_runtime()?;
        docker
            .ping()
            .await
            .map_err(|e| ServiceError::RuntimeUnavailable(format!("ping failed: {}", e)))?;

        Ok(Self {
            docker,
            map,
            container_prefix: DEFAULT_CONTAINER_PREFIX.to_string(),
        })
    }

    pub fn with_container_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.container_prefix = prefix.into();
        self
    }

    pub fn container_name(&self, service: &str) -> String {
        format!("{}{}", self.container_prefix, service)
    }

    /// Docker local defaults first, then the Podman sockets
    fn connect_runtime() -> Result<Docker, ServiceError> {
        match Docker::connect_with_local_defaults() {
            Ok(docker) => {
                info!("Connected to container runtime via local defaults");
                return Ok(docker);
            }
            Err(e) => debug!("Local defaults failed: {}", e),
        }

        #[cfg(unix)]
        {
            let mut sockets = Vec::new();
            if let Ok(home) = std::env::var("HOME") {
                sockets.push(format!("unix://{}/run/podman/podman.sock", home));
            }
            sockets.push("unix:///run/podman/podman.sock".to_string());

            for socket in sockets {
                match Docker::connect_with_socket(&socket, 120, bollard::API_DEFAULT_VERSION) {
                    Ok(docker) => {
                        info!("Connected to Podman via {}", socket);
                        return Ok(docker);
                    }
                    Err(e) => debug!("Podman socket {} failed: {}", socket, e),
                }
            }
        }

        Err(ServiceError::RuntimeUnavailable(
            "no Docker or Podman runtime reachable".to_string(),
        ))
    }
}

#[async_trait]
impl ServiceConfigManager for DockerServiceRestarter {
    async fn handle_config_change(
        &self,
        key: &str,
        _value: &Value,
        correlation_id: &str,
    ) -> Result<RestartReport, ServiceError> {
        let services = self.map.services_for(key);
        let mut report = RestartReport {
            correlation_id: correlation_id.to_string(),
            success: true,
            ..Default::default()
        };

        for service in services {
            let container = self.container_name(&service);
            match self
                .docker
                .restart_container(&container, None::<bollard::query_parameters::RestartContainerOptions>)
                .await
            {
                Ok(()) => {
                    info!(correlation_id = %correlation_id, "Restarted {} after {} changed", container, key);
                    report.services_restarted.push(service);
                }
                Err(e) => {
                    let failure = ServiceError::RestartFailed {
                        service: container,
                        message: e.to_string(),
                    };
                    error!(correlation_id = %correlation_id, "{}", failure);
                    report.success = false;
                    report.errors.push(failure.to_string());
                }
            }
        }

        Ok(report)
    }
}
