//! Container orchestration: inspect, start and stop the game server's container.

use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, StartContainerOptions, StopContainerOptions};
use bollard::errors::Error as BollardError;
use bollard::Docker;
use log::debug;
use std::time::Duration;
use thiserror::Error;

const FALLBACK_STOP_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerStatus {
    pub exists: bool,
    pub running: bool,
    /// Daemon-reported state such as `running` or `exited`; empty when unknown.
    pub state: String,
}

impl ContainerStatus {
    pub fn missing() -> Self {
        Self::default()
    }
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("create docker client: {0}")]
    Connect(String),

    #[error("{action} container {container:?}: {message}")]
    Request {
        action: &'static str,
        container: String,
        message: String,
    },

    #[error("{action} timed out after {after:?}")]
    Timeout {
        action: &'static str,
        after: Duration,
    },
}

/// Narrow view of the container runtime, keyed by one configured container.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn status(&self) -> Result<ContainerStatus, OrchestrationError>;
    async fn start(&self) -> Result<(), OrchestrationError>;
    async fn stop(&self, grace: Duration) -> Result<(), OrchestrationError>;
}

pub struct DockerController {
    docker: Docker,
    container: String,
}

impl DockerController {
    /// Connects using `DOCKER_HOST` or the platform's default socket.
    pub fn connect(container: impl Into<String>) -> Result<Self, OrchestrationError> {
        let container = container.into();
        if container.trim().is_empty() {
            return Err(OrchestrationError::Connect(
                "container name is required".to_string(),
            ));
        }

        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| OrchestrationError::Connect(e.to_string()))?;
        Ok(Self { docker, container })
    }

    fn request_error(&self, action: &'static str, err: BollardError) -> OrchestrationError {
        OrchestrationError::Request {
            action,
            container: self.container.clone(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl Orchestrator for DockerController {
    async fn status(&self) -> Result<ContainerStatus, OrchestrationError> {
        let inspect = match self
            .docker
            .inspect_container(&self.container, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect,
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(ContainerStatus::missing()),
            Err(e) => return Err(self.request_error("inspect", e)),
        };

        let (running, state) = inspect
            .state
            .map(|state| {
                (
                    state.running.unwrap_or(false),
                    state.status.map(|s| s.to_string()).unwrap_or_default(),
                )
            })
            .unwrap_or_default();

        debug!(
            "container inspected name={} state={} running={}",
            self.container, state, running
        );
        Ok(ContainerStatus {
            exists: true,
            running,
            state,
        })
    }

    async fn start(&self) -> Result<(), OrchestrationError> {
        self.docker
            .start_container(&self.container, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| self.request_error("start", e))
    }

    async fn stop(&self, grace: Duration) -> Result<(), OrchestrationError> {
        let options = StopContainerOptions {
            t: grace_seconds(grace),
        };
        self.docker
            .stop_container(&self.container, Some(options))
            .await
            .map_err(|e| self.request_error("stop", e))
    }
}

/// Whole seconds for the daemon's stop timeout; under a second means the fallback.
fn grace_seconds(grace: Duration) -> i64 {
    let grace = if grace < Duration::from_secs(1) {
        FALLBACK_STOP_GRACE
    } else {
        grace
    };
    i64::try_from(grace.as_secs()).unwrap_or(i64::MAX)
}
