//! Single-flight start/stop of the game server.
//!
//! At most one command runs at a time; a command arriving meanwhile is turned
//! away with a busy reply instead of waiting. Stopping requires positive proof
//! over RCON that nobody is online. If the check fails for any reason the stop
//! is refused.

use crate::commands::Action;
use crate::docker::{ContainerStatus, OrchestrationError, Orchestrator};
use async_trait::async_trait;
use log::{debug, info, warn};
use rcon::{RconClient, RconError};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

/// Source of the online player list used by the stop safety check.
#[async_trait]
pub trait PlayerProbe: Send + Sync {
    async fn online_players(&self, deadline: Instant) -> Result<Vec<String>, RconError>;
}

#[async_trait]
impl PlayerProbe for RconClient {
    async fn online_players(&self, deadline: Instant) -> Result<Vec<String>, RconError> {
        self.show_players(Some(deadline)).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Bound on each status and start call to the container runtime.
    pub orchestration_timeout: Duration,
    /// Budget for the RCON player check before a stop.
    pub safety_check_timeout: Duration,
    /// Shutdown time the server is given before the runtime kills it.
    pub stop_grace: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            orchestration_timeout: Duration::from_secs(15),
            safety_check_timeout: Duration::from_secs(5),
            stop_grace: Duration::from_secs(30),
        }
    }
}

/// Result of one command, rendered as the single reply line sent to chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Busy,
    StatusUnknown(String),
    NotFound,
    AlreadyRunning,
    Starting,
    StartFailed(String),
    AlreadyStopped,
    SafetyUnconfirmed,
    PlayersOnline(Vec<String>),
    Stopped,
    StopFailed(String),
    /// The process is shutting down; nothing is replied.
    Cancelled,
}

impl Outcome {
    pub fn reply(&self) -> Option<String> {
        match self {
            Outcome::Cancelled => None,
            other => Some(other.to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Outcome::StatusUnknown(_)
                | Outcome::StartFailed(_)
                | Outcome::StopFailed(_)
                | Outcome::SafetyUnconfirmed
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Busy => f.write_str("busy, try again"),
            Outcome::StatusUnknown(err) => write!(f, "error checking server status: {}", err),
            Outcome::NotFound => f.write_str("configured container was not found"),
            Outcome::AlreadyRunning => f.write_str("server is already running"),
            Outcome::Starting => f.write_str("starting Palworld server..."),
            Outcome::StartFailed(err) => write!(f, "failed to start server: {}", err),
            Outcome::AlreadyStopped => f.write_str("server is already stopped"),
            Outcome::SafetyUnconfirmed => {
                f.write_str("refused to stop: could not confirm zero players via RCON")
            }
            Outcome::PlayersOnline(players) => {
                write!(f, "abort: players are online: {}", players.join(", "))
            }
            Outcome::Stopped => f.write_str("server stopped"),
            Outcome::StopFailed(err) => write!(f, "failed to stop server: {}", err),
            Outcome::Cancelled => f.write_str("command cancelled by shutdown"),
        }
    }
}

/// Holds the busy flag; dropping it marks the controller idle again.
struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct LifecycleController<O, P> {
    orchestrator: O,
    probe: P,
    settings: ControllerSettings,
    busy: AtomicBool,
}

impl<O, P> LifecycleController<O, P>
where
    O: Orchestrator,
    P: PlayerProbe,
{
    pub fn new(orchestrator: O, probe: P, settings: ControllerSettings) -> Self {
        Self {
            orchestrator,
            probe,
            settings,
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Runs one command to completion and returns its outcome. Never blocks on
    /// another command: if one is in flight the answer is [`Outcome::Busy`].
    pub async fn handle(&self, action: Action, requester: &str, shutdown: &CancellationToken) -> Outcome {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            info!("command rejected while busy action={} sender={}", action, requester);
            return Outcome::Busy;
        };

        info!("command accepted action={} sender={}", action, requester);
        let work = async {
            match action {
                Action::Start => self.start().await,
                Action::Stop => self.stop().await,
            }
        };
        let outcome = tokio::select! {
            outcome = work => outcome,
            _ = shutdown.cancelled() => Outcome::Cancelled,
        };

        if outcome == Outcome::Cancelled {
            debug!("command abandoned on shutdown action={} sender={}", action, requester);
        } else if outcome.is_failure() {
            warn!(
                "command failed action={} sender={} outcome={:?}",
                action,
                requester,
                outcome.to_string()
            );
        } else {
            info!(
                "command finished action={} sender={} outcome={:?}",
                action,
                requester,
                outcome.to_string()
            );
        }
        outcome
    }

    async fn start(&self) -> Outcome {
        let status = match self.status().await {
            Ok(status) => status,
            Err(e) => return Outcome::StatusUnknown(e.to_string()),
        };
        if !status.exists {
            return Outcome::NotFound;
        }
        if status.running {
            return Outcome::AlreadyRunning;
        }

        let limit = self.settings.orchestration_timeout;
        match bounded("start", limit, self.orchestrator.start()).await {
            Ok(()) => Outcome::Starting,
            Err(e) => Outcome::StartFailed(e.to_string()),
        }
    }

    async fn stop(&self) -> Outcome {
        let status = match self.status().await {
            Ok(status) => status,
            Err(e) => return Outcome::StatusUnknown(e.to_string()),
        };
        if !status.exists {
            return Outcome::NotFound;
        }
        if !status.running {
            return Outcome::AlreadyStopped;
        }

        let players = match self.online_players().await {
            Ok(players) => players,
            Err(e) => {
                warn!("rcon check failed; stop aborted err={}", e);
                return Outcome::SafetyUnconfirmed;
            }
        };
        if !players.is_empty() {
            return Outcome::PlayersOnline(players);
        }

        let grace = self.settings.stop_grace;
        let limit = grace + self.settings.orchestration_timeout;
        match bounded("stop", limit, self.orchestrator.stop(grace)).await {
            Ok(()) => Outcome::Stopped,
            Err(e) => Outcome::StopFailed(e.to_string()),
        }
    }

    async fn status(&self) -> Result<ContainerStatus, OrchestrationError> {
        let status = bounded(
            "status",
            self.settings.orchestration_timeout,
            self.orchestrator.status(),
        )
        .await?;
        debug!(
            "container status exists={} running={} state={}",
            status.exists, status.running, status.state
        );
        Ok(status)
    }

    async fn online_players(&self) -> Result<Vec<String>, RconError> {
        let started = Instant::now();
        let deadline = started + self.settings.safety_check_timeout;
        match timeout_at(deadline, self.probe.online_players(deadline)).await {
            Ok(result) => result,
            Err(_) => Err(RconError::Timeout {
                stage: "player check",
                elapsed: started.elapsed(),
            }),
        }
    }
}

async fn bounded<T, F>(action: &'static str, limit: Duration, call: F) -> Result<T, OrchestrationError>
where
    F: Future<Output = Result<T, OrchestrationError>>,
{
    timeout(limit, call)
        .await
        .unwrap_or(Err(OrchestrationError::Timeout {
            action,
            after: limit,
        }))
}
