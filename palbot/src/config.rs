//! Runtime configuration, read from command-line flags or their environment variables.

use crate::controller::ControllerSettings;
use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("ALLOWED_MXIDS must include at least one MXID")]
    EmptyAllowlist,

    #[error("set MATRIX_ACCESS_TOKEN or both MATRIX_USER and MATRIX_PASSWORD")]
    NoCredentials,

    #[error("invalid RCON_PORT: {0}")]
    InvalidPort(u16),

    #[error("COMMAND_PREFIX must not be empty")]
    EmptyPrefix,

    #[error("RCON_TIMEOUT_SECS must be at least 1")]
    ZeroTimeout,

    #[error("STOP_GRACE_SECS ({grace}) must be longer than RCON_TIMEOUT_SECS ({rcon})")]
    GraceTooShort { grace: u64, rcon: u64 },
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Starts and stops a Palworld server from a Matrix room", long_about = None)]
pub struct Config {
    /// Matrix homeserver base URL
    #[arg(long, env = "MATRIX_HOMESERVER")]
    pub matrix_homeserver: Option<String>,

    /// Access token; if unset, a saved token or password login is used
    #[arg(long, env = "MATRIX_ACCESS_TOKEN", hide_env_values = true)]
    pub matrix_access_token: Option<String>,

    #[arg(long, env = "MATRIX_USER")]
    pub matrix_user: Option<String>,

    #[arg(long, env = "MATRIX_PASSWORD", hide_env_values = true)]
    pub matrix_password: Option<String>,

    /// Bot's own user id; resolved with /whoami when unset
    #[arg(long, env = "MATRIX_USER_ID")]
    pub matrix_user_id: Option<String>,

    /// The one room commands are accepted from
    #[arg(long, env = "MATRIX_ROOM_ID")]
    pub matrix_room_id: Option<String>,

    /// Comma-separated user ids allowed to issue commands
    #[arg(long, env = "ALLOWED_MXIDS", value_delimiter = ',')]
    pub allowed_mxids: Vec<String>,

    #[arg(long, env = "DOCKER_CONTAINER_NAME", default_value = "Palworld")]
    pub docker_container_name: String,

    #[arg(long, env = "RCON_HOST", default_value = "127.0.0.1")]
    pub rcon_host: String,

    #[arg(long, env = "RCON_PORT", default_value = "25575")]
    pub rcon_port: u16,

    #[arg(long, env = "RCON_PASS", hide_env_values = true)]
    pub rcon_pass: Option<String>,

    /// Upper bound for one RCON exchange, used as the stop safety check budget
    #[arg(long, env = "RCON_TIMEOUT_SECS", default_value = "5")]
    pub rcon_timeout_secs: u64,

    /// Time the game server gets to shut down before it is killed
    #[arg(long, env = "STOP_GRACE_SECS", default_value = "30")]
    pub stop_grace_secs: u64,

    #[arg(long, env = "COMMAND_PREFIX", default_value = "!")]
    pub command_prefix: String,

    /// Directory for the sync token and saved access token
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// debug, info, warn or error
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Trims every text field and checks the settings the bot cannot run without.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        for field in [
            &mut self.matrix_homeserver,
            &mut self.matrix_access_token,
            &mut self.matrix_user,
            &mut self.matrix_password,
            &mut self.matrix_user_id,
            &mut self.matrix_room_id,
            &mut self.rcon_pass,
        ] {
            *field = field
                .take()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty());
        }
        self.allowed_mxids = self
            .allowed_mxids
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        self.docker_container_name = self.docker_container_name.trim().to_string();
        self.rcon_host = self.rcon_host.trim().to_string();
        self.command_prefix = self.command_prefix.trim().to_string();

        if self.matrix_homeserver.is_none() {
            return Err(ConfigError::Missing("MATRIX_HOMESERVER"));
        }
        if self.matrix_room_id.is_none() {
            return Err(ConfigError::Missing("MATRIX_ROOM_ID"));
        }
        if self.allowed_mxids.is_empty() {
            return Err(ConfigError::EmptyAllowlist);
        }
        if self.matrix_access_token.is_none()
            && (self.matrix_user.is_none() || self.matrix_password.is_none())
        {
            return Err(ConfigError::NoCredentials);
        }
        if self.docker_container_name.is_empty() {
            return Err(ConfigError::Missing("DOCKER_CONTAINER_NAME"));
        }
        if self.rcon_pass.is_none() {
            return Err(ConfigError::Missing("RCON_PASS"));
        }
        if self.rcon_port == 0 {
            return Err(ConfigError::InvalidPort(self.rcon_port));
        }
        if self.command_prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }
        if self.rcon_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.stop_grace_secs <= self.rcon_timeout_secs {
            return Err(ConfigError::GraceTooShort {
                grace: self.stop_grace_secs,
                rcon: self.rcon_timeout_secs,
            });
        }

        Ok(self)
    }

    pub fn allowed_senders(&self) -> HashSet<String> {
        self.allowed_mxids.iter().cloned().collect()
    }

    pub fn sync_token_path(&self) -> PathBuf {
        self.data_dir.join("sync.token")
    }

    pub fn access_token_path(&self) -> PathBuf {
        self.data_dir.join("matrix_access.token")
    }

    pub fn rcon_timeout(&self) -> Duration {
        Duration::from_secs(self.rcon_timeout_secs)
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            safety_check_timeout: self.rcon_timeout(),
            stop_grace: Duration::from_secs(self.stop_grace_secs),
            ..ControllerSettings::default()
        }
    }
}
