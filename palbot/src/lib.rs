//! # Palworld Server Bot
//!
//! Lets a small group of trusted people start and stop a Palworld dedicated
//! server from a Matrix room. The server runs in a Docker container; before
//! it is stopped, the bot asks the game over RCON who is online and refuses
//! to stop while anyone is playing.
//!
//! ## Core Responsibilities
//!
//! ### Safe Shutdown
//! A stop is only issued after an RCON `ShowPlayers` query positively reports
//! an empty server. A failed, rejected or timed-out query counts as "players
//! might be online" and the stop is refused.
//!
//! ### One Command at a Time
//! The controller runs a single command at a time. A second command that
//! arrives meanwhile is answered with "busy, try again" right away; nothing
//! is queued.
//!
//! ### Bounded Operations
//! Every Docker call and every RCON exchange runs under an explicit timeout,
//! and process shutdown abandons in-flight work promptly.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Flags with environment-variable fallbacks, trimmed and validated up front.
//!
//! ### Commands Module (`commands`)
//! Recognises `!startpal` and `!stoppal` (the prefix is configurable).
//!
//! ### Docker Module (`docker`)
//! The `Orchestrator` trait and its Docker implementation for one container.
//!
//! ### Controller Module (`controller`)
//! The single-flight lifecycle controller and its reply texts.
//!
//! ### Matrix Module (`matrix`)
//! Login, filtered long-poll sync of the command room, and sending replies.
//! Each recognised command is handled on its own task.
//!
//! ### Logging Module (`logging`)
//! `env_logger` setup driven by `LOG_LEVEL`.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use palbot::controller::{ControllerSettings, LifecycleController};
//! use palbot::commands::Action;
//! use palbot::docker::DockerController;
//! use rcon::RconClient;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let docker = DockerController::connect("Palworld")?;
//!     let rcon = RconClient::new("127.0.0.1", 25575, "secret", Duration::from_secs(5));
//!     let controller = LifecycleController::new(docker, rcon, ControllerSettings::default());
//!
//!     let outcome = controller
//!         .handle(Action::Stop, "@admin:example.org", &CancellationToken::new())
//!         .await;
//!     println!("{}", outcome);
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod config;
pub mod controller;
pub mod docker;
pub mod logging;
pub mod matrix;
