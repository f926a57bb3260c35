//! # RCON Client
//!
//! A small client for the binary remote-console protocol spoken by game
//! servers such as Palworld. It covers exactly what a lifecycle bot needs:
//! authenticate, run one administrative command, read back the reply.
//!
//! ## Module Organization
//!
//! ### Packet Module (`packet`)
//! Length-prefixed little-endian frames carrying an id, a type tag and a
//! null-terminated body. Decoding validates the declared length before
//! reading anything else, so a corrupt prefix is reported as a framing error
//! instead of swallowing the following frame.
//!
//! ### Client Module (`client`)
//! Each call dials a fresh TCP connection, authenticates, sends one command
//! and assembles the reply. Replies may be split over several packets and the
//! protocol never says when the last one was sent, so the session keeps
//! reading until the connection has been quiet for a short window.
//!
//! ### Players Module (`players`)
//! Pure parsing of the `ShowPlayers` reply into display names.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use rcon::RconClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RconClient::new("127.0.0.1", 25575, "secret", Duration::from_secs(5));
//!     let players = client.show_players(None).await?;
//!     println!("{} online", players.len());
//!     Ok(())
//! }
//! ```

pub mod client;
mod error;
pub mod packet;
pub mod players;

pub use client::{RconClient, Session};
pub use error::RconError;
pub use packet::{read_packet, write_packet, Packet, PacketType};
pub use players::{parse_player_list, SHOW_PLAYERS};
