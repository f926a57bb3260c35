use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failures of a single RCON exchange. None of them are retried by the session.
#[derive(Debug, Error)]
pub enum RconError {
    #[error("dial rcon {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("rcon auth failed")]
    AuthFailed,

    #[error("rcon auth failed: no auth response packet")]
    AuthNoAck,

    #[error("rcon command rejected")]
    CommandRejected,

    #[error("malformed rcon packet: {0}")]
    Framing(String),

    #[error("rcon {stage} timed out after {elapsed:?}")]
    Timeout {
        stage: &'static str,
        elapsed: Duration,
    },

    #[error("rcon transport error: {0}")]
    Io(#[from] io::Error),
}
