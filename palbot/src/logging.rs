//! Logger setup. Messages carry their structured fields as a `key=value` tail.

use log::LevelFilter;
use std::io::Write;

/// Maps a `LOG_LEVEL` value onto a filter; anything unrecognised means info.
pub fn parse_level(raw: &str) -> LevelFilter {
    match raw.trim().to_ascii_lowercase().as_str() {
        "debug" => LevelFilter::Debug,
        "warn" | "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

/// Installs the global logger. `RUST_LOG`, when set, overrides `level`.
pub fn init(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_env("RUST_LOG")
        .format(|buf, record| {
            writeln!(
                buf,
                "{} level={} target={} msg={}",
                buf.timestamp_millis(),
                record.level().as_str().to_ascii_lowercase(),
                record.target(),
                record.args()
            )
        })
        .try_init()
}
