use std::fmt;

const DEFAULT_PREFIX: &str = "!";

/// Lifecycle action requested from chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Start => f.write_str("startpal"),
            Action::Stop => f.write_str("stoppal"),
        }
    }
}

/// Recognises `<prefix>startpal` and `<prefix>stoppal`, case-insensitively.
/// Anything after the command word is ignored.
pub fn parse(body: &str, prefix: &str) -> Option<Action> {
    let trimmed = body.trim();
    let prefix = if prefix.is_empty() { DEFAULT_PREFIX } else { prefix };

    let rest = trimmed.strip_prefix(prefix)?;
    let word = rest.split_whitespace().next()?;

    match word.to_lowercase().as_str() {
        "startpal" => Some(Action::Start),
        "stoppal" => Some(Action::Stop),
        _ => None,
    }
}
