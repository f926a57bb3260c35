//! Matrix transport: receives commands from one room and posts the replies.

pub mod api;
pub mod store;

use crate::commands::{self, Action};
use crate::config::Config;
use crate::controller::{LifecycleController, PlayerProbe};
use crate::docker::Orchestrator;
use api::{room_filter, MatrixClient, MatrixError, MessageContent, RoomEvent};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use store::{read_secret_file, write_secret_file, FileSyncStore};
use tokio_util::sync::CancellationToken;

const SYNC_WAIT: Duration = Duration::from_secs(30);
const SYNC_RETRY_DELAY: Duration = Duration::from_secs(5);
const TEXT_MSGTYPES: [&str; 3] = ["m.text", "m.notice", "m.emote"];

/// Decides which room events are commands.
#[derive(Debug, Clone)]
pub struct CommandFilter {
    pub room_id: String,
    pub self_user: String,
    pub allowed: HashSet<String>,
    pub prefix: String,
}

impl CommandFilter {
    /// Returns the requested action for an accepted message event. Events from
    /// the bot itself or from senders off the allow-list are ignored.
    pub fn accept(&self, room_id: &str, event: &RoomEvent) -> Option<Action> {
        if room_id != self.room_id || event.kind != "m.room.message" {
            return None;
        }
        if event.sender == self.self_user || !self.allowed.contains(&event.sender) {
            return None;
        }

        let content: MessageContent = match serde_json::from_value(event.content.clone()) {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    "failed parsing matrix event content event_id={} err={}",
                    event.event_id, e
                );
                return None;
            }
        };
        if !TEXT_MSGTYPES.contains(&content.msgtype.as_str()) {
            return None;
        }

        commands::parse(&content.body, &self.prefix)
    }
}

pub struct Bot<O, P> {
    client: MatrixClient,
    controller: Arc<LifecycleController<O, P>>,
    filter: CommandFilter,
    store: FileSyncStore,
}

impl<O, P> Bot<O, P>
where
    O: Orchestrator + 'static,
    P: PlayerProbe + 'static,
{
    /// Resolves credentials and the bot's own user id, then prepares the sync store.
    pub async fn connect(config: &Config, controller: Arc<LifecycleController<O, P>>) -> Result<Self, MatrixError> {
        std::fs::create_dir_all(&config.data_dir)?;

        let homeserver = config
            .matrix_homeserver
            .as_deref()
            .ok_or_else(|| MatrixError::Protocol("MATRIX_HOMESERVER is required".to_string()))?;
        let room_id = config
            .matrix_room_id
            .clone()
            .ok_or_else(|| MatrixError::Protocol("MATRIX_ROOM_ID is required".to_string()))?;

        let access_token = resolve_access_token(config, homeserver).await?;
        let client = MatrixClient::new(homeserver, access_token)?;

        let self_user = match config.matrix_user_id.clone() {
            Some(user_id) => user_id,
            None => client.whoami().await?,
        };

        Ok(Self {
            client,
            controller,
            filter: CommandFilter {
                room_id,
                self_user,
                allowed: config.allowed_senders(),
                prefix: config.command_prefix.clone(),
            },
            store: FileSyncStore::new(config.sync_token_path()),
        })
    }

    /// Runs the sync loop until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), MatrixError> {
        let filter = room_filter(&self.filter.room_id);
        let mut since = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            token = self.bootstrap_sync_token(&filter) => token?,
        };

        info!(
            "matrix sync started room_id={} user_id={}",
            self.filter.room_id, self.filter.self_user
        );

        loop {
            let result = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                result = self.client.sync(Some(since.as_str()), &filter, SYNC_WAIT) => result,
            };

            match result {
                Ok(batch) => {
                    for event in batch.room_events(&self.filter.room_id) {
                        if let Some(action) = self.filter.accept(&self.filter.room_id, event) {
                            self.dispatch(action, event.sender.clone(), &shutdown);
                        }
                    }
                    if let Err(e) = self.store.save_next_batch(&batch.next_batch) {
                        warn!(
                            "failed saving sync token path={} err={}",
                            self.store.path().display(),
                            e
                        );
                    }
                    since = batch.next_batch;
                }
                Err(e) if e.is_fatal() => {
                    error!("matrix sync refused, giving up err={}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("matrix sync failed err={}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(SYNC_RETRY_DELAY) => {}
                    }
                }
            }
        }
    }

    /// Returns the saved sync token, or takes the current position from an
    /// initial sync without handling its events, so old commands never replay.
    async fn bootstrap_sync_token(&self, filter: &str) -> Result<String, MatrixError> {
        if let Some(token) = self.store.load_next_batch()? {
            return Ok(token);
        }

        let initial = self.client.sync(None, filter, Duration::ZERO).await?;
        if initial.next_batch.is_empty() {
            return Err(MatrixError::Protocol(
                "initial sync returned empty next_batch".to_string(),
            ));
        }
        self.store.save_next_batch(&initial.next_batch)?;
        info!("initialized sync token without replay");
        Ok(initial.next_batch)
    }

    /// Handles the command on its own task so the sync loop keeps running and
    /// a concurrent command can be turned away as busy.
    fn dispatch(&self, action: Action, sender: String, shutdown: &CancellationToken) {
        let controller = Arc::clone(&self.controller);
        let client = self.client.clone();
        let room_id = self.filter.room_id.clone();
        let shutdown = shutdown.clone();

        debug!("dispatching command action={} sender={}", action, sender);
        tokio::spawn(async move {
            let outcome = controller.handle(action, &sender, &shutdown).await;
            if let Some(text) = outcome.reply() {
                if let Err(e) = client.send_text(&room_id, &text).await {
                    error!("failed sending matrix message err={}", e);
                }
            }
        });
    }
}

/// Configured token first, then the saved one, then a password login whose
/// token is saved for the next start.
async fn resolve_access_token(config: &Config, homeserver: &str) -> Result<String, MatrixError> {
    if let Some(token) = &config.matrix_access_token {
        return Ok(token.clone());
    }

    let path = config.access_token_path();
    if let Some(token) = read_secret_file(&path) {
        debug!("using saved access token path={}", path.display());
        return Ok(token);
    }

    let (Some(user), Some(password)) = (&config.matrix_user, &config.matrix_password) else {
        return Err(MatrixError::Protocol(
            "set MATRIX_ACCESS_TOKEN or both MATRIX_USER and MATRIX_PASSWORD".to_string(),
        ));
    };

    let login = MatrixClient::login(homeserver, user, password).await?;
    write_secret_file(&path, format!("{}\n", login.access_token).as_bytes())?;
    info!("matrix password login succeeded user_id={}", login.user_id);
    Ok(login.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter() -> CommandFilter {
        CommandFilter {
            room_id: "!room:x".to_string(),
            self_user: "@palbot:x".to_string(),
            allowed: ["@alice:x".to_string(), "@palbot:x".to_string()]
                .into_iter()
                .collect(),
            prefix: "!".to_string(),
        }
    }

    fn message(sender: &str, msgtype: &str, body: &str) -> RoomEvent {
        RoomEvent {
            kind: "m.room.message".to_string(),
            sender: sender.to_string(),
            event_id: "$e".to_string(),
            content: json!({ "msgtype": msgtype, "body": body }),
        }
    }

    #[test]
    fn test_accepts_allowed_sender() {
        let event = message("@alice:x", "m.text", "!startpal");
        assert_eq!(filter().accept("!room:x", &event), Some(Action::Start));
    }

    #[test]
    fn test_accepts_notice() {
        let event = message("@alice:x", "m.notice", "!stoppal");
        assert_eq!(filter().accept("!room:x", &event), Some(Action::Stop));
    }

    #[test]
    fn test_ignores_other_room() {
        let event = message("@alice:x", "m.text", "!startpal");
        assert_eq!(filter().accept("!elsewhere:x", &event), None);
    }

    #[test]
    fn test_ignores_own_messages() {
        let event = message("@palbot:x", "m.text", "!startpal");
        assert_eq!(filter().accept("!room:x", &event), None);
    }

    #[test]
    fn test_ignores_unlisted_sender() {
        let event = message("@mallory:x", "m.text", "!stoppal");
        assert_eq!(filter().accept("!room:x", &event), None);
    }

    #[test]
    fn test_ignores_non_text_messages() {
        let event = message("@alice:x", "m.image", "!stoppal");
        assert_eq!(filter().accept("!room:x", &event), None);
    }

    #[test]
    fn test_ignores_malformed_content() {
        let mut event = message("@alice:x", "m.text", "!stoppal");
        event.content = json!({ "body": 5 });
        assert_eq!(filter().accept("!room:x", &event), None);
    }

    #[test]
    fn test_ignores_chatter() {
        let event = message("@alice:x", "m.text", "anyone up for a game?");
        assert_eq!(filter().accept("!room:x", &event), None);
    }

    #[test]
    fn test_ignores_other_event_types() {
        let mut event = message("@alice:x", "m.text", "!startpal");
        event.kind = "m.reaction".to_string();
        assert_eq!(filter().accept("!room:x", &event), None);
    }
}
