//! The slice of the Matrix client-server API the bot uses.

use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Extra time allowed on top of the server-side long-poll timeout.
const SYNC_SLACK: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus { status: StatusCode, body: String },

    #[error("invalid homeserver url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Protocol(String),
}

impl MatrixError {
    /// True when retrying cannot help: the homeserver refused the access token.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MatrixError::UnexpectedStatus { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
struct WhoamiResponse {
    user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: Rooms,
}

#[derive(Debug, Default, Deserialize)]
pub struct Rooms {
    #[serde(default)]
    pub join: HashMap<String, JoinedRoom>,
}

#[derive(Debug, Default, Deserialize)]
pub struct JoinedRoom {
    #[serde(default)]
    pub timeline: Timeline,
}

#[derive(Debug, Default, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub events: Vec<RoomEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub sender: String,
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageContent {
    pub msgtype: String,
    pub body: String,
}

impl SyncResponse {
    /// Timeline events of one joined room, oldest first.
    pub fn room_events(&self, room_id: &str) -> &[RoomEvent] {
        self.rooms
            .join
            .get(room_id)
            .map(|room| room.timeline.events.as_slice())
            .unwrap_or_default()
    }
}

/// Sync filter limiting timelines to message events in one room.
pub fn room_filter(room_id: &str) -> String {
    json!({
        "room": {
            "rooms": [room_id],
            "timeline": { "types": ["m.room.message"] },
        },
    })
    .to_string()
}

#[derive(Clone)]
pub struct MatrixClient {
    http: Client,
    homeserver: Url,
    access_token: String,
    txn_prefix: String,
    txn_counter: Arc<AtomicU64>,
}

impl MatrixClient {
    pub fn new(homeserver: &str, access_token: impl Into<String>) -> Result<Self, MatrixError> {
        let homeserver = parse_homeserver(homeserver)?;
        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_millis();

        Ok(Self {
            http: Client::builder().connect_timeout(REQUEST_TIMEOUT).build()?,
            homeserver,
            access_token: access_token.into(),
            txn_prefix: format!("palbot{}", started),
            txn_counter: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Password login. Only needed when no access token is configured or saved.
    pub async fn login(homeserver: &str, user: &str, password: &str) -> Result<LoginResponse, MatrixError> {
        let url = endpoint(&parse_homeserver(homeserver)?, &["login"])?;
        let body = json!({
            "type": "m.login.password",
            "identifier": { "type": "m.id.user", "user": user },
            "password": password,
            "initial_device_display_name": "palbot",
        });

        let res = Client::new()
            .post(url)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        Ok(check(res).await?.json::<LoginResponse>().await?)
    }

    pub async fn whoami(&self) -> Result<String, MatrixError> {
        let url = endpoint(&self.homeserver, &["account", "whoami"])?;
        let res = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Ok(check(res).await?.json::<WhoamiResponse>().await?.user_id)
    }

    /// Long-polls for new events after `since`; without `since` it returns the
    /// current position immediately.
    pub async fn sync(
        &self,
        since: Option<&str>,
        filter: &str,
        wait: Duration,
    ) -> Result<SyncResponse, MatrixError> {
        let url = endpoint(&self.homeserver, &["sync"])?;
        let mut query: Vec<(&str, String)> = vec![
            ("filter", filter.to_string()),
            ("timeout", wait.as_millis().to_string()),
        ];
        if let Some(since) = since {
            query.push(("since", since.to_string()));
        }

        let res = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&query)
            .timeout(wait + SYNC_SLACK)
            .send()
            .await?;
        Ok(check(res).await?.json::<SyncResponse>().await?)
    }

    pub async fn send_text(&self, room_id: &str, text: &str) -> Result<(), MatrixError> {
        let txn_id = self.next_txn_id();
        let url = endpoint(
            &self.homeserver,
            &["rooms", room_id, "send", "m.room.message", &txn_id],
        )?;
        let content = MessageContent {
            msgtype: "m.text".to_string(),
            body: text.to_string(),
        };

        let res = self
            .http
            .put(url)
            .bearer_auth(&self.access_token)
            .timeout(REQUEST_TIMEOUT)
            .json(&content)
            .send()
            .await?;
        check(res).await?;
        Ok(())
    }

    fn next_txn_id(&self) -> String {
        let n = self.txn_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}.{}", self.txn_prefix, n)
    }
}

fn parse_homeserver(raw: &str) -> Result<Url, MatrixError> {
    let url = Url::parse(raw.trim()).map_err(|e| MatrixError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(MatrixError::InvalidUrl {
            url: raw.to_string(),
            reason: "not a base url".to_string(),
        });
    }
    Ok(url)
}

/// Builds `<homeserver>/_matrix/client/v3/<segments...>`, percent-encoding each segment.
fn endpoint(homeserver: &Url, segments: &[&str]) -> Result<Url, MatrixError> {
    let mut url = homeserver.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| MatrixError::InvalidUrl {
            url: homeserver.to_string(),
            reason: "not a base url".to_string(),
        })?;
        path.pop_if_empty()
            .extend(["_matrix", "client", "v3"])
            .extend(segments);
    }
    Ok(url)
}

async fn check(res: Response) -> Result<Response, MatrixError> {
    if res.status().is_success() {
        Ok(res)
    } else {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        Err(MatrixError::UnexpectedStatus { status, body })
    }
}
