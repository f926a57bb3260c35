//! One-shot RCON exchanges: connect, authenticate, run one command, collect the reply.

use crate::error::RconError;
use crate::packet::{read_packet, write_packet, Packet, PacketType};
use crate::players::{parse_player_list, SHOW_PLAYERS};
use log::debug;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the connection must stay silent before a multi-packet reply is
/// considered complete. The protocol has no end-of-response marker, so a
/// fragment arriving later than this is lost.
pub const TRAILING_SILENCE: Duration = Duration::from_millis(150);

/// Packets read while waiting for the auth acknowledgment. Servers may send
/// an empty response value first; the bound itself is a heuristic.
pub const AUTH_ACK_READ_AHEAD: usize = 3;

const AUTH_REQUEST_ID: i32 = 1;
const COMMAND_REQUEST_ID: i32 = 2;
const REJECTED_ID: i32 = -1;

/// Connection settings for a game server's RCON port. Holds no connection;
/// every call dials a fresh one.
#[derive(Debug, Clone)]
pub struct RconClient {
    host: String,
    port: u16,
    password: String,
    timeout: Duration,
}

impl RconClient {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>, timeout: Duration) -> Self {
        let timeout = if timeout.is_zero() { DEFAULT_TIMEOUT } else { timeout };
        Self {
            host: host.into(),
            port,
            password: password.into(),
            timeout,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Lists players currently online.
    pub async fn show_players(&self, deadline: Option<Instant>) -> Result<Vec<String>, RconError> {
        let response = self.execute(SHOW_PLAYERS, deadline).await?;
        Ok(parse_player_list(&response))
    }

    /// Runs one command and returns the full reply text.
    ///
    /// The whole exchange shares one deadline: the configured timeout, or the
    /// caller's deadline if that comes first. The connection is closed on every
    /// return path.
    pub async fn execute(&self, command: &str, deadline: Option<Instant>) -> Result<String, RconError> {
        let started = Instant::now();
        let mut effective = started + self.timeout;
        if let Some(caller) = deadline {
            effective = effective.min(caller);
        }

        let addr = self.addr();
        let stream = match timeout_at(effective, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(RconError::Dial { addr, source }),
            Err(_) => {
                return Err(RconError::Dial {
                    addr,
                    source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                })
            }
        };
        debug!("rcon connected addr={}", addr);

        let mut session = Session::new(stream, effective);
        session.authenticate(&self.password).await?;
        session.run(command).await
    }
}

/// A single authenticated exchange over an exclusively owned stream.
pub struct Session<S> {
    stream: S,
    deadline: Instant,
    started: Instant,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, deadline: Instant) -> Self {
        Self {
            stream,
            deadline,
            started: Instant::now(),
        }
    }

    pub async fn authenticate(&mut self, password: &str) -> Result<(), RconError> {
        let auth = Packet::new(AUTH_REQUEST_ID, PacketType::Auth, password);
        within(self.deadline, self.started, "auth request", write_packet(&mut self.stream, &auth)).await?;

        for _ in 0..AUTH_ACK_READ_AHEAD {
            let packet = within(
                self.deadline,
                self.started,
                "auth response",
                read_packet(&mut self.stream),
            )
            .await?;

            if packet.kind != PacketType::ExecCommand {
                debug!("rcon skipping pre-auth packet id={} type={:?}", packet.id, packet.kind);
                continue;
            }
            if packet.id == REJECTED_ID {
                return Err(RconError::AuthFailed);
            }
            return Ok(());
        }

        Err(RconError::AuthNoAck)
    }

    /// Sends `command` and assembles its reply. Consumes the session so the
    /// stream is closed when this returns.
    pub async fn run(mut self, command: &str) -> Result<String, RconError> {
        let request = Packet::new(COMMAND_REQUEST_ID, PacketType::ExecCommand, command);
        within(
            self.deadline,
            self.started,
            "command request",
            write_packet(&mut self.stream, &request),
        )
        .await?;

        let first = within(
            self.deadline,
            self.started,
            "command response",
            read_packet(&mut self.stream),
        )
        .await?;
        if first.id == REJECTED_ID {
            return Err(RconError::CommandRejected);
        }

        let mut response = String::new();
        if first.kind == PacketType::ResponseValue {
            response.push_str(&first.body);
        }

        let mut fragments = 1;
        loop {
            let silence_ends = (Instant::now() + TRAILING_SILENCE).min(self.deadline);
            let next = match timeout_at(silence_ends, read_packet(&mut self.stream)).await {
                Err(_) => break,
                Ok(result) => result?,
            };

            if next.kind == PacketType::ResponseValue {
                if !response.is_empty() && !response.ends_with('\n') {
                    response.push('\n');
                }
                response.push_str(&next.body);
                fragments += 1;
            }
        }

        debug!(
            "rcon response assembled fragments={} bytes={}",
            fragments,
            response.len()
        );
        Ok(response)
    }
}

/// Runs one step of the exchange under the session deadline.
async fn within<T, F>(deadline: Instant, started: Instant, stage: &'static str, step: F) -> Result<T, RconError>
where
    F: Future<Output = Result<T, RconError>>,
{
    match timeout_at(deadline, step).await {
        Ok(result) => result,
        Err(_) => Err(RconError::Timeout {
            stage,
            elapsed: started.elapsed(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    fn ack(id: i32) -> Vec<u8> {
        Packet::new(id, PacketType::ExecCommand, "").encode()
    }

    fn value(id: i32, body: &str) -> Vec<u8> {
        Packet::new(id, PacketType::ResponseValue, body).encode()
    }

    /// Plays the server side: answers the auth request and the command with
    /// the given frames, then holds the connection open without writing.
    async fn serve(mut server: DuplexStream, auth_reply: Vec<Vec<u8>>, command_reply: Vec<Vec<u8>>) {
        use tokio::io::AsyncWriteExt;

        let auth = read_packet(&mut server).await.unwrap();
        assert_eq!(auth.kind, PacketType::Auth);
        assert_eq!(auth.id, AUTH_REQUEST_ID);
        for frame in auth_reply {
            server.write_all(&frame).await.unwrap();
        }

        let Ok(command) = read_packet(&mut server).await else {
            return;
        };
        assert_eq!(command.kind, PacketType::ExecCommand);
        assert_eq!(command.id, COMMAND_REQUEST_ID);
        for frame in command_reply {
            server.write_all(&frame).await.unwrap();
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    async fn exchange(
        auth_reply: Vec<Vec<u8>>,
        command_reply: Vec<Vec<u8>>,
    ) -> Result<String, RconError> {
        let (client, server) = duplex(8192);
        let server_task = tokio::spawn(serve(server, auth_reply, command_reply));

        let mut session = Session::new(client, Instant::now() + Duration::from_secs(1));
        let result = match session.authenticate("pw").await {
            Ok(()) => session.run("ShowPlayers").await,
            Err(e) => Err(e),
        };
        server_task.abort();
        result
    }

    #[tokio::test]
    async fn test_single_packet_reply() {
        let reply = exchange(vec![ack(1)], vec![value(2, "name,playeruid,steamid\n")]).await;
        assert_eq!(reply.unwrap(), "name,playeruid,steamid\n");
    }

    #[tokio::test]
    async fn test_fragmented_reply_is_joined_with_newlines() {
        let reply = exchange(
            vec![ack(1)],
            vec![
                value(2, "name,playeruid,steamid"),
                value(2, "Alice,uid1,steam1\n"),
                value(2, "Bob,uid2,steam2"),
            ],
        )
        .await
        .unwrap();

        assert_eq!(
            reply,
            "name,playeruid,steamid\nAlice,uid1,steam1\nBob,uid2,steam2"
        );
    }

    #[tokio::test]
    async fn test_auth_ack_preceded_by_noise() {
        let reply = exchange(vec![value(1, ""), ack(1)], vec![value(2, "ok")]).await;
        assert_eq!(reply.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_auth_rejected() {
        let err = exchange(vec![value(-1, ""), ack(-1)], vec![]).await.unwrap_err();
        assert!(matches!(err, RconError::AuthFailed));
    }

    #[tokio::test]
    async fn test_auth_without_ack_after_read_ahead() {
        let noise = vec![value(1, ""), value(1, ""), value(1, ""), ack(1)];
        let err = exchange(noise, vec![]).await.unwrap_err();
        assert!(matches!(err, RconError::AuthNoAck));
    }

    #[tokio::test]
    async fn test_command_rejected() {
        let err = exchange(vec![ack(1)], vec![value(-1, "")]).await.unwrap_err();
        assert!(matches!(err, RconError::CommandRejected));
    }

    #[tokio::test]
    async fn test_non_value_packets_are_not_appended() {
        let reply = exchange(vec![ack(1)], vec![value(2, "first"), ack(2), value(2, "second")])
            .await
            .unwrap();
        assert_eq!(reply, "first\nsecond");
    }

    #[tokio::test]
    async fn test_malformed_trailing_packet_is_fatal() {
        let mut bad = 9999i32.to_le_bytes().to_vec();
        bad.extend_from_slice(&[0u8; 8]);
        let err = exchange(vec![ack(1)], vec![value(2, "first"), bad]).await.unwrap_err();
        assert!(matches!(err, RconError::Framing(_)));
    }

    #[tokio::test]
    async fn test_silent_server_times_out_during_auth() {
        let (client, _server) = duplex(1024);
        let mut session = Session::new(client, Instant::now() + Duration::from_millis(100));

        let err = session.authenticate("pw").await.unwrap_err();
        assert!(matches!(err, RconError::Timeout { stage: "auth response", .. }));
    }

    #[tokio::test]
    async fn test_zero_timeout_uses_default() {
        let client = RconClient::new("127.0.0.1", 25575, "pw", Duration::ZERO);
        assert_eq!(client.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(client.addr(), "127.0.0.1:25575");
    }

    async fn listen() -> (tokio::net::TcpListener, RconClient) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, RconClient::new("127.0.0.1", port, "pw", Duration::from_secs(3)))
    }

    /// Reads until the client hangs up. False if the connection is still open
    /// after a second.
    async fn hung_up(stream: &mut TcpStream) -> bool {
        use tokio::io::AsyncReadExt;

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(1), stream.read_to_end(&mut rest))
            .await
            .is_ok()
    }

    #[tokio::test]
    async fn test_connection_closed_after_auth_failure() {
        use tokio::io::AsyncWriteExt;

        let (listener, client) = listen().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_packet(&mut stream).await.unwrap();
            stream.write_all(&ack(-1)).await.unwrap();
            hung_up(&mut stream).await
        });

        let err = client.execute(SHOW_PLAYERS, None).await.unwrap_err();
        assert!(matches!(err, RconError::AuthFailed));
        assert!(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_connection_closed_after_command_rejected() {
        use tokio::io::AsyncWriteExt;

        let (listener, client) = listen().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_packet(&mut stream).await.unwrap();
            stream.write_all(&ack(1)).await.unwrap();
            read_packet(&mut stream).await.unwrap();
            stream.write_all(&value(-1, "")).await.unwrap();
            hung_up(&mut stream).await
        });

        let err = client.execute(SHOW_PLAYERS, None).await.unwrap_err();
        assert!(matches!(err, RconError::CommandRejected));
        assert!(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_connection_closed_after_framing_error() {
        use tokio::io::AsyncWriteExt;

        let (listener, client) = listen().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_packet(&mut stream).await.unwrap();
            stream.write_all(&ack(1)).await.unwrap();
            read_packet(&mut stream).await.unwrap();
            stream.write_all(&value(2, "first")).await.unwrap();
            stream.write_all(&9999i32.to_le_bytes()).await.unwrap();
            hung_up(&mut stream).await
        });

        let err = client.execute(SHOW_PLAYERS, None).await.unwrap_err();
        assert!(matches!(err, RconError::Framing(_)));
        assert!(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_dial_error_when_nothing_listens() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = RconClient::new("127.0.0.1", port, "pw", Duration::from_secs(1));
        let err = client.execute(SHOW_PLAYERS, None).await.unwrap_err();
        assert!(matches!(err, RconError::Dial { .. }));
    }
}
