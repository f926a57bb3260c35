//! Wire format of the RCON protocol.
//!
//! Every frame is `u32le length | i32le id | i32le type | body | 0x00 0x00`,
//! where `length` counts everything after the length field itself.

use crate::error::RconError;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Smallest legal value of the length prefix: id, type and the two terminators.
pub const MIN_PACKET_LEN: usize = 10;
/// Largest length prefix accepted from the wire.
pub const MAX_PACKET_LEN: usize = 4096;

const ID_LEN: usize = 4;
const TYPE_LEN: usize = 4;
const TERMINATOR_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Auth,
    /// Command request, and also the type servers use for the auth acknowledgment.
    ExecCommand,
    ResponseValue,
    Unknown(i32),
}

impl PacketType {
    pub fn from_i32(raw: i32) -> Self {
        match raw {
            3 => PacketType::Auth,
            2 => PacketType::ExecCommand,
            0 => PacketType::ResponseValue,
            other => PacketType::Unknown(other),
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            PacketType::Auth => 3,
            PacketType::ExecCommand => 2,
            PacketType::ResponseValue => 0,
            PacketType::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub kind: PacketType,
    pub body: String,
}

impl Packet {
    pub fn new(id: i32, kind: PacketType, body: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            body: body.into(),
        }
    }

    /// Value of the length prefix this packet encodes to.
    pub fn frame_len(&self) -> usize {
        ID_LEN + TYPE_LEN + self.body.len() + TERMINATOR_LEN
    }

    /// Encodes the packet into a complete frame, length prefix included.
    ///
    /// Size limits are enforced by [`write_packet`], not here.
    pub fn encode(&self) -> Vec<u8> {
        let frame_len = self.frame_len();
        let mut buf = Vec::with_capacity(4 + frame_len);
        buf.extend_from_slice(&(frame_len as u32).to_le_bytes());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.kind.as_i32().to_le_bytes());
        buf.extend_from_slice(self.body.as_bytes());
        buf.extend_from_slice(&[0, 0]);
        buf
    }
}

/// Reads exactly one frame.
///
/// The length prefix is validated before the rest of the frame is read, so a
/// bad prefix never consumes bytes that belong to a following frame.
pub async fn read_packet<R>(reader: &mut R) -> Result<Packet, RconError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    reader
        .read_exact(&mut prefix)
        .await
        .map_err(|e| eof_as_framing(e, "length prefix"))?;

    let declared = i32::from_le_bytes(prefix);
    if declared < MIN_PACKET_LEN as i32 || declared > MAX_PACKET_LEN as i32 {
        return Err(RconError::Framing(format!(
            "invalid packet length {}",
            declared
        )));
    }

    let mut frame = vec![0u8; declared as usize];
    reader
        .read_exact(&mut frame)
        .await
        .map_err(|e| eof_as_framing(e, "packet body"))?;

    let (id_bytes, rest) = frame.split_at(ID_LEN);
    let (type_bytes, body_bytes) = rest.split_at(TYPE_LEN);

    let id = i32::from_le_bytes([id_bytes[0], id_bytes[1], id_bytes[2], id_bytes[3]]);
    let kind = PacketType::from_i32(i32::from_le_bytes([
        type_bytes[0],
        type_bytes[1],
        type_bytes[2],
        type_bytes[3],
    ]));

    let end = body_bytes
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);
    let body = String::from_utf8_lossy(&body_bytes[..end]).into_owned();

    Ok(Packet { id, kind, body })
}

/// Writes one frame, refusing bodies the peer would reject as oversized.
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), RconError>
where
    W: AsyncWrite + Unpin,
{
    if packet.frame_len() > MAX_PACKET_LEN {
        return Err(RconError::Framing(format!(
            "packet length {} exceeds {}",
            packet.frame_len(),
            MAX_PACKET_LEN
        )));
    }

    writer.write_all(&packet.encode()).await?;
    writer.flush().await?;
    Ok(())
}

fn eof_as_framing(err: io::Error, what: &str) -> RconError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        RconError::Framing(format!("stream ended while reading {}", what))
    } else {
        RconError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(len: i32, id: i32, kind: i32, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(&kind.to_le_bytes());
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn test_encode_layout() {
        let packet = Packet::new(1, PacketType::Auth, "secret");
        let bytes = packet.encode();

        assert_eq!(bytes.len(), 4 + 10 + 6);
        assert_eq!(&bytes[0..4], &16u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1i32.to_le_bytes());
        assert_eq!(&bytes[8..12], &3i32.to_le_bytes());
        assert_eq!(&bytes[12..18], b"secret");
        assert_eq!(&bytes[18..], &[0, 0]);
    }

    #[test]
    fn test_frame_len_of_empty_body() {
        let packet = Packet::new(0, PacketType::ResponseValue, "");
        assert_eq!(packet.frame_len(), MIN_PACKET_LEN);
        assert_eq!(packet.encode().len(), 4 + MIN_PACKET_LEN);
    }

    #[test]
    fn test_packet_type_mapping() {
        assert_eq!(PacketType::from_i32(3), PacketType::Auth);
        assert_eq!(PacketType::from_i32(2), PacketType::ExecCommand);
        assert_eq!(PacketType::from_i32(0), PacketType::ResponseValue);
        assert_eq!(PacketType::from_i32(7), PacketType::Unknown(7));
        assert_eq!(PacketType::Unknown(7).as_i32(), 7);
    }

    #[tokio::test]
    async fn test_decode_roundtrip() {
        let packets = vec![
            Packet::new(1, PacketType::Auth, "hunter2"),
            Packet::new(-1, PacketType::ExecCommand, ""),
            Packet::new(42, PacketType::ResponseValue, "name,playeruid,steamid\nAlice,1,2\n"),
            Packet::new(i32::MAX, PacketType::Unknown(9), "ünïcødé"),
        ];

        for packet in packets {
            let bytes = packet.encode();
            let mut reader = bytes.as_slice();
            let decoded = read_packet(&mut reader).await.unwrap();
            assert_eq!(decoded, packet);
            assert!(reader.is_empty());
        }
    }

    #[tokio::test]
    async fn test_decode_rejects_oversized_length_without_consuming_next_frame() {
        let next = Packet::new(5, PacketType::ResponseValue, "next").encode();
        let mut bytes = 9999i32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&next);

        let mut reader = bytes.as_slice();
        let err = read_packet(&mut reader).await.unwrap_err();

        assert!(matches!(err, RconError::Framing(_)));
        assert_eq!(reader, next.as_slice());
    }

    #[tokio::test]
    async fn test_decode_rejects_undersized_length() {
        let bytes = frame(9, 1, 0, b"\0");
        let mut reader = bytes.as_slice();
        let err = read_packet(&mut reader).await.unwrap_err();
        assert!(matches!(err, RconError::Framing(_)));
    }

    #[tokio::test]
    async fn test_decode_rejects_negative_length() {
        let bytes = frame(-12, 1, 0, b"\0\0");
        let mut reader = bytes.as_slice();
        assert!(matches!(
            read_packet(&mut reader).await,
            Err(RconError::Framing(_))
        ));
    }

    #[tokio::test]
    async fn test_decode_truncated_frame_is_framing_error() {
        // Declares 20 bytes but only carries 12.
        let bytes = frame(20, 1, 0, b"abcd");
        let mut reader = bytes.as_slice();
        assert!(matches!(
            read_packet(&mut reader).await,
            Err(RconError::Framing(_))
        ));
    }

    #[tokio::test]
    async fn test_decode_empty_stream_is_framing_error() {
        let mut reader: &[u8] = &[];
        assert!(matches!(
            read_packet(&mut reader).await,
            Err(RconError::Framing(_))
        ));
    }

    #[tokio::test]
    async fn test_decode_strips_extra_trailing_nulls() {
        let bytes = frame(14, 7, 0, b"ok\0\0\0\0");
        let mut reader = bytes.as_slice();
        let packet = read_packet(&mut reader).await.unwrap();
        assert_eq!(packet.body, "ok");
        assert_eq!(packet.id, 7);
    }

    #[tokio::test]
    async fn test_write_packet_emits_encoded_frame() {
        let packet = Packet::new(2, PacketType::ExecCommand, "ShowPlayers");
        let mut mock = tokio_test::io::Builder::new()
            .write(&packet.encode())
            .build();

        write_packet(&mut mock, &packet).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_packet_refuses_oversized_body() {
        let packet = Packet::new(2, PacketType::ExecCommand, "x".repeat(MAX_PACKET_LEN));
        let mut sink = Vec::new();

        let err = write_packet(&mut sink, &packet).await.unwrap_err();
        assert!(matches!(err, RconError::Framing(_)));
        assert!(sink.is_empty());
    }
}
