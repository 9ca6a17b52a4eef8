//! RCON wire format
//!
//! Every packet is an `i32` little-endian length followed by that many bytes:
//! `i32 request id`, `i32 type`, the payload, and two NUL terminators.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RconError, Result};

/// Request id the server echoes back when authentication is refused
pub const AUTH_FAILURE_ID: i32 = -1;

/// Smallest legal body: id + type + two terminators
pub const MIN_PACKET_LENGTH: usize = 10;

/// Largest inbound body accepted (the server splits output at 4096 payload bytes)
pub const MAX_INBOUND_LENGTH: usize = 4096 + MIN_PACKET_LENGTH;

/// Largest outbound payload the server will execute
pub const MAX_OUTBOUND_PAYLOAD: usize = 1446;

/// Packet type field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Command output (type 0)
    ResponseValue,
    /// Command execution request, also used for the auth response (type 2)
    ExecCommand,
    /// Authentication request (type 3)
    Auth,
    /// Anything else the server may send
    Unknown(i32),
}

impl PacketKind {
    pub fn as_i32(self) -> i32 {
        match self {
            PacketKind::ResponseValue => 0,
            PacketKind::ExecCommand => 2,
            PacketKind::Auth => 3,
            PacketKind::Unknown(v) => v,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => PacketKind::ResponseValue,
            2 => PacketKind::ExecCommand,
            3 => PacketKind::Auth,
            other => PacketKind::Unknown(other),
        }
    }
}

/// A single RCON packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub request_id: i32,
    pub kind: PacketKind,
    pub payload: String,
}

impl Packet {
    pub fn new(request_id: i32, kind: PacketKind, payload: impl Into<String>) -> Self {
        Self {
            request_id,
            kind,
            payload: payload.into(),
        }
    }

    /// Serialize to a length-prefixed frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = self.payload.as_bytes();
        if payload.len() > MAX_OUTBOUND_PAYLOAD {
            return Err(RconError::PacketTooLarge(payload.len()));
        }

        let body_len = MIN_PACKET_LENGTH + payload.len();
        let mut frame = Vec::with_capacity(4 + body_len);
        frame.extend_from_slice(&(body_len as i32).to_le_bytes());
        frame.extend_from_slice(&self.request_id.to_le_bytes());
        frame.extend_from_slice(&self.kind.as_i32().to_le_bytes());
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&[0, 0]);
        Ok(frame)
    }

    /// Parse a frame body (everything after the length prefix).
    ///
    /// Invalid UTF-8 in the payload is replaced rather than rejected.
    pub fn decode_body(body: &[u8]) -> Result<Self> {
        if body.len() < MIN_PACKET_LENGTH {
            return Err(RconError::MalformedPacket(format!(
                "body of {} bytes is shorter than the {} byte minimum",
                body.len(),
                MIN_PACKET_LENGTH
            )));
        }

        let request_id = i32::from_le_bytes([body[0], body[1], body[2], body[3]]);
        let kind = PacketKind::from_i32(i32::from_le_bytes([body[4], body[5], body[6], body[7]]));
        let payload = String::from_utf8_lossy(&body[8..body.len() - 2]).into_owned();

        Ok(Self {
            request_id,
            kind,
            payload,
        })
    }
}

/// Read one packet, rejecting oversized frames before reading their body.
pub async fn read_packet<R>(reader: &mut R) -> Result<Packet>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let length = i32::from_le_bytes(len_buf);

    if length < MIN_PACKET_LENGTH as i32 {
        return Err(RconError::MalformedPacket(format!("invalid length {}", length)));
    }
    let length = length as usize;
    if length > MAX_INBOUND_LENGTH {
        return Err(RconError::PacketTooLarge(length));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Packet::decode_body(&body)
}

/// Write one packet and flush.
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = packet.encode()?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let packet = Packet::new(7, PacketKind::ExecCommand, "list");
        let frame = packet.encode().unwrap();

        assert_eq!(&frame[0..4], &14i32.to_le_bytes());
        assert_eq!(&frame[4..8], &7i32.to_le_bytes());
        assert_eq!(&frame[8..12], &2i32.to_le_bytes());
        assert_eq!(&frame[12..16], b"list");
        assert_eq!(&frame[16..], &[0, 0]);
    }

    #[test]
    fn test_auth_kind_value() {
        let frame = Packet::new(1, PacketKind::Auth, "secret").encode().unwrap();
        assert_eq!(&frame[8..12], &3i32.to_le_bytes());
    }

    #[test]
    fn test_decode_lossy_payload() {
        let mut body = Vec::new();
        body.extend_from_slice(&5i32.to_le_bytes());
        body.extend_from_slice(&0i32.to_le_bytes());
        body.extend_from_slice(&[b'o', b'k', 0xFF]);
        body.extend_from_slice(&[0, 0]);

        let packet = Packet::decode_body(&body).unwrap();
        assert_eq!(packet.request_id, 5);
        assert_eq!(packet.kind, PacketKind::ResponseValue);
        assert_eq!(packet.payload, "ok\u{FFFD}");
    }

    #[test]
    fn test_decode_short_body() {
        let err = Packet::decode_body(&[0u8; 6]).unwrap_err();
        assert!(matches!(err, RconError::MalformedPacket(_)));
    }

    #[test]
    fn test_outbound_too_large() {
        let packet = Packet::new(1, PacketKind::ExecCommand, "x".repeat(MAX_OUTBOUND_PAYLOAD + 1));
        assert!(matches!(packet.encode(), Err(RconError::PacketTooLarge(_))));
    }

    #[tokio::test]
    async fn test_read_packet_roundtrip() {
        let frame = Packet::new(42, PacketKind::ResponseValue, "There are 0 players")
            .encode()
            .unwrap();
        let mut reader = &frame[..];

        let packet = read_packet(&mut reader).await.unwrap();
        assert_eq!(packet.request_id, 42);
        assert_eq!(packet.payload, "There are 0 players");
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_frame() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&((MAX_INBOUND_LENGTH + 1) as i32).to_le_bytes());
        let mut reader = &frame[..];

        let err = read_packet(&mut reader).await.unwrap_err();
        assert!(matches!(err, RconError::PacketTooLarge(n) if n == MAX_INBOUND_LENGTH + 1));
    }

    #[tokio::test]
    async fn test_read_truncated_frame_is_io_error() {
        let frame = Packet::new(1, PacketKind::ResponseValue, "abc").encode().unwrap();
        let mut reader = &frame[..frame.len() - 3];

        let err = read_packet(&mut reader).await.unwrap_err();
        assert!(matches!(err, RconError::Io(_)));
    }
}
