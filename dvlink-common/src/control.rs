//! Reflector control datagrams
//!
//! Control packets are told apart from stream frames by length alone:
//!
//! - 4 bytes: `ACKN`, `NACK`, `DISC`
//! - 10 bytes: `PING`, `PONG`, `DISC` followed by a 6-byte callsign code
//! - 11 bytes: `CONN` followed by a 6-byte callsign code and a module byte

use crate::callsign::Callsign;
use crate::error::{Result, WireError};

/// Size of a bare acknowledgement
pub const SHORT_CONTROL_SIZE: usize = 4;

/// Size of a keepalive or addressed disconnect
pub const ADDRESSED_CONTROL_SIZE: usize = 10;

/// Size of a link request
pub const CONNECT_SIZE: usize = 11;

/// A reflector control packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPacket {
    /// Link request accepted
    Ack,
    /// Link request refused
    Nack,
    /// Bare disconnect
    Disconnect,
    /// Keepalive from the reflector
    Ping(Callsign),
    /// Keepalive answer
    Pong(Callsign),
    /// Disconnect naming a callsign
    DisconnectFrom(Callsign),
    /// Link request from `callsign` to reflector `module`
    Connect { callsign: Callsign, module: u8 },
}

impl ControlPacket {
    /// Four-character tag of this packet
    pub fn tag(&self) -> &'static [u8; 4] {
        match self {
            ControlPacket::Ack => b"ACKN",
            ControlPacket::Nack => b"NACK",
            ControlPacket::Disconnect | ControlPacket::DisconnectFrom(_) => b"DISC",
            ControlPacket::Ping(_) => b"PING",
            ControlPacket::Pong(_) => b"PONG",
            ControlPacket::Connect { .. } => b"CONN",
        }
    }

    /// Serialize to the wire form
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.tag().to_vec();
        match self {
            ControlPacket::Ack | ControlPacket::Nack | ControlPacket::Disconnect => {}
            ControlPacket::Ping(cs) | ControlPacket::Pong(cs) | ControlPacket::DisconnectFrom(cs) => {
                buf.extend_from_slice(&cs.code());
            }
            ControlPacket::Connect { callsign, module } => {
                buf.extend_from_slice(&callsign.code());
                buf.push(*module);
            }
        }
        buf
    }

    /// Parse a control packet
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SHORT_CONTROL_SIZE {
            return Err(WireError::Length {
                expected: SHORT_CONTROL_SIZE,
                actual: bytes.len(),
            });
        }
        let tag = &bytes[0..4];

        match bytes.len() {
            SHORT_CONTROL_SIZE => match tag {
                b"ACKN" => Ok(ControlPacket::Ack),
                b"NACK" => Ok(ControlPacket::Nack),
                b"DISC" => Ok(ControlPacket::Disconnect),
                _ => Err(WireError::UnknownType(tag.to_vec())),
            },
            ADDRESSED_CONTROL_SIZE => {
                let cs = Callsign::from_bytes(&bytes[4..10])?;
                match tag {
                    b"PING" => Ok(ControlPacket::Ping(cs)),
                    b"PONG" => Ok(ControlPacket::Pong(cs)),
                    b"DISC" => Ok(ControlPacket::DisconnectFrom(cs)),
                    _ => Err(WireError::UnknownType(tag.to_vec())),
                }
            }
            CONNECT_SIZE if tag == b"CONN" => Ok(ControlPacket::Connect {
                callsign: Callsign::from_bytes(&bytes[4..10])?,
                module: bytes[10],
            }),
            CONNECT_SIZE => Err(WireError::UnknownType(tag.to_vec())),
            other => Err(WireError::Length {
                expected: SHORT_CONTROL_SIZE,
                actual: other,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_packets() {
        assert_eq!(ControlPacket::Ack.to_bytes(), b"ACKN");
        assert_eq!(ControlPacket::from_bytes(b"ACKN"), Ok(ControlPacket::Ack));
        assert_eq!(ControlPacket::from_bytes(b"NACK"), Ok(ControlPacket::Nack));
        assert_eq!(ControlPacket::from_bytes(b"DISC"), Ok(ControlPacket::Disconnect));
    }

    #[test]
    fn test_unknown_short_tag() {
        assert_eq!(
            ControlPacket::from_bytes(b"HELO"),
            Err(WireError::UnknownType(b"HELO".to_vec()))
        );
    }

    #[test]
    fn test_ping_layout() {
        let cs = Callsign::new("M17-USA");
        let bytes = ControlPacket::Ping(cs).to_bytes();
        assert_eq!(bytes.len(), ADDRESSED_CONTROL_SIZE);
        assert_eq!(&bytes[0..4], b"PING");
        assert_eq!(&bytes[4..10], &cs.code());
        assert_eq!(ControlPacket::from_bytes(&bytes), Ok(ControlPacket::Ping(cs)));
    }

    #[test]
    fn test_addressed_disconnect() {
        let cs = Callsign::new("M17-USA C");
        let bytes = ControlPacket::DisconnectFrom(cs).to_bytes();
        assert_eq!(&bytes[0..4], b"DISC");
        assert_eq!(
            ControlPacket::from_bytes(&bytes),
            Ok(ControlPacket::DisconnectFrom(cs))
        );
    }

    #[test]
    fn test_connect_layout() {
        let cs = Callsign::new("N0CALL  D");
        let packet = ControlPacket::Connect {
            callsign: cs,
            module: b'C',
        };
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), CONNECT_SIZE);
        assert_eq!(&bytes[0..4], b"CONN");
        assert_eq!(bytes[10], b'C');
        assert_eq!(ControlPacket::from_bytes(&bytes), Ok(packet));
    }

    #[test]
    fn test_bad_callsign_code() {
        let mut bytes = b"PING".to_vec();
        bytes.extend_from_slice(&[0xFF; 6]);
        assert!(matches!(
            ControlPacket::from_bytes(&bytes),
            Err(WireError::CallsignRange(_))
        ));
    }

    #[test]
    fn test_unexpected_length() {
        assert!(matches!(
            ControlPacket::from_bytes(b"ACKNX"),
            Err(WireError::Length { actual: 5, .. })
        ));
    }
}
