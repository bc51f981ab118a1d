//! Messages exchanged over local inter-process channels
//!
//! Local channels are Unix datagram sockets inside a shared directory. Each
//! channel is one-directional and named after its endpoints. A datagram is
//! identified by its leading magic: a DSVT packet, an M17 frame, or a `PLAY`
//! directive naming an announcement to play.

use crate::dsvt::{DSVT_MAGIC, WirePacket};
use crate::error::{Result, WireError};
use crate::m17::{M17_FRAME_SIZE, M17_MAGIC, M17Frame};

// =============================================================================
// Channel Names
// =============================================================================

/// Audio manager to M17 gateway
pub const CHANNEL_AUDIO_TO_M17: &str = "am2m17";

/// M17 gateway to audio manager
pub const CHANNEL_M17_TO_AUDIO: &str = "m172am";

/// Audio manager to the legacy gateway
pub const CHANNEL_AUDIO_TO_GATEWAY: &str = "am2gate";

/// Legacy gateway to audio manager
pub const CHANNEL_GATEWAY_TO_AUDIO: &str = "gate2am";

/// Audio manager to the link service
pub const CHANNEL_AUDIO_TO_LINK: &str = "am2link";

/// Link service to audio manager
pub const CHANNEL_LINK_TO_AUDIO: &str = "link2am";

/// Largest datagram ever sent on a local channel
pub const MAX_LOCAL_DATAGRAM: usize = 64;

// =============================================================================
// Play Directive
// =============================================================================

/// Directive magic
pub const PLAY_MAGIC: &[u8; 4] = b"PLAY";

/// Size a `PLAY` directive is padded to
pub const PLAY_DIRECTIVE_SIZE: usize = M17_FRAME_SIZE;

/// Longest text a `PLAY` directive can carry (room is kept for the NUL)
pub const MAX_PLAY_TEXT: usize = PLAY_DIRECTIVE_SIZE - PLAY_MAGIC.len() - 1;

// =============================================================================
// Local Message
// =============================================================================

/// A datagram on a local channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalMessage {
    Dsvt(WirePacket),
    M17(M17Frame),
    /// Play the named announcement
    Play(String),
}

impl LocalMessage {
    /// Build a `PLAY` directive, rejecting text that does not fit
    pub fn play(text: &str) -> Result<Self> {
        if text.len() > MAX_PLAY_TEXT {
            return Err(WireError::DirectiveTooLong {
                len: text.len(),
                max: MAX_PLAY_TEXT,
            });
        }
        Ok(LocalMessage::Play(text.to_string()))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            LocalMessage::Dsvt(packet) => packet.to_bytes(),
            LocalMessage::M17(frame) => frame.to_bytes(),
            LocalMessage::Play(text) => {
                let mut buf = vec![0u8; PLAY_DIRECTIVE_SIZE];
                buf[0..4].copy_from_slice(PLAY_MAGIC);
                let len = text.len().min(MAX_PLAY_TEXT);
                buf[4..4 + len].copy_from_slice(&text.as_bytes()[..len]);
                buf
            }
        }
    }

    /// Decode a local datagram
    ///
    /// M17 frames are taken as-is; the CRC is only enforced on frames that
    /// arrive from the network.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(WireError::Length {
                expected: 4,
                actual: bytes.len(),
            });
        }
        let magic = &bytes[0..4];

        if magic == DSVT_MAGIC {
            WirePacket::from_bytes(bytes).map(LocalMessage::Dsvt)
        } else if magic == M17_MAGIC {
            M17Frame::from_bytes_unverified(bytes).map(LocalMessage::M17)
        } else if magic == PLAY_MAGIC {
            let text = &bytes[4..];
            let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
            Ok(LocalMessage::Play(
                String::from_utf8_lossy(&text[..end]).into_owned(),
            ))
        } else {
            Err(WireError::Magic([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
    }
}
