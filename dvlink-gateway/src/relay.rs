//! Inbound stream relay session
//!
//! At most one inbound stream is relayed at a time. The first frame of an
//! unknown stream opens the session, a frame with the last-frame bit closes
//! it, and if the stream goes quiet the session synthesizes its own closing
//! frame so downstream consumers always see a terminator.

use std::time::{Duration, Instant};

use dvlink_common::m17::M17Frame;

/// What to do with a frame offered to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDecision {
    /// New stream; forward it
    Opened,
    /// Continuation of the active stream; forward it
    Forwarded,
    /// Final frame of the active stream; forward it, the session is closed
    Closed,
    /// Frame belongs to a different stream than the active one; drop it
    Foreign { active: u16 },
}

impl RelayDecision {
    pub fn should_forward(self) -> bool {
        !matches!(self, RelayDecision::Foreign { .. })
    }
}

#[derive(Debug)]
struct ActiveStream {
    last_frame: M17Frame,
    last_packet: Instant,
}

/// The gateway's single inbound relay session
#[derive(Debug)]
pub struct RelaySession {
    active: Option<ActiveStream>,
    timeout: Duration,
}

impl RelaySession {
    pub fn new(timeout: Duration) -> Self {
        Self {
            active: None,
            timeout,
        }
    }

    /// Stream id of the active session
    pub fn active_stream(&self) -> Option<u16> {
        self.active.as_ref().map(|s| s.last_frame.stream_id)
    }

    /// Offer a received frame to the session
    pub fn on_frame(&mut self, frame: &M17Frame, now: Instant) -> RelayDecision {
        match self.active_stream() {
            Some(active) if active != frame.stream_id => RelayDecision::Foreign { active },
            _ if frame.is_last() => {
                self.active = None;
                RelayDecision::Closed
            }
            current => {
                self.active = Some(ActiveStream {
                    last_frame: frame.clone(),
                    last_packet: now,
                });
                if current.is_some() {
                    RelayDecision::Forwarded
                } else {
                    RelayDecision::Opened
                }
            }
        }
    }

    /// Close a stalled session
    ///
    /// Returns the synthesized closing frame exactly once when the active
    /// stream has been quiet for longer than the timeout.
    pub fn check_timeout(&mut self, now: Instant) -> Option<M17Frame> {
        let stalled = self
            .active
            .as_ref()
            .is_some_and(|s| now.saturating_duration_since(s.last_packet) >= self.timeout);
        if !stalled {
            return None;
        }
        self.active.take().map(|s| s.last_frame.terminator())
    }
}
