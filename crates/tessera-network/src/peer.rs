//! Per-peer handshake state machine.
//!
//! Both sides send `version` as soon as the connection opens; each replies
//! to the peer's `version` with `verack`. A peer is `Ready` once it has
//! received both the remote `version` and the remote `verack`, in either
//! order. Everything else before `Ready` is a protocol violation, as is a
//! repeated `version` or `verack`.

use tessera_core::error::NetworkError;

use crate::message::{Message, VersionPayload};

/// Connection lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    /// Socket open, nothing sent.
    Connected,
    /// Our `version` is on the wire.
    VersionSent,
    /// Remote `version` received, still waiting for `verack`.
    VersionReceived,
    /// Handshake complete.
    Ready,
    /// Terminal.
    Disconnected,
}

/// Tracks one peer's handshake progress.
#[derive(Debug)]
pub struct Handshake {
    version_sent: bool,
    remote_version: Option<VersionPayload>,
    verack_received: bool,
    disconnected: bool,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            version_sent: false,
            remote_version: None,
            verack_received: false,
            disconnected: false,
        }
    }

    /// Note that our `version` went out.
    pub fn version_sent(&mut self) {
        self.version_sent = true;
    }

    pub fn disconnect(&mut self) {
        self.disconnected = true;
    }

    pub fn state(&self) -> PeerState {
        if self.disconnected {
            PeerState::Disconnected
        } else if self.is_ready() {
            PeerState::Ready
        } else if self.remote_version.is_some() {
            PeerState::VersionReceived
        } else if self.version_sent {
            PeerState::VersionSent
        } else {
            PeerState::Connected
        }
    }

    pub fn is_ready(&self) -> bool {
        !self.disconnected && self.remote_version.is_some() && self.verack_received
    }

    /// The remote's advertised version, once received.
    pub fn remote_version(&self) -> Option<&VersionPayload> {
        self.remote_version.as_ref()
    }

    /// Feed an incoming handshake-phase message.
    ///
    /// Returns the replies to enqueue. Non-handshake messages before
    /// `Ready`, or duplicate handshake messages, are violations and the
    /// caller must disconnect (and ban).
    pub fn on_message(&mut self, message: &Message) -> Result<Vec<Message>, NetworkError> {
        match message {
            Message::Version(payload) => {
                if self.remote_version.is_some() {
                    return Err(NetworkError::HandshakeViolation("duplicate version".into()));
                }
                self.remote_version = Some(*payload);
                Ok(vec![Message::Verack])
            }
            Message::Verack => {
                if self.verack_received {
                    return Err(NetworkError::HandshakeViolation("duplicate verack".into()));
                }
                self.verack_received = true;
                Ok(Vec::new())
            }
            other if !self.is_ready() => Err(NetworkError::HandshakeViolation(format!(
                "{} before handshake completed",
                other.command()
            ))),
            // Ready-state traffic is not this machine's business.
            _ => Ok(Vec::new()),
        }
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}
