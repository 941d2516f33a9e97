//! # tessera-network
//! The peer-to-peer layer: wire framing, protocol messages, the per-peer
//! handshake state machine, the address book, and the network service that
//! drives sockets.

pub mod address_book;
pub mod config;
pub mod frame;
pub mod locator;
pub mod message;
pub mod peer;
pub mod service;

pub use config::NetworkConfig;
pub use frame::FrameCodec;
pub use message::{InvItem, InvKind, Locator, Message, NetAddress, VersionPayload};
pub use peer::{Handshake, PeerState};
pub use service::{NetworkEvent, NetworkNode, PeerId};
