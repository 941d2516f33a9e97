//! Wire protocol messages.
//!
//! Twelve commands make up the protocol: `version`, `verack`, `addr`,
//! `inv`, `getdata`, `getblocks`, `getheaders`, `headers`, `tx`, `block`,
//! `ping`, `pong`. Payloads use the canonical codec; the frame around them
//! lives in [`frame`](crate::frame).

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use tessera_core::codec::{Decodable, Encodable, Reader};
use tessera_core::constants::{
    MAX_ADDR_PER_MSG, MAX_HEADERS_PER_MSG, MAX_INV_PER_MSG, MAX_LOCATOR_SIZE,
};
use tessera_core::error::{CodecError, NetworkError};
use tessera_core::types::{Block, BlockHeader, Hash256, Transaction};

/// Version of the wire protocol spoken by this build.
pub const PROTOCOL_VERSION: u32 = 1;

/// A peer address as gossiped in `addr` messages and kept in the address
/// book. IPv4 addresses ride in the v6-mapped form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetAddress {
    /// Unix time the address was last known good.
    pub last_seen: u32,
    /// IPv6 (or v6-mapped IPv4) address bytes.
    pub ip: [u8; 16],
    /// TCP port.
    pub port: u16,
}

impl NetAddress {
    pub fn from_socket_addr(addr: SocketAddr, last_seen: u32) -> Self {
        let ip = match addr.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        };
        Self { last_seen, ip, port: addr.port() }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        let v6 = Ipv6Addr::from(self.ip);
        match v6.to_ipv4_mapped() {
            Some(v4) => SocketAddr::from((v4, self.port)),
            None => SocketAddr::from((v6, self.port)),
        }
    }

    /// Whether the address is worth keeping: not unspecified, not multicast.
    pub fn is_routable(&self) -> bool {
        let ip = self.socket_addr().ip();
        !ip.is_unspecified() && !ip.is_multicast() && self.port != 0
    }
}

impl Encodable for NetAddress {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.last_seen.encode_into(out);
        out.extend_from_slice(&self.ip);
        self.port.encode_into(out);
    }
}

impl Decodable for NetAddress {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            last_seen: r.read_u32()?,
            ip: r.read_array::<16>()?,
            port: r.read_u16()?,
        })
    }
}

/// Payload of the `version` handshake message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionPayload {
    pub protocol_version: u32,
    /// Sender's wall clock, Unix seconds.
    pub timestamp: u64,
    /// Random nonce for self-connection detection.
    pub nonce: u64,
    /// Sender's best chain height.
    pub best_height: u64,
    /// The sender's lottery identity (Ed25519 public key), or all zeroes
    /// for a non-participating node. Lets the receiver apply the veteran
    /// bypass when its subnet caps bite.
    pub participant_key: [u8; 32],
}

impl Encodable for VersionPayload {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.protocol_version.encode_into(out);
        self.timestamp.encode_into(out);
        self.nonce.encode_into(out);
        self.best_height.encode_into(out);
        out.extend_from_slice(&self.participant_key);
    }
}

impl Decodable for VersionPayload {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            protocol_version: r.read_u32()?,
            timestamp: r.read_u64()?,
            nonce: r.read_u64()?,
            best_height: r.read_u64()?,
            participant_key: r.read_array::<32>()?,
        })
    }
}

/// What an inventory item announces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvKind {
    Tx,
    Block,
}

/// One announced object in an `inv` or `getdata` message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvItem {
    pub kind: InvKind,
    pub hash: Hash256,
}

impl InvItem {
    pub fn tx(hash: Hash256) -> Self {
        Self { kind: InvKind::Tx, hash }
    }

    pub fn block(hash: Hash256) -> Self {
        Self { kind: InvKind::Block, hash }
    }
}

impl Encodable for InvItem {
    fn encode_into(&self, out: &mut Vec<u8>) {
        let kind: u32 = match self.kind {
            InvKind::Tx => 1,
            InvKind::Block => 2,
        };
        kind.encode_into(out);
        self.hash.encode_into(out);
    }
}

impl Decodable for InvItem {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let kind = match r.read_u32()? {
            1 => InvKind::Tx,
            2 => InvKind::Block,
            _ => return Err(CodecError::InvalidValue("inv kind")),
        };
        Ok(Self { kind, hash: Hash256::decode_from(r)? })
    }
}

/// A block locator: hashes of known blocks, densest near the tip, thinning
/// exponentially toward genesis, plus an optional stop hash.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Locator {
    pub have: Vec<Hash256>,
    /// Stop serving at this hash; zero means "as many as allowed".
    pub stop: Hash256,
}

impl Encodable for Locator {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.have.encode_into(out);
        self.stop.encode_into(out);
    }
}

impl Decodable for Locator {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self { have: Vec::decode_from(r)?, stop: Hash256::decode_from(r)? })
    }
}

/// A protocol message, one per wire command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Version(VersionPayload),
    Verack,
    Addr(Vec<NetAddress>),
    Inv(Vec<InvItem>),
    GetData(Vec<InvItem>),
    GetBlocks(Locator),
    GetHeaders(Locator),
    Headers(Vec<BlockHeader>),
    Tx(Transaction),
    Block(Block),
    Ping(u64),
    Pong(u64),
}

impl Message {
    /// The ASCII command string for the frame header.
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::Verack => "verack",
            Message::Addr(_) => "addr",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::GetBlocks(_) => "getblocks",
            Message::GetHeaders(_) => "getheaders",
            Message::Headers(_) => "headers",
            Message::Tx(_) => "tx",
            Message::Block(_) => "block",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
        }
    }

    /// Encode the payload (frame header excluded).
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Message::Version(v) => v.encode_into(&mut out),
            Message::Verack => {}
            Message::Addr(addrs) => addrs.encode_into(&mut out),
            Message::Inv(items) | Message::GetData(items) => items.encode_into(&mut out),
            Message::GetBlocks(locator) | Message::GetHeaders(locator) => {
                locator.encode_into(&mut out)
            }
            Message::Headers(headers) => headers.encode_into(&mut out),
            Message::Tx(tx) => tx.encode_into(&mut out),
            Message::Block(block) => block.encode_into(&mut out),
            Message::Ping(nonce) | Message::Pong(nonce) => nonce.encode_into(&mut out),
        }
        out
    }

    /// Decode a payload for the given command string.
    pub fn decode_payload(command: &str, payload: &[u8]) -> Result<Self, NetworkError> {
        let message = match command {
            "version" => Message::Version(VersionPayload::decode(payload)?),
            "verack" => {
                if !payload.is_empty() {
                    return Err(CodecError::TrailingBytes { remaining: payload.len() }.into());
                }
                Message::Verack
            }
            "addr" => {
                let addrs: Vec<NetAddress> = Vec::decode(payload)?;
                if addrs.len() > MAX_ADDR_PER_MSG {
                    return Err(NetworkError::MessageTooLarge { size: addrs.len() });
                }
                Message::Addr(addrs)
            }
            "inv" | "getdata" => {
                let items: Vec<InvItem> = Vec::decode(payload)?;
                if items.len() > MAX_INV_PER_MSG {
                    return Err(NetworkError::MessageTooLarge { size: items.len() });
                }
                if command == "inv" {
                    Message::Inv(items)
                } else {
                    Message::GetData(items)
                }
            }
            "getblocks" | "getheaders" => {
                let locator = Locator::decode(payload)?;
                if locator.have.len() > MAX_LOCATOR_SIZE {
                    return Err(NetworkError::MessageTooLarge { size: locator.have.len() });
                }
                if command == "getblocks" {
                    Message::GetBlocks(locator)
                } else {
                    Message::GetHeaders(locator)
                }
            }
            "headers" => {
                let headers: Vec<BlockHeader> = Vec::decode(payload)?;
                if headers.len() > MAX_HEADERS_PER_MSG {
                    return Err(NetworkError::MessageTooLarge { size: headers.len() });
                }
                Message::Headers(headers)
            }
            "tx" => Message::Tx(Transaction::decode(payload)?),
            "block" => Message::Block(Block::decode(payload)?),
            "ping" => Message::Ping(u64::decode(payload)?),
            "pong" => Message::Pong(u64::decode(payload)?),
            other => return Err(NetworkError::UnknownCommand(other.to_string())),
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::types::{OutPoint, TxInput, TxOutput};

    fn round_trip(msg: Message) -> Message {
        let payload = msg.encode_payload();
        Message::decode_payload(msg.command(), &payload).unwrap()
    }

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                prevout: OutPoint::new(Hash256([1; 32]), 0),
                script_sig: vec![1, 2, 3],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOutput { value: 100, script_pubkey: vec![0x51] }],
            locktime: 0,
        }
    }

    fn sample_header(salt: u8) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash: Hash256([salt; 32]),
            merkle_root: Hash256::ZERO,
            time: 1_700_000_000,
            bits: 0,
            nonce: 0,
        }
    }

    #[test]
    fn version_round_trip() {
        let msg = Message::Version(VersionPayload {
            protocol_version: PROTOCOL_VERSION,
            timestamp: 1_700_000_000,
            nonce: 0xDEAD_BEEF,
            best_height: 42,
            participant_key: [0x5A; 32],
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn truncated_version_rejected() {
        let payload = Message::Version(VersionPayload {
            protocol_version: PROTOCOL_VERSION,
            timestamp: 0,
            nonce: 0,
            best_height: 0,
            participant_key: [0; 32],
        })
        .encode_payload();
        assert!(Message::decode_payload("version", &payload[..payload.len() - 1]).is_err());
    }

    #[test]
    fn verack_is_empty() {
        assert!(Message::Verack.encode_payload().is_empty());
        assert_eq!(round_trip(Message::Verack), Message::Verack);
        assert!(Message::decode_payload("verack", &[0x00]).is_err());
    }

    #[test]
    fn addr_round_trip() {
        let addr = NetAddress::from_socket_addr("10.0.0.1:19333".parse().unwrap(), 1_000);
        let msg = Message::Addr(vec![addr]);
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn inv_and_getdata_round_trip() {
        let items = vec![InvItem::tx(Hash256([1; 32])), InvItem::block(Hash256([2; 32]))];
        assert_eq!(round_trip(Message::Inv(items.clone())), Message::Inv(items.clone()));
        assert_eq!(round_trip(Message::GetData(items.clone())), Message::GetData(items));
    }

    #[test]
    fn locator_messages_round_trip() {
        let locator = Locator {
            have: vec![Hash256([9; 32]), Hash256([8; 32])],
            stop: Hash256::ZERO,
        };
        assert_eq!(
            round_trip(Message::GetBlocks(locator.clone())),
            Message::GetBlocks(locator.clone())
        );
        assert_eq!(
            round_trip(Message::GetHeaders(locator.clone())),
            Message::GetHeaders(locator)
        );
    }

    #[test]
    fn headers_tx_block_round_trip() {
        let headers = vec![sample_header(1), sample_header(2)];
        assert_eq!(round_trip(Message::Headers(headers.clone())), Message::Headers(headers));

        let tx = sample_tx();
        assert_eq!(round_trip(Message::Tx(tx.clone())), Message::Tx(tx.clone()));

        let block = Block { header: sample_header(3), transactions: vec![sample_tx()] };
        assert_eq!(round_trip(Message::Block(block.clone())), Message::Block(block));
    }

    #[test]
    fn ping_pong_round_trip() {
        assert_eq!(round_trip(Message::Ping(7)), Message::Ping(7));
        assert_eq!(round_trip(Message::Pong(7)), Message::Pong(7));
    }

    #[test]
    fn unknown_command_rejected() {
        assert!(matches!(
            Message::decode_payload("mempool", &[]).unwrap_err(),
            NetworkError::UnknownCommand(_)
        ));
    }

    #[test]
    fn oversized_locator_rejected() {
        let locator = Locator {
            have: vec![Hash256::ZERO; MAX_LOCATOR_SIZE + 1],
            stop: Hash256::ZERO,
        };
        let payload = Message::GetBlocks(locator).encode_payload();
        assert!(matches!(
            Message::decode_payload("getblocks", &payload).unwrap_err(),
            NetworkError::MessageTooLarge { .. }
        ));
    }

    #[test]
    fn bad_inv_kind_rejected() {
        let mut payload = Vec::new();
        tessera_core::codec::write_var_int(1, &mut payload);
        3u32.encode_into(&mut payload);
        Hash256::ZERO.encode_into(&mut payload);
        assert!(Message::decode_payload("inv", &payload).is_err());
    }

    #[test]
    fn net_address_v4_mapping() {
        let socket: SocketAddr = "192.168.1.5:8080".parse().unwrap();
        let addr = NetAddress::from_socket_addr(socket, 0);
        assert_eq!(addr.socket_addr(), socket);
        assert!(addr.is_routable());
    }

    #[test]
    fn unspecified_address_not_routable() {
        let addr = NetAddress::from_socket_addr("0.0.0.0:19333".parse().unwrap(), 0);
        assert!(!addr.is_routable());
        let no_port = NetAddress::from_socket_addr("10.0.0.1:0".parse().unwrap(), 0);
        assert!(!no_port.is_routable());
    }

    #[test]
    fn command_strings_fit_the_frame_field() {
        let messages = [
            Message::Verack,
            Message::Ping(0),
            Message::Pong(0),
            Message::Inv(vec![]),
            Message::GetData(vec![]),
            Message::Headers(vec![]),
            Message::Addr(vec![]),
            Message::GetBlocks(Locator::default()),
            Message::GetHeaders(Locator::default()),
        ];
        for msg in &messages {
            assert!(msg.command().len() <= 12);
            assert!(msg.command().is_ascii());
        }
    }
}
