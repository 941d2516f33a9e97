//! The network service: listener, dialer, and per-peer task pairs.
//!
//! Each peer gets one receive task and one send task; outbound messages
//! flow through a bounded per-peer channel, and a peer that lets its queue
//! fill is disconnected (backpressure). A central actor owns the peer
//! registry and ban list and executes commands from the node. Events flow
//! back over an unbounded channel; the node's event loop is the consumer.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use tessera_core::constants::{BAN_DURATION_SECS, PEER_TIMEOUT_SECS};
use tessera_core::error::NetworkError;

use crate::address_book::AddressBook;
use crate::config::NetworkConfig;
use crate::frame::FrameCodec;
use crate::message::{Message, PROTOCOL_VERSION, VersionPayload};
use crate::peer::Handshake;

/// Opaque peer identifier, unique per process.
pub type PeerId = u64;

/// Depth of each peer's bounded outbound queue.
const OUTBOUND_QUEUE: usize = 64;

/// How often the dialer looks for more peers.
const DIAL_INTERVAL_SECS: u64 = 10;

/// Keepalive ping cadence.
const PING_INTERVAL_SECS: u64 = 30;

/// Events surfaced to the node.
#[derive(Debug)]
pub enum NetworkEvent {
    /// Handshake completed; the peer is usable.
    PeerReady {
        peer: PeerId,
        addr: SocketAddr,
        best_height: u64,
        /// The peer's advertised lottery identity; all zeroes if none.
        participant_key: [u8; 32],
    },
    PeerDisconnected { peer: PeerId, addr: SocketAddr },
    /// A post-handshake protocol message.
    Message { peer: PeerId, message: Message },
}

enum Command {
    SendTo(PeerId, Message),
    Broadcast(Message),
    Disconnect { peer: PeerId, ban: bool },
    Dial(SocketAddr),
}

enum Internal {
    Register {
        peer: PeerId,
        addr: SocketAddr,
        outbound: mpsc::Sender<Message>,
        close: watch::Sender<bool>,
    },
    Ready { peer: PeerId, best_height: u64, participant_key: [u8; 32] },
    Closed { peer: PeerId, ban: bool },
}

struct PeerHandle {
    addr: SocketAddr,
    outbound: mpsc::Sender<Message>,
    close: watch::Sender<bool>,
}

/// Handle to the running network service.
pub struct NetworkNode {
    cmd_tx: mpsc::UnboundedSender<Command>,
    peer_count: Arc<AtomicUsize>,
    best_height: Arc<AtomicU64>,
    local_addr: Option<SocketAddr>,
    address_book: Arc<Mutex<AddressBook>>,
}

impl NetworkNode {
    /// Start the service: bind the listener (if configured), spawn the
    /// dialer and the central actor, and return the node handle plus the
    /// event stream.
    pub async fn start(
        config: NetworkConfig,
    ) -> std::io::Result<(Self, mpsc::UnboundedReceiver<NetworkEvent>)> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let peer_count = Arc::new(AtomicUsize::new(0));
        let best_height = Arc::new(AtomicU64::new(0));
        let next_peer_id = Arc::new(AtomicU64::new(1));
        let address_book = Arc::new(Mutex::new(AddressBook::with_defaults()));

        let listener = if config.listen {
            Some(TcpListener::bind(config.listen_addr).await?)
        } else {
            None
        };
        let local_addr = listener.as_ref().and_then(|l| l.local_addr().ok());

        if let Some(listener) = listener {
            tokio::spawn(listen_loop(
                listener,
                config.magic,
                config.participant_key,
                Arc::clone(&best_height),
                Arc::clone(&next_peer_id),
                events_tx.clone(),
                internal_tx.clone(),
                Arc::clone(&address_book),
            ));
        }

        tokio::spawn(dial_loop(
            config.clone(),
            cmd_tx.clone(),
            Arc::clone(&peer_count),
            Arc::clone(&address_book),
        ));

        tokio::spawn(central_loop(
            config,
            cmd_rx,
            internal_rx,
            internal_tx,
            events_tx,
            Arc::clone(&peer_count),
            Arc::clone(&best_height),
            next_peer_id,
            Arc::clone(&address_book),
        ));

        Ok((
            Self { cmd_tx, peer_count, best_height, local_addr, address_book },
            events_rx,
        ))
    }

    /// The listener's actual bound address, when listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn peer_count(&self) -> usize {
        self.peer_count.load(Ordering::Relaxed)
    }

    /// Publish the local best height for future `version` handshakes.
    pub fn set_best_height(&self, height: u64) {
        self.best_height.store(height, Ordering::Relaxed);
    }

    pub fn send_to(&self, peer: PeerId, message: Message) {
        let _ = self.cmd_tx.send(Command::SendTo(peer, message));
    }

    pub fn broadcast(&self, message: Message) {
        let _ = self.cmd_tx.send(Command::Broadcast(message));
    }

    pub fn disconnect(&self, peer: PeerId, ban: bool) {
        let _ = self.cmd_tx.send(Command::Disconnect { peer, ban });
    }

    pub fn dial(&self, addr: SocketAddr) {
        let _ = self.cmd_tx.send(Command::Dial(addr));
    }

    /// Snapshot of the address book, for persistence across restarts.
    pub fn known_addresses(&self) -> Vec<crate::message::NetAddress> {
        self.address_book.lock().unwrap().gossip(usize::MAX)
    }

    /// Seed the address book, typically from the persisted pool at startup.
    pub fn add_addresses(&self, addresses: Vec<crate::message::NetAddress>) {
        let mut book = self.address_book.lock().unwrap();
        for address in addresses {
            book.insert(address);
        }
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

async fn listen_loop(
    listener: TcpListener,
    magic: [u8; 4],
    local_participant_key: [u8; 32],
    best_height: Arc<AtomicU64>,
    next_peer_id: Arc<AtomicU64>,
    events_tx: mpsc::UnboundedSender<NetworkEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    address_book: Arc<Mutex<AddressBook>>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(%addr, "inbound connection");
                let peer = next_peer_id.fetch_add(1, Ordering::Relaxed);
                spawn_peer(
                    stream,
                    addr,
                    peer,
                    magic,
                    local_participant_key,
                    Arc::clone(&best_height),
                    events_tx.clone(),
                    internal_tx.clone(),
                    Arc::clone(&address_book),
                );
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn dial_loop(
    config: NetworkConfig,
    cmd_tx: mpsc::UnboundedSender<Command>,
    peer_count: Arc<AtomicUsize>,
    address_book: Arc<Mutex<AddressBook>>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(DIAL_INTERVAL_SECS));
    loop {
        ticker.tick().await;
        let connected = peer_count.load(Ordering::Relaxed);
        if connected >= config.max_connections {
            continue;
        }
        let want = config.max_connections - connected;

        let mut candidates: Vec<SocketAddr> = config.seed_peers.clone();
        candidates.extend(address_book.lock().unwrap().sample(want, &[]));
        candidates.truncate(want);

        for addr in candidates {
            let _ = cmd_tx.send(Command::Dial(addr));
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn central_loop(
    config: NetworkConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    mut internal_rx: mpsc::UnboundedReceiver<Internal>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    events_tx: mpsc::UnboundedSender<NetworkEvent>,
    peer_count: Arc<AtomicUsize>,
    best_height: Arc<AtomicU64>,
    next_peer_id: Arc<AtomicU64>,
    address_book: Arc<Mutex<AddressBook>>,
) {
    let mut peers: HashMap<PeerId, PeerHandle> = HashMap::new();
    let mut bans: HashMap<IpAddr, u64> = HashMap::new();

    loop {
        tokio::select! {
            command = cmd_rx.recv() => {
                let Some(command) = command else { break };
                match command {
                    Command::SendTo(peer, message) => {
                        deliver(&mut peers, peer, message, &internal_tx);
                    }
                    Command::Broadcast(message) => {
                        let ids: Vec<PeerId> = peers.keys().copied().collect();
                        for peer in ids {
                            deliver(&mut peers, peer, message.clone(), &internal_tx);
                        }
                    }
                    Command::Disconnect { peer, ban } => {
                        let _ = internal_tx.send(Internal::Closed { peer, ban });
                        if let Some(handle) = peers.get(&peer) {
                            let _ = handle.close.send(true);
                        }
                    }
                    Command::Dial(addr) => {
                        let banned = bans
                            .get(&addr.ip())
                            .is_some_and(|&until| until > unix_now());
                        let already = peers.values().any(|h| h.addr == addr);
                        if banned || already || peers.len() >= config.max_connections {
                            continue;
                        }
                        let peer = next_peer_id.fetch_add(1, Ordering::Relaxed);
                        let magic = config.magic;
                        let local_participant_key = config.participant_key;
                        let best_height = Arc::clone(&best_height);
                        let events_tx = events_tx.clone();
                        let internal_tx = internal_tx.clone();
                        let address_book = Arc::clone(&address_book);
                        tokio::spawn(async move {
                            match tokio::time::timeout(
                                Duration::from_secs(10),
                                TcpStream::connect(addr),
                            )
                            .await
                            {
                                Ok(Ok(stream)) => {
                                    debug!(%addr, "outbound connection");
                                    spawn_peer(
                                        stream, addr, peer, magic, local_participant_key,
                                        best_height, events_tx, internal_tx, address_book,
                                    );
                                }
                                _ => debug!(%addr, "dial failed"),
                            }
                        });
                    }
                }
            }
            note = internal_rx.recv() => {
                let Some(note) = note else { break };
                match note {
                    Internal::Register { peer, addr, outbound, close } => {
                        let banned = bans
                            .get(&addr.ip())
                            .is_some_and(|&until| until > unix_now());
                        if banned || peers.len() >= config.max_connections {
                            debug!(%addr, banned, "refusing connection");
                            let _ = close.send(true);
                            continue;
                        }
                        peers.insert(peer, PeerHandle { addr, outbound, close });
                        peer_count.store(peers.len(), Ordering::Relaxed);
                    }
                    Internal::Ready { peer, best_height, participant_key } => {
                        if let Some(handle) = peers.get(&peer) {
                            let _ = events_tx.send(NetworkEvent::PeerReady {
                                peer,
                                addr: handle.addr,
                                best_height,
                                participant_key,
                            });
                        }
                    }
                    Internal::Closed { peer, ban } => {
                        if let Some(handle) = peers.remove(&peer) {
                            peer_count.store(peers.len(), Ordering::Relaxed);
                            let _ = handle.close.send(true);
                            if ban {
                                info!(addr = %handle.addr, "banning peer");
                                bans.insert(handle.addr.ip(), unix_now() + BAN_DURATION_SECS);
                            }
                            let _ = events_tx.send(NetworkEvent::PeerDisconnected {
                                peer,
                                addr: handle.addr,
                            });
                        }
                    }
                }
            }
        }
    }
}

/// Queue a message to a peer; a full queue disconnects the slow peer.
fn deliver(
    peers: &mut HashMap<PeerId, PeerHandle>,
    peer: PeerId,
    message: Message,
    internal_tx: &mpsc::UnboundedSender<Internal>,
) {
    let Some(handle) = peers.get(&peer) else { return };
    match handle.outbound.try_send(message) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(addr = %handle.addr, "outbound queue full; dropping slow peer");
            let _ = internal_tx.send(Internal::Closed { peer, ban: false });
            let _ = handle.close.send(true);
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            let _ = internal_tx.send(Internal::Closed { peer, ban: false });
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_peer(
    stream: TcpStream,
    addr: SocketAddr,
    peer: PeerId,
    magic: [u8; 4],
    local_participant_key: [u8; 32],
    best_height: Arc<AtomicU64>,
    events_tx: mpsc::UnboundedSender<NetworkEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    address_book: Arc<Mutex<AddressBook>>,
) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
    let (close_tx, close_rx) = watch::channel(false);

    let framed = Framed::new(stream, FrameCodec::new(magic));
    let (mut sink, stream_half) = framed.split();

    let _ = internal_tx.send(Internal::Register {
        peer,
        addr,
        outbound: outbound_tx.clone(),
        close: close_tx,
    });

    // Send task: drain the bounded queue onto the socket.
    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Receive task: handshake, keepalive, dispatch.
    tokio::spawn(receive_loop(
        stream_half,
        addr,
        peer,
        local_participant_key,
        best_height,
        events_tx,
        internal_tx,
        address_book,
        outbound_tx,
        close_rx,
    ));
}

#[allow(clippy::too_many_arguments)]
async fn receive_loop(
    mut stream: futures::stream::SplitStream<Framed<TcpStream, FrameCodec>>,
    addr: SocketAddr,
    peer: PeerId,
    local_participant_key: [u8; 32],
    best_height: Arc<AtomicU64>,
    events_tx: mpsc::UnboundedSender<NetworkEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    address_book: Arc<Mutex<AddressBook>>,
    outbound_tx: mpsc::Sender<Message>,
    mut close_rx: watch::Receiver<bool>,
) {
    let mut handshake = Handshake::new();

    // Both sides open with `version`.
    let version = Message::Version(VersionPayload {
        protocol_version: PROTOCOL_VERSION,
        timestamp: unix_now(),
        nonce: rand::random(),
        best_height: best_height.load(Ordering::Relaxed),
        participant_key: local_participant_key,
    });
    if outbound_tx.send(version).await.is_err() {
        let _ = internal_tx.send(Internal::Closed { peer, ban: false });
        return;
    }
    handshake.version_sent();

    let mut ping_timer = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let idle = tokio::time::sleep(Duration::from_secs(PEER_TIMEOUT_SECS));
    tokio::pin!(idle);

    let mut ban = false;
    loop {
        tokio::select! {
            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    break;
                }
            }
            _ = &mut idle => {
                debug!(%addr, "peer idle past timeout");
                break;
            }
            _ = ping_timer.tick() => {
                if handshake.is_ready()
                    && outbound_tx.try_send(Message::Ping(rand::random())).is_err()
                {
                    break;
                }
            }
            frame = stream.next() => {
                let Some(frame) = frame else { break };
                let message = match frame {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(%addr, error = %e, "protocol violation");
                        ban = matches!(
                            e,
                            NetworkError::InvalidMagic
                                | NetworkError::ChecksumMismatch
                                | NetworkError::UnknownCommand(_)
                                | NetworkError::MessageTooLarge { .. }
                                | NetworkError::Codec(_)
                        );
                        break;
                    }
                };

                idle.as_mut().reset(tokio::time::Instant::now() + Duration::from_secs(PEER_TIMEOUT_SECS));

                let was_ready = handshake.is_ready();
                match handshake.on_message(&message) {
                    Ok(replies) => {
                        let mut send_failed = false;
                        for reply in replies {
                            if outbound_tx.send(reply).await.is_err() {
                                send_failed = true;
                                break;
                            }
                        }
                        if send_failed {
                            break;
                        }
                        if !was_ready && handshake.is_ready() {
                            let remote = handshake.remote_version();
                            let _ = internal_tx.send(Internal::Ready {
                                peer,
                                best_height: remote.map(|v| v.best_height).unwrap_or(0),
                                participant_key: remote
                                    .map(|v| v.participant_key)
                                    .unwrap_or([0; 32]),
                            });
                        }
                    }
                    Err(e) => {
                        warn!(%addr, error = %e, "handshake violation");
                        ban = true;
                        break;
                    }
                }

                if handshake.is_ready() {
                    match message {
                        Message::Version(_) | Message::Verack => {}
                        Message::Ping(nonce) => {
                            let _ = outbound_tx.try_send(Message::Pong(nonce));
                        }
                        Message::Pong(_) => {}
                        Message::Addr(addrs) => {
                            let mut book = address_book.lock().unwrap();
                            for gossiped in addrs {
                                book.insert(gossiped);
                            }
                        }
                        other => {
                            let _ = events_tx.send(NetworkEvent::Message { peer, message: other });
                        }
                    }
                }
            }
        }
    }

    let _ = internal_tx.send(Internal::Closed { peer, ban });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::InvItem;
    use tessera_core::types::Hash256;

    fn test_config(listen: bool) -> NetworkConfig {
        NetworkConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            seed_peers: Vec::new(),
            max_connections: 8,
            magic: *b"TST\0",
            listen,
        }
    }

    async fn wait_ready(
        events: &mut mpsc::UnboundedReceiver<NetworkEvent>,
    ) -> (PeerId, u64) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for PeerReady")
                .expect("event channel closed");
            if let NetworkEvent::PeerReady { peer, best_height, .. } = event {
                return (peer, best_height);
            }
        }
    }

    #[tokio::test]
    async fn handshake_completes_between_two_nodes() {
        let (server, mut server_events) = NetworkNode::start(test_config(true)).await.unwrap();
        server.set_best_height(42);
        let server_addr = server.local_addr().unwrap();

        let (client, mut client_events) = NetworkNode::start(test_config(false)).await.unwrap();
        client.dial(server_addr);

        let (_, server_seen_height) = wait_ready(&mut client_events).await;
        wait_ready(&mut server_events).await;

        assert_eq!(server_seen_height, 42);
        assert_eq!(server.peer_count(), 1);
        assert_eq!(client.peer_count(), 1);
    }

    #[tokio::test]
    async fn broadcast_reaches_connected_peer() {
        let (server, mut server_events) = NetworkNode::start(test_config(true)).await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let (client, mut client_events) = NetworkNode::start(test_config(false)).await.unwrap();
        client.dial(server_addr);

        wait_ready(&mut client_events).await;
        wait_ready(&mut server_events).await;

        let inv = Message::Inv(vec![InvItem::block(Hash256([7; 32]))]);
        client.broadcast(inv.clone());

        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), server_events.recv())
                .await
                .expect("timed out waiting for inv")
                .expect("event channel closed");
            if let NetworkEvent::Message { message, .. } = event {
                assert_eq!(message, inv);
                break;
            }
        }
    }

    #[tokio::test]
    async fn explicit_disconnect_surfaces_event() {
        let (server, mut server_events) = NetworkNode::start(test_config(true)).await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let (client, mut client_events) = NetworkNode::start(test_config(false)).await.unwrap();
        client.dial(server_addr);

        let (server_peer, _) = wait_ready(&mut server_events).await;
        wait_ready(&mut client_events).await;

        server.disconnect(server_peer, false);

        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), server_events.recv())
                .await
                .expect("timed out waiting for disconnect")
                .expect("event channel closed");
            if matches!(event, NetworkEvent::PeerDisconnected { .. }) {
                break;
            }
        }
        assert_eq!(server.peer_count(), 0);
    }
}
