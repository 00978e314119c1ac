use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Instant;

use bytes::Bytes;
use log::{debug, info, warn};

use super::connection::ConnectionManager;
use super::envelope::{DeliveryMode, MAX_PAYLOAD_SIZE};
use super::event::{DisconnectReason, TransportEvent};
use super::message::Message;
use super::socket::{Datagram, Socket};
use super::stats::NetworkStats;
use super::unix_millis;
use crate::PlayerId;
use crate::config::NetConfig;

/// Hosting side of the transport. Accepts up to `max_players - 1` peers and
/// routes their messages out as [`TransportEvent`]s.
pub struct Listener {
    socket: Socket,
    connections: ConnectionManager,
    config: NetConfig,
    map_seed: i32,
    events: VecDeque<TransportEvent>,
}

impl Listener {
    pub fn bind(port: u16, max_players: usize, config: NetConfig) -> io::Result<Self> {
        Self::bind_addr(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)), max_players, config)
    }

    pub fn bind_addr(addr: SocketAddr, max_players: usize, config: NetConfig) -> io::Result<Self> {
        let socket = Socket::bind(addr, &config)?;
        let max_peers = max_players.saturating_sub(1);
        info!(
            "listening on {} for up to {max_peers} peers",
            socket.local_addr()
        );

        Ok(Self {
            socket,
            connections: ConnectionManager::new(max_peers, config.peer_timeout),
            config,
            map_seed: 0,
            events: VecDeque::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    pub fn set_map_seed(&mut self, seed: i32) {
        self.map_seed = seed;
    }

    pub fn peer_count(&self) -> usize {
        self.connections.len()
    }

    pub fn peer_ids(&self) -> Vec<PlayerId> {
        self.connections.iter().map(|p| p.player_id).collect()
    }

    pub fn peer_rtt(&self, player_id: PlayerId) -> Option<f32> {
        self.connections.get(player_id)?.channel.rtt_ms()
    }

    pub fn stats(&self) -> &NetworkStats {
        self.socket.stats()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = TransportEvent> + '_ {
        self.events.drain(..)
    }

    pub fn poll(&mut self) {
        for datagram in self.socket.poll() {
            match self.connections.id_by_addr(&datagram.from) {
                Some(player_id) => self.handle_peer_datagram(player_id, datagram),
                None => self.handle_new_peer(datagram),
            }
        }
    }

    fn handle_new_peer(&mut self, datagram: Datagram) {
        let from = datagram.from;
        if datagram.payload.is_empty() {
            return;
        }
        let name = match Message::decode(&datagram.payload) {
            Ok(Message::ConnectRequest {
                player_name,
                version,
            }) => {
                if version != crate::PROTOCOL_VERSION {
                    warn!(
                        "{from} connects with version {version}, host runs {}",
                        crate::PROTOCOL_VERSION
                    );
                }
                player_name
            }
            Ok(other) => {
                debug!(
                    "ignoring {:?} from unknown address {from}",
                    other.message_type()
                );
                return;
            }
            Err(e) => {
                debug!("ignoring undecodable datagram from {from}: {e}");
                self.socket.stats_mut().decode_errors += 1;
                return;
            }
        };

        let now = datagram.received_at;
        let peer = match self.connections.accept(from, name, now) {
            Ok(peer) => peer,
            Err(e) => {
                info!("rejecting connection from {from}: {e}");
                return;
            }
        };

        // Run the request through the fresh channel so it gets acked and the
        // ordered stream starts after it.
        peer.channel.receive(&datagram.header, datagram.payload, now);

        let player_id = peer.player_id;
        let name = peer.name.clone();
        info!("player {player_id} ({name}) connected from {from}");

        self.send_to(
            player_id,
            &Message::ConnectAccept {
                player_id,
                map_seed: self.map_seed,
            },
            DeliveryMode::ReliableOrdered,
        );
        self.events
            .push_back(TransportEvent::PeerConnected { player_id, name });
    }

    fn handle_peer_datagram(&mut self, player_id: PlayerId, datagram: Datagram) {
        let Some(peer) = self.connections.get_mut(player_id) else {
            return;
        };
        let now = datagram.received_at;
        peer.touch(now);
        let mode = datagram.header.mode;
        let payloads = peer.channel.receive(&datagram.header, datagram.payload, now);

        for payload in payloads {
            let message = match Message::decode(&payload) {
                Ok(message) => message,
                Err(e) => {
                    warn!("dropping message from player {player_id}: {e}");
                    self.socket.stats_mut().decode_errors += 1;
                    continue;
                }
            };

            match message {
                Message::Disconnect { reason } => {
                    info!("player {player_id} disconnected: {reason}");
                    self.connections.remove(player_id);
                    self.events.push_back(TransportEvent::PeerDisconnected {
                        player_id,
                        reason: DisconnectReason::Graceful,
                    });
                    return;
                }
                Message::Heartbeat { .. } => {}
                Message::ConnectRequest { .. } | Message::ConnectAccept { .. } => {
                    debug!("ignoring handshake message from connected player {player_id}");
                }
                message => self.events.push_back(TransportEvent::Message {
                    from: player_id,
                    mode,
                    message,
                }),
            }
        }
    }

    /// Resends, heartbeats, ack flushes and the liveness sweep.
    pub fn tick(&mut self, now: Instant) {
        let heartbeat_interval = self.config.heartbeat_interval;
        let mut outgoing: Vec<(SocketAddr, Bytes)> = Vec::new();
        let mut resends = 0;

        for peer in self.connections.iter_mut() {
            for datagram in peer.channel.due_resends(now) {
                resends += 1;
                outgoing.push((peer.addr, datagram));
            }
            if peer.channel.since_last_send(now) >= heartbeat_interval {
                let heartbeat = Message::Heartbeat {
                    timestamp_ms: unix_millis(),
                };
                outgoing.push((
                    peer.addr,
                    peer.channel
                        .prepare(DeliveryMode::Unreliable, heartbeat.encode(), now),
                ));
            }
            if peer.channel.needs_ack() {
                outgoing.push((peer.addr, peer.channel.ack_only(now)));
            }
        }

        self.socket.stats_mut().resends += resends;
        for (addr, datagram) in outgoing {
            self.socket.send_to(&datagram, addr);
        }

        for peer in self.connections.cleanup_timed_out(now) {
            info!("player {} timed out", peer.player_id);
            self.events.push_back(TransportEvent::PeerDisconnected {
                player_id: peer.player_id,
                reason: DisconnectReason::Timeout,
            });
        }
    }

    pub fn send_to(&mut self, player_id: PlayerId, message: &Message, mode: DeliveryMode) {
        let payload = message.encode();
        if payload.len() > MAX_PAYLOAD_SIZE {
            warn!(
                "{:?} is {} bytes, over the {MAX_PAYLOAD_SIZE} byte limit",
                message.message_type(),
                payload.len()
            );
            return;
        }

        let Some(peer) = self.connections.get_mut(player_id) else {
            debug!("send to unknown player {player_id} dropped");
            return;
        };
        let datagram = peer.channel.prepare(mode, payload, Instant::now());
        let addr = peer.addr;
        self.socket.send_to(&datagram, addr);
    }

    pub fn broadcast(&mut self, message: &Message, mode: DeliveryMode, exclude: Option<PlayerId>) {
        for player_id in self.peer_ids() {
            if Some(player_id) != exclude {
                self.send_to(player_id, message, mode);
            }
        }
    }

    pub fn kick(&mut self, player_id: PlayerId, reason: &str) {
        self.send_disconnect(player_id, reason);
        if self.connections.remove(player_id).is_some() {
            info!("kicked player {player_id}: {reason}");
            self.events.push_back(TransportEvent::PeerDisconnected {
                player_id,
                reason: DisconnectReason::Kicked,
            });
        }
    }

    /// Tells every peer the session is over and forgets them. No events are
    /// raised; the owner is tearing down anyway.
    pub fn shutdown(&mut self, reason: &str) {
        for player_id in self.peer_ids() {
            self.send_disconnect(player_id, reason);
            self.connections.remove(player_id);
        }
        info!("listener on {} shut down", self.local_addr());
    }

    // Unreliable so it is never held back behind a gap in the ordered stream.
    fn send_disconnect(&mut self, player_id: PlayerId, reason: &str) {
        let message = Message::Disconnect {
            reason: reason.to_string(),
        };
        self.send_to(player_id, &message, DeliveryMode::Unreliable);
    }
}
