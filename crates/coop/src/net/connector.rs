use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Instant;

use log::{debug, info, warn};

use super::envelope::{DeliveryMode, MAX_PAYLOAD_SIZE};
use super::event::{DisconnectReason, TransportEvent};
use super::message::Message;
use super::reliability::Channel;
use super::socket::{Datagram, Socket};
use super::stats::NetworkStats;
use super::unix_millis;
use crate::config::NetConfig;
use crate::{HOST_PLAYER_ID, PlayerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Connecting,
    Connected,
    Closed,
}

/// Client side of the transport: one socket talking to one host.
pub struct Connector {
    socket: Socket,
    server: SocketAddr,
    channel: Channel,
    state: ConnectorState,
    player_id: Option<PlayerId>,
    last_receive_time: Instant,
    config: NetConfig,
    events: VecDeque<TransportEvent>,
}

impl Connector {
    pub fn connect(server: SocketAddr, player_name: &str, config: NetConfig) -> io::Result<Self> {
        let bind_addr = match server {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let socket = Socket::bind(bind_addr, &config)?;
        let now = Instant::now();

        let mut connector = Self {
            socket,
            server,
            channel: Channel::new(now),
            state: ConnectorState::Connecting,
            player_id: None,
            last_receive_time: now,
            config,
            events: VecDeque::new(),
        };

        info!("connecting to {server} as {player_name}");
        connector.send_message(
            &Message::ConnectRequest {
                player_name: player_name.to_string(),
                version: crate::PROTOCOL_VERSION.to_string(),
            },
            DeliveryMode::ReliableOrdered,
        );

        Ok(connector)
    }

    pub fn state(&self) -> ConnectorState {
        self.state
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.player_id
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    pub fn rtt(&self) -> Option<f32> {
        self.channel.rtt_ms()
    }

    pub fn stats(&self) -> &NetworkStats {
        self.socket.stats()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = TransportEvent> + '_ {
        self.events.drain(..)
    }

    pub fn poll(&mut self) {
        for datagram in self.socket.poll() {
            if self.state == ConnectorState::Closed {
                break;
            }
            if datagram.from != self.server {
                debug!("ignoring datagram from stranger {}", datagram.from);
                continue;
            }
            self.handle_datagram(datagram);
        }
    }

    fn handle_datagram(&mut self, datagram: Datagram) {
        let now = datagram.received_at;
        if now > self.last_receive_time {
            self.last_receive_time = now;
        }
        let mode = datagram.header.mode;

        for payload in self.channel.receive(&datagram.header, datagram.payload, now) {
            let message = match Message::decode(&payload) {
                Ok(message) => message,
                Err(e) => {
                    warn!("dropping message from host: {e}");
                    self.socket.stats_mut().decode_errors += 1;
                    continue;
                }
            };

            match message {
                Message::ConnectAccept {
                    player_id,
                    map_seed,
                } => {
                    if self.state != ConnectorState::Connecting {
                        debug!("duplicate connect accept ignored");
                        continue;
                    }
                    info!("accepted by {} as player {player_id}", self.server);
                    self.state = ConnectorState::Connected;
                    self.player_id = Some(player_id);
                    self.events
                        .push_back(TransportEvent::Accepted { player_id, map_seed });
                }
                Message::Disconnect { reason } => {
                    info!("host closed the connection: {reason}");
                    self.close(DisconnectReason::Remote(reason));
                    return;
                }
                Message::Heartbeat { .. } => {}
                Message::ConnectRequest { .. } => {
                    debug!("ignoring connect request from host");
                }
                message => self.events.push_back(TransportEvent::Message {
                    from: HOST_PLAYER_ID,
                    mode,
                    message,
                }),
            }
        }
    }

    pub fn tick(&mut self, now: Instant) {
        if self.state == ConnectorState::Closed {
            return;
        }

        if now.saturating_duration_since(self.last_receive_time) > self.config.peer_timeout {
            warn!("no contact with {} in {:?}", self.server, self.config.peer_timeout);
            self.close(DisconnectReason::Timeout);
            return;
        }

        let resends = self.channel.due_resends(now);
        self.socket.stats_mut().resends += resends.len() as u64;
        for datagram in resends {
            self.socket.send_to(&datagram, self.server);
        }

        if self.state == ConnectorState::Connected
            && self.channel.since_last_send(now) >= self.config.heartbeat_interval
        {
            let heartbeat = Message::Heartbeat {
                timestamp_ms: unix_millis(),
            };
            let datagram = self
                .channel
                .prepare(DeliveryMode::Unreliable, heartbeat.encode(), now);
            self.socket.send_to(&datagram, self.server);
        }

        if self.channel.needs_ack() {
            let datagram = self.channel.ack_only(now);
            self.socket.send_to(&datagram, self.server);
        }
    }

    pub fn send(&mut self, message: &Message, mode: DeliveryMode) {
        if self.state == ConnectorState::Closed {
            debug!("send on closed connection dropped");
            return;
        }
        self.send_message(message, mode);
    }

    fn send_message(&mut self, message: &Message, mode: DeliveryMode) {
        let payload = message.encode();
        if payload.len() > MAX_PAYLOAD_SIZE {
            warn!(
                "{:?} is {} bytes, over the {MAX_PAYLOAD_SIZE} byte limit",
                message.message_type(),
                payload.len()
            );
            return;
        }
        let datagram = self.channel.prepare(mode, payload, Instant::now());
        self.socket.send_to(&datagram, self.server);
    }

    /// Tells the host we are leaving. No event is raised.
    pub fn disconnect(&mut self, reason: &str) {
        if self.state == ConnectorState::Closed {
            return;
        }
        self.send_message(
            &Message::Disconnect {
                reason: reason.to_string(),
            },
            DeliveryMode::Unreliable,
        );
        self.state = ConnectorState::Closed;
    }

    fn close(&mut self, reason: DisconnectReason) {
        self.state = ConnectorState::Closed;
        self.events.push_back(TransportEvent::PeerDisconnected {
            player_id: HOST_PLAYER_ID,
            reason,
        });
    }
}
