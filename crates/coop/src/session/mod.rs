mod event;
mod roster;
mod timestep;

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Instant;

use log::{debug, info, warn};

pub use event::SessionEvent;
pub use roster::{Player, Roster};
pub use timestep::FixedTimestep;

use crate::config::{CoopConfig, NetConfig};
use crate::net::{
    Connector, DeliveryMode, DisconnectReason, Listener, Message, NetworkStats, TransportEvent,
};
use crate::{HOST_PLAYER_ID, PlayerId};

const MAX_TICKS_PER_UPDATE: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: ConnectionState,
    },
    #[error("failed to bind socket: {0}")]
    Bind(#[source] io::Error),
    #[error("cannot resolve {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("only the host can do that")]
    NotHost,
}

/// What entity synchronizers need from a session. Implemented by [`Session`]
/// and by test doubles.
pub trait NetworkSession {
    fn is_host(&self) -> bool;
    fn is_connected(&self) -> bool;
    fn local_player_id(&self) -> Option<PlayerId>;
    fn player_ids(&self) -> Vec<PlayerId>;
    fn config(&self) -> &CoopConfig;
    fn send(&mut self, message: &Message, mode: DeliveryMode);
    fn send_to(&mut self, player_id: PlayerId, message: &Message, mode: DeliveryMode);
    fn broadcast_except(&mut self, message: &Message, mode: DeliveryMode, exclude: PlayerId);
    fn set_map_seed(&mut self, seed: i32);

    fn player_count(&self) -> usize {
        self.player_ids().len()
    }
}

enum Role {
    Host(Listener),
    Client(Connector),
}

pub struct Session {
    config: CoopConfig,
    net_config: NetConfig,
    state: ConnectionState,
    role: Option<Role>,
    local_player_id: Option<PlayerId>,
    local_name: String,
    roster: Roster,
    map_seed: i32,
    timestep: FixedTimestep,
    pending_events: VecDeque<SessionEvent>,
}

impl Session {
    pub fn new(config: CoopConfig) -> Self {
        let net_config = config.net_config();
        Self::with_net_config(config, net_config)
    }

    pub fn with_net_config(config: CoopConfig, net_config: NetConfig) -> Self {
        Self {
            timestep: FixedTimestep::new(config.tick_rate),
            config,
            net_config,
            state: ConnectionState::Disconnected,
            role: None,
            local_player_id: None,
            local_name: String::new(),
            roster: Roster::new(),
            map_seed: 0,
            pending_events: VecDeque::new(),
        }
    }

    pub fn host(&mut self, port: u16, max_players: usize, name: &str) -> Result<(), SessionError> {
        self.require_disconnected("host")?;

        let mut listener = Listener::bind(port, max_players, self.net_config.clone())
            .map_err(|e| {
                warn!("cannot host on port {port}: {e}");
                SessionError::Bind(e)
            })?;
        listener.set_map_seed(self.map_seed);

        self.role = Some(Role::Host(listener));
        self.local_player_id = Some(HOST_PLAYER_ID);
        self.local_name = name.to_string();
        self.timestep.reset();
        self.add_player(Player::new(HOST_PLAYER_ID, name, true));
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    pub fn connect(&mut self, address: &str, port: u16, name: &str) -> Result<(), SessionError> {
        self.require_disconnected("connect")?;

        let server = (address, port)
            .to_socket_addrs()
            .and_then(|mut addrs| {
                addrs
                    .next()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address found"))
            })
            .map_err(|source| SessionError::Resolve {
                address: format!("{address}:{port}"),
                source,
            })?;

        let connector = Connector::connect(server, name, self.net_config.clone())
            .map_err(SessionError::Bind)?;

        self.role = Some(Role::Client(connector));
        self.local_name = name.to_string();
        self.timestep.reset();
        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    pub fn shutdown(&mut self) {
        let Some(role) = self.role.take() else {
            return;
        };
        match role {
            Role::Host(mut listener) => listener.shutdown("Server shutting down"),
            Role::Client(mut connector) => connector.disconnect("Client disconnected"),
        }
        self.teardown(DisconnectReason::Shutdown);
    }

    /// Polls the transport and runs any network ticks that are due. Returns
    /// the number of ticks run.
    pub fn update(&mut self, delta: f32) -> u32 {
        if self.role.is_none() {
            return 0;
        }

        self.poll_transport();
        self.timestep.accumulate(delta);

        let mut ticks = 0;
        while ticks < MAX_TICKS_PER_UPDATE && self.timestep.consume_tick() {
            self.network_tick(Instant::now());
            ticks += 1;
            if self.role.is_none() {
                break;
            }
        }
        if ticks == MAX_TICKS_PER_UPDATE {
            self.timestep.reset();
        }

        ticks
    }

    pub fn send(&mut self, message: &Message, mode: DeliveryMode) {
        if self.state != ConnectionState::Connected {
            debug!("not connected, {:?} dropped", message.message_type());
            return;
        }
        match self.role.as_mut() {
            Some(Role::Host(listener)) => listener.broadcast(message, mode, None),
            Some(Role::Client(connector)) => connector.send(message, mode),
            None => {}
        }
    }

    pub fn send_to(&mut self, player_id: PlayerId, message: &Message, mode: DeliveryMode) {
        match self.role.as_mut() {
            Some(Role::Host(listener)) => listener.send_to(player_id, message, mode),
            _ => debug!("send_to is host only, {:?} dropped", message.message_type()),
        }
    }

    pub fn broadcast_except(&mut self, message: &Message, mode: DeliveryMode, exclude: PlayerId) {
        match self.role.as_mut() {
            Some(Role::Host(listener)) => listener.broadcast(message, mode, Some(exclude)),
            _ => debug!("broadcast is host only, {:?} dropped", message.message_type()),
        }
    }

    pub fn kick(&mut self, player_id: PlayerId, reason: &str) -> Result<(), SessionError> {
        let Some(Role::Host(listener)) = self.role.as_mut() else {
            return Err(SessionError::NotHost);
        };
        listener.kick(player_id, reason);
        self.drain_transport_events();
        Ok(())
    }

    pub fn set_ready(&mut self, ready: bool) {
        let Some(local_id) = self.local_player_id else {
            return;
        };
        if self.state != ConnectionState::Connected {
            return;
        }
        self.roster.set_ready(local_id, ready);
        self.send(
            &Message::PlayerReady {
                player_id: local_id,
                ready,
            },
            DeliveryMode::ReliableOrdered,
        );
    }

    pub fn start_session(&mut self, difficulty: i32, start_delay: f32) -> Result<(), SessionError> {
        if !self.is_host() {
            return Err(SessionError::NotHost);
        }
        info!("starting run with seed {} in {start_delay}s", self.map_seed);
        self.send(
            &Message::SessionStart {
                map_seed: self.map_seed,
                difficulty,
                start_delay,
            },
            DeliveryMode::ReliableOrdered,
        );
        Ok(())
    }

    pub fn set_map_seed(&mut self, seed: i32) {
        self.map_seed = seed;
        if let Some(Role::Host(listener)) = self.role.as_mut() {
            listener.set_map_seed(seed);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_host(&self) -> bool {
        matches!(self.role, Some(Role::Host(_)))
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn local_player_id(&self) -> Option<PlayerId> {
        self.local_player_id
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.role.as_ref()? {
            Role::Host(listener) => Some(listener.local_addr()),
            Role::Client(connector) => Some(connector.local_addr()),
        }
    }

    pub fn player(&self, player_id: PlayerId) -> Option<&Player> {
        self.roster.get(player_id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.roster.iter()
    }

    pub fn player_count(&self) -> usize {
        self.roster.len()
    }

    pub fn map_seed(&self) -> i32 {
        self.map_seed
    }

    pub fn config(&self) -> &CoopConfig {
        &self.config
    }

    pub fn stats(&self) -> Option<&NetworkStats> {
        match self.role.as_ref()? {
            Role::Host(listener) => Some(listener.stats()),
            Role::Client(connector) => Some(connector.stats()),
        }
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = SessionEvent> + '_ {
        self.pending_events.drain(..)
    }

    fn require_disconnected(&self, action: &'static str) -> Result<(), SessionError> {
        if self.state != ConnectionState::Disconnected {
            warn!("{action} ignored: session is {:?}", self.state);
            return Err(SessionError::InvalidState {
                action,
                state: self.state,
            });
        }
        Ok(())
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        info!("session {:?} -> {state:?}", self.state);
        self.state = state;
        self.pending_events
            .push_back(SessionEvent::ConnectionStateChanged { state });
    }

    fn add_player(&mut self, player: Player) {
        let player_id = player.id;
        if self.roster.insert(player) {
            self.pending_events
                .push_back(SessionEvent::PlayerConnected { player_id });
        }
    }

    fn teardown(&mut self, reason: DisconnectReason) {
        for player in self.roster.clear() {
            if Some(player.id) != self.local_player_id {
                self.pending_events.push_back(SessionEvent::PlayerDisconnected {
                    player_id: player.id,
                    reason: reason.clone(),
                });
            }
        }
        self.local_player_id = None;
        self.set_state(ConnectionState::Disconnected);
    }

    fn poll_transport(&mut self) {
        match self.role.as_mut() {
            Some(Role::Host(listener)) => listener.poll(),
            Some(Role::Client(connector)) => connector.poll(),
            None => return,
        }
        self.drain_transport_events();
    }

    fn network_tick(&mut self, now: Instant) {
        match self.role.as_mut() {
            Some(Role::Host(listener)) => listener.tick(now),
            Some(Role::Client(connector)) => connector.tick(now),
            None => return,
        }
        self.drain_transport_events();
        self.refresh_latency();
    }

    fn drain_transport_events(&mut self) {
        let events: Vec<TransportEvent> = match self.role.as_mut() {
            Some(Role::Host(listener)) => listener.drain_events().collect(),
            Some(Role::Client(connector)) => connector.drain_events().collect(),
            None => return,
        };

        let hosting = self.is_host();
        for event in events {
            match event {
                TransportEvent::PeerConnected { player_id, name } if hosting => {
                    self.on_peer_joined(player_id, name)
                }
                TransportEvent::PeerDisconnected { player_id, reason } if hosting => {
                    self.on_peer_left(player_id, reason)
                }
                TransportEvent::Message {
                    from,
                    mode,
                    message,
                } if hosting => self.route_to_host(from, mode, message),
                TransportEvent::Accepted {
                    player_id,
                    map_seed,
                } => self.on_accepted(player_id, map_seed),
                TransportEvent::PeerDisconnected { reason, .. } => {
                    info!("lost connection to host: {reason}");
                    self.role = None;
                    self.teardown(reason);
                    return;
                }
                TransportEvent::Message { message, .. } => self.route_to_client(message),
                TransportEvent::PeerConnected { .. } => {}
            }
        }
    }

    fn on_peer_joined(&mut self, player_id: PlayerId, name: String) {
        self.add_player(Player::new(player_id, name.clone(), false));

        self.broadcast_except(
            &Message::PlayerJoin {
                player_id,
                player_name: name,
                character_id: 0,
                skin_id: 0,
            },
            DeliveryMode::ReliableOrdered,
            player_id,
        );

        let existing: Vec<Player> = self
            .roster
            .iter()
            .filter(|p| p.id != player_id)
            .cloned()
            .collect();
        for player in existing {
            self.send_to(
                player_id,
                &Message::PlayerJoin {
                    player_id: player.id,
                    player_name: player.name,
                    character_id: 0,
                    skin_id: 0,
                },
                DeliveryMode::ReliableOrdered,
            );
            if player.is_ready {
                self.send_to(
                    player_id,
                    &Message::PlayerReady {
                        player_id: player.id,
                        ready: true,
                    },
                    DeliveryMode::ReliableOrdered,
                );
            }
        }
    }

    fn on_peer_left(&mut self, player_id: PlayerId, reason: DisconnectReason) {
        if self.roster.remove(player_id).is_none() {
            return;
        }
        info!("player {player_id} left: {reason}");
        self.broadcast_except(
            &Message::PlayerLeave {
                player_id,
                reason: reason.to_string(),
            },
            DeliveryMode::ReliableOrdered,
            player_id,
        );
        self.pending_events
            .push_back(SessionEvent::PlayerDisconnected { player_id, reason });
    }

    fn route_to_host(&mut self, from: PlayerId, mode: DeliveryMode, message: Message) {
        if matches!(
            message,
            Message::PlayerJoin { .. } | Message::PlayerLeave { .. }
        ) {
            debug!("ignoring {:?} from player {from}", message.message_type());
            return;
        }

        if let Some(claimed) = message.relayed_player() {
            if claimed != from {
                warn!(
                    "player {from} sent {:?} on behalf of player {claimed}, dropped",
                    message.message_type()
                );
                return;
            }
            if let Message::PlayerReady { ready, .. } = message {
                self.roster.set_ready(from, ready);
            }
            self.broadcast_except(&message, mode, from);
        }

        self.pending_events.push_back(SessionEvent::PacketReceived {
            sender: from,
            message,
        });
    }

    fn on_accepted(&mut self, player_id: PlayerId, map_seed: i32) {
        self.local_player_id = Some(player_id);
        self.map_seed = map_seed;
        let name = self.local_name.clone();
        self.add_player(Player::new(player_id, name, false));
        self.set_state(ConnectionState::Connected);
    }

    fn route_to_client(&mut self, message: Message) {
        match message {
            Message::PlayerJoin {
                player_id,
                player_name,
                ..
            } => {
                if Some(player_id) != self.local_player_id {
                    self.add_player(Player::new(
                        player_id,
                        player_name,
                        player_id == HOST_PLAYER_ID,
                    ));
                }
            }
            Message::PlayerLeave { player_id, reason } => {
                if self.roster.remove(player_id).is_some() {
                    self.pending_events.push_back(SessionEvent::PlayerDisconnected {
                        player_id,
                        reason: DisconnectReason::Remote(reason),
                    });
                }
            }
            message => {
                match &message {
                    Message::PlayerReady { player_id, ready } => {
                        self.roster.set_ready(*player_id, *ready);
                    }
                    Message::MapSeed { seed, .. }
                    | Message::SessionStart { map_seed: seed, .. } => {
                        self.map_seed = *seed;
                    }
                    _ => {}
                }
                self.pending_events.push_back(SessionEvent::PacketReceived {
                    sender: HOST_PLAYER_ID,
                    message,
                });
            }
        }
    }

    fn refresh_latency(&mut self) {
        match self.role.as_ref() {
            Some(Role::Host(listener)) => {
                for player_id in listener.peer_ids() {
                    if let (Some(rtt), Some(player)) =
                        (listener.peer_rtt(player_id), self.roster.get_mut(player_id))
                    {
                        player.latency_ms = rtt;
                    }
                }
            }
            Some(Role::Client(connector)) => {
                if let (Some(rtt), Some(host)) =
                    (connector.rtt(), self.roster.get_mut(HOST_PLAYER_ID))
                {
                    host.latency_ms = rtt;
                }
            }
            None => {}
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl NetworkSession for Session {
    fn is_host(&self) -> bool {
        Session::is_host(self)
    }

    fn is_connected(&self) -> bool {
        Session::is_connected(self)
    }

    fn local_player_id(&self) -> Option<PlayerId> {
        self.local_player_id
    }

    fn player_ids(&self) -> Vec<PlayerId> {
        self.roster.ids()
    }

    fn config(&self) -> &CoopConfig {
        &self.config
    }

    fn send(&mut self, message: &Message, mode: DeliveryMode) {
        Session::send(self, message, mode)
    }

    fn send_to(&mut self, player_id: PlayerId, message: &Message, mode: DeliveryMode) {
        Session::send_to(self, player_id, message, mode)
    }

    fn broadcast_except(&mut self, message: &Message, mode: DeliveryMode, exclude: PlayerId) {
        Session::broadcast_except(self, message, mode, exclude)
    }

    fn set_map_seed(&mut self, seed: i32) {
        Session::set_map_seed(self, seed)
    }

    fn player_count(&self) -> usize {
        self.roster.len()
    }
}
